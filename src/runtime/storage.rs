//! Filesystem layout helpers and atomic write operations
//!
//! A GameScript data directory looks like:
//!
//! ```text
//! {root}/manifest.json
//! {root}/settings.json
//! {root}/locales/{code}.gsb
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};

use super::RunnerSettings;

/// File extension of locale snapshots
pub const SNAPSHOT_EXTENSION: &str = "gsb";

/// Storage manager for a GameScript data directory
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Create a new storage manager
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the manifest file path
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    /// Get the locales directory path
    pub fn locales_dir(&self) -> PathBuf {
        self.root.join("locales")
    }

    /// Get the snapshot path for a locale code
    pub fn snapshot_path(&self, locale_code: &str) -> PathBuf {
        self.locales_dir()
            .join(format!("{}.{}", locale_code, SNAPSHOT_EXTENSION))
    }

    /// Write data atomically to a file
    ///
    /// Creates a temporary file, writes the data, syncs, then renames
    pub fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("tmp");

        let mut file = File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;

        file.write_all(data)
            .context("Failed to write data")?;

        file.sync_all()
            .context("Failed to sync file")?;

        drop(file);

        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

        if let Some(parent) = path.parent() {
            let dir = OpenOptions::new()
                .read(true)
                .open(parent)
                .with_context(|| format!("Failed to open directory: {:?}", parent))?;

            dir.sync_all()
                .context("Failed to sync directory")?;
        }

        Ok(())
    }

    /// Read a file
    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path)
            .with_context(|| format!("Failed to read file: {:?}", path))
    }

    /// Check if a path exists
    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Create a directory and all parent directories
    pub fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {:?}", path))
    }
}

/// Create the directory layout for a data directory
pub fn init_storage(root: &Path) -> Result<()> {
    let storage = Storage::new(root.to_path_buf());
    storage.create_dir_all(root)?;
    storage.create_dir_all(&storage.locales_dir())?;
    Ok(())
}

/// Write runner settings to `{root}/settings.json`
pub fn write_settings(root: &Path, settings: &RunnerSettings) -> Result<()> {
    let storage = Storage::new(root.to_path_buf());
    let json = serde_json::to_vec_pretty(settings)
        .context("Failed to serialize settings")?;

    storage.write_atomic(&storage.settings_path(), &json)?;

    Ok(())
}

/// Load runner settings from `{root}/settings.json`
///
/// A missing file yields the defaults.
pub fn load_settings(root: &Path) -> Result<RunnerSettings> {
    let storage = Storage::new(root.to_path_buf());
    let settings_path = storage.settings_path();

    if !storage.exists(&settings_path) {
        return Ok(RunnerSettings::default());
    }

    let data = storage.read_file(&settings_path)?;
    let settings: RunnerSettings = serde_json::from_slice(&data)
        .context("Failed to deserialize settings")?;

    Ok(settings.normalized())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_storage() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("GameScript");

        init_storage(&root).unwrap();

        assert!(root.join("locales").exists());
    }

    #[test]
    fn test_snapshot_path_layout() {
        let storage = Storage::new(PathBuf::from("data"));
        assert_eq!(
            storage.snapshot_path("en_US"),
            PathBuf::from("data").join("locales").join("en_US.gsb")
        );
        assert_eq!(storage.manifest_path(), PathBuf::from("data").join("manifest.json"));
    }

    #[test]
    fn test_write_and_read_settings() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();

        let settings = RunnerSettings {
            max_concurrent_conversations: 4,
            prevent_single_node_choices: true,
            verbose_logging: true,
            ..RunnerSettings::default()
        };

        write_settings(&root, &settings).unwrap();
        let loaded = load_settings(&root).unwrap();

        assert_eq!(loaded.max_concurrent_conversations, 4);
        assert!(loaded.prevent_single_node_choices);
        assert!(loaded.verbose_logging);
    }

    #[test]
    fn test_missing_settings_use_defaults() {
        let temp = TempDir::new().unwrap();
        let loaded = load_settings(temp.path()).unwrap();
        assert_eq!(loaded, RunnerSettings::default());
    }

    #[test]
    fn test_atomic_write() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().to_path_buf());
        let test_file = temp.path().join("test.gsb");

        let data = b"GSNP";
        storage.write_atomic(&test_file, data).unwrap();

        let read_data = storage.read_file(&test_file).unwrap();
        assert_eq!(data, &read_data[..]);
    }
}
