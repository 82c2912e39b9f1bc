//! Locale catalog
//!
//! `manifest.json` sits at the root of a data directory and lists the
//! exported locales. Snapshot paths resolve relative to the manifest's own
//! directory: `{base}/locales/{name}.gsb`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::database::Database;
use super::error::{DatabaseError, DatabaseResult, ManifestError, ManifestResult};
use super::registry::NodeRegistry;
use super::runner::Runner;
use super::storage::Storage;
use super::RunnerSettings;

/// One exported locale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Locale {
    /// Stable identifier
    pub id: i32,
    /// Internal code; also the snapshot file stem
    pub name: String,
    /// Display name
    pub localized_name: String,
    /// Content hash of the snapshot file (hex)
    #[serde(default)]
    pub hash: String,
}

/// Parsed manifest plus the directory it was loaded from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    version: String,
    #[serde(default)]
    exported_at: Option<DateTime<Utc>>,
    #[serde(default)]
    primary_locale: usize,
    locales: Vec<Locale>,
    #[serde(skip)]
    base_path: PathBuf,
}

impl Manifest {
    /// Build a manifest in memory (authoring and tests)
    pub fn new(
        version: impl Into<String>,
        locales: Vec<Locale>,
        primary_locale: usize,
        base_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            version: version.into(),
            exported_at: Some(Utc::now()),
            primary_locale,
            locales,
            base_path: base_path.into(),
        }
    }

    /// Parse `manifest.json` and record its directory as the base path
    pub fn load_from_path(path: impl AsRef<Path>) -> ManifestResult<Arc<Self>> {
        let path = path.as_ref();
        let base_path = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let storage = Storage::new(base_path.clone());

        let data = storage.read_file(path).map_err(|err| ManifestError::Storage {
            path: path.to_path_buf(),
            detail: format!("{:#}", err),
        })?;

        let mut manifest: Manifest = serde_json::from_slice(&data)?;
        manifest.base_path = base_path;
        manifest.validate()?;

        tracing::info!(
            version = %manifest.version,
            locales = manifest.locales.len(),
            "Loaded manifest"
        );
        Ok(Arc::new(manifest))
    }

    /// Parse `{dir}/manifest.json`
    pub fn load_from_dir(dir: impl AsRef<Path>) -> ManifestResult<Arc<Self>> {
        let storage = Storage::new(dir.as_ref().to_path_buf());
        Self::load_from_path(storage.manifest_path())
    }

    fn validate(&self) -> ManifestResult<()> {
        if self.locales.is_empty() {
            return Err(ManifestError::NoLocales);
        }
        if self.primary_locale >= self.locales.len() {
            return Err(ManifestError::PrimaryOutOfRange {
                index: self.primary_locale,
                count: self.locales.len(),
            });
        }
        Ok(())
    }

    /// Write this manifest atomically to `{base}/manifest.json`
    pub fn save(&self) -> ManifestResult<()> {
        let storage = Storage::new(self.base_path.clone());
        let path = storage.manifest_path();
        let json = serde_json::to_vec_pretty(self)?;
        storage
            .write_atomic(&path, &json)
            .map_err(|err| ManifestError::Storage {
                path,
                detail: format!("{:#}", err),
            })
    }

    /// Schema version string
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Export timestamp
    pub fn exported_at(&self) -> Option<DateTime<Utc>> {
        self.exported_at
    }

    /// Directory containing the manifest
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// All locales
    pub fn locales(&self) -> &[Locale] {
        &self.locales
    }

    /// Number of locales
    pub fn locale_count(&self) -> usize {
        self.locales.len()
    }

    /// Locale at `index`
    pub fn locale(&self, index: usize) -> Option<&Locale> {
        self.locales.get(index)
    }

    /// Index of the primary locale
    pub fn primary_locale_index(&self) -> usize {
        self.primary_locale
    }

    /// Primary locale
    pub fn primary_locale(&self) -> Option<&Locale> {
        self.locales.get(self.primary_locale)
    }

    /// Locale with `id`
    pub fn find_locale(&self, id: i32) -> Option<&Locale> {
        self.locales.iter().find(|locale| locale.id == id)
    }

    /// Locale with code `name`
    pub fn find_locale_by_name(&self, name: &str) -> Option<&Locale> {
        self.locales.iter().find(|locale| locale.name == name)
    }

    /// Whether a locale with `id` exists
    pub fn has_locale(&self, id: i32) -> bool {
        self.find_locale(id).is_some()
    }

    /// Whether a locale with code `name` exists
    pub fn has_locale_named(&self, name: &str) -> bool {
        self.find_locale_by_name(name).is_some()
    }

    /// Snapshot file for `locale`
    pub fn snapshot_path(&self, locale: &Locale) -> PathBuf {
        Storage::new(self.base_path.clone()).snapshot_path(&locale.name)
    }

    /// Load the snapshot for `locale`
    pub fn load_database(self: &Arc<Self>, locale: &Locale) -> DatabaseResult<Database> {
        if !self.has_locale(locale.id) {
            return Err(DatabaseError::UnknownLocale(locale.id));
        }
        Database::from_manifest(Arc::clone(self), locale.id)
    }

    /// Load the snapshot for the primary locale
    pub fn load_primary_database(self: &Arc<Self>) -> DatabaseResult<Database> {
        let locale = self
            .primary_locale()
            .ok_or(DatabaseError::UnknownLocale(-1))?;
        self.load_database(locale)
    }

    /// Load `locale` and start a runner over it
    pub fn create_runner(
        self: &Arc<Self>,
        locale: &Locale,
        settings: RunnerSettings,
        registry: &NodeRegistry,
    ) -> DatabaseResult<Runner> {
        let database = self.load_database(locale)?;
        Ok(Runner::initialize(database, settings, registry))
    }
}
