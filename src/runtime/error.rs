//! Error types for the GameScript runtime
//!
//! Load-time failures are reported through these enums. Lookup misses and
//! stale handles are not errors: they resolve to invalid references or
//! silent no-ops at the layer where they occur.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum GameScriptError {
    /// Snapshot verification errors
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Snapshot store errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Manifest errors
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Runner errors
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Structural problems found while verifying a snapshot buffer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Buffer shorter than the fixed header
    #[error("Buffer too small: {len} bytes")]
    TooSmall {
        /// Actual buffer length
        len: usize,
    },

    /// Magic bytes did not match
    #[error("Bad magic: {0:?}")]
    BadMagic([u8; 4]),

    /// Major version not understood by this runtime
    #[error("Unsupported snapshot version {major}.{minor}")]
    UnsupportedVersion {
        /// Major version found
        major: u16,
        /// Minor version found
        minor: u16,
    },

    /// A section or record range falls outside the buffer
    #[error("{what} out of bounds (offset {offset}, len {len})")]
    OutOfBounds {
        /// What was being read
        what: &'static str,
        /// Start offset
        offset: usize,
        /// Requested length
        len: usize,
    },

    /// Same section kind listed twice
    #[error("Duplicate section kind {0}")]
    DuplicateSection(u32),

    /// Section stride incompatible with the records this runtime reads
    #[error("Section {kind} has invalid stride {stride} (record size {expected})")]
    BadStride {
        /// Section kind
        kind: u32,
        /// Declared stride
        stride: u32,
        /// Record size this runtime reads
        expected: u32,
    },

    /// String bytes were not UTF-8
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// A cross-reference points outside its target collection
    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// Referencing field
        what: &'static str,
        /// Offending index
        index: i64,
        /// Collection length
        len: usize,
    },

    /// An enum tag had an unknown value
    #[error("Invalid {what} tag {value}")]
    InvalidTag {
        /// Field name
        what: &'static str,
        /// Raw value
        value: u8,
    },
}

/// Convenience result alias for format operations
pub type FormatResult<T> = std::result::Result<T, FormatError>;

/// Snapshot store errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Snapshot file could not be read
    #[error("Failed to read snapshot {path:?}: {detail}")]
    Read {
        /// Snapshot path
        path: PathBuf,
        /// Error details
        detail: String,
    },

    /// Snapshot failed verification
    #[error("Snapshot verification failed: {0}")]
    Verification(#[from] FormatError),

    /// Locale change requested without a manifest back-reference
    #[error("Database was not loaded through a manifest")]
    NoManifest,

    /// Locale id not present in the manifest
    #[error("Locale {0} not found in manifest")]
    UnknownLocale(i32),
}

/// Convenience result alias for database operations
pub type DatabaseResult<T> = std::result::Result<T, DatabaseError>;

/// Manifest errors
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Manifest file could not be read or written
    #[error("Manifest storage error for {path:?}: {detail}")]
    Storage {
        /// Manifest path
        path: PathBuf,
        /// Error details
        detail: String,
    },

    /// Manifest JSON was malformed or missing fields
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Manifest lists no locales
    #[error("Manifest contains no locales")]
    NoLocales,

    /// Primary locale index outside the locale list
    #[error("Primary locale index {index} out of range ({count} locales)")]
    PrimaryOutOfRange {
        /// Declared primary index
        index: usize,
        /// Number of locales
        count: usize,
    },

    /// Loading a locale snapshot failed
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Convenience result alias for manifest operations
pub type ManifestResult<T> = std::result::Result<T, ManifestError>;

/// Errors returned by `Runner::start_conversation`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// No snapshot is loaded
    #[error("No snapshot loaded")]
    NoSnapshot,

    /// Conversation id not present in the snapshot
    #[error("Conversation {0} not found")]
    ConversationNotFound(i32),

    /// Conversation position outside the snapshot
    #[error("Conversation index {0} out of range")]
    ConversationIndexOutOfRange(i32),

    /// Task owner refused to host action tasks
    #[error("Task owner does not support action tasks")]
    TaskOwnerUnsupported,
}

/// Convenience result alias for runner operations
pub type RunnerResult<T> = std::result::Result<T, RunnerError>;

/// Result type using GameScriptError
pub type Result<T> = std::result::Result<T, GameScriptError>;
