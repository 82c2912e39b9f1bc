//! GameScript – runtime for compiled branching dialogue
//!
//! This crate loads GameScript snapshots and runs conversations over them:
//! - Zero-copy, verified access to conversations, nodes, edges, actors and properties
//! - Locale catalogs with hot locale switching
//! - A pooled per-conversation state machine driven by listener callbacks
//! - Host-registered conditions and actions, including latent tasks
//! - A CLI for inspecting, validating and playing snapshots

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Snapshot access and conversation execution
pub mod runtime;

// Re-export key types for convenience
pub use runtime::{
    ActiveConversation, CompletionHandle, ConversationListener, Database, GameScriptError,
    Manifest, NodeRegistry, Runner, RunnerSettings,
};

/// Current version of the GameScript runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Snapshot format version understood by this build
pub const FORMAT_VERSION: (u16, u16) = (
    runtime::format::VERSION_MAJOR,
    runtime::format::VERSION_MINOR,
);
