//! Error types for lvcache
//!
//! All modules use `LvCacheResult<T>` as their return type.

use crate::cache::remove::StepFailure;
use crate::cache::txn::TxPhase;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for lvcache operations
pub type LvCacheResult<T> = Result<T, LvCacheError>;

/// All errors that can occur in lvcache
#[derive(Error, Debug)]
pub enum LvCacheError {
    // Precondition violations
    #[error("Internal error: {name} is not a cache pool LV")]
    NotCachePool { name: String },

    #[error("Internal error: the origin, {name}, cannot be of cache type")]
    OriginIsCache { name: String },

    #[error("{name} is not a cache LV")]
    NotCache { name: String },

    #[error("Cache pool {pool} is already in use by {user}")]
    PoolInUse { pool: String, user: String },

    #[error("Layer name {name} is already taken")]
    LayerNameCollision { name: String },

    #[error("Segment type not found: {0}")]
    SegmentTypeNotFound(String),

    // Volume group lookups
    #[error("Volume group not found: {0}")]
    VgNotFound(String),

    #[error("Volume group already exists: {0}")]
    VgExists(String),

    #[error("Logical volume {name} not found in {vg}")]
    LvNotFound { vg: String, name: String },

    #[error("Logical volume {name} already exists in {vg}")]
    LvExists { vg: String, name: String },

    #[error("Logical volume {name} is still used by {users} segment(s)")]
    LvInUse { name: String, users: usize },

    #[error("Invalid name {name}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Inconsistent metadata for {vg}: {reason}")]
    MetadataInvalid { vg: String, reason: String },

    // Metadata persistence
    #[error("No staged metadata for {0}")]
    NothingStaged(String),

    #[error("Staged metadata for {vg} is seqno {found}, expected {expected}")]
    MetadataStale { vg: String, expected: u64, found: u64 },

    // Transaction and orchestration
    #[error("Transaction on {lv} failed during {phase}: {source}")]
    Transaction {
        phase: TxPhase,
        lv: String,
        #[source]
        source: Box<LvCacheError>,
    },

    #[error("{0}")]
    StepFailed(Box<StepFailure>),

    #[error("Cache {lv} still has {dirty} dirty blocks after {waited_secs}s")]
    FlushTimeout {
        lv: String,
        dirty: u64,
        waited_secs: u64,
    },

    // Kernel device errors
    #[error("Device {op} failed for {device}: {reason}")]
    Device {
        op: String,
        device: String,
        reason: String,
    },

    #[error("Cannot parse status of {device}: {reason}")]
    StatusParse { device: String, reason: String },

    #[error("Cannot build a table for {device}: {segtype} segments need an external table generator")]
    TableUnsupported { device: String, segtype: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create directory {path}: {source}")]
    DirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl LvCacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create an internal (programmer) error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The orchestration step that failed, if this error came out of one
    pub fn failed_step(&self) -> Option<&StepFailure> {
        match self {
            Self::StepFailed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::VgNotFound(_) => Some("Run: lvcache vg create <vg>"),
            Self::StepFailed(_) => Some(
                "Nothing was rolled back. Check the journal for the failed step and finish the sequence manually",
            ),
            Self::FlushTimeout { .. } => {
                Some("The cleaner policy stays in place; rerun the removal to keep flushing")
            }
            Self::TableUnsupported { .. } => Some(
                "Set device.table_generator in the config, or use backend = \"simulate\" to rehearse",
            ),
            Self::MetadataStale { .. } => Some("Another writer staged metadata; reload and retry"),
            _ => None,
        }
    }
}
