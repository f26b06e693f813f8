//! Error types for stanza-vm.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for stanza-vm operations.
pub type Result<T> = std::result::Result<T, VmError>;

/// A rejected field in the machine description.
///
/// Every variant names the key or value that failed so the message alone is
/// enough to locate the problem in the input file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("kernel path is not set")]
    MissingKernel,

    #[error("cpu count must be > 0, got {0}")]
    CpuCount(i64),

    #[error("memory must be >= {min} MB, got {actual} MB")]
    MemoryTooSmall { min: u64, actual: u64 },

    #[error("memory of {0} MB does not fit in a 64-bit byte count")]
    MemoryTooLarge(u64),

    #[error("unknown network mode: {0:?}")]
    UnknownNetworkMode(String),

    #[error("invalid MAC address: {0:?}")]
    InvalidMac(String),

    #[error("duplicate network device with MAC address {0}")]
    DuplicateMac(String),

    #[error("duplicate network device without MAC address")]
    DuplicateUnaddressed,

    #[error("invalid disk, empty path")]
    EmptyDiskPath,

    #[error("invalid tag: {0:?}")]
    InvalidTag(String),

    #[error("empty share path for tag {0:?}")]
    EmptySharePath(String),
}

/// Broad classes of failure, used by callers that want to react to a failure
/// without matching on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required field is missing or a value is out of range.
    MalformedInput,
    /// Devices conflict with each other or carry a malformed identifier.
    DeviceConflict,
    /// The runtime refused a backing file or device.
    Attachment,
    /// The runtime refused to validate, start, or keep running the machine.
    Lifecycle,
}

/// Errors that can occur while building or running a machine.
#[derive(Debug, Error)]
pub enum VmError {
    /// The machine description was rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The runtime could not use a backing file
    #[error("cannot attach {}: {reason}", path.display())]
    Attach { path: PathBuf, reason: String },

    /// The runtime rejected the assembled configuration
    #[error("invalid machine configuration: {0}")]
    Validation(String),

    /// Failed to create the machine handle
    #[error("failed to create VM: {0}")]
    Create(String),

    /// The capability probe answered no
    #[error("machine cannot be started")]
    NotStartable,

    /// The start request completed with a failure
    #[error("failed to start VM: {0}")]
    Start(String),

    /// The runtime failed while the machine was being driven
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Malformed machine description document
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingKernel
            | Self::CpuCount(_)
            | Self::MemoryTooSmall { .. }
            | Self::MemoryTooLarge(_)
            | Self::UnknownNetworkMode(_)
            | Self::EmptyDiskPath
            | Self::EmptySharePath(_) => ErrorKind::MalformedInput,
            Self::InvalidMac(_)
            | Self::DuplicateMac(_)
            | Self::DuplicateUnaddressed
            | Self::InvalidTag(_) => ErrorKind::DeviceConflict,
        }
    }
}

impl VmError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(e) => e.kind(),
            Self::Json(_) => ErrorKind::MalformedInput,
            Self::Attach { .. } => ErrorKind::Attachment,
            Self::Validation(_)
            | Self::Create(_)
            | Self::NotStartable
            | Self::Start(_)
            | Self::Runtime(_) => ErrorKind::Lifecycle,
        }
    }
}
