//! Seams to the hypervisor that actually runs the guest.
//!
//! The builder consults a [`Runtime`] to check backing files and share tags,
//! and the lifecycle driver uses it to validate the finished configuration
//! and create a [`Machine`] handle. Everything the runtime does beyond that
//! (device emulation, vCPU scheduling) is outside this crate.

use crate::config::{DiskSpec, MachineConfig};
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::watch;

/// Longest share tag accepted by virtio-fs, in bytes.
pub const MAX_SHARE_TAG_LEN: usize = 36;

/// State of a machine as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    /// Start has been requested but the guest is not yet executing
    Starting,
    /// Guest is executing
    Running,
    /// Not started yet, or exited cleanly
    Stopped,
    /// Runtime reports a failure
    Error,
}

impl MachineState {
    /// `true` while the guest is starting or running.
    pub fn is_active(self) -> bool {
        matches!(self, MachineState::Starting | MachineState::Running)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineState::Starting => write!(f, "starting"),
            MachineState::Running => write!(f, "running"),
            MachineState::Stopped => write!(f, "stopped"),
            MachineState::Error => write!(f, "error"),
        }
    }
}

/// A hypervisor that can host a machine.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Check that `disk` can back a block device.
    ///
    /// # Errors
    /// Returns [`VmError::Attach`](crate::VmError::Attach) naming the path
    /// when the runtime cannot use it.
    fn attach_disk(&self, disk: &DiskSpec) -> Result<()>;

    /// Whether `tag` is usable as a shared-directory tag.
    fn is_valid_share_tag(&self, tag: &str) -> bool {
        is_virtio_fs_tag(tag)
    }

    /// Cross-field validation of the complete configuration.
    fn validate(&self, config: &MachineConfig) -> Result<()>;

    /// Create a machine handle bound to `config`. The guest is not started.
    async fn create(&self, config: &MachineConfig) -> Result<Box<dyn Machine>>;
}

/// A created machine.
///
/// A handle must not be used concurrently; the lifecycle driver only calls
/// these methods from its command queue.
#[async_trait]
pub trait Machine: Send {
    /// Whether the machine is eligible to start right now.
    async fn can_start(&mut self) -> bool;

    /// Start the guest and wait for the runtime to accept or refuse.
    ///
    /// On `Ok`, the published state must already be `Starting` or `Running`.
    async fn start(&mut self) -> Result<()>;

    /// Current state as last reported by the runtime.
    fn state(&self) -> MachineState;

    /// Subscribe to state changes.
    fn subscribe(&self) -> watch::Receiver<MachineState>;
}

/// The virtio-fs tag rule: 1 to 36 bytes, no whitespace, control
/// characters, or `/`.
pub fn is_virtio_fs_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= MAX_SHARE_TAG_LEN
        && !tag
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '/')
}
