//! Launcher settings.
//!
//! These say where the hypervisor lives, not what machine to run; they are
//! loaded from environment variables with sensible defaults.

use std::path::PathBuf;

/// Where to find Firecracker and where to keep its per-VM state.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Path to the Firecracker binary.
    pub firecracker_path: PathBuf,

    /// Working directory for VM sockets and state.
    pub chroot_path: PathBuf,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            firecracker_path: PathBuf::from("/usr/local/bin/firecracker"),
            chroot_path: PathBuf::from("/tmp/stanza"),
        }
    }
}

impl LauncherConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `STANZA_FIRECRACKER` | `/usr/local/bin/firecracker` |
    /// | `STANZA_CHROOT` | `/tmp/stanza` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();

        Self {
            firecracker_path: lookup("STANZA_FIRECRACKER")
                .map(PathBuf::from)
                .unwrap_or(default.firecracker_path),
            chroot_path: lookup("STANZA_CHROOT")
                .map(PathBuf::from)
                .unwrap_or(default.chroot_path),
        }
    }

    /// Log warnings for paths that don't exist yet. Never fails; a missing
    /// binary surfaces later as a create error.
    pub fn validate_warn(&self) {
        if !self.firecracker_path.exists() {
            tracing::warn!("Firecracker not found: {:?}", self.firecracker_path);
        }

        if let Some(parent) = self.chroot_path.parent() {
            if !parent.exists() {
                tracing::warn!("Chroot parent directory not found: {:?}", parent);
            }
        }
    }
}
