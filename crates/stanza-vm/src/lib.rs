//! # stanza-vm
//!
//! Turns a declarative JSON machine description into a validated
//! [`MachineConfig`] and drives the machine through its startup lifecycle.
//!
//! ## Quick Start
//!
//! ```no_run
//! use stanza_vm::{FirecrackerRuntime, LifecycleDriver, MachineConfig, RawConfig};
//!
//! # async fn example() -> stanza_vm::Result<()> {
//! let raw = RawConfig::parse(r#"{
//!     "kernel": "/var/lib/stanza/vmlinux",
//!     "cmdline": "console=ttyS0",
//!     "cpus": 2,
//!     "memory": 512,
//!     "network": [{"mode": "nat"}],
//!     "disks": [{"path": "/var/lib/stanza/rootfs.ext4"}]
//! }"#)?;
//!
//! let runtime = FirecrackerRuntime::default();
//! let config = MachineConfig::from_raw(&raw, &runtime)?;
//!
//! // Blocks until the guest stops
//! let final_state = LifecycleDriver::new(&runtime).run(&config).await?;
//! println!("guest finished: {final_state}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Defaulting raw accessors**: missing or mistyped keys fall back to defaults
//! - **Device validation**: NAT networks, disks, and shared directories, fail-fast
//! - **Lifecycle driver**: validate, probe, start, then wait for termination
//! - **Firecracker runtime**: a concrete hypervisor backend via firepilot

mod builder;
mod config;
mod devices;
mod error;
mod firecracker;
mod lifecycle;
mod raw;
mod runtime;

pub use config::{
    ConsoleSpec, DiskSpec, MacAddr, MachineConfig, NetworkMode, NetworkSpec, ParseMacError,
    ShareSpec, DEFAULT_CMDLINE, DEFAULT_CPUS, MIN_MEMORY_MB,
};
pub use devices::{validate_disks, validate_networks, validate_shares};
pub use error::{ConfigError, ErrorKind, Result, VmError};
pub use firecracker::{FirecrackerMachine, FirecrackerRuntime, MAX_VCPUS, STATE_POLL_INTERVAL};
pub use lifecycle::{LifecycleDriver, LifecycleState, Outcome};
pub use raw::RawConfig;
pub use runtime::{is_virtio_fs_tag, Machine, MachineState, Runtime, MAX_SHARE_TAG_LEN};

/// Build `raw` into a configuration and run it to termination on `runtime`.
///
/// The driver is never invoked if the build fails.
pub async fn launch(raw: &RawConfig, runtime: &dyn Runtime) -> Result<MachineState> {
    let config = MachineConfig::from_raw(raw, runtime)?;
    LifecycleDriver::new(runtime).run(&config).await
}
