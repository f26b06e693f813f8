//! Assembles a [`MachineConfig`] from a raw machine description.

use crate::config::{
    ConsoleSpec, MachineConfig, DEFAULT_CMDLINE, DEFAULT_CPUS, MB, MIN_MEMORY_MB,
};
use crate::devices::{validate_disks, validate_networks, validate_shares};
use crate::error::{ConfigError, Result};
use crate::raw::RawConfig;
use crate::runtime::Runtime;
use std::path::PathBuf;

impl MachineConfig {
    /// Build a validated configuration from `raw`.
    ///
    /// Scalar fields are checked first, so a bad `kernel`, `cpus` or `memory`
    /// is reported before any device is looked at. Devices are then validated
    /// in the order networks, disks, shares. The first violation aborts the
    /// build.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use stanza_vm::{FirecrackerRuntime, MachineConfig, RawConfig};
    ///
    /// # fn example() -> stanza_vm::Result<()> {
    /// let raw = RawConfig::parse(r#"{"kernel":"/boot/vmlinux","cpus":2,"memory":512}"#)?;
    /// let config = MachineConfig::from_raw(&raw, &FirecrackerRuntime::default())?;
    /// assert_eq!(config.cpu_count, 2);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found, or an attachment error if the
    /// runtime rejects a disk.
    pub fn from_raw(raw: &RawConfig, runtime: &dyn Runtime) -> Result<Self> {
        let kernel = raw.get_str("kernel", "");
        if kernel.is_empty() {
            return Err(ConfigError::MissingKernel.into());
        }

        let cpus = raw.get_i64("cpus", DEFAULT_CPUS);
        if cpus <= 0 {
            return Err(ConfigError::CpuCount(cpus).into());
        }
        // Anything this large is left for the runtime's own validation to refuse.
        let cpu_count = u32::try_from(cpus).unwrap_or(u32::MAX);

        let memory_mb = raw.get_u64("memory", MIN_MEMORY_MB);
        if memory_mb < MIN_MEMORY_MB {
            return Err(ConfigError::MemoryTooSmall {
                min: MIN_MEMORY_MB,
                actual: memory_mb,
            }
            .into());
        }
        let memory_bytes = memory_mb
            .checked_mul(MB)
            .ok_or(ConfigError::MemoryTooLarge(memory_mb))?;

        let initrd = raw.get_str("initrd", "");
        let initrd_path = (!initrd.is_empty()).then(|| PathBuf::from(initrd));
        let command_line = raw.get_str("cmdline", DEFAULT_CMDLINE);

        let networks = validate_networks(&raw.get_maps("network"))?;
        let disks = validate_disks(&raw.get_maps("disks"), runtime)?;
        let share_entries = raw.get_map_of_maps("shares");
        let shares = if share_entries.is_empty() {
            Vec::new()
        } else {
            validate_shares(&share_entries, runtime)?
        };

        tracing::info!(
            kernel = %kernel,
            cpus = cpu_count,
            memory_mb,
            networks = networks.len(),
            disks = disks.len(),
            shares = shares.len(),
            "Machine configuration built"
        );

        Ok(Self {
            kernel_path: PathBuf::from(kernel),
            initrd_path,
            command_line,
            cpu_count,
            memory_bytes,
            networks,
            disks,
            shares,
            console: ConsoleSpec::Stdio,
        })
    }
}
