//! Configuration types for a validated machine.
//!
//! [`MachineConfig::from_raw`] is the way to obtain one from user input; a
//! config it returns has passed every field and device rule.

use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Smallest accepted memory size, in MB. Also the default.
pub const MIN_MEMORY_MB: u64 = 128;

/// Kernel command line used when none is given.
pub const DEFAULT_CMDLINE: &str = "console=hvc0";

/// vCPU count used when none is given.
pub const DEFAULT_CPUS: i64 = 1;

pub(crate) const MB: u64 = 1024 * 1024;

/// Validated, immutable description of a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineConfig {
    /// Path to kernel image
    pub kernel_path: PathBuf,
    /// Path to initial ramdisk, if any
    pub initrd_path: Option<PathBuf>,
    /// Kernel command line
    pub command_line: String,
    /// Number of virtual CPUs, always > 0
    pub cpu_count: u32,
    /// Guest memory in bytes, always >= [`MIN_MEMORY_MB`] MB
    pub memory_bytes: u64,
    /// NAT network interfaces, in input order
    pub networks: Vec<NetworkSpec>,
    /// Block devices, in input order
    pub disks: Vec<DiskSpec>,
    /// Shared directories, ordered by tag
    pub shares: Vec<ShareSpec>,
    /// Guest console
    pub console: ConsoleSpec,
}

impl MachineConfig {
    /// Guest memory in MiB, rounded down.
    pub fn memory_mib(&self) -> u64 {
        self.memory_bytes / MB
    }
}

/// How a network interface reaches the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Address-translated through the host
    Nat,
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Nat => write!(f, "nat"),
        }
    }
}

/// A guest network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSpec {
    pub mode: NetworkMode,
    /// Guest MAC address (optional, assigned by the runtime if None)
    pub mac: Option<MacAddr>,
    /// Host TAP device carrying the interface's traffic
    pub tap: String,
}

/// A block device backed by a host file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskSpec {
    pub path: PathBuf,
    pub readonly: bool,
}

/// A host directory exposed to the guest under a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareSpec {
    pub tag: String,
    pub path: PathBuf,
    pub readonly: bool,
}

/// Where the guest console is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleSpec {
    /// The launcher's own stdin/stdout
    #[default]
    Stdio,
}

/// A 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

/// Error returned when a string is not a MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseMacError;

impl fmt::Display for ParseMacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected six hex octets separated by ':' or '-'")
    }
}

impl std::error::Error for ParseMacError {}

impl FromStr for MacAddr {
    type Err = ParseMacError;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`, any case, but not a
    /// mix of separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sep = if s.contains('-') { '-' } else { ':' };
        let mut octets = [0u8; 6];
        let mut parts = s.split(sep);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or(ParseMacError)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseMacError);
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError)?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError);
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
