//! Per-device validation.
//!
//! Each validator walks its entries in input order and stops at the first
//! violation.

use crate::config::{DiskSpec, MacAddr, NetworkMode, NetworkSpec, ShareSpec};
use crate::error::{ConfigError, Result};
use crate::raw::RawConfig;
use crate::runtime::Runtime;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Validate network entries.
///
/// At most one interface may omit its MAC, and no two may share one.
pub fn validate_networks(entries: &[RawConfig]) -> Result<Vec<NetworkSpec>> {
    let mut seen: HashSet<Option<MacAddr>> = HashSet::new();
    let mut networks = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        let mode = match entry.get_str("mode", "").as_str() {
            "nat" => NetworkMode::Nat,
            other => return Err(ConfigError::UnknownNetworkMode(other.to_string()).into()),
        };

        let mac_str = entry.get_str("mac", "");
        let mac = if mac_str.is_empty() {
            None
        } else {
            Some(
                mac_str
                    .parse::<MacAddr>()
                    .map_err(|_| ConfigError::InvalidMac(mac_str.clone()))?,
            )
        };

        if !seen.insert(mac) {
            return Err(match mac {
                Some(mac) => ConfigError::DuplicateMac(mac.to_string()),
                None => ConfigError::DuplicateUnaddressed,
            }
            .into());
        }

        let tap = entry.get_str("tap", &format!("tap{index}"));
        let mac_display = mac.map_or_else(|| "auto".to_string(), |m| m.to_string());
        tracing::info!(
            %mode,
            mac = %mac_display,
            tap = %tap,
            "Network device accepted"
        );
        networks.push(NetworkSpec { mode, mac, tap });
    }

    Ok(networks)
}

/// Validate disk entries, asking `runtime` whether each backing file is usable.
pub fn validate_disks(entries: &[RawConfig], runtime: &dyn Runtime) -> Result<Vec<DiskSpec>> {
    let mut disks = Vec::with_capacity(entries.len());

    for entry in entries {
        let path = entry.get_str("path", "");
        if path.is_empty() {
            return Err(ConfigError::EmptyDiskPath.into());
        }

        let disk = DiskSpec {
            path: PathBuf::from(path),
            readonly: entry.get_yes("readonly"),
        };
        runtime.attach_disk(&disk)?;

        tracing::info!(
            path = %disk.path.display(),
            readonly = disk.readonly,
            "Disk accepted"
        );
        disks.push(disk);
    }

    Ok(disks)
}

/// Validate shared directories keyed by tag.
pub fn validate_shares(
    entries: &BTreeMap<String, RawConfig>,
    runtime: &dyn Runtime,
) -> Result<Vec<ShareSpec>> {
    let mut shares = Vec::with_capacity(entries.len());

    for (tag, entry) in entries {
        if !runtime.is_valid_share_tag(tag) {
            return Err(ConfigError::InvalidTag(tag.clone()).into());
        }

        let path = entry.get_str("path", "");
        if path.is_empty() {
            return Err(ConfigError::EmptySharePath(tag.clone()).into());
        }

        let share = ShareSpec {
            tag: tag.clone(),
            path: PathBuf::from(path),
            readonly: entry.get_yes("readonly"),
        };
        tracing::info!(
            tag = %share.tag,
            path = %share.path.display(),
            readonly = share.readonly,
            "Share accepted"
        );
        shares.push(share);
    }

    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::error::VmError;
    use crate::runtime::Machine;
    use async_trait::async_trait;

    /// Accepts any disk whose path does not contain "missing".
    struct PathRuntime;

    #[async_trait]
    impl Runtime for PathRuntime {
        fn attach_disk(&self, disk: &DiskSpec) -> Result<()> {
            if disk.path.to_string_lossy().contains("missing") {
                return Err(VmError::Attach {
                    path: disk.path.clone(),
                    reason: "no such file".into(),
                });
            }
            Ok(())
        }

        fn validate(&self, _config: &MachineConfig) -> Result<()> {
            Ok(())
        }

        async fn create(&self, _config: &MachineConfig) -> Result<Box<dyn Machine>> {
            Err(VmError::Create("not supported in tests".into()))
        }
    }

    fn entries(json: &str, key: &str) -> Vec<RawConfig> {
        RawConfig::parse(json).unwrap().get_maps(key)
    }

    fn config_err(result: Result<impl std::fmt::Debug>) -> ConfigError {
        match result {
            Err(VmError::Config(e)) => e,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_network_defaults() {
        let nets = validate_networks(&entries(
            r#"{"network":[{"mode":"nat"},{"mode":"nat","mac":"02:00:00:00:00:01","tap":"tap9"}]}"#,
            "network",
        ))
        .unwrap();

        assert_eq!(nets.len(), 2);
        assert_eq!(nets[0].mac, None);
        assert_eq!(nets[0].tap, "tap0");
        assert_eq!(nets[1].mac.unwrap().to_string(), "02:00:00:00:00:01");
        assert_eq!(nets[1].tap, "tap9");
    }

    #[test]
    fn test_network_unknown_mode() {
        let err = config_err(validate_networks(&entries(
            r#"{"network":[{"mode":"bridged"}]}"#,
            "network",
        )));
        assert_eq!(err, ConfigError::UnknownNetworkMode("bridged".into()));
        assert!(err.to_string().contains("bridged"));
    }

    #[test]
    fn test_network_invalid_mac() {
        let err = config_err(validate_networks(&entries(
            r#"{"network":[{"mode":"nat","mac":"not-a-mac"}]}"#,
            "network",
        )));
        assert_eq!(err, ConfigError::InvalidMac("not-a-mac".into()));
    }

    #[test]
    fn test_network_duplicate_mac() {
        let err = config_err(validate_networks(&entries(
            r#"{"network":[
                {"mode":"nat","mac":"02:00:00:00:00:01"},
                {"mode":"nat","mac":"02:00:00:00:00:01"}
            ]}"#,
            "network",
        )));
        assert_eq!(err, ConfigError::DuplicateMac("02:00:00:00:00:01".into()));
    }

    #[test]
    fn test_network_duplicate_mac_differing_case() {
        let err = config_err(validate_networks(&entries(
            r#"{"network":[
                {"mode":"nat","mac":"02:AB:00:00:00:01"},
                {"mode":"nat","mac":"02:ab:00:00:00:01"}
            ]}"#,
            "network",
        )));
        assert_eq!(err, ConfigError::DuplicateMac("02:ab:00:00:00:01".into()));
    }

    #[test]
    fn test_network_two_without_mac() {
        let err = config_err(validate_networks(&entries(
            r#"{"network":[{"mode":"nat"},{"mode":"nat"}]}"#,
            "network",
        )));
        assert_eq!(err, ConfigError::DuplicateUnaddressed);
    }

    #[test]
    fn test_network_distinct_macs_allowed() {
        let nets = validate_networks(&entries(
            r#"{"network":[
                {"mode":"nat","mac":"02:00:00:00:00:01"},
                {"mode":"nat","mac":"02:00:00:00:00:02"},
                {"mode":"nat"}
            ]}"#,
            "network",
        ))
        .unwrap();
        assert_eq!(nets.len(), 3);
    }

    #[test]
    fn test_network_first_violation_wins() {
        let err = config_err(validate_networks(&entries(
            r#"{"network":[{"mode":"nat"},{"mode":"nat"},{"mode":"host"}]}"#,
            "network",
        )));
        assert_eq!(err, ConfigError::DuplicateUnaddressed);
    }

    #[test]
    fn test_disk_readonly_literal() {
        let disks = validate_disks(
            &entries(
                r#"{"disks":[{"path":"/a.img"},{"path":"/b.img","readonly":"yes"},{"path":"/c.img","readonly":"true"}]}"#,
                "disks",
            ),
            &PathRuntime,
        )
        .unwrap();
        let flags: Vec<_> = disks.iter().map(|d| d.readonly).collect();
        assert_eq!(flags, vec![false, true, false]);
    }

    #[test]
    fn test_disk_empty_path() {
        let err = config_err(validate_disks(
            &entries(r#"{"disks":[{"readonly":"yes"}]}"#, "disks"),
            &PathRuntime,
        ));
        assert_eq!(err, ConfigError::EmptyDiskPath);
        assert_eq!(err.to_string(), "invalid disk, empty path");
    }

    #[test]
    fn test_disk_rejected_by_runtime() {
        let result = validate_disks(
            &entries(r#"{"disks":[{"path":"/var/missing.img"}]}"#, "disks"),
            &PathRuntime,
        );
        match result {
            Err(VmError::Attach { path, .. }) => {
                assert_eq!(path, PathBuf::from("/var/missing.img"))
            }
            other => panic!("expected attach error, got {other:?}"),
        }
    }

    #[test]
    fn test_share_invalid_tag() {
        let shares = RawConfig::parse(r#"{"shares":{"bad tag":{"path":"/src"}}}"#)
            .unwrap()
            .get_map_of_maps("shares");
        let err = config_err(validate_shares(&shares, &PathRuntime));
        assert_eq!(err, ConfigError::InvalidTag("bad tag".into()));
    }

    #[test]
    fn test_share_empty_path() {
        let shares = RawConfig::parse(r#"{"shares":{"src":{"readonly":"yes"}}}"#)
            .unwrap()
            .get_map_of_maps("shares");
        let err = config_err(validate_shares(&shares, &PathRuntime));
        assert_eq!(err, ConfigError::EmptySharePath("src".into()));
    }

    #[test]
    fn test_share_accepted() {
        let shares = RawConfig::parse(
            r#"{"shares":{"src":{"path":"/home/me/src","readonly":"yes"},"out":{"path":"/tmp/out"}}}"#,
        )
        .unwrap()
        .get_map_of_maps("shares");
        let shares = validate_shares(&shares, &PathRuntime).unwrap();
        assert_eq!(shares.len(), 2);
        assert_eq!(shares[0].tag, "out");
        assert!(!shares[0].readonly);
        assert_eq!(shares[1].tag, "src");
        assert!(shares[1].readonly);
    }
}
