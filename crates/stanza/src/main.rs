//! stanza entry point.
//!
//! Reads a JSON machine description, builds it into a validated
//! configuration, and runs the machine until the guest stops. Logs go to
//! stderr; stdout belongs to the guest console.

mod config;

use anyhow::Context;
use clap::Parser;
use config::LauncherConfig;
use stanza_vm::{
    FirecrackerRuntime, LifecycleDriver, MachineConfig, MachineState, RawConfig, Runtime,
};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "stanza", version)]
#[command(about = "Launch a microVM from a JSON machine description")]
struct Cli {
    /// Machine description file, or `-` to read it from standard input
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Validate the description and print the resulting configuration without launching
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stanza=info,stanza_vm=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let launcher = LauncherConfig::from_env();
    tracing::debug!(?launcher, "Launcher configuration loaded");

    let raw = read_description(&cli.config)?;
    let runtime = FirecrackerRuntime::new(&launcher.firecracker_path, &launcher.chroot_path);

    if cli.check {
        println!("{}", check(&raw, &runtime)?);
        return Ok(());
    }

    let machine = MachineConfig::from_raw(&raw, &runtime)?;

    launcher.validate_warn();

    let final_state = LifecycleDriver::new(&runtime).run(&machine).await?;
    if final_state == MachineState::Error {
        tracing::warn!("Guest stopped with a runtime error");
    } else {
        tracing::info!(state = %final_state, "Guest stopped");
    }
    Ok(())
}

/// Build and runtime-validate a description without creating anything.
/// Returns the configuration as pretty-printed JSON.
fn check(raw: &RawConfig, runtime: &dyn Runtime) -> anyhow::Result<String> {
    let machine = MachineConfig::from_raw(raw, runtime)?;
    runtime.validate(&machine)?;
    Ok(serde_json::to_string_pretty(&machine)?)
}

fn read_description(path: &Path) -> anyhow::Result<RawConfig> {
    if path.as_os_str() == "-" {
        return RawConfig::from_reader(std::io::stdin().lock())
            .context("failed to read machine description from standard input");
    }

    let file = File::open(path)
        .with_context(|| format!("failed to open machine description {}", path.display()))?;
    RawConfig::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse machine description {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["stanza"]).is_err());
        assert!(Cli::try_parse_from(["stanza", "--bogus", "-c", "vm.json"]).is_err());
    }

    #[test]
    fn test_short_and_long_forms() {
        let cli = Cli::try_parse_from(["stanza", "-c", "vm.json"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("vm.json"));
        assert!(!cli.check);

        let cli = Cli::try_parse_from(["stanza", "--config", "-", "--check"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("-"));
        assert!(cli.check);
    }

    #[test]
    fn test_read_description_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.json");
        std::fs::write(&path, r#"{"kernel":"/boot/k","cpus":3}"#).unwrap();

        let raw = read_description(&path).unwrap();
        assert_eq!(raw.get_i64("cpus", 1), 3);

        let err = read_description(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }

    #[test]
    fn test_check_prints_validated_config() {
        let dir = tempfile::tempdir().unwrap();
        let disk = dir.path().join("rootfs.ext4");
        std::fs::write(&disk, [0u8; 512]).unwrap();
        let raw = RawConfig::parse(&format!(
            r#"{{"kernel":"/boot/k","cpus":2,"memory":256,"disks":[{{"path":"{}","readonly":"yes"}}]}}"#,
            disk.display()
        ))
        .unwrap();

        let json = check(&raw, &FirecrackerRuntime::default()).unwrap();
        assert!(json.contains("\"cpu_count\": 2"));
        assert!(json.contains("\"readonly\": true"));
    }

    #[test]
    fn test_check_applies_runtime_limits() {
        let shared = RawConfig::parse(r#"{"kernel":"/boot/k","shares":{"src":{"path":"/src"}}}"#)
            .unwrap();
        let err = check(&shared, &FirecrackerRuntime::default()).unwrap_err();
        assert!(err.to_string().contains("shared directories"));

        let wide = RawConfig::parse(r#"{"kernel":"/boot/k","cpus":64}"#).unwrap();
        assert!(check(&wide, &FirecrackerRuntime::default()).is_err());
    }
}
