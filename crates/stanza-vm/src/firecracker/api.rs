//! Direct calls to the Firecracker API socket.
//!
//! firepilot's high-level API doesn't expose machine resources, initrd, or
//! instance state, so those go straight to the socket.

use crate::config::MachineConfig;
use crate::error::{Result, VmError};
use crate::runtime::MachineState;
use firepilot_models::models::{BootSource, MachineConfiguration};
use hyper::{Body, Client, Method, Request};
use hyperlocal::{UnixClientExt, Uri};
use std::path::Path;

/// Instance state Firecracker reports before `InstanceStart`.
pub const NOT_STARTED: &str = "Not started";

/// Configure vCPUs and memory. **Must be called BEFORE starting the VM.**
pub async fn configure_machine(socket_path: &Path, vcpu_count: u32, mem_size_mib: u64) -> Result<()> {
    tracing::debug!(vcpu_count, mem_size_mib, "Configuring machine resources");

    let config = MachineConfiguration::new(mem_size_mib as i32, vcpu_count as i32);
    let body = serde_json::to_string(&config)
        .map_err(|e| VmError::Create(format!("failed to serialize machine config: {e}")))?;
    put(socket_path, "/machine-config", body).await?;

    tracing::info!(vcpu_count, mem_size_mib, "Machine resources configured");
    Ok(())
}

/// Replace the boot source so it carries the initrd alongside kernel and
/// command line. **Must be called BEFORE starting the VM.**
pub async fn configure_boot_source(socket_path: &Path, config: &MachineConfig) -> Result<()> {
    let mut boot = BootSource::new(config.kernel_path.to_string_lossy().to_string());
    boot.boot_args = Some(config.command_line.clone());
    boot.initrd_path = config
        .initrd_path
        .as_ref()
        .map(|p| p.to_string_lossy().to_string());

    let body = serde_json::to_string(&boot)
        .map_err(|e| VmError::Create(format!("failed to serialize boot source: {e}")))?;
    tracing::trace!(body = %body, "boot source request body");
    put(socket_path, "/boot-source", body).await?;

    tracing::info!(initrd = ?config.initrd_path, "Boot source configured");
    Ok(())
}

/// Why an instance state could not be read.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Nothing accepted the connection; the socket is gone or unbound.
    #[error("API socket unreachable: {0}")]
    Unreachable(#[source] hyper::Error),

    /// Firecracker answered, but not with an instance state.
    #[error("bad state response: {0}")]
    Protocol(String),
}

/// Fetch the raw instance state string (`"Not started"`, `"Running"`, ...).
pub async fn instance_state(socket_path: &Path) -> std::result::Result<String, StateError> {
    let uri: hyper::Uri = Uri::new(socket_path, "/").into();
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .map_err(|e| StateError::Protocol(format!("failed to build request: {e}")))?;

    let response = Client::unix().request(request).await.map_err(|e| {
        if e.is_connect() {
            StateError::Unreachable(e)
        } else {
            StateError::Protocol(format!("request failed: {e}"))
        }
    })?;

    let status = response.status();
    let body_bytes = hyper::body::to_bytes(response.into_body())
        .await
        .map_err(|e| StateError::Protocol(format!("failed to read body: {e}")))?;
    if !status.is_success() {
        return Err(StateError::Protocol(format!(
            "status {}: {}",
            status,
            String::from_utf8_lossy(&body_bytes)
        )));
    }

    let info: serde_json::Value = serde_json::from_slice(&body_bytes)
        .map_err(|e| StateError::Protocol(format!("instance info is not JSON: {e}")))?;
    info.get("state")
        .and_then(|s| s.as_str())
        .map(str::to_string)
        .ok_or_else(|| StateError::Protocol("instance info has no state".into()))
}

/// Map a Firecracker instance state onto [`MachineState`].
pub fn parse_state(state: &str) -> MachineState {
    match state {
        NOT_STARTED => MachineState::Stopped,
        // A paused guest still holds its resources; keep waiting.
        "Running" | "Paused" => MachineState::Running,
        _ => MachineState::Error,
    }
}

async fn put(socket_path: &Path, endpoint: &str, body: String) -> Result<()> {
    let uri: hyper::Uri = Uri::new(socket_path, endpoint).into();

    let request = Request::builder()
        .method(Method::PUT)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .map_err(|e| VmError::Create(format!("failed to build {endpoint} request: {e}")))?;

    tracing::trace!(endpoint, "Sending PUT request");
    let response = Client::unix().request(request).await.map_err(|e| {
        tracing::error!(endpoint, error = %e, "API request failed");
        VmError::Create(format!("{endpoint} request failed: {e}"))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body_bytes = hyper::body::to_bytes(response.into_body())
            .await
            .unwrap_or_default();
        let body_str = String::from_utf8_lossy(&body_bytes);
        tracing::error!(endpoint, status = %status, body = %body_str, "API request rejected");
        return Err(VmError::Create(format!(
            "{endpoint} failed with status {status}: {body_str}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_config_serialization() {
        let config = MachineConfiguration::new(512, 2);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"mem_size_mib\":512"));
        assert!(json.contains("\"vcpu_count\":2"));
    }

    #[test]
    fn test_boot_source_serialization() {
        let mut boot = BootSource::new("/boot/vmlinux".to_string());
        boot.initrd_path = Some("/boot/initrd".to_string());
        let json = serde_json::to_string(&boot).unwrap();
        assert!(json.contains("\"kernel_image_path\":\"/boot/vmlinux\""));
        assert!(json.contains("\"initrd_path\":\"/boot/initrd\""));
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("Not started"), MachineState::Stopped);
        assert_eq!(parse_state("Running"), MachineState::Running);
        assert_eq!(parse_state("Paused"), MachineState::Running);
        assert_eq!(parse_state("Exploded"), MachineState::Error);
    }

    #[tokio::test]
    async fn test_missing_socket_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let result = instance_state(&dir.path().join("firecracker.socket")).await;
        assert!(matches!(result, Err(StateError::Unreachable(_))));
    }
}
