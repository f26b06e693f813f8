//! Firecracker runtime, driven through firepilot and the API socket.

mod api;

use crate::config::{DiskSpec, MachineConfig, MB};
use crate::error::{Result, VmError};
use crate::runtime::{Machine, MachineState, Runtime};
use async_trait::async_trait;
use firepilot::builder::drive::DriveBuilder;
use firepilot::builder::executor::FirecrackerExecutorBuilder;
use firepilot::builder::kernel::KernelBuilder;
use firepilot::builder::network_interface::NetworkInterfaceBuilder;
use firepilot::builder::{Builder, Configuration};
use firepilot::machine::Machine as FirepilotMachine;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Largest vCPU count Firecracker accepts.
pub const MAX_VCPUS: u32 = 32;

/// How often a started instance's state is re-read from the API socket.
pub const STATE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Creates Firecracker microVMs.
#[derive(Debug, Clone)]
pub struct FirecrackerRuntime {
    /// Path to Firecracker binary
    firecracker_path: PathBuf,
    /// Working directory for VM sockets and state
    chroot_path: PathBuf,
}

impl Default for FirecrackerRuntime {
    fn default() -> Self {
        Self {
            firecracker_path: PathBuf::from("/usr/local/bin/firecracker"),
            chroot_path: PathBuf::from("/tmp/stanza"),
        }
    }
}

impl FirecrackerRuntime {
    pub fn new(firecracker_path: impl Into<PathBuf>, chroot_path: impl Into<PathBuf>) -> Self {
        Self {
            firecracker_path: firecracker_path.into(),
            chroot_path: chroot_path.into(),
        }
    }

    fn build_configuration(&self, id: Uuid, config: &MachineConfig) -> Result<Configuration> {
        let kernel = KernelBuilder::new()
            .with_kernel_image_path(config.kernel_path.to_string_lossy().to_string())
            .with_boot_args(config.command_line.clone())
            .try_build()
            .map_err(|e| VmError::Create(format!("kernel config: {:?}", e)))?;

        let executor = FirecrackerExecutorBuilder::new()
            .with_chroot(self.chroot_path.to_string_lossy().to_string())
            .with_exec_binary(self.firecracker_path.clone())
            .try_build()
            .map_err(|e| VmError::Create(format!("executor config: {:?}", e)))?;

        let mut fc_config = Configuration::new(id.to_string())
            .with_kernel(kernel)
            .with_executor(executor);

        for (index, disk) in config.disks.iter().enumerate() {
            let mut drive_builder = DriveBuilder::new()
                .with_drive_id(format!("disk{index}"))
                .with_path_on_host(disk.path.clone());
            if disk.readonly {
                drive_builder = drive_builder.as_read_only();
            }
            let drive = drive_builder
                .try_build()
                .map_err(|e| VmError::Create(format!("drive config: {:?}", e)))?;
            fc_config = fc_config.with_drive(drive);
        }

        for (index, net) in config.networks.iter().enumerate() {
            let mut net_builder = NetworkInterfaceBuilder::new()
                .with_iface_id(format!("eth{index}"))
                .with_host_dev_name(net.tap.clone());
            if let Some(mac) = &net.mac {
                net_builder = net_builder.with_guest_mac(mac.to_string());
            }
            let iface = net_builder
                .try_build()
                .map_err(|e| VmError::Create(format!("network config: {:?}", e)))?;
            fc_config = fc_config.with_interface(iface);
        }

        Ok(fc_config)
    }
}

#[async_trait]
impl Runtime for FirecrackerRuntime {
    fn attach_disk(&self, disk: &DiskSpec) -> Result<()> {
        let metadata = std::fs::metadata(&disk.path).map_err(|e| VmError::Attach {
            path: disk.path.clone(),
            reason: e.to_string(),
        })?;
        if !metadata.is_file() {
            return Err(VmError::Attach {
                path: disk.path.clone(),
                reason: "not a regular file".into(),
            });
        }
        Ok(())
    }

    fn validate(&self, config: &MachineConfig) -> Result<()> {
        if config.cpu_count > MAX_VCPUS {
            return Err(VmError::Validation(format!(
                "cpu count must be 1-{MAX_VCPUS}, got {}",
                config.cpu_count
            )));
        }

        if config.memory_bytes % MB != 0 || config.memory_mib() > i32::MAX as u64 {
            return Err(VmError::Validation(format!(
                "memory must be a whole number of MiB below 2^31, got {} bytes",
                config.memory_bytes
            )));
        }

        if let Some(share) = config.shares.first() {
            return Err(VmError::Validation(format!(
                "firecracker does not support shared directories (tag {:?})",
                share.tag
            )));
        }

        let mut taps = HashSet::new();
        for net in &config.networks {
            if net.tap.is_empty() {
                return Err(VmError::Validation("network tap device name is empty".into()));
            }
            if !taps.insert(net.tap.as_str()) {
                return Err(VmError::Validation(format!(
                    "tap device {} is used by more than one interface",
                    net.tap
                )));
            }
        }

        Ok(())
    }

    async fn create(&self, config: &MachineConfig) -> Result<Box<dyn Machine>> {
        let id = Uuid::new_v4();
        tracing::info!(%id, console = ?config.console, "Creating Firecracker microVM");

        let fc_config = self.build_configuration(id, config)?;

        // Create the machine (this starts the Firecracker process and socket)
        let mut machine = FirepilotMachine::new();
        machine
            .create(fc_config)
            .await
            .map_err(|e| VmError::Create(format!("{:?}", e)))?;

        // Compute socket path: chroot_path / vm_id / firecracker.socket
        let socket_path = self
            .chroot_path
            .join(id.to_string())
            .join("firecracker.socket");

        api::configure_machine(&socket_path, config.cpu_count, config.memory_mib()).await?;
        if config.initrd_path.is_some() {
            api::configure_boot_source(&socket_path, config).await?;
        }

        let (state, _) = watch::channel(MachineState::Stopped);
        Ok(Box::new(FirecrackerMachine {
            id,
            machine,
            socket_path,
            state: Arc::new(state),
            watcher: None,
        }))
    }
}

/// A created Firecracker instance.
pub struct FirecrackerMachine {
    id: Uuid,
    machine: FirepilotMachine,
    socket_path: PathBuf,
    state: Arc<watch::Sender<MachineState>>,
    watcher: Option<JoinHandle<()>>,
}

#[async_trait]
impl Machine for FirecrackerMachine {
    async fn can_start(&mut self) -> bool {
        let startable = is_startable(&self.socket_path).await;
        tracing::debug!(id = %self.id, startable, "Capability probe");
        startable
    }

    async fn start(&mut self) -> Result<()> {
        tracing::info!(id = %self.id, "Starting VM");

        self.machine
            .start()
            .await
            .map_err(|e| VmError::Start(format!("{:?}", e)))?;

        self.state.send_replace(MachineState::Running);
        self.watcher = Some(tokio::spawn(watch_state(
            self.socket_path.clone(),
            Arc::clone(&self.state),
            STATE_POLL_INTERVAL,
        )));

        tracing::info!(id = %self.id, "MicroVM started successfully");
        Ok(())
    }

    fn state(&self) -> MachineState {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<MachineState> {
        self.state.subscribe()
    }
}

impl Drop for FirecrackerMachine {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Whether the instance behind `socket_path` exists and has not been started.
async fn is_startable(socket_path: &Path) -> bool {
    match api::instance_state(socket_path).await {
        Ok(state) => state == api::NOT_STARTED,
        Err(e) => {
            tracing::warn!(socket = ?socket_path, error = %e, "Capability probe failed");
            false
        }
    }
}

/// Publish instance state changes until the guest is no longer active.
///
/// An unreachable API socket means the Firecracker process has exited. Any
/// other failure to read the state leaves the published state alone.
async fn watch_state(
    socket_path: PathBuf,
    state: Arc<watch::Sender<MachineState>>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let next = match api::instance_state(&socket_path).await {
            Ok(raw) => api::parse_state(&raw),
            Err(api::StateError::Unreachable(e)) => {
                tracing::debug!(error = %e, "API socket unreachable, treating VM as stopped");
                MachineState::Stopped
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not read instance state, polling again");
                continue;
            }
        };
        state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if !next.is_active() {
            break;
        }
    }
}
