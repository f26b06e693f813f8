//! Drives a validated machine from creation to termination.
//!
//! ```text
//! Configured -> Validated -> Startable -> Starting -> Running -> Terminated
//! ```
//!
//! A failure at any step jumps straight to `Terminated(Failure)`.
//!
//! The machine handle lives on a dedicated command queue task so the
//! capability probe and start request are serialized. Termination is
//! observed through the handle's state subscription; the driver never asks
//! the guest to stop.

use crate::config::MachineConfig;
use crate::error::{Result, VmError};
use crate::runtime::{Machine, MachineState, Runtime};
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How a machine's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Where the driver is in the startup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Configured,
    Validated,
    Startable,
    Starting,
    Running,
    Terminated(Outcome),
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Configured => write!(f, "configured"),
            LifecycleState::Validated => write!(f, "validated"),
            LifecycleState::Startable => write!(f, "startable"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Terminated(Outcome::Success) => write!(f, "terminated"),
            LifecycleState::Terminated(Outcome::Failure) => write!(f, "terminated (failure)"),
        }
    }
}

enum Command {
    CanStart(oneshot::Sender<bool>),
    Start(oneshot::Sender<Result<()>>),
    State(oneshot::Sender<MachineState>),
}

/// Serializes every call on a machine handle through one task.
struct CommandQueue {
    tx: mpsc::Sender<Command>,
    worker: JoinHandle<()>,
}

impl CommandQueue {
    fn spawn(mut machine: Box<dyn Machine>) -> Self {
        let (tx, mut rx) = mpsc::channel(1);
        let worker = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::CanStart(reply) => {
                        let _ = reply.send(machine.can_start().await);
                    }
                    Command::Start(reply) => {
                        let _ = reply.send(machine.start().await);
                    }
                    Command::State(reply) => {
                        let _ = reply.send(machine.state());
                    }
                }
            }
            tracing::debug!("Command queue closed, releasing machine handle");
        });
        Self { tx, worker }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| VmError::Runtime("command queue is closed".into()))?;
        reply_rx
            .await
            .map_err(|_| VmError::Runtime("command queue dropped the request".into()))
    }

    async fn can_start(&self) -> Result<bool> {
        self.request(Command::CanStart).await
    }

    async fn start(&self) -> Result<()> {
        self.request(Command::Start).await?
    }

    async fn state(&self) -> Result<MachineState> {
        self.request(Command::State).await
    }

    async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "Command queue task failed");
        }
    }
}

/// Sequences one machine through its lifecycle.
pub struct LifecycleDriver<'a> {
    runtime: &'a dyn Runtime,
    state: LifecycleState,
    history: Vec<LifecycleState>,
}

impl<'a> LifecycleDriver<'a> {
    pub fn new(runtime: &'a dyn Runtime) -> Self {
        Self {
            runtime,
            state: LifecycleState::Configured,
            history: vec![LifecycleState::Configured],
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Every state entered so far, oldest first.
    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    /// Run `config` until the runtime reports the guest is no longer active.
    ///
    /// Returns the final machine state reported by the runtime. Any failure
    /// along the way moves the driver to `Terminated(Failure)` and is
    /// returned as-is; nothing is retried.
    pub async fn run(&mut self, config: &MachineConfig) -> Result<MachineState> {
        match self.drive(config).await {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::error!(error = %e, state = %self.state, "Lifecycle failed");
                self.advance(LifecycleState::Terminated(Outcome::Failure));
                Err(e)
            }
        }
    }

    async fn drive(&mut self, config: &MachineConfig) -> Result<MachineState> {
        self.runtime.validate(config)?;
        self.advance(LifecycleState::Validated);

        let machine = self.runtime.create(config).await?;
        let mut states = machine.subscribe();
        let queue = CommandQueue::spawn(machine);

        if !queue.can_start().await? {
            queue.close().await;
            return Err(VmError::NotStartable);
        }
        self.advance(LifecycleState::Startable);

        self.advance(LifecycleState::Starting);
        let started = match queue.start().await {
            Ok(()) => queue.state().await,
            Err(e) => Err(e),
        };
        let machine_state = match started {
            Ok(state) => state,
            Err(e) => {
                queue.close().await;
                return Err(e);
            }
        };
        tracing::debug!(state = %machine_state, "Start completed");
        self.advance(LifecycleState::Running);

        let final_state = states.wait_for(|s| !s.is_active()).await.map(|s| *s);
        queue.close().await;
        let final_state = final_state
            .map_err(|_| VmError::Runtime("machine state channel closed".into()))?;

        let outcome = match final_state {
            MachineState::Error => Outcome::Failure,
            _ => Outcome::Success,
        };
        tracing::info!(state = %final_state, "Machine is no longer running");
        self.advance(LifecycleState::Terminated(outcome));
        Ok(final_state)
    }

    fn advance(&mut self, next: LifecycleState) {
        tracing::info!(from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
        self.history.push(next);
    }
}
