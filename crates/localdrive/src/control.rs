//! Message-passing front-end to the [`LifecycleManager`].
//!
//! UI loops (window, tray, console) must not block on `start`/`stop`, so they
//! send [`LifecycleCommand`]s to a worker thread and poll
//! [`LifecycleEvent`]s back.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::server::LifecycleManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleCommand {
    Start { host: String, port: u16 },
    Stop,
    /// Start if stopped, stop if running (tray menu item).
    Toggle { host: String, port: u16 },
    SetRoot(PathBuf),
    /// Stop the server and end the worker.
    Shutdown,
}

impl LifecycleCommand {
    fn label(&self) -> &'static str {
        match self {
            LifecycleCommand::Start { .. } => "start",
            LifecycleCommand::Stop => "stop",
            LifecycleCommand::Toggle { .. } => "toggle",
            LifecycleCommand::SetRoot(_) => "set_root",
            LifecycleCommand::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Started { addr: SocketAddr, url: String },
    Stopped,
    RootChanged(PathBuf),
    Failed {
        command: &'static str,
        message: String,
    },
    Exited,
}

pub struct Controller {
    commands: Sender<LifecycleCommand>,
    events: Receiver<LifecycleEvent>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Controller {
    pub fn spawn(manager: Arc<LifecycleManager>) -> std::io::Result<Self> {
        let (commands, command_rx) = mpsc::channel();
        let (event_tx, events) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("localdrive-control".into())
            .spawn(move || run_worker(&manager, command_rx, event_tx))?;

        Ok(Self {
            commands,
            events,
            worker: Some(worker),
        })
    }

    /// A cloneable handle for threads that only issue commands.
    pub fn sender(&self) -> Sender<LifecycleCommand> {
        self.commands.clone()
    }

    /// Queue a command. Returns `false` once the worker has exited.
    pub fn send(&self, command: LifecycleCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn try_event(&self) -> Option<LifecycleEvent> {
        self.events.try_recv().ok()
    }

    pub fn recv_event(&self) -> Option<LifecycleEvent> {
        self.events.recv().ok()
    }

    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<LifecycleEvent> {
        self.events.recv_timeout(timeout).ok()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        let _ = self.commands.send(LifecycleCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Lifecycle worker panicked");
            }
        }
    }
}

fn run_worker(
    manager: &LifecycleManager,
    commands: Receiver<LifecycleCommand>,
    events: Sender<LifecycleEvent>,
) {
    let emit = |event: LifecycleEvent| {
        if events.send(event).is_err() {
            debug!("No one is listening for lifecycle events");
        }
    };

    for command in commands.iter() {
        debug!("Lifecycle command: {:?}", command);
        let label = command.label();

        match command {
            LifecycleCommand::Start { host, port } => emit(start(manager, &host, port, label)),
            LifecycleCommand::Stop => {
                manager.stop();
                emit(LifecycleEvent::Stopped);
            }
            LifecycleCommand::Toggle { host, port } => {
                if manager.is_running() {
                    manager.stop();
                    emit(LifecycleEvent::Stopped);
                } else {
                    emit(start(manager, &host, port, label));
                }
            }
            LifecycleCommand::SetRoot(path) => match manager.set_serving_root(&path) {
                Ok(root) => emit(LifecycleEvent::RootChanged(root)),
                Err(err) => emit(LifecycleEvent::Failed {
                    command: label,
                    message: err.to_string(),
                }),
            },
            LifecycleCommand::Shutdown => break,
        }
    }

    manager.stop();
    emit(LifecycleEvent::Exited);
}

fn start(manager: &LifecycleManager, host: &str, port: u16, label: &'static str) -> LifecycleEvent {
    match manager.start(host, port) {
        Ok(addr) => LifecycleEvent::Started {
            addr,
            url: manager.url().unwrap_or_else(|| format!("http://{}", addr)),
        },
        Err(err) => LifecycleEvent::Failed {
            command: label,
            message: err.to_string(),
        },
    }
}
