//! Server lifecycle: owns the listening socket and the serving thread.
//!
//! `start`, `stop` and `set_serving_root` are serialized by one lock, so two
//! callers (GUI thread, tray thread, console) can never race on the socket.
//! State queries read a watch channel and never wait on that lock.

use std::future::IntoFuture;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use axum::Router;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::error::{DriveError, io_or_not_found};
use crate::netinfo;
use crate::routes;
use crate::{AppState, Config};

/// How long the serving runtime gets to drop abandoned tasks after a forced stop.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running { addr: SocketAddr, root: PathBuf },
    Stopping,
}

impl ServerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ServerState::Running { .. })
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        match self {
            ServerState::Running { addr, .. } => Some(*addr),
            _ => None,
        }
    }
}

/// Handle to a live serving thread.
struct ServingThread {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    force: Option<oneshot::Sender<()>>,
    done: std_mpsc::Receiver<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ServingThread {
    /// True once the thread has left its serve loop (or died).
    fn finished(&self) -> bool {
        !matches!(self.done.try_recv(), Err(TryRecvError::Empty))
    }

    fn wait(&self, timeout: Duration) -> bool {
        !matches!(
            self.done.recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        )
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Serving thread panicked");
            }
        }
    }
}

/// Single owner of [`ServerState`] and the serving root.
pub struct LifecycleManager {
    config: Arc<Config>,
    serving: Mutex<Option<ServingThread>>,
    root: RwLock<PathBuf>,
    state: Arc<watch::Sender<ServerState>>,
}

/// Canonicalize a prospective serving root and check it is a directory.
pub fn validate_root(path: &Path) -> Result<PathBuf, DriveError> {
    let root = path
        .canonicalize()
        .map_err(|e| io_or_not_found(e, &path.display().to_string()))?;
    if !root.is_dir() {
        return Err(DriveError::BadRequest(format!(
            "Serving root is not a directory: {}",
            root.display()
        )));
    }
    Ok(root)
}

impl LifecycleManager {
    pub fn new(root: &Path, config: Config) -> Result<Self, DriveError> {
        let root = validate_root(root)?;
        let (state, _) = watch::channel(ServerState::Stopped);
        let state = Arc::new(state);

        Ok(Self {
            config: Arc::new(config),
            serving: Mutex::new(None),
            root: RwLock::new(root),
            state,
        })
    }

    fn lock_serving(&self) -> MutexGuard<'_, Option<ServingThread>> {
        self.serving.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: ServerState) {
        debug!("Server state -> {:?}", state);
        self.state.send_replace(state);
    }

    /// Bind `host:port` and start serving on a dedicated thread.
    ///
    /// Returns once the socket is bound and the serving runtime is up, so
    /// the server is reachable as soon as this returns. Calling it while
    /// already running is a no-op that reports the existing address.
    pub fn start(&self, host: &str, port: u16) -> Result<SocketAddr, DriveError> {
        let mut serving = self.lock_serving();

        if let Some(current) = serving.as_mut() {
            if !current.finished() {
                debug!("Server already running on {}", current.addr);
                return Ok(current.addr);
            }
            warn!("Serving thread on {} exited on its own; rebinding", current.addr);
            current.join();
            *serving = None;
        }

        self.publish(ServerState::Starting);
        let root = self.serving_root();

        match spawn_serving_thread(
            host,
            port,
            &root,
            Arc::clone(&self.config),
            Arc::clone(&self.state),
        ) {
            Ok(thread) => {
                let addr = thread.addr;
                *serving = Some(thread);
                info!("LocalDrive serving {} on http://{}", root.display(), addr);
                self.publish(ServerState::Running { addr, root });
                Ok(addr)
            }
            Err(err) => {
                error!("Failed to start server: {}", err);
                self.publish(ServerState::Stopped);
                Err(err)
            }
        }
    }

    /// Stop serving. Always ends in [`ServerState::Stopped`].
    ///
    /// The listener closes immediately; in-flight requests get
    /// `stop_timeout` to finish before they are abandoned. If the thread
    /// still has not exited after `force_stop_grace` it is detached and only
    /// logged.
    pub fn stop(&self) {
        let mut serving = self.lock_serving();
        let Some(mut thread) = serving.take() else {
            debug!("Stop requested but server is not running");
            return;
        };

        self.publish(ServerState::Stopping);
        info!("Stopping server on {}", thread.addr);

        if let Some(tx) = thread.shutdown.take() {
            let _ = tx.send(());
        }

        let timeout = self.config.stop_timeout();
        if thread.wait(timeout) {
            thread.join();
        } else {
            warn!(
                "Server did not stop within {:?}; abandoning open connections",
                timeout
            );
            if let Some(tx) = thread.force.take() {
                let _ = tx.send(());
            }
            if thread.wait(self.config.force_stop_grace()) {
                thread.join();
            } else {
                warn!("Serving thread is still busy; detaching it");
            }
        }

        self.publish(ServerState::Stopped);
        info!("Server stopped");
    }

    /// Change the served folder. Only allowed while stopped.
    pub fn set_serving_root(&self, path: &Path) -> Result<PathBuf, DriveError> {
        let mut serving = self.lock_serving();
        if let Some(current) = serving.as_mut() {
            if !current.finished() {
                return Err(DriveError::InvalidState(
                    "Cannot change the serving folder while the server is running".to_string(),
                ));
            }
            current.join();
            *serving = None;
        }

        let root = validate_root(path)?;
        *self.root.write().unwrap_or_else(PoisonError::into_inner) = root.clone();
        info!("Serving root set to {}", root.display());
        Ok(root)
    }

    pub fn serving_root(&self) -> PathBuf {
        self.root
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().is_running()
    }

    pub fn state(&self) -> ServerState {
        self.state.borrow().clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.borrow().addr()
    }

    /// URL another device on the LAN can open, if running.
    pub fn url(&self) -> Option<String> {
        self.local_addr().map(netinfo::shareable_url)
    }

    /// Receive every state transition.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_serving_thread(
    host: &str,
    port: u16,
    root: &Path,
    config: Arc<Config>,
    state: Arc<watch::Sender<ServerState>>,
) -> Result<ServingThread, DriveError> {
    let listener = StdTcpListener::bind((host, port))
        .map_err(|e| DriveError::bind(format!("{}:{}", host, port), e))?;
    let addr = listener.local_addr()?;
    listener
        .set_nonblocking(true)
        .map_err(|e| DriveError::bind_addr(addr, e))?;

    let app = routes::app(AppState::with_config(root.to_path_buf(), config));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (force_tx, force_rx) = oneshot::channel();
    let (ready_tx, ready_rx) = std_mpsc::channel();
    let (done_tx, done_rx) = std_mpsc::channel();

    let handle = thread::Builder::new()
        .name("localdrive-server".into())
        .spawn(move || {
            serve_until_stopped(listener, app, ready_tx, shutdown_rx, force_rx);
            mark_exited(&state, addr);
            let _ = done_tx.send(());
        })?;

    let mut thread = ServingThread {
        addr,
        shutdown: Some(shutdown_tx),
        force: Some(force_tx),
        done: done_rx,
        handle: Some(handle),
    };

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(thread),
        Ok(Err(err)) => {
            thread.join();
            Err(DriveError::bind_addr(addr, err))
        }
        Err(_) => {
            thread.join();
            Err(DriveError::bind_addr(
                addr,
                std::io::Error::other("serving thread exited during startup"),
            ))
        }
    }
}

/// A serving thread that leaves its loop while still published as running
/// died on its own; report it as stopped. A requested stop has already
/// moved the state to `Stopping`, which is left alone.
fn mark_exited(state: &watch::Sender<ServerState>, addr: SocketAddr) {
    let changed = state.send_if_modified(|current| {
        let ours = matches!(current, ServerState::Running { addr: running, .. } if *running == addr);
        if ours {
            *current = ServerState::Stopped;
        }
        ours
    });
    if changed {
        warn!("Server on {} exited unexpectedly", addr);
    }
}

fn serve_until_stopped(
    listener: StdTcpListener,
    app: Router,
    ready: std_mpsc::Sender<std::io::Result<()>>,
    shutdown: oneshot::Receiver<()>,
    force: oneshot::Receiver<()>,
) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("localdrive-http")
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    let listener = {
        let _guard = runtime.enter();
        match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(err) => {
                let _ = ready.send(Err(err));
                return;
            }
        }
    };
    let _ = ready.send(Ok(()));

    runtime.block_on(async move {
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.await;
            })
            .into_future();

        tokio::select! {
            result = server => {
                if let Err(err) = result {
                    error!("Server error: {}", err);
                }
            }
            _ = force => {
                warn!("Forced stop: dropping in-flight connections");
            }
        }
    });

    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    info!("Server shutdown complete");
}
