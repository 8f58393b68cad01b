//! One shared, reference-counted server connection.
//!
//! A [`ConnectionManager`] owns at most one physical connection. Consumers
//! take a [`ConnectionHandle`] with [`ConnectionManager::acquire`] and hold it
//! for as long as they need the socket; the connection is opened by the first
//! acquire and closed when the last handle is released. One consumer going
//! away therefore never tears down an exchange another consumer still has in
//! flight.
//!
//! Each physical connection is driven by a background task that multiplexes
//! outbound frames, the shutdown signal and inbound frames with
//! `tokio::select!`. Inbound frames are published unparsed on a broadcast
//! channel ([`ConnectionHandle::frames`]); state changes on a watch channel
//! ([`ConnectionHandle::watch_state`]).
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new(WebSocketConnector::new("localhost:8000"),
//!     ConnectionConfig::default());
//! let handle = manager.acquire();
//! let mut frames = handle.frames();
//! handle.send(r#"{"msg":"CreateGame"}"#);
//! drop(handle); // last reference: the socket closes
//! ```

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{CfhError, Result};
use crate::transport::{Connector, Transport};

/// Default capacity of the raw inbound frame channel.
const DEFAULT_FRAME_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful close of a connection.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`ConnectionManager`].
///
/// ```
/// use cfh_client::connection::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::default()
///     .with_frame_channel_capacity(512)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.frame_channel_capacity, 512);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Capacity of the broadcast channel carrying raw inbound frames.
    ///
    /// A reader that falls this far behind skips the oldest frames (and logs
    /// how many). A skipped frame is lost to every subscription of that
    /// reader's bus; if it was a `JoinResponse`, the lobby request it answers
    /// stays pending until the connection drops. Defaults to **256**. Values
    /// below 1 are clamped to 1.
    pub frame_channel_capacity: usize,
    /// Time the connection task is given to close the transport once the last
    /// reference is released. After that the task is aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            frame_channel_capacity: DEFAULT_FRAME_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Set the capacity of the raw inbound frame channel.
    #[must_use]
    pub fn with_frame_channel_capacity(mut self, capacity: usize) -> Self {
        self.frame_channel_capacity = capacity.max(1);
        self
    }

    /// Set the graceful close timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── State ───────────────────────────────────────────────────────────

/// Lifecycle of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No physical connection.
    #[default]
    Disconnected,
    /// The connector is establishing a connection.
    Connecting,
    /// Frames can be sent and received.
    Open,
}

/// A running physical connection.
struct Link {
    generation: u64,
    cmd_tx: mpsc::UnboundedSender<String>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    refs: usize,
    generation: u64,
    torn_down: bool,
    link: Option<Link>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    slot: StdMutex<Slot>,
    state_tx: watch::Sender<ConnectionState>,
    frames_tx: broadcast::Sender<String>,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `state` on behalf of the link with `generation`, unless that
    /// link has already been replaced or released.
    fn publish(&self, generation: u64, state: ConnectionState) {
        let slot = self.slot();
        if slot.link.as_ref().map(|link| link.generation) == Some(generation) {
            self.state_tx.send_replace(state);
        }
    }

    /// Called by the link task on exit.
    fn finish(&self, generation: u64) {
        let mut slot = self.slot();
        if slot.link.as_ref().map(|link| link.generation) == Some(generation) {
            slot.link = None;
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }
    }
}

// ── Manager ─────────────────────────────────────────────────────────

/// Owner of the single shared connection.
///
/// Cloning a manager is cheap and yields another handle to the same shared
/// state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager that dials through `connector`. Nothing is opened
    /// until the first [`acquire`](Self::acquire).
    pub fn new(connector: impl Connector, config: ConnectionConfig) -> Self {
        let capacity = config.frame_channel_capacity.max(1);
        let (frames_tx, _) = broadcast::channel(capacity);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector: Arc::new(connector),
                config,
                slot: StdMutex::new(Slot::default()),
                state_tx,
                frames_tx,
            }),
        }
    }

    /// Take a reference to the shared connection, opening it if none exists.
    ///
    /// Must be called from within a tokio runtime.
    pub fn acquire(&self) -> ConnectionHandle {
        let mut slot = self.inner.slot();
        slot.refs += 1;
        debug!(refs = slot.refs, "connection acquired");
        if slot.link.is_none() && !slot.torn_down {
            self.open_link(&mut slot);
        }
        drop(slot);
        ConnectionHandle {
            manager: self.clone(),
        }
    }

    /// Give back a reference. Equivalent to dropping the handle.
    pub fn release(&self, handle: ConnectionHandle) {
        drop(handle);
    }

    /// Number of live handles.
    pub fn ref_count(&self) -> usize {
        self.inner.slot().refs
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every connection state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Generation of the current physical connection, if one exists.
    ///
    /// Every reconnect gets a new generation, so two equal values mean the
    /// same socket.
    pub fn link_generation(&self) -> Option<u64> {
        self.inner.slot().link.as_ref().map(|link| link.generation)
    }

    /// Close the connection regardless of outstanding references and stop
    /// reopening it. Used when the owning client goes away.
    pub async fn shutdown(&self) {
        debug!("connection manager shutdown requested");
        let link = {
            let mut slot = self.inner.slot();
            slot.torn_down = true;
            let link = slot.link.take();
            if link.is_some() {
                self.inner
                    .state_tx
                    .send_replace(ConnectionState::Disconnected);
            }
            link
        };
        let Some(link) = link else {
            return;
        };
        let _ = link.shutdown_tx.send(());
        await_link_exit(link.task, self.inner.config.shutdown_timeout).await;
    }

    /// Spawn a new link task. The caller holds the slot lock.
    fn open_link(&self, slot: &mut Slot) {
        slot.generation += 1;
        let generation = slot.generation;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<String>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        self.inner.state_tx.send_replace(ConnectionState::Connecting);
        debug!(generation, "opening connection");

        let task = tokio::spawn(run_link(
            Arc::clone(&self.inner),
            generation,
            cmd_rx,
            shutdown_rx,
        ));
        slot.link = Some(Link {
            generation,
            cmd_tx,
            shutdown_tx,
            task,
        });
    }

    fn send(&self, text: String) -> Result<()> {
        if self.state() != ConnectionState::Open {
            return Err(CfhError::NotConnected);
        }
        let slot = self.inner.slot();
        let link = slot.link.as_ref().ok_or(CfhError::NotConnected)?;
        link.cmd_tx.send(text).map_err(|_| CfhError::NotConnected)
    }

    fn reconnect(&self) -> bool {
        let mut slot = self.inner.slot();
        if slot.link.is_some() || slot.torn_down || slot.refs == 0 {
            return false;
        }
        self.open_link(&mut slot);
        true
    }

    fn release_one(&self) {
        let link = {
            let mut slot = self.inner.slot();
            slot.refs = slot.refs.saturating_sub(1);
            debug!(refs = slot.refs, "connection released");
            if slot.refs > 0 {
                return;
            }
            // Published under the lock so a concurrent acquire's `Connecting`
            // cannot be overwritten.
            let link = slot.link.take();
            if link.is_some() {
                self.inner
                    .state_tx
                    .send_replace(ConnectionState::Disconnected);
            }
            link
        };
        let Some(link) = link else {
            return;
        };

        debug!(generation = link.generation, "last reference released, closing connection");
        let _ = link.shutdown_tx.send(());
        let timeout = self.inner.config.shutdown_timeout;
        // Release runs from `Drop`, so the close is driven by a reaper task.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(await_link_exit(link.task, timeout));
            }
            Err(_) => link.task.abort(),
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("refs", &self.ref_count())
            .finish()
    }
}

// ── Handle ──────────────────────────────────────────────────────────

/// A counted reference to the shared connection.
///
/// Dropping the handle releases the reference. Cloning it takes a new one.
pub struct ConnectionHandle {
    manager: ConnectionManager,
}

impl ConnectionHandle {
    /// Queue a text frame. Silently dropped unless the connection is
    /// [`Open`](ConnectionState::Open).
    pub fn send(&self, text: impl Into<String>) {
        if let Err(e) = self.manager.send(text.into()) {
            debug!("dropping outbound frame: {e}");
        }
    }

    /// Queue a text frame, reporting whether it was accepted.
    ///
    /// # Errors
    ///
    /// Returns [`CfhError::NotConnected`] if the connection is not open.
    pub fn try_send(&self, text: impl Into<String>) -> Result<()> {
        self.manager.send(text.into())
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Returns `true` if frames can currently be sent.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Receiver that observes every connection state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    /// Receiver for raw inbound frames, in arrival order, from now on.
    pub fn frames(&self) -> broadcast::Receiver<String> {
        self.manager.inner.frames_tx.subscribe()
    }

    /// Open a fresh connection if the previous one was lost.
    ///
    /// Returns `true` if a new connection attempt was started.
    pub fn reconnect(&self) -> bool {
        self.manager.reconnect()
    }

    /// The manager this handle belongs to.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

impl Clone for ConnectionHandle {
    fn clone(&self) -> Self {
        self.manager.acquire()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.manager.release_one();
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("state", &self.state())
            .finish()
    }
}

// ── Link task ───────────────────────────────────────────────────────

async fn await_link_exit(mut task: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(join_err)) => warn!("connection task terminated with join error: {join_err}"),
        Err(_) => {
            warn!("connection task did not exit within timeout; aborting task");
            task.abort();
        }
    }
}

/// Drive one physical connection from connect to close.
///
/// Exits when the shutdown signal fires, the server closes the connection,
/// or a transport error occurs.
async fn run_link(
    inner: Arc<Inner>,
    generation: u64,
    mut cmd_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let connector = Arc::clone(&inner.connector);
    let mut transport: Box<dyn Transport> = tokio::select! {
        result = connector.connect() => match result {
            Ok(transport) => transport,
            Err(e) => {
                warn!(generation, "failed to connect: {e}");
                inner.finish(generation);
                return;
            }
        },
        _ = &mut shutdown_rx => {
            debug!(generation, "released while connecting");
            inner.finish(generation);
            return;
        }
    };

    info!(generation, "connection open");
    inner.publish(generation, ConnectionState::Open);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(text) => {
                        if let Err(e) = transport.send(text).await {
                            error!(generation, "transport send error: {e}");
                            break;
                        }
                    }
                    None => {
                        let _ = transport.close().await;
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!(generation, "shutdown signal received");
                if let Err(e) = transport.close().await {
                    debug!(generation, "close handshake failed: {e}");
                }
                break;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        // No receivers is fine: nobody is listening yet.
                        let _ = inner.frames_tx.send(text);
                    }
                    Some(Err(e)) => {
                        error!(generation, "transport receive error: {e}");
                        break;
                    }
                    None => {
                        debug!(generation, "connection closed by server");
                        break;
                    }
                }
            }
        }
    }

    inner.finish(generation);
    debug!(generation, "connection task exited");
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Connector that never completes a connection.
    struct PendingConnector {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for PendingConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    /// Connector that always fails.
    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>> {
            Err(CfhError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )))
        }
    }

    fn pending_manager() -> (ConnectionManager, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let manager = ConnectionManager::new(
            PendingConnector {
                attempts: Arc::clone(&attempts),
            },
            ConnectionConfig::default(),
        );
        (manager, attempts)
    }

    #[test]
    fn config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.frame_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn frame_channel_capacity_is_clamped_to_one() {
        let config = ConnectionConfig::default().with_frame_channel_capacity(0);
        assert_eq!(config.frame_channel_capacity, 1);
    }

    #[tokio::test]
    async fn acquire_enters_connecting_and_counts_refs() {
        let (manager, attempts) = pending_manager();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let first = manager.acquire();
        let second = manager.acquire();
        assert_eq!(manager.ref_count(), 2);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        tokio::task::yield_now().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        drop(first);
        assert_eq!(manager.ref_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.release(second);
        assert_eq!(manager.ref_count(), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn send_while_connecting_is_dropped() {
        let (manager, _attempts) = pending_manager();
        let handle = manager.acquire();
        handle.send("ignored");
        assert!(matches!(
            handle.try_send("ignored"),
            Err(CfhError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn clone_takes_a_new_reference() {
        let (manager, _attempts) = pending_manager();
        let handle = manager.acquire();
        let copy = handle.clone();
        assert_eq!(manager.ref_count(), 2);
        drop(handle);
        assert_eq!(manager.ref_count(), 1);
        drop(copy);
        assert_eq!(manager.ref_count(), 0);
    }

    #[tokio::test]
    async fn failed_connect_returns_to_disconnected() {
        let manager = ConnectionManager::new(RefusingConnector, ConnectionConfig::default());
        let handle = manager.acquire();
        let mut states = handle.watch_state();
        while *states.borrow_and_update() != ConnectionState::Disconnected {
            states.changed().await.unwrap();
        }
        assert!(!handle.is_open());
        assert_eq!(manager.ref_count(), 1);
    }

    #[tokio::test]
    async fn reconnect_requires_a_lost_connection() {
        let (manager, attempts) = pending_manager();
        let handle = manager.acquire();
        // Still connecting: nothing to do.
        assert!(!handle.reconnect());
        tokio::task::yield_now().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn link_generation_advances_per_connection() {
        let manager = ConnectionManager::new(RefusingConnector, ConnectionConfig::default());
        assert_eq!(manager.link_generation(), None);
        let handle = manager.acquire();
        assert_eq!(manager.link_generation(), Some(1));

        let mut states = handle.watch_state();
        states
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await
            .unwrap();
        assert_eq!(manager.link_generation(), None);
        assert!(handle.reconnect());
        assert_eq!(manager.link_generation(), Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn release_racing_acquire_never_hides_a_live_link() {
        for _ in 0..200 {
            let (manager, _attempts) = pending_manager();
            let first = manager.acquire();
            let other = manager.clone();
            let releaser = tokio::task::spawn_blocking(move || drop(first));
            let acquirer = tokio::task::spawn_blocking(move || other.acquire());
            releaser.await.unwrap();
            let second = acquirer.await.unwrap();

            assert!(manager.link_generation().is_some());
            assert_eq!(manager.state(), ConnectionState::Connecting);
            drop(second);
        }
    }

    #[tokio::test]
    async fn shutdown_stops_reopening() {
        let (manager, attempts) = pending_manager();
        let handle = manager.acquire();
        tokio::task::yield_now().await;
        manager.shutdown().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let again = manager.acquire();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!again.reconnect());
        tokio::task::yield_now().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        drop(handle);
    }
}
