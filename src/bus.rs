//! Envelope parsing and filtered fan-out over a shared connection.
//!
//! A [`MessageBus`] sits on one [`ConnectionHandle`]. Its dispatcher task
//! reads raw frames in arrival order, parses each into an [`Envelope`]
//! (dropping anything that is not one), and hands it to every registered
//! [`Subscription`] whose predicate accepts it. Each subscription has its own
//! queue and remembers the last envelope it accepted, so two consumers with
//! different predicates see different sub-streams of the same socket.
//!
//! The registry belongs to the bus. A subscription is removed when its handle
//! is dropped.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};

use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::error::{CfhError, Result};
use crate::protocol::{ClientMessage, Envelope, DISCRIMINATOR};

/// Predicate deciding whether a subscription receives an envelope.
pub type Filter = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

struct Subscriber {
    id: u64,
    filter: Option<Filter>,
    tx: mpsc::UnboundedSender<Envelope>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

impl Registry {
    fn insert(&mut self, filter: Option<Filter>) -> (u64, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.next_id += 1;
        let id = self.next_id;
        self.subscribers.push(Subscriber { id, filter, tx });
        (id, rx)
    }

    fn remove(&mut self, id: u64) {
        self.subscribers.retain(|sub| sub.id != id);
    }

    /// Route one raw frame. Returns how many subscriptions received it.
    fn dispatch(&mut self, frame: &str) -> usize {
        let Some(envelope) = Envelope::parse(frame) else {
            trace!(len = frame.len(), "dropping frame that is not an envelope");
            return 0;
        };

        let mut delivered = 0;
        self.subscribers.retain(|sub| {
            let accepted = sub.filter.as_ref().is_none_or(|filter| filter(&envelope));
            if !accepted {
                return true;
            }
            if sub.tx.send(envelope.clone()).is_err() {
                return false;
            }
            delivered += 1;
            true
        });
        trace!(msg = %envelope.msg, delivered, "dispatched envelope");
        delivered
    }
}

fn lock(registry: &StdMutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Bus ─────────────────────────────────────────────────────────────

/// Typed send and filtered receive over one connection reference.
pub struct MessageBus {
    handle: ConnectionHandle,
    registry: Arc<StdMutex<Registry>>,
    dispatcher: JoinHandle<()>,
}

impl MessageBus {
    /// Build a bus over `handle` and start its dispatcher.
    ///
    /// Must be called from within a tokio runtime. Frames that arrive before
    /// this call are not seen.
    pub fn new(handle: ConnectionHandle) -> Self {
        let registry = Arc::new(StdMutex::new(Registry::default()));
        let frames = handle.frames();
        let dispatcher = tokio::spawn(run_dispatcher(frames, Arc::downgrade(&registry)));
        Self {
            handle,
            registry,
            dispatcher,
        }
    }

    /// Acquire a connection reference from `manager` and build a bus on it.
    pub fn mount(manager: &ConnectionManager) -> Self {
        Self::new(manager.acquire())
    }

    /// Send `payload` under the discriminator `msg`.
    ///
    /// `payload` must be a JSON object (or `null` for no fields). The
    /// discriminator is written last, so a `msg` key inside `payload` is
    /// replaced. Nothing is transmitted while the connection is not open.
    ///
    /// # Errors
    ///
    /// Returns [`CfhError::InvalidPayload`] if `payload` is neither an object
    /// nor `null`, or [`CfhError::Serialization`] if encoding fails.
    pub fn send(&self, msg: &str, payload: Value) -> Result<()> {
        let mut fields = match payload {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => {
                return Err(CfhError::InvalidPayload(format!(
                    "expected an object, got {other}"
                )))
            }
        };
        fields.remove(DISCRIMINATOR);
        let frame = Envelope::new(msg, fields).to_frame()?;
        debug!(msg, "sending envelope");
        self.handle.send(frame);
        Ok(())
    }

    /// Send a typed client message.
    ///
    /// # Errors
    ///
    /// Returns [`CfhError::Serialization`] if encoding fails.
    pub fn send_message(&self, message: &ClientMessage) -> Result<()> {
        let frame = serde_json::to_string(message)?;
        debug!(msg = message.discriminator(), "sending envelope");
        self.handle.send(frame);
        Ok(())
    }

    /// Subscribe to every envelope.
    pub fn subscribe_all(&self) -> Subscription {
        self.register(None)
    }

    /// Subscribe to the envelopes `predicate` accepts.
    pub fn subscribe<F>(&self, predicate: F) -> Subscription
    where
        F: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        self.register(Some(Arc::new(predicate)))
    }

    /// Subscribe to envelopes with the discriminator `msg`.
    pub fn subscribe_to(&self, msg: impl Into<String>) -> Subscription {
        let msg = msg.into();
        self.subscribe(move |envelope| envelope.is(&msg))
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry)
            .subscribers
            .iter()
            .filter(|sub| !sub.tx.is_closed())
            .count()
    }

    /// Returns `true` if the underlying connection is open.
    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// The connection reference this bus holds.
    pub fn connection(&self) -> &ConnectionHandle {
        &self.handle
    }

    fn register(&self, filter: Option<Filter>) -> Subscription {
        let (id, rx) = lock(&self.registry).insert(filter);
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
            rx,
            last: None,
        }
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("connection", &self.handle)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

async fn run_dispatcher(mut frames: broadcast::Receiver<String>, registry: Weak<StdMutex<Registry>>) {
    loop {
        match frames.recv().await {
            Ok(frame) => {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                lock(&registry).dispatch(&frame);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "message bus fell behind, frames skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("message bus dispatcher exited");
}

// ── Subscription ────────────────────────────────────────────────────

/// One consumer's filtered view of the envelope stream.
pub struct Subscription {
    id: u64,
    registry: Weak<StdMutex<Registry>>,
    rx: mpsc::UnboundedReceiver<Envelope>,
    last: Option<Envelope>,
}

impl Subscription {
    /// Wait for the next accepted envelope.
    ///
    /// Returns `None` once the bus is gone and the queue is drained. This
    /// method is cancel-safe.
    pub async fn recv(&mut self) -> Option<Envelope> {
        let envelope = self.rx.recv().await?;
        self.last = Some(envelope.clone());
        Some(envelope)
    }

    /// Take the next accepted envelope if one is queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        let envelope = self.rx.try_recv().ok()?;
        self.last = Some(envelope.clone());
        Some(envelope)
    }

    /// The most recent envelope this subscription received.
    pub fn last(&self) -> Option<&Envelope> {
        self.last.as_ref()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("last", &self.last)
            .finish()
    }
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

    fn only(msg: &'static str) -> Option<Filter> {
        Some(Arc::new(move |env: &Envelope| env.is(msg)))
    }

    #[test]
    fn malformed_frames_reach_nobody() {
        let mut registry = Registry::default();
        let (_id, mut rx) = registry.insert(None);

        assert_eq!(registry.dispatch("definitely not json"), 0);
        assert_eq!(registry.dispatch(r#"{"response":null}"#), 0);
        assert_eq!(registry.dispatch(r#"{"msg":42}"#), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn predicates_split_the_stream() {
        let mut registry = Registry::default();
        let (_all, mut all_rx) = registry.insert(None);
        let (_joins, mut joins_rx) = registry.insert(only("JoinResponse"));
        let (_roster, mut roster_rx) = registry.insert(only("PlayerListUpdate"));

        assert_eq!(
            registry.dispatch(r#"{"msg":"JoinResponse","response":null}"#),
            2
        );
        assert_eq!(
            registry.dispatch(r#"{"msg":"PlayerListUpdate","host":1,"players":[]}"#),
            2
        );
        assert_eq!(registry.dispatch(r#"{"msg":"Chat"}"#), 1);

        let count = |rx: &mut mpsc::UnboundedReceiver<Envelope>| {
            let mut n = 0;
            while rx.try_recv().is_ok() {
                n += 1;
            }
            n
        };
        assert_eq!(count(&mut all_rx), 3);
        assert_eq!(count(&mut joins_rx), 1);
        assert_eq!(count(&mut roster_rx), 1);
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let mut registry = Registry::default();
        let (_id, rx) = registry.insert(None);
        drop(rx);
        assert_eq!(registry.dispatch(r#"{"msg":"X"}"#), 0);
        assert!(registry.subscribers.is_empty());
    }

    #[test]
    fn remove_unregisters() {
        let mut registry = Registry::default();
        let (first, _rx1) = registry.insert(None);
        let (_second, _rx2) = registry.insert(None);
        registry.remove(first);
        assert_eq!(registry.subscribers.len(), 1);
        assert_eq!(registry.dispatch(r#"{"msg":"X"}"#), 1);
    }

    #[test]
    fn delivery_preserves_frame_order() {
        let mut registry = Registry::default();
        let (_id, mut rx) = registry.insert(None);
        for n in 0..10 {
            registry.dispatch(&format!(r#"{{"msg":"Tick","n":{n}}}"#));
        }
        for n in 0..10 {
            let env = rx.try_recv().unwrap();
            assert_eq!(env.field("n"), Some(&serde_json::json!(n)));
        }
    }
}
