//! Per-run signal routing between an execution context and its orchestrator.

use super::*;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A signal emitted by a test script through its capability bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Pass,
    Fail(String),
    Debug(String),
}

impl Signal {
    /// `pass` and `fail` settle a test; `debug` never does.
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::Debug(_))
    }
}

/// Opaque identifier scoping every signal of one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunLabel(String);

impl RunLabel {
    /// Builds a label from a path slug, a process-wide counter and a random
    /// component. Two calls never return the same label.
    pub fn generate(path: &str) -> Self {
        let slug = path
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect::<String>();
        let slug = slug.trim_matches('-');
        let slug = if slug.is_empty() { "page" } else { slug };
        let seq = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{slug}-{seq}-{}", &nonce[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Routes = HashMap<RunLabel, mpsc::UnboundedSender<Signal>>;

/// Router keyed by [`RunLabel`]. Cloning shares the routing table.
#[derive(Debug, Clone, Default)]
pub struct SignalBus {
    routes: Arc<Mutex<Routes>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `label` and returns the owned receiving end. Dropping the
    /// subscription removes the route.
    pub fn subscribe(&self, label: RunLabel) -> Result<Subscription> {
        let mut routes = self.routes.lock();
        if routes.contains_key(&label) {
            return Err(Error::Channel(format!("run label {label} is already subscribed")));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        routes.insert(label.clone(), tx);
        tracing::debug!(%label, "subscribed run label");
        Ok(Subscription {
            label,
            rx,
            bus: self.clone(),
        })
    }

    pub fn sender(&self, label: RunLabel) -> SignalSender {
        SignalSender {
            label,
            bus: self.clone(),
        }
    }

    /// Delivers `signal` to the subscriber of `label`. Returns `false` when no
    /// live subscription exists for it.
    pub fn send(&self, label: &RunLabel, signal: Signal) -> bool {
        let delivered = self
            .routes
            .lock()
            .get(label)
            .is_some_and(|tx| tx.send(signal.clone()).is_ok());
        if !delivered {
            tracing::warn!(%label, ?signal, "dropping signal for inactive run label");
        }
        delivered
    }

    pub fn is_subscribed(&self, label: &RunLabel) -> bool {
        self.routes.lock().contains_key(label)
    }

    pub fn active_labels(&self) -> Vec<RunLabel> {
        self.routes.lock().keys().cloned().collect()
    }

    fn unsubscribe(&self, label: &RunLabel) {
        if self.routes.lock().remove(label).is_some() {
            tracing::debug!(%label, "unsubscribed run label");
        }
    }
}

/// Receiving end for one run label. Signals arrive in the order they were sent.
#[derive(Debug)]
pub struct Subscription {
    label: RunLabel,
    rx: mpsc::UnboundedReceiver<Signal>,
    bus: SignalBus,
}

impl Subscription {
    pub fn label(&self) -> &RunLabel {
        &self.label
    }

    /// Waits for the next signal. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Signal> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.label);
    }
}

/// Sending end bound to one run label; usable from any thread.
#[derive(Debug, Clone)]
pub struct SignalSender {
    label: RunLabel,
    bus: SignalBus,
}

impl SignalSender {
    pub fn label(&self) -> &RunLabel {
        &self.label
    }

    pub fn send(&self, signal: Signal) -> bool {
        self.bus.send(&self.label, signal)
    }
}
