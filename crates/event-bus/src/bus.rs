//! Event bus fan-out.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::join_all;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::{EventEnvelope, EventHandler, EventId};

/// Default capacity of the failure channel.
pub const DEFAULT_ERROR_CHANNEL_CAPACITY: usize = 256;

/// A handler failure, reported on the bus error channel.
#[derive(Debug, Clone)]
pub struct DispatchFailure {
    pub handler: &'static str,
    pub event_type: String,
    pub event_id: EventId,
    pub error: String,
}

/// Outcome of delivering one or more events to their handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Number of handler invocations that succeeded.
    pub delivered: usize,
    /// Number of handler invocations that returned an error or panicked.
    pub failed: usize,
}

impl DispatchReport {
    /// Returns true when every handler succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, ok: bool) {
        if ok {
            self.delivered += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Handle to an asynchronous dispatch.
///
/// Dropping it detaches the spawned handler tasks; they keep running.
#[derive(Debug, Default)]
#[must_use = "dropping a Dispatch detaches it; call wait() to observe completion"]
pub struct Dispatch {
    tasks: Vec<JoinHandle<bool>>,
}

impl Dispatch {
    /// Returns the number of handler invocations in flight.
    pub fn handler_count(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every handler of this dispatch to finish.
    pub async fn wait(self) -> DispatchReport {
        let mut report = DispatchReport::default();
        for task in self.tasks {
            report.record(task.await.unwrap_or(false));
        }
        report
    }

    fn extend(&mut self, other: Dispatch) {
        self.tasks.extend(other.tasks);
    }
}

/// In-process publish/subscribe dispatcher.
///
/// Handlers register per event type (or for every event). `publish` spawns one
/// task per matching handler and returns immediately; `publish_sync` awaits
/// all of them. Handler errors and panics never reach the publisher.
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    wildcard: RwLock<Vec<Arc<dyn EventHandler>>>,
    errors_tx: mpsc::Sender<DispatchFailure>,
    errors_rx: Mutex<Option<mpsc::Receiver<DispatchFailure>>>,
}

impl EventBus {
    /// Creates a bus whose error channel holds at most `error_capacity` failures.
    pub fn new(error_capacity: usize) -> Self {
        let (errors_tx, errors_rx) = mpsc::channel(error_capacity.max(1));
        Self {
            handlers: RwLock::new(HashMap::new()),
            wildcard: RwLock::new(Vec::new()),
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
        }
    }

    /// Registers a handler for one event type.
    pub async fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        tracing::debug!(handler = handler.name(), %event_type, "handler subscribed");
        self.handlers
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Registers a handler for every event type.
    pub async fn subscribe_all(&self, handler: Arc<dyn EventHandler>) {
        tracing::debug!(handler = handler.name(), "handler subscribed to all events");
        self.wildcard.write().await.push(handler);
    }

    /// Returns the number of handlers an event of this type would reach.
    pub async fn handler_count(&self, event_type: &str) -> usize {
        self.matching(event_type).await.len()
    }

    /// Takes the receiving end of the failure channel. Returns `None` after the
    /// first call.
    pub async fn take_error_receiver(&self) -> Option<mpsc::Receiver<DispatchFailure>> {
        self.errors_rx.lock().await.take()
    }

    /// Publishes an event asynchronously, one spawned task per handler.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type, event_id = %event.event_id))]
    pub async fn publish(&self, event: EventEnvelope) -> Dispatch {
        metrics::counter!("event_bus_published_total", "event_type" => event.event_type.clone())
            .increment(1);

        let event = Arc::new(event);
        let tasks = self
            .matching(&event.event_type)
            .await
            .into_iter()
            .map(|handler| {
                tokio::spawn(run_handler(
                    handler,
                    Arc::clone(&event),
                    self.errors_tx.clone(),
                ))
            })
            .collect();

        Dispatch { tasks }
    }

    /// Publishes an event and waits until every handler has finished.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type, event_id = %event.event_id))]
    pub async fn publish_sync(&self, event: EventEnvelope) -> DispatchReport {
        metrics::counter!("event_bus_published_total", "event_type" => event.event_type.clone())
            .increment(1);

        let event = Arc::new(event);
        let handlers = self.matching(&event.event_type).await;
        let outcomes = join_all(
            handlers
                .into_iter()
                .map(|handler| run_handler(handler, Arc::clone(&event), self.errors_tx.clone())),
        )
        .await;

        let mut report = DispatchReport::default();
        for ok in outcomes {
            report.record(ok);
        }
        report
    }

    /// Publishes events in input order.
    ///
    /// Dispatch of each event starts only after the previous event's handlers
    /// were spawned; handlers themselves still run concurrently.
    pub async fn publish_batch(&self, events: Vec<EventEnvelope>) -> Dispatch {
        let mut dispatch = Dispatch::default();
        for event in events {
            dispatch.extend(self.publish(event).await);
        }
        dispatch
    }

    async fn matching(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        let mut handlers = self
            .handlers
            .read()
            .await
            .get(event_type)
            .cloned()
            .unwrap_or_default();
        handlers.extend(self.wildcard.read().await.iter().cloned());
        handlers
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_CHANNEL_CAPACITY)
    }
}

async fn run_handler(
    handler: Arc<dyn EventHandler>,
    event: Arc<EventEnvelope>,
    errors: mpsc::Sender<DispatchFailure>,
) -> bool {
    let outcome = AssertUnwindSafe(handler.handle(&event))
        .catch_unwind()
        .await;

    let error = match outcome {
        Ok(Ok(())) => return true,
        Ok(Err(e)) => e.to_string(),
        Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
    };

    metrics::counter!("event_bus_handler_failures_total", "handler" => handler.name())
        .increment(1);
    tracing::warn!(
        handler = handler.name(),
        event_type = %event.event_type,
        event_id = %event.event_id,
        %error,
        "event handler failed"
    );

    let failure = DispatchFailure {
        handler: handler.name(),
        event_type: event.event_type.clone(),
        event_id: event.event_id,
        error,
    };
    if errors.try_send(failure).is_err() {
        tracing::debug!("event error channel full, dropping failure report");
    }
    false
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
