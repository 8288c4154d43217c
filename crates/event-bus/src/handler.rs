//! Subscriber trait.

use async_trait::async_trait;

use crate::{EventEnvelope, HandlerError};

/// A subscriber invoked for every published event of the types it was
/// registered for.
///
/// Handlers run after the producing transaction has committed. A returned
/// error (or a panic) is isolated by the bus: it is counted and reported on
/// the error channel, and other handlers still run.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the name of this handler, used in logs and failure reports.
    fn name(&self) -> &'static str;

    /// Handles a single event.
    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError>;
}
