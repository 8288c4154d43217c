//! Command pipeline: validate, open a unit of work, commit, then publish.

use std::sync::Arc;
use std::time::{Duration, Instant};

use event_bus::{EventBus, EventEnvelope};
use store::TransactionalStore;

use crate::context::CommandContext;
use crate::error::DomainError;
use crate::unit_of_work::{UnitOfWork, UnitOfWorkFactory};

/// How committed events are handed to the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Spawn handlers and return without waiting for them.
    #[default]
    Async,
    /// Wait until every handler has run before the command returns.
    Sync,
}

/// Pipeline-wide settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bound on every commit and rollback, independent of command deadlines.
    pub finalize_timeout: Duration,
    /// Capacity of the event bus failure channel.
    pub error_channel_capacity: usize,
    pub publish_mode: PublishMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            finalize_timeout: Duration::from_secs(5),
            error_channel_capacity: event_bus::bus::DEFAULT_ERROR_CHANNEL_CAPACITY,
            publish_mode: PublishMode::Async,
        }
    }
}

/// Result of the transactional part of a command: its return value and the
/// events captured from every save, in save order.
#[derive(Debug)]
pub struct CommandOutcome<T> {
    pub value: T,
    pub events: Vec<EventEnvelope>,
}

impl<T> CommandOutcome<T> {
    /// An outcome that changed nothing.
    pub fn unchanged(value: T) -> Self {
        Self {
            value,
            events: Vec::new(),
        }
    }

    pub fn with_events(value: T, events: Vec<EventEnvelope>) -> Self {
        Self { value, events }
    }
}

/// Runs commands through a unit of work and publishes their events after commit.
///
/// A command handler opens a unit with [`begin`](Self::begin), does its
/// loads, decisions and saves, and hands the unit and its outcome to
/// [`finish`](Self::finish), the only path to a commit:
///
/// ```text
/// begin ──► mutate ──► save (captures events) ──► finish ──┬──► commit ──► publish
///                                                          └──► rollback
/// ```
pub struct CommandPipeline<S: TransactionalStore> {
    factory: UnitOfWorkFactory<S>,
    bus: Arc<EventBus>,
    publish_mode: PublishMode,
}

impl<S: TransactionalStore> Clone for CommandPipeline<S> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            bus: Arc::clone(&self.bus),
            publish_mode: self.publish_mode,
        }
    }
}

impl<S: TransactionalStore> CommandPipeline<S> {
    /// Creates a pipeline over a store and a bus.
    pub fn new(store: S, bus: Arc<EventBus>, config: &PipelineConfig) -> Self {
        Self {
            factory: UnitOfWorkFactory::new(store, config.finalize_timeout),
            bus,
            publish_mode: config.publish_mode,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn factory(&self) -> &UnitOfWorkFactory<S> {
        &self.factory
    }

    /// Opens a unit of work for one command.
    pub async fn begin(
        &self,
        command: &'static str,
        ctx: &CommandContext,
    ) -> Result<UnitOfWork<S>, DomainError> {
        let mut uow = self.factory.create();
        match uow.begin(ctx).await {
            Ok(()) => Ok(uow),
            Err(e) => {
                record(command, "failed", None);
                tracing::warn!(command, error = %e, "could not open unit of work");
                Err(e)
            }
        }
    }

    /// Records a command rejected before any transaction was opened.
    pub fn reject<T>(&self, command: &'static str, error: DomainError) -> Result<T, DomainError> {
        record(command, "rejected", None);
        tracing::info!(command, error = %error, "command rejected");
        Err(error)
    }

    /// Finishes a command: rolls back on error, otherwise commits and then
    /// publishes the captured events.
    ///
    /// A failed commit publishes nothing. Publication failures never turn a
    /// committed command into an error.
    pub async fn finish<T>(
        &self,
        command: &'static str,
        mut uow: UnitOfWork<S>,
        outcome: Result<CommandOutcome<T>, DomainError>,
        started: Instant,
    ) -> Result<T, DomainError> {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                // Rollback failures are logged by the unit itself.
                let _ = uow.rollback().await;
                uow.close().await;
                record(command, "failed", Some(started));
                tracing::warn!(command, error = %e, kind = %e.kind(), "command failed");
                return Err(e);
            }
        };

        if let Err(e) = uow.commit().await {
            uow.close().await;
            record(command, "failed", Some(started));
            return Err(e);
        }
        uow.close().await;
        record(command, "committed", Some(started));

        self.publish(outcome.events).await;
        Ok(outcome.value)
    }

    /// Publishes committed events.
    pub async fn publish(&self, events: Vec<EventEnvelope>) {
        if events.is_empty() {
            return;
        }
        let dispatch = self.bus.publish_batch(events).await;
        if self.publish_mode == PublishMode::Sync {
            let report = dispatch.wait().await;
            if !report.is_clean() {
                tracing::warn!(
                    delivered = report.delivered,
                    failed = report.failed,
                    "event handlers failed"
                );
            }
        }
    }
}

fn record(command: &'static str, outcome: &'static str, started: Option<Instant>) {
    metrics::counter!("commands_total", "command" => command, "outcome" => outcome).increment(1);
    if let Some(started) = started {
        metrics::histogram!("command_duration_seconds", "command" => command)
            .record(started.elapsed().as_secs_f64());
    }
}
