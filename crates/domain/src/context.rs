//! Per-command execution context: correlation, deadline and cancellation.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::DomainError;

/// Context carried by one command invocation.
///
/// Cloning shares the cancellation flag, so a caller can keep a clone and
/// cancel the command from another task.
#[derive(Debug, Clone)]
pub struct CommandContext {
    correlation_id: String,
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl CommandContext {
    /// Creates a context with a fresh correlation id and no deadline.
    pub fn new() -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Sets a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Sets an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels the command. Takes effect at the next bounded call.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails if the context was cancelled or its deadline has passed.
    pub fn ensure_active(&self) -> Result<(), DomainError> {
        if self.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(DomainError::DeadlineExceeded("begin"));
        }
        Ok(())
    }

    /// Runs a store or gateway call, bounded by the deadline.
    ///
    /// A cancelled context fails before the call starts.
    pub async fn bounded<T, E, F>(&self, operation: &'static str, call: F) -> Result<T, DomainError>
    where
        F: Future<Output = Result<T, E>>,
        DomainError: From<E>,
    {
        if self.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, call)
                .await
                .map_err(|_| DomainError::DeadlineExceeded(operation))?
                .map_err(DomainError::from),
            None => call.await.map_err(DomainError::from),
        }
    }
}

impl Default for CommandContext {
    fn default() -> Self {
        Self::new()
    }
}
