//! In-process event bus.
//!
//! This crate provides the publication side of the write path:
//! - [`EventEnvelope`] carrying a serialized domain event and its metadata
//! - [`EventHandler`] trait for subscribers
//! - [`EventBus`] fanning committed events out to subscribers
//!
//! Delivery is at-most-once per process lifetime. Subscribers are registered
//! in memory and their failures never reach the publisher.

pub mod bus;
pub mod envelope;
pub mod error;
pub mod handler;

pub use bus::{Dispatch, DispatchFailure, DispatchReport, EventBus};
pub use common::{AggregateId, Version};
pub use envelope::{EventEnvelope, EventEnvelopeBuilder, EventId};
pub use error::{EnvelopeError, HandlerError};
pub use handler::EventHandler;
