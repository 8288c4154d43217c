//! Core aggregate and domain event traits, and the caller-side event accumulator.

use common::{AggregateId, Version};
use serde::{Serialize, de::DeserializeOwned};
use store::UniqueKey;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// This is the name subscribers register for on the event bus.
    fn event_type(&self) -> &'static str;
}

/// Trait for aggregates persisted as full-state records.
///
/// Aggregates are plain state plus pure decision methods: a command method
/// takes `&self`, validates the request against the current state and returns
/// the events describing the change, or an error. State only changes through
/// [`apply`](Aggregate::apply). Aggregates carry no event buffer of their own;
/// see [`AggregateRoot`].
pub trait Aggregate: Default + Serialize + DeserializeOwned + Send + Sync + Sized {
    /// The type of events this aggregate produces.
    type Event: DomainEvent;

    /// The type of errors this aggregate's decisions can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name, used as the store partition.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's unique identifier.
    ///
    /// Returns None for a new, uninitialized aggregate.
    fn id(&self) -> Option<AggregateId>;

    /// Applies an event to the aggregate, updating its state.
    ///
    /// Must be pure and infallible: events are facts that already happened.
    fn apply(&mut self, event: Self::Event);

    /// Secondary keys that must be unique across this aggregate type.
    fn unique_keys(&self) -> Vec<UniqueKey> {
        Vec::new()
    }

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

/// An aggregate together with its stored version and the events produced
/// since it was loaded or last saved.
///
/// The uncommitted buffer is only ever drained by
/// [`Repository::save`](crate::Repository::save), which hands the drained
/// events back to the caller.
#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    state: A,
    version: Version,
    uncommitted: Vec<A::Event>,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Creates an empty root for an aggregate that does not exist yet.
    pub fn new() -> Self {
        Self::from_parts(A::default(), Version::initial())
    }

    pub(crate) fn from_parts(state: A, version: Version) -> Self {
        Self {
            state,
            version,
            uncommitted: Vec::new(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> &A {
        &self.state
    }

    /// Consumes the root, returning the current state.
    pub fn into_state(self) -> A {
        self.state
    }

    /// Returns the version the aggregate was loaded or last saved at.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns true if the aggregate has never been saved.
    pub fn is_new(&self) -> bool {
        self.version == Version::initial()
    }

    /// Runs a decision against the current state and applies the resulting events.
    ///
    /// On success the events are applied and appended to the uncommitted
    /// buffer, and the number of new events is returned. On failure neither
    /// the state nor the buffer changes.
    pub fn execute<F>(&mut self, decide: F) -> Result<usize, A::Error>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
    {
        let events = decide(&self.state)?;
        let count = events.len();
        for event in events {
            self.state.apply(event.clone());
            self.uncommitted.push(event);
        }
        Ok(count)
    }

    /// Returns the events produced since the last save, without clearing them.
    pub fn uncommitted_events(&self) -> &[A::Event] {
        &self.uncommitted
    }

    /// Returns true if there are events waiting to be saved.
    pub fn has_changes(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    pub(crate) fn mark_saved(&mut self, version: Version) -> Vec<A::Event> {
        self.version = version;
        std::mem::take(&mut self.uncommitted)
    }
}

impl<A: Aggregate> Default for AggregateRoot<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Aggregate> std::ops::Deref for AggregateRoot<A> {
    type Target = A;

    fn deref(&self) -> &A {
        &self.state
    }
}
