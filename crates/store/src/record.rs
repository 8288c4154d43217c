use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, Version};

/// The durable form of one aggregate: its full current state at a version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRecord {
    /// The aggregate this record belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g., "Payment", "Schedule").
    pub aggregate_type: String,

    /// The version the record was written at.
    pub version: Version,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,

    /// The serialized aggregate state.
    pub state: serde_json::Value,
}

impl AggregateRecord {
    /// Creates a new record.
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        state: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            updated_at: Utc::now(),
            state,
        }
    }

    /// Creates a record from a serializable state.
    pub fn from_state<T: Serialize>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            aggregate_id,
            aggregate_type,
            version,
            serde_json::to_value(state)?,
        ))
    }

    /// Deserializes the record state into a concrete type.
    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }
}

/// A secondary key that must be unique within one aggregate type
/// (e.g. a payment's order code or a user's email).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueKey {
    pub name: String,
    pub value: String,
}

impl UniqueKey {
    pub fn new(name: impl Into<String>, value: impl ToString) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
        }
    }
}

impl std::fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestState {
        value: i32,
        name: String,
    }

    #[test]
    fn record_from_state_and_into_state() {
        let id = AggregateId::new();
        let original = TestState {
            value: 42,
            name: "test".to_string(),
        };

        let record = AggregateRecord::from_state(id, "Test", Version::new(5), &original).unwrap();
        assert_eq!(record.aggregate_type, "Test");
        assert_eq!(record.version, Version::new(5));

        let restored: TestState = record.into_state().unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn unique_key_display() {
        let key = UniqueKey::new("order_code", 1234);
        assert_eq!(key.to_string(), "order_code=1234");
    }
}
