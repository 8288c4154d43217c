use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, AggregateRecord, Result, StoreError, UniqueKey, Version,
    store::{StoreTransaction, TransactionalStore},
};

type RecordKey = (String, AggregateId);
type KeyIndex = (String, String, String);

fn key_index(aggregate_type: &str, key: &UniqueKey) -> KeyIndex {
    (
        aggregate_type.to_string(),
        key.name.clone(),
        key.value.clone(),
    )
}

#[derive(Default)]
struct Tables {
    records: HashMap<RecordKey, AggregateRecord>,
    keys: HashMap<KeyIndex, AggregateId>,
}

impl Tables {
    fn version_of(&self, aggregate_type: &str, aggregate_id: AggregateId) -> Version {
        self.records
            .get(&(aggregate_type.to_string(), aggregate_id))
            .map(|r| r.version)
            .unwrap_or(Version::initial())
    }
}

#[derive(Default)]
struct Faults {
    fail_next_commit: AtomicBool,
    failing_writes: Mutex<HashSet<String>>,
}

impl Faults {
    fn write_fails_for(&self, aggregate_type: &str) -> bool {
        self.failing_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(aggregate_type)
    }
}

/// In-memory store implementation for testing.
///
/// Transactions stage their writes locally and validate versions and unique
/// keys again at commit time, so two transactions racing on the same record
/// behave the way they do against PostgreSQL: the second commit loses.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next commit fail without applying anything.
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Makes every write of the given aggregate type fail until cleared.
    pub fn fail_writes_for(&self, aggregate_type: &str) {
        self.faults
            .failing_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(aggregate_type.to_string());
    }

    /// Clears all injected faults.
    pub fn clear_faults(&self) {
        self.faults.fail_next_commit.store(false, Ordering::SeqCst);
        self.faults
            .failing_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Returns the committed record count for an aggregate type.
    pub async fn record_count(&self, aggregate_type: &str) -> usize {
        self.tables
            .read()
            .await
            .records
            .keys()
            .filter(|(t, _)| t == aggregate_type)
            .count()
    }
}

#[async_trait]
impl TransactionalStore for InMemoryStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        Ok(InMemoryTransaction {
            store: self.clone(),
            staged: HashMap::new(),
            staged_keys: HashMap::new(),
        })
    }
}

struct Staged {
    record: AggregateRecord,
    base_version: Version,
    keys: Vec<UniqueKey>,
}

/// A transaction against an [`InMemoryStore`].
pub struct InMemoryTransaction {
    store: InMemoryStore,
    staged: HashMap<RecordKey, Staged>,
    staged_keys: HashMap<KeyIndex, AggregateId>,
}

impl InMemoryTransaction {
    fn key_owner(&self, tables: &Tables, index: &KeyIndex) -> Option<AggregateId> {
        self.staged_keys
            .get(index)
            .or_else(|| tables.keys.get(index))
            .copied()
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn load(
        &mut self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRecord>> {
        let key = (aggregate_type.to_string(), aggregate_id);
        if let Some(staged) = self.staged.get(&key) {
            return Ok(Some(staged.record.clone()));
        }
        Ok(self.store.tables.read().await.records.get(&key).cloned())
    }

    async fn find_by_key(
        &mut self,
        aggregate_type: &str,
        key: &UniqueKey,
    ) -> Result<Option<AggregateRecord>> {
        let owner = {
            let tables = self.store.tables.read().await;
            self.key_owner(&tables, &key_index(aggregate_type, key))
        };
        match owner {
            Some(id) => self.load(aggregate_type, id).await,
            None => Ok(None),
        }
    }

    async fn list(&mut self, aggregate_type: &str) -> Result<Vec<AggregateRecord>> {
        let tables = self.store.tables.read().await;
        let mut records: HashMap<AggregateId, AggregateRecord> = tables
            .records
            .iter()
            .filter(|((t, _), _)| t == aggregate_type)
            .map(|((_, id), r)| (*id, r.clone()))
            .collect();
        for ((t, id), staged) in &self.staged {
            if t == aggregate_type {
                records.insert(*id, staged.record.clone());
            }
        }
        let mut records: Vec<_> = records.into_values().collect();
        records.sort_by_key(|r| r.updated_at);
        Ok(records)
    }

    async fn upsert(
        &mut self,
        mut record: AggregateRecord,
        expected_version: Version,
        keys: Vec<UniqueKey>,
    ) -> Result<Version> {
        let aggregate_type = record.aggregate_type.clone();
        let aggregate_id = record.aggregate_id;

        if self.store.faults.write_fails_for(&aggregate_type) {
            return Err(StoreError::WriteFailed(format!(
                "writes to {aggregate_type} are disabled"
            )));
        }

        let tables = self.store.tables.read().await;
        let record_key = (aggregate_type.clone(), aggregate_id);
        let committed = tables.version_of(&aggregate_type, aggregate_id);
        let (current, base_version) = match self.staged.get(&record_key) {
            Some(staged) => (staged.record.version, staged.base_version),
            None => (committed, committed),
        };

        if current != expected_version {
            return Err(StoreError::ConcurrencyConflict {
                aggregate_type,
                aggregate_id,
                expected: expected_version,
                actual: current,
            });
        }

        for key in &keys {
            let index = key_index(&aggregate_type, key);
            if let Some(owner) = self.key_owner(&tables, &index)
                && owner != aggregate_id
            {
                return Err(StoreError::DuplicateKey {
                    aggregate_type,
                    key: key.name.clone(),
                    value: key.value.clone(),
                });
            }
        }
        drop(tables);

        let version = expected_version.next();
        record.version = version;
        record.updated_at = chrono::Utc::now();

        for key in &keys {
            self.staged_keys
                .insert(key_index(&aggregate_type, key), aggregate_id);
        }
        self.staged.insert(
            record_key,
            Staged {
                record,
                base_version,
                keys,
            },
        );

        Ok(version)
    }

    async fn commit(self) -> Result<()> {
        if self.store.faults.fail_next_commit.swap(false, Ordering::SeqCst) {
            tracing::debug!("injected commit failure");
            return Err(StoreError::CommitFailed("injected commit failure".into()));
        }

        let mut tables = self.store.tables.write().await;

        // Validate everything before touching the tables so a failure leaves
        // them exactly as they were.
        for ((aggregate_type, aggregate_id), staged) in &self.staged {
            let actual = tables.version_of(aggregate_type, *aggregate_id);
            if actual != staged.base_version {
                return Err(StoreError::ConcurrencyConflict {
                    aggregate_type: aggregate_type.clone(),
                    aggregate_id: *aggregate_id,
                    expected: staged.base_version,
                    actual,
                });
            }
        }
        for (index, owner) in &self.staged_keys {
            if let Some(existing) = tables.keys.get(index)
                && existing != owner
            {
                return Err(StoreError::DuplicateKey {
                    aggregate_type: index.0.clone(),
                    key: index.1.clone(),
                    value: index.2.clone(),
                });
            }
        }

        for ((aggregate_type, aggregate_id), staged) in self.staged {
            // A key whose value changed releases the old value.
            let names: HashSet<&str> = staged.keys.iter().map(|k| k.name.as_str()).collect();
            tables.keys.retain(|(t, name, value), owner| {
                !(t == &aggregate_type
                    && *owner == aggregate_id
                    && names.contains(name.as_str())
                    && !staged
                        .keys
                        .iter()
                        .any(|k| &k.name == name && &k.value == value))
            });
            tables
                .records
                .insert((aggregate_type, aggregate_id), staged.record);
        }
        tables.keys.extend(self.staged_keys);

        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
