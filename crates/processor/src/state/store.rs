//! Per-partition key/value state with a bounded changelog

use super::checkpoint::Checkpoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Kind of state mutation recorded in the changelog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Put,
    Delete,
}

/// One changelog record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub op: ChangeOp,
    pub key: String,
    pub value: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// A staged write produced by a [`StateTxn`]
#[derive(Debug, Clone, PartialEq)]
pub enum StateWrite {
    Put(String, Value),
    Delete(String),
}

/// Key/value state owned by a single partition.
///
/// Every `put`/`delete` is appended to the changelog; `get` is not recorded.
/// The changelog is a plain vector cleaned up by index: a checkpoint drains
/// exactly the records it covered, and once `changelog_capacity` records
/// accumulate the oldest are discarded (and counted) so an engine without
/// checkpoints stays bounded.
#[derive(Debug)]
pub struct StateStore {
    partition: u32,
    entries: HashMap<String, Value>,
    changelog: Vec<ChangeRecord>,
    changelog_capacity: usize,
    discarded_changes: u64,
}

impl StateStore {
    pub fn new(partition: u32, changelog_capacity: usize) -> Self {
        Self {
            partition,
            entries: HashMap::new(),
            changelog: Vec::new(),
            changelog_capacity: changelog_capacity.max(1),
            discarded_changes: 0,
        }
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.record(ChangeOp::Put, key.clone(), Some(value.clone()));
        self.entries.insert(key, value);
    }

    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.record(ChangeOp::Delete, key.to_string(), None);
        self.entries.remove(key)
    }

    /// Apply writes staged by a committed [`StateTxn`], in order
    pub fn apply(&mut self, writes: Vec<StateWrite>) {
        for write in writes {
            match write {
                StateWrite::Put(key, value) => self.put(key, value),
                StateWrite::Delete(key) => {
                    self.delete(&key);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Changes since the last checkpoint
    pub fn changelog(&self) -> &[ChangeRecord] {
        &self.changelog
    }

    /// Changelog records dropped because the capacity was reached
    pub fn discarded_changes(&self) -> u64 {
        self.discarded_changes
    }

    /// Copy the state into a checkpoint and truncate the consumed changelog.
    ///
    /// The caller holds the partition lock, so copy and truncation happen in a
    /// single critical section.
    pub fn checkpoint(&mut self, processed_offset: Option<u64>) -> Checkpoint {
        let snapshot: BTreeMap<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let consumed = self.changelog.len();
        self.changelog.drain(..consumed);

        debug!(
            partition = self.partition,
            entries = snapshot.len(),
            changes = consumed,
            "state snapshot taken"
        );

        Checkpoint::new(self.partition, snapshot, processed_offset, consumed)
    }

    /// Replace the live state with a snapshot. No merge is performed.
    pub fn restore(&mut self, snapshot: &BTreeMap<String, Value>) {
        self.entries = snapshot
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.changelog.clear();

        debug!(
            partition = self.partition,
            entries = self.entries.len(),
            "state restored"
        );
    }

    fn record(&mut self, op: ChangeOp, key: String, value: Option<Value>) {
        if self.changelog.len() >= self.changelog_capacity {
            let overflow = self.changelog.len() + 1 - self.changelog_capacity;
            self.changelog.drain(..overflow);
            self.discarded_changes += overflow as u64;
            if self.discarded_changes == overflow as u64 {
                warn!(
                    partition = self.partition,
                    capacity = self.changelog_capacity,
                    "changelog full, discarding oldest records"
                );
            }
        }

        self.changelog.push(ChangeRecord {
            op,
            key,
            value,
            timestamp: Utc::now(),
        });
    }
}

/// Staged view of a [`StateStore`] for one unit of work.
///
/// Reads see the transaction's own writes first, then the store. Nothing
/// touches the store until [`into_writes`](Self::into_writes) is applied, so a
/// failing handler leaves state untouched.
#[derive(Debug)]
pub struct StateTxn<'s> {
    store: &'s StateStore,
    overlay: HashMap<String, Option<Value>>,
    writes: Vec<StateWrite>,
}

impl<'s> StateTxn<'s> {
    pub fn new(store: &'s StateStore) -> Self {
        Self {
            store,
            overlay: HashMap::new(),
            writes: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self.overlay.get(key) {
            Some(staged) => staged.as_ref(),
            None => self.store.get(key),
        }
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.overlay.insert(key.clone(), Some(value.clone()));
        self.writes.push(StateWrite::Put(key, value));
    }

    pub fn delete(&mut self, key: &str) {
        self.overlay.insert(key.to_string(), None);
        self.writes.push(StateWrite::Delete(key.to_string()));
    }

    pub fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }

    pub fn into_writes(self) -> Vec<StateWrite> {
        self.writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_put_get_delete() {
        let mut store = StateStore::new(0, 100);

        store.put("a", json!(1));
        store.put("b", json!({"n": 2}));
        assert_eq!(store.get("a"), Some(&json!(1)));
        assert_eq!(store.len(), 2);

        assert_eq!(store.delete("a"), Some(json!(1)));
        assert_eq!(store.get("a"), None);
        assert_eq!(store.delete("missing"), None);

        let ops: Vec<ChangeOp> = store.changelog().iter().map(|r| r.op).collect();
        assert_eq!(
            ops,
            vec![ChangeOp::Put, ChangeOp::Put, ChangeOp::Delete, ChangeOp::Delete]
        );
    }

    #[test]
    fn test_reads_not_recorded() {
        let mut store = StateStore::new(0, 100);
        store.put("a", json!(1));

        assert_eq!(store.get("a"), Some(&json!(1)));
        assert_eq!(store.get("missing"), None);
        assert_eq!(store.changelog().len(), 1);
        assert_eq!(store.changelog()[0].op, ChangeOp::Put);
    }

    #[test]
    fn test_checkpoint_truncates_changelog() {
        let mut store = StateStore::new(3, 100);
        store.put("a", json!(1));
        store.put("b", json!(2));

        let checkpoint = store.checkpoint(Some(41));

        assert_eq!(checkpoint.partition_id, 3);
        assert_eq!(checkpoint.processed_offset, Some(41));
        assert_eq!(checkpoint.changes_consumed, 2);
        assert_eq!(checkpoint.state_snapshot.len(), 2);
        assert!(store.changelog().is_empty());
        assert_eq!(store.get("a"), Some(&json!(1)));
    }

    #[test]
    fn test_checkpoint_restore_equivalence() {
        let mut store = StateStore::new(0, 100);
        for i in 0..10 {
            store.put(format!("key-{}", i), json!(i));
        }

        let checkpoint = store.checkpoint(None);
        store.restore(&checkpoint.state_snapshot);

        for i in 0..10 {
            assert_eq!(store.get(&format!("key-{}", i)), Some(&json!(i)));
        }
        assert_eq!(store.len(), 10);
    }

    #[test]
    fn test_restore_replaces_wholesale() {
        let mut store = StateStore::new(0, 100);
        store.put("kept", json!("old"));
        let checkpoint = store.checkpoint(None);

        store.put("kept", json!("new"));
        store.put("added_later", json!(true));
        store.restore(&checkpoint.state_snapshot);

        assert_eq!(store.get("kept"), Some(&json!("old")));
        assert_eq!(store.get("added_later"), None);
        assert!(store.changelog().is_empty());
    }

    #[test]
    fn test_changelog_bounded() {
        let mut store = StateStore::new(0, 3);
        for i in 0..5 {
            store.put("k", json!(i));
        }

        assert_eq!(store.changelog().len(), 3);
        assert_eq!(store.discarded_changes(), 2);
        assert_eq!(store.changelog()[0].value, Some(json!(2)));
    }

    #[test]
    fn test_txn_staging() {
        let mut store = StateStore::new(0, 100);
        store.put("count", json!(1));
        store.put("gone", json!("x"));

        let writes = {
            let mut txn = StateTxn::new(&store);
            txn.put("count", json!(2));
            txn.delete("gone");

            assert_eq!(txn.get("count"), Some(&json!(2)));
            assert_eq!(txn.get("gone"), None);
            assert!(txn.has_writes());
            txn.into_writes()
        };

        assert_eq!(store.get("count"), Some(&json!(1)));
        store.apply(writes);
        assert_eq!(store.get("count"), Some(&json!(2)));
        assert_eq!(store.get("gone"), None);
    }

    #[test]
    fn test_txn_dropped_leaves_store() {
        let store = StateStore::new(0, 100);
        {
            let mut txn = StateTxn::new(&store);
            txn.put("x", json!(1));
        }
        assert!(store.is_empty());
        assert!(store.changelog().is_empty());
    }
}
