//! dcrflow Store
//!
//! This crate provides the storage traits and implementations for event
//! nodes and their history ledgers. Data is persisted to SQLite; an
//! in-memory implementation backs tests.
//!
//! The [`EventStore`] trait covers:
//! - Event lifecycle (create, delete, reset)
//! - State field reads and write-through updates
//! - The persisted single-slot lock
//! - Relation and role lookups
//!
//! The [`HistoryStore`] trait covers the append-mostly action ledger that
//! the causal clock is built on. Consistency is per node only: no cross-node
//! transaction exists, the application-level lock protocol is what keeps
//! multi-node operations coherent.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::BTreeSet;

use async_trait::async_trait;
use dcrflow_event::{ActionRecord, EventNode, Relation, RelationKind};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A record with the same identity already exists.
  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// A stored value could not be interpreted.
  #[error("corrupt record: {0}")]
  Corrupt(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

/// Storage for event nodes.
///
/// Reads reflect the latest committed write within a single node
/// (read-after-write consistency); nothing stronger is assumed.
#[async_trait]
pub trait EventStore: Send + Sync {
  /// Whether a node exists for the given identity.
  async fn exists(&self, workflow_id: &str, event_id: &str) -> Result<bool, StoreError>;

  /// Load the full node.
  async fn event(&self, workflow_id: &str, event_id: &str) -> Result<EventNode, StoreError>;

  /// Persist a new node. Fails with [`StoreError::AlreadyExists`] if a node
  /// with the same identity is present.
  async fn create_event(&self, node: &EventNode) -> Result<(), StoreError>;

  /// Remove a node, its relations, roles and history.
  async fn delete_event(&self, workflow_id: &str, event_id: &str) -> Result<(), StoreError>;

  /// Restore a node's state from its creation snapshot and clear its lock.
  async fn reset_event(&self, workflow_id: &str, event_id: &str) -> Result<(), StoreError>;

  /// Write through the executed flag.
  async fn set_executed(
    &self,
    workflow_id: &str,
    event_id: &str,
    executed: bool,
  ) -> Result<(), StoreError>;

  /// Write through the included flag.
  async fn set_included(
    &self,
    workflow_id: &str,
    event_id: &str,
    included: bool,
  ) -> Result<(), StoreError>;

  /// Write through the pending flag.
  async fn set_pending(
    &self,
    workflow_id: &str,
    event_id: &str,
    pending: bool,
  ) -> Result<(), StoreError>;

  /// Current lock owner, if the node is locked.
  async fn lock_owner(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<Option<String>, StoreError>;

  /// Persist the lock slot.
  async fn set_lock(
    &self,
    workflow_id: &str,
    event_id: &str,
    owner_id: &str,
  ) -> Result<(), StoreError>;

  /// Clear the lock slot.
  async fn clear_lock(&self, workflow_id: &str, event_id: &str) -> Result<(), StoreError>;

  /// The node's outgoing relations of the given kind.
  async fn relations(
    &self,
    workflow_id: &str,
    event_id: &str,
    kind: RelationKind,
  ) -> Result<Vec<Relation>, StoreError>;

  /// Roles permitted to execute the node.
  async fn roles(&self, workflow_id: &str, event_id: &str)
  -> Result<BTreeSet<String>, StoreError>;
}

/// Storage for the per-node action ledger.
#[async_trait]
pub trait HistoryStore: Send + Sync {
  /// Highest timestamp recorded for the node, or `None` for a fresh ledger.
  async fn max_timestamp(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<Option<i64>, StoreError>;

  /// Append a record. Fails with [`StoreError::AlreadyExists`] if the node
  /// already has a record at the same timestamp - timestamps are unique per
  /// node by construction.
  async fn insert_action(&self, record: &ActionRecord) -> Result<(), StoreError>;

  /// Overwrite the record at `(workflow_id, event_id, timestamp)`, used to
  /// fill in the counterpart timestamp once a round trip completes.
  async fn update_action(&self, record: &ActionRecord) -> Result<(), StoreError>;

  /// All records for the node in timestamp order.
  async fn actions(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<Vec<ActionRecord>, StoreError>;

  /// Drop the node's entire ledger. Administrative reset only.
  async fn clear_actions(&self, workflow_id: &str, event_id: &str) -> Result<(), StoreError>;
}
