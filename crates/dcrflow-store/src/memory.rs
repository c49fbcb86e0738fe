use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use dcrflow_event::{ActionRecord, EventNode, Relation, RelationKind};
use tokio::sync::Mutex;

use crate::{EventStore, HistoryStore, StoreError};

#[derive(Default)]
struct Inner {
  events: HashMap<(String, String), EventNode>,
  history: HashMap<(String, String), Vec<ActionRecord>>,
}

/// In-memory store, primarily for tests and single-process setups.
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

fn key(workflow_id: &str, event_id: &str) -> (String, String) {
  (workflow_id.to_string(), event_id.to_string())
}

fn missing(workflow_id: &str, event_id: &str) -> StoreError {
  StoreError::NotFound(format!("event {workflow_id}/{event_id}"))
}

#[async_trait]
impl EventStore for MemoryStore {
  async fn exists(&self, workflow_id: &str, event_id: &str) -> Result<bool, StoreError> {
    let inner = self.inner.lock().await;
    Ok(inner.events.contains_key(&key(workflow_id, event_id)))
  }

  async fn event(&self, workflow_id: &str, event_id: &str) -> Result<EventNode, StoreError> {
    let inner = self.inner.lock().await;
    inner
      .events
      .get(&key(workflow_id, event_id))
      .cloned()
      .ok_or_else(|| missing(workflow_id, event_id))
  }

  async fn create_event(&self, node: &EventNode) -> Result<(), StoreError> {
    let mut inner = self.inner.lock().await;
    let k = key(&node.workflow_id, &node.event_id);
    if inner.events.contains_key(&k) {
      return Err(StoreError::AlreadyExists(format!(
        "event {}/{}",
        node.workflow_id, node.event_id
      )));
    }
    inner.events.insert(k, node.clone());
    Ok(())
  }

  async fn delete_event(&self, workflow_id: &str, event_id: &str) -> Result<(), StoreError> {
    let mut inner = self.inner.lock().await;
    let k = key(workflow_id, event_id);
    if inner.events.remove(&k).is_none() {
      return Err(missing(workflow_id, event_id));
    }
    inner.history.remove(&k);
    Ok(())
  }

  async fn reset_event(&self, workflow_id: &str, event_id: &str) -> Result<(), StoreError> {
    let mut inner = self.inner.lock().await;
    let node = inner
      .events
      .get_mut(&key(workflow_id, event_id))
      .ok_or_else(|| missing(workflow_id, event_id))?;
    node.reset();
    Ok(())
  }

  async fn set_executed(
    &self,
    workflow_id: &str,
    event_id: &str,
    executed: bool,
  ) -> Result<(), StoreError> {
    let mut inner = self.inner.lock().await;
    let node = inner
      .events
      .get_mut(&key(workflow_id, event_id))
      .ok_or_else(|| missing(workflow_id, event_id))?;
    node.state.executed = executed;
    Ok(())
  }

  async fn set_included(
    &self,
    workflow_id: &str,
    event_id: &str,
    included: bool,
  ) -> Result<(), StoreError> {
    let mut inner = self.inner.lock().await;
    let node = inner
      .events
      .get_mut(&key(workflow_id, event_id))
      .ok_or_else(|| missing(workflow_id, event_id))?;
    node.state.included = included;
    Ok(())
  }

  async fn set_pending(
    &self,
    workflow_id: &str,
    event_id: &str,
    pending: bool,
  ) -> Result<(), StoreError> {
    let mut inner = self.inner.lock().await;
    let node = inner
      .events
      .get_mut(&key(workflow_id, event_id))
      .ok_or_else(|| missing(workflow_id, event_id))?;
    node.state.pending = pending;
    Ok(())
  }

  async fn lock_owner(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<Option<String>, StoreError> {
    let inner = self.inner.lock().await;
    let node = inner
      .events
      .get(&key(workflow_id, event_id))
      .ok_or_else(|| missing(workflow_id, event_id))?;
    Ok(node.lock_owner.clone())
  }

  async fn set_lock(
    &self,
    workflow_id: &str,
    event_id: &str,
    owner_id: &str,
  ) -> Result<(), StoreError> {
    let mut inner = self.inner.lock().await;
    let node = inner
      .events
      .get_mut(&key(workflow_id, event_id))
      .ok_or_else(|| missing(workflow_id, event_id))?;
    node.lock_owner = Some(owner_id.to_string());
    Ok(())
  }

  async fn clear_lock(&self, workflow_id: &str, event_id: &str) -> Result<(), StoreError> {
    let mut inner = self.inner.lock().await;
    let node = inner
      .events
      .get_mut(&key(workflow_id, event_id))
      .ok_or_else(|| missing(workflow_id, event_id))?;
    node.lock_owner = None;
    Ok(())
  }

  async fn relations(
    &self,
    workflow_id: &str,
    event_id: &str,
    kind: RelationKind,
  ) -> Result<Vec<Relation>, StoreError> {
    let inner = self.inner.lock().await;
    let node = inner
      .events
      .get(&key(workflow_id, event_id))
      .ok_or_else(|| missing(workflow_id, event_id))?;
    Ok(node.relations(kind).values().cloned().collect())
  }

  async fn roles(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<BTreeSet<String>, StoreError> {
    let inner = self.inner.lock().await;
    let node = inner
      .events
      .get(&key(workflow_id, event_id))
      .ok_or_else(|| missing(workflow_id, event_id))?;
    Ok(node.roles.clone())
  }
}

#[async_trait]
impl HistoryStore for MemoryStore {
  async fn max_timestamp(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<Option<i64>, StoreError> {
    let inner = self.inner.lock().await;
    Ok(
      inner
        .history
        .get(&key(workflow_id, event_id))
        .and_then(|records| records.iter().map(|r| r.timestamp).max()),
    )
  }

  async fn insert_action(&self, record: &ActionRecord) -> Result<(), StoreError> {
    let mut inner = self.inner.lock().await;
    let records = inner
      .history
      .entry(key(&record.workflow_id, &record.event_id))
      .or_default();
    if records.iter().any(|r| r.timestamp == record.timestamp) {
      return Err(StoreError::AlreadyExists(format!(
        "action {}/{} at timestamp {}",
        record.workflow_id, record.event_id, record.timestamp
      )));
    }
    records.push(record.clone());
    records.sort_by_key(|r| r.timestamp);
    Ok(())
  }

  async fn update_action(&self, record: &ActionRecord) -> Result<(), StoreError> {
    let mut inner = self.inner.lock().await;
    let records = inner
      .history
      .get_mut(&key(&record.workflow_id, &record.event_id))
      .ok_or_else(|| missing(&record.workflow_id, &record.event_id))?;
    let slot = records
      .iter_mut()
      .find(|r| r.timestamp == record.timestamp)
      .ok_or_else(|| {
        StoreError::NotFound(format!(
          "action {}/{} at timestamp {}",
          record.workflow_id, record.event_id, record.timestamp
        ))
      })?;
    *slot = record.clone();
    Ok(())
  }

  async fn actions(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<Vec<ActionRecord>, StoreError> {
    let inner = self.inner.lock().await;
    Ok(
      inner
        .history
        .get(&key(workflow_id, event_id))
        .cloned()
        .unwrap_or_default(),
    )
  }

  async fn clear_actions(&self, workflow_id: &str, event_id: &str) -> Result<(), StoreError> {
    let mut inner = self.inner.lock().await;
    inner.history.remove(&key(workflow_id, event_id));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use dcrflow_event::{ActionType, EventState, UNSET_COUNTERPART_TIMESTAMP};

  use super::*;

  fn node(event_id: &str) -> EventNode {
    EventNode {
      workflow_id: "wf".to_string(),
      event_id: event_id.to_string(),
      name: event_id.to_uppercase(),
      uri: "http://localhost:8080/".parse().unwrap(),
      roles: BTreeSet::from(["clerk".to_string()]),
      state: EventState {
        executed: false,
        included: true,
        pending: false,
      },
      initial: EventState {
        executed: false,
        included: true,
        pending: false,
      },
      conditions: Default::default(),
      responses: Default::default(),
      inclusions: Default::default(),
      exclusions: Default::default(),
      lock_owner: None,
    }
  }

  #[tokio::test]
  async fn create_twice_fails() {
    let store = MemoryStore::new();
    store.create_event(&node("a")).await.unwrap();
    let err = store.create_event(&node("a")).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
  }

  #[tokio::test]
  async fn lock_round_trip() {
    let store = MemoryStore::new();
    store.create_event(&node("a")).await.unwrap();

    assert_eq!(store.lock_owner("wf", "a").await.unwrap(), None);
    store.set_lock("wf", "a", "b").await.unwrap();
    assert_eq!(
      store.lock_owner("wf", "a").await.unwrap(),
      Some("b".to_string())
    );
    store.clear_lock("wf", "a").await.unwrap();
    assert_eq!(store.lock_owner("wf", "a").await.unwrap(), None);
  }

  #[tokio::test]
  async fn duplicate_timestamp_rejected() {
    let store = MemoryStore::new();
    let record = ActionRecord {
      workflow_id: "wf".to_string(),
      event_id: "a".to_string(),
      timestamp: 1,
      counterpart_id: "b".to_string(),
      counterpart_timestamp: UNSET_COUNTERPART_TIMESTAMP,
      action_type: ActionType::ChecksCondition,
    };
    store.insert_action(&record).await.unwrap();
    let err = store.insert_action(&record).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
  }
}
