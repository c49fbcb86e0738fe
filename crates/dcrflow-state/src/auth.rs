use std::sync::Arc;

use dcrflow_store::EventStore;

use crate::error::StateError;

/// Role gate for execute requests: the caller's claimed roles must
/// intersect the node's permitted set.
pub struct AuthLogic {
  store: Arc<dyn EventStore>,
}

impl AuthLogic {
  pub fn new(store: Arc<dyn EventStore>) -> Self {
    Self { store }
  }

  /// Whether any claimed role is permitted on the node. An empty claim is
  /// simply unauthorized; a missing node propagates as not-found from
  /// storage.
  pub async fn is_authorized(
    &self,
    workflow_id: &str,
    event_id: &str,
    roles: &[String],
  ) -> Result<bool, StateError> {
    if workflow_id.is_empty() {
      return Err(StateError::MissingArgument("workflow_id"));
    }
    if event_id.is_empty() {
      return Err(StateError::MissingArgument("event_id"));
    }

    let permitted = self.store.roles(workflow_id, event_id).await?;
    Ok(roles.iter().any(|role| permitted.contains(role)))
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use dcrflow_event::{EventNode, EventState};
  use dcrflow_store::{MemoryStore, StoreError};

  use super::*;

  async fn store_with_roles(roles: &[&str]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let node = EventNode {
      workflow_id: "wf".to_string(),
      event_id: "a".to_string(),
      name: "A".to_string(),
      uri: "http://localhost:9000/".parse().unwrap(),
      roles: roles.iter().map(|r| r.to_string()).collect::<BTreeSet<_>>(),
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
    };
    store.create_event(&node).await.unwrap();
    store
  }

  #[tokio::test]
  async fn intersecting_roles_pass() {
    let auth = AuthLogic::new(store_with_roles(&["clerk", "manager"]).await);
    let claimed = vec!["intern".to_string(), "manager".to_string()];
    assert!(auth.is_authorized("wf", "a", &claimed).await.unwrap());
  }

  #[tokio::test]
  async fn disjoint_or_empty_roles_fail() {
    let auth = AuthLogic::new(store_with_roles(&["clerk"]).await);
    let claimed = vec!["manager".to_string()];
    assert!(!auth.is_authorized("wf", "a", &claimed).await.unwrap());
    assert!(!auth.is_authorized("wf", "a", &[]).await.unwrap());
  }

  #[tokio::test]
  async fn missing_node_propagates_not_found() {
    let auth = AuthLogic::new(Arc::new(MemoryStore::new()));
    let err = auth
      .is_authorized("wf", "ghost", &["clerk".to_string()])
      .await
      .unwrap_err();
    assert!(matches!(err, StateError::Store(StoreError::NotFound(_))));
  }
}
