use std::sync::Arc;

use dcrflow_event::{EventDto, EventNode};
use dcrflow_locking::LockingLogic;
use dcrflow_store::{EventStore, HistoryStore, StoreError};
use tracing::{info, warn};

use crate::error::StateError;

/// Creation, deletion and administrative reset of event nodes.
pub struct LifecycleLogic {
  store: Arc<dyn EventStore>,
  history: Arc<dyn HistoryStore>,
  locking: Arc<LockingLogic>,
}

impl LifecycleLogic {
  pub fn new(
    store: Arc<dyn EventStore>,
    history: Arc<dyn HistoryStore>,
    locking: Arc<LockingLogic>,
  ) -> Self {
    Self {
      store,
      history,
      locking,
    }
  }

  /// Create a node from its definition. The definition's state doubles as
  /// the reset snapshot.
  pub async fn create_event(&self, dto: EventDto) -> Result<(), StateError> {
    if dto.workflow_id.is_empty() {
      return Err(StateError::MissingArgument("workflow_id"));
    }
    if dto.event_id.is_empty() {
      return Err(StateError::MissingArgument("event_id"));
    }

    let node = EventNode::from_dto(dto);
    match self.store.create_event(&node).await {
      Ok(()) => {
        info!(
          workflow_id = %node.workflow_id,
          event_id = %node.event_id,
          "event created"
        );
        Ok(())
      }
      Err(StoreError::AlreadyExists(_)) => Err(StateError::EventExists {
        workflow_id: node.workflow_id,
        event_id: node.event_id,
      }),
      Err(e) => Err(e.into()),
    }
  }

  /// Delete a node, unless another caller currently holds its lock.
  pub async fn delete_event(
    &self,
    workflow_id: &str,
    event_id: &str,
    caller_id: &str,
  ) -> Result<(), StateError> {
    if !self
      .locking
      .is_allowed_to_operate(workflow_id, event_id, caller_id)
      .await?
    {
      return Err(StateError::Locked {
        workflow_id: workflow_id.to_string(),
        event_id: event_id.to_string(),
      });
    }

    self.store.delete_event(workflow_id, event_id).await?;
    info!(workflow_id, event_id, "event deleted");
    Ok(())
  }

  /// Restore a node to its creation snapshot, clearing its lock and its
  /// history ledger.
  ///
  /// Administrative override: the lock queue is not consulted, so a node
  /// wedged by a crashed remote owner can be recovered. The flip side is
  /// that a reset can pull state out from under an in-flight execute.
  pub async fn reset_event(&self, workflow_id: &str, event_id: &str) -> Result<(), StateError> {
    self.store.reset_event(workflow_id, event_id).await?;
    self.history.clear_actions(workflow_id, event_id).await?;
    warn!(workflow_id, event_id, "event reset to initial state");
    Ok(())
  }
}
