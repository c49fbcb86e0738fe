use dcrflow_history::HistoryError;
use dcrflow_locking::LockError;
use dcrflow_rpc::RpcError;
use dcrflow_store::StoreError;
use thiserror::Error;

/// The distinguishable failure kinds of the execution protocol. An HTTP
/// boundary maps these losslessly onto status codes (not found → 404,
/// locked → 409, unauthorized → 401, not executable → 412, the remaining
/// protocol failures → 500).
#[derive(Debug, Error)]
pub enum StateError {
  /// A required identifier or argument was empty.
  #[error("missing required argument: {0}")]
  MissingArgument(&'static str),

  /// The addressed event node does not exist.
  #[error("event {workflow_id}/{event_id} was not found")]
  NotFound {
    workflow_id: String,
    event_id: String,
  },

  /// None of the caller's claimed roles is permitted on the node.
  #[error("caller is not authorized to execute {workflow_id}/{event_id}")]
  Unauthorized {
    workflow_id: String,
    event_id: String,
  },

  /// The node is locked by another caller, or waiting for the lock timed
  /// out.
  #[error("event {workflow_id}/{event_id} is locked by another caller")]
  Locked {
    workflow_id: String,
    event_id: String,
  },

  /// The node is excluded or a condition target is not executed.
  #[error("event {workflow_id}/{event_id} is not executable")]
  NotExecutable {
    workflow_id: String,
    event_id: String,
  },

  /// The multi-node lock acquisition could not lock the full relation
  /// closure; everything acquired was rolled back.
  #[error("failed to lock dependent events of {workflow_id}/{event_id}")]
  FailedToLockOther {
    workflow_id: String,
    event_id: String,
  },

  /// Releasing the relation closure failed on at least one node. Raised
  /// ahead of a deferred propagation failure - a stranded lock is the more
  /// severe condition.
  #[error("failed to unlock dependent events of {workflow_id}/{event_id}")]
  FailedToUnlockOther {
    workflow_id: String,
    event_id: String,
  },

  /// Propagating a response/inclusion/exclusion to a target failed. The
  /// unlock phase has already run by the time this is raised.
  #[error("failed to update state at event {target_event_id}")]
  FailedToUpdateStateAtOther {
    target_event_id: String,
    #[source]
    source: RpcError,
  },

  /// An event with the same identity already exists.
  #[error("event {workflow_id}/{event_id} already exists")]
  EventExists {
    workflow_id: String,
    event_id: String,
  },

  #[error(transparent)]
  Store(StoreError),

  #[error(transparent)]
  Rpc(#[from] RpcError),
}

impl From<StoreError> for StateError {
  fn from(e: StoreError) -> Self {
    StateError::Store(e)
  }
}

impl From<LockError> for StateError {
  fn from(e: LockError) -> Self {
    match e {
      LockError::MissingArgument(name) => StateError::MissingArgument(name),
      LockError::BlankOwner => StateError::MissingArgument("lock_owner"),
      LockError::Locked {
        workflow_id,
        event_id,
      } => StateError::Locked {
        workflow_id,
        event_id,
      },
      LockError::Store(e) => StateError::Store(e),
    }
  }
}

impl From<HistoryError> for StateError {
  fn from(e: HistoryError) -> Self {
    match e {
      HistoryError::MissingArgument(name) => StateError::MissingArgument(name),
      HistoryError::Store(e) => StateError::Store(e),
    }
  }
}
