use dcrflow_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
  /// A required identifier was empty.
  #[error("missing required argument: {0}")]
  MissingArgument(&'static str),

  /// The lock request's owner id was blank or whitespace.
  #[error("lock owner id is blank")]
  BlankOwner,

  /// The caller is not the current lock owner, or waiting for the lock
  /// timed out.
  #[error("event {workflow_id}/{event_id} is locked by another caller")]
  Locked {
    workflow_id: String,
    event_id: String,
  },

  #[error(transparent)]
  Store(#[from] StoreError),
}
