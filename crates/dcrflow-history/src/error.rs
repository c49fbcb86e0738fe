use dcrflow_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
  /// A required identifier was empty.
  #[error("missing required argument: {0}")]
  MissingArgument(&'static str),

  #[error(transparent)]
  Store(#[from] StoreError),
}
