//! dcrflow RPC
//!
//! The point-to-point contract between event nodes. Every cross-node
//! interaction of the execution protocol goes through the [`EventRpc`]
//! trait:
//!
//! - condition queries (`is_executed`, `is_included`, `check_condition`)
//! - state pushes (`send_pending`, `send_included`, `send_excluded`)
//! - the distributed lock protocol (`lock`, `unlock`)
//!
//! [`HttpEventRpc`] is the production implementation over HTTP. Failures are
//! typed: an unreachable host is distinguished from a remote rejection so
//! callers never have to inspect transport errors to tell the two apart.

mod http;

pub use http::{ExecuteRequest, HttpEventRpc, UpdateBoolRequest};

use async_trait::async_trait;
use dcrflow_event::{ConditionReply, Relation};

/// Error type for node-to-node calls.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
  /// The target host could not be reached at all.
  #[error("host not found: {uri}")]
  HostNotFound { uri: String },

  /// The target answered with a non-success status.
  #[error("remote rejected {operation}: status {status}")]
  Rejected { operation: &'static str, status: u16 },

  /// The target's reply could not be interpreted.
  #[error("invalid reply to {operation}: {message}")]
  InvalidReply {
    operation: &'static str,
    message: String,
  },

  /// The relation's address cannot carry the endpoint path.
  #[error("relation uri cannot address endpoints: {uri}")]
  InvalidAddress { uri: String },

  /// Any other transport-level failure.
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),
}

/// Remote operations one event node performs against another.
///
/// All operations are addressed through a [`Relation`], which carries the
/// target's identity and URI. The `sender_id` is the calling node's event id;
/// the remote side uses it for lock-ownership checks and history stamping.
#[async_trait]
pub trait EventRpc: Send + Sync {
  /// Whether the target has been executed.
  async fn is_executed(&self, target: &Relation, sender_id: &str) -> Result<bool, RpcError>;

  /// Whether the target is currently included.
  async fn is_included(&self, target: &Relation, sender_id: &str) -> Result<bool, RpcError>;

  /// Ask the target whether it satisfies a condition relation
  /// (executed-or-excluded), stamping the round trip on both ledgers.
  async fn check_condition(
    &self,
    target: &Relation,
    sender_id: &str,
    sender_timestamp: i64,
  ) -> Result<ConditionReply, RpcError>;

  /// Make the target pending. Returns the target's own timestamp for the
  /// interaction.
  async fn send_pending(
    &self,
    target: &Relation,
    sender_id: &str,
    sender_timestamp: i64,
  ) -> Result<i64, RpcError>;

  /// Include the target. Returns the target's own timestamp.
  async fn send_included(
    &self,
    target: &Relation,
    sender_id: &str,
    sender_timestamp: i64,
  ) -> Result<i64, RpcError>;

  /// Exclude the target. Returns the target's own timestamp.
  async fn send_excluded(
    &self,
    target: &Relation,
    sender_id: &str,
    sender_timestamp: i64,
  ) -> Result<i64, RpcError>;

  /// Acquire the target's lock on behalf of `owner_id`. The remote side
  /// queues and waits its turn, so this can take up to the remote's wait
  /// timeout before being rejected.
  async fn lock(&self, target: &Relation, owner_id: &str) -> Result<(), RpcError>;

  /// Release the target's lock previously acquired by `unlocker_id`.
  async fn unlock(&self, target: &Relation, unlocker_id: &str) -> Result<(), RpcError>;
}
