use serde::{Deserialize, Serialize};
use url::Url;

use crate::relation::Relation;

/// Creation payload for a new event node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDto {
  pub workflow_id: String,
  pub event_id: String,
  pub name: String,
  /// Address the node will be reachable at.
  pub uri: Url,
  pub roles: Vec<String>,
  pub executed: bool,
  pub included: bool,
  pub pending: bool,
  #[serde(default)]
  pub conditions: Vec<Relation>,
  #[serde(default)]
  pub responses: Vec<Relation>,
  #[serde(default)]
  pub inclusions: Vec<Relation>,
  #[serde(default)]
  pub exclusions: Vec<Relation>,
}

/// Externally visible state of an event node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStateDto {
  pub workflow_id: String,
  pub event_id: String,
  pub name: String,
  pub executed: bool,
  pub included: bool,
  pub pending: bool,
  /// Whether the node could execute right now (included and every condition
  /// target executed-or-excluded).
  pub executable: bool,
}

/// Body of a remote lock request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDto {
  /// Id of the caller asking for exclusive operability, usually another
  /// event's id.
  pub lock_owner: String,
}

/// Reply to a condition check: the verdict plus the remote node's own
/// timestamp for the interaction, so the caller can complete its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionReply {
  pub condition_satisfied: bool,
  pub timestamp: i64,
}

/// A pushed state change stamped with the sender's timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampedValue {
  pub sender_id: String,
  pub timestamp: i64,
}
