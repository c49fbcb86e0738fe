use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sentinel for a counterpart timestamp that has not been learned yet.
///
/// A record is reserved with this value before the remote call is made and
/// updated once the counterpart's own timestamp comes back in the reply.
pub const UNSET_COUNTERPART_TIMESTAMP: i64 = -1;

/// The kind of cross-node interaction a history record describes.
///
/// Each outbound action has an inbound mirror recorded at the counterpart
/// (`Includes` on the sender, `IncludedBy` on the receiver, and so on), which
/// is what lets an auditor stitch the two ledgers together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
  Includes,
  IncludedBy,
  Excludes,
  ExcludedBy,
  SetsPending,
  SetPendingBy,
  ChecksCondition,
  CheckedConditionBy,
  ChecksMilestone,
  CheckedMilestoneBy,
  ExecuteStart,
  ExecuteFinished,
}

impl ActionType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ActionType::Includes => "includes",
      ActionType::IncludedBy => "included_by",
      ActionType::Excludes => "excludes",
      ActionType::ExcludedBy => "excluded_by",
      ActionType::SetsPending => "sets_pending",
      ActionType::SetPendingBy => "set_pending_by",
      ActionType::ChecksCondition => "checks_condition",
      ActionType::CheckedConditionBy => "checked_condition_by",
      ActionType::ChecksMilestone => "checks_milestone",
      ActionType::CheckedMilestoneBy => "checked_milestone_by",
      ActionType::ExecuteStart => "execute_start",
      ActionType::ExecuteFinished => "execute_finished",
    }
  }
}

impl fmt::Display for ActionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ActionType {
  type Err = UnknownActionType;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "includes" => Ok(ActionType::Includes),
      "included_by" => Ok(ActionType::IncludedBy),
      "excludes" => Ok(ActionType::Excludes),
      "excluded_by" => Ok(ActionType::ExcludedBy),
      "sets_pending" => Ok(ActionType::SetsPending),
      "set_pending_by" => Ok(ActionType::SetPendingBy),
      "checks_condition" => Ok(ActionType::ChecksCondition),
      "checked_condition_by" => Ok(ActionType::CheckedConditionBy),
      "checks_milestone" => Ok(ActionType::ChecksMilestone),
      "checked_milestone_by" => Ok(ActionType::CheckedMilestoneBy),
      "execute_start" => Ok(ActionType::ExecuteStart),
      "execute_finished" => Ok(ActionType::ExecuteFinished),
      other => Err(UnknownActionType(other.to_string())),
    }
  }
}

/// Error returned when parsing an action type from storage fails.
#[derive(Debug, thiserror::Error)]
#[error("unknown action type: {0}")]
pub struct UnknownActionType(pub String);

/// One entry in an event node's causal history ledger.
///
/// Timestamps are per-node Lamport clocks: a record's `timestamp` is reserved
/// strictly greater than both the node's previous maximum and any counterpart
/// timestamp known at reservation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
  /// Workflow of the node this record belongs to.
  pub workflow_id: String,
  /// The node this record belongs to.
  pub event_id: String,
  /// Local logical timestamp, unique and monotonically increasing per node.
  pub timestamp: i64,
  /// The other node involved in the interaction.
  pub counterpart_id: String,
  /// The counterpart's own timestamp for the same interaction, or
  /// [`UNSET_COUNTERPART_TIMESTAMP`] while the round trip is in flight.
  pub counterpart_timestamp: i64,
  /// What kind of interaction this was.
  pub action_type: ActionType,
}

impl ActionRecord {
  /// Whether the counterpart's timestamp has been recorded yet.
  pub fn is_complete(&self) -> bool {
    self.counterpart_timestamp != UNSET_COUNTERPART_TIMESTAMP
  }
}
