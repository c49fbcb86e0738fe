use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

/// A directed edge from one event node to another.
///
/// Relations are plain edges: they carry the target's identity and network
/// address and nothing else. Traversal always happens over the explicit
/// per-kind sets on [`crate::EventNode`], never through back-pointers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
  /// Workflow the target node belongs to.
  pub workflow_id: String,
  /// The target node's event id.
  pub event_id: String,
  /// Absolute address the target node is reachable at.
  pub uri: Url,
}

/// The four DCR relation kinds an event node can hold toward other nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
  /// The target must be executed-or-excluded before this node may execute.
  Condition,
  /// Executing this node makes the target pending.
  Response,
  /// Executing this node includes the target.
  Inclusion,
  /// Executing this node excludes the target.
  Exclusion,
}

impl RelationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      RelationKind::Condition => "condition",
      RelationKind::Response => "response",
      RelationKind::Inclusion => "inclusion",
      RelationKind::Exclusion => "exclusion",
    }
  }
}

impl fmt::Display for RelationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for RelationKind {
  type Err = UnknownRelationKind;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "condition" => Ok(RelationKind::Condition),
      "response" => Ok(RelationKind::Response),
      "inclusion" => Ok(RelationKind::Inclusion),
      "exclusion" => Ok(RelationKind::Exclusion),
      other => Err(UnknownRelationKind(other.to_string())),
    }
  }
}

/// Error returned when parsing a relation kind from storage fails.
#[derive(Debug, thiserror::Error)]
#[error("unknown relation kind: {0}")]
pub struct UnknownRelationKind(pub String);
