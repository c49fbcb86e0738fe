use dcrflow_event::{ActionRecord, ActionType};
use serde::{Deserialize, Serialize};

/// Identity of a node in the causal graph: which event acted, and when on
/// its own clock.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
  pub event_id: String,
  pub timestamp: i64,
}

/// One interaction in the causal graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalNode {
  pub key: NodeKey,
  pub action_type: ActionType,
  /// The other node involved and its clock value for the same interaction.
  pub counterpart_id: String,
  pub counterpart_timestamp: i64,
}

/// A happened-before edge between two interactions on the same ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalEdge {
  pub from: NodeKey,
  pub to: NodeKey,
}

/// The auditable view of one node's ledger: each record becomes a graph
/// node keyed by `(event_id, timestamp)`, chained in stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalGraph {
  pub nodes: Vec<CausalNode>,
  pub edges: Vec<CausalEdge>,
}

impl CausalGraph {
  /// Build the graph from a node's records, assumed sorted by timestamp.
  pub fn from_records(records: &[ActionRecord]) -> Self {
    let nodes: Vec<CausalNode> = records
      .iter()
      .map(|record| CausalNode {
        key: NodeKey {
          event_id: record.event_id.clone(),
          timestamp: record.timestamp,
        },
        action_type: record.action_type,
        counterpart_id: record.counterpart_id.clone(),
        counterpart_timestamp: record.counterpart_timestamp,
      })
      .collect();

    let edges = nodes
      .windows(2)
      .map(|pair| CausalEdge {
        from: pair[0].key.clone(),
        to: pair[1].key.clone(),
      })
      .collect();

    Self { nodes, edges }
  }

  /// Look up an interaction by key.
  pub fn node(&self, key: &NodeKey) -> Option<&CausalNode> {
    self.nodes.iter().find(|node| &node.key == key)
  }
}
