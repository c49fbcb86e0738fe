use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::dto::EventDto;
use crate::relation::{Relation, RelationKind};

/// The three mutable booleans of a DCR event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventState {
  /// Whether the event has been executed.
  pub executed: bool,
  /// Whether the event is currently part of the workflow.
  pub included: bool,
  /// Whether the event is required to execute (again) for the workflow to
  /// be in an accepting state.
  pub pending: bool,
}

/// The full persisted picture of one event node.
///
/// Identity is `(workflow_id, event_id)` and immutable. Relation sets are
/// keyed by target event id, which both collapses duplicates and gives the
/// deterministic iteration order the multi-node lock protocol depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNode {
  pub workflow_id: String,
  pub event_id: String,
  /// Human-readable label, not part of the identity.
  pub name: String,
  /// Address this node is reachable at by its peers.
  pub uri: Url,
  /// Roles permitted to execute this node.
  pub roles: BTreeSet<String>,
  /// Current state.
  pub state: EventState,
  /// Snapshot taken at creation, restored by an administrative reset.
  pub initial: EventState,
  /// Nodes that must be executed-or-excluded before this one may execute.
  pub conditions: BTreeMap<String, Relation>,
  /// Nodes made pending when this one executes.
  pub responses: BTreeMap<String, Relation>,
  /// Nodes included when this one executes.
  pub inclusions: BTreeMap<String, Relation>,
  /// Nodes excluded when this one executes.
  pub exclusions: BTreeMap<String, Relation>,
  /// Id of the caller currently holding this node's lock, if any.
  pub lock_owner: Option<String>,
}

impl EventNode {
  /// Build a node from a creation payload. The payload's state becomes both
  /// the current state and the reset snapshot; duplicate relation targets
  /// collapse, first occurrence wins.
  pub fn from_dto(dto: EventDto) -> Self {
    let state = EventState {
      executed: dto.executed,
      included: dto.included,
      pending: dto.pending,
    };

    Self {
      workflow_id: dto.workflow_id,
      event_id: dto.event_id,
      name: dto.name,
      uri: dto.uri,
      roles: dto.roles.into_iter().collect(),
      state,
      initial: state,
      conditions: collect_relations(dto.conditions),
      responses: collect_relations(dto.responses),
      inclusions: collect_relations(dto.inclusions),
      exclusions: collect_relations(dto.exclusions),
      lock_owner: None,
    }
  }

  /// The relation set of the given kind.
  pub fn relations(&self, kind: RelationKind) -> &BTreeMap<String, Relation> {
    match kind {
      RelationKind::Condition => &self.conditions,
      RelationKind::Response => &self.responses,
      RelationKind::Inclusion => &self.inclusions,
      RelationKind::Exclusion => &self.exclusions,
    }
  }

  /// The relation this node would use to address itself, used to slot the
  /// node into its own sorted lock set.
  pub fn self_relation(&self) -> Relation {
    Relation {
      workflow_id: self.workflow_id.clone(),
      event_id: self.event_id.clone(),
      uri: self.uri.clone(),
    }
  }

  /// Restore current state from the creation snapshot and drop the lock.
  pub fn reset(&mut self) {
    self.state = self.initial;
    self.lock_owner = None;
  }
}

fn collect_relations(relations: Vec<Relation>) -> BTreeMap<String, Relation> {
  let mut map = BTreeMap::new();
  for relation in relations {
    map.entry(relation.event_id.clone()).or_insert(relation);
  }
  map
}
