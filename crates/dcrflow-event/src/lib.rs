//! dcrflow Event
//!
//! This crate provides the core data model for a dcrflow event node.
//! A workflow is decomposed into autonomous event nodes, each identified by
//! `(workflow_id, event_id)` and independently hosted at its own URI.
//!
//! Key pieces:
//! - [`EventNode`]: the full persisted picture of one node - current and
//!   initial state, relation sets, roles and the lock slot
//! - [`Relation`]: a directed, uri-addressed edge to another node
//! - [`ActionRecord`]: a causally-timestamped entry in the node's history
//!   ledger
//! - DTO shapes exchanged over the node-to-node wire

mod action;
mod dto;
mod event;
mod relation;

pub use action::{ActionRecord, ActionType, UNSET_COUNTERPART_TIMESTAMP, UnknownActionType};
pub use dto::{ConditionReply, EventDto, EventStateDto, LockDto, StampedValue};
pub use event::{EventNode, EventState};
pub use relation::{Relation, RelationKind, UnknownRelationKind};
