//! dcrflow History
//!
//! The causal ledger of an event node. Every externally visible state
//! change is stamped with a per-node Lamport timestamp: a new record is
//! reserved strictly above both the node's previous maximum and any
//! counterpart timestamp known at the time, which keeps the cross-node
//! ordering consistent and auditable.
//!
//! [`EventHistoryLogic`] owns reservation and completion of records;
//! [`CausalGraph`] is the externally served proof of execution order.

mod error;
mod graph;
mod logic;

pub use error::HistoryError;
pub use graph::{CausalEdge, CausalGraph, CausalNode, NodeKey};
pub use logic::EventHistoryLogic;
