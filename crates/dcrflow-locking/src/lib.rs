//! dcrflow Locking
//!
//! The serialization layer of the execution protocol. Each event node owns a
//! single persisted lock slot plus an in-process FIFO queue of waiting
//! callers; this crate provides both and the multi-node protocol built on
//! top of them:
//!
//! - [`LockQueueRegistry`]: injected, per-process queue ownership - there is
//!   no global queue state
//! - [`LockingLogic::wait_for_my_turn`]: bounded, fair waiting for
//!   operability
//! - [`LockingLogic::lock_all_for_execute`]: locks the node itself plus its
//!   response/inclusion/exclusion targets in sorted event-id order, the
//!   deadlock-avoidance rule that keeps concurrent executes from forming a
//!   circular wait

mod error;
mod logic;
mod registry;

pub use error::LockError;
pub use logic::{LockingConfig, LockingLogic};
pub use registry::LockQueueRegistry;
