//! dcrflow State
//!
//! Execution orchestration for one event node. [`StateLogic::execute`] is
//! the only compound transition in the system: it authorizes the caller,
//! verifies executability against remote condition nodes, locks the node's
//! whole relation closure in sorted order, propagates pending/included/
//! excluded to the targets, commits its own state and unlocks - with the
//! unlock phase running even when propagation fails, so locks are never
//! stranded.
//!
//! [`AuthLogic`] is the role gate, [`LifecycleLogic`] covers event
//! creation, deletion and administrative reset.

mod auth;
mod error;
mod lifecycle;
mod logic;

pub use auth::AuthLogic;
pub use error::StateError;
pub use lifecycle::LifecycleLogic;
pub use logic::StateLogic;
