use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;

/// FIFO queues of pending lock requests, one per event node.
///
/// The registry is owned by whoever composes the node process and handed to
/// [`crate::LockingLogic`] explicitly, so tests and multi-node-in-one-process
/// setups each get their own isolated instance.
#[derive(Default)]
pub struct LockQueueRegistry {
  queues: Mutex<HashMap<(String, String), VecDeque<String>>>,
}

impl LockQueueRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a caller to the node's queue.
  pub async fn enqueue(&self, workflow_id: &str, event_id: &str, owner_id: &str) {
    let mut queues = self.queues.lock().await;
    queues
      .entry((workflow_id.to_string(), event_id.to_string()))
      .or_default()
      .push_back(owner_id.to_string());
  }

  /// Whether the caller is at the head of the node's queue.
  pub async fn is_first(&self, workflow_id: &str, event_id: &str, owner_id: &str) -> bool {
    let queues = self.queues.lock().await;
    queues
      .get(&(workflow_id.to_string(), event_id.to_string()))
      .and_then(|queue| queue.front())
      .is_some_and(|head| head == owner_id)
  }

  /// Remove the caller's earliest entry from the node's queue. Idempotent.
  pub async fn remove(&self, workflow_id: &str, event_id: &str, owner_id: &str) {
    let mut queues = self.queues.lock().await;
    let key = (workflow_id.to_string(), event_id.to_string());
    if let Some(queue) = queues.get_mut(&key) {
      if let Some(position) = queue.iter().position(|entry| entry == owner_id) {
        queue.remove(position);
      }
      if queue.is_empty() {
        queues.remove(&key);
      }
    }
  }

  /// Whether the caller has an entry anywhere in the node's queue.
  pub async fn contains(&self, workflow_id: &str, event_id: &str, owner_id: &str) -> bool {
    let queues = self.queues.lock().await;
    queues
      .get(&(workflow_id.to_string(), event_id.to_string()))
      .is_some_and(|queue| queue.iter().any(|entry| entry == owner_id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn fifo_order_is_preserved() {
    let registry = LockQueueRegistry::new();
    registry.enqueue("wf", "a", "first").await;
    registry.enqueue("wf", "a", "second").await;

    assert!(registry.is_first("wf", "a", "first").await);
    assert!(!registry.is_first("wf", "a", "second").await);

    registry.remove("wf", "a", "first").await;
    assert!(registry.is_first("wf", "a", "second").await);
  }

  #[tokio::test]
  async fn remove_is_idempotent() {
    let registry = LockQueueRegistry::new();
    registry.enqueue("wf", "a", "caller").await;
    registry.remove("wf", "a", "caller").await;
    registry.remove("wf", "a", "caller").await;
    assert!(!registry.contains("wf", "a", "caller").await);
  }

  #[tokio::test]
  async fn queues_are_per_node() {
    let registry = LockQueueRegistry::new();
    registry.enqueue("wf", "a", "caller").await;
    assert!(!registry.contains("wf", "b", "caller").await);
  }
}
