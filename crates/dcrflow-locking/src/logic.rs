use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dcrflow_event::{LockDto, Relation};
use dcrflow_rpc::EventRpc;
use dcrflow_store::EventStore;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::LockQueueRegistry;
use crate::error::LockError;

/// Timing knobs for the cooperative wait loop.
#[derive(Debug, Clone)]
pub struct LockingConfig {
  /// How often a waiting caller re-reads the lock state from storage.
  pub poll_interval: Duration,
  /// How long a caller waits for its turn before giving up with a lock
  /// error.
  pub wait_timeout: Duration,
}

impl Default for LockingConfig {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_millis(100),
      wait_timeout: Duration::from_secs(10),
    }
  }
}

/// Turn-taking and multi-node locking for one event node process.
///
/// The persisted lock slot is the sole serialization primitive across
/// conflicting operations on a node; the FIFO queue turns contention into
/// fair, starvation-free ordering, and the bounded wait turns indefinite
/// blocking into an explicit [`LockError::Locked`] the caller can retry.
pub struct LockingLogic {
  store: Arc<dyn EventStore>,
  rpc: Arc<dyn EventRpc>,
  queues: Arc<LockQueueRegistry>,
  config: LockingConfig,
}

impl LockingLogic {
  pub fn new(
    store: Arc<dyn EventStore>,
    rpc: Arc<dyn EventRpc>,
    queues: Arc<LockQueueRegistry>,
    config: LockingConfig,
  ) -> Self {
    Self {
      store,
      rpc,
      queues,
      config,
    }
  }

  /// Whether `caller_id` may operate on the node right now: true iff no
  /// lock is held or the caller already holds it.
  pub async fn is_allowed_to_operate(
    &self,
    workflow_id: &str,
    event_id: &str,
    caller_id: &str,
  ) -> Result<bool, LockError> {
    require(workflow_id, "workflow_id")?;
    require(event_id, "event_id")?;
    require(caller_id, "caller_id")?;

    let owner = self.store.lock_owner(workflow_id, event_id).await?;
    Ok(match owner {
      None => true,
      Some(owner) => owner == caller_id,
    })
  }

  /// Queue up behind earlier callers and wait until the node is operable by
  /// the requester and the requester is at the head of the queue.
  ///
  /// Polls storage at `poll_interval` so a lock released by a remote unlock
  /// is observed; gives up after `wait_timeout`, removing the queue entry
  /// and failing with [`LockError::Locked`]. On success the entry is
  /// removed as well - the queue holds waiters, not holders.
  pub async fn wait_for_my_turn(
    &self,
    workflow_id: &str,
    event_id: &str,
    lock_request: &LockDto,
  ) -> Result<(), LockError> {
    require(workflow_id, "workflow_id")?;
    require(event_id, "event_id")?;
    if lock_request.lock_owner.trim().is_empty() {
      return Err(LockError::BlankOwner);
    }

    let owner_id = lock_request.lock_owner.as_str();
    self.queues.enqueue(workflow_id, event_id, owner_id).await;

    let deadline = Instant::now() + self.config.wait_timeout;
    loop {
      let operable = self
        .is_allowed_to_operate(workflow_id, event_id, owner_id)
        .await?;
      if operable && self.queues.is_first(workflow_id, event_id, owner_id).await {
        self.queues.remove(workflow_id, event_id, owner_id).await;
        return Ok(());
      }

      if Instant::now() >= deadline {
        warn!(workflow_id, event_id, owner_id, "gave up waiting for turn");
        self.queues.remove(workflow_id, event_id, owner_id).await;
        return Err(LockError::Locked {
          workflow_id: workflow_id.to_string(),
          event_id: event_id.to_string(),
        });
      }

      sleep(self.config.poll_interval).await;
    }
  }

  /// Wait for the requester's turn, then persist the lock.
  pub async fn lock_self(
    &self,
    workflow_id: &str,
    event_id: &str,
    lock_request: &LockDto,
  ) -> Result<(), LockError> {
    self
      .wait_for_my_turn(workflow_id, event_id, lock_request)
      .await?;
    self
      .store
      .set_lock(workflow_id, event_id, &lock_request.lock_owner)
      .await?;
    debug!(
      workflow_id,
      event_id,
      owner_id = %lock_request.lock_owner,
      "lock acquired"
    );
    Ok(())
  }

  /// Clear the lock, provided the caller currently holds it.
  pub async fn unlock_self(
    &self,
    workflow_id: &str,
    event_id: &str,
    caller_id: &str,
  ) -> Result<(), LockError> {
    require(workflow_id, "workflow_id")?;
    require(event_id, "event_id")?;
    require(caller_id, "caller_id")?;

    if !self
      .is_allowed_to_operate(workflow_id, event_id, caller_id)
      .await?
    {
      return Err(LockError::Locked {
        workflow_id: workflow_id.to_string(),
        event_id: event_id.to_string(),
      });
    }

    self.store.clear_lock(workflow_id, event_id).await?;
    self.queues.remove(workflow_id, event_id, caller_id).await;
    debug!(workflow_id, event_id, caller_id, "lock released");
    Ok(())
  }

  /// Lock the node itself plus every response/inclusion/exclusion target
  /// before an execute, in sorted event-id order.
  ///
  /// Returns false - with every already-acquired lock rolled back - if any
  /// remote lock call fails.
  pub async fn lock_all_for_execute(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<bool, LockError> {
    require(workflow_id, "workflow_id")?;
    require(event_id, "event_id")?;

    let targets = self.execute_lock_targets(workflow_id, event_id).await?;
    self.lock_list(&targets, event_id).await
  }

  /// Release the locks taken by [`Self::lock_all_for_execute`].
  ///
  /// Unlike locking, unlocking never aborts early: every node is attempted
  /// and a failure only flips the aggregate result to false. Aborting would
  /// strand locks on the remaining nodes.
  pub async fn unlock_all_for_execute(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<bool, LockError> {
    require(workflow_id, "workflow_id")?;
    require(event_id, "event_id")?;

    let targets = self.execute_lock_targets(workflow_id, event_id).await?;
    self.unlock_list(&targets, event_id).await
  }

  /// Lock every relation in the map, in key order. On the first failure,
  /// best-effort unlock whatever was acquired and report false; individual
  /// rollback failures are swallowed.
  pub async fn lock_list(
    &self,
    targets: &BTreeMap<String, Relation>,
    owner_id: &str,
  ) -> Result<bool, LockError> {
    require(owner_id, "owner_id")?;

    let mut locked: Vec<&Relation> = Vec::with_capacity(targets.len());
    for target in targets.values() {
      match self.rpc.lock(target, owner_id).await {
        Ok(()) => locked.push(target),
        Err(e) => {
          warn!(
            target_event = %target.event_id,
            owner_id,
            error = %e,
            "failed to lock target, rolling back"
          );
          for acquired in locked {
            if let Err(e) = self.rpc.unlock(acquired, owner_id).await {
              warn!(
                target_event = %acquired.event_id,
                error = %e,
                "rollback unlock failed"
              );
            }
          }
          return Ok(false);
        }
      }
    }

    info!(owner_id, count = targets.len(), "locked all targets");
    Ok(true)
  }

  /// Unlock every relation in the map, attempting all of them regardless of
  /// individual failures.
  pub async fn unlock_list(
    &self,
    targets: &BTreeMap<String, Relation>,
    owner_id: &str,
  ) -> Result<bool, LockError> {
    require(owner_id, "owner_id")?;

    let mut all_ok = true;
    for target in targets.values() {
      if let Err(e) = self.rpc.unlock(target, owner_id).await {
        warn!(
          target_event = %target.event_id,
          owner_id,
          error = %e,
          "failed to unlock target"
        );
        all_ok = false;
      }
    }

    Ok(all_ok)
  }

  /// The sorted lock set for an execute: the node itself plus the union of
  /// its response, inclusion and exclusion targets, keyed by event id.
  /// First occurrence wins; the BTreeMap key order is what every
  /// concurrently executing node agrees on.
  async fn execute_lock_targets(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<BTreeMap<String, Relation>, LockError> {
    let node = self.store.event(workflow_id, event_id).await?;

    let mut targets = BTreeMap::new();
    targets.insert(node.event_id.clone(), node.self_relation());
    for relation in node
      .responses
      .values()
      .chain(node.inclusions.values())
      .chain(node.exclusions.values())
    {
      targets
        .entry(relation.event_id.clone())
        .or_insert_with(|| relation.clone());
    }

    Ok(targets)
  }
}

fn require(value: &str, name: &'static str) -> Result<(), LockError> {
  if value.is_empty() {
    return Err(LockError::MissingArgument(name));
  }
  Ok(())
}
