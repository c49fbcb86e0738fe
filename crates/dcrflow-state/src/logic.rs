use std::sync::Arc;

use dcrflow_event::{ActionType, ConditionReply, EventStateDto, LockDto, Relation};
use dcrflow_history::EventHistoryLogic;
use dcrflow_locking::LockingLogic;
use dcrflow_rpc::EventRpc;
use dcrflow_store::EventStore;
use tracing::{error, info, instrument, warn};

use crate::auth::AuthLogic;
use crate::error::StateError;

enum Propagation {
  Pending,
  Include,
  Exclude,
}

/// Orchestrates the state transitions of one event node.
///
/// Reads (`is_executed`, `is_included`, `state_dto`) queue behind the lock
/// so remote queries never observe a node mid-transition; simple setters
/// require operability outright; `execute` drives the full multi-node
/// protocol.
pub struct StateLogic {
  store: Arc<dyn EventStore>,
  history: Arc<EventHistoryLogic>,
  locking: Arc<LockingLogic>,
  auth: AuthLogic,
  rpc: Arc<dyn EventRpc>,
}

impl StateLogic {
  pub fn new(
    store: Arc<dyn EventStore>,
    history: Arc<EventHistoryLogic>,
    locking: Arc<LockingLogic>,
    rpc: Arc<dyn EventRpc>,
  ) -> Self {
    let auth = AuthLogic::new(store.clone());
    Self {
      store,
      history,
      locking,
      auth,
      rpc,
    }
  }

  /// Execute the node on behalf of a role claim.
  ///
  /// The sequence is: authorize, check own lock, verify executability
  /// against remote condition nodes, lock the relation closure, propagate
  /// responses/inclusions/exclusions, commit `executed = true` and
  /// `pending = false`, unlock. A propagation failure is deferred until
  /// after the unlock phase; an unlock failure is raised immediately and
  /// takes precedence.
  #[instrument(name = "event_execute", skip(self, roles))]
  pub async fn execute(
    &self,
    workflow_id: &str,
    event_id: &str,
    roles: &[String],
  ) -> Result<(), StateError> {
    require(workflow_id, "workflow_id")?;
    require(event_id, "event_id")?;
    self.require_exists(workflow_id, event_id).await?;

    if !self.auth.is_authorized(workflow_id, event_id, roles).await? {
      return Err(StateError::Unauthorized {
        workflow_id: workflow_id.to_string(),
        event_id: event_id.to_string(),
      });
    }

    if !self
      .locking
      .is_allowed_to_operate(workflow_id, event_id, event_id)
      .await?
    {
      return Err(StateError::Locked {
        workflow_id: workflow_id.to_string(),
        event_id: event_id.to_string(),
      });
    }

    self
      .record_own_milestone(ActionType::ExecuteStart, workflow_id, event_id)
      .await?;

    if !self.is_executable_logged(workflow_id, event_id).await? {
      return Err(StateError::NotExecutable {
        workflow_id: workflow_id.to_string(),
        event_id: event_id.to_string(),
      });
    }

    if !self
      .locking
      .lock_all_for_execute(workflow_id, event_id)
      .await?
    {
      return Err(StateError::FailedToLockOther {
        workflow_id: workflow_id.to_string(),
        event_id: event_id.to_string(),
      });
    }

    // From here on the relation closure is locked: whatever happens, the
    // unlock phase below must run.
    let propagation_failure = self.propagate_all(workflow_id, event_id).await;

    // Re-read our own row and commit the transition, absorbing any write
    // that landed before the locks were taken.
    let commit_result = self.commit_own_state(workflow_id, event_id).await;

    let unlocked = self
      .locking
      .unlock_all_for_execute(workflow_id, event_id)
      .await?;
    if !unlocked {
      error!(workflow_id, event_id, "failed to unlock relation closure");
      return Err(StateError::FailedToUnlockOther {
        workflow_id: workflow_id.to_string(),
        event_id: event_id.to_string(),
      });
    }

    commit_result?;
    if let Some(failure) = propagation_failure {
      return Err(failure);
    }

    info!(workflow_id, event_id, "executed");
    Ok(())
  }

  /// Push pending/included/excluded to every relation target. The first
  /// failure stops the phase and is handed back for deferred raising; the
  /// caller still unlocks.
  async fn propagate_all(&self, workflow_id: &str, event_id: &str) -> Option<StateError> {
    let node = match self.store.event(workflow_id, event_id).await {
      Ok(node) => node,
      Err(e) => return Some(e.into()),
    };

    let plan = node
      .responses
      .values()
      .map(|rel| (rel, Propagation::Pending))
      .chain(
        node
          .inclusions
          .values()
          .map(|rel| (rel, Propagation::Include)),
      )
      .chain(
        node
          .exclusions
          .values()
          .map(|rel| (rel, Propagation::Exclude)),
      );

    for (relation, kind) in plan {
      if let Err(e) = self.propagate(workflow_id, event_id, relation, kind).await {
        warn!(
          workflow_id,
          event_id,
          target = %relation.event_id,
          error = %e,
          "state propagation failed, deferring until unlock"
        );
        return Some(e);
      }
    }
    None
  }

  /// One stamped push to one target: reserve the history record, make the
  /// call, complete the record with the target's timestamp.
  async fn propagate(
    &self,
    workflow_id: &str,
    event_id: &str,
    relation: &Relation,
    kind: Propagation,
  ) -> Result<(), StateError> {
    let action_type = match kind {
      Propagation::Pending => ActionType::SetsPending,
      Propagation::Include => ActionType::Includes,
      Propagation::Exclude => ActionType::Excludes,
    };
    let mut record = self
      .history
      .reserve_next(action_type, workflow_id, event_id, &relation.event_id)
      .await?;

    let sent = match kind {
      Propagation::Pending => {
        self
          .rpc
          .send_pending(relation, event_id, record.timestamp)
          .await
      }
      Propagation::Include => {
        self
          .rpc
          .send_included(relation, event_id, record.timestamp)
          .await
      }
      Propagation::Exclude => {
        self
          .rpc
          .send_excluded(relation, event_id, record.timestamp)
          .await
      }
    };
    let remote_timestamp = sent.map_err(|e| StateError::FailedToUpdateStateAtOther {
      target_event_id: relation.event_id.clone(),
      source: e,
    })?;

    record.counterpart_timestamp = remote_timestamp;
    self.history.update_action(&record).await?;
    Ok(())
  }

  async fn commit_own_state(&self, workflow_id: &str, event_id: &str) -> Result<(), StateError> {
    self.store.set_executed(workflow_id, event_id, true).await?;
    self.store.set_pending(workflow_id, event_id, false).await?;
    self
      .record_own_milestone(ActionType::ExecuteFinished, workflow_id, event_id)
      .await?;
    Ok(())
  }

  /// Stamp a self-interaction (execute start/finish); the node is its own
  /// counterpart, so the record completes immediately.
  async fn record_own_milestone(
    &self,
    action_type: ActionType,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<(), StateError> {
    let mut record = self
      .history
      .reserve_next(action_type, workflow_id, event_id, event_id)
      .await?;
    record.counterpart_timestamp = record.timestamp;
    self.history.update_action(&record).await?;
    Ok(())
  }

  /// Whether the node could execute: included, and every condition target
  /// executed-or-excluded. Queries targets without touching any ledger.
  pub async fn is_executable(&self, workflow_id: &str, event_id: &str) -> Result<bool, StateError> {
    let node = self.store.event(workflow_id, event_id).await?;
    if !node.state.included {
      return Ok(false);
    }

    for relation in node.conditions.values() {
      let included = self.rpc.is_included(relation, event_id).await?;
      if included && !self.rpc.is_executed(relation, event_id).await? {
        return Ok(false);
      }
    }
    Ok(true)
  }

  /// The logged executability check used on the execute path: each
  /// condition round trip is stamped on both ledgers.
  async fn is_executable_logged(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<bool, StateError> {
    let node = self.store.event(workflow_id, event_id).await?;
    if !node.state.included {
      return Ok(false);
    }

    for relation in node.conditions.values() {
      let mut record = self
        .history
        .reserve_next(
          ActionType::ChecksCondition,
          workflow_id,
          event_id,
          &relation.event_id,
        )
        .await?;
      let reply = self
        .rpc
        .check_condition(relation, event_id, record.timestamp)
        .await?;
      record.counterpart_timestamp = reply.timestamp;
      self.history.update_action(&record).await?;

      if !reply.condition_satisfied {
        return Ok(false);
      }
    }
    Ok(true)
  }

  /// Whether the node has been executed. A caller that is not the current
  /// lock owner queues for its turn first, so it never reads a node
  /// mid-transition.
  pub async fn is_executed(
    &self,
    workflow_id: &str,
    event_id: &str,
    sender_id: &str,
  ) -> Result<bool, StateError> {
    self.await_readable(workflow_id, event_id, sender_id).await?;
    let node = self.store.event(workflow_id, event_id).await?;
    Ok(node.state.executed)
  }

  /// Whether the node is currently included. Same lock-queueing behavior
  /// as [`Self::is_executed`].
  pub async fn is_included(
    &self,
    workflow_id: &str,
    event_id: &str,
    sender_id: &str,
  ) -> Result<bool, StateError> {
    self.await_readable(workflow_id, event_id, sender_id).await?;
    let node = self.store.event(workflow_id, event_id).await?;
    Ok(node.state.included)
  }

  /// The node's externally visible state, including computed
  /// executability.
  pub async fn state_dto(
    &self,
    workflow_id: &str,
    event_id: &str,
    sender_id: &str,
  ) -> Result<EventStateDto, StateError> {
    self.await_readable(workflow_id, event_id, sender_id).await?;
    let node = self.store.event(workflow_id, event_id).await?;
    let executable = self.is_executable(workflow_id, event_id).await?;

    Ok(EventStateDto {
      workflow_id: node.workflow_id,
      event_id: node.event_id,
      name: node.name,
      executed: node.state.executed,
      included: node.state.included,
      pending: node.state.pending,
      executable,
    })
  }

  /// Server side of a condition check: report executed-or-excluded and
  /// stamp the interaction with a timestamp above the sender's.
  pub async fn check_condition(
    &self,
    workflow_id: &str,
    event_id: &str,
    sender_id: &str,
    sender_timestamp: i64,
  ) -> Result<ConditionReply, StateError> {
    self.await_readable(workflow_id, event_id, sender_id).await?;
    let node = self.store.event(workflow_id, event_id).await?;
    let condition_satisfied = node.state.executed || !node.state.included;

    let record = self
      .history
      .record_remote(
        ActionType::CheckedConditionBy,
        workflow_id,
        event_id,
        sender_id,
        sender_timestamp,
      )
      .await?;

    Ok(ConditionReply {
      condition_satisfied,
      timestamp: record.timestamp,
    })
  }

  /// Guarded setter for the included flag. No queueing: a caller that is
  /// not operable fails straight away with a lock error.
  pub async fn set_included(
    &self,
    workflow_id: &str,
    event_id: &str,
    caller_id: &str,
    included: bool,
  ) -> Result<(), StateError> {
    self.require_operable(workflow_id, event_id, caller_id).await?;
    self
      .store
      .set_included(workflow_id, event_id, included)
      .await?;
    Ok(())
  }

  /// Guarded setter for the pending flag.
  pub async fn set_pending(
    &self,
    workflow_id: &str,
    event_id: &str,
    caller_id: &str,
    pending: bool,
  ) -> Result<(), StateError> {
    self.require_operable(workflow_id, event_id, caller_id).await?;
    self
      .store
      .set_pending(workflow_id, event_id, pending)
      .await?;
    Ok(())
  }

  /// Inbound include/exclude push from an executing sender. Applies the
  /// change, mirrors it on this ledger and returns the timestamp the
  /// sender completes its own record with.
  pub async fn receive_included(
    &self,
    workflow_id: &str,
    event_id: &str,
    sender_id: &str,
    sender_timestamp: i64,
    included: bool,
  ) -> Result<i64, StateError> {
    self
      .set_included(workflow_id, event_id, sender_id, included)
      .await?;

    let action_type = if included {
      ActionType::IncludedBy
    } else {
      ActionType::ExcludedBy
    };
    let record = self
      .history
      .record_remote(
        action_type,
        workflow_id,
        event_id,
        sender_id,
        sender_timestamp,
      )
      .await?;
    Ok(record.timestamp)
  }

  /// Inbound pending push from an executing sender.
  pub async fn receive_pending(
    &self,
    workflow_id: &str,
    event_id: &str,
    sender_id: &str,
    sender_timestamp: i64,
    pending: bool,
  ) -> Result<i64, StateError> {
    self
      .set_pending(workflow_id, event_id, sender_id, pending)
      .await?;

    let record = self
      .history
      .record_remote(
        ActionType::SetPendingBy,
        workflow_id,
        event_id,
        sender_id,
        sender_timestamp,
      )
      .await?;
    Ok(record.timestamp)
  }

  async fn require_exists(&self, workflow_id: &str, event_id: &str) -> Result<(), StateError> {
    if !self.store.exists(workflow_id, event_id).await? {
      return Err(StateError::NotFound {
        workflow_id: workflow_id.to_string(),
        event_id: event_id.to_string(),
      });
    }
    Ok(())
  }

  async fn require_operable(
    &self,
    workflow_id: &str,
    event_id: &str,
    caller_id: &str,
  ) -> Result<(), StateError> {
    require(workflow_id, "workflow_id")?;
    require(event_id, "event_id")?;
    require(caller_id, "caller_id")?;
    self.require_exists(workflow_id, event_id).await?;

    if !self
      .locking
      .is_allowed_to_operate(workflow_id, event_id, caller_id)
      .await?
    {
      return Err(StateError::Locked {
        workflow_id: workflow_id.to_string(),
        event_id: event_id.to_string(),
      });
    }
    Ok(())
  }

  /// Block until the sender may read the node: either it already holds the
  /// lock, or it waits its turn in the queue.
  async fn await_readable(
    &self,
    workflow_id: &str,
    event_id: &str,
    sender_id: &str,
  ) -> Result<(), StateError> {
    require(workflow_id, "workflow_id")?;
    require(event_id, "event_id")?;
    require(sender_id, "sender_id")?;
    self.require_exists(workflow_id, event_id).await?;

    if !self
      .locking
      .is_allowed_to_operate(workflow_id, event_id, sender_id)
      .await?
    {
      self
        .locking
        .wait_for_my_turn(
          workflow_id,
          event_id,
          &LockDto {
            lock_owner: sender_id.to_string(),
          },
        )
        .await?;
    }
    Ok(())
  }
}

fn require(value: &str, name: &'static str) -> Result<(), StateError> {
  if value.is_empty() {
    return Err(StateError::MissingArgument(name));
  }
  Ok(())
}
