use std::sync::Arc;

use dcrflow_event::{ActionRecord, ActionType, UNSET_COUNTERPART_TIMESTAMP};
use dcrflow_store::{HistoryStore, StoreError};
use tracing::debug;

use crate::error::HistoryError;
use crate::graph::CausalGraph;

/// Reservation and completion of causally-timestamped history records.
pub struct EventHistoryLogic {
  store: Arc<dyn HistoryStore>,
}

impl EventHistoryLogic {
  pub fn new(store: Arc<dyn HistoryStore>) -> Self {
    Self { store }
  }

  /// The next timestamp for the node: one above both the node's recorded
  /// maximum and the counterpart's timestamp when one is known.
  pub async fn next_timestamp(
    &self,
    workflow_id: &str,
    event_id: &str,
    counterpart_timestamp: Option<i64>,
  ) -> Result<i64, HistoryError> {
    require(workflow_id, "workflow_id")?;
    require(event_id, "event_id")?;

    let local_max = self
      .store
      .max_timestamp(workflow_id, event_id)
      .await?
      .unwrap_or(0);
    Ok(local_max.max(counterpart_timestamp.unwrap_or(i64::MIN)) + 1)
  }

  /// Reserve and persist a record for an outbound interaction. The
  /// counterpart's timestamp is not known yet and stays at the sentinel
  /// until [`Self::update_action`] fills it in.
  pub async fn reserve_next(
    &self,
    action_type: ActionType,
    workflow_id: &str,
    event_id: &str,
    counterpart_id: &str,
  ) -> Result<ActionRecord, HistoryError> {
    require(counterpart_id, "counterpart_id")?;
    self
      .reserve(
        action_type,
        workflow_id,
        event_id,
        counterpart_id,
        UNSET_COUNTERPART_TIMESTAMP,
        None,
      )
      .await
  }

  /// Persist a complete record for an inbound interaction, whose
  /// counterpart timestamp arrived with the request. The reserved timestamp
  /// lands above it, which is the Lamport rule that keeps the two ledgers
  /// consistent.
  pub async fn record_remote(
    &self,
    action_type: ActionType,
    workflow_id: &str,
    event_id: &str,
    counterpart_id: &str,
    counterpart_timestamp: i64,
  ) -> Result<ActionRecord, HistoryError> {
    require(counterpart_id, "counterpart_id")?;
    self
      .reserve(
        action_type,
        workflow_id,
        event_id,
        counterpart_id,
        counterpart_timestamp,
        Some(counterpart_timestamp),
      )
      .await
  }

  async fn reserve(
    &self,
    action_type: ActionType,
    workflow_id: &str,
    event_id: &str,
    counterpart_id: &str,
    counterpart_timestamp: i64,
    clock_floor: Option<i64>,
  ) -> Result<ActionRecord, HistoryError> {
    loop {
      let timestamp = self
        .next_timestamp(workflow_id, event_id, clock_floor)
        .await?;
      let record = ActionRecord {
        workflow_id: workflow_id.to_string(),
        event_id: event_id.to_string(),
        timestamp,
        counterpart_id: counterpart_id.to_string(),
        counterpart_timestamp,
        action_type,
      };
      match self.store.insert_action(&record).await {
        Ok(()) => {
          debug!(workflow_id, event_id, timestamp, %action_type, "reserved action");
          return Ok(record);
        }
        // Another reservation landed between the read and the insert;
        // recompute against the new maximum and try again.
        Err(StoreError::AlreadyExists(_)) => continue,
        Err(e) => return Err(e.into()),
      }
    }
  }

  /// Persist a record completed with its counterpart timestamp.
  pub async fn update_action(&self, record: &ActionRecord) -> Result<(), HistoryError> {
    self.store.update_action(record).await?;
    Ok(())
  }

  /// Whether the counterpart's timestamp is ahead of everything this node
  /// has recorded. A node compares `<=` against its own id (its clock may
  /// legitimately sit exactly at its own last stamp) and strictly `<`
  /// against any other node.
  pub async fn is_counterpart_timestamp_higher(
    &self,
    workflow_id: &str,
    event_id: &str,
    counterpart_id: &str,
    counterpart_timestamp: i64,
  ) -> Result<bool, HistoryError> {
    require(workflow_id, "workflow_id")?;
    require(event_id, "event_id")?;
    require(counterpart_id, "counterpart_id")?;

    let local_max = self
      .store
      .max_timestamp(workflow_id, event_id)
      .await?
      .unwrap_or(0);
    Ok(if counterpart_id == event_id {
      local_max <= counterpart_timestamp
    } else {
      local_max < counterpart_timestamp
    })
  }

  /// The node's full ledger as an auditable causal graph.
  pub async fn history(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<CausalGraph, HistoryError> {
    require(workflow_id, "workflow_id")?;
    require(event_id, "event_id")?;

    let records = self.store.actions(workflow_id, event_id).await?;
    Ok(CausalGraph::from_records(&records))
  }
}

fn require(value: &str, name: &'static str) -> Result<(), HistoryError> {
  if value.is_empty() {
    return Err(HistoryError::MissingArgument(name));
  }
  Ok(())
}
