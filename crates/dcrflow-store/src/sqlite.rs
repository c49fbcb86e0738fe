use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use dcrflow_event::{ActionRecord, ActionType, EventNode, EventState, Relation, RelationKind};
use sqlx::{FromRow, SqlitePool};

use crate::{EventStore, HistoryStore, StoreError};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }
}

#[derive(FromRow)]
struct EventRow {
  workflow_id: String,
  event_id: String,
  name: String,
  uri: String,
  executed: bool,
  included: bool,
  pending: bool,
  initial_executed: bool,
  initial_included: bool,
  initial_pending: bool,
  lock_owner: Option<String>,
}

#[derive(FromRow)]
struct RelationRow {
  kind: String,
  target_workflow_id: String,
  target_event_id: String,
  target_uri: String,
}

#[derive(FromRow)]
struct ActionRow {
  workflow_id: String,
  event_id: String,
  timestamp: i64,
  counterpart_id: String,
  counterpart_timestamp: i64,
  action_type: String,
}

impl TryFrom<ActionRow> for ActionRecord {
  type Error = StoreError;

  fn try_from(row: ActionRow) -> Result<Self, StoreError> {
    let action_type = ActionType::from_str(&row.action_type)
      .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(ActionRecord {
      workflow_id: row.workflow_id,
      event_id: row.event_id,
      timestamp: row.timestamp,
      counterpart_id: row.counterpart_id,
      counterpart_timestamp: row.counterpart_timestamp,
      action_type,
    })
  }
}

fn missing(workflow_id: &str, event_id: &str) -> StoreError {
  StoreError::NotFound(format!("event {workflow_id}/{event_id}"))
}

fn map_unique_violation(e: sqlx::Error, what: String) -> StoreError {
  match e {
    sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists(what),
    e => StoreError::Database(e),
  }
}

#[async_trait]
impl EventStore for SqliteStore {
  async fn exists(&self, workflow_id: &str, event_id: &str) -> Result<bool, StoreError> {
    let count: i64 = sqlx::query_scalar(
      r#"
            SELECT COUNT(*) FROM events
            WHERE workflow_id = ? AND event_id = ?
            "#,
    )
    .bind(workflow_id)
    .bind(event_id)
    .fetch_one(&self.pool)
    .await?;

    Ok(count > 0)
  }

  async fn event(&self, workflow_id: &str, event_id: &str) -> Result<EventNode, StoreError> {
    let row: EventRow = sqlx::query_as(
      r#"
            SELECT workflow_id, event_id, name, uri, executed, included, pending,
                   initial_executed, initial_included, initial_pending, lock_owner
            FROM events
            WHERE workflow_id = ? AND event_id = ?
            "#,
    )
    .bind(workflow_id)
    .bind(event_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| missing(workflow_id, event_id))?;

    let roles: Vec<String> = sqlx::query_scalar(
      r#"
            SELECT role FROM event_roles
            WHERE workflow_id = ? AND event_id = ?
            "#,
    )
    .bind(workflow_id)
    .bind(event_id)
    .fetch_all(&self.pool)
    .await?;

    let relation_rows: Vec<RelationRow> = sqlx::query_as(
      r#"
            SELECT kind, target_workflow_id, target_event_id, target_uri
            FROM event_relations
            WHERE workflow_id = ? AND event_id = ?
            ORDER BY target_event_id
            "#,
    )
    .bind(workflow_id)
    .bind(event_id)
    .fetch_all(&self.pool)
    .await?;

    let uri = row
      .uri
      .parse()
      .map_err(|_| StoreError::Corrupt(format!("event uri: {}", row.uri)))?;

    let mut sets: BTreeMap<RelationKind, BTreeMap<String, Relation>> = BTreeMap::new();
    for rel in relation_rows {
      let kind = RelationKind::from_str(&rel.kind)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
      let uri = rel
        .target_uri
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("relation uri: {}", rel.target_uri)))?;
      sets.entry(kind).or_default().insert(
        rel.target_event_id.clone(),
        Relation {
          workflow_id: rel.target_workflow_id,
          event_id: rel.target_event_id,
          uri,
        },
      );
    }

    Ok(EventNode {
      workflow_id: row.workflow_id,
      event_id: row.event_id,
      name: row.name,
      uri,
      roles: roles.into_iter().collect(),
      state: EventState {
        executed: row.executed,
        included: row.included,
        pending: row.pending,
      },
      initial: EventState {
        executed: row.initial_executed,
        included: row.initial_included,
        pending: row.initial_pending,
      },
      conditions: sets.remove(&RelationKind::Condition).unwrap_or_default(),
      responses: sets.remove(&RelationKind::Response).unwrap_or_default(),
      inclusions: sets.remove(&RelationKind::Inclusion).unwrap_or_default(),
      exclusions: sets.remove(&RelationKind::Exclusion).unwrap_or_default(),
      lock_owner: row.lock_owner,
    })
  }

  async fn create_event(&self, node: &EventNode) -> Result<(), StoreError> {
    let mut tx = self.pool.begin().await?;

    sqlx::query(
      r#"
            INSERT INTO events (workflow_id, event_id, name, uri, executed, included, pending,
                                initial_executed, initial_included, initial_pending,
                                lock_owner, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(&node.workflow_id)
    .bind(&node.event_id)
    .bind(&node.name)
    .bind(node.uri.as_str())
    .bind(node.state.executed)
    .bind(node.state.included)
    .bind(node.state.pending)
    .bind(node.initial.executed)
    .bind(node.initial.included)
    .bind(node.initial.pending)
    .bind(&node.lock_owner)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await
    .map_err(|e| {
      map_unique_violation(e, format!("event {}/{}", node.workflow_id, node.event_id))
    })?;

    for role in &node.roles {
      sqlx::query(
        r#"
                INSERT INTO event_roles (workflow_id, event_id, role)
                VALUES (?, ?, ?)
                "#,
      )
      .bind(&node.workflow_id)
      .bind(&node.event_id)
      .bind(role)
      .execute(&mut *tx)
      .await?;
    }

    for kind in [
      RelationKind::Condition,
      RelationKind::Response,
      RelationKind::Inclusion,
      RelationKind::Exclusion,
    ] {
      for relation in node.relations(kind).values() {
        sqlx::query(
          r#"
                    INSERT INTO event_relations (workflow_id, event_id, kind,
                                                 target_workflow_id, target_event_id, target_uri)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
        )
        .bind(&node.workflow_id)
        .bind(&node.event_id)
        .bind(kind.as_str())
        .bind(&relation.workflow_id)
        .bind(&relation.event_id)
        .bind(relation.uri.as_str())
        .execute(&mut *tx)
        .await?;
      }
    }

    tx.commit().await?;
    Ok(())
  }

  async fn delete_event(&self, workflow_id: &str, event_id: &str) -> Result<(), StoreError> {
    let mut tx = self.pool.begin().await?;

    let result = sqlx::query(
      r#"
            DELETE FROM events WHERE workflow_id = ? AND event_id = ?
            "#,
    )
    .bind(workflow_id)
    .bind(event_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
      return Err(missing(workflow_id, event_id));
    }

    for table in ["event_roles", "event_relations", "event_history"] {
      sqlx::query(&format!(
        "DELETE FROM {table} WHERE workflow_id = ? AND event_id = ?"
      ))
      .bind(workflow_id)
      .bind(event_id)
      .execute(&mut *tx)
      .await?;
    }

    tx.commit().await?;
    Ok(())
  }

  async fn reset_event(&self, workflow_id: &str, event_id: &str) -> Result<(), StoreError> {
    let result = sqlx::query(
      r#"
            UPDATE events
            SET executed = initial_executed,
                included = initial_included,
                pending = initial_pending,
                lock_owner = NULL
            WHERE workflow_id = ? AND event_id = ?
            "#,
    )
    .bind(workflow_id)
    .bind(event_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(missing(workflow_id, event_id));
    }
    Ok(())
  }

  async fn set_executed(
    &self,
    workflow_id: &str,
    event_id: &str,
    executed: bool,
  ) -> Result<(), StoreError> {
    self
      .set_flag(workflow_id, event_id, "executed", executed)
      .await
  }

  async fn set_included(
    &self,
    workflow_id: &str,
    event_id: &str,
    included: bool,
  ) -> Result<(), StoreError> {
    self
      .set_flag(workflow_id, event_id, "included", included)
      .await
  }

  async fn set_pending(
    &self,
    workflow_id: &str,
    event_id: &str,
    pending: bool,
  ) -> Result<(), StoreError> {
    self
      .set_flag(workflow_id, event_id, "pending", pending)
      .await
  }

  async fn lock_owner(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<Option<String>, StoreError> {
    let owner: Option<Option<String>> = sqlx::query_scalar(
      r#"
            SELECT lock_owner FROM events
            WHERE workflow_id = ? AND event_id = ?
            "#,
    )
    .bind(workflow_id)
    .bind(event_id)
    .fetch_optional(&self.pool)
    .await?;

    owner.ok_or_else(|| missing(workflow_id, event_id))
  }

  async fn set_lock(
    &self,
    workflow_id: &str,
    event_id: &str,
    owner_id: &str,
  ) -> Result<(), StoreError> {
    let result = sqlx::query(
      r#"
            UPDATE events SET lock_owner = ?
            WHERE workflow_id = ? AND event_id = ?
            "#,
    )
    .bind(owner_id)
    .bind(workflow_id)
    .bind(event_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(missing(workflow_id, event_id));
    }
    Ok(())
  }

  async fn clear_lock(&self, workflow_id: &str, event_id: &str) -> Result<(), StoreError> {
    let result = sqlx::query(
      r#"
            UPDATE events SET lock_owner = NULL
            WHERE workflow_id = ? AND event_id = ?
            "#,
    )
    .bind(workflow_id)
    .bind(event_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(missing(workflow_id, event_id));
    }
    Ok(())
  }

  async fn relations(
    &self,
    workflow_id: &str,
    event_id: &str,
    kind: RelationKind,
  ) -> Result<Vec<Relation>, StoreError> {
    let rows: Vec<RelationRow> = sqlx::query_as(
      r#"
            SELECT kind, target_workflow_id, target_event_id, target_uri
            FROM event_relations
            WHERE workflow_id = ? AND event_id = ? AND kind = ?
            ORDER BY target_event_id
            "#,
    )
    .bind(workflow_id)
    .bind(event_id)
    .bind(kind.as_str())
    .fetch_all(&self.pool)
    .await?;

    rows
      .into_iter()
      .map(|rel| {
        let uri = rel
          .target_uri
          .parse()
          .map_err(|_| StoreError::Corrupt(format!("relation uri: {}", rel.target_uri)))?;
        Ok(Relation {
          workflow_id: rel.target_workflow_id,
          event_id: rel.target_event_id,
          uri,
        })
      })
      .collect()
  }

  async fn roles(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<BTreeSet<String>, StoreError> {
    let roles: Vec<String> = sqlx::query_scalar(
      r#"
            SELECT role FROM event_roles
            WHERE workflow_id = ? AND event_id = ?
            "#,
    )
    .bind(workflow_id)
    .bind(event_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(roles.into_iter().collect())
  }
}

impl SqliteStore {
  async fn set_flag(
    &self,
    workflow_id: &str,
    event_id: &str,
    column: &str,
    value: bool,
  ) -> Result<(), StoreError> {
    // column names come from the three fixed callers above, never from input
    let result = sqlx::query(&format!(
      "UPDATE events SET {column} = ? WHERE workflow_id = ? AND event_id = ?"
    ))
    .bind(value)
    .bind(workflow_id)
    .bind(event_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(missing(workflow_id, event_id));
    }
    Ok(())
  }
}

#[async_trait]
impl HistoryStore for SqliteStore {
  async fn max_timestamp(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<Option<i64>, StoreError> {
    let max: Option<i64> = sqlx::query_scalar(
      r#"
            SELECT MAX(timestamp) FROM event_history
            WHERE workflow_id = ? AND event_id = ?
            "#,
    )
    .bind(workflow_id)
    .bind(event_id)
    .fetch_one(&self.pool)
    .await?;

    Ok(max)
  }

  async fn insert_action(&self, record: &ActionRecord) -> Result<(), StoreError> {
    sqlx::query(
      r#"
            INSERT INTO event_history (workflow_id, event_id, timestamp, counterpart_id,
                                       counterpart_timestamp, action_type, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(&record.workflow_id)
    .bind(&record.event_id)
    .bind(record.timestamp)
    .bind(&record.counterpart_id)
    .bind(record.counterpart_timestamp)
    .bind(record.action_type.as_str())
    .bind(Utc::now())
    .execute(&self.pool)
    .await
    .map_err(|e| {
      map_unique_violation(
        e,
        format!(
          "action {}/{} at timestamp {}",
          record.workflow_id, record.event_id, record.timestamp
        ),
      )
    })?;

    Ok(())
  }

  async fn update_action(&self, record: &ActionRecord) -> Result<(), StoreError> {
    let result = sqlx::query(
      r#"
            UPDATE event_history
            SET counterpart_id = ?, counterpart_timestamp = ?, action_type = ?
            WHERE workflow_id = ? AND event_id = ? AND timestamp = ?
            "#,
    )
    .bind(&record.counterpart_id)
    .bind(record.counterpart_timestamp)
    .bind(record.action_type.as_str())
    .bind(&record.workflow_id)
    .bind(&record.event_id)
    .bind(record.timestamp)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(StoreError::NotFound(format!(
        "action {}/{} at timestamp {}",
        record.workflow_id, record.event_id, record.timestamp
      )));
    }
    Ok(())
  }

  async fn actions(
    &self,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<Vec<ActionRecord>, StoreError> {
    let rows: Vec<ActionRow> = sqlx::query_as(
      r#"
            SELECT workflow_id, event_id, timestamp, counterpart_id,
                   counterpart_timestamp, action_type
            FROM event_history
            WHERE workflow_id = ? AND event_id = ?
            ORDER BY timestamp
            "#,
    )
    .bind(workflow_id)
    .bind(event_id)
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(ActionRecord::try_from).collect()
  }

  async fn clear_actions(&self, workflow_id: &str, event_id: &str) -> Result<(), StoreError> {
    sqlx::query(
      r#"
            DELETE FROM event_history WHERE workflow_id = ? AND event_id = ?
            "#,
    )
    .bind(workflow_id)
    .bind(event_id)
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}
