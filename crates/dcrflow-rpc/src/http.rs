use dcrflow_event::{ConditionReply, EventStateDto, LockDto, Relation, StampedValue};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::{EventRpc, RpcError};

/// Body of a pushed boolean state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBoolRequest {
  pub sender_id: String,
  pub timestamp: i64,
  pub value: bool,
}

/// Body of an execute request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
  pub roles: Vec<String>,
}

/// HTTP implementation of [`EventRpc`].
///
/// Each relation's URI is the target node's base address; endpoints live
/// under `events/{workflow_id}/{event_id}/`.
#[derive(Clone, Default)]
pub struct HttpEventRpc {
  client: Client,
}

impl HttpEventRpc {
  pub fn new() -> Self {
    Self {
      client: Client::new(),
    }
  }

  fn endpoint(&self, base: &Url, wf: &str, ev: &str, tail: &str) -> Result<Url, RpcError> {
    let mut url = base.clone();
    {
      let mut segments = url
        .path_segments_mut()
        .map_err(|_| RpcError::InvalidAddress {
          uri: base.to_string(),
        })?;
      segments.pop_if_empty();
      segments.extend(["events", wf, ev, tail]);
    }
    Ok(url)
  }

  async fn parse<T: DeserializeOwned>(
    &self,
    operation: &'static str,
    response: Response,
  ) -> Result<T, RpcError> {
    let status = response.status();
    if !status.is_success() {
      return Err(RpcError::Rejected {
        operation,
        status: status.as_u16(),
      });
    }
    response
      .json()
      .await
      .map_err(|e| RpcError::InvalidReply {
        operation,
        message: e.to_string(),
      })
  }

  fn check(&self, operation: &'static str, response: &Response) -> Result<(), RpcError> {
    let status = response.status();
    if !status.is_success() {
      return Err(RpcError::Rejected {
        operation,
        status: status.as_u16(),
      });
    }
    Ok(())
  }

  async fn push_bool(
    &self,
    operation: &'static str,
    tail: &str,
    target: &Relation,
    sender_id: &str,
    sender_timestamp: i64,
    value: bool,
  ) -> Result<i64, RpcError> {
    let url = self.endpoint(&target.uri, &target.workflow_id, &target.event_id, tail)?;
    debug!(uri = %url, sender_id, operation, "pushing state change");

    let body = UpdateBoolRequest {
      sender_id: sender_id.to_string(),
      timestamp: sender_timestamp,
      value,
    };
    let response = self
      .client
      .put(url.clone())
      .json(&body)
      .send()
      .await
      .map_err(|e| transport(&url, e))?;

    self.parse(operation, response).await
  }

  async fn get_bool(
    &self,
    operation: &'static str,
    tail: &str,
    target: &Relation,
    sender_id: &str,
  ) -> Result<bool, RpcError> {
    let mut url = self.endpoint(&target.uri, &target.workflow_id, &target.event_id, tail)?;
    url.query_pairs_mut().append_pair("sender", sender_id);
    debug!(uri = %url, sender_id, operation, "querying remote state");

    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| transport(&url, e))?;

    self.parse(operation, response).await
  }
}

fn transport(uri: &Url, e: reqwest::Error) -> RpcError {
  if e.is_connect() || e.is_timeout() {
    RpcError::HostNotFound {
      uri: uri.to_string(),
    }
  } else {
    RpcError::Transport(e)
  }
}

#[async_trait::async_trait]
impl EventRpc for HttpEventRpc {
  async fn is_executed(&self, target: &Relation, sender_id: &str) -> Result<bool, RpcError> {
    self
      .get_bool("is_executed", "executed", target, sender_id)
      .await
  }

  async fn is_included(&self, target: &Relation, sender_id: &str) -> Result<bool, RpcError> {
    self
      .get_bool("is_included", "included", target, sender_id)
      .await
  }

  async fn check_condition(
    &self,
    target: &Relation,
    sender_id: &str,
    sender_timestamp: i64,
  ) -> Result<ConditionReply, RpcError> {
    let url = self.endpoint(
      &target.uri,
      &target.workflow_id,
      &target.event_id,
      "condition-checks",
    )?;
    debug!(uri = %url, sender_id, "checking remote condition");

    let body = StampedValue {
      sender_id: sender_id.to_string(),
      timestamp: sender_timestamp,
    };
    let response = self
      .client
      .post(url.clone())
      .json(&body)
      .send()
      .await
      .map_err(|e| transport(&url, e))?;

    self.parse("check_condition", response).await
  }

  async fn send_pending(
    &self,
    target: &Relation,
    sender_id: &str,
    sender_timestamp: i64,
  ) -> Result<i64, RpcError> {
    self
      .push_bool(
        "send_pending",
        "pending",
        target,
        sender_id,
        sender_timestamp,
        true,
      )
      .await
  }

  async fn send_included(
    &self,
    target: &Relation,
    sender_id: &str,
    sender_timestamp: i64,
  ) -> Result<i64, RpcError> {
    self
      .push_bool(
        "send_included",
        "included",
        target,
        sender_id,
        sender_timestamp,
        true,
      )
      .await
  }

  async fn send_excluded(
    &self,
    target: &Relation,
    sender_id: &str,
    sender_timestamp: i64,
  ) -> Result<i64, RpcError> {
    self
      .push_bool(
        "send_excluded",
        "included",
        target,
        sender_id,
        sender_timestamp,
        false,
      )
      .await
  }

  async fn lock(&self, target: &Relation, owner_id: &str) -> Result<(), RpcError> {
    let url = self.endpoint(&target.uri, &target.workflow_id, &target.event_id, "lock")?;
    debug!(uri = %url, owner_id, "acquiring remote lock");

    let body = LockDto {
      lock_owner: owner_id.to_string(),
    };
    let response = self
      .client
      .post(url.clone())
      .json(&body)
      .send()
      .await
      .map_err(|e| transport(&url, e))?;

    self.check("lock", &response)
  }

  async fn unlock(&self, target: &Relation, unlocker_id: &str) -> Result<(), RpcError> {
    let mut url = self.endpoint(&target.uri, &target.workflow_id, &target.event_id, "lock")?;
    url.query_pairs_mut().append_pair("unlocker", unlocker_id);
    debug!(uri = %url, unlocker_id, "releasing remote lock");

    let response = self
      .client
      .delete(url.clone())
      .send()
      .await
      .map_err(|e| transport(&url, e))?;

    self.check("unlock", &response)
  }
}

// Client-side operations outside the node-to-node protocol, used by the CLI.
impl HttpEventRpc {
  /// Fetch a node's externally visible state.
  pub async fn state(
    &self,
    base: &Url,
    workflow_id: &str,
    event_id: &str,
    sender_id: &str,
  ) -> Result<EventStateDto, RpcError> {
    let mut url = self.endpoint(base, workflow_id, event_id, "state")?;
    url.query_pairs_mut().append_pair("sender", sender_id);

    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| transport(&url, e))?;

    self.parse("state", response).await
  }

  /// Ask a node to execute with the given role claim.
  pub async fn execute(
    &self,
    base: &Url,
    workflow_id: &str,
    event_id: &str,
    roles: Vec<String>,
  ) -> Result<(), RpcError> {
    let url = self.endpoint(base, workflow_id, event_id, "execute")?;

    let response = self
      .client
      .post(url.clone())
      .json(&ExecuteRequest { roles })
      .send()
      .await
      .map_err(|e| transport(&url, e))?;

    self.check("execute", &response)
  }

  /// Fetch a node's causal history graph as JSON.
  pub async fn history(
    &self,
    base: &Url,
    workflow_id: &str,
    event_id: &str,
  ) -> Result<serde_json::Value, RpcError> {
    let url = self.endpoint(base, workflow_id, event_id, "history")?;

    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| transport(&url, e))?;

    self.parse("history", response).await
  }
}
