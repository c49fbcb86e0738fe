//! Integration tests for the full execute protocol, run against a small
//! in-process cluster: every event node gets its own store, queue registry
//! and logic stack, and a routing RPC carries the calls between them.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use dcrflow_event::{
  ActionType, ConditionReply, EventDto, EventNode, EventState, LockDto, Relation,
};
use dcrflow_history::EventHistoryLogic;
use dcrflow_locking::{LockQueueRegistry, LockingConfig, LockingLogic};
use dcrflow_rpc::{EventRpc, RpcError};
use dcrflow_state::{LifecycleLogic, StateError, StateLogic};
use dcrflow_store::{EventStore, HistoryStore, MemoryStore};

const WF: &str = "wf";

fn relation(event_id: &str) -> Relation {
  Relation {
    workflow_id: WF.to_string(),
    event_id: event_id.to_string(),
    uri: "http://localhost:9000/".parse().unwrap(),
  }
}

struct NodeSpec {
  event_id: &'static str,
  executed: bool,
  included: bool,
  conditions: Vec<&'static str>,
  responses: Vec<&'static str>,
  inclusions: Vec<&'static str>,
  exclusions: Vec<&'static str>,
}

impl NodeSpec {
  fn new(event_id: &'static str) -> Self {
    Self {
      event_id,
      executed: false,
      included: true,
      conditions: Vec::new(),
      responses: Vec::new(),
      inclusions: Vec::new(),
      exclusions: Vec::new(),
    }
  }

  fn executed(mut self) -> Self {
    self.executed = true;
    self
  }

  fn excluded(mut self) -> Self {
    self.included = false;
    self
  }

  fn conditions(mut self, targets: &[&'static str]) -> Self {
    self.conditions = targets.to_vec();
    self
  }

  fn responses(mut self, targets: &[&'static str]) -> Self {
    self.responses = targets.to_vec();
    self
  }

  fn inclusions(mut self, targets: &[&'static str]) -> Self {
    self.inclusions = targets.to_vec();
    self
  }

  fn exclusions(mut self, targets: &[&'static str]) -> Self {
    self.exclusions = targets.to_vec();
    self
  }

  fn build(&self) -> EventNode {
    let collect = |ids: &[&str]| {
      ids
        .iter()
        .map(|id| (id.to_string(), relation(id)))
        .collect()
    };
    let state = EventState {
      executed: self.executed,
      included: self.included,
      pending: false,
    };
    EventNode {
      workflow_id: WF.to_string(),
      event_id: self.event_id.to_string(),
      name: self.event_id.to_uppercase(),
      uri: "http://localhost:9000/".parse().unwrap(),
      roles: BTreeSet::from(["clerk".to_string()]),
      state,
      initial: state,
      conditions: collect(&self.conditions),
      responses: collect(&self.responses),
      inclusions: collect(&self.inclusions),
      exclusions: collect(&self.exclusions),
      lock_owner: None,
    }
  }
}

#[derive(Clone)]
struct Handles {
  state: Arc<StateLogic>,
  locking: Arc<LockingLogic>,
}

/// Routes RPC calls to the in-process logic stack of the target node and
/// records every call for assertions.
#[derive(Default)]
struct Router {
  handles: StdMutex<HashMap<String, Handles>>,
  calls: StdMutex<Vec<String>>,
  fail_send_to: StdMutex<Option<String>>,
}

impl Router {
  fn register(&self, event_id: &str, handles: Handles) {
    self
      .handles
      .lock()
      .unwrap()
      .insert(event_id.to_string(), handles);
  }

  fn target(&self, event_id: &str) -> Result<Handles, RpcError> {
    self
      .handles
      .lock()
      .unwrap()
      .get(event_id)
      .cloned()
      .ok_or_else(|| RpcError::HostNotFound {
        uri: format!("test://{event_id}"),
      })
  }

  fn record(&self, call: String) {
    self.calls.lock().unwrap().push(call);
  }

  fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  fn count(&self, call: &str) -> usize {
    self.calls().iter().filter(|c| c.as_str() == call).count()
  }

  fn fail_sends_to(&self, event_id: &str) {
    *self.fail_send_to.lock().unwrap() = Some(event_id.to_string());
  }

  fn should_fail_send(&self, event_id: &str) -> bool {
    self.fail_send_to.lock().unwrap().as_deref() == Some(event_id)
  }
}

fn remote_failure(operation: &'static str) -> impl Fn(StateError) -> RpcError {
  move |_| RpcError::Rejected {
    operation,
    status: 500,
  }
}

#[async_trait]
impl EventRpc for Router {
  async fn is_executed(&self, target: &Relation, sender_id: &str) -> Result<bool, RpcError> {
    self.record(format!("is_executed:{}", target.event_id));
    let handles = self.target(&target.event_id)?;
    handles
      .state
      .is_executed(&target.workflow_id, &target.event_id, sender_id)
      .await
      .map_err(remote_failure("is_executed"))
  }

  async fn is_included(&self, target: &Relation, sender_id: &str) -> Result<bool, RpcError> {
    self.record(format!("is_included:{}", target.event_id));
    let handles = self.target(&target.event_id)?;
    handles
      .state
      .is_included(&target.workflow_id, &target.event_id, sender_id)
      .await
      .map_err(remote_failure("is_included"))
  }

  async fn check_condition(
    &self,
    target: &Relation,
    sender_id: &str,
    sender_timestamp: i64,
  ) -> Result<ConditionReply, RpcError> {
    self.record(format!("check_condition:{}", target.event_id));
    let handles = self.target(&target.event_id)?;
    handles
      .state
      .check_condition(
        &target.workflow_id,
        &target.event_id,
        sender_id,
        sender_timestamp,
      )
      .await
      .map_err(remote_failure("check_condition"))
  }

  async fn send_pending(
    &self,
    target: &Relation,
    sender_id: &str,
    sender_timestamp: i64,
  ) -> Result<i64, RpcError> {
    self.record(format!("send_pending:{}", target.event_id));
    if self.should_fail_send(&target.event_id) {
      return Err(RpcError::HostNotFound {
        uri: target.uri.to_string(),
      });
    }
    let handles = self.target(&target.event_id)?;
    handles
      .state
      .receive_pending(
        &target.workflow_id,
        &target.event_id,
        sender_id,
        sender_timestamp,
        true,
      )
      .await
      .map_err(remote_failure("send_pending"))
  }

  async fn send_included(
    &self,
    target: &Relation,
    sender_id: &str,
    sender_timestamp: i64,
  ) -> Result<i64, RpcError> {
    self.record(format!("send_included:{}", target.event_id));
    if self.should_fail_send(&target.event_id) {
      return Err(RpcError::HostNotFound {
        uri: target.uri.to_string(),
      });
    }
    let handles = self.target(&target.event_id)?;
    handles
      .state
      .receive_included(
        &target.workflow_id,
        &target.event_id,
        sender_id,
        sender_timestamp,
        true,
      )
      .await
      .map_err(remote_failure("send_included"))
  }

  async fn send_excluded(
    &self,
    target: &Relation,
    sender_id: &str,
    sender_timestamp: i64,
  ) -> Result<i64, RpcError> {
    self.record(format!("send_excluded:{}", target.event_id));
    if self.should_fail_send(&target.event_id) {
      return Err(RpcError::HostNotFound {
        uri: target.uri.to_string(),
      });
    }
    let handles = self.target(&target.event_id)?;
    handles
      .state
      .receive_included(
        &target.workflow_id,
        &target.event_id,
        sender_id,
        sender_timestamp,
        false,
      )
      .await
      .map_err(remote_failure("send_excluded"))
  }

  async fn lock(&self, target: &Relation, owner_id: &str) -> Result<(), RpcError> {
    self.record(format!("lock:{}", target.event_id));
    let handles = self.target(&target.event_id)?;
    handles
      .locking
      .lock_self(
        &target.workflow_id,
        &target.event_id,
        &LockDto {
          lock_owner: owner_id.to_string(),
        },
      )
      .await
      .map_err(|_| RpcError::Rejected {
        operation: "lock",
        status: 409,
      })
  }

  async fn unlock(&self, target: &Relation, unlocker_id: &str) -> Result<(), RpcError> {
    self.record(format!("unlock:{}", target.event_id));
    let handles = self.target(&target.event_id)?;
    handles
      .locking
      .unlock_self(&target.workflow_id, &target.event_id, unlocker_id)
      .await
      .map_err(|_| RpcError::Rejected {
        operation: "unlock",
        status: 409,
      })
  }
}

struct Node {
  store: Arc<MemoryStore>,
  state: Arc<StateLogic>,
  lifecycle: Arc<LifecycleLogic>,
}

struct Cluster {
  router: Arc<Router>,
  nodes: HashMap<String, Node>,
}

impl Cluster {
  fn new() -> Self {
    Self {
      router: Arc::new(Router::default()),
      nodes: HashMap::new(),
    }
  }

  async fn add(&mut self, spec: NodeSpec) {
    let store = Arc::new(MemoryStore::new());
    let queues = Arc::new(LockQueueRegistry::new());
    let locking = Arc::new(LockingLogic::new(
      store.clone() as Arc<dyn EventStore>,
      self.router.clone() as Arc<dyn EventRpc>,
      queues,
      LockingConfig {
        poll_interval: Duration::from_millis(5),
        wait_timeout: Duration::from_millis(500),
      },
    ));
    let history = Arc::new(EventHistoryLogic::new(
      store.clone() as Arc<dyn HistoryStore>,
    ));
    let state = Arc::new(StateLogic::new(
      store.clone() as Arc<dyn EventStore>,
      history,
      locking.clone(),
      self.router.clone() as Arc<dyn EventRpc>,
    ));
    let lifecycle = Arc::new(LifecycleLogic::new(
      store.clone() as Arc<dyn EventStore>,
      store.clone() as Arc<dyn HistoryStore>,
      locking.clone(),
    ));

    store.create_event(&spec.build()).await.unwrap();
    self.router.register(
      spec.event_id,
      Handles {
        state: state.clone(),
        locking,
      },
    );
    self.nodes.insert(
      spec.event_id.to_string(),
      Node {
        store,
        state,
        lifecycle,
      },
    );
  }

  fn node(&self, event_id: &str) -> &Node {
    &self.nodes[event_id]
  }

  async fn event(&self, event_id: &str) -> EventNode {
    self.node(event_id).store.event(WF, event_id).await.unwrap()
  }
}

fn clerk() -> Vec<String> {
  vec!["clerk".to_string()]
}

#[tokio::test]
async fn execute_commits_state_and_propagates_to_every_target() {
  let mut cluster = Cluster::new();
  cluster
    .add(
      NodeSpec::new("a")
        .responses(&["b"])
        .inclusions(&["c"])
        .exclusions(&["d"]),
    )
    .await;
  cluster.add(NodeSpec::new("b")).await;
  cluster.add(NodeSpec::new("c").excluded()).await;
  cluster.add(NodeSpec::new("d")).await;

  cluster
    .node("a")
    .state
    .execute(WF, "a", &clerk())
    .await
    .unwrap();

  let a = cluster.event("a").await;
  assert!(a.state.executed);
  assert!(!a.state.pending);

  assert!(cluster.event("b").await.state.pending);
  assert!(cluster.event("c").await.state.included);
  assert!(!cluster.event("d").await.state.included);

  // Exactly one push per target, and no lock left behind anywhere.
  assert_eq!(cluster.router.count("send_pending:b"), 1);
  assert_eq!(cluster.router.count("send_included:c"), 1);
  assert_eq!(cluster.router.count("send_excluded:d"), 1);
  for id in ["a", "b", "c", "d"] {
    assert_eq!(cluster.event(id).await.lock_owner, None, "lock left on {id}");
  }
}

#[tokio::test]
async fn execute_stamps_both_ledgers_causally() {
  let mut cluster = Cluster::new();
  cluster.add(NodeSpec::new("a").responses(&["b"])).await;
  cluster.add(NodeSpec::new("b")).await;

  cluster
    .node("a")
    .state
    .execute(WF, "a", &clerk())
    .await
    .unwrap();

  let a_actions = cluster.node("a").store.actions(WF, "a").await.unwrap();
  let sends: Vec<_> = a_actions
    .iter()
    .filter(|r| r.action_type == ActionType::SetsPending)
    .collect();
  assert_eq!(sends.len(), 1);
  assert!(sends[0].is_complete());

  let b_actions = cluster.node("b").store.actions(WF, "b").await.unwrap();
  let received: Vec<_> = b_actions
    .iter()
    .filter(|r| r.action_type == ActionType::SetPendingBy)
    .collect();
  assert_eq!(received.len(), 1);

  // The receiver's stamp is above the sender's, and the sender recorded
  // exactly the receiver's stamp as the counterpart.
  assert!(received[0].timestamp > sends[0].timestamp);
  assert_eq!(sends[0].counterpart_timestamp, received[0].timestamp);

  let types: Vec<ActionType> = a_actions.iter().map(|r| r.action_type).collect();
  assert!(types.contains(&ActionType::ExecuteStart));
  assert!(types.contains(&ActionType::ExecuteFinished));
}

#[tokio::test]
async fn unauthorized_execute_touches_nothing() {
  let mut cluster = Cluster::new();
  cluster.add(NodeSpec::new("a").responses(&["b"])).await;
  cluster.add(NodeSpec::new("b")).await;

  let err = cluster
    .node("a")
    .state
    .execute(WF, "a", &["stranger".to_string()])
    .await
    .unwrap_err();

  assert!(matches!(err, StateError::Unauthorized { .. }));
  assert!(!cluster.event("a").await.state.executed);
  assert!(
    cluster.router.calls().is_empty(),
    "no remote call may happen before authorization"
  );
}

#[tokio::test]
async fn unexecuted_included_condition_blocks_execution() {
  let mut cluster = Cluster::new();
  cluster.add(NodeSpec::new("a").conditions(&["b"])).await;
  cluster.add(NodeSpec::new("b")).await;

  let err = cluster
    .node("a")
    .state
    .execute(WF, "a", &clerk())
    .await
    .unwrap_err();
  assert!(matches!(err, StateError::NotExecutable { .. }));
  assert!(!cluster.event("a").await.state.executed);

  // Once the condition target has executed, the same execute goes through.
  cluster
    .node("b")
    .store
    .set_executed(WF, "b", true)
    .await
    .unwrap();
  cluster
    .node("a")
    .state
    .execute(WF, "a", &clerk())
    .await
    .unwrap();
  assert!(cluster.event("a").await.state.executed);
}

#[tokio::test]
async fn excluded_condition_target_does_not_block() {
  let mut cluster = Cluster::new();
  cluster.add(NodeSpec::new("a").conditions(&["b"])).await;
  cluster.add(NodeSpec::new("b").excluded()).await;

  cluster
    .node("a")
    .state
    .execute(WF, "a", &clerk())
    .await
    .unwrap();
  assert!(cluster.event("a").await.state.executed);
}

#[tokio::test]
async fn propagation_failure_is_deferred_and_locks_are_released() {
  let mut cluster = Cluster::new();
  cluster
    .add(NodeSpec::new("a").responses(&["b"]).inclusions(&["c"]))
    .await;
  cluster.add(NodeSpec::new("b")).await;
  cluster.add(NodeSpec::new("c").excluded()).await;
  cluster.router.fail_sends_to("b");

  let err = cluster
    .node("a")
    .state
    .execute(WF, "a", &clerk())
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    StateError::FailedToUpdateStateAtOther { ref target_event_id, .. } if target_event_id == "b"
  ));

  // Own state still committed, every lock released.
  assert!(cluster.event("a").await.state.executed);
  for id in ["a", "b", "c"] {
    assert_eq!(cluster.event(id).await.lock_owner, None, "lock left on {id}");
  }

  // The phase stopped at the failed target; the inclusion never went out.
  assert!(!cluster.event("c").await.state.included);
  assert_eq!(cluster.router.count("send_included:c"), 0);
}

#[tokio::test]
async fn concurrent_executes_with_overlapping_targets_terminate() {
  let mut cluster = Cluster::new();
  cluster.add(NodeSpec::new("a").responses(&["shared"])).await;
  cluster.add(NodeSpec::new("b").responses(&["shared"])).await;
  cluster.add(NodeSpec::new("shared")).await;

  let a = cluster.node("a").state.clone();
  let b = cluster.node("b").state.clone();

  let clerk_a = clerk();
  let clerk_b = clerk();
  let (ra, rb) = tokio::time::timeout(Duration::from_secs(10), async {
    tokio::join!(
      a.execute(WF, "a", &clerk_a),
      b.execute(WF, "b", &clerk_b),
    )
  })
  .await
  .expect("concurrent executes must terminate");

  // Both lock "shared" in the same sorted order, so neither can deadlock;
  // the loser simply waits its turn.
  ra.unwrap();
  rb.unwrap();
  for id in ["a", "b", "shared"] {
    assert_eq!(cluster.event(id).await.lock_owner, None, "lock left on {id}");
  }
  assert!(cluster.event("shared").await.state.pending);
}

#[tokio::test]
async fn reads_queue_behind_a_foreign_lock() {
  let mut cluster = Cluster::new();
  cluster.add(NodeSpec::new("a").executed()).await;

  cluster
    .node("a")
    .store
    .set_lock(WF, "a", "holder")
    .await
    .unwrap();

  // The holder reads straight through.
  assert!(
    cluster
      .node("a")
      .state
      .is_executed(WF, "a", "holder")
      .await
      .unwrap()
  );

  // Anyone else queues and, with the lock never clearing, times out.
  let err = cluster
    .node("a")
    .state
    .is_executed(WF, "a", "other")
    .await
    .unwrap_err();
  assert!(matches!(err, StateError::Locked { .. }));
}

#[tokio::test]
async fn state_dto_reports_computed_executability() {
  let mut cluster = Cluster::new();
  cluster.add(NodeSpec::new("a").conditions(&["b"])).await;
  cluster.add(NodeSpec::new("b")).await;

  let dto = cluster
    .node("a")
    .state
    .state_dto(WF, "a", "client")
    .await
    .unwrap();
  assert!(!dto.executable);
  assert!(dto.included);

  cluster
    .node("b")
    .store
    .set_executed(WF, "b", true)
    .await
    .unwrap();
  let dto = cluster
    .node("a")
    .state
    .state_dto(WF, "a", "client")
    .await
    .unwrap();
  assert!(dto.executable);
}

#[tokio::test]
async fn lifecycle_create_delete_and_reset() {
  let mut cluster = Cluster::new();
  cluster.add(NodeSpec::new("a").responses(&["b"])).await;
  cluster.add(NodeSpec::new("b")).await;

  // Duplicate creation is rejected.
  let duplicate = EventDto {
    workflow_id: WF.to_string(),
    event_id: "a".to_string(),
    name: "A".to_string(),
    uri: "http://localhost:9000/".parse().unwrap(),
    roles: vec!["clerk".to_string()],
    executed: false,
    included: true,
    pending: false,
    conditions: vec![],
    responses: vec![],
    inclusions: vec![],
    exclusions: vec![],
  };
  let err = cluster
    .node("a")
    .lifecycle
    .create_event(duplicate)
    .await
    .unwrap_err();
  assert!(matches!(err, StateError::EventExists { .. }));

  // Deletion is refused while a foreign lock is held.
  cluster
    .node("b")
    .store
    .set_lock(WF, "b", "someone")
    .await
    .unwrap();
  let err = cluster
    .node("b")
    .lifecycle
    .delete_event(WF, "b", "admin")
    .await
    .unwrap_err();
  assert!(matches!(err, StateError::Locked { .. }));
  cluster.node("b").store.clear_lock(WF, "b").await.unwrap();

  // Execute dirties state and history, reset restores the snapshot and
  // clears the ledger even though reset never consults the lock queue.
  cluster
    .node("a")
    .state
    .execute(WF, "a", &clerk())
    .await
    .unwrap();
  assert!(cluster.event("a").await.state.executed);
  assert!(!cluster.node("a").store.actions(WF, "a").await.unwrap().is_empty());

  cluster
    .node("a")
    .lifecycle
    .reset_event(WF, "a")
    .await
    .unwrap();
  let a = cluster.event("a").await;
  assert_eq!(a.state, a.initial);
  assert!(cluster.node("a").store.actions(WF, "a").await.unwrap().is_empty());

  // Deletion of an unlocked node succeeds and later reads report not-found.
  cluster
    .node("b")
    .lifecycle
    .delete_event(WF, "b", "admin")
    .await
    .unwrap();
  let err = cluster
    .node("b")
    .state
    .is_executed(WF, "b", "admin")
    .await
    .unwrap_err();
  assert!(matches!(err, StateError::NotFound { .. }));
}
