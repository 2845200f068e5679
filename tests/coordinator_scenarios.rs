//! End-to-end coordinator scenarios driven through the model manager.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, unbounded};

use convergence_server::{
    AppliedDiscreteOperation, AppliedOperation, ArrayValue, ClientConcurrencyControl,
    CollectionId, DataValue, DiscreteOperation, DoubleValue, ForceCloseReason, LoadedModel,
    MemoryModelStore, ModelId, ModelManager, ModelOperation, ModelRequest, ModelStore,
    ObjectValue, OpenError, OpenSuccess, Operation, RealtimeConfig, SessionEvent, SessionId,
    Snapshot, SnapshotConfig, StoreError, StringValue, SubmitError, ValueId, ValueTree,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn vid(s: &str) -> ValueId {
    ValueId::new(s).unwrap()
}

fn model_id() -> ModelId {
    ModelId::new("m1").unwrap()
}

fn collection() -> CollectionId {
    CollectionId::new("tests").unwrap()
}

/// Root `{"s": "AB"}` with fixed vids: root `0:0`, string `s1`.
fn string_root() -> ObjectValue {
    ObjectValue {
        vid: vid("0:0"),
        children: BTreeMap::from([(
            "s".to_string(),
            DataValue::String(StringValue {
                vid: vid("s1"),
                value: "AB".into(),
            }),
        )]),
    }
}

/// Root `{"arr": [1.0, 2.0, 3.0]}` with array vid `a1`.
fn array_root() -> ObjectValue {
    let children = [1.0, 2.0, 3.0]
        .iter()
        .enumerate()
        .map(|(i, value)| {
            DataValue::Double(DoubleValue {
                vid: vid(&format!("d{i}")),
                value: *value,
            })
        })
        .collect();
    ObjectValue {
        vid: vid("0:0"),
        children: BTreeMap::from([(
            "arr".to_string(),
            DataValue::Array(ArrayValue {
                vid: vid("a1"),
                children,
            }),
        )]),
    }
}

/// Store wrapper counting `create_model` invocations.
struct CountingStore {
    inner: MemoryModelStore,
    creates: AtomicU64,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: MemoryModelStore::new(),
            creates: AtomicU64::new(0),
        }
    }

    fn create_calls(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
    }
}

impl ModelStore for CountingStore {
    fn load_model(&self, id: &ModelId) -> Result<Option<LoadedModel>, StoreError> {
        self.inner.load_model(id)
    }

    fn load_operations(
        &self,
        id: &ModelId,
        from_version_excl: u64,
    ) -> Result<convergence_server::daemon::store::OperationStream, StoreError> {
        self.inner.load_operations(id, from_version_excl)
    }

    fn create_model(
        &self,
        id: &ModelId,
        collection_id: &CollectionId,
        root: &ObjectValue,
        created_at: i64,
    ) -> Result<(), StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_model(id, collection_id, root, created_at)
    }

    fn append_operation(&self, op: &ModelOperation) -> Result<(), StoreError> {
        self.inner.append_operation(op)
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.inner.write_snapshot(snapshot)
    }

    fn delete_model(&self, id: &ModelId) -> Result<(), StoreError> {
        self.inner.delete_model(id)
    }
}

struct TestSession {
    id: SessionId,
    tx: Sender<SessionEvent>,
    rx: Receiver<SessionEvent>,
}

impl TestSession {
    fn new(name: &str) -> Self {
        let (tx, rx) = unbounded();
        Self {
            id: SessionId::new(name).unwrap(),
            tx,
            rx,
        }
    }

    fn recv(&self) -> SessionEvent {
        self.rx
            .recv_timeout(RECV_TIMEOUT)
            .expect("expected a session event")
    }

    /// Receive, skipping participant open/close notifications.
    fn recv_data(&self) -> SessionEvent {
        loop {
            match self.recv() {
                SessionEvent::ParticipantOpened { .. } | SessionEvent::ParticipantClosed { .. } => {
                }
                event => return event,
            }
        }
    }
}

fn manager_with(store: Arc<dyn ModelStore>) -> Arc<ModelManager> {
    Arc::new(ModelManager::new(
        store,
        RealtimeConfig {
            handshake_timeout_ms: 3_000,
            data_request_timeout_ms: 200,
            linger_timeout_ms: 100,
        },
        SnapshotConfig::default(),
        collection(),
    ))
}

/// Seed a model whose version is 1: created root plus one recorded set.
fn seed_string_model(store: &dyn ModelStore) {
    store
        .create_model(&model_id(), &collection(), &string_root(), 1_000)
        .unwrap();
    store
        .append_operation(&ModelOperation {
            model_id: model_id(),
            version: 1,
            timestamp: 1_001,
            session_id: SessionId::new("seed").unwrap(),
            op: AppliedOperation::Discrete(AppliedDiscreteOperation::StringSet {
                vid: vid("s1"),
                no_op: false,
                value: "AB".into(),
                old_value: "AB".into(),
            }),
        })
        .unwrap();
}

fn open(manager: &Arc<ModelManager>, session: &TestSession) -> OpenSuccess {
    manager
        .open(&model_id(), &session.id, session.tx.clone())
        .expect("open should succeed")
}

fn submit(manager: &Arc<ModelManager>, session: &TestSession, seq: u32, ctx: u64, op: DiscreteOperation) {
    assert!(manager.route(
        &model_id(),
        ModelRequest::Submit {
            session_id: session.id.clone(),
            seq,
            context_version: ctx,
            op: Operation::Discrete(op),
        },
    ));
}

fn string_insert(index: usize, value: &str) -> DiscreteOperation {
    DiscreteOperation::StringInsert {
        vid: vid("s1"),
        no_op: false,
        index,
        value: value.into(),
    }
}

#[test]
fn concurrent_string_inserts_at_same_index() {
    let store = Arc::new(MemoryModelStore::new());
    seed_string_model(store.as_ref());
    let manager = manager_with(store);

    let alpha = TestSession::new("alpha");
    let beta = TestSession::new("beta");
    let opened = open(&manager, &alpha);
    assert_eq!(opened.meta.version, 1);
    open(&manager, &beta);

    // Both submit against version 1; alpha arrives first.
    submit(&manager, &alpha, 1, 1, string_insert(1, "X"));
    submit(&manager, &beta, 1, 1, string_insert(1, "Y"));

    // Alpha: own ack at version 2, then beta's transformed op at version 3.
    match alpha.recv_data() {
        SessionEvent::Ack { seq: 1, version, .. } => assert_eq!(version, 2),
        other => panic!("expected ack, got {other:?}"),
    }
    match alpha.recv_data() {
        SessionEvent::RemoteOperation { version, op, .. } => {
            assert_eq!(version, 3);
            assert_eq!(op, Operation::Discrete(string_insert(2, "Y")));
        }
        other => panic!("expected remote op, got {other:?}"),
    }

    // Beta: alpha's op unchanged at version 2, then its own ack at 3.
    match beta.recv_data() {
        SessionEvent::RemoteOperation {
            version,
            op,
            session_id,
            ..
        } => {
            assert_eq!(version, 2);
            assert_eq!(session_id, alpha.id);
            assert_eq!(op, Operation::Discrete(string_insert(1, "X")));
        }
        other => panic!("expected remote op, got {other:?}"),
    }
    match beta.recv_data() {
        SessionEvent::Ack { seq: 1, version, .. } => assert_eq!(version, 3),
        other => panic!("expected ack, got {other:?}"),
    }

    // A late observer sees the converged document.
    let omega = TestSession::new("omega");
    let opened = open(&manager, &omega);
    assert_eq!(opened.meta.version, 3);
    match opened.root.children.get("s") {
        Some(DataValue::String(s)) => assert_eq!(s.value, "AXYB"),
        other => panic!("expected string, got {other:?}"),
    }
}

#[test]
fn cold_start_creates_model_from_client_data() {
    let store = Arc::new(CountingStore::new());
    let manager = manager_with(store.clone());

    let gamma = TestSession::new("gamma");
    let opener = {
        let manager = Arc::clone(&manager);
        let id = gamma.id.clone();
        let tx = gamma.tx.clone();
        thread::spawn(move || manager.open(&model_id(), &id, tx))
    };

    match gamma.recv() {
        SessionEvent::DataRequest { model_id: m } => assert_eq!(m, model_id()),
        other => panic!("expected data request, got {other:?}"),
    }
    assert!(manager.route(
        &model_id(),
        ModelRequest::DataResponse {
            session_id: gamma.id.clone(),
            root: string_root(),
        },
    ));

    let opened = opener.join().unwrap().expect("cold start open");
    assert_eq!(opened.meta.version, 0);
    assert_eq!(opened.root, string_root());

    let loaded = store.load_model(&model_id()).unwrap().unwrap();
    assert_eq!(loaded.meta.version, 0);
    assert_eq!(loaded.snapshot_version, 0);
    assert_eq!(loaded.root, string_root());
    assert_eq!(store.create_calls(), 1);
}

#[test]
fn cold_start_timeout_fails_opener_without_creating() {
    let store = Arc::new(CountingStore::new());
    let manager = manager_with(store.clone());

    let gamma = TestSession::new("gamma");
    let err = manager
        .open(&model_id(), &gamma.id, gamma.tx.clone())
        .unwrap_err();
    assert_eq!(err, OpenError::DataRequestTimeout);
    assert!(store.load_model(&model_id()).unwrap().is_none());
    assert_eq!(store.create_calls(), 0);
}

#[test]
fn second_opener_queues_during_cold_start() {
    let store = Arc::new(CountingStore::new());
    let manager = manager_with(store.clone());

    let gamma = TestSession::new("gamma");
    let delta = TestSession::new("delta");

    let gamma_open = {
        let manager = Arc::clone(&manager);
        let id = gamma.id.clone();
        let tx = gamma.tx.clone();
        thread::spawn(move || manager.open(&model_id(), &id, tx))
    };
    match gamma.recv() {
        SessionEvent::DataRequest { .. } => {}
        other => panic!("expected data request, got {other:?}"),
    }

    let delta_open = {
        let manager = Arc::clone(&manager);
        let id = delta.id.clone();
        let tx = delta.tx.clone();
        thread::spawn(move || manager.open(&model_id(), &id, tx))
    };
    // The queued opener is asked as well.
    match delta.recv() {
        SessionEvent::DataRequest { .. } => {}
        other => panic!("expected data request, got {other:?}"),
    }

    assert!(manager.route(
        &model_id(),
        ModelRequest::DataResponse {
            session_id: gamma.id.clone(),
            root: string_root(),
        },
    ));

    let gamma_opened = gamma_open.join().unwrap().expect("gamma open");
    let delta_opened = delta_open.join().unwrap().expect("delta open");
    assert_eq!(gamma_opened.meta.version, 0);
    assert_eq!(delta_opened.meta.version, 0);
    assert_eq!(gamma_opened.root, delta_opened.root);
    assert_eq!(store.create_calls(), 1);
}

#[test]
fn submissions_during_cold_start_are_rejected_as_transient() {
    let store = Arc::new(MemoryModelStore::new());
    let manager = manager_with(store);

    let gamma = TestSession::new("gamma");
    let opener = {
        let manager = Arc::clone(&manager);
        let id = gamma.id.clone();
        let tx = gamma.tx.clone();
        thread::spawn(move || manager.open(&model_id(), &id, tx))
    };
    match gamma.recv() {
        SessionEvent::DataRequest { .. } => {}
        other => panic!("expected data request, got {other:?}"),
    }

    submit(&manager, &gamma, 9, 0, string_insert(0, "nope"));
    match gamma.recv() {
        SessionEvent::SubmitRejected { seq: 9, error } => {
            assert_eq!(error, SubmitError::NotInitialized);
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    assert!(manager.route(
        &model_id(),
        ModelRequest::DataResponse {
            session_id: gamma.id.clone(),
            root: string_root(),
        },
    ));
    opener.join().unwrap().expect("open after rejection");
}

#[test]
fn duplicate_open_is_rejected_without_disturbing_the_first() {
    let store = Arc::new(MemoryModelStore::new());
    seed_string_model(store.as_ref());
    let manager = manager_with(store);

    let alpha = TestSession::new("alpha");
    open(&manager, &alpha);
    let err = manager
        .open(&model_id(), &alpha.id, alpha.tx.clone())
        .unwrap_err();
    assert_eq!(err, OpenError::AlreadyOpen);

    // The original participation still works.
    submit(&manager, &alpha, 1, 1, string_insert(0, "!"));
    match alpha.recv_data() {
        SessionEvent::Ack { version, .. } => assert_eq!(version, 2),
        other => panic!("expected ack, got {other:?}"),
    }
}

#[test]
fn invalid_operation_force_closes_every_participant() {
    let store = Arc::new(MemoryModelStore::new());
    store
        .create_model(&model_id(), &collection(), &array_root(), 1_000)
        .unwrap();
    let manager = manager_with(store.clone());

    let epsilon = TestSession::new("epsilon");
    let zeta = TestSession::new("zeta");
    open(&manager, &epsilon);
    open(&manager, &zeta);

    submit(
        &manager,
        &epsilon,
        1,
        0,
        DiscreteOperation::ArrayRemove {
            vid: vid("a1"),
            no_op: false,
            index: 7,
        },
    );

    match epsilon.recv_data() {
        SessionEvent::ForceClose { reason } => assert_eq!(reason, ForceCloseReason::Internal),
        other => panic!("expected force close, got {other:?}"),
    }
    match zeta.recv_data() {
        SessionEvent::ForceClose { reason } => assert_eq!(reason, ForceCloseReason::Internal),
        other => panic!("expected force close, got {other:?}"),
    }

    // The bad operation was never appended.
    let loaded = store.load_model(&model_id()).unwrap().unwrap();
    assert_eq!(loaded.meta.version, 0);
    assert_eq!(store.load_operations(&model_id(), 0).unwrap().count(), 0);
}

#[test]
fn invalid_context_version_closes_only_the_submitter() {
    let store = Arc::new(MemoryModelStore::new());
    seed_string_model(store.as_ref());
    let manager = manager_with(store);

    let alpha = TestSession::new("alpha");
    let beta = TestSession::new("beta");
    open(&manager, &alpha);
    open(&manager, &beta);

    // Context version 9 is ahead of model version 1.
    submit(&manager, &alpha, 1, 9, string_insert(0, "x"));
    match alpha.recv_data() {
        SessionEvent::ForceClose { reason } => {
            assert_eq!(reason, ForceCloseReason::InvalidContextVersion);
        }
        other => panic!("expected force close, got {other:?}"),
    }

    // Beta stays open and functional.
    submit(&manager, &beta, 1, 1, string_insert(0, "y"));
    match beta.recv_data() {
        SessionEvent::Ack { version, .. } => assert_eq!(version, 2),
        other => panic!("expected ack, got {other:?}"),
    }
}

#[test]
fn delete_while_open_force_closes_and_cascades() {
    let store = Arc::new(MemoryModelStore::new());
    seed_string_model(store.as_ref());
    let manager = manager_with(store.clone());

    let alpha = TestSession::new("alpha");
    let beta = TestSession::new("beta");
    open(&manager, &alpha);
    open(&manager, &beta);

    manager.delete(&model_id()).unwrap();

    match alpha.recv_data() {
        SessionEvent::ForceClose { reason } => assert_eq!(reason, ForceCloseReason::Deleted),
        other => panic!("expected force close, got {other:?}"),
    }
    match beta.recv_data() {
        SessionEvent::ForceClose { reason } => assert_eq!(reason, ForceCloseReason::Deleted),
        other => panic!("expected force close, got {other:?}"),
    }

    // Cascade removed the model, its log, and its snapshots.
    let deadline = std::time::Instant::now() + RECV_TIMEOUT;
    loop {
        if store.load_model(&model_id()).unwrap().is_none() {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "cascade delete timed out");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn linger_expiry_writes_a_final_snapshot() {
    let store = Arc::new(MemoryModelStore::new());
    seed_string_model(store.as_ref());
    let manager = manager_with(store.clone());

    let alpha = TestSession::new("alpha");
    open(&manager, &alpha);
    submit(&manager, &alpha, 1, 1, string_insert(1, "Z"));
    match alpha.recv_data() {
        SessionEvent::Ack { version, .. } => assert_eq!(version, 2),
        other => panic!("expected ack, got {other:?}"),
    }
    manager.close(&model_id(), &alpha.id).unwrap();

    // After the linger window the coordinator snapshots and shuts down.
    let deadline = std::time::Instant::now() + RECV_TIMEOUT;
    loop {
        let loaded = store.load_model(&model_id()).unwrap().unwrap();
        if loaded.snapshot_version == 2 {
            match loaded.root.children.get("s") {
                Some(DataValue::String(s)) => assert_eq!(s.value, "AZB"),
                other => panic!("expected string, got {other:?}"),
            }
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "final snapshot never appeared"
        );
        thread::sleep(Duration::from_millis(10));
    }
}

/// The convergence invariant: participants that reconstruct the document
/// locally through their client concurrency control end up with the
/// coordinator's tree.
#[test]
fn participants_converge_with_the_server_tree() {
    let store = Arc::new(MemoryModelStore::new());
    seed_string_model(store.as_ref());
    let manager = manager_with(store);

    let alpha = TestSession::new("alpha");
    let beta = TestSession::new("beta");
    let alpha_opened = open(&manager, &alpha);
    let beta_opened = open(&manager, &beta);

    let mut alpha_tree = ValueTree::new(alpha_opened.root).unwrap();
    let mut beta_tree = ValueTree::new(beta_opened.root).unwrap();
    let mut alpha_ccc = ClientConcurrencyControl::new(alpha_opened.meta.version);
    let mut beta_ccc = ClientConcurrencyControl::new(beta_opened.meta.version);

    // Alpha and beta edit concurrently: both reference version 1.
    let alpha_op = string_insert(1, "X");
    alpha_tree.apply(&alpha_op).unwrap();
    let ctx = alpha_ccc.submit(Operation::Discrete(alpha_op.clone()));
    submit(&manager, &alpha, 1, ctx, alpha_op);

    let beta_op = string_insert(1, "Y");
    beta_tree.apply(&beta_op).unwrap();
    let ctx = beta_ccc.submit(Operation::Discrete(beta_op.clone()));
    submit(&manager, &beta, 1, ctx, beta_op);

    // Each participant sees exactly two data events: one ack, one remote.
    for _ in 0..2 {
        match alpha.recv_data() {
            SessionEvent::Ack { .. } => {
                alpha_ccc.on_ack().unwrap();
            }
            SessionEvent::RemoteOperation { op, .. } => {
                let rebased = alpha_ccc.on_remote(&op).unwrap();
                apply_to(&mut alpha_tree, &rebased);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    for _ in 0..2 {
        match beta.recv_data() {
            SessionEvent::Ack { .. } => {
                beta_ccc.on_ack().unwrap();
            }
            SessionEvent::RemoteOperation { op, .. } => {
                let rebased = beta_ccc.on_remote(&op).unwrap();
                apply_to(&mut beta_tree, &rebased);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    assert_eq!(alpha_ccc.context_version(), 3);
    assert_eq!(beta_ccc.context_version(), 3);

    // Both locally reconstructed trees equal the coordinator's tree.
    let omega = TestSession::new("omega");
    let server = open(&manager, &omega);
    assert_eq!(alpha_tree.materialize(), server.root);
    assert_eq!(beta_tree.materialize(), server.root);
}

fn apply_to(tree: &mut ValueTree, op: &Operation) {
    match op {
        Operation::Discrete(op) => {
            tree.apply(op).unwrap();
        }
        Operation::Compound(compound) => {
            for sub in &compound.ops {
                tree.apply(sub).unwrap();
            }
        }
    }
}
