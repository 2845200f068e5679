//! The realtime model coordinator.
//!
//! One coordinator owns one model: the live tree, the server concurrency
//! control, the participant set, and the snapshot policy. It is driven by a
//! single consumer thread over an inbound channel, so at most one message
//! per model is ever being processed; this loop is the serialization point
//! that makes assigned versions a total order.
//!
//! Lifecycle: uninitialized until the first open, then either loaded from
//! storage or cold-started by asking the opening clients for the initial
//! document. After the last close a linger timer runs; on expiry the
//! coordinator writes a final snapshot if needed and shuts down. Any
//! engine-fatal error force-closes every participant and terminates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, after};
use crossbeam::select;
use tracing::{debug, error, info, warn};

use crate::config::RealtimeConfig;
use crate::core::{
    AppliedOperation, ApplyError, CollectionId, ConcurrencyError, ModelId, ObjectValue, Operation,
    ProcessedOperation, ServerConcurrencyControl, SessionId, ValueTree,
};

use super::clock::Clock;
use super::messages::{
    CloseError, ForceCloseReason, ModelRequest, OpenError, OpenRequest, OpenSuccess, SessionEvent,
    SubmitError,
};
use super::session::{Participants, SessionHandle};
use super::snapshot::{SnapshotConfig, SnapshotPolicy};
use super::store::{ModelMetaData, ModelOperation, ModelStore, Snapshot};

struct PendingOpen {
    handle: SessionHandle,
    reply: Sender<Result<OpenSuccess, OpenError>>,
    deadline: Instant,
}

/// Everything that only exists once the model is initialized.
struct LiveModel {
    tree: ValueTree,
    meta: ModelMetaData,
    scc: ServerConcurrencyControl,
    policy: SnapshotPolicy,
}

enum State {
    Uninitialized,
    /// Cold start: waiting for an opener to supply the initial document.
    DataRequested { openers: Vec<PendingOpen> },
    Initialized(Box<LiveModel>),
    Shutdown,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Uninitialized => "uninitialized",
            State::DataRequested { .. } => "data-requested",
            State::Initialized(_) => "initialized",
            State::Shutdown => "shutdown",
        }
    }
}

pub struct RealtimeModelCoordinator {
    model_id: ModelId,
    collection_id: CollectionId,
    store: Arc<dyn ModelStore>,
    config: RealtimeConfig,
    snapshot_config: SnapshotConfig,
    clock: Clock,
    state: State,
    participants: Participants,
    linger_deadline: Option<Instant>,
}

impl RealtimeModelCoordinator {
    pub fn new(
        model_id: ModelId,
        collection_id: CollectionId,
        store: Arc<dyn ModelStore>,
        config: RealtimeConfig,
        snapshot_config: SnapshotConfig,
    ) -> Self {
        Self {
            model_id,
            collection_id,
            store,
            config,
            snapshot_config,
            clock: Clock::new(),
            state: State::Uninitialized,
            participants: Participants::new(),
            linger_deadline: None,
        }
    }

    /// Drive the coordinator until shutdown. This is the serialization
    /// point: every message about this model passes through here.
    pub fn run(mut self, rx: Receiver<ModelRequest>) {
        info!(model = %self.model_id, "coordinator started");
        loop {
            if matches!(self.state, State::Shutdown) {
                break;
            }
            match self.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    let timer = after(wait);
                    select! {
                        recv(rx) -> msg => match msg {
                            Ok(msg) => self.handle(msg),
                            Err(_) => {
                                self.on_inbound_closed();
                                break;
                            }
                        },
                        recv(timer) -> _ => {}
                    }
                }
                None => match rx.recv() {
                    Ok(msg) => self.handle(msg),
                    Err(_) => {
                        self.on_inbound_closed();
                        break;
                    }
                },
            }
            self.on_tick(Instant::now());
        }
        info!(model = %self.model_id, "coordinator terminated");
    }

    fn handle(&mut self, msg: ModelRequest) {
        match msg {
            ModelRequest::Open(req) => self.on_open(req),
            ModelRequest::Close { session_id, reply } => self.on_close(&session_id, reply),
            ModelRequest::Submit {
                session_id,
                seq,
                context_version,
                op,
            } => self.on_submit(&session_id, seq, context_version, op),
            ModelRequest::DataResponse { session_id, root } => {
                self.on_data_response(&session_id, root)
            }
            ModelRequest::ReferenceUpdate {
                session_id,
                payload,
            } => {
                if matches!(self.state, State::Initialized(_))
                    && self.participants.contains(&session_id)
                {
                    self.participants.broadcast_except(
                        Some(&session_id),
                        &SessionEvent::Reference {
                            session_id: session_id.clone(),
                            payload,
                        },
                    );
                }
            }
            ModelRequest::Deleted => self.on_deleted(),
        }
    }

    // ---- open ----------------------------------------------------------

    fn on_open(&mut self, req: OpenRequest) {
        let OpenRequest {
            session_id,
            events,
            reply,
        } = req;
        if self.participants.contains(&session_id) || self.is_pending_opener(&session_id) {
            let _ = reply.send(Err(OpenError::AlreadyOpen));
            return;
        }

        if matches!(self.state, State::Shutdown) {
            let _ = reply.send(Err(OpenError::ShuttingDown));
            return;
        }
        if matches!(self.state, State::Initialized(_)) {
            self.linger_deadline = None;
            self.admit(session_id, events, reply);
            return;
        }
        if matches!(self.state, State::Uninitialized) {
            self.first_open(session_id, events, reply);
            return;
        }

        // Cold start in flight: late arrivals also get asked; the first
        // valid response wins for all of them.
        let _ = events.send(SessionEvent::DataRequest {
            model_id: self.model_id.clone(),
        });
        let deadline = Instant::now() + Duration::from_millis(self.config.data_request_timeout_ms);
        if let State::DataRequested { openers } = &mut self.state {
            openers.push(PendingOpen {
                handle: SessionHandle::new(session_id, events),
                reply,
                deadline,
            });
        }
    }

    fn first_open(
        &mut self,
        session_id: SessionId,
        events: Sender<SessionEvent>,
        reply: Sender<Result<OpenSuccess, OpenError>>,
    ) {
        debug!(model = %self.model_id, "loading");
        match self.store.load_model(&self.model_id) {
            Ok(Some(loaded)) => match self.replay(loaded.root, loaded.snapshot_version) {
                Ok(tree) => {
                    let live = LiveModel {
                        scc: ServerConcurrencyControl::new(loaded.meta.version),
                        policy: SnapshotPolicy::new(
                            self.snapshot_config.clone(),
                            loaded.snapshot_version,
                        ),
                        meta: loaded.meta,
                        tree,
                    };
                    self.state = State::Initialized(Box::new(live));
                    self.admit(session_id, events, reply);
                }
                Err(reason) => {
                    error!(model = %self.model_id, %reason, "load failed");
                    let _ = reply.send(Err(OpenError::Storage { reason }));
                    self.state = State::Shutdown;
                }
            },
            Ok(None) => {
                debug!(model = %self.model_id, "model absent, requesting data from opener");
                let _ = events.send(SessionEvent::DataRequest {
                    model_id: self.model_id.clone(),
                });
                self.state = State::DataRequested {
                    openers: vec![PendingOpen {
                        handle: SessionHandle::new(session_id, events),
                        reply,
                        deadline: Instant::now()
                            + Duration::from_millis(self.config.data_request_timeout_ms),
                    }],
                };
            }
            Err(err) => {
                error!(model = %self.model_id, %err, "load failed");
                let _ = reply.send(Err(OpenError::Storage {
                    reason: err.to_string(),
                }));
                self.state = State::Shutdown;
            }
        }
    }

    /// Fold the operation log after `snapshot_version` into the snapshot.
    fn replay(&self, root: ObjectValue, snapshot_version: u64) -> Result<ValueTree, String> {
        let mut tree = ValueTree::new(root).map_err(|err| err.to_string())?;
        let ops = self
            .store
            .load_operations(&self.model_id, snapshot_version)
            .map_err(|err| err.to_string())?;
        for entry in ops {
            let entry = entry.map_err(|err| err.to_string())?;
            apply_operation(&mut tree, &entry.op.to_operation()).map_err(|err| err.to_string())?;
        }
        Ok(tree)
    }

    fn admit(
        &mut self,
        session_id: SessionId,
        events: Sender<SessionEvent>,
        reply: Sender<Result<OpenSuccess, OpenError>>,
    ) {
        let State::Initialized(live) = &mut self.state else {
            let _ = reply.send(Err(OpenError::ShuttingDown));
            return;
        };
        live.scc.attach_session(session_id.clone());
        let success = OpenSuccess {
            root: live.tree.materialize(),
            meta: live.meta.clone(),
            participants: self.participants.session_ids(),
        };
        self.participants
            .insert(SessionHandle::new(session_id.clone(), events));
        let _ = reply.send(Ok(success));
        self.participants.broadcast_except(
            Some(&session_id),
            &SessionEvent::ParticipantOpened {
                session_id: session_id.clone(),
            },
        );
        debug!(model = %self.model_id, session = %session_id, "participant opened");
    }

    fn is_pending_opener(&self, session_id: &SessionId) -> bool {
        match &self.state {
            State::DataRequested { openers } => openers
                .iter()
                .any(|pending| pending.handle.session_id == *session_id),
            _ => false,
        }
    }

    // ---- cold start ----------------------------------------------------

    fn on_data_response(&mut self, session_id: &SessionId, root: ObjectValue) {
        let State::DataRequested { openers } = &mut self.state else {
            debug!(model = %self.model_id, session = %session_id,
                   state = self.state.name(), "ignoring data response");
            return;
        };
        let Some(position) = openers
            .iter()
            .position(|pending| pending.handle.session_id == *session_id)
        else {
            debug!(model = %self.model_id, session = %session_id,
                   "data response from a non-opener");
            return;
        };

        // Validate before creating anything; a malformed tree rejects only
        // this opener.
        if let Err(err) = ValueTree::new(root.clone()) {
            let rejected = openers.remove(position);
            let _ = rejected.reply.send(Err(OpenError::BadDataResponse {
                reason: err.to_string(),
            }));
            if openers.is_empty() {
                self.state = State::Shutdown;
            }
            return;
        }

        let created_at = self.clock.now_ms();
        if let Err(err) =
            self.store
                .create_model(&self.model_id, &self.collection_id, &root, created_at)
        {
            error!(model = %self.model_id, %err, "create failed during cold start");
            let openers = std::mem::take(openers);
            for pending in openers {
                let _ = pending.reply.send(Err(OpenError::Storage {
                    reason: err.to_string(),
                }));
            }
            self.state = State::Shutdown;
            return;
        }
        // The creation snapshot; idempotent if the store already wrote one.
        if let Err(err) = self.store.write_snapshot(&Snapshot {
            model_id: self.model_id.clone(),
            version: 0,
            timestamp: created_at,
            root: root.clone(),
        }) {
            warn!(model = %self.model_id, %err, "initial snapshot write failed");
        }

        let tree = match ValueTree::new(root) {
            Ok(tree) => tree,
            Err(err) => {
                // Validated above; only reachable through a logic error.
                error!(model = %self.model_id, %err, "initial tree construction failed");
                self.force_close(ForceCloseReason::Internal);
                return;
            }
        };

        let openers = std::mem::take(openers);
        let live = LiveModel {
            tree,
            meta: ModelMetaData {
                id: self.model_id.clone(),
                collection_id: self.collection_id.clone(),
                version: 0,
                created_at,
                modified_at: created_at,
            },
            scc: ServerConcurrencyControl::new(0),
            policy: SnapshotPolicy::new(self.snapshot_config.clone(), 0),
        };
        self.state = State::Initialized(Box::new(live));
        info!(model = %self.model_id, session = %session_id, "cold start complete");
        for pending in openers {
            self.admit(
                pending.handle.session_id.clone(),
                pending.handle.events.clone(),
                pending.reply,
            );
        }
    }

    // ---- submissions ---------------------------------------------------

    fn on_submit(&mut self, session_id: &SessionId, seq: u32, context_version: u64, op: Operation) {
        let State::Initialized(live) = &mut self.state else {
            // Transient: the submitter retries once the model is up.
            if let Some(pending) = self.pending_opener_handle(session_id) {
                pending.send(SessionEvent::SubmitRejected {
                    seq,
                    error: SubmitError::NotInitialized,
                });
            } else {
                warn!(model = %self.model_id, session = %session_id,
                      state = self.state.name(), "submission outside initialized state");
            }
            return;
        };

        if !self.participants.contains(session_id) {
            warn!(model = %self.model_id, session = %session_id, "submission from non-participant");
            return;
        }

        let (version, transformed) =
            match live.scc.process_submission(session_id, context_version, &op) {
                Ok(result) => result,
                Err(ConcurrencyError::InvalidContextVersion {
                    context_version,
                    model_version,
                }) => {
                    // Submitter-only fault: force-close just this session.
                    warn!(model = %self.model_id, session = %session_id,
                          context_version, model_version, "invalid context version");
                    self.close_session(session_id, ForceCloseReason::InvalidContextVersion);
                    return;
                }
                Err(err) => {
                    error!(model = %self.model_id, session = %session_id, %err,
                           "concurrency control failure");
                    self.force_close(ForceCloseReason::Internal);
                    return;
                }
            };

        let applied = match apply_operation(&mut live.tree, &transformed) {
            Ok(applied) => applied,
            Err(err) => {
                error!(model = %self.model_id, session = %session_id, %err, "apply failed");
                self.force_close(ForceCloseReason::Internal);
                return;
            }
        };

        let timestamp = self.clock.now_ms();
        let entry = ModelOperation {
            model_id: self.model_id.clone(),
            version,
            timestamp,
            session_id: session_id.clone(),
            op: applied.clone(),
        };
        if let Err(err) = self.store.append_operation(&entry) {
            error!(model = %self.model_id, version, %err, "operation append failed");
            self.force_close(ForceCloseReason::StorageFailure);
            return;
        }

        live.scc.commit(ProcessedOperation {
            version,
            session_id: session_id.clone(),
            op: applied,
        });
        live.meta.version = version;
        live.meta.modified_at = timestamp;

        self.participants.send_to(
            session_id,
            SessionEvent::Ack {
                seq,
                version,
                timestamp,
            },
        );
        self.participants.broadcast_except(
            Some(session_id),
            &SessionEvent::RemoteOperation {
                version,
                timestamp,
                session_id: session_id.clone(),
                op: transformed,
            },
        );

        self.maybe_snapshot(Instant::now());
    }

    fn pending_opener_handle(&self, session_id: &SessionId) -> Option<&SessionHandle> {
        match &self.state {
            State::DataRequested { openers } => openers
                .iter()
                .find(|pending| pending.handle.session_id == *session_id)
                .map(|pending| &pending.handle),
            _ => None,
        }
    }

    fn maybe_snapshot(&mut self, now: Instant) {
        let State::Initialized(live) = &mut self.state else {
            return;
        };
        if !live.policy.should_snapshot(live.meta.version, now) {
            return;
        }
        let snapshot = Snapshot {
            model_id: self.model_id.clone(),
            version: live.meta.version,
            timestamp: live.meta.modified_at,
            root: live.tree.materialize(),
        };
        match self.store.write_snapshot(&snapshot) {
            Ok(()) => {
                debug!(model = %self.model_id, version = snapshot.version, "snapshot written");
                live.policy.record_snapshot(snapshot.version, now);
            }
            // Not fatal: the policy stays dirty and the next trigger
            // retries.
            Err(err) => warn!(model = %self.model_id, %err, "snapshot write failed"),
        }
    }

    // ---- close / teardown ----------------------------------------------

    fn on_close(&mut self, session_id: &SessionId, reply: Sender<Result<(), CloseError>>) {
        if !self.participants.contains(session_id) {
            let _ = reply.send(Err(CloseError::NotOpen));
            return;
        }
        self.participants.remove(session_id);
        if let State::Initialized(live) = &mut self.state {
            live.scc.detach_session(session_id);
        }
        let _ = reply.send(Ok(()));
        self.participants.broadcast(&SessionEvent::ParticipantClosed {
            session_id: session_id.clone(),
        });
        debug!(model = %self.model_id, session = %session_id, "participant closed");

        if self.participants.is_empty() {
            self.linger_deadline =
                Some(Instant::now() + Duration::from_millis(self.config.linger_timeout_ms));
        }
    }

    /// Force-close a single session without disturbing the model.
    fn close_session(&mut self, session_id: &SessionId, reason: ForceCloseReason) {
        self.participants
            .send_to(session_id, SessionEvent::ForceClose { reason });
        self.participants.remove(session_id);
        if let State::Initialized(live) = &mut self.state {
            live.scc.detach_session(session_id);
        }
        self.participants.broadcast(&SessionEvent::ParticipantClosed {
            session_id: session_id.clone(),
        });
        if self.participants.is_empty() {
            self.linger_deadline =
                Some(Instant::now() + Duration::from_millis(self.config.linger_timeout_ms));
        }
    }

    fn on_deleted(&mut self) {
        info!(model = %self.model_id, "model deleted");
        if let Err(err) = self.store.delete_model(&self.model_id) {
            warn!(model = %self.model_id, %err, "cascade delete failed");
        }
        self.force_close(ForceCloseReason::Deleted);
    }

    /// Model-fatal path: notify everyone and terminate.
    fn force_close(&mut self, reason: ForceCloseReason) {
        warn!(model = %self.model_id, %reason, "force closing");
        for handle in self.participants.drain() {
            handle.send(SessionEvent::ForceClose { reason });
        }
        if let State::DataRequested { openers } = &mut self.state {
            for pending in std::mem::take(openers) {
                let err = match reason {
                    ForceCloseReason::Deleted => OpenError::Deleted,
                    _ => OpenError::ShuttingDown,
                };
                let _ = pending.reply.send(Err(err));
            }
        }
        self.state = State::Shutdown;
    }

    fn on_inbound_closed(&mut self) {
        debug!(model = %self.model_id, "inbound channel closed");
        self.final_snapshot();
        self.state = State::Shutdown;
    }

    fn final_snapshot(&mut self) {
        let State::Initialized(live) = &mut self.state else {
            return;
        };
        if !live.policy.is_dirty(live.meta.version) {
            return;
        }
        let snapshot = Snapshot {
            model_id: self.model_id.clone(),
            version: live.meta.version,
            timestamp: live.meta.modified_at,
            root: live.tree.materialize(),
        };
        match self.store.write_snapshot(&snapshot) {
            Ok(()) => {
                live.policy.record_snapshot(snapshot.version, Instant::now());
                debug!(model = %self.model_id, version = snapshot.version, "final snapshot written");
            }
            Err(err) => warn!(model = %self.model_id, %err, "final snapshot write failed"),
        }
    }

    // ---- timers --------------------------------------------------------

    fn next_deadline(&self) -> Option<Instant> {
        let opener_deadline = match &self.state {
            State::DataRequested { openers } => {
                openers.iter().map(|pending| pending.deadline).min()
            }
            _ => None,
        };
        match (opener_deadline, self.linger_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        }
    }

    fn on_tick(&mut self, now: Instant) {
        if let State::DataRequested { openers } = &mut self.state {
            let mut expired = Vec::new();
            openers.retain_mut(|pending| {
                if pending.deadline <= now {
                    expired.push((pending.handle.clone(), pending.reply.clone()));
                    false
                } else {
                    true
                }
            });
            for (handle, reply) in expired {
                debug!(model = %self.model_id, session = %handle.session_id,
                       "cold-start opener timed out");
                let _ = reply.send(Err(OpenError::DataRequestTimeout));
            }
            if openers.is_empty() {
                // Nobody left to supply data; the model was never created.
                self.state = State::Shutdown;
            }
        }

        if let Some(deadline) = self.linger_deadline {
            if deadline <= now && self.participants.is_empty() {
                info!(model = %self.model_id, "linger expired, shutting down");
                self.final_snapshot();
                self.state = State::Shutdown;
            } else if !self.participants.is_empty() {
                self.linger_deadline = None;
            }
        }
    }
}

fn apply_operation(tree: &mut ValueTree, op: &Operation) -> Result<AppliedOperation, ApplyError> {
    match op {
        Operation::Discrete(op) => tree.apply(op).map(AppliedOperation::Discrete),
        Operation::Compound(compound) => {
            let mut applied = Vec::with_capacity(compound.ops.len());
            for sub in &compound.ops {
                applied.push(tree.apply(sub)?);
            }
            Ok(AppliedOperation::Compound(applied))
        }
    }
}
