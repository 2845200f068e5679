//! Model manager: coordinator lifecycle and routing.
//!
//! The manager owns the map of live coordinators. The first open of an
//! un-owned model spawns a coordinator thread; a coordinator that shut down
//! (linger expiry, force close) is detected by its dead inbound channel and
//! replaced on the next open. Everything else is routing: the routing layer
//! above guarantees all messages for one model arrive here, and the manager
//! guarantees they reach the single owning coordinator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Sender, bounded, unbounded};
use tracing::debug;

use crate::config::RealtimeConfig;
use crate::core::{CollectionId, ModelId, SessionId};

use super::coordinator::RealtimeModelCoordinator;
use super::messages::{
    CloseError, ModelRequest, OpenError, OpenRequest, OpenSuccess, SessionEvent,
};
use super::snapshot::SnapshotConfig;
use super::store::{ModelStore, StoreError};

pub struct ModelManager {
    store: Arc<dyn ModelStore>,
    realtime: RealtimeConfig,
    snapshot: SnapshotConfig,
    /// Collection assigned to models auto-created on first contribution.
    default_collection: CollectionId,
    models: Mutex<HashMap<ModelId, Sender<ModelRequest>>>,
}

impl ModelManager {
    pub fn new(
        store: Arc<dyn ModelStore>,
        realtime: RealtimeConfig,
        snapshot: SnapshotConfig,
        default_collection: CollectionId,
    ) -> Self {
        Self {
            store,
            realtime,
            snapshot,
            default_collection,
            models: Mutex::new(HashMap::new()),
        }
    }

    /// Open a model for a session, spawning the coordinator if the model is
    /// un-owned. Blocks up to the handshake timeout for the outcome, which
    /// for a cold start includes the wait for initial client data.
    pub fn open(
        &self,
        model_id: &ModelId,
        session_id: &SessionId,
        events: Sender<SessionEvent>,
    ) -> Result<OpenSuccess, OpenError> {
        let deadline = Duration::from_millis(self.realtime.handshake_timeout_ms);
        // One retry covers the race where the coordinator shut down between
        // lookup and delivery.
        for attempt in 0..2 {
            let sender = self.sender_or_spawn(model_id);
            let (reply_tx, reply_rx) = bounded(1);
            let sent = sender
                .send(ModelRequest::Open(OpenRequest {
                    session_id: session_id.clone(),
                    events: events.clone(),
                    reply: reply_tx,
                }))
                .is_ok();
            if !sent {
                self.forget(model_id, &sender);
                continue;
            }
            match reply_rx.recv_timeout(deadline) {
                Ok(Ok(success)) => return Ok(success),
                Ok(Err(OpenError::ShuttingDown)) if attempt == 0 => {
                    debug!(model = %model_id, "open raced a shutdown, retrying");
                    self.forget(model_id, &sender);
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => return Err(OpenError::Timeout),
            }
        }
        Err(OpenError::ShuttingDown)
    }

    /// Close a session's participation. Blocks briefly for the ack.
    pub fn close(&self, model_id: &ModelId, session_id: &SessionId) -> Result<(), CloseError> {
        let Some(sender) = self.live_sender(model_id) else {
            return Err(CloseError::NotOpen);
        };
        let (reply_tx, reply_rx) = bounded(1);
        let sent = sender
            .send(ModelRequest::Close {
                session_id: session_id.clone(),
                reply: reply_tx,
            })
            .is_ok();
        if !sent {
            self.forget(model_id, &sender);
            return Err(CloseError::NotOpen);
        }
        match reply_rx.recv_timeout(Duration::from_millis(self.realtime.handshake_timeout_ms)) {
            Ok(result) => result,
            Err(_) => Err(CloseError::NotOpen),
        }
    }

    /// Fire-and-forget routing for submissions, data responses, and
    /// reference updates. Returns false when the model has no live
    /// coordinator; the message is dropped in that case, which is only
    /// reachable for sessions that were already force-closed.
    pub fn route(&self, model_id: &ModelId, msg: ModelRequest) -> bool {
        let Some(sender) = self.live_sender(model_id) else {
            return false;
        };
        if sender.send(msg).is_err() {
            self.forget(model_id, &sender);
            return false;
        }
        true
    }

    /// Delete a model: force-close live participants and cascade the
    /// persistence removal.
    pub fn delete(&self, model_id: &ModelId) -> Result<(), StoreError> {
        if let Some(sender) = self.live_sender(model_id) {
            if sender.send(ModelRequest::Deleted).is_ok() {
                // The coordinator owns the cascade.
                return Ok(());
            }
            self.forget(model_id, &sender);
        }
        self.store.delete_model(model_id)
    }

    fn live_sender(&self, model_id: &ModelId) -> Option<Sender<ModelRequest>> {
        self.models
            .lock()
            .ok()
            .and_then(|models| models.get(model_id).cloned())
    }

    fn sender_or_spawn(&self, model_id: &ModelId) -> Sender<ModelRequest> {
        let mut models = match self.models.lock() {
            Ok(models) => models,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(sender) = models.get(model_id) {
            return sender.clone();
        }
        let (tx, rx) = unbounded();
        let coordinator = RealtimeModelCoordinator::new(
            model_id.clone(),
            self.default_collection.clone(),
            Arc::clone(&self.store),
            self.realtime.clone(),
            self.snapshot.clone(),
        );
        let thread_model = model_id.clone();
        thread::Builder::new()
            .name(format!("model-{thread_model}"))
            .spawn(move || coordinator.run(rx))
            .expect("spawn coordinator thread");
        models.insert(model_id.clone(), tx.clone());
        tx
    }

    /// Drop a dead coordinator entry, but only if it is still the one we
    /// observed failing.
    fn forget(&self, model_id: &ModelId, dead: &Sender<ModelRequest>) {
        if let Ok(mut models) = self.models.lock() {
            if let Some(current) = models.get(model_id) {
                if current.same_channel(dead) {
                    models.remove(model_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    fn manager() -> ModelManager {
        ModelManager::new(
            Arc::new(super::super::store::MemoryModelStore::new()),
            RealtimeConfig {
                handshake_timeout_ms: 1_000,
                data_request_timeout_ms: 100,
                linger_timeout_ms: 50,
            },
            SnapshotConfig::default(),
            CollectionId::new("default").unwrap(),
        )
    }

    #[test]
    fn route_without_a_live_coordinator_is_rejected() {
        let manager = manager();
        let model = ModelId::new("m1").unwrap();
        assert!(!manager.route(&model, ModelRequest::Deleted));
    }

    #[test]
    fn cold_start_timeout_fails_the_open() {
        let manager = manager();
        let model = ModelId::new("m1").unwrap();
        let session = SessionId::new("s1").unwrap();
        let (events_tx, events_rx) = unbounded();

        // Nobody answers the data request, so the opener is failed after
        // the data-request timeout.
        let err = manager.open(&model, &session, events_tx).unwrap_err();
        assert_eq!(err, OpenError::DataRequestTimeout);
        assert!(matches!(
            events_rx.try_recv(),
            Ok(SessionEvent::DataRequest { .. })
        ));
    }

    #[test]
    fn delete_without_a_coordinator_hits_the_store() {
        let manager = manager();
        let model = ModelId::new("missing").unwrap();
        assert!(matches!(
            manager.delete(&model),
            Err(StoreError::NotFound { .. })
        ));
    }
}
