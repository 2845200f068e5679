//! Participant registry and event fan-out.
//!
//! Every participant owns a dedicated unbounded channel of
//! [`SessionEvent`]s. Broadcasting walks the registry in session order; a
//! participant whose receiver is gone is dropped from the registry, which
//! is how disconnects are observed.

use std::collections::BTreeMap;

use crossbeam::channel::Sender;
use tracing::debug;

use crate::core::SessionId;

use super::messages::SessionEvent;

/// Handle to one participant's event channel.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub events: Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn new(session_id: SessionId, events: Sender<SessionEvent>) -> Self {
        Self { session_id, events }
    }

    /// Deliver one event. Returns false when the receiver is gone.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

/// The set of sessions currently open against one model.
#[derive(Default)]
pub struct Participants {
    sessions: BTreeMap<SessionId, SessionHandle>,
}

impl Participants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&SessionHandle> {
        self.sessions.get(session_id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().cloned().collect()
    }

    pub fn insert(&mut self, handle: SessionHandle) {
        self.sessions.insert(handle.session_id.clone(), handle);
    }

    pub fn remove(&mut self, session_id: &SessionId) -> Option<SessionHandle> {
        self.sessions.remove(session_id)
    }

    /// Send to one participant, dropping it on a dead channel.
    pub fn send_to(&mut self, session_id: &SessionId, event: SessionEvent) {
        let delivered = match self.sessions.get(session_id) {
            Some(handle) => handle.send(event),
            None => return,
        };
        if !delivered {
            debug!(session = %session_id, "dropping participant with closed channel");
            self.sessions.remove(session_id);
        }
    }

    /// Send to every participant except `skip`, dropping dead channels.
    pub fn broadcast_except(&mut self, skip: Option<&SessionId>, event: &SessionEvent) {
        let mut dead = Vec::new();
        for (session_id, handle) in &self.sessions {
            if Some(session_id) == skip {
                continue;
            }
            if !handle.send(event.clone()) {
                dead.push(session_id.clone());
            }
        }
        for session_id in dead {
            debug!(session = %session_id, "dropping participant with closed channel");
            self.sessions.remove(&session_id);
        }
    }

    pub fn broadcast(&mut self, event: &SessionEvent) {
        self.broadcast_except(None, event);
    }

    /// Remove and return every participant, for force-close teardown.
    pub fn drain(&mut self) -> Vec<SessionHandle> {
        std::mem::take(&mut self.sessions).into_values().collect()
    }
}
