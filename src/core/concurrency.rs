//! Concurrency controllers.
//!
//! [`ServerConcurrencyControl`] owns a model's canonical version counter and
//! the recent-operation window needed to rebase submissions whose reference
//! version is older than current. [`ClientConcurrencyControl`] is the
//! participant-side mirror: it tracks the context version, holds
//! unacknowledged local operations, and transforms incoming remote
//! operations against them.
//!
//! Both controllers are pure state machines; the coordinator drives the
//! server side, embedded clients and convergence tests drive the client
//! side.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use super::error::TransformError;
use super::id::SessionId;
use super::operation::{AppliedOperation, Operation};
use super::ot;

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ConcurrencyError {
    #[error("context version {context_version} is ahead of model version {model_version}")]
    InvalidContextVersion {
        context_version: u64,
        model_version: u64,
    },
    #[error("history no longer covers version {required} (oldest retained is {oldest})")]
    HistoryEvicted { required: u64, oldest: u64 },
    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// One committed entry of the rebase window.
#[derive(Clone, Debug)]
pub struct ProcessedOperation {
    pub version: u64,
    pub session_id: SessionId,
    pub op: AppliedOperation,
}

/// Per-model sequencing state.
pub struct ServerConcurrencyControl {
    model_version: u64,
    history: VecDeque<ProcessedOperation>,
    /// Highest context version each live session has referenced. History at
    /// or below the minimum is unreachable and evictable.
    session_floors: HashMap<SessionId, u64>,
}

impl ServerConcurrencyControl {
    pub fn new(model_version: u64) -> Self {
        Self {
            model_version,
            history: VecDeque::new(),
            session_floors: HashMap::new(),
        }
    }

    pub fn model_version(&self) -> u64 {
        self.model_version
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Register a participant. A fresh session has seen everything up to
    /// the current version, so its floor starts there.
    pub fn attach_session(&mut self, session: SessionId) {
        self.session_floors.insert(session, self.model_version);
    }

    pub fn detach_session(&mut self, session: &SessionId) {
        self.session_floors.remove(session);
        self.prune();
    }

    /// Rebase a submission onto the current version.
    ///
    /// Folds the operation through every intervening committed operation
    /// not originated by the submitter, in version order, and returns the
    /// version the operation will be assigned together with its transformed
    /// form. The caller applies it, commits it, and broadcasts it.
    pub fn process_submission(
        &mut self,
        session: &SessionId,
        context_version: u64,
        op: &Operation,
    ) -> Result<(u64, Operation), ConcurrencyError> {
        if context_version > self.model_version {
            return Err(ConcurrencyError::InvalidContextVersion {
                context_version,
                model_version: self.model_version,
            });
        }

        if context_version < self.model_version {
            if let Some(front) = self.history.front() {
                if front.version > context_version + 1 {
                    return Err(ConcurrencyError::HistoryEvicted {
                        required: context_version + 1,
                        oldest: front.version,
                    });
                }
            } else {
                return Err(ConcurrencyError::HistoryEvicted {
                    required: context_version + 1,
                    oldest: self.model_version + 1,
                });
            }
        }

        if let Some(floor) = self.session_floors.get_mut(session) {
            if context_version > *floor {
                *floor = context_version;
            }
        }

        let mut transformed = op.clone();
        for entry in &self.history {
            if entry.version <= context_version || entry.session_id == *session {
                continue;
            }
            let (_, client_t) = ot::transform(&entry.op.to_operation(), &transformed)?;
            transformed = client_t;
        }

        Ok((self.model_version + 1, transformed))
    }

    /// Record an operation the caller has applied and persisted. `version`
    /// must be the value `process_submission` assigned.
    pub fn commit(&mut self, entry: ProcessedOperation) {
        debug_assert_eq!(entry.version, self.model_version + 1);
        self.model_version = entry.version;
        self.history.push_back(entry);
        self.prune();
    }

    fn prune(&mut self) {
        let Some(min_floor) = self.session_floors.values().min().copied() else {
            self.history.clear();
            return;
        };
        while let Some(front) = self.history.front() {
            if front.version <= min_floor {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Participant-side mirror of the sequencing state.
pub struct ClientConcurrencyControl {
    context_version: u64,
    outgoing: VecDeque<Operation>,
}

impl ClientConcurrencyControl {
    pub fn new(context_version: u64) -> Self {
        Self {
            context_version,
            outgoing: VecDeque::new(),
        }
    }

    pub fn context_version(&self) -> u64 {
        self.context_version
    }

    pub fn unacknowledged(&self) -> usize {
        self.outgoing.len()
    }

    /// Queue a locally applied operation for submission. Returns the
    /// context version to stamp on the wire.
    pub fn submit(&mut self, op: Operation) -> u64 {
        self.outgoing.push_back(op);
        self.context_version
    }

    /// The server acknowledged the head of the outgoing queue.
    pub fn on_ack(&mut self) -> Option<Operation> {
        let acked = self.outgoing.pop_front();
        if acked.is_some() {
            self.context_version += 1;
        }
        acked
    }

    /// Rebase an incoming remote operation over everything still
    /// unacknowledged, updating the queue in place. The returned operation
    /// is what the participant applies locally.
    pub fn on_remote(&mut self, remote: &Operation) -> Result<Operation, TransformError> {
        let mut remote_cur = remote.clone();
        for outgoing in self.outgoing.iter_mut() {
            let (remote_t, outgoing_t) = ot::transform(&remote_cur, outgoing)?;
            *outgoing = outgoing_t;
            remote_cur = remote_t;
        }
        self.context_version += 1;
        Ok(remote_cur)
    }
}
