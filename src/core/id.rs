//! Identity atoms.
//!
//! ModelId/CollectionId: document addressing
//! SessionId: a participant connection
//! ValueId: a node within one model's tree

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::InvalidId;

/// Prefix for server-minted value ids. Client sessions mint ids under their
/// own session prefix, so the two spaces can never collide.
pub const SERVER_VID_PREFIX: &str = "0";

/// Model identifier - non-empty string.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(s: impl Into<String>) -> Result<Self, InvalidId> {
        let s = s.into();
        if s.is_empty() {
            Err(InvalidId::Model {
                raw: s,
                reason: "empty".into(),
            })
        } else {
            Ok(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelId({:?})", self.0)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Collection identifier - non-empty string grouping related models.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(String);

impl CollectionId {
    pub fn new(s: impl Into<String>) -> Result<Self, InvalidId> {
        let s = s.into();
        if s.is_empty() {
            Err(InvalidId::Collection {
                raw: s,
                reason: "empty".into(),
            })
        } else {
            Ok(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionId({:?})", self.0)
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session identifier - one open connection of one client.
///
/// Sessions name themselves at the transport layer; the coordinator only
/// requires uniqueness among concurrently open participants.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(s: impl Into<String>) -> Result<Self, InvalidId> {
        let s = s.into();
        if s.is_empty() {
            Err(InvalidId::Session {
                raw: s,
                reason: "empty".into(),
            })
        } else {
            Ok(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({:?})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value identifier - stable address of one node within a model's tree.
///
/// Opaque string, unique within a single model for the lifetime of the node.
/// Ids are minted with an origin prefix (`0:` for the server, `<session>:`
/// for clients) followed by a per-origin counter.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(String);

impl ValueId {
    pub fn new(s: impl Into<String>) -> Result<Self, InvalidId> {
        let s = s.into();
        if s.is_empty() {
            Err(InvalidId::Value {
                raw: s,
                reason: "empty".into(),
            })
        } else {
            Ok(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueId({:?})", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mints value ids under a fixed origin prefix.
///
/// The server constructs one with [`ValueIdGenerator::server`]; each client
/// session constructs its own with [`ValueIdGenerator::for_session`].
#[derive(Debug)]
pub struct ValueIdGenerator {
    prefix: String,
    next: u64,
}

impl ValueIdGenerator {
    pub fn server() -> Self {
        Self {
            prefix: SERVER_VID_PREFIX.to_string(),
            next: 0,
        }
    }

    pub fn for_session(session: &SessionId) -> Self {
        Self {
            prefix: session.as_str().to_string(),
            next: 0,
        }
    }

    pub fn next_id(&mut self) -> ValueId {
        let id = ValueId(format!("{}:{}", self.prefix, self.next));
        self.next += 1;
        id
    }
}
