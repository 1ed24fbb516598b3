//! The remote queue capability and the names it is addressed by.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::LaneMessage;

/// Operator-chosen session name.
///
/// Names become path segments in the remote store, so separators and the
/// characters hierarchical key-value stores reserve are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionName(String);

/// Invalid session name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionNameError {
    #[error("Session name is empty")]
    Empty,
    #[error("Session name {name:?} contains forbidden character {ch:?}")]
    ForbiddenChar { name: String, ch: char },
}

const FORBIDDEN: &[char] = &['/', '.', '#', '$', '[', ']'];

impl SessionName {
    /// Validate and wrap a session name.
    ///
    /// # Errors
    /// Returns error if the name is empty or contains a reserved character.
    pub fn new(name: impl Into<String>) -> Result<Self, SessionNameError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SessionNameError::Empty);
        }
        if let Some(ch) = name
            .chars()
            .find(|c| FORBIDDEN.contains(c) || c.is_control())
        {
            return Err(SessionNameError::ForbiddenChar { name, ch });
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage path of the session root.
    #[must_use]
    pub fn path(&self) -> String {
        format!("sessions/{}", self.0)
    }

    /// Storage path of the status marker.
    #[must_use]
    pub fn status_path(&self) -> String {
        format!("sessions/{}/state", self.0)
    }
}

impl TryFrom<String> for SessionName {
    type Error = SessionNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionName> for String {
    fn from(value: SessionName) -> Self {
        value.0
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One direction of a session's duplex channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Operator keystrokes, client to server.
    Input,
    /// Shell output, server to client.
    Output,
}

impl Lane {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }

    /// The lane flowing the other way.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lane of a specific session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LaneRef {
    pub session: SessionName,
    pub lane: Lane,
}

impl LaneRef {
    #[must_use]
    pub const fn new(session: SessionName, lane: Lane) -> Self {
        Self { session, lane }
    }

    /// Storage path, `sessions/<session>/<lane>`.
    #[must_use]
    pub fn path(&self) -> String {
        format!("sessions/{}/{}", self.session, self.lane)
    }
}

impl fmt::Display for LaneRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session, self.lane)
    }
}

/// Key assigned by the transport on push.
///
/// Keys compare byte-wise; a transport must hand out keys that sort after
/// every key it previously returned for the same lane.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageKey(String);

impl MessageKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse status marker written at session start and end.
///
/// Purely for external observability; nothing in the tunnel reads it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SessionStatus {
    /// Server endpoint is up with a shell attached.
    Connected,
    /// Client endpoint is up.
    ClientConnected,
    /// The shell ended.
    Exited {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<u32>,
    },
}

/// Transport error.
///
/// Every variant is treated as transient by the pumps, which retry.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("Transport error: {0}")]
    Internal(String),
}

/// Ordered remote queue shared by both endpoints.
///
/// Each lane has exactly one writer. The contract is small:
/// pushes return increasing keys, fetches are snapshots in key order, and
/// deletes are idempotent per key. Nothing else (multi-key atomicity,
/// change notification) may be assumed, so consumers poll.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Append a message and return its key.
    async fn push(&self, lane: &LaneRef, message: &LaneMessage) -> Result<MessageKey, TransportError>;

    /// Snapshot of all undeleted messages, ascending by key.
    async fn fetch_all(
        &self,
        lane: &LaneRef,
    ) -> Result<BTreeMap<MessageKey, LaneMessage>, TransportError>;

    /// Remove a message. Deleting a missing key is not an error.
    async fn delete(&self, lane: &LaneRef, key: &MessageKey) -> Result<(), TransportError>;

    /// Overwrite the session status marker.
    async fn set_status(
        &self,
        session: &SessionName,
        status: &SessionStatus,
    ) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: QueueTransport + ?Sized> QueueTransport for Arc<T> {
    async fn push(&self, lane: &LaneRef, message: &LaneMessage) -> Result<MessageKey, TransportError> {
        (**self).push(lane, message).await
    }

    async fn fetch_all(
        &self,
        lane: &LaneRef,
    ) -> Result<BTreeMap<MessageKey, LaneMessage>, TransportError> {
        (**self).fetch_all(lane).await
    }

    async fn delete(&self, lane: &LaneRef, key: &MessageKey) -> Result<(), TransportError> {
        (**self).delete(lane, key).await
    }

    async fn set_status(
        &self,
        session: &SessionName,
        status: &SessionStatus,
    ) -> Result<(), TransportError> {
        (**self).set_status(session, status).await
    }
}
