//! Action types delivered to the upper replication layer (spec §6).

use serde::{Deserialize, Serialize};

/// The tag carried by every action delivered to the upper layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    Writeset,
    CommitCut,
    StateReq,
    Cchange,
    Join,
    Sync,
    Flow,
    Vote,
    Service,
    Error,
    Inconsistency,
}

/// A fully reassembled action ready for (or coming from) the upper layer.
///
/// `seqno` carries the global sequence number on success, or a negative
/// error code when the action represents a synthesized failure
/// notification (spec §7, connectivity errors on the receive path).
#[derive(Debug, Clone)]
pub struct Action {
    pub buf: Vec<u8>,
    pub action_type: ActionType,
    pub seqno: i64,
    pub local_seqno: i64,
}

impl Action {
    #[must_use]
    pub fn new(buf: Vec<u8>, action_type: ActionType, seqno: i64, local_seqno: i64) -> Self {
        Self {
            buf,
            action_type,
            seqno,
            local_seqno,
        }
    }

    /// A zero-content action carrying an error code in its seqno field
    /// (spec §7, "Connectivity errors on the receive path").
    #[must_use]
    pub fn error(code: i64, local_seqno: i64) -> Self {
        Self {
            buf: Vec::new(),
            action_type: ActionType::Error,
            seqno: code,
            local_seqno,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.action_type == ActionType::Error || self.seqno < 0
    }
}

/// The one-byte transport message-type tag (spec §6 "Message types on the wire").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Action,
    Last,
    Vote,
    Join,
    Sync,
    Flow,
    Component,
    StateUuid,
    StateMsg,
    Causal,
}
