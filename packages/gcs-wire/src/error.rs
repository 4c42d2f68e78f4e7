//! The engine's single error type.
//!
//! Every public entry point in `gcs-core` returns `Result<T, GcsError>`
//! rather than the negative numeric codes of the originating protocol
//! (spec §6 "Exit-style codes"); each variant below documents the code it
//! stands in for.

use thiserror::Error;

/// Unified error type for the replication core and everything built on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GcsError {
    /// No primary component / not connected. Retryable only after a new
    /// component forms.
    #[error("not connected")]
    NotConnected,

    /// A blocking call exceeded its deadline.
    #[error("timed out")]
    TimedOut,

    /// Declared or requested size exceeds the implementation ceiling.
    #[error("message too big ({size} > {max})")]
    MessageTooBig { size: u64, max: u64 },

    /// `close()` called on an already-closed resource. Idempotent, not fatal.
    #[error("already closed")]
    Already,

    /// A blocking wait was interrupted via an explicit cancellation handle.
    #[error("interrupted")]
    Interrupted,

    /// A fragment or in-flight send was dropped because of a reconfiguration.
    #[error("restart: operation invalidated by reconfiguration")]
    Restart,

    /// Resource used in a state that does not support the operation.
    #[error("bad file descriptor: wrong state for this operation")]
    BadFileDescriptor,

    /// Allocation failed or a configured resource ceiling was hit.
    #[error("no memory")]
    NoMemory,

    /// A wire message violated the protocol's structural invariants.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// FIFO/send-monitor ring is full; caller should retry shortly.
    #[error("resource temporarily unavailable")]
    Again,

    /// A cancellation handle no longer refers to a queued waiter.
    #[error("no such waiter")]
    NoSuchWaiter,

    /// The local node has applied further than the quorum's representative;
    /// history cannot rewind. Fatal — terminates the connection.
    #[error("history rewind detected, group UUID {group_uuid}")]
    HistoryRewind { group_uuid: String },

    /// Quorum would require downgrading a previously negotiated protocol
    /// version. Fatal.
    #[error("protocol downgrade required: {from} -> {to}")]
    ProtocolDowngrade { from: u8, to: u8 },

    /// No state quorum could be established among the component's members.
    #[error("quorum not possible: {0}")]
    QuorumImpossible(String),

    /// Donor selection found no eligible node.
    #[error("no donor available")]
    NoDonor,

    /// Configuration key not recognized by the controller, membership
    /// engine, or transport in sequence.
    #[error("unknown parameter: {0}")]
    UnknownParam(String),

    /// Configuration value failed validation for its key.
    #[error("invalid value for parameter {key}: {reason}")]
    InvalidParam { key: String, reason: String },
}

impl GcsError {
    /// `true` for errors the caller should retry after a short backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, GcsError::Again | GcsError::TimedOut)
    }

    /// `true` for errors that must shut the connection down.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GcsError::HistoryRewind { .. } | GcsError::ProtocolDowngrade { .. }
        )
    }
}
