//! Component-membership event, delivered whenever the view of connected
//! members changes (spec §4.2, §6).
//!
//! Unlike the fixed-layout codecs elsewhere in this crate, the component
//! message's member list is naturally variable-length and purely local
//! bookkeeping, so it travels as an opaque msgpack blob rather than a
//! byte-exact wire structure.

use serde::{Deserialize, Serialize};

use crate::error::GcsError;
use crate::ids::MemberId;

/// One member's standing within a component, as seen by the local node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentMember {
    pub id: MemberId,
    pub name: String,
    pub incoming_addr: String,
    pub segment: u32,
}

/// A component (view) change notification delivered to the upper layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentMessage {
    /// Monotonically increasing id of this component within the connection's
    /// lifetime.
    pub conf_id: u32,
    /// `true` if this component holds primary-component status.
    pub primary: bool,
    /// `true` if this component arose from the local node bootstrapping a
    /// brand-new group rather than merging with others.
    pub bootstrap: bool,
    /// Index of the local node within `members`.
    pub my_index: i32,
    pub members: Vec<ComponentMember>,
}

impl ComponentMessage {
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn my_member(&self) -> Option<&ComponentMember> {
        usize::try_from(self.my_index)
            .ok()
            .and_then(|i| self.members.get(i))
    }
}

/// Serializes a [`ComponentMessage`] as msgpack.
///
/// # Errors
///
/// Returns [`GcsError::Protocol`] if serialization fails.
pub fn write(msg: &ComponentMessage) -> Result<Vec<u8>, GcsError> {
    rmp_serde::to_vec(msg).map_err(|e| GcsError::Protocol(format!("component encode: {e}")))
}

/// Deserializes a [`ComponentMessage`] from msgpack bytes.
///
/// # Errors
///
/// Returns [`GcsError::Protocol`] if `buf` is not a valid encoding.
pub fn read(buf: &[u8]) -> Result<ComponentMessage, GcsError> {
    rmp_serde::from_slice(buf).map_err(|e| GcsError::Protocol(format!("component decode: {e}")))
}
