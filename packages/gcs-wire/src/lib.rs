//! Gcs Wire -- identifiers, fragment header codec, and message encodings for
//! group communication.
//!
//! This crate provides the leaf wire layer that `gcs-core`'s stateful engine
//! is built on:
//!
//! - **Ids** ([`ids`]): `Uuid`, `Seqno`, `Gtid`, `MemberId`
//! - **Error** ([`error`]): `GcsError`, the engine's single error type
//! - **Fragment** ([`fragment`]): fixed 20-byte ACTION fragment header codec
//! - **Action** ([`action`]): `Action`, `ActionType`, `MessageType`
//! - **Code message** ([`code_msg`]): LAST/VOTE/JOIN/SYNC and FLOW payload codecs
//! - **State message** ([`state_msg`]): versioned state-exchange message codec
//! - **Component** ([`component`]): component (view) change notification

pub mod action;
pub mod code_msg;
pub mod component;
pub mod error;
pub mod fragment;
pub mod ids;
pub mod state_msg;

pub use action::{Action, ActionType, MessageType};
pub use code_msg::{CodeMsg, FlowMsg, CODE_MSG_LEN, CODE_MSG_LEN_PROTO0, FLOW_MSG_LEN};
pub use component::{ComponentMember, ComponentMessage};
pub use error::GcsError;
pub use fragment::{FragmentDescriptor, HEADER_LEN, MAX_ACTION_SIZE, MAX_PROTO_VERSION};
pub use ids::{Gtid, MemberId, Seqno, Uuid, MEMBER_ID_MAX_LEN, SEQNO_ILL};
pub use state_msg::{NodeStateCode, ProtoVersions, StateMessage, StateMessageExt};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
