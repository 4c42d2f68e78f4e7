//! Codec for the LAST/VOTE/JOIN/SYNC wire payload (spec §6).
//!
//! In gcs-proto ≥ 1 this is a 32-byte `(Gtid, code)` pair: a 16-byte UUID,
//! an 8-byte big-endian seqno, and an 8-byte big-endian code. Proto 0
//! predates commit-cut-in-state-exchange and carries only an 8-byte
//! big-endian seqno, with the code implied to be 0 (success).

use crate::error::GcsError;
use crate::ids::{Gtid, Uuid};

/// Encoded length of a code-message under gcs-proto ≥ 1.
pub const CODE_MSG_LEN: usize = 32;

/// Encoded length of a code-message under gcs-proto 0.
pub const CODE_MSG_LEN_PROTO0: usize = 8;

/// A `(Gtid, code)` pair as carried by LAST, VOTE, JOIN, and SYNC messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeMsg {
    pub gtid: Gtid,
    pub code: i64,
}

/// Encodes `msg` as the 32-byte gcs-proto ≥ 1 wire form.
#[must_use]
pub fn write(msg: &CodeMsg) -> [u8; CODE_MSG_LEN] {
    let mut buf = [0u8; CODE_MSG_LEN];
    buf[0..16].copy_from_slice(&msg.gtid.group_uuid.0);
    buf[16..24].copy_from_slice(&msg.gtid.seqno.to_be_bytes());
    buf[24..32].copy_from_slice(&msg.code.to_be_bytes());
    buf
}

/// Encodes just the seqno as the legacy gcs-proto 0, 8-byte wire form.
#[must_use]
pub fn write_proto0(seqno: i64) -> [u8; CODE_MSG_LEN_PROTO0] {
    seqno.to_be_bytes()
}

/// Decodes a code-message, dispatching on buffer length to the proto ≥ 1
/// or legacy proto 0 layout. `group_uuid` fills in the implied group for the
/// proto 0 form, which carries no UUID of its own.
///
/// # Errors
///
/// Returns [`GcsError::Protocol`] if `buf` matches neither known length.
pub fn read(buf: &[u8], group_uuid: Uuid) -> Result<CodeMsg, GcsError> {
    match buf.len() {
        CODE_MSG_LEN => {
            let mut uuid_bytes = [0u8; 16];
            uuid_bytes.copy_from_slice(&buf[0..16]);
            let seqno = i64::from_be_bytes(buf[16..24].try_into().unwrap());
            let code = i64::from_be_bytes(buf[24..32].try_into().unwrap());
            Ok(CodeMsg {
                gtid: Gtid::new(Uuid(uuid_bytes), seqno),
                code,
            })
        }
        CODE_MSG_LEN_PROTO0 => {
            let seqno = i64::from_be_bytes(buf.try_into().unwrap());
            Ok(CodeMsg {
                gtid: Gtid::new(group_uuid, seqno),
                code: 0,
            })
        }
        other => Err(GcsError::Protocol(format!(
            "code-message has unexpected length {other}"
        ))),
    }
}

/// The FLOW message payload: 4-byte `conf_id` + 4-byte stop flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowMsg {
    pub conf_id: u32,
    pub stop: bool,
}

pub const FLOW_MSG_LEN: usize = 8;

#[must_use]
pub fn write_flow(msg: &FlowMsg) -> [u8; FLOW_MSG_LEN] {
    let mut buf = [0u8; FLOW_MSG_LEN];
    buf[0..4].copy_from_slice(&msg.conf_id.to_be_bytes());
    buf[4..8].copy_from_slice(&u32::from(msg.stop).to_be_bytes());
    buf
}

/// # Errors
///
/// Returns [`GcsError::Protocol`] if `buf` is not exactly [`FLOW_MSG_LEN`]
/// bytes.
pub fn read_flow(buf: &[u8]) -> Result<FlowMsg, GcsError> {
    if buf.len() != FLOW_MSG_LEN {
        return Err(GcsError::Protocol(format!(
            "FLOW message has unexpected length {}",
            buf.len()
        )));
    }
    let conf_id = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    let stop = u32::from_be_bytes(buf[4..8].try_into().unwrap()) != 0;
    Ok(FlowMsg { conf_id, stop })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_proto1() {
        let msg = CodeMsg {
            gtid: Gtid::new(Uuid([7; 16]), 42),
            code: -1,
        };
        let buf = write(&msg);
        let parsed = read(&buf, Uuid::NIL).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn round_trip_proto0_uses_supplied_group_uuid() {
        let buf = write_proto0(99);
        let group = Uuid([3; 16]);
        let parsed = read(&buf, group).unwrap();
        assert_eq!(parsed.gtid.seqno, 99);
        assert_eq!(parsed.gtid.group_uuid, group);
        assert_eq!(parsed.code, 0);
    }

    #[test]
    fn read_rejects_bad_length() {
        let buf = [0u8; 10];
        assert!(read(&buf, Uuid::NIL).is_err());
    }

    #[test]
    fn flow_round_trip() {
        for stop in [true, false] {
            let msg = FlowMsg {
                conf_id: 1497,
                stop,
            };
            let buf = write_flow(&msg);
            assert_eq!(read_flow(&buf).unwrap(), msg);
        }
    }
}
