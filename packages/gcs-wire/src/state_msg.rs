//! Versioned, extensible state-message codec (spec §4.3, §6).
//!
//! Readers accept up to [`CURRENT_VERSION`] and ignore trailing bytes
//! beyond the fields they understand; writers always emit
//! [`CURRENT_VERSION`]. Each version only ever *appends* fields, so a
//! reader written against an older version can still decode the common
//! prefix of a newer message.

use crate::error::GcsError;
use crate::ids::Uuid;

/// Highest state-message version this build writes and fully understands.
pub const CURRENT_VERSION: u8 = 6;

/// A node's lifecycle status as carried in the state message's packed byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum NodeStateCode {
    NonPrim = 0,
    Prim = 1,
    Joiner = 2,
    Donor = 3,
    Joined = 4,
    Synced = 5,
}

impl NodeStateCode {
    fn from_nibble(n: u8) -> Result<Self, GcsError> {
        Ok(match n {
            0 => Self::NonPrim,
            1 => Self::Prim,
            2 => Self::Joiner,
            3 => Self::Donor,
            4 => Self::Joined,
            5 => Self::Synced,
            other => {
                return Err(GcsError::Protocol(format!(
                    "unknown node state code {other}"
                )))
            }
        })
    }
}

/// Protocol versions negotiated between two primary components, used for
/// the v6 downgrade-prevention fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtoVersions {
    pub gcs: u8,
    pub repl: u8,
    pub appl: u8,
}

/// Extension fields present only from a given state-message version onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateMessageExt {
    /// v≥1
    pub appl_proto_ver: u8,
    /// v≥3: lowest seqno still available from this member for IST.
    pub cached_seqno: i64,
    /// v≥4
    pub desync_count: u32,
    /// v≥5
    pub last_applied: i64,
    pub vote_seqno: i64,
    pub vote_res: i64,
    pub vote_policy: u8,
    /// v≥6: protocol versions negotiated by the previous primary component.
    pub prev_primary: ProtoVersions,
}

/// A fully decoded state message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMessage {
    pub version: u8,
    pub gcs_proto_ver: u8,
    pub repl_proto_ver: u8,
    pub current_state: NodeStateCode,
    pub prim_state: NodeStateCode,
    pub joined_count: u16,
    pub state_uuid: Uuid,
    pub group_uuid: Uuid,
    pub prim_uuid: Uuid,
    pub received: i64,
    pub prim_seqno: i64,
    pub name: String,
    pub incoming_addr: String,
    pub bootstrap: bool,
    pub ext: StateMessageExt,
}

fn push_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

fn read_cstr<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a str, GcsError> {
    let start = *pos;
    let nul = buf[start..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| GcsError::Protocol("state message missing NUL terminator".to_string()))?;
    let s = std::str::from_utf8(&buf[start..start + nul])
        .map_err(|_| GcsError::Protocol("state message name is not valid UTF-8".to_string()))?;
    *pos = start + nul + 1;
    Ok(s)
}

fn need(buf: &[u8], pos: usize, n: usize) -> Result<(), GcsError> {
    if buf.len() < pos + n {
        return Err(GcsError::Protocol(
            "state message truncated".to_string(),
        ));
    }
    Ok(())
}

/// Serializes `msg` at [`CURRENT_VERSION`] regardless of `msg.version`.
#[must_use]
pub fn write(msg: &StateMessage) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);

    buf.push(CURRENT_VERSION);
    buf.push(u8::from(msg.bootstrap)); // flags byte
    buf.push(msg.gcs_proto_ver);
    buf.push(msg.repl_proto_ver);
    buf.push(((msg.current_state as u8) << 4) | (msg.prim_state as u8));
    buf.extend_from_slice(&msg.joined_count.to_be_bytes());
    buf.extend_from_slice(&msg.state_uuid.0);
    buf.extend_from_slice(&msg.group_uuid.0);
    buf.extend_from_slice(&msg.prim_uuid.0);
    buf.extend_from_slice(&msg.received.to_be_bytes());
    buf.extend_from_slice(&msg.prim_seqno.to_be_bytes());
    push_cstr(&mut buf, &msg.name);
    push_cstr(&mut buf, &msg.incoming_addr);

    // v>=1
    buf.push(msg.ext.appl_proto_ver);
    // v>=3
    buf.extend_from_slice(&msg.ext.cached_seqno.to_be_bytes());
    // v>=4
    buf.extend_from_slice(&msg.ext.desync_count.to_be_bytes());
    // v>=5
    buf.extend_from_slice(&msg.ext.last_applied.to_be_bytes());
    buf.extend_from_slice(&msg.ext.vote_seqno.to_be_bytes());
    buf.extend_from_slice(&msg.ext.vote_res.to_be_bytes());
    buf.push(msg.ext.vote_policy);
    // v>=6
    buf.push(msg.ext.prev_primary.gcs);
    buf.push(msg.ext.prev_primary.repl);
    buf.push(msg.ext.prev_primary.appl);

    buf
}

/// Parses a state message, accepting any version up to [`CURRENT_VERSION`]
/// and defaulting fields introduced after the writer's declared version.
///
/// # Errors
///
/// Returns [`GcsError::Protocol`] if the buffer is truncated, the declared
/// version exceeds [`CURRENT_VERSION`], or a name/address is not valid
/// UTF-8 / NUL-terminated.
pub fn read(buf: &[u8]) -> Result<StateMessage, GcsError> {
    let mut pos = 0usize;
    need(buf, pos, 1)?;
    let version = buf[pos];
    pos += 1;
    if version > CURRENT_VERSION {
        return Err(GcsError::Protocol(format!(
            "unsupported state message version {version}"
        )));
    }

    need(buf, pos, 1)?;
    let bootstrap = buf[pos] != 0;
    pos += 1;

    need(buf, pos, 3)?;
    let gcs_proto_ver = buf[pos];
    let repl_proto_ver = buf[pos + 1];
    let packed = buf[pos + 2];
    pos += 3;
    let current_state = NodeStateCode::from_nibble(packed >> 4)?;
    let prim_state = NodeStateCode::from_nibble(packed & 0x0F)?;

    need(buf, pos, 2)?;
    let joined_count = u16::from_be_bytes(buf[pos..pos + 2].try_into().unwrap());
    pos += 2;

    need(buf, pos, 48)?;
    let mut read_uuid = |p: usize| -> Uuid {
        let mut b = [0u8; 16];
        b.copy_from_slice(&buf[p..p + 16]);
        Uuid(b)
    };
    let state_uuid = read_uuid(pos);
    let group_uuid = read_uuid(pos + 16);
    let prim_uuid = read_uuid(pos + 32);
    pos += 48;

    need(buf, pos, 16)?;
    let received = i64::from_be_bytes(buf[pos..pos + 8].try_into().unwrap());
    let prim_seqno = i64::from_be_bytes(buf[pos + 8..pos + 16].try_into().unwrap());
    pos += 16;

    let name = read_cstr(buf, &mut pos)?.to_string();
    let incoming_addr = read_cstr(buf, &mut pos)?.to_string();

    let mut ext = StateMessageExt::default();

    if version >= 1 {
        need(buf, pos, 1)?;
        ext.appl_proto_ver = buf[pos];
        pos += 1;
    }
    if version >= 3 {
        need(buf, pos, 8)?;
        ext.cached_seqno = i64::from_be_bytes(buf[pos..pos + 8].try_into().unwrap());
        pos += 8;
    }
    if version >= 4 {
        need(buf, pos, 4)?;
        ext.desync_count = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
    }
    if version >= 5 {
        need(buf, pos, 25)?;
        ext.last_applied = i64::from_be_bytes(buf[pos..pos + 8].try_into().unwrap());
        ext.vote_seqno = i64::from_be_bytes(buf[pos + 8..pos + 16].try_into().unwrap());
        ext.vote_res = i64::from_be_bytes(buf[pos + 16..pos + 24].try_into().unwrap());
        ext.vote_policy = buf[pos + 24];
        pos += 25;
    }
    if version >= 6 {
        need(buf, pos, 3)?;
        ext.prev_primary = ProtoVersions {
            gcs: buf[pos],
            repl: buf[pos + 1],
            appl: buf[pos + 2],
        };
        // trailing bytes beyond what we know are ignored, per contract.
    }

    Ok(StateMessage {
        version,
        gcs_proto_ver,
        repl_proto_ver,
        current_state,
        prim_state,
        joined_count,
        state_uuid,
        group_uuid,
        prim_uuid,
        received,
        prim_seqno,
        name,
        incoming_addr,
        bootstrap,
        ext,
    })
}
