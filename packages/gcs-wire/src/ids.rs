//! Core identifiers: `Uuid`, `Seqno`, `Gtid`, and `MemberId`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 128-bit opaque identifier with a distinguished [`Uuid::NIL`] value.
///
/// Unlike the general-purpose `uuid` crate's `Uuid`, group histories are
/// identified by values this engine itself mints (on bootstrap/remerge) or
/// receives verbatim from a peer's state message, so no version/variant bits
/// are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uuid(pub [u8; 16]);

impl Uuid {
    pub const NIL: Uuid = Uuid([0; 16]);

    /// Generates a fresh random UUID, used when a node bootstraps a new
    /// group history or a representative mints a state-exchange UUID.
    #[must_use]
    pub fn generate() -> Self {
        Uuid(*uuid::Uuid::new_v4().as_bytes())
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

impl Default for Uuid {
    fn default() -> Self {
        Self::NIL
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// 64-bit signed monotonic sequence number.
///
/// `-1` is the illegal/none sentinel ([`Seqno::ILL`]); `0` is the initial
/// value used before any action has been ordered.
pub type Seqno = i64;

/// The illegal/none seqno sentinel.
pub const SEQNO_ILL: Seqno = -1;

/// A globally ordered position: a (group-UUID, seqno) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gtid {
    pub group_uuid: Uuid,
    pub seqno: Seqno,
}

impl Gtid {
    #[must_use]
    pub fn new(group_uuid: Uuid, seqno: Seqno) -> Self {
        Self { group_uuid, seqno }
    }

    /// The canonical "unset" GTID: nil group, illegal seqno.
    #[must_use]
    pub fn unset() -> Self {
        Self {
            group_uuid: Uuid::NIL,
            seqno: SEQNO_ILL,
        }
    }
}

/// Maximum encoded length of a [`MemberId`], in bytes.
pub const MEMBER_ID_MAX_LEN: usize = 40;

/// Short printable string identifying a member, assigned by the transport
/// uniquely within a component's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(String);

impl MemberId {
    /// Builds a `MemberId`, rejecting strings over [`MEMBER_ID_MAX_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns `Err` with the original string if it exceeds the length limit.
    pub fn new(s: impl Into<String>) -> Result<Self, String> {
        let s = s.into();
        if s.len() > MEMBER_ID_MAX_LEN {
            return Err(s);
        }
        Ok(Self(s))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MemberId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_nil_is_default() {
        assert_eq!(Uuid::default(), Uuid::NIL);
        assert!(Uuid::NIL.is_nil());
    }

    #[test]
    fn uuid_generate_is_not_nil() {
        let u = Uuid::generate();
        assert!(!u.is_nil());
    }

    #[test]
    fn uuid_display_is_32_hex_chars() {
        let u = Uuid([0xab; 16]);
        assert_eq!(u.to_string(), "ab".repeat(16));
    }

    #[test]
    fn gtid_unset_has_illegal_seqno() {
        let g = Gtid::unset();
        assert_eq!(g.seqno, SEQNO_ILL);
        assert!(g.group_uuid.is_nil());
    }

    #[test]
    fn member_id_rejects_too_long() {
        let long = "x".repeat(MEMBER_ID_MAX_LEN + 1);
        assert!(MemberId::new(long).is_err());
    }

    #[test]
    fn member_id_accepts_max_len() {
        let ok = "x".repeat(MEMBER_ID_MAX_LEN);
        assert!(MemberId::new(ok).is_ok());
    }
}
