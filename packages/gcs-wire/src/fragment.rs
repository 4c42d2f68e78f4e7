//! Fragment header codec (spec §4.1, §6).
//!
//! A fixed 20-byte prefix precedes every ACTION fragment's payload:
//! `[version:1][action_id:7 be][size:4][fragno:4][action_type:1][reserved:3]`.
//! `action_id` shares its top byte with `version` in the original layout's
//! 8-byte window; we keep them as separate fields here and simply reserve
//! the first byte for `version`, encoding `action_id` in the next 7.

use crate::error::GcsError;

/// Size of the fixed fragment header, in bytes.
pub const HEADER_LEN: usize = 20;

/// Absolute ceiling on a single action's total size (2^32 - 1 bytes), the
/// largest value the 4-byte size field can represent.
pub const MAX_ACTION_SIZE: u64 = u32::MAX as u64;

/// Highest fragment protocol version this build emits and accepts.
pub const MAX_PROTO_VERSION: u8 = 1;

/// A parsed fragment header plus a view of its payload region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentDescriptor {
    pub version: u8,
    pub action_id: u64,
    pub action_size: u32,
    pub fragment_no: u32,
    pub action_type: u8,
}

/// Writes `desc`'s header into the first [`HEADER_LEN`] bytes of `buf`,
/// returning the number of header bytes written.
///
/// # Errors
///
/// Returns [`GcsError::MessageTooBig`] if `buf` is shorter than
/// [`HEADER_LEN`] or if `desc.action_id` does not fit in 7 bytes.
pub fn write(desc: &FragmentDescriptor, buf: &mut [u8]) -> Result<usize, GcsError> {
    if buf.len() < HEADER_LEN {
        return Err(GcsError::MessageTooBig {
            size: HEADER_LEN as u64,
            max: buf.len() as u64,
        });
    }
    if desc.action_id > 0x00FF_FFFF_FFFF_FFFF {
        return Err(GcsError::Protocol(
            "action_id does not fit in 7 bytes".to_string(),
        ));
    }

    buf[0] = desc.version;
    let id_bytes = desc.action_id.to_be_bytes(); // 8 bytes, top byte always 0 here
    buf[1..8].copy_from_slice(&id_bytes[1..8]);
    buf[8..12].copy_from_slice(&desc.action_size.to_be_bytes());
    buf[12..16].copy_from_slice(&desc.fragment_no.to_be_bytes());
    buf[16] = desc.action_type;
    buf[17..20].copy_from_slice(&[0, 0, 0]);

    Ok(HEADER_LEN)
}

/// Parses a fragment header from the first [`HEADER_LEN`] bytes of `buf`.
///
/// A zero-length payload (`buf.len() == HEADER_LEN`) is legal and parses
/// normally (spec §8 "An action of size 0 is legal").
///
/// # Errors
///
/// - [`GcsError::MessageTooBig`] if `buf` is shorter than [`HEADER_LEN`].
/// - [`GcsError::Protocol`] if the encoded version exceeds
///   [`MAX_PROTO_VERSION`] or the declared action size exceeds
///   [`MAX_ACTION_SIZE`].
pub fn read(buf: &[u8]) -> Result<FragmentDescriptor, GcsError> {
    if buf.len() < HEADER_LEN {
        return Err(GcsError::MessageTooBig {
            size: HEADER_LEN as u64,
            max: buf.len() as u64,
        });
    }

    let version = buf[0];
    if version > MAX_PROTO_VERSION {
        return Err(GcsError::Protocol(format!(
            "unsupported fragment protocol version {version}"
        )));
    }

    let mut id_bytes = [0u8; 8];
    id_bytes[1..8].copy_from_slice(&buf[1..8]);
    let action_id = u64::from_be_bytes(id_bytes);

    let action_size = u32::from_be_bytes(buf[8..12].try_into().unwrap());
    if u64::from(action_size) > MAX_ACTION_SIZE {
        return Err(GcsError::Protocol(format!(
            "declared action size {action_size} exceeds maximum"
        )));
    }

    let fragment_no = u32::from_be_bytes(buf[12..16].try_into().unwrap());
    let action_type = buf[16];

    Ok(FragmentDescriptor {
        version,
        action_id,
        action_size,
        fragment_no,
        action_type,
    })
}

/// Bumps only the fragment-number field of an already-written header buffer
/// in place, letting a sender reuse one header across successive fragments
/// of the same action.
///
/// # Errors
///
/// Returns [`GcsError::MessageTooBig`] if `buf` is shorter than
/// [`HEADER_LEN`].
pub fn increment_fragment_no(buf: &mut [u8]) -> Result<(), GcsError> {
    if buf.len() < HEADER_LEN {
        return Err(GcsError::MessageTooBig {
            size: HEADER_LEN as u64,
            max: buf.len() as u64,
        });
    }
    let current = u32::from_be_bytes(buf[12..16].try_into().unwrap());
    buf[12..16].copy_from_slice(&current.wrapping_add(1).to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_desc() -> FragmentDescriptor {
        FragmentDescriptor {
            version: 1,
            action_id: 0x1234_5678_9A,
            action_size: 10,
            fragment_no: 0,
            action_type: 0,
        }
    }

    #[test]
    fn round_trip_basic() {
        let desc = sample_desc();
        let mut buf = [0u8; HEADER_LEN];
        let n = write(&desc, &mut buf).unwrap();
        assert_eq!(n, HEADER_LEN);
        let parsed = read(&buf).unwrap();
        assert_eq!(parsed, desc);
    }

    #[test]
    fn write_rejects_short_buffer() {
        let desc = sample_desc();
        let mut buf = [0u8; HEADER_LEN - 1];
        assert!(matches!(
            write(&desc, &mut buf),
            Err(GcsError::MessageTooBig { .. })
        ));
    }

    #[test]
    fn read_rejects_short_buffer() {
        let buf = [0u8; HEADER_LEN - 1];
        assert!(matches!(read(&buf), Err(GcsError::MessageTooBig { .. })));
    }

    #[test]
    fn read_tolerates_zero_length_payload() {
        let desc = FragmentDescriptor {
            action_size: 0,
            ..sample_desc()
        };
        let mut buf = [0u8; HEADER_LEN];
        write(&desc, &mut buf).unwrap();
        assert_eq!(read(&buf).unwrap().action_size, 0);
    }

    #[test]
    fn read_rejects_unsupported_version() {
        let mut buf = [0u8; HEADER_LEN];
        write(&sample_desc(), &mut buf).unwrap();
        buf[0] = MAX_PROTO_VERSION + 1;
        assert!(matches!(read(&buf), Err(GcsError::Protocol(_))));
    }

    #[test]
    fn write_rejects_action_id_overflowing_7_bytes() {
        let desc = FragmentDescriptor {
            action_id: 1 << 56,
            ..sample_desc()
        };
        let mut buf = [0u8; HEADER_LEN];
        assert!(write(&desc, &mut buf).is_err());
    }

    #[test]
    fn increment_fragment_no_only_touches_fragno_field() {
        let desc = sample_desc();
        let mut buf = [0u8; HEADER_LEN];
        write(&desc, &mut buf).unwrap();
        increment_fragment_no(&mut buf).unwrap();
        increment_fragment_no(&mut buf).unwrap();
        let parsed = read(&buf).unwrap();
        assert_eq!(parsed.fragment_no, 2);
        assert_eq!(parsed.action_id, desc.action_id);
        assert_eq!(parsed.action_size, desc.action_size);
    }

    proptest! {
        #[test]
        fn round_trip_prop(
            action_id in 0u64..=0x00FF_FFFF_FFFF_FFFF,
            action_size in 0u32..=u32::MAX,
            fragment_no in 0u32..=u32::MAX,
            action_type in 0u8..=255,
        ) {
            let desc = FragmentDescriptor {
                version: MAX_PROTO_VERSION,
                action_id,
                action_size,
                fragment_no,
                action_type,
            };
            let mut buf = [0u8; HEADER_LEN];
            write(&desc, &mut buf).unwrap();
            let parsed = read(&buf).unwrap();
            prop_assert_eq!(parsed, desc);
        }
    }
}
