//! Per-(sender, channel) fragment reassembly buffer.

use gcs_wire::{FragmentDescriptor, GcsError};

/// Which of a node's two defragmenters a fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Data,
    Service,
}

/// Reassembles fragments belonging to one sender on one channel into a
/// complete action buffer.
#[derive(Debug, Default)]
pub struct Defragmenter {
    action_id: Option<u64>,
    expected_fragno: u32,
    declared_size: u32,
    received: u32,
    buf: Vec<u8>,
    /// Set by the owner on reconfiguration; the in-progress action is
    /// discarded silently on its next fragment.
    reset: bool,
}

/// Outcome of feeding one fragment to a [`Defragmenter`].
#[derive(Debug, PartialEq, Eq)]
pub enum FeedOutcome {
    /// More fragments are still expected.
    InProgress,
    /// A strictly earlier fragment-number for the same action; ignored.
    Duplicate,
    /// The action is now fully reassembled; take the buffer with
    /// [`Defragmenter::take_completed`].
    Complete { action_id: u64, total_len: u32 },
}

impl Defragmenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that the in-progress action (if any) be silently discarded
    /// on the next fragment fed to this defragmenter.
    pub fn mark_reset(&mut self) {
        self.reset = true;
    }

    /// Feeds one fragment's header and payload.
    ///
    /// # Errors
    ///
    /// Returns [`GcsError::Protocol`] on any sequencing violation not
    /// covered by the duplicate-tolerance or post-reset-restart rules.
    pub fn feed(
        &mut self,
        desc: &FragmentDescriptor,
        payload: &[u8],
        local: bool,
    ) -> Result<FeedOutcome, GcsError> {
        match self.action_id {
            None => self.feed_first(desc, payload, local),
            Some(current_id) => {
                if self.reset {
                    if desc.fragment_no == 0 {
                        self.action_id = None;
                        self.reset = false;
                        return self.feed_first(desc, payload, local);
                    }
                    // Non-first fragment while reset and not restarting:
                    // silently discard the stale in-progress action.
                    self.action_id = None;
                    self.buf.clear();
                    self.received = 0;
                    self.reset = false;
                    return Ok(FeedOutcome::Duplicate);
                }
                if desc.action_id != current_id {
                    return Err(GcsError::Protocol(format!(
                        "fragment for action {} while reassembling {current_id}",
                        desc.action_id
                    )));
                }
                if desc.fragment_no < self.expected_fragno {
                    return Ok(FeedOutcome::Duplicate);
                }
                if desc.fragment_no != self.expected_fragno {
                    return Err(GcsError::Protocol(format!(
                        "out-of-order fragment {} expected {}",
                        desc.fragment_no, self.expected_fragno
                    )));
                }
                self.append(payload);
                self.expected_fragno += 1;
                self.outcome_after_append(current_id)
            }
        }
    }

    fn feed_first(
        &mut self,
        desc: &FragmentDescriptor,
        payload: &[u8],
        local: bool,
    ) -> Result<FeedOutcome, GcsError> {
        if desc.fragment_no != 0 {
            if local && self.reset {
                // Post-reset restart tolerated by the duplicate branch above;
                // reaching here means no action was in progress at all.
                return Ok(FeedOutcome::Duplicate);
            }
            return Err(GcsError::Protocol(
                "first fragment for a new action must have fragment_no == 0".to_string(),
            ));
        }
        self.action_id = Some(desc.action_id);
        self.declared_size = desc.action_size;
        self.received = 0;
        self.buf.clear();
        self.buf.reserve(desc.action_size as usize);
        self.reset = false;
        self.append(payload);
        self.expected_fragno = 1;
        self.outcome_after_append(desc.action_id)
    }

    fn append(&mut self, payload: &[u8]) {
        self.buf.extend_from_slice(payload);
        self.received += payload.len() as u32;
    }

    fn outcome_after_append(&self, action_id: u64) -> Result<FeedOutcome, GcsError> {
        if self.received == self.declared_size {
            Ok(FeedOutcome::Complete {
                action_id,
                total_len: self.declared_size,
            })
        } else {
            Ok(FeedOutcome::InProgress)
        }
    }

    /// Takes ownership of the completed buffer and resets the defragmenter
    /// for the next action. Panics if called before a `Complete` outcome.
    pub fn take_completed(&mut self) -> Vec<u8> {
        let buf = std::mem::take(&mut self.buf);
        self.action_id = None;
        self.expected_fragno = 0;
        self.declared_size = 0;
        self.received = 0;
        buf
    }

    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.action_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(action_id: u64, action_size: u32, fragment_no: u32) -> FragmentDescriptor {
        FragmentDescriptor {
            version: 1,
            action_id,
            action_size,
            fragment_no,
            action_type: 0,
        }
    }

    #[test]
    fn three_fragment_round_trip() {
        let mut d = Defragmenter::new();
        assert_eq!(
            d.feed(&desc(1, 10, 0), b"3031", false).unwrap(),
            FeedOutcome::InProgress
        );
        assert_eq!(
            d.feed(&desc(1, 10, 1), b"3233", false).unwrap(),
            FeedOutcome::InProgress
        );
        let outcome = d.feed(&desc(1, 10, 2), b"34", false).unwrap();
        assert_eq!(
            outcome,
            FeedOutcome::Complete {
                action_id: 1,
                total_len: 10
            }
        );
        assert_eq!(d.take_completed(), b"3031323334".to_vec());
    }

    #[test]
    fn duplicate_fragment_is_tolerated() {
        let mut d = Defragmenter::new();
        d.feed(&desc(1, 6, 0), b"2021", false).unwrap();
        // Re-inject fragment #0: strictly earlier than expected (1).
        let outcome = d.feed(&desc(1, 6, 0), b"2021", false).unwrap();
        assert_eq!(outcome, FeedOutcome::Duplicate);
        let outcome = d.feed(&desc(1, 6, 1), b"22", false).unwrap();
        assert_eq!(
            outcome,
            FeedOutcome::Complete {
                action_id: 1,
                total_len: 6
            }
        );
        assert_eq!(d.take_completed(), b"202122".to_vec());
    }

    #[test]
    fn mismatched_action_id_is_protocol_error() {
        let mut d = Defragmenter::new();
        d.feed(&desc(1, 10, 0), b"ab", false).unwrap();
        assert!(d.feed(&desc(2, 10, 1), b"cd", false).is_err());
    }

    #[test]
    fn out_of_order_fragment_is_protocol_error() {
        let mut d = Defragmenter::new();
        d.feed(&desc(1, 10, 0), b"ab", false).unwrap();
        assert!(d.feed(&desc(1, 10, 2), b"cd", false).is_err());
    }

    #[test]
    fn reset_discards_in_progress_action_on_next_fragment() {
        let mut d = Defragmenter::new();
        d.feed(&desc(1, 10, 0), b"ab", false).unwrap();
        d.mark_reset();
        // Non-restart fragment while reset: silently discarded.
        let outcome = d.feed(&desc(1, 10, 1), b"cd", false).unwrap();
        assert_eq!(outcome, FeedOutcome::Duplicate);
        assert!(!d.is_in_progress());
    }

    #[test]
    fn local_reset_restart_with_new_action_id_succeeds() {
        let mut d = Defragmenter::new();
        d.feed(&desc(1, 10, 0), b"ab", false).unwrap();
        d.mark_reset();
        let outcome = d.feed(&desc(2, 4, 0), b"xy", true).unwrap();
        assert_eq!(outcome, FeedOutcome::InProgress);
    }

    #[test]
    fn zero_size_action_completes_immediately() {
        let mut d = Defragmenter::new();
        let outcome = d.feed(&desc(1, 0, 0), b"", false).unwrap();
        assert_eq!(
            outcome,
            FeedOutcome::Complete {
                action_id: 1,
                total_len: 0
            }
        );
    }
}
