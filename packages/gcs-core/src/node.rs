//! Per-member node record.

use gcs_wire::{MemberId, Seqno, SEQNO_ILL};

use crate::defrag::Defragmenter;

/// Per-node lifecycle status (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeStatus {
    NonPrim,
    Prim,
    Joiner,
    Donor,
    Joined,
    Synced,
}

/// Supported protocol versions as reported by a member's state message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtoVersions {
    pub gcs: u8,
    pub repl: u8,
    pub appl: u8,
}

/// Everything the membership engine and replication core track about one
/// member of the current component.
#[derive(Debug)]
pub struct NodeRecord {
    pub id: MemberId,
    pub name: String,
    pub incoming_addr: String,
    pub status: NodeStatus,
    pub bootstrap: bool,
    pub arbitrator: bool,
    pub segment: u32,

    /// Member this node is donating state to, if any.
    pub donating_to: Option<MemberId>,
    /// Member this node is receiving state from, if any.
    pub joining_from: Option<MemberId>,

    pub last_applied: Seqno,
    pub vote_seqno: Seqno,
    pub vote_value: i64,
    /// Lowest seqno still available from this member for IST.
    pub cached: Seqno,
    pub proto: ProtoVersions,
    pub desync_count: u32,
    /// Whether this node's `last_applied` counts toward the group commit-cut.
    pub count_last_applied: bool,

    pub data_defrag: Defragmenter,
    pub service_defrag: Defragmenter,
}

impl NodeRecord {
    #[must_use]
    pub fn new(id: MemberId, name: String, incoming_addr: String, segment: u32) -> Self {
        Self {
            id,
            name,
            incoming_addr,
            status: NodeStatus::NonPrim,
            bootstrap: false,
            arbitrator: false,
            segment,
            donating_to: None,
            joining_from: None,
            last_applied: 0,
            vote_seqno: SEQNO_ILL,
            vote_value: 0,
            cached: SEQNO_ILL,
            proto: ProtoVersions::default(),
            desync_count: 0,
            count_last_applied: true,
            data_defrag: Defragmenter::new(),
            service_defrag: Defragmenter::new(),
        }
    }

    /// Carries over state from a previous record with the same ID across a
    /// component change: preserves defragmenter progress and counters but
    /// resets transfer relationships, which must be re-established.
    pub fn carry_over(&mut self, prev: NodeRecord) {
        self.last_applied = prev.last_applied;
        self.vote_seqno = prev.vote_seqno;
        self.vote_value = prev.vote_value;
        self.cached = prev.cached;
        self.proto = prev.proto;
        self.desync_count = prev.desync_count;
        self.count_last_applied = prev.count_last_applied;
        self.data_defrag = prev.data_defrag;
        self.service_defrag = prev.service_defrag;
        self.bootstrap = prev.bootstrap;
        self.arbitrator = prev.arbitrator;
    }

    #[must_use]
    pub fn is_donor(&self) -> bool {
        self.status == NodeStatus::Donor
    }

    #[must_use]
    pub fn is_joiner(&self) -> bool {
        self.status == NodeStatus::Joiner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> NodeRecord {
        NodeRecord::new(MemberId::new(id).unwrap(), id.to_string(), String::new(), 0)
    }

    #[test]
    fn new_record_starts_non_prim_with_zero_last_applied_and_illegal_cached() {
        let n = record("n0");
        assert_eq!(n.status, NodeStatus::NonPrim);
        assert_eq!(n.last_applied, 0);
        assert_eq!(n.cached, SEQNO_ILL);
    }

    #[test]
    fn carry_over_preserves_counters_and_defrag_state() {
        let mut prev = record("n0");
        prev.last_applied = 42;
        prev.desync_count = 3;
        prev.cached = 10;

        let mut next = record("n0");
        next.carry_over(prev);
        assert_eq!(next.last_applied, 42);
        assert_eq!(next.desync_count, 3);
        assert_eq!(next.cached, 10);
    }

    #[test]
    fn donor_has_at_least_one_desync_invariant_is_caller_enforced() {
        let mut n = record("n0");
        n.status = NodeStatus::Donor;
        n.desync_count = 1;
        assert!(n.is_donor());
    }
}
