//! Voting subsystem (spec §4.5 "Voting"): resolves per-seqno inconsistencies
//! across members by counting VOTE messages and an implicit zero-vote from
//! any member whose `last_applied` has already passed the target seqno.

use std::collections::HashMap;

use gcs_wire::Seqno;

/// A decided or still-pending vote outcome for one seqno.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Decided(i64),
    Pending,
}

#[derive(Default)]
struct Tally {
    counts: HashMap<i64, u32>,
    voters_seen: u32,
}

/// The shared zero-vote-policy-then-majority decision rule: `None` while
/// still pending, `Some(value)` once `tally` determines the outcome given
/// `total_voters` non-arbitrator members and `missing` members who have not
/// yet voted (directly or implicitly).
fn decide_from_tally(
    vote_policy: u8,
    tally: &Tally,
    total_voters: u32,
    missing: u32,
) -> Option<i64> {
    if tally.counts.is_empty() {
        return None;
    }

    let zero_count = *tally.counts.get(&0).unwrap_or(&0);
    if vote_policy >= 1 && zero_count >= u32::from(vote_policy) {
        return Some(0);
    }

    let (&leading_value, &leading_count) = tally
        .counts
        .iter()
        .max_by_key(|(_, count)| **count)
        .expect("tally is non-empty");

    let still_missing = total_voters.saturating_sub(tally.voters_seen).max(missing);
    // The leading value wins outright once no combination of the
    // remaining (still missing) votes could overtake it.
    let runner_up = tally
        .counts
        .iter()
        .filter(|(v, _)| **v != leading_value)
        .map(|(_, c)| *c)
        .max()
        .unwrap_or(0);
    if leading_count > runner_up + still_missing {
        return Some(leading_value);
    }

    None
}

/// Tracks in-flight votes and a bounded history of decided ones, keyed by
/// seqno.
pub struct VoteTable {
    vote_policy: u8,
    in_flight: HashMap<Seqno, Tally>,
    history: HashMap<Seqno, i64>,
}

impl VoteTable {
    #[must_use]
    pub fn new(vote_policy: u8) -> Self {
        Self {
            vote_policy,
            in_flight: HashMap::new(),
            history: HashMap::new(),
        }
    }

    /// Records one member's vote value for `seqno` and evaluates whether a
    /// decision can be made given `total_voters` non-arbitrator members and
    /// `missing` members who have not yet voted (directly or implicitly).
    pub fn record_vote(
        &mut self,
        seqno: Seqno,
        value: i64,
        total_voters: u32,
        missing: u32,
    ) -> VoteOutcome {
        if let Some(decided) = self.history.get(&seqno) {
            return VoteOutcome::Decided(*decided);
        }
        let tally = self.in_flight.entry(seqno).or_default();
        *tally.counts.entry(value).or_insert(0) += 1;
        tally.voters_seen += 1;

        self.evaluate(seqno, total_voters, missing)
    }

    /// Records an implicit zero vote from a member whose `last_applied`
    /// has already passed `seqno`.
    pub fn record_implicit_zero(&mut self, seqno: Seqno, total_voters: u32, missing: u32) -> VoteOutcome {
        self.record_vote(seqno, 0, total_voters, missing)
    }

    /// Replaces the in-flight tally for `seqno` with a fresh one built from
    /// `votes` (one entry per member who has voted so far, explicitly or
    /// implicitly) and `total_voters` non-arbitrator members.
    ///
    /// Used by the controller's background loop, which re-derives the full
    /// vote set from live `NodeRecord` state on every incoming VOTE message
    /// (including this node's own, looped back through the transport) rather
    /// than incrementing a running count — a member's vote can change value
    /// between observations, which an incremental tally cannot retract.
    pub fn reconcile_members(
        &mut self,
        seqno: Seqno,
        votes: &[i64],
        total_voters: u32,
    ) -> VoteOutcome {
        if let Some(decided) = self.history.get(&seqno) {
            return VoteOutcome::Decided(*decided);
        }

        let mut tally = Tally::default();
        for &value in votes {
            *tally.counts.entry(value).or_insert(0) += 1;
            tally.voters_seen += 1;
        }
        let missing = total_voters.saturating_sub(tally.voters_seen);
        self.in_flight.insert(seqno, tally);

        self.evaluate(seqno, total_voters, missing)
    }

    fn evaluate(&mut self, seqno: Seqno, total_voters: u32, missing: u32) -> VoteOutcome {
        let Some(tally) = self.in_flight.get(&seqno) else {
            return VoteOutcome::Pending;
        };

        if let Some(decision) = decide_from_tally(self.vote_policy, tally, total_voters, missing) {
            self.decide(seqno, decision);
            return VoteOutcome::Decided(decision);
        }

        VoteOutcome::Pending
    }

    fn decide(&mut self, seqno: Seqno, value: i64) {
        self.in_flight.remove(&seqno);
        self.history.insert(seqno, value);
    }

    #[must_use]
    pub fn decided(&self, seqno: Seqno) -> Option<i64> {
        self.history.get(&seqno).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_decides_once_no_remaining_voter_can_overtake() {
        let mut t = VoteTable::new(0);
        // A votes first: 1 vote in, 2 still outstanding, can't yet decide.
        assert_eq!(t.record_vote(100, 0xAA, 3, 2), VoteOutcome::Pending);
        // B agrees: 2-of-3 for 0xAA, and the one remaining voter (C) can't
        // overtake a 2-vote lead by casting a single dissenting vote.
        assert_eq!(
            t.record_vote(100, 0xAA, 3, 1),
            VoteOutcome::Decided(0xAA)
        );
        // C's dissenting vote arrives after the fact; the decision is cached.
        let outcome = t.record_vote(100, 0xBB, 3, 0);
        assert_eq!(outcome, VoteOutcome::Decided(0xAA));
    }

    #[test]
    fn reconcile_members_decides_cross_member_majority() {
        let mut t = VoteTable::new(0);
        // Only A has voted so far: 1-of-3, two still outstanding.
        assert_eq!(
            t.reconcile_members(100, &[0xAA], 3),
            VoteOutcome::Pending
        );
        // A and B agree on 0xAA; C has not voted yet.
        assert_eq!(
            t.reconcile_members(100, &[0xAA, 0xAA], 3),
            VoteOutcome::Decided(0xAA)
        );
        // C's dissenting vote arrives after the fact; cached decision wins.
        assert_eq!(
            t.reconcile_members(100, &[0xAA, 0xAA, 0xBB], 3),
            VoteOutcome::Decided(0xAA)
        );
    }

    #[test]
    fn reconcile_members_replaces_rather_than_accumulates() {
        let mut t = VoteTable::new(0);
        // A single member flips its vote between observations; reconciling
        // from the live member table must not double-count the old value.
        assert_eq!(t.reconcile_members(100, &[0xAA], 3), VoteOutcome::Pending);
        assert_eq!(t.reconcile_members(100, &[0xBB], 3), VoteOutcome::Pending);
    }

    #[test]
    fn implicit_zero_counts_toward_zero_vote_policy() {
        let mut t = VoteTable::new(2);
        assert_eq!(t.record_implicit_zero(100, 3, 2), VoteOutcome::Pending);
        let outcome = t.record_implicit_zero(100, 3, 1);
        assert_eq!(outcome, VoteOutcome::Decided(0));
    }

    #[test]
    fn vote_policy_zero_count_below_threshold_still_awaits_explicit_votes() {
        let mut t = VoteTable::new(2);
        let outcome = t.record_implicit_zero(100, 3, 2);
        assert_eq!(outcome, VoteOutcome::Pending);
    }

    #[test]
    fn decided_seqno_is_cached_in_history() {
        let mut t = VoteTable::new(0);
        t.record_vote(100, 7, 1, 0);
        assert_eq!(t.decided(100), Some(7));
    }
}
