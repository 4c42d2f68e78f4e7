//! Aggregated controller statistics (spec §6 "Statistics"), combining the
//! send monitor's queue-length profile with action/commit-cut counters.

use crate::send_monitor::SendMonitorStats;

/// A point-in-time snapshot of controller activity since the last
/// [`crate::controller::LifecycleController::flush_stats`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerStats {
    pub send: SendMonitorStats,
    pub actions_sent: u64,
    pub actions_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub commit_cuts: u64,
    pub votes_decided: u64,
    pub fc_stops_sent: u64,
    pub fc_conts_sent: u64,
}

/// Accumulates counters between `flush_stats` calls.
#[derive(Debug, Default)]
pub struct StatsCollector {
    actions_sent: u64,
    actions_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
    commit_cuts: u64,
    votes_decided: u64,
    fc_stops_sent: u64,
    fc_conts_sent: u64,
}

impl StatsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.actions_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.actions_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn record_commit_cut(&mut self) {
        self.commit_cuts += 1;
    }

    pub fn record_vote_decided(&mut self) {
        self.votes_decided += 1;
    }

    pub fn record_fc_stop_sent(&mut self) {
        self.fc_stops_sent += 1;
    }

    pub fn record_fc_cont_sent(&mut self) {
        self.fc_conts_sent += 1;
    }

    #[must_use]
    pub fn snapshot(&self, send: SendMonitorStats) -> ControllerStats {
        ControllerStats {
            send,
            actions_sent: self.actions_sent,
            actions_received: self.actions_received,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            commit_cuts: self.commit_cuts,
            votes_decided: self.votes_decided,
            fc_stops_sent: self.fc_stops_sent,
            fc_conts_sent: self.fc_conts_sent,
        }
    }

    /// Resets all counters to zero, returning the snapshot taken just
    /// before the reset.
    pub fn flush(&mut self, send: SendMonitorStats) -> ControllerStats {
        let snap = self.snapshot(send);
        *self = Self::default();
        snap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_flush_resets() {
        let mut c = StatsCollector::new();
        c.record_sent(10);
        c.record_received(20);
        c.record_commit_cut();
        let snap = c.flush(SendMonitorStats::default());
        assert_eq!(snap.actions_sent, 1);
        assert_eq!(snap.bytes_sent, 10);
        assert_eq!(snap.actions_received, 1);
        assert_eq!(snap.bytes_received, 20);
        assert_eq!(snap.commit_cuts, 1);

        let snap2 = c.snapshot(SendMonitorStats::default());
        assert_eq!(snap2.actions_sent, 0);
    }
}
