pub mod config;
pub mod controller;
pub mod core;
pub mod defrag;
pub mod fifo;
pub mod flow_control;
pub mod group;
pub mod node;
pub mod quorum;
pub mod send_monitor;
pub mod sst;
pub mod stats;
pub mod transport;
pub mod vote;

pub use config::ControllerConfig;
pub use controller::{ControllerState, LifecycleController};
pub use core::{CoreState, Dispatched, ReplicationCore};
pub use defrag::{Channel, Defragmenter, FeedOutcome};
pub use fifo::Fifo;
pub use flow_control::{FlowControl, SstThrottle};
pub use group::{ComponentEvent, ComponentMember, Group, GroupState};
pub use node::{NodeRecord, NodeStatus};
pub use quorum::StateQuorum;
pub use send_monitor::{ScheduleHandle, SendMonitor, SendMonitorStats};
pub use stats::{ControllerStats, StatsCollector};
pub use transport::{LoopbackTransport, Transport, TransportMessage};
pub use vote::{VoteOutcome, VoteTable};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
