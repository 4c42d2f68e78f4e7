//! Lifecycle controller (spec §4.5, §6): the application-facing state
//! machine built on [`crate::core::ReplicationCore`], adding flow control,
//! state-transfer donor selection, voting, and statistics.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gcs_wire::{code_msg, Action, ActionType, CodeMsg, FlowMsg, GcsError, Gtid, MemberId, Seqno};

use crate::config::ControllerConfig;
use crate::core::{CoreState, Dispatched, ReplicationCore};
use crate::flow_control::{FlowControl, SstThrottle};
use crate::send_monitor::ScheduleHandle;
use crate::sst;
use crate::stats::{ControllerStats, StatsCollector};
use crate::transport::{Transport, TransportMessage};
use crate::vote::{VoteOutcome, VoteTable};

/// Outer, application-visible lifecycle state (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Destroyed,
    Closed,
    Open,
    Primary,
    Joiner,
    DonorDesynced,
    Joined,
    Synced,
}

struct Shared {
    core: Arc<ReplicationCore>,
    flow_control: Mutex<FlowControl>,
    sst_throttle: Mutex<SstThrottle>,
    vote_table: Mutex<VoteTable>,
    stats: Mutex<StatsCollector>,
    state: Mutex<ControllerState>,
}

/// The application-visible connection handle.
pub struct LifecycleController {
    shared: Arc<Shared>,
    config: ControllerConfig,
    recv_rx: Mutex<mpsc::UnboundedReceiver<Action>>,
    recv_tx: mpsc::UnboundedSender<Action>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleController {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, my_id: MemberId, config: ControllerConfig) -> Self {
        let core = Arc::new(ReplicationCore::new(
            transport,
            my_id,
            config.max_packet_size,
            config.send_fifo_capacity,
        ));
        let (recv_tx, recv_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                core,
                flow_control: Mutex::new(FlowControl::new(
                    config.fc_base_limit,
                    config.fc_resume_factor,
                    config.fc_master_slave,
                )),
                sst_throttle: Mutex::new(SstThrottle::new(
                    config.recv_q_soft_limit,
                    config.recv_q_hard_limit,
                    config.max_throttle,
                )),
                vote_table: Mutex::new(VoteTable::new(config.vote_policy)),
                stats: Mutex::new(StatsCollector::new()),
                state: Mutex::new(ControllerState::Closed),
            }),
            config,
            recv_rx: Mutex::new(recv_rx),
            recv_tx,
            recv_task: Mutex::new(None),
        }
    }

    #[must_use]
    pub async fn state(&self) -> ControllerState {
        *self.shared.state.lock().await
    }

    async fn set_state(&self, s: ControllerState) {
        *self.shared.state.lock().await = s;
    }

    /// Opens the connection: opens the transport and starts the background
    /// dispatch loop that feeds [`LifecycleController::recv`].
    ///
    /// # Errors
    ///
    /// Propagates [`GcsError::NotConnected`] from the transport.
    pub async fn open(&self, channel: &str, url: &str, bootstrap: bool) -> Result<(), GcsError> {
        self.shared.core.transport().open(channel, url, bootstrap).await?;
        self.set_state(ControllerState::Open).await;

        let shared = Arc::clone(&self.shared);
        let tx = self.recv_tx.clone();
        let handle = tokio::spawn(async move {
            loop {
                let msg = match shared.core.transport().recv().await {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(error = %e, "receive loop stopping");
                        break;
                    }
                };
                match shared.core.dispatch(msg).await {
                    Ok(Dispatched::Actions(actions)) => {
                        for action in actions {
                            handle_action_side_effects(&shared, &action).await;
                            let action_len = action.buf.len() as u64;
                            if tx.send(action).is_err() {
                                return;
                            }
                            apply_recv_queue_flow_control(&shared, tx.len() as u64).await;
                            throttle_if_joiner(&shared, action_len).await;
                        }
                    }
                    Ok(Dispatched::None) => {}
                    Err(e) if e.is_fatal() => {
                        warn!(error = %e, "fatal protocol error, stopping receive loop");
                        let _ = tx.send(Action::error(-1, 0));
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "dispatch error");
                    }
                }
            }
        });
        *self.recv_task.lock().await = Some(handle);
        Ok(())
    }

    /// Sends an action, waiting for send-monitor admission first.
    ///
    /// # Errors
    ///
    /// See [`ReplicationCore::send`].
    pub async fn send(&self, payload: &[u8], action_type: ActionType) -> Result<usize, GcsError> {
        let n = self.shared.core.send(payload, action_type).await?;
        self.shared.stats.lock().await.record_sent(n);
        Ok(n)
    }

    /// Alias for [`LifecycleController::send`] with [`ActionType::Writeset`],
    /// matching the upper layer's "replicate" terminology.
    ///
    /// # Errors
    ///
    /// See [`LifecycleController::send`].
    pub async fn replicate(&self, payload: &[u8]) -> Result<usize, GcsError> {
        self.send(payload, ActionType::Writeset).await
    }

    /// Waits for the next action, or returns [`GcsError::TimedOut`] if
    /// `timeout` elapses first.
    ///
    /// # Errors
    ///
    /// [`GcsError::NotConnected`] once the receive loop has stopped and
    /// drained; [`GcsError::TimedOut`] on timeout.
    pub async fn recv(&self, timeout: Option<Duration>) -> Result<Action, GcsError> {
        let mut rx = self.recv_rx.lock().await;
        let action = match timeout {
            Some(d) => tokio::time::timeout(d, rx.recv())
                .await
                .map_err(|_| GcsError::TimedOut)?,
            None => rx.recv().await,
        };
        let action = action.ok_or(GcsError::NotConnected)?;
        self.shared.stats.lock().await.record_received(action.buf.len());
        Ok(action)
    }

    /// Announces the locally applied seqno to the group (spec's LAST
    /// message), used to advance the group commit-cut.
    ///
    /// # Errors
    ///
    /// Propagates transport send errors.
    pub async fn set_last_applied(&self, seqno: Seqno) -> Result<(), GcsError> {
        let group_uuid = self.shared.core.group.read().await.group_uuid;
        let buf = code_msg::write(&CodeMsg {
            gtid: Gtid::new(group_uuid, seqno),
            code: 0,
        });
        self.shared
            .core
            .transport()
            .send(TransportMessage::Last {
                sender: self.shared.core.my_id().clone(),
                payload: buf.to_vec(),
            })
            .await?;
        Ok(())
    }

    /// Selects a donor for a state-transfer request and transitions to
    /// JOINER, matching the spec's donor-selection algorithm.
    ///
    /// # Errors
    ///
    /// [`GcsError::Again`] if no eligible donor exists in the current
    /// component.
    pub async fn request_state_transfer(
        &self,
        ist_seqno: Seqno,
    ) -> Result<MemberId, GcsError> {
        let group = self.shared.core.group.read().await;
        let my_id = self.shared.core.my_id().clone();
        let my_segment = group.node_by_id(&my_id).map(|n| n.segment).unwrap_or(0);
        let conf_seqno = group.act_id;
        let donor = sst::select_donor(&group.nodes, &my_id, my_segment, ist_seqno, conf_seqno)?
            .id
            .clone();
        drop(group);
        self.set_state(ControllerState::Joiner).await;
        Ok(donor)
    }

    /// Marks this node as its own donor (desync), incrementing its
    /// desync count so a concurrent donor request does not demote it.
    pub async fn desync(&self) -> MemberId {
        let my_id = self.shared.core.my_id().clone();
        let donor = sst::self_desync_donor(&my_id);
        {
            let mut group = self.shared.core.group.write().await;
            if let Some(node) = group.node_mut_by_id(&my_id) {
                node.desync_count += 1;
                node.status = crate::node::NodeStatus::Donor;
            }
        }
        self.set_state(ControllerState::DonorDesynced).await;
        donor
    }

    /// Announces this node has finished joining at `seqno` (spec's JOIN
    /// message).
    ///
    /// # Errors
    ///
    /// Propagates transport send errors.
    pub async fn join(&self, seqno: Seqno) -> Result<(), GcsError> {
        let group_uuid = self.shared.core.group.read().await.group_uuid;
        let buf = code_msg::write(&CodeMsg {
            gtid: Gtid::new(group_uuid, seqno),
            code: 0,
        });
        self.shared
            .core
            .transport()
            .send(TransportMessage::Join {
                sender: self.shared.core.my_id().clone(),
                payload: buf.to_vec(),
            })
            .await?;
        self.set_state(ControllerState::Joined).await;
        Ok(())
    }

    /// Announces this node has caught up and is ready to serve traffic
    /// (spec's SYNC message).
    ///
    /// # Errors
    ///
    /// Propagates transport send errors.
    pub async fn synced(&self, seqno: Seqno) -> Result<(), GcsError> {
        let group_uuid = self.shared.core.group.read().await.group_uuid;
        let buf = code_msg::write(&CodeMsg {
            gtid: Gtid::new(group_uuid, seqno),
            code: 0,
        });
        self.shared
            .core
            .transport()
            .send(TransportMessage::Sync {
                sender: self.shared.core.my_id().clone(),
                payload: buf.to_vec(),
            })
            .await?;
        self.set_state(ControllerState::Synced).await;
        Ok(())
    }

    /// Casts this node's vote for `seqno`, broadcasting it. The tally is
    /// reconciled from the live member table by the background receive loop
    /// once this node's own broadcast loops back (see
    /// [`LifecycleController::vote_decided`] for the outcome).
    ///
    /// # Errors
    ///
    /// Propagates transport send errors.
    pub async fn vote(&self, seqno: Seqno, value: i64) -> Result<(), GcsError> {
        let group_uuid = self.shared.core.group.read().await.group_uuid;
        let buf = code_msg::write(&CodeMsg {
            gtid: Gtid::new(group_uuid, seqno),
            code: value,
        });
        self.shared
            .core
            .transport()
            .send(TransportMessage::Vote {
                sender: self.shared.core.my_id().clone(),
                payload: buf.to_vec(),
            })
            .await?;
        Ok(())
    }

    /// Returns the decided value for `seqno`'s vote, once the cross-member
    /// tally has resolved it.
    pub async fn vote_decided(&self, seqno: Seqno) -> Option<i64> {
        self.shared.vote_table.lock().await.decided(seqno)
    }

    /// Reserves a send-monitor slot without entering it, for callers that
    /// want to overlap scheduling with unrelated work before sending.
    ///
    /// # Errors
    ///
    /// See [`crate::send_monitor::SendMonitor::schedule`].
    pub async fn schedule(&self) -> Result<ScheduleHandle, GcsError> {
        self.shared.core.send_monitor().schedule().await
    }

    /// Cancels a still-queued schedule handle.
    ///
    /// # Errors
    ///
    /// See [`crate::send_monitor::SendMonitor::interrupt`].
    pub async fn interrupt(&self, handle: ScheduleHandle) -> Result<(), GcsError> {
        self.shared.core.send_monitor().interrupt(handle).await
    }

    /// Sets a runtime parameter, trying the controller's own config first
    /// and falling back to the transport (spec §6 "param_set chain": the
    /// membership engine currently exposes no mutable runtime parameters of
    /// its own, so it is skipped).
    ///
    /// # Errors
    ///
    /// [`GcsError::UnknownParam`] if no layer recognizes `key`.
    pub fn param_set(&mut self, key: &str, value: &str) -> Result<(), GcsError> {
        match self.config.set(key, value) {
            Ok(()) => Ok(()),
            Err(GcsError::UnknownParam(_)) => self.shared.core.transport().param_set(key, value),
            Err(e) => Err(e),
        }
    }

    /// # Errors
    ///
    /// [`GcsError::UnknownParam`] if no layer recognizes `key`.
    pub fn param_get(&self, key: &str) -> Result<String, GcsError> {
        match self.config.get(key) {
            Ok(v) => Ok(v),
            Err(GcsError::UnknownParam(_)) => self.shared.core.transport().param_get(key),
            Err(e) => Err(e),
        }
    }

    pub async fn get_stats(&self) -> ControllerStats {
        let send_stats = self.shared.core.send_monitor().stats().await;
        self.shared.stats.lock().await.snapshot(send_stats)
    }

    pub async fn flush_stats(&self) -> ControllerStats {
        let send_stats = self.shared.core.send_monitor().stats().await;
        self.shared.stats.lock().await.flush(send_stats)
    }

    /// Closes the connection and stops the background receive loop.
    ///
    /// # Errors
    ///
    /// See [`ReplicationCore::close`].
    pub async fn close(&self) -> Result<(), GcsError> {
        self.shared.core.close().await?;
        if let Some(handle) = self.recv_task.lock().await.take() {
            handle.abort();
        }
        self.set_state(ControllerState::Closed).await;
        Ok(())
    }

    pub async fn destroy(&self) {
        self.shared.core.destroy().await;
        if let Some(handle) = self.recv_task.lock().await.take() {
            handle.abort();
        }
        self.set_state(ControllerState::Destroyed).await;
    }

    #[must_use]
    pub fn core(&self) -> &Arc<ReplicationCore> {
        &self.shared.core
    }
}

async fn handle_action_side_effects(shared: &Shared, action: &Action) {
    match action.action_type {
        ActionType::Cchange => {
            let member_count = shared.core.group.read().await.nodes.len().max(1) as u32;
            let mut fc = shared.flow_control.lock().await;
            fc.recompute(member_count);
            fc.reset_stop_count();
            if *shared.state.lock().await != ControllerState::Destroyed {
                *shared.state.lock().await = ControllerState::Primary;
            }
            info!(member_count, "component change applied");
        }
        ActionType::CommitCut => {
            shared.stats.lock().await.record_commit_cut();
        }
        ActionType::Vote => {
            let Ok(target_bytes): Result<[u8; 8], _> = action.buf.get(..8).unwrap_or(&[]).try_into()
            else {
                return;
            };
            let target = i64::from_be_bytes(target_bytes);

            let (votes, total_voters) = {
                let group = shared.core.group.read().await;
                let mut votes = Vec::with_capacity(group.nodes.len());
                let mut total_voters = 0u32;
                for node in &group.nodes {
                    if node.arbitrator {
                        continue;
                    }
                    total_voters += 1;
                    if node.vote_seqno >= target {
                        votes.push(node.vote_value);
                    } else if node.last_applied >= target {
                        votes.push(0);
                    }
                }
                (votes, total_voters)
            };

            let outcome = shared
                .vote_table
                .lock()
                .await
                .reconcile_members(target, &votes, total_voters);
            if matches!(outcome, VoteOutcome::Decided(_)) {
                shared.stats.lock().await.record_vote_decided();
            }
        }
        ActionType::Flow => {
            if action.buf.len() == gcs_wire::code_msg::FLOW_MSG_LEN {
                if let Ok(flow) = gcs_wire::code_msg::read_flow(&action.buf) {
                    let mut fc = shared.flow_control.lock().await;
                    if flow.stop {
                        if fc.on_stop_received() {
                            shared.core.send_monitor().pause().await;
                        }
                    } else if fc.on_cont_received() {
                        shared.core.send_monitor().r#continue().await;
                    }
                }
            }
        }
        _ => {}
    }
}

/// Feeds the depth of the outstanding recv queue (spec §4.5 "Primary-
/// component FC") into [`FlowControl`] and broadcasts FC_STOP/FC_CONT on
/// the stop/continue edges.
async fn apply_recv_queue_flow_control(shared: &Shared, recv_queue_len: u64) {
    let Some(stop) = shared
        .flow_control
        .lock()
        .await
        .note_recv_queue(recv_queue_len, 0)
    else {
        return;
    };

    let conf_id = u32::try_from(shared.core.group.read().await.conf_id()).unwrap_or(0);
    let buf = code_msg::write_flow(&FlowMsg { conf_id, stop }).to_vec();
    let sent = shared
        .core
        .transport()
        .send(TransportMessage::Flow {
            sender: shared.core.my_id().clone(),
            payload: buf,
        })
        .await;
    if sent.is_ok() {
        let mut stats = shared.stats.lock().await;
        if stop {
            stats.record_fc_stop_sent();
        } else {
            stats.record_fc_cont_sent();
        }
    }
}

/// While JOINER, runs every delivered action's size through
/// [`SstThrottle::process`] and honors its returned sleep (spec §4.5
/// "State-transfer FC").
async fn throttle_if_joiner(shared: &Shared, size: u64) {
    if *shared.state.lock().await != ControllerState::Joiner {
        return;
    }
    match shared.sst_throttle.lock().await.process(size) {
        Ok(0) => {}
        Ok(sleep_ns) => tokio::time::sleep(Duration::from_nanos(sleep_ns)).await,
        Err(e) => warn!(error = %e, "state-transfer throttle hard limit reached"),
    }
}

impl CoreState {
    #[must_use]
    pub fn as_controller_state(self) -> ControllerState {
        match self {
            CoreState::Primary => ControllerState::Primary,
            CoreState::Exchange | CoreState::NonPrimary => ControllerState::Open,
            CoreState::Closed => ControllerState::Closed,
            CoreState::Destroyed => ControllerState::Destroyed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;

    fn config() -> ControllerConfig {
        ControllerConfig {
            send_fifo_capacity: 8,
            max_packet_size: 256,
            ..ControllerConfig::default()
        }
    }

    async fn bootstrap_singleton() -> LifecycleController {
        let transport = LoopbackTransport::new("n0");
        LoopbackTransport::link(&transport, &transport).await;
        let my_id = MemberId::new("n0").unwrap();
        let ctrl = LifecycleController::new(transport, my_id.clone(), config());
        ctrl.open("test", "loopback://", true).await.unwrap();

        let comp = gcs_wire::ComponentMessage {
            conf_id: 1,
            primary: true,
            bootstrap: true,
            my_index: 0,
            members: vec![gcs_wire::ComponentMember {
                id: my_id,
                name: "n0".to_string(),
                incoming_addr: String::new(),
                segment: 0,
            }],
        };
        ctrl.core()
            .transport()
            .send(TransportMessage::Component(comp))
            .await
            .unwrap();
        // Let the background dispatch loop observe the CCHANGE action.
        let _ = ctrl.recv(Some(Duration::from_millis(200))).await.unwrap();
        ctrl
    }

    #[tokio::test]
    async fn open_then_component_reaches_primary_controller_state() {
        let ctrl = bootstrap_singleton().await;
        assert_eq!(ctrl.state().await, ControllerState::Primary);
    }

    #[tokio::test]
    async fn send_then_recv_roundtrips_through_background_loop() {
        let ctrl = bootstrap_singleton().await;
        ctrl.replicate(b"hello").await.unwrap();
        let action = ctrl.recv(Some(Duration::from_millis(200))).await.unwrap();
        assert_eq!(action.buf, b"hello");
        assert_eq!(action.action_type, ActionType::Writeset);
    }

    #[tokio::test]
    async fn vote_action_side_effect_reconciles_cross_member_tally() {
        let transport = LoopbackTransport::new("n0");
        let ctrl = LifecycleController::new(transport, MemberId::new("n0").unwrap(), config());

        {
            let mut group = ctrl.shared.core.group.write().await;
            for name in ["n0", "n1", "n2"] {
                group.nodes.push(crate::node::NodeRecord::new(
                    MemberId::new(name).unwrap(),
                    name.to_string(),
                    String::new(),
                    0,
                ));
            }
        }

        async fn cast(ctrl: &LifecycleController, name: &str, value: i64, seqno: i64) {
            let id = MemberId::new(name).unwrap();
            let mut group = ctrl.shared.core.group.write().await;
            let node = group.node_mut_by_id(&id).unwrap();
            node.vote_seqno = seqno;
            node.vote_value = value;
        }

        fn vote_action(seqno: i64, value: i64) -> Action {
            let mut payload = Vec::with_capacity(16);
            payload.extend_from_slice(&seqno.to_be_bytes());
            payload.extend_from_slice(&value.to_be_bytes());
            Action::new(payload, ActionType::Vote, seqno, 0)
        }

        // A(0xAA) alone: one of three non-arbitrator members seen, pending.
        cast(&ctrl, "n0", 0xAA, 100).await;
        handle_action_side_effects(&ctrl.shared, &vote_action(100, 0xAA)).await;
        assert_eq!(ctrl.vote_decided(100).await, None);

        // B(0xAA) agrees: 2-of-3, C can't overtake with a single vote.
        cast(&ctrl, "n1", 0xAA, 100).await;
        handle_action_side_effects(&ctrl.shared, &vote_action(100, 0xAA)).await;
        assert_eq!(ctrl.vote_decided(100).await, Some(0xAA));

        // C(0xBB) dissents after the fact; decision is already cached.
        cast(&ctrl, "n2", 0xBB, 100).await;
        handle_action_side_effects(&ctrl.shared, &vote_action(100, 0xBB)).await;
        assert_eq!(ctrl.vote_decided(100).await, Some(0xAA));
    }

    #[tokio::test]
    async fn recv_queue_backpressure_broadcasts_flow_and_then_resumes() {
        let transport = LoopbackTransport::new("n0");
        LoopbackTransport::link(&transport, &transport).await;
        let ctrl = LifecycleController::new(transport, MemberId::new("n0").unwrap(), config());
        ctrl.shared.flow_control.lock().await.recompute(1);

        apply_recv_queue_flow_control(&ctrl.shared, 1_000_000).await;
        let stats = ctrl.get_stats().await;
        assert_eq!(stats.fc_stops_sent, 1);

        apply_recv_queue_flow_control(&ctrl.shared, 0).await;
        let stats = ctrl.get_stats().await;
        assert_eq!(stats.fc_conts_sent, 1);
    }

    #[tokio::test]
    async fn recv_times_out_with_no_pending_actions() {
        let ctrl = bootstrap_singleton().await;
        let result = ctrl.recv(Some(Duration::from_millis(20))).await;
        assert!(matches!(result, Err(GcsError::TimedOut)));
    }

    #[tokio::test]
    async fn param_set_get_round_trips_through_config() {
        let transport = LoopbackTransport::new("n0");
        let mut ctrl = LifecycleController::new(transport, MemberId::new("n0").unwrap(), config());
        ctrl.param_set("fc_base_limit", "64").unwrap();
        assert_eq!(ctrl.param_get("fc_base_limit").unwrap(), "64");
    }

    #[tokio::test]
    async fn unrecognized_param_falls_through_to_transport_and_fails() {
        let transport = LoopbackTransport::new("n0");
        let mut ctrl = LifecycleController::new(transport, MemberId::new("n0").unwrap(), config());
        assert!(matches!(
            ctrl.param_set("socket.nodelay", "1"),
            Err(GcsError::UnknownParam(_))
        ));
    }
}
