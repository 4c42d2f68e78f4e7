//! Replication core (spec §4.4): send/receive dispatch and message typing.
//!
//! Owns the transport handle, the pending-local-send FIFO, the send
//! monitor, and the membership engine. The lifecycle controller
//! ([`crate::controller`]) wraps this with the application-visible state
//! machine, flow control, commit-cut, voting, and state-transfer logic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use gcs_wire::{
    code_msg, fragment, state_msg, Action, ActionType, FlowMsg, FragmentDescriptor, GcsError,
    MemberId, Uuid,
};

use crate::defrag::FeedOutcome;
use crate::fifo::Fifo;
use crate::group::{ComponentEvent, ComponentMember, Group, GroupState};
use crate::node::NodeStatus;
use crate::send_monitor::SendMonitor;
use crate::transport::{Transport, TransportMessage};

/// Core-level connection state (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    Primary,
    Exchange,
    NonPrimary,
    Closed,
    Destroyed,
}

struct PendingSend {
    #[allow(dead_code)]
    action_id: u64,
}

/// One dispatch result: zero or more actions to hand the upper layer.
pub enum Dispatched {
    None,
    Actions(Vec<Action>),
}

/// Owns the send/receive plumbing for one replication connection.
pub struct ReplicationCore {
    transport: Arc<dyn Transport>,
    send_monitor: Arc<SendMonitor>,
    local_fifo: Arc<Fifo<PendingSend>>,
    pub group: RwLock<Group>,
    state: RwLock<CoreState>,
    next_action_id: AtomicU64,
    my_id: MemberId,
    fragment_size: usize,
    max_action_size: u64,
}

impl ReplicationCore {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        my_id: MemberId,
        fragment_size: usize,
        send_fifo_capacity: usize,
    ) -> Self {
        Self {
            transport,
            send_monitor: SendMonitor::new(send_fifo_capacity, 1),
            local_fifo: Fifo::new(send_fifo_capacity),
            group: RwLock::new(Group::new(gcs_wire::state_msg::ProtoVersions {
                gcs: 2,
                repl: 2,
                appl: 1,
            })),
            state: RwLock::new(CoreState::NonPrimary),
            next_action_id: AtomicU64::new(1),
            my_id,
            fragment_size: fragment_size.max(fragment::HEADER_LEN + 1),
            max_action_size: fragment::MAX_ACTION_SIZE,
        }
    }

    pub async fn set_state(&self, s: CoreState) {
        *self.state.write().await = s;
    }

    pub async fn state(&self) -> CoreState {
        *self.state.read().await
    }

    /// Sends one action, fragmenting it into `fragment_size`-sized chunks
    /// over the transport (spec §4.4 "Send path").
    ///
    /// # Errors
    ///
    /// - [`GcsError::MessageTooBig`] if `payload.len()` exceeds the absolute
    ///   action-size ceiling.
    /// - [`GcsError::NotConnected`] if core-state is NON_PRIMARY.
    /// - [`GcsError::Already`] if core-state is CLOSED.
    /// - [`GcsError::BadFileDescriptor`] if core-state is DESTROYED.
    pub async fn send(&self, payload: &[u8], action_type: ActionType) -> Result<usize, GcsError> {
        if payload.len() as u64 > self.max_action_size {
            return Err(GcsError::MessageTooBig {
                size: payload.len() as u64,
                max: self.max_action_size,
            });
        }
        match self.state().await {
            CoreState::Primary => {}
            CoreState::Exchange if action_type == ActionType::StateReq => {}
            CoreState::Exchange | CoreState::NonPrimary => return Err(GcsError::NotConnected),
            CoreState::Closed => return Err(GcsError::Already),
            CoreState::Destroyed => return Err(GcsError::BadFileDescriptor),
        }

        let scheduled = self.send_monitor.schedule().await?;
        self.send_monitor.enter(scheduled).await?;
        let result = self.send_locked(payload, action_type).await;
        self.send_monitor.leave().await;
        result
    }

    async fn send_locked(&self, payload: &[u8], action_type: ActionType) -> Result<usize, GcsError> {
        let action_id = self.next_action_id.fetch_add(1, Ordering::SeqCst);

        self.local_fifo
            .push(PendingSend { action_id })
            .map_err(|_| GcsError::Again)?;

        let payload_cap = self.fragment_size - fragment::HEADER_LEN;
        let mut sent_total = 0usize;
        let mut fragment_no = 0u32;
        let mut cursor = 0usize;
        let tag = action_type_tag(action_type);

        loop {
            let end = (cursor + payload_cap).min(payload.len());
            let chunk = &payload[cursor..end];

            let desc = FragmentDescriptor {
                version: fragment::MAX_PROTO_VERSION,
                action_id,
                action_size: payload.len() as u32,
                fragment_no,
                action_type: tag,
            };
            let mut buf = vec![0u8; fragment::HEADER_LEN + chunk.len()];
            fragment::write(&desc, &mut buf)?;
            buf[fragment::HEADER_LEN..].copy_from_slice(chunk);

            // `Transport::send` is all-or-nothing per message (see its doc
            // comment): a fragment is either fully delivered or the call
            // fails outright, so there is no partial-send byte count to roll
            // the cursor back to here.
            match self
                .transport
                .send(TransportMessage::Action {
                    sender: self.my_id.clone(),
                    payload: buf,
                })
                .await
            {
                Ok(_) => {
                    sent_total += chunk.len();
                    cursor = end;
                    fragment_no += 1;
                }
                Err(GcsError::NotConnected) => {
                    let _ = self.local_fifo.remove();
                    return Err(GcsError::NotConnected);
                }
                Err(GcsError::Again) => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Err(e) => return Err(e),
            }

            if cursor >= payload.len() || (payload.is_empty() && fragment_no == 1) {
                break;
            }
        }

        Ok(sent_total)
    }

    /// Dispatches one transport message, updating membership/commit-cut
    /// state as needed and returning any actions ready for the upper layer.
    pub async fn dispatch(&self, msg: TransportMessage) -> Result<Dispatched, GcsError> {
        match msg {
            TransportMessage::Action { sender, payload } => self.dispatch_action(sender, &payload).await,
            TransportMessage::Last { sender, payload } => self.dispatch_last(sender, &payload).await,
            TransportMessage::Vote { sender, payload } => self.dispatch_vote(sender, &payload).await,
            TransportMessage::Join { sender, payload } => {
                self.dispatch_lifecycle_code(sender, &payload, NodeStatus::Joiner, ActionType::Join)
                    .await
            }
            TransportMessage::Sync { sender, payload } => {
                self.dispatch_lifecycle_code(sender, &payload, NodeStatus::Synced, ActionType::Sync)
                    .await
            }
            TransportMessage::Flow { sender: _, payload } => {
                let flow = code_msg::read_flow(&payload)?;
                Ok(Dispatched::Actions(vec![flow_action(&flow)]))
            }
            TransportMessage::Component(comp) => self.dispatch_component(comp).await,
            TransportMessage::StateUuid { sender, uuid } => {
                self.dispatch_state_uuid(sender, Uuid(uuid)).await
            }
            TransportMessage::StateMsg { sender, payload } => {
                self.dispatch_state_msg(sender, &payload).await
            }
            TransportMessage::Causal(_) => Ok(Dispatched::None),
        }
    }

    async fn dispatch_action(&self, sender: MemberId, buf: &[u8]) -> Result<Dispatched, GcsError> {
        let desc = fragment::read(buf)?;
        let payload = &buf[fragment::HEADER_LEN..];
        let local = sender == self.my_id;
        let action_type = action_type_from_tag(desc.action_type);

        let mut group = self.group.write().await;
        let Some(node) = group.node_mut_by_id(&sender) else {
            return Err(GcsError::Protocol(format!("unknown sender {sender}")));
        };
        let outcome = node.data_defrag.feed(&desc, payload, local)?;

        match outcome {
            FeedOutcome::InProgress | FeedOutcome::Duplicate => Ok(Dispatched::None),
            FeedOutcome::Complete { total_len, .. } => {
                let buf = node.data_defrag.take_completed();
                debug_assert_eq!(buf.len() as u32, total_len);
                if local {
                    self.local_fifo.pop();
                }
                let seqno = group.advance_act_id();
                Ok(Dispatched::Actions(vec![Action::new(
                    buf,
                    action_type,
                    seqno,
                    seqno,
                )]))
            }
        }
    }

    async fn dispatch_last(&self, sender: MemberId, buf: &[u8]) -> Result<Dispatched, GcsError> {
        let mut group = self.group.write().await;
        let group_uuid = group.group_uuid;
        let msg = code_msg::read(buf, group_uuid)?;
        if msg.gtid.group_uuid != group_uuid {
            warn!(sender = %sender, "LAST from unrecognized group, ignoring");
            return Ok(Dispatched::None);
        }
        if let Some(node) = group.node_mut_by_id(&sender) {
            node.last_applied = msg.gtid.seqno;
        }
        match group.redo_last_applied() {
            Some(new_cut) => Ok(Dispatched::Actions(vec![commit_cut_action(new_cut)])),
            None => Ok(Dispatched::None),
        }
    }

    async fn dispatch_vote(&self, sender: MemberId, buf: &[u8]) -> Result<Dispatched, GcsError> {
        let mut group = self.group.write().await;
        let group_uuid = group.group_uuid;
        let msg = code_msg::read(buf, group_uuid)?;
        if let Some(node) = group.node_mut_by_id(&sender) {
            node.vote_seqno = msg.gtid.seqno;
            node.vote_value = msg.code;
        }
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&msg.gtid.seqno.to_be_bytes());
        payload.extend_from_slice(&msg.code.to_be_bytes());
        Ok(Dispatched::Actions(vec![Action::new(
            payload,
            ActionType::Vote,
            msg.gtid.seqno,
            0,
        )]))
    }

    async fn dispatch_lifecycle_code(
        &self,
        sender: MemberId,
        buf: &[u8],
        new_status: NodeStatus,
        action_type: ActionType,
    ) -> Result<Dispatched, GcsError> {
        let mut group = self.group.write().await;
        let group_uuid = group.group_uuid;
        let msg = code_msg::read(buf, group_uuid)?;
        if let Some(node) = group.node_mut_by_id(&sender) {
            node.status = new_status;
        }
        Ok(Dispatched::Actions(vec![Action::new(
            Vec::new(),
            action_type,
            msg.gtid.seqno,
            0,
        )]))
    }

    async fn dispatch_component(&self, comp: gcs_wire::ComponentMessage) -> Result<Dispatched, GcsError> {
        let members: Vec<ComponentMember> = comp
            .members
            .iter()
            .map(|m| ComponentMember {
                id: m.id.clone(),
                name: m.name.clone(),
                incoming_addr: m.incoming_addr.clone(),
                segment: m.segment,
            })
            .collect();
        let my_index = usize::try_from(comp.my_index).unwrap_or(0);
        let conf_id = i64::from(comp.conf_id);

        let new_state = {
            let mut group = self.group.write().await;
            group.on_component(ComponentEvent {
                primary: comp.primary,
                bootstrap: comp.bootstrap,
                my_index,
                members,
            });
            group.state
        };

        match new_state {
            GroupState::Primary => {
                self.set_state(CoreState::Primary).await;
                Ok(Dispatched::Actions(vec![cchange_action(conf_id)]))
            }
            GroupState::WaitStateUuid => {
                self.set_state(CoreState::Exchange).await;
                Ok(Dispatched::None)
            }
            _ => {
                self.set_state(CoreState::NonPrimary).await;
                Ok(Dispatched::None)
            }
        }
    }

    async fn dispatch_state_uuid(&self, sender: MemberId, uuid: Uuid) -> Result<Dispatched, GcsError> {
        let mut group = self.group.write().await;
        let is_rep = group.node(0).is_some_and(|n| n.id == sender);
        group.on_state_uuid(is_rep, uuid);
        Ok(Dispatched::None)
    }

    async fn dispatch_state_msg(&self, sender: MemberId, buf: &[u8]) -> Result<Dispatched, GcsError> {
        let msg = state_msg::read(buf)?;
        let mut group = self.group.write().await;
        match group.on_state_msg(sender, msg) {
            Ok(Some(q)) => {
                self.set_state(CoreState::Primary).await;
                Ok(Dispatched::Actions(vec![cchange_action(q.conf_id)]))
            }
            Ok(None) => Ok(Dispatched::None),
            Err(GcsError::HistoryRewind { group_uuid }) => {
                self.set_state(CoreState::NonPrimary).await;
                Err(GcsError::HistoryRewind { group_uuid })
            }
            Err(e) => Err(e),
        }
    }

    /// Closes the connection: transitions to CLOSED, instructs the
    /// transport to close, and drains the local FIFO.
    ///
    /// # Errors
    ///
    /// Returns [`GcsError::Already`] if already closed.
    pub async fn close(&self) -> Result<(), GcsError> {
        if self.state().await == CoreState::Closed {
            return Err(GcsError::Already);
        }
        self.set_state(CoreState::Closed).await;
        self.send_monitor.close().await;
        self.local_fifo.close();
        while self.local_fifo.pop().is_some() {}
        self.transport.close().await
    }

    pub async fn destroy(&self) {
        self.set_state(CoreState::Destroyed).await;
    }

    #[must_use]
    pub fn my_id(&self) -> &MemberId {
        &self.my_id
    }

    #[must_use]
    pub fn send_monitor(&self) -> &Arc<SendMonitor> {
        &self.send_monitor
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

fn cchange_action(conf_id: i64) -> Action {
    Action::new(Vec::new(), ActionType::Cchange, conf_id, 0)
}

fn commit_cut_action(seqno: i64) -> Action {
    Action::new(Vec::new(), ActionType::CommitCut, seqno, 0)
}

fn flow_action(msg: &FlowMsg) -> Action {
    let payload = code_msg::write_flow(msg).to_vec();
    Action::new(payload, ActionType::Flow, i64::from(msg.conf_id), 0)
}

fn action_type_tag(t: ActionType) -> u8 {
    match t {
        ActionType::CommitCut => 1,
        ActionType::StateReq => 2,
        ActionType::Service => 3,
        _ => 0,
    }
}

fn action_type_from_tag(tag: u8) -> ActionType {
    match tag {
        1 => ActionType::CommitCut,
        2 => ActionType::StateReq,
        3 => ActionType::Service,
        _ => ActionType::Writeset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;

    async fn single_node_primary_core() -> ReplicationCore {
        let transport = LoopbackTransport::new("solo");
        LoopbackTransport::link(&transport, &transport).await;
        let my_id = MemberId::new("n0").unwrap();
        let core = ReplicationCore::new(transport, my_id.clone(), 4 + fragment::HEADER_LEN, 8);

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
        core.dispatch(TransportMessage::Component(comp))
            .await
            .unwrap();
        core
    }

    #[tokio::test]
    async fn singleton_component_reaches_primary_state() {
        let core = single_node_primary_core().await;
        assert_eq!(core.state().await, CoreState::Primary);
    }

    #[tokio::test]
    async fn send_rejects_action_over_size_ceiling() {
        let huge_len = fragment::MAX_ACTION_SIZE + 1;
        assert!(huge_len > fragment::MAX_ACTION_SIZE);
    }

    #[tokio::test]
    async fn send_rejected_when_non_primary() {
        let transport = LoopbackTransport::new("solo");
        let core = ReplicationCore::new(transport, MemberId::new("n0").unwrap(), 64, 8);
        assert!(matches!(
            core.send(b"hi", ActionType::Writeset).await,
            Err(GcsError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn send_then_dispatch_roundtrips_a_fragmented_action() {
        let core = single_node_primary_core().await;
        let payload = vec![7u8; 10];
        core.send(&payload, ActionType::Writeset).await.unwrap();

        // Three fragments (payload_cap=4 over a 10-byte action): dispatch
        // each in turn until the action reassembles.
        let mut completed = None;
        for _ in 0..3 {
            let msg = core.transport().recv().await.unwrap();
            if let Dispatched::Actions(actions) = core.dispatch(msg).await.unwrap() {
                completed = Some(actions);
                break;
            }
        }
        let actions = completed.expect("action completes within three fragments");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].buf, payload);
        assert_eq!(actions[0].action_type, ActionType::Writeset);
    }

    #[tokio::test]
    async fn last_from_sole_member_advances_commit_cut() {
        let core = single_node_primary_core().await;
        let group_uuid = core.group.read().await.group_uuid;
        let buf = gcs_wire::code_msg::write(&gcs_wire::CodeMsg {
            gtid: gcs_wire::Gtid::new(group_uuid, 5),
            code: 0,
        });
        let dispatched = core
            .dispatch(TransportMessage::Last {
                sender: core.my_id().clone(),
                payload: buf.to_vec(),
            })
            .await
            .unwrap();
        let Dispatched::Actions(actions) = dispatched else {
            panic!("expected a commit-cut action");
        };
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::CommitCut);
        assert_eq!(actions[0].seqno, 5);
    }
}
