//! Group-membership state machine: component tracking plus the two-phase
//! state exchange that establishes quorum (spec §4.3).

use std::collections::HashMap;

use gcs_wire::state_msg::{NodeStateCode as WireNodeState, ProtoVersions, StateMessage};
use gcs_wire::{GcsError, MemberId, Seqno, Uuid, SEQNO_ILL};

use crate::node::{NodeRecord, NodeStatus};
use crate::quorum::{self, StateQuorum};

/// The membership engine's own coarse state (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    NonPrimary,
    WaitStateUuid,
    WaitStateMsg,
    Primary,
    Inconsistent,
}

/// One ordered member of an incoming component message.
#[derive(Debug, Clone)]
pub struct ComponentMember {
    pub id: MemberId,
    pub name: String,
    pub incoming_addr: String,
    pub segment: u32,
}

/// A component (view) notification from the transport.
#[derive(Debug, Clone)]
pub struct ComponentEvent {
    pub primary: bool,
    pub bootstrap: bool,
    pub my_index: usize,
    pub members: Vec<ComponentMember>,
}

fn wire_to_node_status(s: WireNodeState) -> NodeStatus {
    match s {
        WireNodeState::NonPrim => NodeStatus::NonPrim,
        WireNodeState::Prim => NodeStatus::Prim,
        WireNodeState::Joiner => NodeStatus::Joiner,
        WireNodeState::Donor => NodeStatus::Donor,
        WireNodeState::Joined => NodeStatus::Joined,
        WireNodeState::Synced => NodeStatus::Synced,
    }
}

/// Full membership engine state for one group instance.
pub struct Group {
    pub state: GroupState,
    pub group_uuid: Uuid,
    pub prim_uuid: Uuid,
    pub prim_seqno: i64,
    pub act_id: Seqno,
    pub last_applied: Seqno,
    pub my_idx: usize,
    pub nodes: Vec<NodeRecord>,
    pub max_proto: ProtoVersions,
    pub negotiated_proto: ProtoVersions,
    pub vote_policy: u8,
    state_exchange_uuid: Option<Uuid>,
    pending_state_msgs: HashMap<MemberId, StateMessage>,
    conf_id: i64,
}

impl Group {
    #[must_use]
    pub fn new(max_proto: ProtoVersions) -> Self {
        Self {
            state: GroupState::NonPrimary,
            group_uuid: Uuid::NIL,
            prim_uuid: Uuid::NIL,
            prim_seqno: SEQNO_ILL,
            act_id: 0,
            last_applied: 0,
            my_idx: 0,
            nodes: Vec::new(),
            max_proto,
            negotiated_proto: ProtoVersions::default(),
            vote_policy: 0,
            state_exchange_uuid: None,
            pending_state_msgs: HashMap::new(),
            conf_id: 0,
        }
    }

    #[must_use]
    pub fn my_id(&self) -> Option<&MemberId> {
        self.nodes.get(self.my_idx).map(|n| &n.id)
    }

    #[must_use]
    pub fn is_representative(&self) -> bool {
        self.my_idx == 0
    }

    /// Handles an incoming component message, carrying over matching node
    /// records by ID and (re)starting or skipping state exchange.
    pub fn on_component(&mut self, event: ComponentEvent) {
        let mut previous: HashMap<MemberId, NodeRecord> = std::mem::take(&mut self.nodes)
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();

        let mut new_nodes = Vec::with_capacity(event.members.len());
        for m in &event.members {
            let mut record =
                NodeRecord::new(m.id.clone(), m.name.clone(), m.incoming_addr.clone(), m.segment);
            if let Some(prev) = previous.remove(&m.id) {
                record.carry_over(prev);
            }
            new_nodes.push(record);
        }
        self.nodes = new_nodes;
        self.my_idx = event.my_index;
        self.pending_state_msgs.clear();
        self.state_exchange_uuid = None;

        if !event.primary {
            if let Some(me) = self.nodes.get_mut(self.my_idx) {
                me.status = NodeStatus::NonPrim;
            }
            self.state = GroupState::NonPrimary;
            return;
        }

        if let Some(me) = self.nodes.get_mut(self.my_idx) {
            me.bootstrap = event.bootstrap;
        }

        let had_no_history = self.group_uuid.is_nil();
        if self.nodes.len() == 1 && had_no_history {
            self.prim_uuid = Uuid::generate();
            self.prim_seqno = 0;
            self.conf_id = 1;
            self.group_uuid = Uuid::generate();
            if let Some(me) = self.nodes.get_mut(self.my_idx) {
                me.status = NodeStatus::Joined;
                me.last_applied = self.act_id;
            }
            self.state = GroupState::Primary;
            return;
        }

        self.state = GroupState::WaitStateUuid;
    }

    /// Handles a state-UUID broadcast from the representative (index 0).
    pub fn on_state_uuid(&mut self, from_representative: bool, uuid: Uuid) {
        if self.state != GroupState::WaitStateUuid || !from_representative {
            return;
        }
        self.state_exchange_uuid = Some(uuid);
        self.state = GroupState::WaitStateMsg;
    }

    /// Handles one member's state message. Returns the quorum decision once
    /// every member has reported against the current state-exchange UUID.
    ///
    /// # Errors
    ///
    /// Propagates [`GcsError::QuorumImpossible`],
    /// [`GcsError::ProtocolDowngrade`], or [`GcsError::HistoryRewind`] from
    /// [`quorum::compute`]; the caller transitions to INCONSISTENT on the
    /// latter.
    pub fn on_state_msg(
        &mut self,
        from: MemberId,
        msg: StateMessage,
    ) -> Result<Option<StateQuorum>, GcsError> {
        if self.state != GroupState::WaitStateMsg {
            return Ok(None);
        }
        let Some(expected) = self.state_exchange_uuid else {
            return Ok(None);
        };
        if msg.state_uuid != expected {
            return Ok(None);
        }
        self.pending_state_msgs.insert(from, msg);
        if self.pending_state_msgs.len() < self.nodes.len() {
            return Ok(None);
        }

        let messages: Vec<StateMessage> = self.pending_state_msgs.values().cloned().collect();
        match quorum::compute(&messages, self.act_id, self.negotiated_proto) {
            Ok(q) => {
                self.apply_quorum(&q);
                self.state = GroupState::Primary;
                Ok(Some(q))
            }
            Err(GcsError::HistoryRewind { group_uuid }) => {
                self.state = GroupState::Inconsistent;
                Err(GcsError::HistoryRewind { group_uuid })
            }
            Err(e) => {
                self.state = GroupState::NonPrimary;
                Err(e)
            }
        }
    }

    fn apply_quorum(&mut self, q: &StateQuorum) {
        let matches_history = self.group_uuid == q.group_uuid && self.act_id == q.act_id;
        self.group_uuid = q.group_uuid;
        self.act_id = q.act_id;
        self.conf_id = q.conf_id;
        self.negotiated_proto = ProtoVersions {
            gcs: q.gcs_proto_ver,
            repl: q.repl_proto_ver,
            appl: q.appl_proto_ver,
        };
        self.vote_policy = q.vote_policy;
        if q.gcs_proto_ver >= 2 {
            self.last_applied = self.last_applied.max(q.last_applied);
        }

        if let Some(me) = self.nodes.get_mut(self.my_idx) {
            if matches_history {
                if me.status == NodeStatus::NonPrim {
                    me.status = NodeStatus::Joined;
                }
            } else {
                me.status = NodeStatus::Prim;
                me.desync_count = 0;
            }
        }
    }

    #[must_use]
    pub fn conf_id(&self) -> i64 {
        self.conf_id
    }

    /// Advances the total order by one position, used when a data action
    /// commits.
    pub fn advance_act_id(&mut self) -> Seqno {
        self.act_id += 1;
        self.act_id
    }

    /// Recomputes the group-wide commit-cut as the minimum `last_applied`
    /// across members counted toward it, returning the new cut only when it
    /// strictly advances past the current one.
    ///
    /// A member counts toward the cut when its own `count_last_applied` is
    /// set and it is not an arbitrator (arbitrators are excluded only once
    /// the negotiated gcs-proto is above 0). At gcs-proto 2 and above, a
    /// counted member reporting a `last_applied` below the current cut is
    /// treated as not having reported yet and is skipped rather than
    /// dragging the cut backwards.
    pub fn redo_last_applied(&mut self) -> Option<Seqno> {
        let proto = self.negotiated_proto.gcs;
        let mut candidate: Option<Seqno> = None;
        for node in &self.nodes {
            let counted = node.count_last_applied && !(proto > 0 && node.arbitrator);
            if !counted {
                continue;
            }
            let seqno = node.last_applied;
            if proto >= 2 && seqno < self.last_applied {
                continue;
            }
            candidate = Some(candidate.map_or(seqno, |c| c.min(seqno)));
        }
        match candidate {
            Some(new_cut) if new_cut > self.last_applied => {
                self.last_applied = new_cut;
                Some(new_cut)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn node(&self, idx: usize) -> Option<&NodeRecord> {
        self.nodes.get(idx)
    }

    #[must_use]
    pub fn node_by_id(&self, id: &MemberId) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn node_mut_by_id(&mut self, id: &MemberId) -> Option<&mut NodeRecord> {
        self.nodes.iter_mut().find(|n| &n.id == id)
    }
}
