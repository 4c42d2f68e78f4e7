//! Quorum computation (spec §4.3.1): decides a single representative,
//! group-UUID, commit-cut baseline, and negotiated protocol-version vector
//! from the full set of state-exchange messages. Deterministic: every
//! member sees the same input and reaches the same output independently.

use gcs_wire::state_msg::{NodeStateCode, ProtoVersions, StateMessage};
use gcs_wire::{GcsError, Uuid};

/// The decision a completed state exchange converges on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateQuorum {
    pub version: u8,
    pub primary: bool,
    pub group_uuid: Uuid,
    pub act_id: i64,
    pub conf_id: i64,
    pub last_applied: i64,
    pub gcs_proto_ver: u8,
    pub repl_proto_ver: u8,
    pub appl_proto_ver: u8,
    pub vote_policy: u8,
}

struct Candidate<'a> {
    msg: &'a StateMessage,
}

fn best_candidate<'a>(candidates: &[Candidate<'a>]) -> Result<Option<&'a StateMessage>, GcsError> {
    if candidates.is_empty() {
        return Ok(None);
    }
    let max_key = candidates
        .iter()
        .map(|c| (c.msg.received, c.msg.prim_seqno))
        .max()
        .unwrap();
    let winners: Vec<&StateMessage> = candidates
        .iter()
        .filter(|c| (c.msg.received, c.msg.prim_seqno) == max_key)
        .map(|c| c.msg)
        .collect();
    let first_uuid = winners[0].group_uuid;
    if winners.iter().any(|m| m.group_uuid != first_uuid) {
        return Err(GcsError::QuorumImpossible(
            "tied candidates disagree on group UUID".to_string(),
        ));
    }
    Ok(Some(winners[0]))
}

/// Computes the quorum decision from every member's state message.
///
/// `local_act_id` is this node's own current `act_id`, used for the
/// history-rewind check; `prev_primary` is the protocol-version vector
/// negotiated by the previous primary component (used only when the
/// minimum state-message version across members is ≥ 6).
///
/// # Errors
///
/// - [`GcsError::QuorumImpossible`] if no inherit/remerge/bootstrap
///   candidate set resolves to a single group-UUID.
/// - [`GcsError::ProtocolDowngrade`] if version ≥ 6 and the computed
///   minimum protocol level would fall below `prev_primary`.
/// - [`GcsError::HistoryRewind`] if the representative's `act_id` is behind
///   this node's own — the caller must transition to INCONSISTENT.
pub fn compute(
    messages: &[StateMessage],
    local_act_id: i64,
    prev_primary: ProtoVersions,
) -> Result<StateQuorum, GcsError> {
    if messages.is_empty() {
        return Err(GcsError::QuorumImpossible("no state messages".to_string()));
    }

    let version = messages.iter().map(|m| m.version).min().unwrap();

    let inherited: Vec<Candidate<'_>> = messages
        .iter()
        .filter(|m| m.current_state >= NodeStateCode::Joined)
        .map(|msg| Candidate { msg })
        .collect();

    let representative = if let Some(rep) = best_candidate(&inherited)? {
        rep
    } else {
        let remerge: Vec<Candidate<'_>> = messages
            .iter()
            .filter(|m| m.prim_state >= NodeStateCode::Joined)
            .map(|msg| Candidate { msg })
            .collect();
        if let Some(rep) = best_candidate(&remerge)? {
            rep
        } else {
            let bootstrap: Vec<Candidate<'_>> = messages
                .iter()
                .filter(|m| m.prim_state >= NodeStateCode::Joined && m.bootstrap)
                .map(|msg| Candidate { msg })
                .collect();
            best_candidate(&bootstrap)?
                .ok_or_else(|| GcsError::QuorumImpossible("no quorum candidate".to_string()))?
        }
    };

    let conf_id = representative.prim_seqno + 1;
    let act_id = representative.received;

    let mut gcs_proto_ver = messages.iter().map(|m| m.gcs_proto_ver).min().unwrap();
    let mut repl_proto_ver = messages.iter().map(|m| m.repl_proto_ver).min().unwrap();
    let mut appl_proto_ver = messages
        .iter()
        .map(|m| m.ext.appl_proto_ver)
        .min()
        .unwrap();

    if version >= 6 {
        if gcs_proto_ver < prev_primary.gcs {
            return Err(GcsError::ProtocolDowngrade {
                from: prev_primary.gcs,
                to: gcs_proto_ver,
            });
        }
        if repl_proto_ver < prev_primary.repl {
            return Err(GcsError::ProtocolDowngrade {
                from: prev_primary.repl,
                to: repl_proto_ver,
            });
        }
        if appl_proto_ver < prev_primary.appl {
            return Err(GcsError::ProtocolDowngrade {
                from: prev_primary.appl,
                to: appl_proto_ver,
            });
        }
    } else {
        // Below v6 the previous level is not enforced as a floor, but it is
        // still never allowed to exceed what this exchange actually agreed.
        gcs_proto_ver = gcs_proto_ver.min(prev_primary.gcs.max(gcs_proto_ver));
        repl_proto_ver = repl_proto_ver.min(prev_primary.repl.max(repl_proto_ver));
        appl_proto_ver = appl_proto_ver.min(prev_primary.appl.max(appl_proto_ver));
    }

    if act_id < local_act_id {
        return Err(GcsError::HistoryRewind {
            group_uuid: representative.group_uuid.to_string(),
        });
    }

    let vote_policy = messages.iter().map(|m| m.ext.vote_policy).max().unwrap_or(0);

    Ok(StateQuorum {
        version,
        primary: true,
        group_uuid: representative.group_uuid,
        act_id,
        conf_id,
        last_applied: representative.ext.last_applied,
        gcs_proto_ver,
        repl_proto_ver,
        appl_proto_ver,
        vote_policy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcs_wire::state_msg::StateMessageExt;

    fn msg(received: i64, prim_seqno: i64, current: NodeStateCode, group: Uuid) -> StateMessage {
        StateMessage {
            version: 6,
            gcs_proto_ver: 2,
            repl_proto_ver: 2,
            current_state: current,
            prim_state: current,
            joined_count: 1,
            state_uuid: Uuid::NIL,
            group_uuid: group,
            prim_uuid: Uuid::NIL,
            received,
            prim_seqno,
            name: "n".to_string(),
            incoming_addr: String::new(),
            bootstrap: false,
            ext: StateMessageExt {
                appl_proto_ver: 1,
                ..StateMessageExt::default()
            },
        }
    }

    #[test]
    fn inherit_path_picks_highest_received() {
        let g = Uuid([1; 16]);
        let messages = vec![
            msg(5, 1, NodeStateCode::Joined, g),
            msg(9, 1, NodeStateCode::Synced, g),
            msg(3, 1, NodeStateCode::Joined, g),
        ];
        let q = compute(&messages, 0, ProtoVersions::default()).unwrap();
        assert_eq!(q.act_id, 9);
        assert_eq!(q.group_uuid, g);
    }

    #[test]
    fn no_joined_member_falls_back_to_remerge() {
        let g = Uuid([2; 16]);
        let mut m1 = msg(4, 0, NodeStateCode::NonPrim, g);
        m1.prim_state = NodeStateCode::Joined;
        let mut m2 = msg(2, 0, NodeStateCode::NonPrim, g);
        m2.prim_state = NodeStateCode::Synced;
        let q = compute(&[m1, m2], 0, ProtoVersions::default()).unwrap();
        assert_eq!(q.act_id, 4);
    }

    #[test]
    fn disagreeing_group_uuid_among_tied_candidates_is_impossible() {
        let m1 = msg(5, 1, NodeStateCode::Joined, Uuid([1; 16]));
        let m2 = msg(5, 1, NodeStateCode::Joined, Uuid([2; 16]));
        assert!(matches!(
            compute(&[m1, m2], 0, ProtoVersions::default()),
            Err(GcsError::QuorumImpossible(_))
        ));
    }

    #[test]
    fn act_id_behind_local_is_history_rewind() {
        let g = Uuid([3; 16]);
        let m = msg(5, 1, NodeStateCode::Joined, g);
        assert!(matches!(
            compute(&[m], 10, ProtoVersions::default()),
            Err(GcsError::HistoryRewind { .. })
        ));
    }

    #[test]
    fn version_six_forbids_protocol_downgrade() {
        let g = Uuid([4; 16]);
        let m = msg(5, 1, NodeStateCode::Joined, g);
        let prev = ProtoVersions {
            gcs: 3,
            repl: 2,
            appl: 1,
        };
        assert!(matches!(
            compute(&[m], 0, prev),
            Err(GcsError::ProtocolDowngrade { .. })
        ));
    }
}
