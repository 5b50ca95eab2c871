//! The shared world view and its gossip envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ButtonKind, ElevState, NodeId, N_FLOORS};

/// Which merge an update selects when applied to a peer's view.
///
/// `Requests` updates OR hall bits together (a placed call propagates and can
/// never be lost to a concurrent update); `Serviced` updates AND them (a
/// cleared call retracts everywhere). Both merges are commutative,
/// associative and idempotent, so delivery order and duplication across the
/// gossip mesh do not matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateKind {
    #[default]
    Requests,
    Serviced,
}

/// Building-wide hall request matrix: one `[up, down]` pair per floor.
///
/// The up slot of the top floor and the down slot of the ground floor have
/// no physical button; [`HallMatrix::sanitize`] keeps them permanently false
/// and every merge re-applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HallMatrix(pub [[bool; 2]; N_FLOORS]);

impl HallMatrix {
    /// Column index for a hall button kind. Panics on `Cab`.
    fn column(kind: ButtonKind) -> usize {
        match kind {
            ButtonKind::HallUp => 0,
            ButtonKind::HallDown => 1,
            ButtonKind::Cab => panic!("cab requests are not part of the hall matrix"),
        }
    }

    pub fn get(&self, floor: usize, kind: ButtonKind) -> bool {
        self.0[floor][Self::column(kind)]
    }

    pub fn set(&mut self, floor: usize, kind: ButtonKind, value: bool) {
        self.0[floor][Self::column(kind)] = value;
        self.sanitize();
    }

    /// True if a physical button exists for this slot.
    pub fn slot_exists(floor: usize, kind: ButtonKind) -> bool {
        match kind {
            ButtonKind::HallUp => floor + 1 < N_FLOORS,
            ButtonKind::HallDown => floor > 0,
            ButtonKind::Cab => false,
        }
    }

    /// Force the phantom slots (top-floor up, ground-floor down) to false.
    pub fn sanitize(&mut self) {
        self.0[N_FLOORS - 1][0] = false;
        self.0[0][1] = false;
    }

    /// Element-wise merge under the given update kind: OR for `Requests`,
    /// AND for `Serviced`.
    pub fn merge(&mut self, incoming: &HallMatrix, kind: UpdateKind) {
        for f in 0..N_FLOORS {
            for d in 0..2 {
                self.0[f][d] = match kind {
                    UpdateKind::Requests => self.0[f][d] || incoming.0[f][d],
                    UpdateKind::Serviced => self.0[f][d] && incoming.0[f][d],
                };
            }
        }
        self.sanitize();
    }

    pub fn any(&self) -> bool {
        self.0.iter().any(|pair| pair[0] || pair[1])
    }
}

/// A node's view of the whole system at one instant.
///
/// `alive` is derived from liveness bookkeeping when the snapshot is
/// published; it is advisory for receivers, which maintain their own.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "hallRequests")]
    pub hall_requests: HallMatrix,
    pub states: BTreeMap<NodeId, ElevState>,
    #[serde(default)]
    pub alive: BTreeMap<NodeId, bool>,
    #[serde(rename = "updateKind", default)]
    pub update_kind: UpdateKind,
}

impl Snapshot {
    pub fn state_of(&self, id: NodeId) -> Option<&ElevState> {
        self.states.get(&id)
    }
}

/// Gossip envelope for one snapshot.
///
/// `counter` increases monotonically per origin and exists purely so relayed
/// copies can be deduplicated; it carries no ordering meaning across origins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetMsg {
    pub origin: NodeId,
    pub counter: u64,
    pub snapshot: Snapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: [[bool; 2]; N_FLOORS]) -> HallMatrix {
        HallMatrix(rows)
    }

    #[test]
    fn test_or_merge_never_clears_a_bit() {
        let mut current = matrix([[true, false], [false, true], [false, false], [false, false]]);
        let incoming = matrix([[false, false], [false, false], [true, false], [false, false]]);
        current.merge(&incoming, UpdateKind::Requests);
        assert!(current.get(0, ButtonKind::HallUp));
        assert!(current.get(1, ButtonKind::HallDown));
        assert!(current.get(2, ButtonKind::HallUp));
    }

    #[test]
    fn test_and_merge_only_clears() {
        let mut current = matrix([[true, false], [false, true], [true, false], [false, false]]);
        let incoming = matrix([[true, false], [false, false], [false, true], [false, false]]);
        current.merge(&incoming, UpdateKind::Serviced);
        assert!(current.get(0, ButtonKind::HallUp));
        assert!(!current.get(1, ButtonKind::HallDown));
        // AND can clear but never place.
        assert!(!current.get(2, ButtonKind::HallDown));
    }

    #[test]
    fn test_merges_are_commutative_and_idempotent() {
        let a = matrix([[true, false], [false, true], [false, false], [true, false]]);
        let b = matrix([[false, false], [true, true], [true, false], [false, false]]);

        for kind in [UpdateKind::Requests, UpdateKind::Serviced] {
            let mut ab = a;
            ab.merge(&b, kind);
            let mut ba = b;
            ba.merge(&a, kind);
            assert_eq!(ab, ba, "{kind:?} merge must be commutative");

            let mut twice = ab;
            twice.merge(&b, kind);
            let mut expect = a;
            expect.merge(&b, kind);
            assert_eq!(twice, expect, "{kind:?} merge must be idempotent");

            let mut self_merge = a;
            self_merge.merge(&a, kind);
            let mut sane = a;
            sane.sanitize();
            assert_eq!(self_merge, sane, "{kind:?} self-merge must be a no-op");
        }
    }

    #[test]
    fn test_phantom_slots_stay_false() {
        let mut m = HallMatrix::default();
        m.set(N_FLOORS - 1, ButtonKind::HallUp, true);
        m.set(0, ButtonKind::HallDown, true);
        assert!(!m.get(N_FLOORS - 1, ButtonKind::HallUp));
        assert!(!m.get(0, ButtonKind::HallDown));

        // A malformed peer matrix cannot smuggle them in through a merge.
        let mut bad = HallMatrix::default();
        bad.0[N_FLOORS - 1][0] = true;
        bad.0[0][1] = true;
        let mut view = HallMatrix::default();
        view.merge(&bad, UpdateKind::Requests);
        assert!(!view.get(N_FLOORS - 1, ButtonKind::HallUp));
        assert!(!view.get(0, ButtonKind::HallDown));
    }

    #[test]
    fn test_slot_exists_matches_physical_buttons() {
        assert!(HallMatrix::slot_exists(0, ButtonKind::HallUp));
        assert!(!HallMatrix::slot_exists(0, ButtonKind::HallDown));
        assert!(!HallMatrix::slot_exists(N_FLOORS - 1, ButtonKind::HallUp));
        assert!(HallMatrix::slot_exists(N_FLOORS - 1, ButtonKind::HallDown));
    }

    #[test]
    fn test_net_msg_round_trips_through_json() {
        let mut states = BTreeMap::new();
        states.insert(
            NodeId(2),
            ElevState {
                behaviour: crate::Behaviour::Moving,
                floor: 1,
                direction: crate::Direction::Up,
                cab_requests: [false, false, true, false],
            },
        );
        let msg = NetMsg {
            origin: NodeId(2),
            counter: 41,
            snapshot: Snapshot {
                hall_requests: matrix([[true, false], [false, false], [false, true], [false, false]]),
                states,
                alive: BTreeMap::new(),
                update_kind: UpdateKind::Serviced,
            },
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""origin":"2""#));
        assert!(json.contains(r#""updateKind":"serviced""#));

        let back: NetMsg = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_update_kind_defaults_to_requests() {
        // Frames from older peers may omit the tag entirely.
        let json = r#"{"hallRequests":[[false,false],[false,false],[false,false],[false,false]],"states":{}}"#;
        let snap: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.update_kind, UpdateKind::Requests);
    }
}
