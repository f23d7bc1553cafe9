use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::trace;

use crate::core::{Error, NodeId, Result, SimTime};
use crate::network::NeighborQuery;
use crate::protocol::{Packet, RadioMode};

/// State of one node's reception of a transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reception {
    Intact,
    /// Overlapped by another audible transmission
    Collided,
    /// The radio was not listening for the whole packet
    Lost,
}

/// A packet on the air
#[derive(Debug, Clone)]
pub struct Transmission {
    pub sender: NodeId,
    pub packet: Packet,
    pub start: SimTime,
    pub end: SimTime,
    receptions: BTreeMap<NodeId, Reception>,
}

/// What the medium reports when a transmission leaves the air
#[derive(Debug)]
pub struct Outcome {
    pub transmission: Transmission,
    /// Nodes that received the packet intact
    pub receivers: Vec<NodeId>,
    /// Listening nodes whose channel just cleared after overlapping packets
    pub collided: Vec<NodeId>,
}

/// Shared unit-disk radio channel
pub struct Medium {
    neighbors: Rc<dyn NeighborQuery>,
    modes: BTreeMap<NodeId, RadioMode>,
    active: BTreeMap<u64, Transmission>,
    next_id: u64,
}

impl Medium {
    pub fn new(neighbors: Rc<dyn NeighborQuery>) -> Self {
        Medium {
            neighbors,
            modes: BTreeMap::new(),
            active: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Radio mode last set by `node`
    pub fn mode(&self, node: NodeId) -> RadioMode {
        self.modes.get(&node).copied().unwrap_or(RadioMode::Off)
    }

    /// Whether `node` is currently transmitting
    pub fn is_sending(&self, node: NodeId) -> bool {
        self.active.values().any(|t| t.sender == node)
    }

    /// Whether any transmission is audible at `node`
    pub fn is_busy_at(&self, node: NodeId) -> bool {
        self.active.values().any(|t| t.receptions.contains_key(&node))
    }

    /// Switches a radio; leaving the listening mode loses every reception in progress
    pub fn set_mode(&mut self, node: NodeId, mode: RadioMode) {
        self.modes.insert(node, mode);
        if mode != RadioMode::Listening {
            for t in self.active.values_mut() {
                if let Some(reception) = t.receptions.get_mut(&node) {
                    *reception = Reception::Lost;
                }
            }
        }
    }

    /// Puts `packet` on the air for `airtime`; returns the transmission id
    /// and the listening nodes that sense it
    pub fn begin(&mut self, sender: NodeId, packet: Packet, now: SimTime, airtime: f64) -> Result<(u64, Vec<NodeId>)> {
        if self.is_sending(sender) {
            return Err(Error::radio_busy(format!("{} is already transmitting", sender)));
        }

        let tx = self.next_id;
        self.next_id += 1;

        let mut sensed = Vec::new();
        let mut receptions = BTreeMap::new();
        for node in self.neighbors.neighbors(sender) {
            let listening = self.mode(node) == RadioMode::Listening;
            let mut overlapped = false;
            for other in self.active.values_mut() {
                if let Some(reception) = other.receptions.get_mut(&node) {
                    overlapped = true;
                    if *reception == Reception::Intact {
                        *reception = Reception::Collided;
                    }
                }
            }
            let reception = if !listening {
                Reception::Lost
            } else if overlapped {
                Reception::Collided
            } else {
                Reception::Intact
            };
            if listening {
                sensed.push(node);
            }
            receptions.insert(node, reception);
        }

        trace!(%sender, kind = ?packet.kind, tx, "on air");
        self.active.insert(
            tx,
            Transmission {
                sender,
                packet,
                start: now,
                end: now + airtime,
                receptions,
            },
        );
        Ok((tx, sensed))
    }

    /// Takes a transmission off the air
    pub fn end(&mut self, tx: u64) -> Option<Outcome> {
        let transmission = self.active.remove(&tx)?;
        let mut receivers = Vec::new();
        let mut collided = Vec::new();
        for (node, reception) in &transmission.receptions {
            if self.mode(*node) != RadioMode::Listening {
                continue;
            }
            match reception {
                Reception::Intact => receivers.push(*node),
                Reception::Collided if !self.is_busy_at(*node) => collided.push(*node),
                _ => {}
            }
        }
        Some(Outcome {
            transmission,
            receivers,
            collided,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Address, FlowId};
    use crate::network::Deployment;
    use crate::protocol::PacketKind;

    fn medium() -> Medium {
        // 0 - 1 - 2 on a line, 0 and 2 hidden from each other
        let field: Rc<dyn NeighborQuery> = Rc::new(Deployment::line(3, 10.0, 12.0).unwrap());
        Medium::new(field)
    }

    fn packet(sender: u32) -> Packet {
        let flow = FlowId { origin: NodeId(sender), seq: 0 };
        Packet::new(PacketKind::Rts, NodeId(sender), Address::Broadcast, flow, NodeId(9))
    }

    #[test]
    fn test_clean_reception() {
        let mut medium = medium();
        medium.set_mode(NodeId(1), RadioMode::Listening);
        let (tx, sensed) = medium.begin(NodeId(0), packet(0), 0.0, 0.001).unwrap();
        assert_eq!(sensed, vec![NodeId(1)]);
        assert!(medium.is_busy_at(NodeId(1)));

        let outcome = medium.end(tx).unwrap();
        assert_eq!(outcome.transmission.sender, NodeId(0));
        assert_eq!(outcome.receivers, vec![NodeId(1)]);
        assert!(outcome.collided.is_empty());
        assert!(!medium.is_busy_at(NodeId(1)));
    }

    #[test]
    fn test_hidden_terminals_collide() {
        let mut medium = medium();
        medium.set_mode(NodeId(1), RadioMode::Listening);
        let (a, _) = medium.begin(NodeId(0), packet(0), 0.0, 0.001).unwrap();
        let (b, _) = medium.begin(NodeId(2), packet(2), 0.0005, 0.001).unwrap();

        // Reported once the channel at the victim clears
        let first = medium.end(a).unwrap();
        assert!(first.receivers.is_empty() && first.collided.is_empty());
        let second = medium.end(b).unwrap();
        assert!(second.receivers.is_empty());
        assert_eq!(second.collided, vec![NodeId(1)]);
    }

    #[test]
    fn test_sleeping_node_misses_packet() {
        let mut medium = medium();
        medium.set_mode(NodeId(1), RadioMode::Listening);
        let (tx, _) = medium.begin(NodeId(0), packet(0), 0.0, 0.001).unwrap();
        medium.set_mode(NodeId(1), RadioMode::Off);
        medium.set_mode(NodeId(1), RadioMode::Listening);
        assert!(medium.end(tx).unwrap().receivers.is_empty());

        // Off at the start: nothing heard even if listening at the end
        medium.set_mode(NodeId(1), RadioMode::Off);
        let (tx, sensed) = medium.begin(NodeId(0), packet(0), 0.002, 0.001).unwrap();
        assert!(sensed.is_empty());
        medium.set_mode(NodeId(1), RadioMode::Listening);
        assert!(medium.end(tx).unwrap().receivers.is_empty());
    }

    #[test]
    fn test_one_transmission_per_radio() {
        let mut medium = medium();
        medium.begin(NodeId(0), packet(0), 0.0, 0.001).unwrap();
        assert!(matches!(
            medium.begin(NodeId(0), packet(0), 0.0001, 0.001),
            Err(Error::RadioBusy(_))
        ));
        assert!(medium.is_sending(NodeId(0)));
    }
}
