use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::core::FlowId;
use crate::protocol::{AbandonReason, PacketKind};

/// Countable protocol events without a dedicated hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MacCounter {
    /// Answers to our RTS overlapped
    Collision,
    /// A timer of an earlier phase fired and was dropped
    StaleTimer,
    /// Took over from a predecessor's predecessor
    Shortcut,
    /// Left a flow to a candidate closer to the destination
    StandDown,
    /// Backed off after the predecessor repeated its RTS
    Suppression,
    /// Another candidate answered first
    Yield,
    /// Refused an RTS whose path doubles back
    Decline,
    /// Paused a burst for an RTS of another flow
    InterFlowBackoff,
    /// Received a packet type the protocol ignores
    ForeignPacket,
    /// The radio refused a transmission
    RadioBusy,
    /// Unit waiting behind the current flow
    Queued,
    /// Unit dropped: the run ends before it could be forwarded
    Expired,
}

/// Statistics sink injected into an engine
pub trait StatsCollector {
    /// A packet of `kind` left the radio
    fn packet_sent(&mut self, kind: PacketKind);

    /// A packet of `kind` was handed to the engine
    fn packet_received(&mut self, kind: PacketKind);

    /// The local node accepted a unit for transmission
    fn flow_started(&mut self, flow: FlowId);

    /// The local node is the final destination and delivered `flow` upward
    fn flow_delivered(&mut self, flow: FlowId);

    /// Custody of `flow` was confirmed by the next hop
    fn flow_forwarded(&mut self, flow: FlowId);

    /// The local node gave up on `flow`
    fn flow_abandoned(&mut self, flow: Option<FlowId>, reason: AbandonReason, had_custody: bool);

    /// Bumps a plain counter
    fn count(&mut self, counter: MacCounter);

    /// Current totals
    fn snapshot(&self) -> MacStats;
}

/// Per-node protocol counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacStats {
    pub sent: BTreeMap<PacketKind, u64>,
    pub received: BTreeMap<PacketKind, u64>,
    pub flows_started: u64,
    pub flows_delivered: u64,
    pub flows_forwarded: u64,
    /// Abandoned while holding the data unit
    pub custody_lost: u64,
    pub abandoned: BTreeMap<AbandonReason, u64>,
    pub counters: BTreeMap<MacCounter, u64>,
}

impl MacStats {
    /// Packets of `kind` sent
    pub fn sent_of(&self, kind: PacketKind) -> u64 {
        self.sent.get(&kind).copied().unwrap_or(0)
    }

    /// Packets of `kind` received
    pub fn received_of(&self, kind: PacketKind) -> u64 {
        self.received.get(&kind).copied().unwrap_or(0)
    }

    /// Flows abandoned for `reason`
    pub fn abandoned_for(&self, reason: AbandonReason) -> u64 {
        self.abandoned.get(&reason).copied().unwrap_or(0)
    }

    /// Value of a plain counter
    pub fn counter(&self, counter: MacCounter) -> u64 {
        self.counters.get(&counter).copied().unwrap_or(0)
    }

    /// Delivered flows over started flows
    pub fn delivery_ratio(&self) -> f64 {
        if self.flows_started == 0 {
            0.0
        } else {
            self.flows_delivered as f64 / self.flows_started as f64
        }
    }
}

impl StatsCollector for MacStats {
    fn packet_sent(&mut self, kind: PacketKind) {
        *self.sent.entry(kind).or_default() += 1;
    }

    fn packet_received(&mut self, kind: PacketKind) {
        *self.received.entry(kind).or_default() += 1;
    }

    fn flow_started(&mut self, _flow: FlowId) {
        self.flows_started += 1;
    }

    fn flow_delivered(&mut self, _flow: FlowId) {
        self.flows_delivered += 1;
    }

    fn flow_forwarded(&mut self, _flow: FlowId) {
        self.flows_forwarded += 1;
    }

    fn flow_abandoned(&mut self, _flow: Option<FlowId>, reason: AbandonReason, had_custody: bool) {
        *self.abandoned.entry(reason).or_default() += 1;
        if had_custody {
            self.custody_lost += 1;
        }
    }

    fn count(&mut self, counter: MacCounter) {
        *self.counters.entry(counter).or_default() += 1;
    }

    fn snapshot(&self) -> MacStats {
        self.clone()
    }
}

impl AddAssign<&MacStats> for MacStats {
    fn add_assign(&mut self, other: &MacStats) {
        for (kind, n) in &other.sent {
            *self.sent.entry(*kind).or_default() += n;
        }
        for (kind, n) in &other.received {
            *self.received.entry(*kind).or_default() += n;
        }
        for (reason, n) in &other.abandoned {
            *self.abandoned.entry(*reason).or_default() += n;
        }
        for (counter, n) in &other.counters {
            *self.counters.entry(*counter).or_default() += n;
        }
        self.flows_started += other.flows_started;
        self.flows_delivered += other.flows_delivered;
        self.flows_forwarded += other.flows_forwarded;
        self.custody_lost += other.custody_lost;
    }
}

impl fmt::Display for MacStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "started={} delivered={} forwarded={} custody_lost={} sent={:?} abandoned={:?}",
            self.flows_started,
            self.flows_delivered,
            self.flows_forwarded,
            self.custody_lost,
            self.sent,
            self.abandoned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeId;

    #[test]
    fn test_counts_by_kind() {
        let mut stats = MacStats::default();
        stats.packet_sent(PacketKind::Rts);
        stats.packet_sent(PacketKind::Rts);
        stats.packet_received(PacketKind::Cts);
        stats.count(MacCounter::Collision);

        assert_eq!(stats.sent_of(PacketKind::Rts), 2);
        assert_eq!(stats.sent_of(PacketKind::Data), 0);
        assert_eq!(stats.received_of(PacketKind::Cts), 1);
        assert_eq!(stats.counter(MacCounter::Collision), 1);
    }

    #[test]
    fn test_merge_and_ratio() {
        let flow = FlowId { origin: NodeId(0), seq: 0 };
        let mut a = MacStats::default();
        a.flow_started(flow);
        a.flow_started(flow);
        a.flow_abandoned(Some(flow), AbandonReason::NoForwarder, true);

        let mut b = MacStats::default();
        b.flow_delivered(flow);
        b.packet_sent(PacketKind::Ack);

        let mut total = MacStats::default();
        total += &a;
        total += &b;
        assert_eq!(total.flows_started, 2);
        assert_eq!(total.flows_delivered, 1);
        assert_eq!(total.custody_lost, 1);
        assert_eq!(total.abandoned_for(AbandonReason::NoForwarder), 1);
        assert_eq!(total.sent_of(PacketKind::Ack), 1);
        assert_eq!(total.delivery_ratio(), 0.5);
    }

    #[test]
    fn test_stats_serialize() {
        let mut stats = MacStats::default();
        stats.packet_sent(PacketKind::Data);
        stats.count(MacCounter::Shortcut);
        stats.flow_abandoned(None, AbandonReason::HandoffMissed, false);
        let json = serde_json::to_string(&stats).unwrap();
        let back: MacStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }
}
