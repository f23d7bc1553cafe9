use std::fmt;

use crate::core::{FlowId, NodeId, SimTime};
use super::packet::{Packet, PacketKind};

/// Protocol phase of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Sleep,
    CsLong,
    CsShort,
    SendingMsg,
    WaitingCts,
    WaitingCtsData,
    WaitingData,
    WaitingAck,
}

impl Phase {
    /// Radio mode implied by the phase
    pub fn radio_mode(&self) -> RadioMode {
        match self {
            Phase::Sleep => RadioMode::Off,
            Phase::SendingMsg => RadioMode::Sending,
            _ => RadioMode::Listening,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Sleep => "SLEEP",
            Phase::CsLong => "CS_LONG",
            Phase::CsShort => "CS_SHORT",
            Phase::SendingMsg => "SENDING_MSG",
            Phase::WaitingCts => "WAITING_CTS",
            Phase::WaitingCtsData => "WAITING_CTS_DATA",
            Phase::WaitingData => "WAITING_DATA",
            Phase::WaitingAck => "WAITING_ACK",
        };
        f.write_str(name)
    }
}

/// Radio power state requested from the physical layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioMode {
    Off,
    Listening,
    Sending,
}

/// Mutable per-node protocol state, owned by the engine
#[derive(Debug, Clone)]
pub struct ProtocolState {
    /// Current phase
    pub phase: Phase,
    /// Incremented on every phase change; tags timers
    seq: u64,
    /// Duration scheduled for the current phase
    pub duration: f64,
    /// Packet type to transmit at the next opportunity
    pub pending: Option<PacketKind>,
    /// Outstanding RTS of the current burst
    pub rts: Option<Packet>,
    /// Data unit in custody
    pub data: Option<Packet>,
    /// FCS size of the current burst
    pub fcs_size: usize,
    /// Flow this node is working on
    pub flow: Option<FlowId>,
    /// Chosen forwarder
    pub next_hop: Option<NodeId>,
    /// Final destination of the flow
    pub final_dest: Option<NodeId>,
    /// Predecessors at depth 1-3
    pub prev_hops: [Option<NodeId>; 3],
    /// Whether this node submitted the flow
    pub is_source: bool,
    /// Completed RTS bursts of the current flow
    pub rts_restarts: u32,
    /// Missed hand-offs of the current flow
    pub missing_data: u32,
    /// Energy seen on the channel during the current carrier sense
    pub channel_busy: bool,
    /// Custody was handed on; confirmation outstanding
    pub waiting_for_ack: bool,
    /// Answers to an RTS collided at this node
    pub collision: bool,
    /// Last transmission was a terminal CTS
    pub sent_terminal_cts: bool,
    /// Data received but not yet confirmed to the predecessor
    pub ack_owed: bool,
    /// The final destination holds the complete flow
    pub flow_complete: bool,
    /// When this node requests the data unit from its predecessor
    pub cts_data_time: Option<SimTime>,
    /// When the next hop requests the data unit from this node
    pub next_hop_cts_data_time: Option<SimTime>,
    /// CTS-DATA time a final destination derives from this node's last RTS
    pub advertised_cts_data_time: Option<SimTime>,
    /// When the predecessor of a relay takes the data unit from its own predecessor
    pub upstream_handoff: Option<SimTime>,
    /// Node ids in radio range
    pub neighbors: Vec<NodeId>,
}

impl ProtocolState {
    /// Boot state: asleep, sequence zero
    pub fn new(neighbors: Vec<NodeId>) -> Self {
        ProtocolState {
            phase: Phase::Sleep,
            seq: 0,
            duration: 0.0,
            pending: None,
            rts: None,
            data: None,
            fcs_size: 0,
            flow: None,
            next_hop: None,
            final_dest: None,
            prev_hops: [None; 3],
            is_source: false,
            rts_restarts: 0,
            missing_data: 0,
            channel_busy: false,
            waiting_for_ack: false,
            collision: false,
            sent_terminal_cts: false,
            ack_owed: false,
            flow_complete: false,
            cts_data_time: None,
            next_hop_cts_data_time: None,
            advertised_cts_data_time: None,
            upstream_handoff: None,
            neighbors,
        }
    }

    /// State sequence number
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Moves to `phase` for `duration`; returns the new sequence
    pub fn enter(&mut self, phase: Phase, duration: f64) -> u64 {
        self.phase = phase;
        self.duration = duration;
        self.seq += 1;
        self.seq
    }

    /// Whether a timer tagged with `seq` still belongs to the current phase
    pub fn is_current(&self, seq: u64) -> bool {
        self.seq == seq
    }

    /// Whether this node holds a data unit
    pub fn is_custodian(&self) -> bool {
        self.data.is_some()
    }

    /// Whether this node takes part in any flow
    pub fn on_path(&self) -> bool {
        self.flow.is_some() || self.data.is_some() || self.pending.is_some()
    }

    /// Whether `flow` is the flow this node works on
    pub fn is_flow(&self, flow: FlowId) -> bool {
        self.flow == Some(flow)
    }

    /// Predecessor one hop back
    pub fn prev_hop(&self) -> Option<NodeId> {
        self.prev_hops[0]
    }

    /// Whether this node is the final destination of its flow
    pub fn is_final(&self, me: NodeId) -> bool {
        self.final_dest == Some(me)
    }

    /// Clears custody and every path field ("node fired")
    pub fn clear_path(&mut self) {
        self.pending = None;
        self.rts = None;
        self.data = None;
        self.fcs_size = 0;
        self.flow = None;
        self.next_hop = None;
        self.final_dest = None;
        self.prev_hops = [None; 3];
        self.is_source = false;
        self.rts_restarts = 0;
        self.missing_data = 0;
        self.channel_busy = false;
        self.waiting_for_ack = false;
        self.collision = false;
        self.sent_terminal_cts = false;
        self.ack_owed = false;
        self.flow_complete = false;
        self.cts_data_time = None;
        self.upstream_handoff = None;
        self.next_hop_cts_data_time = None;
        self.advertised_cts_data_time = None;
    }
}
