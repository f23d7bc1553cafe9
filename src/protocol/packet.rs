use bytes::Bytes;
use serde::{Serialize, Deserialize};

use crate::core::{
    Address, FlowId, NodeId, ACK_HEADER_LEN, CONTROL_HEADER_LEN, CTS_DATA_HEADER_LEN,
    CTS_HEADER_LEN, DATA_HEADER_LEN, FCS_ENTRY_LEN, MAX_FCS_SIZE, NACK_HEADER_LEN,
    RTS_HEADER_LEN,
};
use crate::util::mask_seq;

/// Packet types exchanged between neighboring engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    /// Preamble advertising a flow and its forward candidates
    Rts,
    /// Explicit answer from the final destination
    Cts,
    /// Request for the data unit, sent by the next hop
    CtsData,
    /// The data unit itself
    Data,
    /// Custody confirmation
    Ack,
    /// Negative acknowledgement; carried on the wire but not acted on
    Nack,
    /// Management frame of another layer; ignored
    Control,
    /// Filler frame; ignored
    Void,
}

impl PacketKind {
    /// Header length in bytes; RTS headers reserve room for a full FCS
    pub fn header_len(&self) -> usize {
        match self {
            PacketKind::Rts => RTS_HEADER_LEN + FCS_ENTRY_LEN * MAX_FCS_SIZE,
            PacketKind::Cts => CTS_HEADER_LEN,
            PacketKind::CtsData => CTS_DATA_HEADER_LEN,
            PacketKind::Data => DATA_HEADER_LEN,
            PacketKind::Ack => ACK_HEADER_LEN,
            PacketKind::Nack => NACK_HEADER_LEN,
            PacketKind::Control | PacketKind::Void => CONTROL_HEADER_LEN,
        }
    }

    /// Whether the state machine acts on this type
    pub fn is_handled(&self) -> bool {
        !matches!(self, PacketKind::Nack | PacketKind::Control | PacketKind::Void)
    }
}

/// Wire representation of one MAC frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Packet type
    pub kind: PacketKind,
    /// 16-bit sequence; for RTS the remaining preambles of the burst
    seq: u16,
    /// Transmitting node
    pub sender: NodeId,
    /// Link-layer destination
    pub receiver: Address,
    /// Forward candidates, best first (RTS only)
    pub fcs: Vec<NodeId>,
    /// Final destination of the flow
    pub final_dest: NodeId,
    /// Previous hops at depth 1-3 (RTS only)
    pub prev_hops: [Option<NodeId>; 3],
    /// Seconds until the sender's CTS-DATA (RTS only)
    pub cts_data_delay: f64,
    /// Whether the receiver should confirm custody
    pub ack_requested: bool,
    /// Header length in bytes
    pub header_len: u16,
    /// Flow the packet belongs to
    pub flow: FlowId,
    /// Upper-layer payload (DATA only)
    pub payload: Option<Bytes>,
}

impl Packet {
    /// Creates a packet with an empty FCS and no payload
    pub fn new(kind: PacketKind, sender: NodeId, receiver: Address, flow: FlowId, final_dest: NodeId) -> Self {
        Packet {
            kind,
            seq: 0,
            sender,
            receiver,
            fcs: Vec::new(),
            final_dest,
            prev_hops: [None; 3],
            cts_data_delay: 0.0,
            ack_requested: false,
            header_len: kind.header_len() as u16,
            flow,
            payload: None,
        }
    }

    /// Creates a DATA packet carrying `payload`
    pub fn data(sender: NodeId, flow: FlowId, final_dest: NodeId, payload: Bytes) -> Self {
        let mut packet = Packet::new(PacketKind::Data, sender, Address::Broadcast, flow, final_dest);
        packet.set_seq(flow.seq as u32);
        packet.ack_requested = true;
        packet.payload = Some(payload);
        packet
    }

    /// Sequence number
    pub fn seq(&self) -> u16 {
        self.seq
    }

    /// Writes the sequence number, masked to 16 bits
    pub fn set_seq(&mut self, value: u32) {
        self.seq = mask_seq(value);
    }

    /// Counts down one preamble; saturates at zero
    pub fn decrement_seq(&mut self) -> u16 {
        self.seq = self.seq.saturating_sub(1);
        self.seq
    }

    /// Payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, |p| p.len())
    }

    /// Size on air in bits
    pub fn bits(&self) -> usize {
        (self.header_len as usize + self.payload_len()) * 8
    }

    /// Predecessor one hop back
    pub fn prev_hop(&self) -> Option<NodeId> {
        self.prev_hops[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow() -> FlowId {
        FlowId { origin: NodeId(1), seq: 7 }
    }

    #[test]
    fn test_packet_creation() {
        let rts = Packet::new(PacketKind::Rts, NodeId(1), Address::Broadcast, flow(), NodeId(9));
        assert_eq!(rts.header_len as usize, RTS_HEADER_LEN + FCS_ENTRY_LEN * MAX_FCS_SIZE);
        assert!(rts.payload.is_none());
        assert_eq!(rts.prev_hop(), None);

        let data = Packet::data(NodeId(1), flow(), NodeId(9), Bytes::from_static(b"reading"));
        assert_eq!(data.seq(), 7);
        assert!(data.ack_requested);
        assert_eq!(data.bits(), (DATA_HEADER_LEN + 7) * 8);
    }

    #[test]
    fn test_sequence_is_masked() {
        let mut packet = Packet::new(PacketKind::Rts, NodeId(1), Address::Broadcast, flow(), NodeId(9));
        packet.set_seq(0x0001_0003);
        assert_eq!(packet.seq(), 3);
        packet.set_seq(u32::MAX);
        assert_eq!(packet.seq(), 0xFFFF);
    }

    #[test]
    fn test_decrement_counts_down_preambles() {
        let mut packet = Packet::new(PacketKind::Rts, NodeId(1), Address::Broadcast, flow(), NodeId(9));
        packet.set_seq(2);
        assert_eq!(packet.decrement_seq(), 1);
        assert_eq!(packet.decrement_seq(), 0);
        assert_eq!(packet.decrement_seq(), 0);
    }

    #[test]
    fn test_unhandled_kinds() {
        assert!(PacketKind::Rts.is_handled());
        assert!(PacketKind::Ack.is_handled());
        assert!(!PacketKind::Void.is_handled());
        assert!(!PacketKind::Control.is_handled());
    }
}
