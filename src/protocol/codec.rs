use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::Error;
use super::packet::Packet;

/// Largest frame body accepted by the decoder
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Length-prefixed codec for capturing or relaying MAC frames
#[derive(Clone, Default)]
pub struct PacketCodec;

impl PacketCodec {
    /// Creates a new packet codec
    pub fn new() -> Self {
        PacketCodec
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            // Need more data to read frame length
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_FRAME_LEN {
            return Err(Error::protocol(format!("Frame of {} bytes exceeds limit", length)));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let frame = src.split_to(length);

        bincode::deserialize(&frame)
            .map(Some)
            .map_err(|e| Error::protocol(format!("Failed to deserialize packet: {}", e)))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = bincode::serialize(&item)
            .map_err(|e| Error::protocol(format!("Failed to serialize packet: {}", e)))?;

        if bytes.len() > MAX_FRAME_LEN {
            return Err(Error::protocol(format!("Frame of {} bytes exceeds limit", bytes.len())));
        }

        dst.reserve(4 + bytes.len());
        dst.put_u32(bytes.len() as u32);
        dst.extend_from_slice(&bytes);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::core::{Address, FlowId, NodeId};
    use crate::protocol::packet::PacketKind;

    fn rts() -> Packet {
        let flow = FlowId { origin: NodeId(3), seq: 41 };
        let mut packet = Packet::new(PacketKind::Rts, NodeId(3), Address::Broadcast, flow, NodeId(12));
        packet.set_seq(17);
        packet.fcs = vec![NodeId(5), NodeId(8)];
        packet.prev_hops = [Some(NodeId(2)), Some(NodeId(1)), None];
        packet.cts_data_delay = 0.75;
        packet
    }

    #[test]
    fn test_codec_rts_frame() {
        let mut codec = PacketCodec::new();
        let mut bytes = BytesMut::new();

        let packet = rts();
        codec.encode(packet.clone(), &mut bytes).unwrap();

        let decoded = codec.decode(&mut bytes).unwrap().expect("complete frame");
        assert_eq!(decoded, packet);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = PacketCodec::new();
        let mut full = BytesMut::new();
        let flow = FlowId { origin: NodeId(3), seq: 1 };
        let data = Packet::data(NodeId(3), flow, NodeId(4), Bytes::from_static(b"payload"));
        codec.encode(data.clone(), &mut full).unwrap();

        let mut partial = full.split_to(full.len() - 3);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(full);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(data));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut codec = PacketCodec::new();
        let mut bytes = BytesMut::new();
        bytes.put_u32((MAX_FRAME_LEN + 1) as u32);
        assert!(matches!(codec.decode(&mut bytes), Err(Error::Protocol(_))));
    }
}
