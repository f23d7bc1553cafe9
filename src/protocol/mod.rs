//! Protocol implementation module
//!
//! This module defines the anycast MAC packets, their wire codec, the derived
//! timing and the per-node state machine.

pub mod codec;
pub mod machine;
pub mod packet;
pub mod state;
pub mod timing;

pub use self::codec::PacketCodec;
pub use self::machine::{step, AbandonReason, MacEvent, MachineContext, Note, Step, Transition};
pub use self::packet::{Packet, PacketKind};
pub use self::state::{Phase, ProtocolState, RadioMode};
pub use self::timing::{Timing, TxScratch};
