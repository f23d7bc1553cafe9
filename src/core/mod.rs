//! Core types for the anycast MAC
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, Result};
pub use self::types::{
    Address,
    BackoffPolicy,
    FlowId,
    MacConfig,
    NodeId,
    SimTime,
};

/// Default radio bit rate (bits per second)
pub const DEFAULT_BIT_RATE: f64 = 250_000.0;

/// Maximum number of forward candidates advertised in one RTS
pub const MAX_FCS_SIZE: usize = 8;

/// Mask applied to every 16-bit sequence number write
pub const SEQ_MASK: u32 = 0xFFFF;

/// Radio turnaround time, also the candidate contention slot (seconds)
pub const TURNAROUND: f64 = 100e-6;

/// Extra listening time added to the long carrier sense (seconds)
pub const CS_MARGIN: f64 = 500e-6;

/// Header lengths in bytes
pub const RTS_HEADER_LEN: usize = 16;
pub const FCS_ENTRY_LEN: usize = 2;
pub const CTS_HEADER_LEN: usize = 12;
pub const CTS_DATA_HEADER_LEN: usize = 12;
pub const ACK_HEADER_LEN: usize = 12;
pub const NACK_HEADER_LEN: usize = 12;
pub const CONTROL_HEADER_LEN: usize = 12;
pub const DATA_HEADER_LEN: usize = 16;
