//! Anycast MAC: a duty-cycled, receiver-initiated anycast medium access protocol
//!
//! Every node sleeps most of the time and briefly listens once per cycle. A
//! node holding data advertises it with a burst of RTS preambles naming a
//! ranked forwarder candidate set (FCS); whichever candidate wakes first and
//! answers becomes the next hop, and the data unit later moves hop by hop at
//! pre-agreed CTS-DATA times.
//!
//! The per-node [`MacEngine`] is driven through the [`engine::Environment`]
//! traits. The [`sim`] module provides a discrete-event harness that plays the
//! part of the scheduler and the shared radio channel.

pub mod core;
pub mod engine;
pub mod network;
pub mod protocol;
pub mod sim;
pub mod util;

// Re-export commonly used items
pub use crate::core::{Error, FlowId, MacConfig, NodeId, Result};
pub use crate::engine::{MacEngine, MacStats};
pub use crate::network::{Deployment, NeighborQuery};
pub use crate::sim::{SimulationResult, Simulator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
