//! Protocol engine and its collaborators
//!
//! A [`MacEngine`] owns one node's protocol state. It is driven entirely by
//! the event handlers it exposes; everything it needs from the outside world
//! (the clock, the radio, the layer above) comes in through an
//! [`Environment`] borrowed for the duration of a single handler call.

mod node;
pub mod stats;

pub use self::node::MacEngine;
pub use self::stats::{MacCounter, MacStats, StatsCollector};

use bytes::Bytes;

use crate::core::{FlowId, Result, SimTime};
use crate::protocol::{Packet, RadioMode};

/// Simulated clock and timers
pub trait Scheduler {
    /// Current simulated time
    fn now(&self) -> SimTime;

    /// Simulated time left until the run ends
    fn remaining(&self) -> f64;

    /// Fires the engine's timer handler after `delay` with `tag`
    fn schedule_timer(&mut self, delay: f64, tag: u64);
}

/// Physical layer of the node
pub trait Radio {
    /// Switches the transceiver
    fn set_radio(&mut self, mode: RadioMode);

    /// Starts transmitting `packet` for `airtime` seconds
    ///
    /// A refusal with [`crate::Error::RadioBusy`] is recoverable.
    fn transmit(&mut self, packet: Packet, airtime: f64) -> Result<()>;
}

/// Consumer of delivered data units
pub trait UpperLayer {
    /// Hands a payload that reached its final destination upward
    fn deliver(&mut self, flow: FlowId, payload: Bytes);
}

/// Everything an engine handler may call
pub trait Environment: Scheduler + Radio + UpperLayer {}

impl<T: Scheduler + Radio + UpperLayer + ?Sized> Environment for T {}
