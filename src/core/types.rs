use std::fmt;
use std::time::Duration;

use serde::{Serialize, Deserialize};

use super::{Error, Result};
use crate::util::duration_to_secs;

/// Simulated time in seconds
pub type SimTime = f64;

/// Node identifier in the deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Returns the raw identifier
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Link-layer destination of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    /// A single neighbor
    Unicast(NodeId),
    /// Every node in range
    Broadcast,
}

impl Address {
    /// Whether a node with `id` is addressed by this packet
    pub fn accepts(&self, id: NodeId) -> bool {
        match self {
            Address::Unicast(target) => *target == id,
            Address::Broadcast => true,
        }
    }

    /// Returns the unicast target, if any
    pub fn unicast(&self) -> Option<NodeId> {
        match self {
            Address::Unicast(target) => Some(*target),
            Address::Broadcast => None,
        }
    }
}

/// Identity of one data unit travelling through the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId {
    /// Node that submitted the data unit
    pub origin: NodeId,
    /// Origin's 16-bit data sequence number
    pub seq: u16,
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin, self.seq)
    }
}

/// How a forward candidate spaces its answer to an RTS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffPolicy {
    /// Contention slots equal to the candidate's rank in the FCS
    Rank,
    /// Uniformly random slot within the FCS length
    Random,
}

/// Configuration surface of the MAC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacConfig {
    /// Length of one duty cycle
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub cycle_length: Duration,
    /// Fraction of the cycle spent transmitting one DATA packet
    pub data_ratio: f64,
    /// Fraction of the cycle a custodian holds data per retry slot
    pub hold_fraction: f64,
    /// Maximum number of RTS bursts per flow
    pub max_rts_sequences: u32,
    /// FCS multiplier far from the destination
    pub fcs_multiplier_min: f64,
    /// FCS multiplier close to the destination
    pub fcs_multiplier_max: f64,
    /// Radio bit rate in bits per second
    pub bit_rate: f64,
    /// Missed hand-offs tolerated before a flow is abandoned
    pub max_missing: u32,
    /// Every k-th miss applies the escalated backoff
    pub watchdog_every: u32,
    /// Escalated backoff length in retry slots
    pub watchdog_slots: u32,
    /// Upper bound of random backoffs, in RTS rounds
    pub max_backoff_slots: u32,
    /// Candidate answer spacing
    pub backoff_policy: BackoffPolicy,
    /// Listeners outside the FCS sleep through the announced hand-off
    pub channel_reservation: bool,
    /// Base seed of the per-node random generators
    pub seed: u64,
}

impl Default for MacConfig {
    fn default() -> Self {
        MacConfig {
            cycle_length: Duration::from_secs(1),
            data_ratio: 0.01,
            hold_fraction: 0.25,
            max_rts_sequences: 3,
            fcs_multiplier_min: 1.0,
            fcs_multiplier_max: 2.0,
            bit_rate: super::DEFAULT_BIT_RATE,
            max_missing: 6,
            watchdog_every: 3,
            watchdog_slots: 3,
            max_backoff_slots: 8,
            backoff_policy: BackoffPolicy::Rank,
            channel_reservation: false,
            seed: 0,
        }
    }
}

impl MacConfig {
    /// Cycle length in seconds
    pub fn cycle_secs(&self) -> f64 {
        duration_to_secs(self.cycle_length)
    }

    /// Rejects inputs from which no timing can be derived
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(Error::config(format!("{} must be positive, got {}", name, value)))
            }
        };

        positive("cycle_length", self.cycle_secs())?;
        positive("data_ratio", self.data_ratio)?;
        positive("hold_fraction", self.hold_fraction)?;
        positive("fcs_multiplier_min", self.fcs_multiplier_min)?;
        positive("fcs_multiplier_max", self.fcs_multiplier_max)?;
        positive("bit_rate", self.bit_rate)?;

        if self.data_ratio >= 1.0 {
            return Err(Error::config("data_ratio must be below 1"));
        }
        if self.hold_fraction >= 1.0 {
            return Err(Error::config("hold_fraction must be below 1"));
        }
        if self.fcs_multiplier_min > self.fcs_multiplier_max {
            return Err(Error::config("fcs_multiplier_min exceeds fcs_multiplier_max"));
        }
        if self.max_rts_sequences == 0 {
            return Err(Error::config("max_rts_sequences must be at least 1"));
        }
        if self.watchdog_every == 0 || self.watchdog_slots == 0 {
            return Err(Error::config("watchdog parameters must be at least 1"));
        }
        if self.max_backoff_slots == 0 {
            return Err(Error::config("max_backoff_slots must be at least 1"));
        }
        Ok(())
    }
}
