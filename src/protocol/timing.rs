//! Timing configuration
//!
//! Every duration the protocol uses is derived here from the handful of
//! inputs in [`MacConfig`]. Construction is pure: identical inputs always
//! produce identical timings.

use tracing::debug;

use crate::core::{
    Error, MacConfig, Result, CS_MARGIN, DATA_HEADER_LEN, MAX_FCS_SIZE, TURNAROUND,
};
use crate::util::checked_duration;
use super::packet::PacketKind;

/// Hops at or below which the maximum FCS multiplier applies
const NEAR_HOPS: f64 = 1.0;
/// Hops at or above which the minimum FCS multiplier applies
const FAR_HOPS: f64 = 6.0;

/// Immutable durations and sizes derived from the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    config: MacConfig,
    /// Seconds per bit
    bit_time: f64,
    /// RTS transmit time
    pub rts: f64,
    /// CTS transmit time
    pub cts: f64,
    /// CTS-DATA transmit time
    pub cts_data: f64,
    /// ACK transmit time
    pub ack: f64,
    /// Contention slot between ranked candidates
    pub slot: f64,
    /// Listen time after each RTS of a burst
    pub cts_window: f64,
    /// One RTS plus its listen window
    pub rts_round: f64,
    /// Long carrier sense
    pub cs_long: f64,
    /// Sleep part of the duty cycle
    pub sleep: f64,
    /// DATA transmit time budget
    pub data_time: f64,
    /// DATA length in bytes (header included)
    pub data_len: usize,
    /// Preambles per burst
    pub max_preambles: u16,
    /// Retry-cycle slot for missed hand-offs and confirmations
    pub retry_slot: f64,
    /// How much earlier than a deadline a node wakes
    pub early_wake: f64,
    /// Time for a custodian to receive and confirm a data unit
    pub handoff: f64,
    /// Base FCS size before the hop multiplier
    pub fcs_base_size: usize,
}

impl Timing {
    /// Derives all timings; fails fast on invalid inputs
    pub fn new(config: MacConfig) -> Result<Self> {
        config.validate()?;

        let cycle = config.cycle_secs();
        let bit_time = 1.0 / config.bit_rate;
        let tx = |kind: PacketKind| kind.header_len() as f64 * 8.0 * bit_time;

        let rts = tx(PacketKind::Rts);
        let cts = tx(PacketKind::Cts);
        let cts_data = tx(PacketKind::CtsData);
        let ack = tx(PacketKind::Ack);

        let slot = TURNAROUND;
        let cts_window = MAX_FCS_SIZE as f64 * slot + rts + 2.0 * TURNAROUND;
        let rts_round = rts + cts_window;
        let cs_long = 2.0 * rts + cts_window + CS_MARGIN;

        let sleep = cycle - cs_long;
        if sleep <= 0.0 {
            return Err(Error::config(format!(
                "cycle of {} s is shorter than the carrier sense of {} s",
                cycle, cs_long
            )));
        }

        let data_time = cycle * config.data_ratio;
        let data_bits = data_time * config.bit_rate;
        let data_len = (data_bits / 8.0).floor() as usize;
        if data_len <= DATA_HEADER_LEN {
            return Err(Error::config(format!(
                "data budget of {} bytes does not fit the {} byte header",
                data_len, DATA_HEADER_LEN
            )));
        }

        let preambles = (sleep / rts_round).ceil() + 1.0;
        if preambles > u16::MAX as f64 {
            return Err(Error::config("burst needs more preambles than a sequence can count"));
        }
        let max_preambles = preambles as u16;

        let retry_slot = cycle * config.hold_fraction;
        let early_wake = cs_long;
        let handoff =
            cts_data + data_time + retry_slot + ack + 2.0 * early_wake + 4.0 * TURNAROUND;

        let fcs_base_size = Self::search_fcs_base(rts_round, cycle, max_preambles, retry_slot);

        let timing = Timing {
            config,
            bit_time,
            rts,
            cts,
            cts_data,
            ack,
            slot,
            cts_window,
            rts_round,
            cs_long,
            sleep,
            data_time,
            data_len,
            max_preambles,
            retry_slot,
            early_wake,
            handoff,
            fcs_base_size,
        };
        timing.check()?;

        debug!(
            cycle,
            sleep = timing.sleep,
            cs_long = timing.cs_long,
            max_preambles = timing.max_preambles,
            fcs_base_size = timing.fcs_base_size,
            "derived MAC timing"
        );
        Ok(timing)
    }

    /// Smallest candidate count whose expected RTS rounds fit the hold budget
    fn search_fcs_base(rts_round: f64, cycle: f64, preambles: u16, budget: f64) -> usize {
        let p = (rts_round / cycle).min(1.0);
        let mut size = 1;
        while size < MAX_FCS_SIZE {
            if Self::expected_rounds(p, size, preambles) * rts_round <= budget {
                break;
            }
            size += 1;
        }
        size
    }

    /// Expected rounds until one of `size` candidates wakes, truncated at a burst
    fn expected_rounds(p: f64, size: usize, preambles: u16) -> f64 {
        let q = (1.0 - p).powi(size as i32);
        if q >= 1.0 {
            return preambles as f64;
        }
        (1.0 - q.powi(preambles as i32)) / (1.0 - q)
    }

    fn check(&self) -> Result<()> {
        for (name, value) in [
            ("rts", self.rts),
            ("cts", self.cts),
            ("cts_data", self.cts_data),
            ("ack", self.ack),
            ("cts_window", self.cts_window),
            ("cs_long", self.cs_long),
            ("sleep", self.sleep),
            ("data_time", self.data_time),
            ("retry_slot", self.retry_slot),
            ("handoff", self.handoff),
        ] {
            checked_duration(name, value)?;
        }
        Ok(())
    }

    /// Configuration the timing was derived from
    pub fn config(&self) -> &MacConfig {
        &self.config
    }

    /// Cycle length in seconds
    pub fn cycle(&self) -> f64 {
        self.config.cycle_secs()
    }

    /// Transmit time of a packet of `bits`
    pub fn airtime(&self, bits: usize) -> f64 {
        bits as f64 * self.bit_time
    }

    /// Transmit time of a packet type at its nominal size
    pub fn tx_time(&self, kind: PacketKind) -> f64 {
        match kind {
            PacketKind::Rts => self.rts,
            PacketKind::Cts => self.cts,
            PacketKind::CtsData => self.cts_data,
            PacketKind::Ack => self.ack,
            PacketKind::Data => self.data_time,
            other => self.airtime(other.header_len() * 8),
        }
    }

    /// Largest payload a DATA packet can carry
    pub fn max_payload(&self) -> usize {
        self.data_len - DATA_HEADER_LEN
    }

    /// Time a burst needs in the worst case
    pub fn burst_time(&self) -> f64 {
        self.max_preambles as f64 * self.rts_round
    }

    /// Span around a predecessor's hand-off in which a relay keeps its burst off the air
    ///
    /// Starts one RTS airtime before the predecessor's CTS-DATA and ends once
    /// the data unit has reached it.
    pub fn upstream_hold(&self) -> f64 {
        self.rts + self.cts_data + self.data_time + 3.0 * TURNAROUND
    }

    /// FCS multiplier for the estimated hops until data arrival
    pub fn fcs_multiplier(&self, hops: f64) -> f64 {
        let (min, max) = (self.config.fcs_multiplier_min, self.config.fcs_multiplier_max);
        if hops <= NEAR_HOPS {
            max
        } else if hops >= FAR_HOPS {
            min
        } else {
            max - (max - min) * (hops - NEAR_HOPS) / (FAR_HOPS - NEAR_HOPS)
        }
    }

    /// FCS size for the estimated hops until data arrival
    pub fn fcs_size(&self, hops: f64) -> usize {
        let scaled = (self.fcs_base_size as f64 * self.fcs_multiplier(hops)).round() as usize;
        scaled.clamp(1, MAX_FCS_SIZE)
    }
}

/// Per-transmission values the engine adjusts before every send
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxScratch {
    /// Transmit power requested by the upper layer (dBm)
    pub signal_strength: f64,
    /// FCS size used for the current burst
    pub fcs_size: usize,
}
