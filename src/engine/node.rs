use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, debug_span, error, trace, warn, Span};

use crate::core::{Address, Error, FlowId, NodeId, Result};
use crate::network::{FcsSelector, NeighborQuery};
use crate::protocol::{
    machine, MacEvent, MachineContext, Note, Packet, PacketKind, Phase, ProtocolState,
    Timing, Transition, TxScratch,
};
use crate::util::{checked_duration, mask_seq, until};
use super::stats::{MacCounter, MacStats, StatsCollector};
use super::Environment;

/// A data unit waiting for the node to become free
#[derive(Debug, Clone)]
struct Outbound {
    flow: FlowId,
    payload: Bytes,
    dest: NodeId,
    power: f64,
}

/// Per-node anycast MAC engine
pub struct MacEngine {
    /// Local node
    id: NodeId,
    /// Derived timing shared by every engine of a run
    timing: Rc<Timing>,
    /// Forwarder selection over the injected neighbor capability
    selector: FcsSelector,
    /// Protocol state
    state: ProtocolState,
    /// Deterministic per-node randomness
    rng: StdRng,
    /// Values refreshed before each transmission
    scratch: TxScratch,
    /// Injected statistics sink
    stats: Box<dyn StatsCollector>,
    /// Units submitted while busy
    outbound: VecDeque<Outbound>,
    /// Next data sequence of flows originating here
    next_seq: u32,
    span: Span,
}

impl MacEngine {
    /// Creates an engine that reports into `stats`
    pub fn new(
        id: NodeId,
        timing: Rc<Timing>,
        neighbors: Rc<dyn NeighborQuery>,
        stats: Box<dyn StatsCollector>,
    ) -> Self {
        let seed = timing
            .config()
            .seed
            .wrapping_add(id.value() as u64)
            .wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let state = ProtocolState::new(neighbors.neighbors(id));

        MacEngine {
            id,
            timing,
            selector: FcsSelector::new(id, neighbors),
            state,
            rng: StdRng::seed_from_u64(seed),
            scratch: TxScratch::default(),
            stats,
            outbound: VecDeque::new(),
            next_seq: 0,
            span: debug_span!("mac", node = %id),
        }
    }

    /// Creates an engine with a fresh [`MacStats`] collector
    pub fn with_default_stats(id: NodeId, timing: Rc<Timing>, neighbors: Rc<dyn NeighborQuery>) -> Self {
        Self::new(id, timing, neighbors, Box::new(MacStats::default()))
    }

    /// Local node id
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Current protocol state
    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Timing the engine runs with
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Transmission settings of the current burst
    pub fn scratch(&self) -> &TxScratch {
        &self.scratch
    }

    /// Units waiting behind the current flow
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    /// Statistics gathered so far
    pub fn stats(&self) -> MacStats {
        self.stats.snapshot()
    }

    /// Boots the node asleep, waking at a random point of its first cycle
    pub fn start(&mut self, env: &mut impl Environment) -> Result<()> {
        let offset = self.rng.gen_range(0.0..self.timing.cycle());
        self.start_at(env, offset)
    }

    /// Boots the duty cycle with a fixed first wake-up `offset` seconds from now
    pub fn start_at(&mut self, env: &mut impl Environment, offset: f64) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        trace!(offset, "boot");
        self.enter(
            env,
            Transition {
                phase: Phase::Sleep,
                duration: offset,
                send: None,
            },
        )
    }

    /// Accepts a data unit for `dest`; returns the flow it travels as
    ///
    /// The unit starts immediately when the node is idle and is queued
    /// otherwise.
    pub fn submit(&mut self, env: &mut impl Environment, payload: Bytes, dest: NodeId, power: f64) -> Result<FlowId> {
        let span = self.span.clone();
        let _guard = span.enter();

        if dest == self.id {
            return Err(Error::protocol(format!("{} cannot send to itself", self.id)));
        }
        if payload.len() > self.timing.max_payload() {
            return Err(Error::protocol(format!(
                "payload of {} bytes exceeds the {} byte limit",
                payload.len(),
                self.timing.max_payload()
            )));
        }

        let flow = FlowId {
            origin: self.id,
            seq: mask_seq(self.next_seq),
        };
        self.next_seq = self.next_seq.wrapping_add(1);
        self.outbound.push_back(Outbound {
            flow,
            payload,
            dest,
            power,
        });

        if self.state.on_path() {
            debug!(%flow, busy_with = ?self.state.flow, "queued");
            self.stats.count(MacCounter::Queued);
        }
        self.start_queued(env)?;
        Ok(flow)
    }

    /// Timer handler; timers of earlier phases are discarded
    pub fn on_timer(&mut self, env: &mut impl Environment, tag: u64) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        if !self.state.is_current(tag) {
            trace!(tag, current = self.state.seq(), "stale timer");
            self.stats.count(MacCounter::StaleTimer);
            return Ok(());
        }
        self.dispatch(env, MacEvent::TimerExpired)
    }

    /// Reception handler
    pub fn on_packet(&mut self, env: &mut impl Environment, packet: &Packet) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.stats.packet_received(packet.kind);
        let mode = self.state.phase.radio_mode();
        self.dispatch(env, MacEvent::PacketReceived { packet, mode })
    }

    /// Transmission-complete handler
    pub fn on_send_completed(&mut self, env: &mut impl Environment, packet: &Packet) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        if self.state.phase != Phase::SendingMsg {
            trace!(kind = ?packet.kind, phase = %self.state.phase, "late send completion");
            return Ok(());
        }
        self.dispatch(env, MacEvent::SendCompleted { packet })
    }

    /// Collision handler
    pub fn on_collision(&mut self, env: &mut impl Environment) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.dispatch(env, MacEvent::CollisionDetected)
    }

    /// Carrier-sense notification from the physical layer
    pub fn on_carrier_sense(&mut self, busy: bool) {
        if busy && matches!(self.state.phase, Phase::CsLong | Phase::CsShort) {
            self.state.channel_busy = true;
        }
    }

    fn dispatch(&mut self, env: &mut impl Environment, event: MacEvent<'_>) -> Result<()> {
        let mut cx = MachineContext {
            me: self.id,
            now: env.now(),
            timing: &self.timing,
            neighbors: self.selector.query(),
            rng: &mut self.rng,
        };
        let step = machine::step(&mut self.state, event, &mut cx).map_err(|e| {
            error!(error = %e, phase = %self.state.phase, "state machine failed");
            e
        })?;

        for note in step.notes {
            self.record(env, note);
        }
        if let Some(transition) = step.transition {
            self.enter(env, transition)?;
        }
        self.start_queued(env)
    }

    fn enter(&mut self, env: &mut impl Environment, transition: Transition) -> Result<()> {
        let duration = checked_duration(&transition.phase.to_string(), transition.duration).map_err(|e| {
            error!(error = %e, "refusing to schedule");
            e
        })?;
        let tag = self.state.enter(transition.phase, duration);
        env.set_radio(transition.radio_mode());
        if let Some(kind) = transition.send {
            self.transmit(env, kind)?;
        }
        env.schedule_timer(duration, tag);
        Ok(())
    }

    fn transmit(&mut self, env: &mut impl Environment, kind: PacketKind) -> Result<()> {
        let packet = self.build(kind, env.now())?;
        let airtime = self.timing.airtime(packet.bits());
        match env.transmit(packet, airtime) {
            Ok(()) => {
                self.stats.packet_sent(kind);
                Ok(())
            }
            Err(Error::RadioBusy(reason)) => {
                // The SENDING_MSG timer expires without completion and retries.
                warn!(?kind, %reason, "radio refused transmission");
                self.stats.count(MacCounter::RadioBusy);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Assembles the packet the state machine asked for
    fn build(&mut self, kind: PacketKind, now: f64) -> Result<Packet> {
        let flow = self
            .state
            .flow
            .ok_or_else(|| Error::invalid_state(format!("{} sends {:?} outside a flow", self.id, kind)))?;
        let dest = self
            .state
            .final_dest
            .ok_or_else(|| Error::invalid_state(format!("{} has no destination for {}", self.id, flow)))?;

        match kind {
            PacketKind::Rts => self.next_rts(flow, dest, now),
            PacketKind::Data => {
                let next = self
                    .state
                    .next_hop
                    .ok_or_else(|| Error::invalid_state(format!("{} forwards {} without a next hop", self.id, flow)))?;
                let mut data = self
                    .state
                    .data
                    .clone()
                    .ok_or_else(|| Error::invalid_state(format!("{} forwards {} without data", self.id, flow)))?;
                data.sender = self.id;
                data.receiver = Address::Unicast(next);
                debug!(%flow, %next, "handing off data");
                Ok(data)
            }
            PacketKind::Cts | PacketKind::CtsData | PacketKind::Ack => {
                let prev = self
                    .state
                    .prev_hop()
                    .ok_or_else(|| Error::invalid_state(format!("{} answers {} without a predecessor", self.id, flow)))?;
                Ok(Packet::new(kind, self.id, Address::Unicast(prev), flow, dest))
            }
            other => Err(Error::invalid_state(format!("{:?} is never sent by the MAC", other))),
        }
    }

    /// Next preamble of the current burst, with a refreshed FCS
    fn next_rts(&mut self, flow: FlowId, dest: NodeId, now: f64) -> Result<Packet> {
        let delay = if self.state.is_source {
            0.0
        } else {
            let at = self
                .state
                .cts_data_time
                .ok_or_else(|| Error::invalid_state(format!("{} relays {} without a CTS-DATA time", self.id, flow)))?;
            // Measured from the end of the preamble, when candidates receive it
            until(now + self.timing.rts, at)
        };

        let hops = self.selector.estimated_hops(dest);
        let size = self.timing.fcs_size(hops);
        let fcs = self.selector.fcs_nodes(dest, size);
        self.scratch.fcs_size = size;
        self.state.fcs_size = size;

        if self.state.rts.is_none() {
            debug!(%flow, %dest, fcs_size = size, candidates = fcs.len(), "starting RTS burst");
            let mut rts = Packet::new(PacketKind::Rts, self.id, Address::Broadcast, flow, dest);
            rts.set_seq(self.timing.max_preambles as u32);
            rts.prev_hops = self.state.prev_hops;
            self.state.rts = Some(rts);
        }
        let rts = self
            .state
            .rts
            .as_mut()
            .ok_or_else(|| Error::invalid_state("RTS burst vanished"))?;
        rts.fcs = fcs;
        rts.cts_data_delay = delay;
        rts.decrement_seq();
        let packet = rts.clone();

        self.state.advertised_cts_data_time = Some(now + self.timing.rts + delay + self.timing.handoff);
        Ok(packet)
    }

    fn record(&mut self, env: &mut impl Environment, note: Note) {
        match note {
            Note::Delivered { flow, payload } => {
                debug!(%flow, bytes = payload.len(), "delivered");
                self.stats.flow_delivered(flow);
                env.deliver(flow, payload);
            }
            Note::Confirmed { flow } => {
                debug!(%flow, "custody confirmed");
                self.stats.flow_forwarded(flow);
            }
            Note::Abandoned { flow, reason, had_custody } => {
                warn!(?flow, ?reason, had_custody, "flow abandoned");
                self.stats.flow_abandoned(flow, reason, had_custody);
            }
            Note::Foreign(kind) => {
                warn!(?kind, "ignoring packet type the MAC does not handle");
                self.stats.count(MacCounter::ForeignPacket);
            }
            Note::Collision => self.stats.count(MacCounter::Collision),
            Note::Shortcut { .. } => self.stats.count(MacCounter::Shortcut),
            Note::StoodDown { .. } => self.stats.count(MacCounter::StandDown),
            Note::Suppressed { .. } => self.stats.count(MacCounter::Suppression),
            Note::Yielded { .. } => self.stats.count(MacCounter::Yield),
            Note::Declined { .. } => self.stats.count(MacCounter::Decline),
            Note::InterFlowBackoff { .. } => self.stats.count(MacCounter::InterFlowBackoff),
            Note::NextHop { .. } | Note::CustodyTaken { .. } => {}
        }
    }

    /// Starts the next queued unit once the node is fired
    fn start_queued(&mut self, env: &mut impl Environment) -> Result<()> {
        while !self.state.on_path() {
            let Some(unit) = self.outbound.pop_front() else {
                return Ok(());
            };
            if env.remaining() < self.timing.handoff {
                debug!(flow = %unit.flow, remaining = env.remaining(), "run ends before the unit could move");
                self.stats.count(MacCounter::Expired);
                continue;
            }

            self.state.clear_path();
            self.state.flow = Some(unit.flow);
            self.state.final_dest = Some(unit.dest);
            self.state.is_source = true;
            self.state.data = Some(Packet::data(self.id, unit.flow, unit.dest, unit.payload));
            self.state.pending = Some(PacketKind::Rts);
            self.state.channel_busy = false;
            self.scratch.signal_strength = unit.power;
            self.stats.flow_started(unit.flow);
            debug!(flow = %unit.flow, dest = %unit.dest, "flow started");

            return self.enter(
                env,
                Transition {
                    phase: Phase::CsLong,
                    duration: self.timing.cs_long,
                    send: None,
                },
            );
        }
        Ok(())
    }
}
