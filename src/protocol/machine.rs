//! Protocol state machine
//!
//! [`step`] maps the current [`ProtocolState`] and one [`MacEvent`] to the next
//! phase, its duration and an optional instruction to transmit. The state is
//! updated in place; nothing here touches the scheduler, the radio or the
//! upper layer. Side effects the engine must know about are reported as
//! [`Note`]s.
//!
//! Stale timers are filtered by the engine before they reach this module.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::core::{
    BackoffPolicy, Error, FlowId, NodeId, Result, SimTime, TURNAROUND,
};
use crate::network::NeighborQuery;
use crate::util::until;
use super::packet::{Packet, PacketKind};
use super::state::{Phase, ProtocolState, RadioMode};
use super::timing::Timing;

/// Rounding slack allowed when a deadline is reached exactly
const LATE_TOLERANCE: f64 = 1e-9;

/// One input to the state machine
#[derive(Debug, Clone, Copy)]
pub enum MacEvent<'a> {
    /// The current phase's timer fired
    TimerExpired,
    /// A packet arrived while the radio was in `mode`
    PacketReceived { packet: &'a Packet, mode: RadioMode },
    /// The radio finished transmitting `packet`
    SendCompleted { packet: &'a Packet },
    /// Overlapping transmissions were detected
    CollisionDetected,
}

/// Next phase, its duration and what to transmit on entering it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub phase: Phase,
    pub duration: f64,
    pub send: Option<PacketKind>,
}

impl Transition {
    /// Radio mode implied by the next phase
    pub fn radio_mode(&self) -> RadioMode {
        self.phase.radio_mode()
    }
}

/// Why a flow was given up
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AbandonReason {
    /// Every RTS burst went unanswered
    NoForwarder,
    /// Too many missed hand-offs or confirmations
    HandoffMissed,
}

/// Side effects of a step that the engine records or acts on
#[derive(Debug, Clone, PartialEq)]
pub enum Note {
    NextHop { flow: FlowId, next: NodeId },
    Shortcut { flow: FlowId, predecessor: NodeId },
    Declined { flow: FlowId },
    Yielded { flow: FlowId },
    StoodDown { flow: FlowId },
    Suppressed { flow: FlowId },
    InterFlowBackoff { flow: FlowId },
    Collision,
    CustodyTaken { flow: FlowId },
    Confirmed { flow: FlowId },
    Delivered { flow: FlowId, payload: Bytes },
    Abandoned { flow: Option<FlowId>, reason: AbandonReason, had_custody: bool },
    Foreign(PacketKind),
}

/// Result of one state-machine step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
    /// `None` keeps the current phase and its pending timer
    pub transition: Option<Transition>,
    pub notes: Vec<Note>,
}

/// Everything a step may read besides the state
pub struct MachineContext<'a> {
    pub me: NodeId,
    pub now: SimTime,
    pub timing: &'a Timing,
    pub neighbors: &'a dyn NeighborQuery,
    pub rng: &'a mut StdRng,
}

/// Advances `state` by one event
pub fn step(state: &mut ProtocolState, event: MacEvent<'_>, ctx: &mut MachineContext<'_>) -> Result<Step> {
    let mut run = Run {
        st: state,
        cx: ctx,
        notes: Vec::new(),
    };
    let transition = match event {
        MacEvent::TimerExpired => run.timeout()?,
        MacEvent::PacketReceived { packet, .. } => run.received(packet)?,
        MacEvent::SendCompleted { packet } => run.send_completed(packet)?,
        MacEvent::CollisionDetected => run.collision(),
    };
    if let Some(t) = &transition {
        trace!(node = %run.cx.me, from = %run.st.phase, to = %t.phase, duration = t.duration, send = ?t.send, "transition");
    }
    Ok(Step {
        transition,
        notes: run.notes,
    })
}

struct Run<'s, 'c> {
    st: &'s mut ProtocolState,
    cx: &'s mut MachineContext<'c>,
    notes: Vec<Note>,
}

type Next = Option<Transition>;

impl<'s, 'c> Run<'s, 'c> {
    fn timing(&self) -> &'c Timing {
        self.cx.timing
    }

    fn now(&self) -> SimTime {
        self.cx.now
    }

    // --- transition builders ---

    fn sleep(&self, duration: f64) -> Next {
        Some(Transition {
            phase: Phase::Sleep,
            duration,
            send: None,
        })
    }

    /// Sleeps until `deadline`; a deadline already behind us is a scheduling bug
    fn sleep_until(&self, deadline: SimTime) -> Result<Next> {
        let duration = deadline - self.now();
        if duration < -LATE_TOLERANCE {
            error!(node = %self.cx.me, phase = %self.st.phase, deadline, "deadline already passed");
            return Err(Error::timing(format!(
                "{} would sleep {} s into the past in {}",
                self.cx.me, -duration, self.st.phase
            )));
        }
        Ok(self.sleep(duration.max(0.0)))
    }

    fn duty_cycle_sleep(&self) -> Next {
        self.sleep(self.timing().sleep)
    }

    fn listen(&mut self, phase: Phase, duration: f64) -> Next {
        if matches!(phase, Phase::CsLong | Phase::CsShort) {
            self.st.channel_busy = false;
        }
        Some(Transition {
            phase,
            duration,
            send: None,
        })
    }

    fn send(&mut self, kind: PacketKind) -> Next {
        self.st.pending = Some(kind);
        let airtime = match (kind, &self.st.data) {
            (PacketKind::Data, Some(data)) => self.timing().airtime(data.bits()),
            _ => self.timing().tx_time(kind),
        };
        Some(Transition {
            phase: Phase::SendingMsg,
            duration: airtime + 2.0 * TURNAROUND,
            send: Some(kind),
        })
    }

    /// Next RTS of a burst, held back while the predecessor takes the data unit
    fn send_rts(&mut self) -> Result<Next> {
        if let Some(handoff) = self.st.upstream_handoff {
            let start = handoff - self.timing().rts - TURNAROUND;
            let end = start + self.timing().upstream_hold();
            if (start..end).contains(&self.now()) {
                debug!(node = %self.cx.me, resume = end, "holding burst over the upstream hand-off");
                self.st.pending = Some(PacketKind::Rts);
                return self.sleep_until(end);
            }
        }
        Ok(self.send(PacketKind::Rts))
    }

    fn random_backoff(&mut self) -> f64 {
        let max = self.timing().config().max_backoff_slots;
        let slots = self.cx.rng.gen_range(1..=max);
        slots as f64 * self.timing().rts_round
    }

    fn data_window(&self) -> f64 {
        self.timing().data_time + self.timing().early_wake + 2.0 * TURNAROUND
    }

    /// Covers a repeated CTS-DATA at the window start and the ACK after a full DATA
    fn ack_window(&self) -> f64 {
        self.timing().handoff - self.timing().retry_slot
    }

    /// Wait before the hand-off is retried after `misses` misses
    fn retry_delay(&self, misses: u32) -> f64 {
        let config = self.timing().config();
        let slots = if misses % config.watchdog_every == 0 {
            config.watchdog_slots
        } else {
            1
        };
        slots as f64 * self.timing().retry_slot
    }

    // --- timer expiry ---

    fn timeout(&mut self) -> Result<Next> {
        match self.st.phase {
            Phase::Sleep => self.sleep_timeout(),
            Phase::CsLong => self.cs_long_timeout(),
            Phase::CsShort => Ok(self.cs_short_timeout()),
            Phase::SendingMsg => {
                // The radio never reported completion: try again later.
                let backoff = self.random_backoff();
                Ok(self.listen(Phase::CsLong, self.timing().cs_long + backoff))
            }
            Phase::WaitingCts => self.waiting_cts_timeout(),
            Phase::WaitingCtsData | Phase::WaitingData => self.retry(),
            Phase::WaitingAck => self.ack_timeout(),
        }
    }

    fn sleep_timeout(&mut self) -> Result<Next> {
        if self.st.waiting_for_ack {
            let window = self.ack_window();
            return Ok(self.listen(Phase::WaitingAck, window));
        }

        if self.st.collision {
            self.st.collision = false;
            if self.st.rts.is_some() {
                return Ok(self.send(PacketKind::Rts));
            }
        }

        if self.st.is_custodian() {
            let me = self.cx.me;
            if self.st.is_final(me) || self.st.ack_owed {
                return Ok(self.send(PacketKind::Ack));
            }
            if self.st.next_hop.is_some() {
                return self.await_handoff();
            }
            if self.st.is_source {
                self.st.pending = Some(PacketKind::Rts);
                let cs = self.timing().cs_long;
                return Ok(self.listen(Phase::CsLong, cs));
            }
            error!(node = %me, flow = ?self.st.flow, "custodian without next hop that is not the source");
            return Err(Error::invalid_state(format!(
                "{} holds data for {:?} without a next hop",
                me, self.st.flow
            )));
        }

        // Pending CTS-DATA or RTS restart: check the channel first.
        // Otherwise this is the ordinary duty-cycle listen.
        let cs = self.timing().cs_long;
        Ok(self.listen(Phase::CsLong, cs))
    }

    fn cs_long_timeout(&mut self) -> Result<Next> {
        if !self.st.on_path() {
            return Ok(self.duty_cycle_sleep());
        }
        match self.st.pending {
            Some(PacketKind::Rts) => return self.send_rts(),
            Some(kind) => return Ok(self.send(kind)),
            None => {}
        }
        if self.st.sent_terminal_cts {
            self.st.sent_terminal_cts = false;
            self.st.pending = Some(PacketKind::CtsData);
            let request_at = self.request_time()?;
            return self.sleep_until(request_at - self.timing().cs_long);
        }
        Ok(self.duty_cycle_sleep())
    }

    fn cs_short_timeout(&mut self) -> Next {
        let first_answer = self.st.pending == Some(PacketKind::Rts) && self.st.rts.is_none();
        if first_answer && self.st.channel_busy {
            if let Some(flow) = self.st.flow {
                debug!(node = %self.cx.me, %flow, "another candidate answered first");
                self.notes.push(Note::Yielded { flow });
            }
            self.st.clear_path();
            return self.duty_cycle_sleep();
        }
        match self.st.pending {
            Some(kind) => self.send(kind),
            None => self.duty_cycle_sleep(),
        }
    }

    fn waiting_cts_timeout(&mut self) -> Result<Next> {
        let remaining = self.st.rts.as_ref().map_or(0, |rts| rts.seq());
        if remaining > 0 {
            return self.send_rts();
        }

        self.st.rts_restarts += 1;
        self.st.rts = None;
        if self.st.rts_restarts < self.timing().config().max_rts_sequences {
            debug!(node = %self.cx.me, restarts = self.st.rts_restarts, "restarting RTS burst");
            self.st.pending = Some(PacketKind::Rts);
            let backoff = self.random_backoff();
            return Ok(self.sleep(backoff));
        }
        Ok(self.abandon(AbandonReason::NoForwarder))
    }

    /// Counts one missed hand-off; `false` once the flow is given up
    fn count_miss(&mut self) -> bool {
        self.st.missing_data += 1;
        trace!(node = %self.cx.me, missing = self.st.missing_data, "hand-off missed");
        self.st.missing_data <= self.timing().config().max_missing
    }

    /// Bounded retry of the hand-off, on both sides of the link
    fn retry(&mut self) -> Result<Next> {
        if !self.count_miss() {
            return Ok(self.abandon(AbandonReason::HandoffMissed));
        }
        let delay = self.retry_delay(self.st.missing_data);

        if self.st.phase == Phase::WaitingCtsData {
            let next = self.handoff_time()? + delay;
            self.st.next_hop_cts_data_time = Some(next);
            return self.sleep_until(next - self.timing().early_wake);
        }
        let next = self.request_time()? + delay;
        self.st.cts_data_time = Some(next);
        self.st.pending = Some(PacketKind::CtsData);
        self.sleep_until(next - self.timing().cs_long)
    }

    /// Confirmation window closed empty
    ///
    /// `next_hop_cts_data_time` holds the repeated request this custodian is
    /// waiting for. A window that closed before that request was due only
    /// covered the ACK.
    fn ack_timeout(&mut self) -> Result<Next> {
        let request = self.handoff_time()?;
        let early = self.timing().early_wake;
        if request - early > self.now() {
            return self.sleep_until(request - early);
        }
        if !self.count_miss() {
            return Ok(self.abandon(AbandonReason::HandoffMissed));
        }
        let next = request + self.retry_delay(self.st.missing_data + 1);
        self.st.next_hop_cts_data_time = Some(next);
        self.sleep_until(next - early)
    }

    fn abandon(&mut self, reason: AbandonReason) -> Next {
        debug!(node = %self.cx.me, flow = ?self.st.flow, ?reason, "abandoning flow");
        self.notes.push(Note::Abandoned {
            flow: self.st.flow,
            reason,
            had_custody: self.st.is_custodian(),
        });
        self.st.clear_path();
        self.duty_cycle_sleep()
    }

    fn request_time(&self) -> Result<SimTime> {
        self.st
            .cts_data_time
            .ok_or_else(|| Error::invalid_state(format!("{} has no CTS-DATA time", self.cx.me)))
    }

    fn handoff_time(&self) -> Result<SimTime> {
        self.st
            .next_hop_cts_data_time
            .ok_or_else(|| Error::invalid_state(format!("{} has no hand-off time", self.cx.me)))
    }

    /// Custodian waits for its next hop's CTS-DATA
    fn await_handoff(&mut self) -> Result<Next> {
        let at = self.handoff_time()?;
        let early = self.timing().early_wake;
        if at - early > self.now() {
            return self.sleep_until(at - early);
        }
        // Woken inside the guard band: listen at least one CTS-DATA long
        let tail = self.timing().cts_data + 2.0 * TURNAROUND;
        let window = until(self.now(), at + early + tail).max(tail);
        Ok(self.listen(Phase::WaitingCtsData, window))
    }

    /// Relay sleeps until it requests the data unit upstream
    ///
    /// A restarted burst can run past the agreed request time. The relay then
    /// follows the custodian's retry schedule, counting each request it
    /// could not make as a miss.
    fn await_request(&mut self) -> Result<Next> {
        let lead = self.timing().cs_long;
        let mut at = self.request_time()?;
        while at - lead < self.now() {
            if !self.count_miss() {
                return Ok(self.abandon(AbandonReason::HandoffMissed));
            }
            at += self.retry_delay(self.st.missing_data);
        }
        self.st.cts_data_time = Some(at);
        self.st.pending = Some(PacketKind::CtsData);
        self.sleep_until(at - lead)
    }

    // --- send completion ---

    fn send_completed(&mut self, packet: &Packet) -> Result<Next> {
        self.st.pending = None;
        match packet.kind {
            PacketKind::Rts => Ok(self.listen(Phase::WaitingCts, self.timing().cts_window)),
            PacketKind::Cts => {
                self.st.sent_terminal_cts = true;
                let cs = self.timing().cs_long;
                Ok(self.listen(Phase::CsLong, cs))
            }
            PacketKind::CtsData => {
                let window = self.data_window();
                Ok(self.listen(Phase::WaitingData, window))
            }
            PacketKind::Data => {
                if self.st.is_final(self.cx.me) {
                    self.st.clear_path();
                    return Ok(self.duty_cycle_sleep());
                }
                // Listen where either the ACK or a repeated request can arrive
                let handoff = self.handoff_time()?;
                self.st.waiting_for_ack = true;
                self.st.next_hop_cts_data_time = Some(handoff + self.retry_delay(self.st.missing_data + 1));
                self.sleep_until(handoff + self.timing().retry_slot - self.timing().early_wake)
            }
            PacketKind::Ack => {
                self.st.ack_owed = false;
                if self.st.is_final(self.cx.me) {
                    if let (Some(flow), Some(data)) = (self.st.flow, self.st.data.take()) {
                        let payload = data.payload.unwrap_or_default();
                        self.notes.push(Note::Delivered { flow, payload });
                    }
                    self.st.clear_path();
                    return Ok(self.duty_cycle_sleep());
                }
                self.await_handoff()
            }
            _ => Ok(None),
        }
    }

    // --- collisions ---

    fn collision(&mut self) -> Next {
        match self.st.phase {
            Phase::WaitingCts if self.st.rts.is_some() => {
                debug!(node = %self.cx.me, "answers collided, re-issuing RTS");
                self.notes.push(Note::Collision);
                self.st.collision = true;
                self.send(PacketKind::Rts)
            }
            Phase::CsLong | Phase::CsShort => {
                self.st.channel_busy = true;
                None
            }
            _ => None,
        }
    }

    // --- receptions ---

    fn received(&mut self, packet: &Packet) -> Result<Next> {
        if !packet.kind.is_handled() {
            self.notes.push(Note::Foreign(packet.kind));
            return Ok(None);
        }
        if packet.sender == self.cx.me {
            return Ok(None);
        }
        match self.st.phase {
            Phase::CsLong => self.received_listening(packet),
            Phase::CsShort => {
                let repeat = packet.kind == PacketKind::Rts
                    && self.st.is_flow(packet.flow)
                    && Some(packet.sender) == self.st.prev_hop();
                if !repeat {
                    self.st.channel_busy = true;
                }
                Ok(None)
            }
            Phase::WaitingCts => self.received_waiting_cts(packet),
            Phase::WaitingCtsData => Ok(self.received_cts_data(packet)),
            Phase::WaitingData => Ok(self.received_data(packet)),
            Phase::WaitingAck => Ok(self.received_confirmation(packet)),
            Phase::Sleep | Phase::SendingMsg => Ok(None),
        }
    }

    fn addressed_in_flow(&self, packet: &Packet) -> bool {
        packet.receiver.accepts(self.cx.me) && self.st.is_flow(packet.flow)
    }

    fn received_listening(&mut self, packet: &Packet) -> Result<Next> {
        if packet.kind != PacketKind::Rts {
            return Ok(None);
        }
        if self.st.sent_terminal_cts {
            if self.st.is_flow(packet.flow) && Some(packet.sender) == self.st.prev_hop() {
                // Our CTS was lost; answer the repeated RTS again.
                self.st.sent_terminal_cts = false;
                self.st.pending = Some(PacketKind::Cts);
                return Ok(self.listen(Phase::CsShort, TURNAROUND));
            }
            return Ok(None);
        }
        if self.st.on_path() {
            self.st.channel_busy = true;
            return Ok(None);
        }
        self.consider_rts(packet)
    }

    fn candidate_backoff(&mut self, fcs: &[NodeId]) -> f64 {
        let me = self.cx.me;
        let slots = match self.timing().config().backoff_policy {
            BackoffPolicy::Rank => fcs.iter().position(|n| *n == me).unwrap_or(0),
            BackoffPolicy::Random => {
                let width = fcs.len().max(1);
                self.cx.rng.gen_range(0..width)
            }
        };
        TURNAROUND + slots as f64 * self.timing().slot
    }

    fn consider_rts(&mut self, rts: &Packet) -> Result<Next> {
        let me = self.cx.me;
        let now = self.now();
        let timing = self.cx.timing;

        if !rts.fcs.contains(&me) {
            if timing.config().channel_reservation {
                return self.sleep_until(now + rts.cts_data_delay + timing.handoff);
            }
            return Ok(self.duty_cycle_sleep());
        }

        let backoff = self.candidate_backoff(&rts.fcs);

        if rts.final_dest == me {
            self.st.flow = Some(rts.flow);
            self.st.final_dest = Some(me);
            self.st.prev_hops = [Some(rts.sender), rts.prev_hops[0], rts.prev_hops[1]];
            self.st.cts_data_time = Some(now + rts.cts_data_delay + timing.handoff);
            self.st.pending = Some(PacketKind::Cts);
            return Ok(self.listen(Phase::CsShort, backoff));
        }

        let looped = rts.flow.origin == me || rts.prev_hops.contains(&Some(me));
        let two_back = rts.prev_hops[0];
        let three_back = rts.prev_hops[1];
        let neighbors = self.cx.neighbors;

        if looped || three_back.map_or(false, |h| neighbors.in_range(me, h)) {
            debug!(node = %me, flow = %rts.flow, "declining: path doubles back");
            self.notes.push(Note::Declined { flow: rts.flow });
            return Ok(self.duty_cycle_sleep());
        }

        let burst_end = now + backoff + timing.burst_time();
        let shortcut_at = now + rts.cts_data_delay;
        let shortcut = two_back
            .filter(|h| neighbors.in_range(me, *h))
            .filter(|_| burst_end + timing.early_wake <= shortcut_at);

        match shortcut {
            Some(predecessor) => {
                debug!(node = %me, flow = %rts.flow, skipped = %rts.sender, %predecessor, "taking two-hop shortcut");
                self.notes.push(Note::Shortcut {
                    flow: rts.flow,
                    predecessor,
                });
                self.st.prev_hops = [Some(predecessor), three_back, rts.prev_hops[2]];
                self.st.cts_data_time = Some(shortcut_at);
                self.st.upstream_handoff = None;
            }
            None => {
                // A relay's predecessor still has to fetch the unit; the burst pauses meanwhile.
                let upstream = (rts.sender != rts.flow.origin).then_some(shortcut_at);
                let pause = match upstream {
                    Some(at) if at < burst_end => timing.upstream_hold() + timing.cs_long,
                    _ => 0.0,
                };
                self.st.prev_hops = [Some(rts.sender), two_back, three_back];
                self.st.upstream_handoff = upstream;
                self.st.cts_data_time = Some(shortcut_at.max(burst_end + pause) + timing.handoff);
            }
        }

        self.st.flow = Some(rts.flow);
        self.st.final_dest = Some(rts.final_dest);
        self.st.is_source = false;
        self.st.rts = None;
        self.st.rts_restarts = 0;
        self.st.missing_data = 0;
        self.st.pending = Some(PacketKind::Rts);
        Ok(self.listen(Phase::CsShort, backoff))
    }

    fn received_waiting_cts(&mut self, packet: &Packet) -> Result<Next> {
        let me = self.cx.me;
        match packet.kind {
            PacketKind::Rts => {
                if !self.st.is_flow(packet.flow) {
                    self.notes.push(Note::InterFlowBackoff { flow: packet.flow });
                    self.st.pending = Some(PacketKind::Rts);
                    let backoff = self.random_backoff();
                    return Ok(self.sleep(backoff));
                }
                if packet.prev_hop() == Some(me) {
                    let at = self.now() + packet.cts_data_delay;
                    return self.adopt(packet.sender, at);
                }
                let flow = packet.flow;
                if self.st.prev_hop().is_some() && Some(packet.sender) == self.st.prev_hop() {
                    // Our predecessor repeats itself: our answer collided there.
                    debug!(node = %me, %flow, "predecessor repeated RTS, suppressing");
                    self.notes.push(Note::Suppressed { flow });
                    self.st.clear_path();
                    let backoff = self.random_backoff();
                    return Ok(self.sleep(backoff));
                }
                if !self.st.is_custodian()
                    && self.st.prev_hop().is_some()
                    && packet.prev_hop() == self.st.prev_hop()
                    && self.competitor_ahead(packet.sender, packet.final_dest)
                {
                    debug!(node = %me, %flow, competitor = %packet.sender, "duplicate path, standing down");
                    self.notes.push(Note::StoodDown { flow });
                    self.st.clear_path();
                    return Ok(self.duty_cycle_sleep());
                }
                Ok(None)
            }
            PacketKind::Cts if self.addressed_in_flow(packet) => {
                let at = self.st.advertised_cts_data_time.ok_or_else(|| {
                    Error::invalid_state(format!("{} got a CTS before advertising an RTS", me))
                })?;
                self.adopt(packet.sender, at)
            }
            _ => Ok(None),
        }
    }

    /// Whether `other` is strictly closer to `dest` than this node (ties: lower id)
    fn competitor_ahead(&self, other: NodeId, dest: NodeId) -> bool {
        let neighbors = self.cx.neighbors;
        match (neighbors.distance(other, dest), neighbors.distance(self.cx.me, dest)) {
            (Some(theirs), Some(ours)) if theirs != ours => theirs < ours,
            (Some(_), Some(_)) => other < self.cx.me,
            _ => true,
        }
    }

    fn adopt(&mut self, next: NodeId, handoff_at: SimTime) -> Result<Next> {
        if let Some(flow) = self.st.flow {
            debug!(node = %self.cx.me, %flow, %next, "next hop adopted");
            self.notes.push(Note::NextHop { flow, next });
        }
        self.st.next_hop = Some(next);
        self.st.next_hop_cts_data_time = Some(handoff_at);
        self.st.rts = None;
        self.st.collision = false;
        self.st.rts_restarts = 0;
        self.st.missing_data = 0;
        if self.st.is_custodian() {
            self.await_handoff()
        } else {
            self.await_request()
        }
    }

    fn received_cts_data(&mut self, packet: &Packet) -> Next {
        if packet.kind != PacketKind::CtsData || !self.addressed_in_flow(packet) || !self.st.is_custodian() {
            return None;
        }
        if self.st.next_hop != Some(packet.sender) {
            if let Some(flow) = self.st.flow {
                debug!(node = %self.cx.me, %flow, previous = ?self.st.next_hop, next = %packet.sender, "next hop changed at hand-off");
                self.notes.push(Note::NextHop { flow, next: packet.sender });
            }
        }
        self.st.next_hop = Some(packet.sender);
        self.send(PacketKind::Data)
    }

    fn received_data(&mut self, packet: &Packet) -> Next {
        if packet.kind != PacketKind::Data || !self.addressed_in_flow(packet) {
            return None;
        }
        self.st.data = Some(packet.clone());
        self.st.missing_data = 0;
        self.st.ack_owed = true;
        if self.st.is_final(self.cx.me) {
            self.st.flow_complete = true;
        }
        self.notes.push(Note::CustodyTaken { flow: packet.flow });
        self.sleep(self.timing().retry_slot)
    }

    fn received_confirmation(&mut self, packet: &Packet) -> Next {
        if packet.kind == PacketKind::CtsData
            && self.addressed_in_flow(packet)
            && Some(packet.sender) == self.st.next_hop
        {
            // The DATA was lost: the next hop asks again
            debug!(node = %self.cx.me, flow = ?self.st.flow, "repeated CTS-DATA, resending DATA");
            self.st.waiting_for_ack = false;
            self.st.missing_data += 1;
            return self.send(PacketKind::Data);
        }
        let confirmed = match packet.kind {
            PacketKind::Ack => self.addressed_in_flow(packet),
            PacketKind::Data => {
                self.st.is_flow(packet.flow) && Some(packet.sender) == self.st.next_hop
            }
            _ => false,
        };
        if !confirmed {
            return None;
        }
        self.notes.push(Note::Confirmed { flow: packet.flow });
        self.st.clear_path();
        self.duty_cycle_sleep()
    }
}
