//! Reference discrete-event harness
//!
//! Stands in for the scheduler and the physical layer so that engines can be
//! run against each other end to end: a min-heap event queue, a shared
//! unit-disk medium with per-receiver collisions and carrier sense, and a
//! Poisson traffic generator. Engine commands are recorded during a handler
//! and applied once it returns.

pub mod event;
pub mod medium;
pub mod traffic;

pub use self::event::{Event, EventQueue, ScheduledEvent};
pub use self::medium::{Medium, Outcome, Transmission};
pub use self::traffic::TrafficGenerator;

use std::collections::BTreeMap;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Encoder;
use tracing::{debug, error, info, warn};

use crate::core::{Error, FlowId, MacConfig, NodeId, Result, SimTime};
use crate::engine::{MacEngine, MacStats, Radio, Scheduler, UpperLayer};
use crate::network::{Deployment, NeighborQuery};
use crate::protocol::{Packet, PacketCodec, RadioMode, Timing};

/// A payload that reached its final destination
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub time: SimTime,
    pub node: NodeId,
    pub flow: FlowId,
    pub payload: Bytes,
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub end_time: SimTime,
    pub events: u64,
    /// Totals over every node
    pub stats: MacStats,
    pub per_node: BTreeMap<NodeId, MacStats>,
    pub deliveries: Vec<Delivery>,
}

impl SimulationResult {
    /// Whether `flow` was delivered anywhere
    pub fn delivered(&self, flow: FlowId) -> bool {
        self.deliveries.iter().any(|d| d.flow == flow)
    }
}

enum Command {
    Timer(f64, u64),
    Radio(RadioMode),
    Transmit(Packet, f64),
    Deliver(FlowId, Bytes),
}

/// Environment handed to one engine handler call
struct NodeIo<'a> {
    node: NodeId,
    now: SimTime,
    end: SimTime,
    medium: &'a Medium,
    commands: Vec<Command>,
}

impl Scheduler for NodeIo<'_> {
    fn now(&self) -> SimTime {
        self.now
    }

    fn remaining(&self) -> f64 {
        (self.end - self.now).max(0.0)
    }

    fn schedule_timer(&mut self, delay: f64, tag: u64) {
        self.commands.push(Command::Timer(delay, tag));
    }
}

impl Radio for NodeIo<'_> {
    fn set_radio(&mut self, mode: RadioMode) {
        self.commands.push(Command::Radio(mode));
    }

    fn transmit(&mut self, packet: Packet, airtime: f64) -> Result<()> {
        let queued = self.commands.iter().any(|c| matches!(c, Command::Transmit(..)));
        if queued || self.medium.is_sending(self.node) {
            return Err(Error::radio_busy(format!("{} is already transmitting", self.node)));
        }
        self.commands.push(Command::Transmit(packet, airtime));
        Ok(())
    }
}

impl UpperLayer for NodeIo<'_> {
    fn deliver(&mut self, flow: FlowId, payload: Bytes) {
        self.commands.push(Command::Deliver(flow, payload));
    }
}

/// Discrete event simulator running one engine per deployed node
pub struct Simulator {
    timing: Rc<Timing>,
    deployment: Rc<Deployment>,
    engines: BTreeMap<NodeId, MacEngine>,
    medium: Medium,
    queue: EventQueue,
    now: SimTime,
    end: SimTime,
    events: u64,
    traffic: Option<TrafficGenerator>,
    deliveries: Vec<Delivery>,
    codec: PacketCodec,
    capture: Option<BytesMut>,
}

impl Simulator {
    /// Creates engines for every deployed node and boots them at random points of the cycle
    pub fn new(deployment: Deployment, config: MacConfig) -> Result<Self> {
        Self::with_wake_offsets(deployment, config, &BTreeMap::new())
    }

    /// Like [`Simulator::new`], but the listed nodes first wake at the given times
    pub fn with_wake_offsets(deployment: Deployment, config: MacConfig, offsets: &BTreeMap<NodeId, f64>) -> Result<Self> {
        let timing = Rc::new(Timing::new(config)?);
        let deployment = Rc::new(deployment);
        let neighbors: Rc<dyn NeighborQuery> = deployment.clone();

        let engines = deployment
            .nodes()
            .into_iter()
            .map(|id| (id, MacEngine::with_default_stats(id, timing.clone(), neighbors.clone())))
            .collect();

        let mut sim = Simulator {
            timing,
            deployment,
            engines,
            medium: Medium::new(neighbors),
            queue: EventQueue::new(),
            now: 0.0,
            end: f64::INFINITY,
            events: 0,
            traffic: None,
            deliveries: Vec::new(),
            codec: PacketCodec::new(),
            capture: None,
        };

        for id in sim.deployment.nodes() {
            match offsets.get(&id) {
                Some(&offset) => sim.handle(id, |engine, io| engine.start_at(io, offset))?,
                None => sim.handle(id, |engine, io| engine.start(io))?,
            }
        }
        info!(nodes = sim.engines.len(), "simulator ready");
        Ok(sim)
    }

    /// Drives sources with generated traffic from time zero
    pub fn with_traffic(mut self, mut traffic: TrafficGenerator) -> Self {
        for (source, dest) in traffic.flows().to_vec() {
            let at = self.now + traffic.next_gap();
            let payload = traffic.payload(source);
            self.queue.push(
                at,
                Event::Submit {
                    node: source,
                    dest,
                    payload,
                    generated: true,
                },
            );
        }
        self.traffic = Some(traffic);
        self
    }

    /// Records every transmitted frame in the length-prefixed wire format
    pub fn enable_capture(&mut self) {
        self.capture.get_or_insert_with(BytesMut::new);
    }

    /// Frames captured so far
    pub fn capture(&self) -> Option<&BytesMut> {
        self.capture.as_ref()
    }

    /// Hands a unit to `node` at `time`
    pub fn submit_at(&mut self, time: SimTime, node: NodeId, dest: NodeId, payload: Bytes) {
        self.queue.push(
            time,
            Event::Submit {
                node,
                dest,
                payload,
                generated: false,
            },
        );
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn engine(&self, id: NodeId) -> Option<&MacEngine> {
        self.engines.get(&id)
    }

    /// Runs every event up to `end`; the first fatal engine error halts the run
    ///
    /// Rejected submissions and other recoverable errors are logged and skipped.
    pub fn run_until(&mut self, end: SimTime) -> Result<SimulationResult> {
        self.end = end;
        while let Some(time) = self.queue.peek_time() {
            if time > end {
                break;
            }
            let Some(scheduled) = self.queue.pop() else {
                break;
            };
            self.now = self.now.max(scheduled.time);
            self.events += 1;
            match self.process(scheduled.event) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!(error = %e, time = self.now, "halting run");
                    return Err(e);
                }
                Err(e) => warn!(error = %e, time = self.now, "event skipped"),
            }
        }
        self.now = self.now.max(end);
        Ok(self.result())
    }

    /// Statistics and deliveries so far
    pub fn result(&self) -> SimulationResult {
        let per_node: BTreeMap<_, _> = self.engines.iter().map(|(id, e)| (*id, e.stats())).collect();
        let mut stats = MacStats::default();
        for node_stats in per_node.values() {
            stats += node_stats;
        }
        SimulationResult {
            end_time: self.now,
            events: self.events,
            stats,
            per_node,
            deliveries: self.deliveries.clone(),
        }
    }

    fn process(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Timer { node, tag } => self.handle(node, |engine, io| engine.on_timer(io, tag)),
            Event::TxEnd { tx } => self.finish_transmission(tx),
            Event::Submit { node, dest, payload, generated } => {
                if generated {
                    self.schedule_next_arrival(node, dest);
                }
                self.handle(node, |engine, io| engine.submit(io, payload, dest, 0.0).map(|_| ()))
            }
        }
    }

    fn schedule_next_arrival(&mut self, node: NodeId, dest: NodeId) {
        if let Some(traffic) = self.traffic.as_mut() {
            let at = self.now + traffic.next_gap();
            let payload = traffic.payload(node);
            self.queue.push(
                at,
                Event::Submit {
                    node,
                    dest,
                    payload,
                    generated: true,
                },
            );
        }
    }

    /// Send completion first, then receptions, then collisions of the same instant
    fn finish_transmission(&mut self, tx: u64) -> Result<()> {
        let Some(outcome) = self.medium.end(tx) else {
            return Ok(());
        };
        let packet = outcome.transmission.packet;
        self.handle(outcome.transmission.sender, |engine, io| engine.on_send_completed(io, &packet))?;
        for node in outcome.receivers {
            // The radio may have switched off while handling an earlier reception.
            if self.medium.mode(node) == RadioMode::Listening {
                self.handle(node, |engine, io| engine.on_packet(io, &packet))?;
            }
        }
        for node in outcome.collided {
            if self.medium.mode(node) == RadioMode::Listening {
                self.handle(node, |engine, io| engine.on_collision(io))?;
            }
        }
        Ok(())
    }

    /// Runs one engine handler and applies what it asked for
    fn handle<F>(&mut self, node: NodeId, f: F) -> Result<()>
    where
        F: FnOnce(&mut MacEngine, &mut NodeIo<'_>) -> Result<()>,
    {
        let engine = self
            .engines
            .get_mut(&node)
            .ok_or_else(|| Error::config(format!("no engine for {}", node)))?;
        let mut io = NodeIo {
            node,
            now: self.now,
            end: self.end,
            medium: &self.medium,
            commands: Vec::new(),
        };
        f(engine, &mut io)?;
        let commands = io.commands;
        self.apply(node, commands)
    }

    fn apply(&mut self, node: NodeId, commands: Vec<Command>) -> Result<()> {
        for command in commands {
            match command {
                Command::Timer(delay, tag) => self.queue.push(self.now + delay, Event::Timer { node, tag }),
                Command::Radio(mode) => {
                    self.medium.set_mode(node, mode);
                    if mode == RadioMode::Listening && self.medium.is_busy_at(node) {
                        self.sense(node);
                    }
                }
                Command::Transmit(packet, airtime) => {
                    if let Some(capture) = self.capture.as_mut() {
                        self.codec.encode(packet.clone(), capture)?;
                    }
                    let (tx, sensed) = self.medium.begin(node, packet, self.now, airtime)?;
                    self.queue.push(self.now + airtime, Event::TxEnd { tx });
                    for listener in sensed {
                        self.sense(listener);
                    }
                }
                Command::Deliver(flow, payload) => {
                    debug!(%node, %flow, time = self.now, "payload delivered");
                    self.deliveries.push(Delivery {
                        time: self.now,
                        node,
                        flow,
                        payload,
                    });
                }
            }
        }
        Ok(())
    }

    fn sense(&mut self, node: NodeId) {
        if let Some(engine) = self.engines.get_mut(&node) {
            engine.on_carrier_sense(true);
        }
    }
}
