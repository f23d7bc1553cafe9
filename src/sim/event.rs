//! Event types and priority queue for the discrete event harness

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bytes::Bytes;

use crate::core::{NodeId, SimTime};

/// Events in the discrete event simulation
#[derive(Debug, Clone)]
pub enum Event {
    /// Fire an engine timer
    Timer { node: NodeId, tag: u64 },
    /// A transmission leaves the air
    TxEnd { tx: u64 },
    /// The upper layer hands a unit to a node
    Submit {
        node: NodeId,
        dest: NodeId,
        payload: Bytes,
        /// Produced by the traffic generator, which schedules the next one
        generated: bool,
    },
}

/// A scheduled event; same-time events keep insertion order
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: SimTime,
    pub seq: u64,
    pub event: Event,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap
        match other.time.total_cmp(&self.time) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Min-heap of events ordered by (time, insertion sequence)
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `event` at absolute time `time`
    pub fn push(&mut self, time: SimTime, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(ScheduledEvent { time, seq, event });
    }

    pub fn pop(&mut self) -> Option<ScheduledEvent> {
        self.heap.pop()
    }

    /// Time of the earliest event
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|e| e.time)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(node: u32) -> Event {
        Event::Timer { node: NodeId(node), tag: 0 }
    }

    #[test]
    fn test_earliest_first() {
        let mut queue = EventQueue::new();
        queue.push(2.0, timer(1));
        queue.push(0.5, timer(2));
        queue.push(1.0, timer(3));

        let times: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|e| e.time).collect();
        assert_eq!(times, vec![0.5, 1.0, 2.0]);
    }

    #[test]
    fn test_same_time_keeps_insertion_order() {
        let mut queue = EventQueue::new();
        queue.push(1.0, timer(7));
        queue.push(1.0, timer(3));
        assert_eq!(queue.peek_time(), Some(1.0));

        let first = queue.pop().unwrap();
        assert!(matches!(first.event, Event::Timer { node: NodeId(7), .. }));
        assert_eq!(queue.len(), 1);
    }
}
