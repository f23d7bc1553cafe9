//! Deployment geometry and forwarder selection
//!
//! Nodes learn nothing about the topology by themselves: the deployment is an
//! injected, read-only capability answering "where is this node" and "who is
//! in range", and the FCS selector ranks neighbors by geometric progress.

mod deployment;
mod fcs;

pub use self::deployment::Deployment;
pub use self::fcs::{Candidate, FcsSelector};

use nalgebra::Point2;

use crate::core::NodeId;

/// Read-only neighbor queries against the deployment
pub trait NeighborQuery {
    /// Position of a node in the deployment plane
    fn position(&self, node: NodeId) -> Option<Point2<f64>>;

    /// Nodes within radio range of `node`, excluding itself
    fn neighbors(&self, node: NodeId) -> Vec<NodeId>;

    /// Radio range of every node
    fn radio_range(&self) -> f64;

    /// Whether `a` and `b` can hear each other
    fn in_range(&self, a: NodeId, b: NodeId) -> bool {
        match (self.position(a), self.position(b)) {
            (Some(pa), Some(pb)) => a != b && nalgebra::distance(&pa, &pb) <= self.radio_range(),
            _ => false,
        }
    }

    /// Euclidean distance between two nodes
    fn distance(&self, a: NodeId, b: NodeId) -> Option<f64> {
        Some(nalgebra::distance(&self.position(a)?, &self.position(b)?))
    }
}
