use std::collections::BTreeMap;

use nalgebra::Point2;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::core::{Error, NodeId, Result};
use super::NeighborQuery;

/// Nodes placed in a 2-D plane with a common unit-disk radio range
#[derive(Debug, Clone)]
pub struct Deployment {
    positions: BTreeMap<NodeId, Point2<f64>>,
    range: f64,
}

impl Deployment {
    /// Creates an empty deployment
    pub fn new(range: f64) -> Result<Self> {
        if !(range.is_finite() && range > 0.0) {
            return Err(Error::config(format!("radio range must be positive, got {}", range)));
        }
        Ok(Deployment {
            positions: BTreeMap::new(),
            range,
        })
    }

    /// Places (or moves) a node
    pub fn with_node(mut self, id: NodeId, x: f64, y: f64) -> Self {
        self.place(id, x, y);
        self
    }

    /// Places (or moves) a node
    pub fn place(&mut self, id: NodeId, x: f64, y: f64) {
        self.positions.insert(id, Point2::new(x, y));
    }

    /// Nodes 0..n on a horizontal line, `spacing` apart
    pub fn line(n: u32, spacing: f64, range: f64) -> Result<Self> {
        let mut deployment = Self::new(range)?;
        for i in 0..n {
            deployment.place(NodeId(i), i as f64 * spacing, 0.0);
        }
        Ok(deployment)
    }

    /// Nodes on a `cols` x `rows` grid, numbered row by row
    pub fn grid(cols: u32, rows: u32, spacing: f64, range: f64) -> Result<Self> {
        let mut deployment = Self::new(range)?;
        for row in 0..rows {
            for col in 0..cols {
                let id = NodeId(row * cols + col);
                deployment.place(id, col as f64 * spacing, row as f64 * spacing);
            }
        }
        Ok(deployment)
    }

    /// Nodes placed uniformly at random in a `width` x `height` field
    pub fn random(n: u32, width: f64, height: f64, range: f64, seed: u64) -> Result<Self> {
        let mut deployment = Self::new(range)?;
        let mut rng = StdRng::seed_from_u64(seed);
        for i in 0..n {
            let x = rng.gen_range(0.0..width);
            let y = rng.gen_range(0.0..height);
            deployment.place(NodeId(i), x, y);
        }
        Ok(deployment)
    }

    /// All node ids in ascending order
    pub fn nodes(&self) -> Vec<NodeId> {
        self.positions.keys().copied().collect()
    }

    /// Number of placed nodes
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether no node is placed
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl NeighborQuery for Deployment {
    fn position(&self, node: NodeId) -> Option<Point2<f64>> {
        self.positions.get(&node).copied()
    }

    fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        let Some(origin) = self.positions.get(&node) else {
            return Vec::new();
        };
        self.positions
            .iter()
            .filter(|(id, p)| **id != node && nalgebra::distance(origin, p) <= self.range)
            .map(|(id, _)| *id)
            .collect()
    }

    fn radio_range(&self) -> f64 {
        self.range
    }
}
