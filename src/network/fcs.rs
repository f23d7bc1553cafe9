use std::cmp::Ordering;
use std::rc::Rc;

use crate::core::NodeId;
use super::NeighborQuery;

/// A neighbor making progress toward a destination
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Neighbor id
    pub node: NodeId,
    /// Remaining distance from the neighbor to the destination
    pub distance: f64,
}

/// Geometric forward candidate selection for one node
#[derive(Clone)]
pub struct FcsSelector {
    node: NodeId,
    neighbors: Rc<dyn NeighborQuery>,
}

impl FcsSelector {
    /// Creates a selector for `node` over the injected neighbor capability
    pub fn new(node: NodeId, neighbors: Rc<dyn NeighborQuery>) -> Self {
        FcsSelector { node, neighbors }
    }

    /// The neighbor capability this selector reads
    pub fn query(&self) -> &dyn NeighborQuery {
        self.neighbors.as_ref()
    }

    /// Neighbors strictly closer to `destination` than this node, nearest first
    pub fn advanced_nodes(&self, destination: NodeId) -> Vec<Candidate> {
        let Some(own) = self.neighbors.distance(self.node, destination) else {
            return Vec::new();
        };

        let mut candidates: Vec<Candidate> = self
            .neighbors
            .neighbors(self.node)
            .into_iter()
            .filter_map(|node| {
                let distance = self.neighbors.distance(node, destination)?;
                (distance < own).then_some(Candidate { node, distance })
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then(a.node.cmp(&b.node))
        });
        candidates
    }

    /// Forward candidate set of at most `size` nodes
    ///
    /// A destination in range is the only candidate.
    pub fn fcs_nodes(&self, destination: NodeId, size: usize) -> Vec<NodeId> {
        if self.neighbors.in_range(self.node, destination) {
            return vec![destination];
        }
        self.advanced_nodes(destination)
            .into_iter()
            .take(size)
            .map(|c| c.node)
            .collect()
    }

    /// Estimated hops from this node to `destination`
    pub fn estimated_hops(&self, destination: NodeId) -> f64 {
        match self.neighbors.distance(self.node, destination) {
            Some(distance) => (distance / self.neighbors.radio_range()).ceil().max(1.0),
            None => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Deployment;

    fn field() -> Rc<dyn NeighborQuery> {
        // 0 is the sender, 9 the far destination
        Rc::new(
            Deployment::new(12.0)
                .unwrap()
                .with_node(NodeId(0), 0.0, 0.0)
                .with_node(NodeId(1), 10.0, 0.0)
                .with_node(NodeId(2), 6.0, 6.0)
                .with_node(NodeId(3), -8.0, 0.0)
                .with_node(NodeId(4), 8.0, -3.0)
                .with_node(NodeId(9), 40.0, 0.0),
        )
    }

    #[test]
    fn test_advanced_nodes_sorted() {
        let selector = FcsSelector::new(NodeId(0), field());
        let advanced = selector.advanced_nodes(NodeId(9));
        let ids: Vec<_> = advanced.iter().map(|c| c.node).collect();
        assert_eq!(ids, vec![NodeId(1), NodeId(4), NodeId(2)]);
        assert!(advanced.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(advanced.iter().all(|c| c.distance < 40.0));
    }

    #[test]
    fn test_fcs_is_bounded() {
        let selector = FcsSelector::new(NodeId(0), field());
        assert_eq!(selector.fcs_nodes(NodeId(9), 2), vec![NodeId(1), NodeId(4)]);
        assert!(selector.fcs_nodes(NodeId(9), 0).is_empty());
    }

    #[test]
    fn test_destination_in_range_is_singleton() {
        let selector = FcsSelector::new(NodeId(0), field());
        assert_eq!(selector.fcs_nodes(NodeId(1), 8), vec![NodeId(1)]);
    }

    #[test]
    fn test_no_progress_possible() {
        let selector = FcsSelector::new(NodeId(3), field());
        // 3 only hears 0, which is closer to 9
        assert_eq!(selector.fcs_nodes(NodeId(9), 8), vec![NodeId(0)]);
        let lonely = FcsSelector::new(NodeId(9), field());
        assert!(lonely.fcs_nodes(NodeId(3), 8).is_empty());
    }

    #[test]
    fn test_estimated_hops() {
        let selector = FcsSelector::new(NodeId(0), field());
        assert_eq!(selector.estimated_hops(NodeId(9)), 4.0);
        assert_eq!(selector.estimated_hops(NodeId(1)), 1.0);
    }
}
