//! Time-expanded network: per-link availability at the current simulated
//! time.
//!
//! The TEN is the synthesis engine's view of the topology at one instant.
//! Each link remembers the time until which it is busy; advancing the clock
//! recomputes a boolean availability flag per link, and committing a
//! transmission marks the link busy for one chunk delay.

use std::sync::Arc;

use crate::topology::Topology;
use crate::types::{NpuId, Time};

/// Per-link busy/free state of the topology at the current time.
///
/// Invariant: after `update_current_time(t)`, for every connected pair
/// `available[s][d] == (busy_until[s][d] <= t)`.
#[derive(Clone, Debug)]
pub struct TimeExpandedNetwork {
    topology: Arc<Topology>,
    current_time: Time,

    busy_until: Vec<Vec<Time>>,
    available: Vec<Vec<bool>>,
}

impl TimeExpandedNetwork {
    /// Creates a TEN over `topology` with every link free at time zero.
    ///
    /// Links start unavailable until the first `update_current_time` call
    /// refreshes them.
    pub fn new(topology: Arc<Topology>) -> Self {
        let npus_count = topology.npus_count();

        Self {
            topology,
            current_time: 0,
            busy_until: vec![vec![0; npus_count]; npus_count],
            available: vec![vec![false; npus_count]; npus_count],
        }
    }

    /// Advances the clock to `time` and refreshes every link's
    /// availability.
    pub fn update_current_time(&mut self, time: Time) {
        self.current_time = time;

        let npus_count = self.topology.npus_count();
        for src in 0..npus_count {
            for dest in 0..npus_count {
                if !self.topology.is_connected(src, dest) {
                    continue;
                }
                self.available[src][dest] = self.busy_until[src][dest] <= time;
            }
        }
    }

    /// Returns the NPUs that could reach `dest` through one currently-free
    /// hop.
    ///
    /// This is a one-hop preimage only; multi-hop reachability emerges
    /// across event ticks rather than within one matching sweep.
    pub fn backtrack(&self, dest: NpuId) -> Vec<NpuId> {
        (0..self.topology.npus_count())
            .filter(|&src| self.available[src][dest])
            .collect()
    }

    /// Marks the link `src -> dest` busy for one chunk delay starting now.
    pub fn mark_link_occupied(&mut self, src: NpuId, dest: NpuId) {
        assert!(
            self.available[src][dest],
            "link {src} -> {dest} is not available at {}",
            self.current_time
        );

        self.busy_until[src][dest] = self.current_time + self.topology.link_delay(src, dest);
        self.available[src][dest] = false;
    }

    /// The clock value of the latest `update_current_time` call.
    pub fn current_time(&self) -> Time {
        self.current_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Arc<Topology> {
        let mut topology = Topology::new(3).unwrap();
        topology.connect(0, 2, 100.0, 1.0, false).unwrap();
        topology.connect(1, 2, 100.0, 1.0, false).unwrap();
        topology.connect(2, 0, 100.0, 1.0, false).unwrap();
        topology.set_chunk_size(1 << 20).unwrap();
        Arc::new(topology)
    }

    #[test]
    fn test_links_become_available_after_update() {
        let mut ten = TimeExpandedNetwork::new(triangle());

        // nothing available before the first clock update
        assert!(ten.backtrack(2).is_empty());

        ten.update_current_time(1);
        assert_eq!(ten.backtrack(2), vec![0, 1]);
        assert_eq!(ten.backtrack(0), vec![2]);
        assert!(ten.backtrack(1).is_empty());
    }

    #[test]
    fn test_occupied_link_blocks_until_delay_elapses() {
        let topology = triangle();
        let delay = topology.link_delay(0, 2);
        let mut ten = TimeExpandedNetwork::new(topology);

        ten.update_current_time(10);
        ten.mark_link_occupied(0, 2);

        // occupied link disappears from the preimage immediately
        assert_eq!(ten.backtrack(2), vec![1]);

        // still busy one tick before release
        ten.update_current_time(10 + delay - 1);
        assert_eq!(ten.backtrack(2), vec![1]);

        // free again exactly at busy_until
        ten.update_current_time(10 + delay);
        assert_eq!(ten.backtrack(2), vec![0, 1]);
    }

    #[test]
    #[should_panic(expected = "not available")]
    fn test_marking_busy_link_panics() {
        let mut ten = TimeExpandedNetwork::new(triangle());
        ten.update_current_time(1);
        ten.mark_link_occupied(0, 2);
        ten.mark_link_occupied(0, 2);
    }
}
