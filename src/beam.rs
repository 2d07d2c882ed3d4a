//! Beam synthesis: K randomized instances in lockstep on a shared clock.
//!
//! Every beam owns its own time-expanded network, pre/postcondition, result,
//! and PRNG, but all beams share one event queue and one current time. The
//! deterministic inputs are identical across beams; only the random draws in
//! the matching sweep differ, which is what spreads the beams over different
//! schedules. The earliest-finishing schedule wins.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::collective::Collective;
use crate::engine::{check_problem, MatchState, SourceSelection, SynthesisError, SynthesisOutcome};
use crate::event_queue::EventQueue;
use crate::topology::Topology;
use crate::types::Time;

/// A beam-search wrapper around the matching engine.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use linkweave::beam::BeamEngine;
/// use linkweave::collective::Collective;
/// use linkweave::engine::SourceSelection;
/// use linkweave::topology::Topology;
///
/// let mut topology = Topology::new(2).unwrap();
/// topology.connect(0, 1, 100.0, 1.0, true).unwrap();
/// topology.set_chunk_size(1 << 20).unwrap();
///
/// let collective = Collective::all_gather(2, 1 << 20, 1);
/// let engine = BeamEngine::new(
///     Arc::new(topology),
///     &collective,
///     4,
///     SourceSelection::Random,
/// )
/// .unwrap();
///
/// let best = engine.synthesize().unwrap();
/// assert_eq!(best.collective_time(), 976_662_500);
/// ```
pub struct BeamEngine {
    topology: Arc<Topology>,
    selection: SourceSelection,
    event_queue: EventQueue,
    current_time: Time,
    distinct_link_delays: Vec<Time>,
    beams: Vec<MatchState>,
    max_ticks: Option<u64>,
}

impl BeamEngine {
    /// Creates a beam engine with `width` beams, each seeded from entropy.
    pub fn new(
        topology: Arc<Topology>,
        collective: &Collective,
        width: usize,
        selection: SourceSelection,
    ) -> Result<Self, SynthesisError> {
        Self::build(topology, collective, width, selection, |_| {
            StdRng::from_entropy()
        })
    }

    /// Creates a beam engine with per-beam seeds derived as `seed + i`.
    ///
    /// Beam 0 draws exactly like a single engine seeded with `seed`; each
    /// beam keeps its own PRNG so the lockstep randomness stays
    /// independent.
    pub fn with_seed(
        topology: Arc<Topology>,
        collective: &Collective,
        width: usize,
        selection: SourceSelection,
        seed: u64,
    ) -> Result<Self, SynthesisError> {
        Self::build(topology, collective, width, selection, |beam| {
            StdRng::seed_from_u64(seed.wrapping_add(beam as u64))
        })
    }

    fn build(
        topology: Arc<Topology>,
        collective: &Collective,
        width: usize,
        selection: SourceSelection,
        mut seed_beam: impl FnMut(usize) -> StdRng,
    ) -> Result<Self, SynthesisError> {
        assert!(width > 0, "need at least one beam");
        check_problem(&topology, collective)?;

        let distinct_link_delays: Vec<Time> =
            topology.distinct_link_delays().iter().copied().collect();
        let beams = (0..width)
            .map(|beam| MatchState::new(&topology, collective, seed_beam(beam)))
            .collect();
        let event_queue = EventQueue::new();

        let mut engine = Self {
            topology,
            selection,
            current_time: event_queue.current_time(),
            event_queue,
            distinct_link_delays,
            beams,
            max_ticks: None,
        };
        engine.schedule_next_events();

        Ok(engine)
    }

    /// Bounds the number of shared event ticks; `synthesize` fails once
    /// the bound is hit.
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = Some(max_ticks);
        self
    }

    /// Runs all beams to completion and returns the earliest-finishing
    /// schedule.
    pub fn synthesize(mut self) -> SynthesisOutcome {
        let mut ticks: u64 = 0;

        while !self.beams.iter().all(MatchState::completed) {
            let Some(time) = self.event_queue.pop() else {
                break;
            };

            self.current_time = time;

            for beam in &mut self.beams {
                if !beam.completed() {
                    beam.ten.update_current_time(time);
                    beam.run_matching(&self.topology, time, self.selection);
                } else if beam.result.collective_time() == 0 {
                    // finished on an earlier tick; finalize on this one
                    beam.result.set_collective_time(time);
                }
            }

            if self.beams.iter().all(MatchState::completed) {
                break;
            }

            if let Some(limit) = self.max_ticks {
                ticks += 1;
                if ticks >= limit {
                    return Err(SynthesisError::TickLimitExceeded(limit));
                }
            }

            self.schedule_next_events();
        }

        assert!(
            self.beams.iter().all(MatchState::completed),
            "event queue drained before every beam completed"
        );

        // beams that completed on the final tick still carry time zero
        for beam in &mut self.beams {
            if beam.result.collective_time() == 0 {
                beam.result.set_collective_time(self.current_time);
            }
        }

        let best = self
            .beams
            .into_iter()
            .map(|beam| beam.result)
            .min_by_key(|result| result.collective_time())
            .expect("at least one beam");

        debug!(
            collective_time = best.collective_time(),
            "beam search finished"
        );

        Ok(best)
    }

    /// Schedules the next event horizon on the shared queue.
    fn schedule_next_events(&mut self) {
        for &delay in &self.distinct_link_delays {
            self.event_queue.schedule(self.current_time + delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SynthesisEngine;

    fn two_npu_problem() -> (Arc<Topology>, Collective) {
        let mut topology = Topology::new(2).unwrap();
        topology.connect(0, 1, 100.0, 1.0, true).unwrap();
        topology.set_chunk_size(1 << 20).unwrap();
        (Arc::new(topology), Collective::all_gather(2, 1 << 20, 1))
    }

    #[test]
    fn test_single_beam_matches_baseline_engine() {
        let (topology, collective) = two_npu_problem();

        let baseline = SynthesisEngine::with_seed(
            Arc::clone(&topology),
            &collective,
            SourceSelection::Random,
            99,
        )
        .unwrap()
        .synthesize()
        .unwrap();

        let beam = BeamEngine::with_seed(topology, &collective, 1, SourceSelection::Random, 99)
            .unwrap()
            .synthesize()
            .unwrap();

        assert_eq!(beam.collective_time(), baseline.collective_time());
        assert_eq!(beam.transmissions_count(), baseline.transmissions_count());
        assert_eq!(beam.egress_link_info(0, 1), baseline.egress_link_info(0, 1));
        assert_eq!(beam.egress_link_info(1, 0), baseline.egress_link_info(1, 0));
    }

    #[test]
    fn test_all_beams_complete() {
        let (topology, collective) = two_npu_problem();

        let best = BeamEngine::with_seed(topology, &collective, 8, SourceSelection::Random, 5)
            .unwrap()
            .synthesize()
            .unwrap();

        assert_eq!(best.collective_time(), 976_662_500);
        assert_eq!(best.transmissions_count(), 2);
    }

    #[test]
    #[should_panic(expected = "at least one beam")]
    fn test_beam_width_zero_panics() {
        let (topology, collective) = two_npu_problem();
        let _ = BeamEngine::new(topology, &collective, 0, SourceSelection::Random);
    }

    #[test]
    fn test_beam_tick_limit() {
        let mut topology = Topology::new(3).unwrap();
        topology.connect(0, 1, 100.0, 1.0, true).unwrap();
        topology.set_chunk_size(1 << 20).unwrap();

        let mut collective = Collective::new(3, 1 << 20);
        collective.add(0, 0, 1);
        collective.add(0, 0, 2);

        let engine = BeamEngine::with_seed(
            Arc::new(topology),
            &collective,
            3,
            SourceSelection::Random,
            1,
        )
        .unwrap()
        .with_max_ticks(32);

        assert!(matches!(
            engine.synthesize(),
            Err(SynthesisError::TickLimitExceeded(32))
        ));
    }
}
