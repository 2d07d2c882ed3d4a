//! Synthesis engine: the event loop and link-chunk matching.
//!
//! The engine advances a discrete-event clock over the time-expanded
//! network. At each event tick it runs one *matching sweep*: unsatisfied
//! postcondition entries are drawn in random order, each is traced back one
//! hop to the NPUs that could serve it over a free link, and a source is
//! chosen by the configured [`SourceSelection`] strategy. Committed matches
//! occupy their link, grow the destination's precondition, and shrink the
//! postcondition; the engine terminates when the postcondition is empty.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::collective::Collective;
use crate::event_queue::EventQueue;
use crate::network::TimeExpandedNetwork;
use crate::result::SynthesisResult;
use crate::topology::Topology;
use crate::types::{ChunkId, ChunkSize, NpuId, StartTime, Time};

/// Candidate rank picked by the greedy strategy: the second-slowest link.
///
/// Skipping the slowest candidate keeps the most expensive link free for
/// chunks that have no alternative, while still avoiding the contention a
/// pure fastest-first choice creates.
pub const GREEDY_RANK: usize = 1;

/// Errors raised while constructing or running a synthesis engine.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("topology chunk size is not bound")]
    ChunkSizeUnbound,

    #[error("topology chunk size {topology} does not match collective chunk size {collective}")]
    ChunkSizeMismatch {
        topology: ChunkSize,
        collective: ChunkSize,
    },

    #[error("topology has {topology} NPUs but collective spans {collective}")]
    NpusCountMismatch { topology: usize, collective: usize },

    #[error("synthesis did not complete within {0} event ticks")]
    TickLimitExceeded(u64),
}

/// Result type for synthesis operations.
pub type SynthesisOutcome = Result<SynthesisResult, SynthesisError>;

/// How a source NPU is chosen when several candidates hold the chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceSelection {
    /// Uniform-random choice among the candidates.
    Random,
    /// Deterministic choice: sort candidates by link delay descending and
    /// take the given rank, clamped to the last candidate.
    GreedyNth(usize),
}

impl SourceSelection {
    /// The greedy strategy at its default rank (second-slowest).
    pub fn greedy() -> Self {
        Self::GreedyNth(GREEDY_RANK)
    }
}

/// NPU -> set of chunks, the engine-side projection of a collective
/// condition.
///
/// The precondition's reserved time component is dropped here; the matching
/// sweep only ever consults chunk membership.
pub(crate) type ChunkPlacement = BTreeMap<NpuId, BTreeSet<ChunkId>>;

/// One independent synthesis instance: the mutable state a single matching
/// sweep operates on.
///
/// The single-run engine owns one of these; the beam engine owns K of them
/// advancing in lockstep on a shared clock.
pub(crate) struct MatchState {
    pub(crate) ten: TimeExpandedNetwork,
    pub(crate) precondition: ChunkPlacement,
    pub(crate) postcondition: ChunkPlacement,
    pub(crate) result: SynthesisResult,
    rng: StdRng,
}

impl MatchState {
    pub(crate) fn new(topology: &Arc<Topology>, collective: &Collective, rng: StdRng) -> Self {
        let precondition = collective
            .precondition()
            .iter()
            .filter(|(_, chunks)| !chunks.is_empty())
            .map(|(&npu, chunks)| {
                let chunks = chunks.iter().map(|&(chunk, _)| chunk).collect();
                (npu, chunks)
            })
            .collect();

        let postcondition = collective
            .postcondition()
            .iter()
            .filter(|(_, chunks)| !chunks.is_empty())
            .map(|(&npu, chunks)| (npu, chunks.clone()))
            .collect();

        Self {
            ten: TimeExpandedNetwork::new(Arc::clone(topology)),
            precondition,
            postcondition,
            result: SynthesisResult::new(topology, collective),
            rng,
        }
    }

    /// True once every postcondition entry has been satisfied.
    pub(crate) fn completed(&self) -> bool {
        self.postcondition.is_empty()
    }

    /// One matching sweep at `current_time`.
    ///
    /// Works on round-local snapshots: the candidate check reads the
    /// precondition as of the start of the round, and a (dest, chunk) pair
    /// that cannot be served is dropped from this round's work set while
    /// the authoritative postcondition retains it for later rounds.
    pub(crate) fn run_matching(
        &mut self,
        topology: &Topology,
        current_time: Time,
        selection: SourceSelection,
    ) {
        let round_precondition = self.precondition.clone();
        let mut pending = self.postcondition.clone();

        while !pending.is_empty() {
            let (dest, chunk) = select_postcondition(&mut self.rng, &mut pending);

            let sources = self.ten.backtrack(dest);
            let candidates: Vec<NpuId> = sources
                .into_iter()
                .filter(|src| {
                    round_precondition
                        .get(src)
                        .is_some_and(|held| held.contains(&chunk))
                })
                .collect();

            if candidates.is_empty() {
                continue;
            }

            let src = select_source(&mut self.rng, topology, &candidates, dest, selection);
            self.commit(topology, src, dest, chunk, current_time);
        }
    }

    /// Commits one link-chunk match.
    fn commit(
        &mut self,
        topology: &Topology,
        src: NpuId,
        dest: NpuId,
        chunk: ChunkId,
        current_time: Time,
    ) {
        let delay = topology.link_delay(src, dest);
        let start = current_time as StartTime - delay as StartTime;

        debug!(chunk, src, dest, arrival = current_time, "link-chunk match");

        self.result
            .mark_link_chunk_match(chunk, src, dest, current_time, start);
        self.ten.mark_link_occupied(src, dest);

        self.precondition.entry(dest).or_default().insert(chunk);

        let remaining = self
            .postcondition
            .get_mut(&dest)
            .expect("committed chunk must have a pending postcondition");
        remaining.remove(&chunk);
        if remaining.is_empty() {
            self.postcondition.remove(&dest);
        }
    }
}

/// Draws one (dest, chunk) pair uniformly from the round's work set.
///
/// Picks a random NPU entry, then a random chunk within it; the pair is
/// removed from the work set (and the NPU entry dropped once empty).
fn select_postcondition(rng: &mut StdRng, pending: &mut ChunkPlacement) -> (NpuId, ChunkId) {
    debug_assert!(!pending.is_empty());

    let npu_index = rng.gen_range(0..pending.len());
    let (&dest, chunks) = pending
        .iter_mut()
        .nth(npu_index)
        .expect("index drawn from map length");

    let chunk_index = rng.gen_range(0..chunks.len());
    let chunk = *chunks
        .iter()
        .nth(chunk_index)
        .expect("index drawn from set length");

    chunks.remove(&chunk);
    if chunks.is_empty() {
        pending.remove(&dest);
    }

    (dest, chunk)
}

/// Chooses the source NPU among the candidates that hold the chunk.
///
/// A single candidate is forced regardless of strategy.
fn select_source(
    rng: &mut StdRng,
    topology: &Topology,
    candidates: &[NpuId],
    dest: NpuId,
    selection: SourceSelection,
) -> NpuId {
    assert!(!candidates.is_empty(), "no candidate source NPUs");

    if candidates.len() == 1 {
        return candidates[0];
    }

    match selection {
        SourceSelection::Random => candidates[rng.gen_range(0..candidates.len())],
        SourceSelection::GreedyNth(rank) => {
            let mut by_delay: Vec<(NpuId, Time)> = candidates
                .iter()
                .map(|&src| (src, topology.link_delay(src, dest)))
                .collect();
            // stable sort, slowest first; equal delays keep ascending id order
            by_delay.sort_by(|a, b| b.1.cmp(&a.1));

            let index = rank.min(by_delay.len() - 1);
            by_delay[index].0
        }
    }
}

/// A single-instance synthesis engine (baseline or greedy, depending on
/// the selection strategy).
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use linkweave::collective::Collective;
/// use linkweave::engine::{SourceSelection, SynthesisEngine};
/// use linkweave::topology::Topology;
///
/// let mut topology = Topology::new(2).unwrap();
/// topology.connect(0, 1, 100.0, 1.0, true).unwrap();
/// topology.set_chunk_size(1 << 20).unwrap();
/// let topology = Arc::new(topology);
///
/// let collective = Collective::all_gather(2, 1 << 20, 1);
/// let engine =
///     SynthesisEngine::new(topology, &collective, SourceSelection::Random).unwrap();
/// let result = engine.synthesize().unwrap();
///
/// assert_eq!(result.collective_time(), 976_662_500);
/// ```
pub struct SynthesisEngine {
    topology: Arc<Topology>,
    selection: SourceSelection,
    event_queue: EventQueue,
    current_time: Time,
    distinct_link_delays: Vec<Time>,
    state: MatchState,
    max_ticks: Option<u64>,
}

impl SynthesisEngine {
    /// Creates an engine seeded from entropy.
    ///
    /// The topology's chunk size must already be bound and agree with the
    /// collective's.
    pub fn new(
        topology: Arc<Topology>,
        collective: &Collective,
        selection: SourceSelection,
    ) -> Result<Self, SynthesisError> {
        Self::build(topology, collective, selection, StdRng::from_entropy())
    }

    /// Creates an engine with a fixed seed; same seed, same schedule.
    pub fn with_seed(
        topology: Arc<Topology>,
        collective: &Collective,
        selection: SourceSelection,
        seed: u64,
    ) -> Result<Self, SynthesisError> {
        Self::build(topology, collective, selection, StdRng::seed_from_u64(seed))
    }

    fn build(
        topology: Arc<Topology>,
        collective: &Collective,
        selection: SourceSelection,
        rng: StdRng,
    ) -> Result<Self, SynthesisError> {
        check_problem(&topology, collective)?;

        let distinct_link_delays: Vec<Time> =
            topology.distinct_link_delays().iter().copied().collect();
        let state = MatchState::new(&topology, collective, rng);
        let event_queue = EventQueue::new();

        let mut engine = Self {
            topology,
            selection,
            current_time: event_queue.current_time(),
            event_queue,
            distinct_link_delays,
            state,
            max_ticks: None,
        };
        engine.schedule_next_events();

        Ok(engine)
    }

    /// Bounds the number of event ticks; `synthesize` fails once the bound
    /// is hit.
    ///
    /// Without a bound, an unsatisfiable input loops forever.
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = Some(max_ticks);
        self
    }

    /// Runs the event loop to completion and returns the schedule.
    pub fn synthesize(mut self) -> SynthesisOutcome {
        let mut ticks: u64 = 0;

        while !self.state.completed() {
            let Some(time) = self.event_queue.pop() else {
                break;
            };

            self.current_time = time;
            self.state.ten.update_current_time(time);
            self.state
                .run_matching(&self.topology, time, self.selection);

            if self.state.completed() {
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
            self.state.completed(),
            "event queue drained before the postcondition emptied"
        );

        let mut result = self.state.result;
        result.set_collective_time(self.current_time);
        Ok(result)
    }

    /// Schedules the next event horizon: one tick per distinct link delay.
    fn schedule_next_events(&mut self) {
        for &delay in &self.distinct_link_delays {
            self.event_queue.schedule(self.current_time + delay);
        }
    }
}

/// Validates that the topology and collective describe the same problem.
pub(crate) fn check_problem(
    topology: &Topology,
    collective: &Collective,
) -> Result<(), SynthesisError> {
    let chunk_size = topology
        .chunk_size()
        .ok_or(SynthesisError::ChunkSizeUnbound)?;

    if chunk_size != collective.chunk_size() {
        return Err(SynthesisError::ChunkSizeMismatch {
            topology: chunk_size,
            collective: collective.chunk_size(),
        });
    }

    if topology.npus_count() != collective.npus_count() {
        return Err(SynthesisError::NpusCountMismatch {
            topology: topology.npus_count(),
            collective: collective.npus_count(),
        });
    }

    Ok(())
}

/// Runs `runs` independent engines and keeps the schedule with the
/// smallest collective time.
///
/// Runs execute in parallel; with a base seed, run `i` uses `seed + i` so
/// the whole sweep stays reproducible.
pub fn synthesize_best_of(
    topology: &Arc<Topology>,
    collective: &Collective,
    runs: usize,
    selection: SourceSelection,
    seed: Option<u64>,
) -> SynthesisOutcome {
    assert!(runs > 0, "need at least one run");

    let results: Result<Vec<SynthesisResult>, SynthesisError> = (0..runs as u64)
        .into_par_iter()
        .map(|run| {
            let engine = match seed {
                Some(seed) => SynthesisEngine::with_seed(
                    Arc::clone(topology),
                    collective,
                    selection,
                    seed.wrapping_add(run),
                )?,
                None => SynthesisEngine::new(Arc::clone(topology), collective, selection)?,
            };
            engine.synthesize()
        })
        .collect();

    Ok(results?
        .into_iter()
        .min_by_key(SynthesisResult::collective_time)
        .expect("at least one run"))
}
