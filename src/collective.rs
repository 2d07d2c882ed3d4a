//! Collective specifications: which chunks start where, and which chunks
//! must end up where.
//!
//! A collective is a pair of conditions over the NPUs. The *precondition*
//! maps each NPU to the chunks it initially holds (tagged with the time
//! they became available); the *postcondition* maps each NPU to the chunks
//! it must ultimately receive. The synthesis engines transform the former
//! into the latter.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{ChunkId, ChunkSize, NpuId, Time};

/// Initial chunk placement: NPU -> set of `(chunk, available_at)` pairs.
///
/// The time component records when the chunk became available at that NPU
/// (zero for initial placement). The engines only consult chunk membership;
/// the time is reserved.
pub type CollectivePrecondition = BTreeMap<NpuId, BTreeSet<(ChunkId, Time)>>;

/// Required chunk placement: NPU -> set of chunks it must receive.
pub type CollectivePostcondition = BTreeMap<NpuId, BTreeSet<ChunkId>>;

/// A collective data-movement specification.
///
/// Ordered containers keep iteration deterministic, so seeded synthesis
/// runs reproduce exactly.
#[derive(Clone, Debug)]
pub struct Collective {
    npus_count: usize,
    chunk_size: ChunkSize,

    chunks: BTreeSet<ChunkId>,
    precondition: CollectivePrecondition,
    postcondition: CollectivePostcondition,
}

impl Collective {
    /// Creates an empty collective over `npus_count` NPUs.
    pub fn new(npus_count: usize, chunk_size: ChunkSize) -> Self {
        assert!(npus_count > 0, "collective needs at least one NPU");
        assert!(chunk_size > 0, "chunk size must be positive");

        Self {
            npus_count,
            chunk_size,
            chunks: BTreeSet::new(),
            precondition: CollectivePrecondition::new(),
            postcondition: CollectivePostcondition::new(),
        }
    }

    /// Declares that `chunk` starts at `src` and must reach `dest`.
    ///
    /// The chunk joins the global universe, the precondition of `src`
    /// (available at time zero), and the postcondition of `dest`.
    pub fn add(&mut self, chunk: ChunkId, src: NpuId, dest: NpuId) {
        assert!(src < self.npus_count, "src NPU {src} out of range");
        assert!(dest < self.npus_count, "dest NPU {dest} out of range");

        self.chunks.insert(chunk);
        self.precondition.entry(src).or_default().insert((chunk, 0));
        self.postcondition.entry(dest).or_default().insert(chunk);
    }

    /// Builds an All-Gather: every NPU must receive every other NPU's
    /// chunks.
    ///
    /// NPU `i` starts with `chunks_per_npu` chunks numbered
    /// `i * chunks_per_npu ..`, and each of them is required at every other
    /// NPU.
    pub fn all_gather(npus_count: usize, chunk_size: ChunkSize, chunks_per_npu: usize) -> Self {
        assert!(chunks_per_npu > 0, "need at least one chunk per NPU");

        let mut collective = Self::new(npus_count, chunk_size);

        for src in 0..npus_count {
            for offset in 0..chunks_per_npu {
                let chunk = src * chunks_per_npu + offset;
                for dest in 0..npus_count {
                    if dest != src {
                        collective.add(chunk, src, dest);
                    }
                }
            }
        }

        collective
    }

    /// Chunk size in bytes.
    pub fn chunk_size(&self) -> ChunkSize {
        self.chunk_size
    }

    /// Number of NPUs this collective spans.
    pub fn npus_count(&self) -> usize {
        self.npus_count
    }

    /// Size of the global chunk universe.
    pub fn chunks_count(&self) -> usize {
        self.chunks.len()
    }

    /// The initial chunk placement.
    pub fn precondition(&self) -> &CollectivePrecondition {
        &self.precondition
    }

    /// The required chunk placement.
    pub fn postcondition(&self) -> &CollectivePostcondition {
        &self.postcondition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_tracks_conditions() {
        let mut collective = Collective::new(3, 1 << 20);
        collective.add(0, 0, 1);
        collective.add(0, 0, 2);
        collective.add(1, 1, 0);

        assert_eq!(collective.chunks_count(), 2);
        assert!(collective.precondition()[&0].contains(&(0, 0)));
        assert!(collective.precondition()[&1].contains(&(1, 0)));
        assert!(collective.postcondition()[&1].contains(&0));
        assert!(collective.postcondition()[&2].contains(&0));
        assert!(collective.postcondition()[&0].contains(&1));
    }

    #[test]
    fn test_all_gather_single_chunk_per_npu() {
        let collective = Collective::all_gather(4, 1 << 20, 1);

        assert_eq!(collective.chunks_count(), 4);
        assert_eq!(collective.chunk_size(), 1 << 20);

        // every NPU holds its own chunk and requires the other three
        for npu in 0..4 {
            assert!(collective.precondition()[&npu].contains(&(npu, 0)));
            let required = &collective.postcondition()[&npu];
            assert_eq!(required.len(), 3);
            assert!(!required.contains(&npu));
        }
    }

    #[test]
    fn test_all_gather_multiple_chunks_per_npu() {
        let collective = Collective::all_gather(2, 1 << 20, 3);

        assert_eq!(collective.chunks_count(), 6);
        // NPU 1 starts with chunks 3, 4, 5 and requires 0, 1, 2
        for chunk in 3..6 {
            assert!(collective.precondition()[&1].contains(&(chunk, 0)));
        }
        let required: Vec<ChunkId> = collective.postcondition()[&1].iter().copied().collect();
        assert_eq!(required, vec![0, 1, 2]);
    }

    #[test]
    fn test_postcondition_chunks_exist_in_some_precondition() {
        let collective = Collective::all_gather(3, 1 << 20, 2);

        let held: BTreeSet<ChunkId> = collective
            .precondition()
            .values()
            .flat_map(|chunks| chunks.iter().map(|&(chunk, _)| chunk))
            .collect();

        for required in collective.postcondition().values() {
            for chunk in required {
                assert!(held.contains(chunk));
            }
        }
    }
}
