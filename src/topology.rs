//! Interconnect topology: a weighted directed graph of NPUs.
//!
//! The topology is a dense adjacency-matrix graph. Each directed link carries
//! a latency (ns) and a bandwidth (GB/s); once a chunk size is bound, every
//! link gets an integer per-chunk delay in picoseconds derived from the
//! alpha-beta cost model.
//!
//! # Example
//!
//! ```
//! use linkweave::topology::Topology;
//!
//! let mut topology = Topology::new(2).unwrap();
//! topology.connect(0, 1, 100.0, 1.0, true).unwrap();
//! topology.set_chunk_size(1 << 20).unwrap();
//!
//! assert!(topology.is_connected(0, 1));
//! assert!(topology.is_connected(1, 0));
//! assert_eq!(topology.link_delay(0, 1), 976_662_500);
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use thiserror::Error;

use crate::types::{Bandwidth, ChunkSize, Latency, NpuId, Time};

/// Errors raised while building or loading a topology.
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("topology file line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("topology must contain at least one NPU")]
    NoNpus,

    #[error("NPU {npu} out of range (topology has {npus_count} NPUs)")]
    NpuOutOfRange { npu: NpuId, npus_count: usize },

    #[error("link {src} -> {dest} is a self-loop")]
    SelfLoop { src: NpuId, dest: NpuId },

    #[error("link {src} -> {dest} is already connected")]
    DuplicateLink { src: NpuId, dest: NpuId },

    #[error("link {src} -> {dest} has negative latency {latency}")]
    NegativeLatency {
        src: NpuId,
        dest: NpuId,
        latency: Latency,
    },

    #[error("link {src} -> {dest} has non-positive bandwidth {bandwidth}")]
    NonPositiveBandwidth {
        src: NpuId,
        dest: NpuId,
        bandwidth: Bandwidth,
    },

    #[error("chunk size must be positive")]
    ZeroChunkSize,

    #[error("chunk size is already bound")]
    ChunkSizeRebound,
}

/// Result type for topology operations.
pub type TopologyResult<T> = Result<T, TopologyError>;

/// An immutable-after-build weighted directed graph of NPUs.
///
/// Construction is two-phase: `connect` records links while the graph is
/// open, then `set_chunk_size` binds the chunk size exactly once and
/// computes every per-link delay. The synthesis engines only read from the
/// topology afterwards, so it can be shared freely behind an `Arc`.
#[derive(Clone, Debug)]
pub struct Topology {
    npus_count: usize,
    links_count: usize,

    connected: Vec<Vec<bool>>,
    latencies: Vec<Vec<Latency>>,
    bandwidths: Vec<Vec<Bandwidth>>,
    link_delays: Vec<Vec<Time>>,

    chunk_size: Option<ChunkSize>,
    distinct_link_delays: BTreeSet<Time>,
}

impl Topology {
    /// Creates a topology with `npus_count` NPUs and no links.
    ///
    /// Allocates the dense N×N connectivity, latency, bandwidth, and delay
    /// matrices up front.
    pub fn new(npus_count: usize) -> TopologyResult<Self> {
        if npus_count == 0 {
            return Err(TopologyError::NoNpus);
        }

        Ok(Self {
            npus_count,
            links_count: 0,
            connected: vec![vec![false; npus_count]; npus_count],
            latencies: vec![vec![-1.0; npus_count]; npus_count],
            bandwidths: vec![vec![-1.0; npus_count]; npus_count],
            link_delays: vec![vec![Time::MAX; npus_count]; npus_count],
            chunk_size: None,
            distinct_link_delays: BTreeSet::new(),
        })
    }

    /// Records a directed link from `src` to `dest`.
    ///
    /// `latency` is in nanoseconds, `bandwidth` in GB/s. When
    /// `bidirectional` is set, the reverse link is recorded with the same
    /// parameters.
    pub fn connect(
        &mut self,
        src: NpuId,
        dest: NpuId,
        latency: Latency,
        bandwidth: Bandwidth,
        bidirectional: bool,
    ) -> TopologyResult<()> {
        self.check_npu(src)?;
        self.check_npu(dest)?;

        if src == dest {
            return Err(TopologyError::SelfLoop { src, dest });
        }
        if self.connected[src][dest] {
            return Err(TopologyError::DuplicateLink { src, dest });
        }
        if latency < 0.0 {
            return Err(TopologyError::NegativeLatency { src, dest, latency });
        }
        if bandwidth <= 0.0 {
            return Err(TopologyError::NonPositiveBandwidth {
                src,
                dest,
                bandwidth,
            });
        }

        self.connected[src][dest] = true;
        self.latencies[src][dest] = latency;
        self.bandwidths[src][dest] = bandwidth;
        self.links_count += 1;

        if bidirectional {
            self.connect(dest, src, latency, bandwidth, false)?;
        }

        Ok(())
    }

    /// Binds the chunk size and computes every per-link delay.
    ///
    /// One-shot: rebinding is an error. The delays of all connected pairs
    /// are computed here exactly once and accumulated into the distinct
    /// delay set used for event scheduling.
    pub fn set_chunk_size(&mut self, chunk_size: ChunkSize) -> TopologyResult<()> {
        if chunk_size == 0 {
            return Err(TopologyError::ZeroChunkSize);
        }
        if self.chunk_size.is_some() {
            return Err(TopologyError::ChunkSizeRebound);
        }

        self.chunk_size = Some(chunk_size);

        for src in 0..self.npus_count {
            for dest in 0..self.npus_count {
                if !self.connected[src][dest] {
                    continue;
                }

                let delay = self.compute_link_delay(src, dest, chunk_size);
                self.link_delays[src][dest] = delay;
                self.distinct_link_delays.insert(delay);
            }
        }

        Ok(())
    }

    /// Per-chunk delay of one link under the alpha-beta cost model.
    ///
    /// `beta = 1 / (bandwidth × 2^30 / 10^9)` ns/B; the nanosecond total
    /// `latency + beta × chunk_size` is converted to picoseconds and
    /// truncated to an integer.
    fn compute_link_delay(&self, src: NpuId, dest: NpuId, chunk_size: ChunkSize) -> Time {
        let bandwidth_bytes_per_ns = self.bandwidths[src][dest] * (1u64 << 30) as f64 / 1e9;
        let beta = 1.0 / bandwidth_bytes_per_ns;

        let delay_ns = self.latencies[src][dest] + beta * chunk_size as f64;
        let delay_ps = delay_ns * 1e3;

        delay_ps as Time
    }

    /// Returns true if the directed link `src -> dest` exists.
    pub fn is_connected(&self, src: NpuId, dest: NpuId) -> bool {
        self.connected[src][dest]
    }

    /// Per-chunk delay of the link `src -> dest` in picoseconds.
    ///
    /// Requires the chunk size to be bound.
    pub fn link_delay(&self, src: NpuId, dest: NpuId) -> Time {
        assert!(self.chunk_size.is_some(), "chunk size not bound");
        assert!(self.connected[src][dest], "link {src} -> {dest} not connected");

        self.link_delays[src][dest]
    }

    /// Latency of the link `src -> dest` in nanoseconds.
    pub fn latency(&self, src: NpuId, dest: NpuId) -> Latency {
        assert!(self.connected[src][dest], "link {src} -> {dest} not connected");

        self.latencies[src][dest]
    }

    /// Bandwidth of the link `src -> dest` in GB/s.
    pub fn bandwidth(&self, src: NpuId, dest: NpuId) -> Bandwidth {
        assert!(self.connected[src][dest], "link {src} -> {dest} not connected");

        self.bandwidths[src][dest]
    }

    /// Number of NPUs.
    pub fn npus_count(&self) -> usize {
        self.npus_count
    }

    /// Number of directed links.
    pub fn links_count(&self) -> usize {
        self.links_count
    }

    /// The bound chunk size, if any.
    pub fn chunk_size(&self) -> Option<ChunkSize> {
        self.chunk_size
    }

    /// The set of distinct per-link delays, ascending.
    ///
    /// Requires the chunk size to be bound.
    pub fn distinct_link_delays(&self) -> &BTreeSet<Time> {
        assert!(self.chunk_size.is_some(), "chunk size not bound");

        &self.distinct_link_delays
    }

    /// Loads a topology from a CSV file.
    ///
    /// See [`Topology::from_csv`] for the format.
    pub fn from_csv_file<P: AsRef<Path>>(path: P) -> TopologyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_csv(&content)
    }

    /// Parses a topology from CSV text.
    ///
    /// Line 1 is the NPU count, line 2 is a header (ignored), and every
    /// remaining non-empty line is a unidirectional link record
    /// `src,dest,latency,bandwidth`. The producer materializes both
    /// directions of a bidirectional link explicitly.
    pub fn from_csv(content: &str) -> TopologyResult<Self> {
        let mut lines = content.lines().enumerate();

        let (_, count_line) = lines.next().ok_or(TopologyError::Parse {
            line: 1,
            message: "missing NPU count".to_string(),
        })?;
        let npus_count: usize =
            count_line
                .trim()
                .parse()
                .map_err(|_| TopologyError::Parse {
                    line: 1,
                    message: format!("invalid NPU count: {count_line:?}"),
                })?;

        if lines.next().is_none() {
            return Err(TopologyError::Parse {
                line: 2,
                message: "missing header line".to_string(),
            });
        }

        let mut topology = Self::new(npus_count)?;

        for (idx, line) in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (src, dest, latency, bandwidth) =
                parse_link_record(line).ok_or_else(|| TopologyError::Parse {
                    line: idx + 1,
                    message: format!("invalid link record: {line:?}"),
                })?;

            topology.connect(src, dest, latency, bandwidth, false)?;
        }

        Ok(topology)
    }

    fn check_npu(&self, npu: NpuId) -> TopologyResult<()> {
        if npu >= self.npus_count {
            return Err(TopologyError::NpuOutOfRange {
                npu,
                npus_count: self.npus_count,
            });
        }
        Ok(())
    }
}

/// Parses one `src,dest,latency,bandwidth` record.
fn parse_link_record(line: &str) -> Option<(NpuId, NpuId, Latency, Bandwidth)> {
    let mut fields = line.split(',');

    let src = fields.next()?.trim().parse().ok()?;
    let dest = fields.next()?.trim().parse().ok()?;
    let latency = fields.next()?.trim().parse().ok()?;
    let bandwidth = fields.next()?.trim().parse().ok()?;

    if fields.next().is_some() {
        return None;
    }

    Some((src, dest, latency, bandwidth))
}
