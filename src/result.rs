//! Synthesized schedule: per-NPU transmission logs and the collective time.
//!
//! Every committed link-chunk match is recorded twice, as an egress event
//! at the source NPU and an ingress event at the destination NPU. The
//! result can be dumped as CSV for downstream tooling.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collective::Collective;
use crate::topology::Topology;
use crate::types::{ChunkId, NpuId, StartTime, Time};

/// One chunk crossing one link.
///
/// `start` is derived: the transmission occupies the link over
/// `[start, arrival]` with `arrival - start` equal to the link delay.
/// Start times are signed because a commit at an early event tick over a
/// slow link starts before time zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transmission {
    /// The chunk that was moved
    pub chunk: ChunkId,
    /// Time the chunk arrived at the destination (ps)
    pub arrival: Time,
    /// Time the transmission started at the source (ps)
    pub start: StartTime,
}

/// Transmission log of a single NPU, keyed by peer.
#[derive(Clone, Debug, Default)]
pub struct NpuResult {
    /// peer -> chunks received from that peer, in commit order
    ingress: BTreeMap<NpuId, Vec<Transmission>>,
    /// peer -> chunks sent to that peer, in commit order
    egress: BTreeMap<NpuId, Vec<Transmission>>,
}

impl NpuResult {
    fn add_ingress(&mut self, src: NpuId, transmission: Transmission) {
        self.ingress.entry(src).or_default().push(transmission);
    }

    fn add_egress(&mut self, dest: NpuId, transmission: Transmission) {
        self.egress.entry(dest).or_default().push(transmission);
    }
}

/// The synthesized collective schedule.
#[derive(Clone, Debug)]
pub struct SynthesisResult {
    npus_count: usize,
    chunks_count: usize,
    npu_results: Vec<NpuResult>,
    collective_time: Time,
}

impl SynthesisResult {
    /// Creates an empty result shell for the given problem.
    pub fn new(topology: &Topology, collective: &Collective) -> Self {
        Self {
            npus_count: topology.npus_count(),
            chunks_count: collective.chunks_count(),
            npu_results: vec![NpuResult::default(); topology.npus_count()],
            collective_time: 0,
        }
    }

    /// Records a committed link-chunk match.
    ///
    /// The same transmission lands in the source's egress log and the
    /// destination's ingress log.
    pub fn mark_link_chunk_match(
        &mut self,
        chunk: ChunkId,
        src: NpuId,
        dest: NpuId,
        arrival: Time,
        start: StartTime,
    ) {
        assert!(chunk < self.chunks_count, "chunk {chunk} out of range");
        assert!(src < self.npus_count, "src NPU {src} out of range");
        assert!(dest < self.npus_count, "dest NPU {dest} out of range");

        let transmission = Transmission {
            chunk,
            arrival,
            start,
        };

        self.npu_results[src].add_egress(dest, transmission);
        self.npu_results[dest].add_ingress(src, transmission);
    }

    /// Sets the final collective completion time.
    pub fn set_collective_time(&mut self, collective_time: Time) {
        self.collective_time = collective_time;
    }

    /// The final collective completion time in picoseconds.
    ///
    /// Zero until the synthesis terminates.
    pub fn collective_time(&self) -> Time {
        self.collective_time
    }

    /// Number of NPUs covered by this result.
    pub fn npus_count(&self) -> usize {
        self.npus_count
    }

    /// Transmissions sent from `src` to `dest`, in commit order.
    pub fn egress_link_info(&self, src: NpuId, dest: NpuId) -> &[Transmission] {
        self.npu_results[src]
            .egress
            .get(&dest)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Transmissions received at `dest` from `src`, in commit order.
    pub fn ingress_link_info(&self, src: NpuId, dest: NpuId) -> &[Transmission] {
        self.npu_results[dest]
            .ingress
            .get(&src)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of committed transmissions.
    pub fn transmissions_count(&self) -> usize {
        self.npu_results
            .iter()
            .map(|npu| npu.egress.values().map(Vec::len).sum::<usize>())
            .sum()
    }

    /// The latest arrival time across all committed transmissions.
    pub fn max_arrival_time(&self) -> Option<Time> {
        self.npu_results
            .iter()
            .flat_map(|npu| npu.egress.values())
            .flatten()
            .map(|transmission| transmission.arrival)
            .max()
    }

    /// Writes the schedule as CSV.
    ///
    /// The first line carries the scalar collective time; the rest is one
    /// row per recorded transmission, egress then ingress per NPU.
    pub fn write_csv<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writeln!(writer, "collective_time_ps,{}", self.collective_time)?;
        writeln!(writer, "npu,peer,direction,chunk,start_ps,arrival_ps")?;

        for (npu, result) in self.npu_results.iter().enumerate() {
            for (peer, transmissions) in &result.egress {
                for t in transmissions {
                    writeln!(
                        writer,
                        "{npu},{peer},egress,{},{},{}",
                        t.chunk, t.start, t.arrival
                    )?;
                }
            }
            for (peer, transmissions) in &result.ingress {
                for t in transmissions {
                    writeln!(
                        writer,
                        "{npu},{peer},ingress,{},{},{}",
                        t.chunk, t.start, t.arrival
                    )?;
                }
            }
        }

        Ok(())
    }

    /// Writes the schedule CSV to a file.
    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer)?;
        std::fs::write(path, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_npu_result() -> SynthesisResult {
        let mut topology = Topology::new(2).unwrap();
        topology.connect(0, 1, 100.0, 1.0, true).unwrap();
        let collective = Collective::all_gather(2, 1 << 20, 1);
        SynthesisResult::new(&topology, &collective)
    }

    #[test]
    fn test_match_recorded_on_both_sides() {
        let mut result = two_npu_result();
        result.mark_link_chunk_match(0, 0, 1, 500, 100);

        let egress = result.egress_link_info(0, 1);
        let ingress = result.ingress_link_info(0, 1);

        assert_eq!(egress.len(), 1);
        assert_eq!(egress, ingress);
        assert_eq!(egress[0].chunk, 0);
        assert_eq!(egress[0].arrival, 500);
        assert_eq!(egress[0].start, 100);

        // nothing flowed the other way
        assert!(result.egress_link_info(1, 0).is_empty());
        assert!(result.ingress_link_info(1, 0).is_empty());
    }

    #[test]
    fn test_commit_order_is_preserved() {
        let mut result = two_npu_result();
        result.mark_link_chunk_match(0, 0, 1, 500, 100);
        result.mark_link_chunk_match(1, 0, 1, 900, 500);

        let chunks: Vec<ChunkId> = result
            .egress_link_info(0, 1)
            .iter()
            .map(|t| t.chunk)
            .collect();
        assert_eq!(chunks, vec![0, 1]);
    }

    #[test]
    fn test_counters_and_max_arrival() {
        let mut result = two_npu_result();
        assert_eq!(result.transmissions_count(), 0);
        assert_eq!(result.max_arrival_time(), None);

        result.mark_link_chunk_match(0, 0, 1, 500, 100);
        result.mark_link_chunk_match(1, 1, 0, 900, 500);

        assert_eq!(result.transmissions_count(), 2);
        assert_eq!(result.max_arrival_time(), Some(900));
    }

    #[test]
    fn test_transmission_serialization() {
        let transmission = Transmission {
            chunk: 3,
            arrival: 976_662_500,
            start: -90,
        };

        let json = serde_json::to_string(&transmission).unwrap();
        let deserialized: Transmission = serde_json::from_str(&json).unwrap();

        assert_eq!(transmission, deserialized);
    }

    #[test]
    fn test_csv_layout() {
        let mut result = two_npu_result();
        result.mark_link_chunk_match(0, 0, 1, 500, 100);
        result.set_collective_time(500);

        let mut buffer = Vec::new();
        result.write_csv(&mut buffer).unwrap();
        let csv = String::from_utf8(buffer).unwrap();

        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "collective_time_ps,500");
        assert_eq!(lines[1], "npu,peer,direction,chunk,start_ps,arrival_ps");
        assert_eq!(lines[2], "0,1,egress,0,100,500");
        assert_eq!(lines[3], "1,0,ingress,0,100,500");
        assert_eq!(lines.len(), 4);
    }
}
