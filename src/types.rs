//! Core type definitions for the synthesis engine.
//!
//! This module defines the fundamental types used throughout the synthesizer.

/// Simulated time in picoseconds.
///
/// Link delays, event times, and the final collective time all use the same
/// `Time` representation, giving every component a unified timeline.
pub type Time = u64;

/// Signed time in picoseconds for derived transmission start times.
///
/// A transmission committed at an early event tick over a slow link starts
/// before time zero (`arrival - delay < 0`), so start times carry a sign.
pub type StartTime = i64;

/// Unique identifier for an NPU in the interconnect topology.
///
/// NPUs are addressed densely as `0..npus_count`.
pub type NpuId = usize;

/// Unique identifier for a data chunk moved by the collective.
pub type ChunkId = usize;

/// Size of one chunk in bytes.
pub type ChunkSize = u64;

/// Point-to-point link latency in nanoseconds.
pub type Latency = f64;

/// Point-to-point link bandwidth in GB/s.
pub type Bandwidth = f64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_aliases() {
        let time: Time = 976_662_500;
        let npu: NpuId = 3;
        let chunk: ChunkId = 7;
        let size: ChunkSize = 1 << 20;

        assert_eq!(time, 976_662_500);
        assert_eq!(npu, 3);
        assert_eq!(chunk, 7);
        assert_eq!(size, 1_048_576);
    }
}
