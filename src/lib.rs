//! # Linkweave Collective Schedule Synthesizer
//!
//! A synthesis engine that turns an NPU interconnect topology and a
//! collective specification (which chunks start where, which chunks must
//! end up where) into a time-annotated schedule of per-link chunk
//! transmissions.
//!
//! ## Design Principles
//!
//! - **Time-Expanded Network**: link availability is tracked against a
//!   discrete-event clock; a link freed at one tick can carry a new chunk
//!   at the next.
//! - **Randomized Matching**: at every tick, pending chunk requirements are
//!   matched against free links in random order; multi-hop routes emerge
//!   across ticks rather than being planned explicitly.
//! - **Strategy Variants**: a single matching core parameterized by source
//!   selection (uniform-random or delay-ranked greedy), plus a beam wrapper
//!   that races K randomized instances on a shared clock.
//! - **Unified Timeline**: all components share one picosecond `Time`
//!   representation.

pub mod beam;
pub mod collective;
pub mod engine;
pub mod event_queue;
pub mod network;
pub mod result;
pub mod topology;
pub mod types;

// Re-export commonly used types
pub use beam::BeamEngine;
pub use collective::Collective;
pub use engine::{synthesize_best_of, SourceSelection, SynthesisEngine, SynthesisError};
pub use event_queue::EventQueue;
pub use network::TimeExpandedNetwork;
pub use result::{SynthesisResult, Transmission};
pub use topology::{Topology, TopologyError};
pub use types::{ChunkId, ChunkSize, NpuId, StartTime, Time};
