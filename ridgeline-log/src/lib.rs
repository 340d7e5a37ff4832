//! Partitioned, segmented append-only log storage for the Ridgeline broker.
//!
//! Mirrors Kafka's on-disk layout: each partition directory holds a sequence
//! of `(baseOffset.log, baseOffset.index, baseOffset.timeindex)` segment
//! triples. See spec §3/§4.1 for the full contract.

#![warn(clippy::all)]

pub mod batch;
mod log;
mod router;
mod segment;

pub use log::{FetchDescriptor, FetchSlice, Log, LogConfig, LogError, SegmentRange};
pub use router::{PartitionRouter, RouterError, TopicInfo};
