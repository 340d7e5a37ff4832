//! Shared type definitions used across the broker's crates.

use serde::{Deserialize, Serialize};

/// Offset of a record within a partition's log.
pub type Offset = i64;

/// Partition index within a topic.
pub type PartitionId = i32;

/// Timestamp in milliseconds since the Unix epoch.
pub type Timestamp = i64;

const MAX_TOPIC_NAME_LEN: usize = 249;

/// Validate a topic name per spec §3: max 249 chars, `[A-Za-z0-9._-]` only.
pub fn validate_topic_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_TOPIC_NAME_LEN {
        return Err(format!(
            "topic name must be 1-{MAX_TOPIC_NAME_LEN} characters, got {}",
            name.len()
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    {
        return Err(format!(
            "topic name '{name}' contains characters outside [A-Za-z0-9._-]"
        ));
    }
    Ok(())
}

/// Configuration requested when creating a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    pub partitions: u32,
    #[serde(default)]
    pub configs: std::collections::HashMap<String, String>,
}

impl TopicConfig {
    pub fn new(name: impl Into<String>, partitions: u32) -> Self {
        Self {
            name: name.into(),
            partitions,
            configs: std::collections::HashMap::new(),
        }
    }
}

/// Metadata about a topic, as returned by the `Metadata` API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: Vec<PartitionMetadata>,
}

/// Metadata about a single partition, as returned by the `Metadata` API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionMetadata {
    pub id: PartitionId,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
    pub earliest_offset: Offset,
    pub high_watermark: Offset,
}
