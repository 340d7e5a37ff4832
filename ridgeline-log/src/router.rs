//! `PartitionRouter`: owns every topic's partitions and maps `(topic,
//! partition)` to the `Log` that stores it. See spec §5 for the
//! create/delete/lookup concurrency contract.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use ridgeline_common::types::validate_topic_name;
use ridgeline_common::PartitionId;

use crate::log::{Log, LogConfig, LogError};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("topic already exists: {0}")]
    TopicAlreadyExists(String),
    #[error("unknown topic or partition: {0}/{1}")]
    UnknownTopicOrPartition(String, i32),
    #[error("invalid topic name: {0}")]
    InvalidTopic(String),
    #[error("invalid partition count: {0}")]
    InvalidPartitions(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("log error: {0}")]
    Log(#[from] LogError),
}

impl From<RouterError> for ridgeline_common::Error {
    fn from(e: RouterError) -> Self {
        use ridgeline_common::error::StorageError;
        match e {
            RouterError::TopicAlreadyExists(t) => StorageError::TopicAlreadyExists(t).into(),
            RouterError::UnknownTopicOrPartition(t, p) => {
                StorageError::UnknownTopicOrPartition(format!("{t}/{p}")).into()
            }
            RouterError::InvalidTopic(t) => StorageError::InvalidTopic(t).into(),
            RouterError::InvalidPartitions(m) => StorageError::InvalidPartitions(m).into(),
            RouterError::Io(io) => ridgeline_common::Error::Io(io),
            RouterError::Log(log_err) => log_err.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopicInfo {
    pub name: String,
    pub partition_count: i32,
    pub configs: HashMap<String, String>,
}

struct Topic {
    info: TopicInfo,
    partitions: Vec<Arc<Log>>,
}

/// Routes produce/fetch traffic to the right partition log and owns topic
/// lifecycle (create/delete). Reads (`get`/`list`) never block writers for
/// longer than a single `DashMap` shard lock; create/delete hold that same
/// shard lock for the duration of their directory operations.
pub struct PartitionRouter {
    data_dir: PathBuf,
    defaults: LogConfig,
    topics: DashMap<String, Topic>,
}

fn partition_dir(data_dir: &Path, topic: &str, partition: i32) -> PathBuf {
    data_dir.join(format!("{topic}-{partition}"))
}

/// Parse `<topic>-<partition>` directory names. Topic names cannot contain
/// `/`, so the rightmost `-` followed by an all-digit suffix is unambiguous
/// in practice (mirrors Kafka's own on-disk convention).
fn parse_partition_dir_name(name: &str) -> Option<(&str, i32)> {
    let (topic, idx) = name.rsplit_once('-')?;
    if topic.is_empty() {
        return None;
    }
    idx.parse::<i32>().ok().map(|idx| (topic, idx))
}

impl PartitionRouter {
    /// Open the router, rediscovering existing topics from `<data_dir>`'s
    /// subdirectory names (spec §5: directory-name-based discovery on
    /// startup, since there is no separate metadata store).
    pub fn open(data_dir: &Path, defaults: LogConfig, now_ms: i64) -> Result<Self, RouterError> {
        std::fs::create_dir_all(data_dir)?;

        let mut by_topic: HashMap<String, Vec<i32>> = HashMap::new();
        for entry in std::fs::read_dir(data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((topic, partition)) = parse_partition_dir_name(name) {
                by_topic.entry(topic.to_string()).or_default().push(partition);
            }
        }

        let topics = DashMap::new();
        for (name, mut partition_ids) in by_topic {
            partition_ids.sort_unstable();
            let mut partitions = Vec::with_capacity(partition_ids.len());
            for &p in &partition_ids {
                let dir = partition_dir(data_dir, &name, p);
                let log = Log::open(&dir, name.clone(), p, defaults.clone(), now_ms)?;
                partitions.push(Arc::new(log));
            }
            let partition_count = partition_ids.len() as i32;
            topics.insert(
                name.clone(),
                Topic {
                    info: TopicInfo {
                        name,
                        partition_count,
                        configs: HashMap::new(),
                    },
                    partitions,
                },
            );
        }

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            defaults,
            topics,
        })
    }

    pub fn create_topic(
        &self,
        name: &str,
        partitions: i32,
        configs: HashMap<String, String>,
        now_ms: i64,
    ) -> Result<(), RouterError> {
        validate_topic_name(name).map_err(RouterError::InvalidTopic)?;
        if partitions < 1 {
            return Err(RouterError::InvalidPartitions(format!(
                "partition count must be >= 1, got {partitions}"
            )));
        }
        if let Some(existing) = self.topics.get(name) {
            if existing.info.partition_count == partitions {
                return Ok(());
            }
            return Err(RouterError::TopicAlreadyExists(name.to_string()));
        }

        let mut new_partitions = Vec::with_capacity(partitions as usize);
        for p in 0..partitions {
            let dir = partition_dir(&self.data_dir, name, p);
            let log = Log::open(&dir, name, p, self.defaults.clone(), now_ms)?;
            new_partitions.push(Arc::new(log));
        }

        match self.topics.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(RouterError::TopicAlreadyExists(name.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Topic {
                    info: TopicInfo {
                        name: name.to_string(),
                        partition_count: partitions,
                        configs,
                    },
                    partitions: new_partitions,
                });
                Ok(())
            }
        }
    }

    pub fn delete_topic(&self, name: &str) -> Result<(), RouterError> {
        let (_, topic) = self
            .topics
            .remove(name)
            .ok_or_else(|| RouterError::UnknownTopicOrPartition(name.to_string(), -1))?;
        drop(topic.partitions);
        for p in 0..topic.info.partition_count {
            let dir = partition_dir(&self.data_dir, name, p);
            std::fs::remove_dir_all(&dir).ok();
        }
        Ok(())
    }

    pub fn get(&self, topic: &str, partition: PartitionId) -> Result<Arc<Log>, RouterError> {
        let entry = self
            .topics
            .get(topic)
            .ok_or_else(|| RouterError::UnknownTopicOrPartition(topic.to_string(), partition))?;
        entry
            .partitions
            .get(partition as usize)
            .cloned()
            .ok_or_else(|| RouterError::UnknownTopicOrPartition(topic.to_string(), partition))
    }

    pub fn topic_info(&self, topic: &str) -> Option<TopicInfo> {
        self.topics.get(topic).map(|t| t.info.clone())
    }

    /// Merge `configs` into a topic's metadata (`AlterConfigs`). Only the
    /// advertised config map changes; segment/retention behavior for
    /// already-open partitions is fixed at `Log::open` time.
    pub fn alter_topic_configs(
        &self,
        topic: &str,
        configs: HashMap<String, Option<String>>,
    ) -> Result<(), RouterError> {
        let mut entry = self
            .topics
            .get_mut(topic)
            .ok_or_else(|| RouterError::UnknownTopicOrPartition(topic.to_string(), -1))?;
        for (key, value) in configs {
            match value {
                Some(v) => {
                    entry.info.configs.insert(key, v);
                }
                None => {
                    entry.info.configs.remove(&key);
                }
            }
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<TopicInfo> {
        self.topics.iter().map(|t| t.info.clone()).collect()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> LogConfig {
        LogConfig {
            max_segment_bytes: 1024 * 1024,
            max_segment_age_ms: 3600_000,
            index_interval_bytes: 4096,
        }
    }

    #[test]
    fn create_then_rediscover_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let router = PartitionRouter::open(dir.path(), defaults(), 0).unwrap();
            router
                .create_topic("orders", 3, HashMap::new(), 0)
                .unwrap();
            assert!(router.get("orders", 0).is_ok());
            assert!(router.get("orders", 2).is_ok());
            assert!(router.get("orders", 3).is_err());
        }
        let reopened = PartitionRouter::open(dir.path(), defaults(), 0).unwrap();
        let info = reopened.topic_info("orders").unwrap();
        assert_eq!(info.partition_count, 3);
    }

    #[test]
    fn identical_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let router = PartitionRouter::open(dir.path(), defaults(), 0).unwrap();
        router.create_topic("a", 1, HashMap::new(), 0).unwrap();
        router.create_topic("a", 1, HashMap::new(), 0).unwrap();
    }

    #[test]
    fn create_with_different_partition_count_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let router = PartitionRouter::open(dir.path(), defaults(), 0).unwrap();
        router.create_topic("a", 1, HashMap::new(), 0).unwrap();
        assert!(matches!(
            router.create_topic("a", 2, HashMap::new(), 0),
            Err(RouterError::TopicAlreadyExists(_))
        ));
    }

    #[test]
    fn delete_removes_topic_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let router = PartitionRouter::open(dir.path(), defaults(), 0).unwrap();
        router.create_topic("a", 2, HashMap::new(), 0).unwrap();
        router.delete_topic("a").unwrap();
        assert!(!router.contains("a"));
        assert!(router.get("a", 0).is_err());
    }

    #[test]
    fn alter_configs_merges_and_removes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let router = PartitionRouter::open(dir.path(), defaults(), 0).unwrap();
        let mut initial = HashMap::new();
        initial.insert("retention.ms".to_string(), "60000".to_string());
        router.create_topic("a", 1, initial, 0).unwrap();

        let mut changes = HashMap::new();
        changes.insert("retention.ms".to_string(), Some("120000".to_string()));
        changes.insert("cleanup.policy".to_string(), Some("compact".to_string()));
        router.alter_topic_configs("a", changes).unwrap();

        let info = router.topic_info("a").unwrap();
        assert_eq!(info.configs.get("retention.ms").unwrap(), "120000");
        assert_eq!(info.configs.get("cleanup.policy").unwrap(), "compact");

        let mut removal = HashMap::new();
        removal.insert("cleanup.policy".to_string(), None);
        router.alter_topic_configs("a", removal).unwrap();
        assert!(router.topic_info("a").unwrap().configs.get("cleanup.policy").is_none());
    }

    #[test]
    fn alter_configs_on_unknown_topic_fails() {
        let dir = tempfile::tempdir().unwrap();
        let router = PartitionRouter::open(dir.path(), defaults(), 0).unwrap();
        assert!(router.alter_topic_configs("ghost", HashMap::new()).is_err());
    }
}
