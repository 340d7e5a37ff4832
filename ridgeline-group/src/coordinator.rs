//! `GroupCoordinator`: owns every consumer group on this node, ticks
//! heartbeat/join-timer eviction, and (optionally) persists snapshots so
//! group membership metadata survives a restart. See spec §4.4/§6.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use ridgeline_common::config::GroupConfig;
use tokio_util::sync::CancellationToken;

use crate::group::{Group, GroupSnapshot, JoinGroupOutcome, JoinGroupRequest, OffsetEntry, SyncGroupOutcome};
use ridgeline_common::error::GroupError;

const SNAPSHOT_DIR: &str = "__groups";

/// Single-node coordinator: `FindCoordinator` always resolves to this node,
/// so its job is purely group lifecycle (create-on-first-touch, tick,
/// snapshot), not cluster membership.
pub struct GroupCoordinator {
    config: GroupConfig,
    data_dir: PathBuf,
    groups: DashMap<String, Arc<Group>>,
}

impl GroupCoordinator {
    /// Open the coordinator, best-effort reloading any `__groups/*.json`
    /// snapshots left from a previous run. A snapshot that fails to parse is
    /// skipped with a warning rather than failing startup.
    pub fn open(data_dir: &Path, config: GroupConfig) -> std::io::Result<Self> {
        let snapshot_dir = data_dir.join(SNAPSHOT_DIR);
        let groups = DashMap::new();

        if snapshot_dir.is_dir() {
            for entry in std::fs::read_dir(&snapshot_dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str::<GroupSnapshot>(&content) {
                        Ok(snap) => {
                            let id = snap.id.clone();
                            groups.insert(id, Arc::new(Group::from_snapshot(snap)));
                        }
                        Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable group snapshot"),
                    },
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to read group snapshot"),
                }
            }
        }

        Ok(Self {
            config,
            data_dir: data_dir.to_path_buf(),
            groups,
        })
    }

    /// `FindCoordinator`: groups are created lazily on first touch.
    pub fn get_or_create_group(&self, group_id: &str) -> Arc<Group> {
        self.groups
            .entry(group_id.to_string())
            .or_insert_with(|| Arc::new(Group::new(group_id)))
            .clone()
    }

    pub fn get_group(&self, group_id: &str) -> Option<Arc<Group>> {
        self.groups.get(group_id).map(|g| g.clone())
    }

    pub async fn join_group(
        &self,
        group_id: &str,
        req: JoinGroupRequest,
        now_ms: i64,
    ) -> Result<JoinGroupOutcome, GroupError> {
        let group = self.get_or_create_group(group_id);
        let outcome = group
            .join(
                req,
                self.config.min_session_timeout_ms,
                self.config.max_session_timeout_ms,
                now_ms,
            )
            .await;
        self.maybe_snapshot(group_id, &group);
        outcome
    }

    pub async fn sync_group(
        &self,
        group_id: &str,
        member_id: &str,
        generation: i32,
        leader_assignments: Option<std::collections::HashMap<String, Vec<u8>>>,
    ) -> Result<SyncGroupOutcome, GroupError> {
        let Some(group) = self.get_group(group_id) else {
            return Err(GroupError::CoordinatorNotAvailable);
        };
        let outcome = group.sync(member_id, generation, leader_assignments).await;
        self.maybe_snapshot(group_id, &group);
        outcome
    }

    pub fn heartbeat(&self, group_id: &str, member_id: &str, generation: i32, now_ms: i64) -> Result<(), GroupError> {
        let Some(group) = self.get_group(group_id) else {
            return Err(GroupError::CoordinatorNotAvailable);
        };
        group.heartbeat(member_id, generation, now_ms)
    }

    pub fn leave_group(&self, group_id: &str, member_id: &str, now_ms: i64) -> Result<(), GroupError> {
        let Some(group) = self.get_group(group_id) else {
            return Err(GroupError::CoordinatorNotAvailable);
        };
        let result = group.leave(member_id, now_ms);
        self.maybe_snapshot(group_id, &group);
        result
    }

    pub fn commit_offsets(&self, group_id: &str, commits: &[(String, i32, i64, String)], now_ms: i64) {
        let group = self.get_or_create_group(group_id);
        group.commit_offsets(commits, now_ms);
        self.maybe_snapshot(group_id, &group);
    }

    pub fn fetch_offsets(&self, group_id: &str, requested: &[(String, i32)]) -> Vec<(String, i32, Option<OffsetEntry>)> {
        match self.get_group(group_id) {
            Some(group) => group.fetch_offsets(requested),
            None => requested.iter().map(|(t, p)| (t.clone(), *p, None)).collect(),
        }
    }

    /// Snapshot groups only on a `Stable` transition, not on every call
    /// (spec §4.4 open-question resolution, see DESIGN.md).
    fn maybe_snapshot(&self, group_id: &str, group: &Group) {
        if !self.config.snapshot_enabled {
            return;
        }
        if group.state() != crate::group::GroupState::Stable {
            return;
        }
        self.write_snapshot(group_id, group);
    }

    fn write_snapshot(&self, group_id: &str, group: &Group) {
        let dir = self.data_dir.join(SNAPSHOT_DIR);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(error = %e, "failed to create group snapshot directory");
            return;
        }
        let path = dir.join(format!("{group_id}.json"));
        let snapshot = group.snapshot();
        match serde_json::to_vec_pretty(&snapshot) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&path, bytes) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to write group snapshot");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize group snapshot"),
        }
    }

    /// Run the coordinator tick loop until `cancel` fires: evicts stale
    /// members, fires overdue join timers, purges dead groups, and
    /// snapshots groups the tick changed.
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = std::time::Duration::from_millis(self.config.tick_interval_ms);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return,
            }
            self.tick();
        }
    }

    fn tick(&self) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut dead = Vec::new();
        for entry in self.groups.iter() {
            let (id, group) = (entry.key().clone(), entry.value().clone());
            let result = group.tick(now_ms, self.config.offset_retention_ms);
            if result.changed {
                self.maybe_snapshot(&id, &group);
            }
            if result.is_dead {
                dead.push(id);
            }
        }
        for id in dead {
            self.groups.remove(&id);
            let path = self.data_dir.join(SNAPSHOT_DIR).join(format!("{id}.json"));
            std::fs::remove_file(path).ok();
        }
    }

    pub fn list_groups(&self) -> Vec<String> {
        self.groups.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GroupConfig {
        GroupConfig {
            tick_interval_ms: 1000,
            min_session_timeout_ms: 0,
            max_session_timeout_ms: 600_000,
            offset_retention_ms: 3_600_000,
            snapshot_enabled: true,
        }
    }

    fn req(member_id: &str) -> JoinGroupRequest {
        JoinGroupRequest {
            member_id: member_id.to_string(),
            client_id: "c".to_string(),
            client_host: "127.0.0.1".to_string(),
            protocol_type: "consumer".to_string(),
            session_timeout_ms: 10_000,
            rebalance_timeout_ms: 30,
            protocols: vec![("range".to_string(), vec![])],
        }
    }

    #[tokio::test]
    async fn join_then_sync_snapshots_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = GroupCoordinator::open(dir.path(), config()).unwrap();
        coordinator.join_group("g1", req("m1"), 0).await.unwrap();

        let mut assignments = std::collections::HashMap::new();
        assignments.insert("m1".to_string(), vec![1, 2, 3]);
        coordinator.sync_group("g1", "m1", 1, Some(assignments)).await.unwrap();

        let path = dir.path().join("__groups").join("g1.json");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn reopen_rehydrates_group_from_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        {
            let coordinator = GroupCoordinator::open(dir.path(), config()).unwrap();
            coordinator.join_group("g1", req("m1"), 0).await.unwrap();
            let mut assignments = std::collections::HashMap::new();
            assignments.insert("m1".to_string(), vec![9]);
            coordinator.sync_group("g1", "m1", 1, Some(assignments)).await.unwrap();
        }
        let reopened = GroupCoordinator::open(dir.path(), config()).unwrap();
        assert!(reopened.get_group("g1").is_some());
        assert_eq!(reopened.get_group("g1").unwrap().generation(), 1);
    }

    #[tokio::test]
    async fn heartbeat_eviction_purges_dead_group_on_tick() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = GroupCoordinator::open(dir.path(), config()).unwrap();
        coordinator.join_group("g1", req("m1"), 0).await.unwrap();
        let mut assignments = std::collections::HashMap::new();
        assignments.insert("m1".to_string(), vec![]);
        coordinator.sync_group("g1", "m1", 1, Some(assignments)).await.unwrap();

        let group = coordinator.get_group("g1").unwrap();
        group.tick(100_000, config().offset_retention_ms);
        assert!(coordinator.get_group("g1").unwrap().state() == crate::group::GroupState::Dead);
    }
}
