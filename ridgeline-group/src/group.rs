//! One consumer group's state machine: membership, rebalance protocol, and
//! its committed-offset store. See spec §4.4.

use std::collections::HashMap;

use parking_lot::Mutex;
use ridgeline_common::error::GroupError;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupState {
    Empty,
    PreparingRebalance,
    CompletingRebalance,
    Stable,
    Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberInfo {
    pub member_id: String,
    pub client_id: String,
    pub client_host: String,
    pub session_timeout_ms: u32,
    pub rebalance_timeout_ms: u32,
    pub protocols: Vec<(String, Vec<u8>)>,
    pub assignment: Vec<u8>,
    #[serde(skip)]
    joined_this_round: bool,
    last_heartbeat_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffsetEntry {
    pub offset: i64,
    pub metadata: String,
    pub commit_ms: i64,
}

#[derive(Debug, Clone)]
pub struct JoinGroupRequest {
    pub member_id: String,
    pub client_id: String,
    pub client_host: String,
    pub protocol_type: String,
    pub session_timeout_ms: u32,
    pub rebalance_timeout_ms: u32,
    /// `(protocolName, metadata)` pairs this member supports, in preference order.
    pub protocols: Vec<(String, Vec<u8>)>,
}

#[derive(Debug)]
pub enum JoinGroupOutcome {
    /// The client sent an empty member id; it must reissue JoinGroup with
    /// this generated id (Kafka convention, spec §4.4).
    MemberIdRequired { member_id: String },
    Joined {
        generation: i32,
        member_id: String,
        leader_id: String,
        protocol_name: String,
        /// Populated only for the leader; followers get an empty list and
        /// compute assignment out-of-band before calling SyncGroup.
        members: Vec<MemberInfo>,
    },
}

pub struct SyncGroupOutcome {
    pub assignment: Vec<u8>,
}

struct Inner {
    state: GroupState,
    generation: i32,
    protocol_type: Option<String>,
    protocol_name: Option<String>,
    leader_id: Option<String>,
    members: HashMap<String, MemberInfo>,
    /// Members known to the group when the current round began. Only this
    /// set gates the "everyone rejoined" fast path — brand-new members
    /// joining a from-scratch group can't be waited for by name before
    /// they've shown up, so a from-scratch round always rides out the join
    /// timer (mirrors Kafka's initial-rebalance-delay behavior).
    prior_members: std::collections::HashSet<String>,
    join_deadline_ms: i64,
    offsets: HashMap<(String, i32), OffsetEntry>,
    pending_error: Option<GroupError>,
}

/// A single consumer group. `join`/`sync` block the calling task (via
/// `tokio::sync::Notify`) until the rebalance round they're part of
/// resolves; `heartbeat`/`leave`/offset operations are synchronous.
pub struct Group {
    id: String,
    inner: Mutex<Inner>,
    join_notify: Notify,
    sync_notify: Notify,
}

impl Group {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: Mutex::new(Inner {
                state: GroupState::Empty,
                generation: 0,
                protocol_type: None,
                protocol_name: None,
                leader_id: None,
                members: HashMap::new(),
                prior_members: std::collections::HashSet::new(),
                join_deadline_ms: 0,
                offsets: HashMap::new(),
                pending_error: None,
            }),
            join_notify: Notify::new(),
            sync_notify: Notify::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> GroupState {
        self.inner.lock().state
    }

    pub fn generation(&self) -> i32 {
        self.inner.lock().generation
    }

    pub async fn join(
        &self,
        req: JoinGroupRequest,
        min_session_timeout_ms: u32,
        max_session_timeout_ms: u32,
        now_ms: i64,
    ) -> Result<JoinGroupOutcome, GroupError> {
        if req.session_timeout_ms < min_session_timeout_ms
            || req.session_timeout_ms > max_session_timeout_ms
        {
            return Err(GroupError::InvalidSessionTimeout);
        }
        if req.member_id.is_empty() {
            let member_id = format!("{}-{}", req.client_id, uuid::Uuid::new_v4());
            return Ok(JoinGroupOutcome::MemberIdRequired { member_id });
        }

        let member_id = req.member_id.clone();
        {
            let mut inner = self.inner.lock();
            inner.admit_join(req, now_ms);
            if inner.round_complete() {
                inner.complete_rebalance(&self.id, now_ms);
                self.join_notify.notify_waiters();
            }
        }

        // A round formed from scratch can never complete on `round_complete`
        // alone (there is nobody to compare the joiners against), so every
        // waiter also races the join timer and completes the round itself
        // if it fires first — this is what lets concurrent first-joiners of
        // a brand-new group batch into one generation.
        loop {
            let wait_ms = {
                let inner = self.inner.lock();
                if let Some(outcome) = inner.join_result_for(&member_id) {
                    return outcome;
                }
                (inner.join_deadline_ms - now_ms).max(0) as u64
            };

            let notified = self.join_notify.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(wait_ms)) => {
                    let mut inner = self.inner.lock();
                    if inner.state == GroupState::PreparingRebalance {
                        inner.complete_rebalance(&self.id, now_ms);
                        drop(inner);
                        self.join_notify.notify_waiters();
                    }
                }
            }
        }
    }

    pub async fn sync(
        &self,
        member_id: &str,
        generation: i32,
        leader_assignments: Option<HashMap<String, Vec<u8>>>,
    ) -> Result<SyncGroupOutcome, GroupError> {
        {
            let mut inner = self.inner.lock();
            if !inner.members.contains_key(member_id) {
                return Err(GroupError::UnknownMemberId);
            }
            if generation != inner.generation {
                return Err(GroupError::IllegalGeneration);
            }
            match inner.state {
                GroupState::Stable => {
                    let assignment = inner.members[member_id].assignment.clone();
                    return Ok(SyncGroupOutcome { assignment });
                }
                GroupState::PreparingRebalance => return Err(GroupError::RebalanceInProgress),
                GroupState::CompletingRebalance => {}
                GroupState::Empty | GroupState::Dead => return Err(GroupError::UnknownMemberId),
            }

            if inner.leader_id.as_deref() == Some(member_id) {
                let Some(assignments) = leader_assignments else {
                    return Err(GroupError::InconsistentProtocol);
                };
                for (id, assignment) in assignments {
                    if let Some(m) = inner.members.get_mut(&id) {
                        m.assignment = assignment;
                    }
                }
                inner.state = GroupState::Stable;
                self.sync_notify.notify_waiters();
                let assignment = inner.members[member_id].assignment.clone();
                return Ok(SyncGroupOutcome { assignment });
            }
        }

        loop {
            let notified = self.sync_notify.notified();
            {
                let inner = self.inner.lock();
                if inner.generation != generation {
                    return Err(GroupError::IllegalGeneration);
                }
                if inner.state == GroupState::Stable {
                    let assignment = inner
                        .members
                        .get(member_id)
                        .map(|m| m.assignment.clone())
                        .ok_or(GroupError::UnknownMemberId)?;
                    return Ok(SyncGroupOutcome { assignment });
                }
            }
            notified.await;
        }
    }

    pub fn heartbeat(&self, member_id: &str, generation: i32, now_ms: i64) -> Result<(), GroupError> {
        let mut inner = self.inner.lock();
        let state = inner.state;
        let Some(member) = inner.members.get_mut(member_id) else {
            return Err(GroupError::UnknownMemberId);
        };
        if generation != inner.generation {
            return Err(GroupError::IllegalGeneration);
        }
        member.last_heartbeat_ms = now_ms;
        match state {
            GroupState::PreparingRebalance | GroupState::CompletingRebalance => {
                Err(GroupError::RebalanceInProgress)
            }
            _ => Ok(()),
        }
    }

    pub fn leave(&self, member_id: &str, now_ms: i64) -> Result<(), GroupError> {
        let mut inner = self.inner.lock();
        if inner.members.remove(member_id).is_none() {
            return Err(GroupError::UnknownMemberId);
        }
        inner.begin_rebalance_or_empty(now_ms);
        if inner.round_complete() {
            inner.complete_rebalance(&self.id, now_ms);
        }
        self.join_notify.notify_waiters();
        self.sync_notify.notify_waiters();
        Ok(())
    }

    pub fn commit_offsets(&self, commits: &[(String, i32, i64, String)], now_ms: i64) {
        let mut inner = self.inner.lock();
        for (topic, partition, offset, metadata) in commits {
            inner.offsets.insert(
                (topic.clone(), *partition),
                OffsetEntry {
                    offset: *offset,
                    metadata: metadata.clone(),
                    commit_ms: now_ms,
                },
            );
        }
    }

    pub fn fetch_offsets(&self, requested: &[(String, i32)]) -> Vec<(String, i32, Option<OffsetEntry>)> {
        let inner = self.inner.lock();
        requested
            .iter()
            .map(|(topic, partition)| {
                let entry = inner.offsets.get(&(topic.clone(), *partition)).cloned();
                (topic.clone(), *partition, entry)
            })
            .collect()
    }

    pub fn all_offsets(&self) -> HashMap<(String, i32), OffsetEntry> {
        self.inner.lock().offsets.clone()
    }

    /// Coordinator tick: evict stale members, fire an overdue join timer, and
    /// report whether the group is now empty of members and offsets (so the
    /// coordinator can purge it). Returns `true` if state changed (used to
    /// decide whether to re-snapshot).
    pub fn tick(&self, now_ms: i64, offset_retention_ms: u64) -> TickResult {
        let mut inner = self.inner.lock();
        let mut changed = false;

        let evicted: Vec<String> = inner
            .members
            .iter()
            .filter(|(_, m)| now_ms - m.last_heartbeat_ms > m.session_timeout_ms as i64)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &evicted {
            inner.members.remove(id);
            ridgeline_common::metrics::record_member_evicted(&self.id);
            changed = true;
        }
        if !evicted.is_empty() {
            inner.begin_rebalance_or_empty(now_ms);
        }

        if inner.state == GroupState::PreparingRebalance
            && (inner.round_complete() || now_ms >= inner.join_deadline_ms)
        {
            inner.complete_rebalance(&self.id, now_ms);
            changed = true;
        }

        inner.offsets.retain(|_, o| now_ms - o.commit_ms <= offset_retention_ms as i64);

        if inner.members.is_empty() && inner.state != GroupState::Dead {
            inner.state = if inner.offsets.is_empty() {
                GroupState::Dead
            } else {
                GroupState::Empty
            };
            changed = true;
        }

        if changed {
            self.join_notify.notify_waiters();
            self.sync_notify.notify_waiters();
        }

        TickResult {
            changed,
            is_dead: inner.state == GroupState::Dead,
        }
    }

    pub fn snapshot(&self) -> GroupSnapshot {
        let inner = self.inner.lock();
        GroupSnapshot {
            id: self.id.clone(),
            state: inner.state,
            generation: inner.generation,
            protocol_type: inner.protocol_type.clone(),
            protocol_name: inner.protocol_name.clone(),
            leader_id: inner.leader_id.clone(),
            members: inner.members.values().cloned().collect(),
            offsets: inner
                .offsets
                .iter()
                .map(|((t, p), e)| OffsetSnapshotEntry {
                    topic: t.clone(),
                    partition: *p,
                    entry: e.clone(),
                })
                .collect(),
        }
    }

    pub fn from_snapshot(snap: GroupSnapshot) -> Self {
        let group = Self::new(snap.id);
        let mut inner = group.inner.lock();
        inner.state = snap.state;
        inner.generation = snap.generation;
        inner.protocol_type = snap.protocol_type;
        inner.protocol_name = snap.protocol_name;
        inner.leader_id = snap.leader_id;
        inner.members = snap.members.into_iter().map(|m| (m.member_id.clone(), m)).collect();
        inner.offsets = snap
            .offsets
            .into_iter()
            .map(|e| ((e.topic, e.partition), e.entry))
            .collect();
        drop(inner);
        group
    }
}

pub struct TickResult {
    pub changed: bool,
    pub is_dead: bool,
}

impl Inner {
    fn admit_join(&mut self, req: JoinGroupRequest, now_ms: i64) {
        self.begin_rebalance_if_idle(now_ms);

        let assignment = self.members.get(&req.member_id).map(|m| m.assignment.clone()).unwrap_or_default();
        self.members.insert(
            req.member_id.clone(),
            MemberInfo {
                member_id: req.member_id,
                client_id: req.client_id,
                client_host: req.client_host,
                session_timeout_ms: req.session_timeout_ms,
                rebalance_timeout_ms: req.rebalance_timeout_ms,
                protocols: req.protocols,
                assignment,
                joined_this_round: true,
                last_heartbeat_ms: now_ms,
            },
        );
        self.protocol_type.get_or_insert(req.protocol_type);

        self.join_deadline_ms = self
            .members
            .values()
            .map(|m| now_ms + m.rebalance_timeout_ms as i64)
            .max()
            .unwrap_or(now_ms);
    }

    /// A brand-new rebalance round starts whenever a join arrives and the
    /// group isn't already mid-round; existing members must (re)join this
    /// round too, or they're dropped when the round resolves.
    fn begin_rebalance_if_idle(&mut self, now_ms: i64) {
        if self.state != GroupState::PreparingRebalance {
            self.state = GroupState::PreparingRebalance;
            self.prior_members = self.members.keys().cloned().collect();
            for m in self.members.values_mut() {
                m.joined_this_round = false;
            }
            self.join_deadline_ms = now_ms;
        }
    }

    fn begin_rebalance_or_empty(&mut self, now_ms: i64) {
        if self.members.is_empty() {
            self.state = if self.offsets.is_empty() {
                GroupState::Dead
            } else {
                GroupState::Empty
            };
        } else {
            self.begin_rebalance_if_idle(now_ms);
            // `leave` counts as this round already having happened for
            // whoever is left; only fresh joiners need to re-signal.
            for m in self.members.values_mut() {
                m.joined_this_round = true;
            }
        }
    }

    /// Only the members the group already knew about when this round began
    /// gate early completion; members joining a from-scratch round (nobody
    /// prior) can only resolve via the join timer in `join`/`tick`.
    fn round_complete(&self) -> bool {
        self.state == GroupState::PreparingRebalance
            && !self.prior_members.is_empty()
            && self
                .prior_members
                .iter()
                .all(|id| self.members.get(id).is_some_and(|m| m.joined_this_round))
    }

    /// Drop slow joiners, elect a leader, negotiate a common protocol, bump
    /// the generation, and move to `CompletingRebalance` (spec §4.4).
    fn complete_rebalance(&mut self, group_id: &str, now_ms: i64) {
        self.members.retain(|_, m| m.joined_this_round);

        if self.members.is_empty() {
            self.state = GroupState::Empty;
            return;
        }

        let leader_id = self.members.keys().min().cloned().unwrap();
        let protocol_name = negotiate_protocol(self.members.values());

        let Some(protocol_name) = protocol_name else {
            self.pending_error = Some(GroupError::InconsistentProtocol);
            self.members.clear();
            self.state = GroupState::Empty;
            return;
        };

        self.leader_id = Some(leader_id);
        self.protocol_name = Some(protocol_name);
        self.generation += 1;
        self.state = GroupState::CompletingRebalance;
        self.pending_error = None;
        let _ = now_ms;

        ridgeline_common::metrics::record_rebalance(group_id);
        ridgeline_common::metrics::set_group_generation(group_id, self.generation);
    }

    fn join_result_for(&self, member_id: &str) -> Option<Result<JoinGroupOutcome, GroupError>> {
        if !self.members.contains_key(member_id) {
            return Some(Err(self.pending_error.unwrap_or(GroupError::UnknownMemberId)));
        }
        if self.state == GroupState::PreparingRebalance {
            return None;
        }
        let leader_id = self.leader_id.clone().unwrap_or_default();
        let protocol_name = self.protocol_name.clone().unwrap_or_default();
        let members = if leader_id == member_id {
            self.members.values().cloned().collect()
        } else {
            Vec::new()
        };
        Some(Ok(JoinGroupOutcome::Joined {
            generation: self.generation,
            member_id: member_id.to_string(),
            leader_id,
            protocol_name,
            members,
        }))
    }
}

/// Pick the protocol every member supports; break ties by vote count (each
/// member "votes" for the first protocol in its own list that is common to
/// all), then by name.
fn negotiate_protocol<'a>(members: impl Iterator<Item = &'a MemberInfo> + Clone) -> Option<String> {
    let mut common: Option<std::collections::HashSet<&str>> = None;
    for m in members.clone() {
        let names: std::collections::HashSet<&str> =
            m.protocols.iter().map(|(n, _)| n.as_str()).collect();
        common = Some(match common {
            None => names,
            Some(existing) => existing.intersection(&names).copied().collect(),
        });
    }
    let common = common?;
    if common.is_empty() {
        return None;
    }

    let mut votes: HashMap<&str, usize> = HashMap::new();
    for m in members {
        if let Some((name, _)) = m.protocols.iter().find(|(n, _)| common.contains(n.as_str())) {
            *votes.entry(name.as_str()).or_insert(0) += 1;
        }
    }

    votes
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(name, _)| name.to_string())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OffsetSnapshotEntry {
    pub topic: String,
    pub partition: i32,
    pub entry: OffsetEntry,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub id: String,
    pub state: GroupState,
    pub generation: i32,
    pub protocol_type: Option<String>,
    pub protocol_name: Option<String>,
    pub leader_id: Option<String>,
    pub members: Vec<MemberInfo>,
    pub offsets: Vec<OffsetSnapshotEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(member_id: &str, protocols: &[&str]) -> JoinGroupRequest {
        req_with_timeout(member_id, protocols, 10_000)
    }

    fn req_with_timeout(member_id: &str, protocols: &[&str], rebalance_timeout_ms: u32) -> JoinGroupRequest {
        JoinGroupRequest {
            member_id: member_id.to_string(),
            client_id: "client".to_string(),
            client_host: "127.0.0.1".to_string(),
            protocol_type: "consumer".to_string(),
            session_timeout_ms: 10_000,
            rebalance_timeout_ms,
            protocols: protocols.iter().map(|p| (p.to_string(), vec![])).collect(),
        }
    }

    #[tokio::test]
    async fn empty_member_id_returns_generated_id() {
        let group = Group::new("g1");
        let outcome = group
            .join(req("", &["range"]), 0, 600_000, 0)
            .await
            .unwrap();
        assert!(matches!(outcome, JoinGroupOutcome::MemberIdRequired { .. }));
    }

    #[tokio::test]
    async fn single_member_completes_rebalance_once_join_timer_fires() {
        let group = Group::new("g1");
        // A from-scratch round has no prior membership to compare against,
        // so it always rides out the join timer (kept short so the test
        // doesn't actually wait 10s).
        let outcome = group
            .join(req_with_timeout("m1", &["range"], 30), 0, 600_000, 0)
            .await
            .unwrap();
        match outcome {
            JoinGroupOutcome::Joined { leader_id, generation, protocol_name, members, .. } => {
                assert_eq!(leader_id, "m1");
                assert_eq!(generation, 1);
                assert_eq!(protocol_name, "range");
                assert_eq!(members.len(), 1);
            }
            _ => panic!("expected Joined"),
        }
        assert_eq!(group.state(), GroupState::CompletingRebalance);
    }

    #[tokio::test]
    async fn two_members_wait_for_each_other_then_elect_lowest_id_leader() {
        let group = Group::new("g1");
        let g = &group;
        let (a, b) = tokio::join!(
            g.join(req_with_timeout("m-b", &["range"], 30), 0, 600_000, 0),
            g.join(req_with_timeout("m-a", &["range"], 30), 0, 600_000, 0),
        );
        let a = a.unwrap();
        let b = b.unwrap();
        for outcome in [a, b] {
            match outcome {
                JoinGroupOutcome::Joined { leader_id, generation, .. } => {
                    assert_eq!(leader_id, "m-a");
                    assert_eq!(generation, 1);
                }
                _ => panic!("expected Joined"),
            }
        }
    }

    #[tokio::test]
    async fn sync_group_distributes_leader_assignments() {
        let group = Group::new("g1");
        group.join(req_with_timeout("m1", &["range"], 30), 0, 600_000, 0).await.unwrap();

        let mut assignments = HashMap::new();
        assignments.insert("m1".to_string(), b"assign-m1".to_vec());
        let outcome = group.sync("m1", 1, Some(assignments)).await.unwrap();
        assert_eq!(outcome.assignment, b"assign-m1");
        assert_eq!(group.state(), GroupState::Stable);
    }

    #[tokio::test]
    async fn heartbeat_unknown_member_is_rejected() {
        let group = Group::new("g1");
        assert_eq!(group.heartbeat("ghost", 0, 0), Err(GroupError::UnknownMemberId));
    }

    #[tokio::test]
    async fn leave_last_member_empties_group() {
        let group = Group::new("g1");
        group.join(req_with_timeout("m1", &["range"], 30), 0, 600_000, 0).await.unwrap();
        group.leave("m1", 0).unwrap();
        assert_eq!(group.state(), GroupState::Dead);
    }

    #[tokio::test]
    async fn tick_evicts_expired_heartbeat() {
        let group = Group::new("g1");
        group.join(req_with_timeout("m1", &["range"], 30), 0, 600_000, 0).await.unwrap();
        let mut assignments = HashMap::new();
        assignments.insert("m1".to_string(), vec![]);
        group.sync("m1", 1, Some(assignments)).await.unwrap();

        let result = group.tick(20_000, 3600_000);
        assert!(result.changed);
        assert_eq!(group.state(), GroupState::Dead);
    }
}
