//! End-to-end scenarios spanning the log, codec, group, and throttle
//! crates together, mirroring spec §8's concrete scenarios.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ridgeline_codec::compression::Compression;
use ridgeline_codec::record::{self, Record};
use ridgeline_group::{GroupCoordinator, JoinGroupOutcome, JoinGroupRequest, SyncGroupOutcome};
use ridgeline_log::{LogConfig, PartitionRouter};
use ridgeline_throttle::{Direction, Throttle};

fn log_config() -> LogConfig {
    LogConfig {
        max_segment_bytes: 1024 * 1024,
        max_segment_age_ms: 3_600_000,
        index_interval_bytes: 4096,
    }
}

fn sample_records() -> Vec<Record> {
    vec![
        Record {
            offset_delta: 0,
            timestamp_delta: 0,
            key: Some(b"k".to_vec()),
            value: Some(b"v1".to_vec()),
            headers: vec![],
        },
        Record {
            offset_delta: 1,
            timestamp_delta: 10,
            key: Some(b"k".to_vec()),
            value: Some(b"v2".to_vec()),
            headers: vec![],
        },
    ]
}

// -------------------------------------------------------------------------
// Scenario 1: round-trip a single batch through PartitionRouter + codec.
// -------------------------------------------------------------------------

#[test]
fn round_trip_single_batch_through_router() {
    let dir = tempfile::tempdir().unwrap();
    let router = PartitionRouter::open(dir.path(), log_config(), 0).unwrap();
    router.create_topic("t1", 1, HashMap::new(), 0).unwrap();
    let log = router.get("t1", 0).unwrap();

    let batch = record::encode_batch(&sample_records(), 1000, -1, -1, -1, Compression::None).unwrap();
    let (base_offset, _) = log.append(batch, 0).unwrap();
    assert_eq!(base_offset, 0);

    let slice = log.read(0, 1024 * 1024).unwrap();
    let decoded = record::decode_batch_records(&slice.data).unwrap();
    assert_eq!(decoded, sample_records());
}

// -------------------------------------------------------------------------
// Scenario 2: segment roll — produce enough batches to force multiple
// `.log` files, then fetch the whole range back in order.
// -------------------------------------------------------------------------

#[test]
fn segment_roll_then_full_fetch_returns_everything_in_order() {
    let mut config = log_config();
    config.max_segment_bytes = 4096;
    let dir = tempfile::tempdir().unwrap();
    let router = PartitionRouter::open(dir.path(), config, 0).unwrap();
    router.create_topic("t2", 1, HashMap::new(), 0).unwrap();
    let log = router.get("t2", 0).unwrap();

    for i in 0..100 {
        let records = vec![Record {
            offset_delta: 0,
            timestamp_delta: 0,
            key: None,
            value: Some(vec![i as u8; 60]),
            headers: vec![],
        }];
        let batch = record::encode_batch(&records, 1000 + i as i64, -1, -1, -1, Compression::None).unwrap();
        log.append(batch, 0).unwrap();
    }

    let log_files: Vec<_> = std::fs::read_dir(dir.path().join("t2-0"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("log"))
        .collect();
    assert!(log_files.len() >= 2, "expected at least two segments, got {}", log_files.len());

    let slice = log.read(0, 10 * 1024 * 1024).unwrap();
    let mut pos = 0;
    let mut count = 0;
    while pos < slice.data.len() {
        let header = ridgeline_log::batch::parse_batch_header(&slice.data[pos..]).unwrap();
        pos += header.total_len();
        count += 1;
    }
    assert_eq!(count, 100);
    assert_eq!(log.high_watermark(), 100);
}

// -------------------------------------------------------------------------
// Scenario 3: recovery after a torn write, exercised through the router so
// topic discovery on reopen is covered too.
// -------------------------------------------------------------------------

#[test]
fn recovery_after_torn_write_resumes_at_last_good_offset() {
    let dir = tempfile::tempdir().unwrap();
    {
        let router = PartitionRouter::open(dir.path(), log_config(), 0).unwrap();
        router.create_topic("t3", 1, HashMap::new(), 0).unwrap();
        let log = router.get("t3", 0).unwrap();
        for i in 0..10 {
            let records = vec![Record {
                offset_delta: 0,
                timestamp_delta: 0,
                key: None,
                value: Some(vec![i as u8; 8]),
                headers: vec![],
            }];
            let batch = record::encode_batch(&records, 1000, -1, -1, -1, Compression::None).unwrap();
            log.append(batch, 0).unwrap();
        }
    }

    let partition_dir = dir.path().join("t3-0");
    let log_file = std::fs::read_dir(&partition_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .find(|e| e.path().extension().and_then(|x| x.to_str()) == Some("log"))
        .unwrap()
        .path();
    let mut bytes = std::fs::read(&log_file).unwrap();
    bytes.truncate(bytes.len() - 5); // tear the final batch
    std::fs::write(&log_file, &bytes).unwrap();

    let router = PartitionRouter::open(dir.path(), log_config(), 0).unwrap();
    let log = router.get("t3", 0).unwrap();
    assert_eq!(log.high_watermark(), 9);

    let records = vec![Record {
        offset_delta: 0,
        timestamp_delta: 0,
        key: None,
        value: Some(b"fresh".to_vec()),
        headers: vec![],
    }];
    let batch = record::encode_batch(&records, 2000, -1, -1, -1, Compression::None).unwrap();
    let (base_offset, _) = log.append(batch, 0).unwrap();
    assert_eq!(base_offset, 9);
}

// -------------------------------------------------------------------------
// Scenario 4: three-member rebalance, then a leave that shrinks to two.
// -------------------------------------------------------------------------

fn join_request(member_id: &str, client_id: &str) -> JoinGroupRequest {
    JoinGroupRequest {
        member_id: member_id.to_string(),
        client_id: client_id.to_string(),
        client_host: "127.0.0.1".to_string(),
        protocol_type: "consumer".to_string(),
        session_timeout_ms: 10_000,
        rebalance_timeout_ms: 300,
        protocols: vec![("range".to_string(), Vec::new())],
    }
}

/// Simulate the client-side "range" assignor: partitions split as evenly
/// as possible across members sorted by member id.
fn range_assign(members: &[String], partitions: i32) -> HashMap<String, Vec<u8>> {
    let mut sorted = members.to_vec();
    sorted.sort();
    let per = partitions / sorted.len() as i32;
    let extra = partitions % sorted.len() as i32;
    let mut out = HashMap::new();
    let mut next = 0;
    for (i, member) in sorted.iter().enumerate() {
        let count = per + if (i as i32) < extra { 1 } else { 0 };
        let assigned: Vec<i32> = (next..next + count).collect();
        next += count;
        out.insert(member.clone(), assigned.iter().flat_map(|p| p.to_be_bytes()).collect());
    }
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_member_rebalance_then_leave_reassigns_evenly() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Arc::new(
        GroupCoordinator::open(dir.path(), ridgeline_common::config::GroupConfig::default()).unwrap(),
    );

    let mut joins = Vec::new();
    for (member_id, client_id) in [("m1", "c1"), ("m2", "c2"), ("m3", "c3")] {
        let coordinator = coordinator.clone();
        let req = join_request(member_id, client_id);
        joins.push(tokio::spawn(async move {
            coordinator.join_group("g1", req, 0).await.unwrap()
        }));
    }

    let mut generation = None;
    let mut leader = None;
    let mut protocol_name = None;
    let mut all_members = Vec::new();
    for handle in joins {
        match handle.await.unwrap() {
            JoinGroupOutcome::Joined {
                generation: g,
                leader_id,
                protocol_name: p,
                members,
                ..
            } => {
                generation = Some(g);
                leader = Some(leader_id);
                protocol_name = Some(p);
                if !members.is_empty() {
                    all_members = members.into_iter().map(|m| m.member_id).collect();
                }
            }
            JoinGroupOutcome::MemberIdRequired { .. } => panic!("unexpected empty member id"),
        }
    }
    let generation = generation.unwrap();
    let leader = leader.unwrap();
    assert_eq!(protocol_name.unwrap(), "range");
    assert_eq!(all_members.len(), 3, "leader should see the full roster");

    let assignments = range_assign(&all_members, 6);
    let mut syncs = Vec::new();
    for member_id in ["m1", "m2", "m3"] {
        let coordinator = coordinator.clone();
        let assignments_for_leader = if member_id == leader { Some(assignments.clone()) } else { None };
        let member_id = member_id.to_string();
        syncs.push(tokio::spawn(async move {
            coordinator
                .sync_group("g1", &member_id, generation, assignments_for_leader)
                .await
                .unwrap()
        }));
    }

    let mut partitions_seen = Vec::new();
    for handle in syncs {
        let SyncGroupOutcome { assignment } = handle.await.unwrap();
        assert_eq!(assignment.len(), 8, "two partitions * 4 bytes each");
        for chunk in assignment.chunks(4) {
            partitions_seen.push(i32::from_be_bytes(chunk.try_into().unwrap()));
        }
    }
    partitions_seen.sort_unstable();
    assert_eq!(partitions_seen, vec![0, 1, 2, 3, 4, 5]);

    // m3 leaves; the next round should hand two survivors three partitions each.
    coordinator.leave_group("g1", "m3", 0).unwrap();
    let new_generation = coordinator.get_group("g1").unwrap().generation();
    assert!(new_generation > generation);

    let mut second_joins = Vec::new();
    for (member_id, client_id) in [("m1", "c1"), ("m2", "c2")] {
        let coordinator = coordinator.clone();
        let req = join_request(member_id, client_id);
        second_joins.push(tokio::spawn(async move {
            coordinator.join_group("g1", req, 100).await.unwrap()
        }));
    }
    let mut second_leader = None;
    let mut second_generation = None;
    for handle in second_joins {
        if let JoinGroupOutcome::Joined { generation, leader_id, .. } = handle.await.unwrap() {
            second_generation = Some(generation);
            second_leader = Some(leader_id);
        }
    }
    let second_generation = second_generation.unwrap();
    let second_leader = second_leader.unwrap();

    let assignments = range_assign(&["m1".to_string(), "m2".to_string()], 6);
    let mut second_syncs = Vec::new();
    for member_id in ["m1", "m2"] {
        let coordinator = coordinator.clone();
        let for_leader = if member_id == second_leader { Some(assignments.clone()) } else { None };
        let member_id = member_id.to_string();
        second_syncs.push(tokio::spawn(async move {
            coordinator
                .sync_group("g1", &member_id, second_generation, for_leader)
                .await
                .unwrap()
        }));
    }
    for handle in second_syncs {
        let SyncGroupOutcome { assignment } = handle.await.unwrap();
        assert_eq!(assignment.len(), 12, "three partitions * 4 bytes each");
    }
}

// -------------------------------------------------------------------------
// Scenario 5: heartbeat eviction via the coordinator's tick.
// -------------------------------------------------------------------------

#[tokio::test]
async fn stale_heartbeat_evicts_member_and_stable_member_sees_rebalance() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ridgeline_common::config::GroupConfig::default();
    config.min_session_timeout_ms = 100;
    let coordinator = GroupCoordinator::open(dir.path(), config).unwrap();

    let mut req1 = join_request("m1", "c1");
    req1.session_timeout_ms = 500;
    let mut req2 = join_request("m2", "c2");
    req2.session_timeout_ms = 500;

    let coordinator = Arc::new(coordinator);
    let (c1, c2) = (coordinator.clone(), coordinator.clone());
    let (outcome1, outcome2) = tokio::join!(
        tokio::spawn(async move { c1.join_group("g1", req1, 0).await.unwrap() }),
        tokio::spawn(async move { c2.join_group("g1", req2, 0).await.unwrap() }),
    );
    let (generation, leader) = match outcome1.unwrap() {
        JoinGroupOutcome::Joined { generation, leader_id, .. } => (generation, leader_id),
        JoinGroupOutcome::MemberIdRequired { .. } => panic!("unexpected empty member id"),
    };
    match outcome2.unwrap() {
        JoinGroupOutcome::Joined { generation: g2, .. } => assert_eq!(g2, generation),
        JoinGroupOutcome::MemberIdRequired { .. } => panic!("unexpected empty member id"),
    }

    let assignments = range_assign(&["m1".to_string(), "m2".to_string()], 2);
    coordinator
        .sync_group("g1", &leader, generation, Some(assignments.clone()))
        .await
        .unwrap();
    let follower = if leader == "m1" { "m2" } else { "m1" };
    coordinator.sync_group("g1", follower, generation, None).await.unwrap();

    // m2 keeps heartbeating, m1 goes silent past its 500ms session timeout.
    coordinator.heartbeat("g1", "m2", generation, 400).unwrap();
    let group = coordinator.get_group("g1").unwrap();
    group.tick(600, 7 * 24 * 60 * 60 * 1000);

    let err = coordinator.heartbeat("g1", "m1", generation, 700);
    assert!(err.is_err(), "evicted member's heartbeat should fail");
}

// -------------------------------------------------------------------------
// Scenario 6: throttle delay under a tight produce loop.
// -------------------------------------------------------------------------

#[tokio::test]
async fn throttle_delays_until_the_configured_rate_is_respected() {
    let config = ridgeline_common::config::ThrottleConfig {
        producer_rate_bytes_per_sec: 100 * 1024,
        producer_burst_bytes: 100 * 1024,
        consumer_rate_bytes_per_sec: 0,
        consumer_burst_bytes: 0,
        feedback_enabled: false,
        feedback_interval_ms: 1000,
        target_utilization: 0.8,
        feedback_step: 0.1,
        min_rate_bytes_per_sec: 1024,
        max_rate_bytes_per_sec: 1024 * 1024,
    };
    let throttle = Throttle::new(config);
    let cancel = CancellationToken::new();

    let started = std::time::Instant::now();
    // 150 KB against a 100 KB/s, 100 KB burst bucket: first call drains the
    // burst, the second must wait roughly (150KB-100KB)/100KB/s = 0.5s.
    throttle.allow(Direction::Producer, 100 * 1024, &cancel).await.unwrap();
    throttle.allow(Direction::Producer, 50 * 1024, &cancel).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(450));
}

#[tokio::test]
async fn throttle_wait_is_cancellable() {
    let config = ridgeline_common::config::ThrottleConfig {
        producer_rate_bytes_per_sec: 1024,
        producer_burst_bytes: 1024,
        consumer_rate_bytes_per_sec: 0,
        consumer_burst_bytes: 0,
        feedback_enabled: false,
        feedback_interval_ms: 1000,
        target_utilization: 0.8,
        feedback_step: 0.1,
        min_rate_bytes_per_sec: 128,
        max_rate_bytes_per_sec: 1024 * 1024,
    };
    let throttle = Arc::new(Throttle::new(config));
    let cancel = CancellationToken::new();

    throttle.allow(Direction::Producer, 1024, &cancel).await.unwrap();

    let waiter_throttle = throttle.clone();
    let waiter_cancel = cancel.clone();
    let waiter = tokio::spawn(async move {
        waiter_throttle.allow(Direction::Producer, 1024 * 1024, &waiter_cancel).await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let result = waiter.await.unwrap();
    assert!(result.is_err(), "cancelled wait should return an error promptly");
}
