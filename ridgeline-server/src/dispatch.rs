//! Per-API request handling: decode a frame's body, run it against the
//! broker's storage/group/throttle state, and write the response (spec
//! §4.5 "APIHandler"). Dispatch itself is a pure function of `(apiKey,
//! apiVersion)`; everything it needs is reached through [`Broker`].
//!
//! Fetch is the one exception to "decode, execute, encode, write": its
//! response is split into a small header/prelude (written through the
//! ordinary buffer) followed by each partition's raw record bytes, streamed
//! straight from disk to the socket (`PeerStream::stream_range`). Every
//! other API returns its whole body as one `BytesMut`.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio_util::sync::CancellationToken;

use ridgeline_codec::api::error_code;
use ridgeline_codec::header::{RequestHeader, ResponseHeader};
use ridgeline_codec::messages::*;
use ridgeline_codec::record;
use ridgeline_common::error::AuthError;
use ridgeline_group::JoinGroupRequest as GroupJoinRequest;
use ridgeline_log::{LogError, RouterError, SegmentRange};
use ridgeline_security::{SaslOutcome, SaslSession, SUPPORTED_MECHANISMS};
use ridgeline_throttle::Direction;

use crate::broker::Broker;
use crate::connection::PeerStream;

const API_PRODUCE: i16 = 0;
const API_FETCH: i16 = 1;
const API_LIST_OFFSETS: i16 = 2;
const API_METADATA: i16 = 3;
const API_OFFSET_COMMIT: i16 = 8;
const API_OFFSET_FETCH: i16 = 9;
const API_FIND_COORDINATOR: i16 = 10;
const API_JOIN_GROUP: i16 = 11;
const API_HEARTBEAT: i16 = 12;
const API_LEAVE_GROUP: i16 = 13;
const API_SYNC_GROUP: i16 = 14;
const API_SASL_HANDSHAKE: i16 = 17;
const API_API_VERSIONS: i16 = 18;
const API_CREATE_TOPICS: i16 = 19;
const API_DELETE_TOPICS: i16 = 20;
const API_DESCRIBE_CONFIGS: i16 = 32;
const API_ALTER_CONFIGS: i16 = 33;
const API_SASL_AUTHENTICATE: i16 = 36;

const RESOURCE_TYPE_TOPIC: i8 = 2;

/// Per-connection SASL state. Built once when a connection is accepted and
/// never shared across connections or tasks (spec §4.6).
pub struct ConnState {
    sasl: Option<SaslSession>,
    authenticated: bool,
    client_host: String,
}

impl ConnState {
    pub fn new(broker: &Broker, client_host: String) -> Self {
        let sasl = if broker.sasl_enabled {
            broker.authenticator.clone().map(SaslSession::new)
        } else {
            None
        };
        // With SASL disabled, every connection is implicitly authenticated.
        let authenticated = !broker.sasl_enabled;
        Self {
            sasl,
            authenticated,
            client_host,
        }
    }
}

enum Handled {
    Response(BytesMut),
    /// `acks=0` Produce: no response frame is written at all.
    Suppressed,
}

/// Dispatch one request frame and write its response (or nothing, for
/// `acks=0` Produce) to `peer`. Only I/O failures and throttle-wait
/// cancellation propagate as `Err`; every other failure becomes a
/// well-formed response carrying an inline error code.
pub async fn dispatch(
    broker: &Arc<Broker>,
    header: &RequestHeader,
    body: &mut BytesMut,
    state: &mut ConnState,
    peer: &mut PeerStream,
    cancel: &CancellationToken,
) -> io::Result<()> {
    ridgeline_common::metrics::record_request(header.api_key, header.api_version);
    let started = std::time::Instant::now();

    if !ridgeline_codec::api::is_supported(header.api_key, header.api_version) {
        write_response(peer, header.correlation_id, &error_body(error_code::UNSUPPORTED_VERSION)).await?;
        return Ok(());
    }

    if gate_requires_authentication(broker, state, header.api_key) {
        write_response(peer, header.correlation_id, &error_body(error_code::ILLEGAL_SASL_STATE)).await?;
        return Ok(());
    }

    let result = if header.api_key == API_FETCH {
        handle_fetch(broker, header, body, peer, cancel).await?;
        None
    } else {
        Some(dispatch_buffered(broker, header, body, state, cancel).await?)
    };

    ridgeline_common::metrics::record_request_latency_us(header.api_key, started.elapsed().as_micros() as f64);

    match result {
        None => Ok(()),
        Some(Handled::Suppressed) => Ok(()),
        Some(Handled::Response(body)) => write_response(peer, header.correlation_id, &body).await,
    }
}

/// SASL gating: once enabled, every API except the bootstrap trio must wait
/// for a completed handshake (mirrors Kafka's own `ILLEGAL_SASL_STATE`
/// convention for out-of-order requests).
fn gate_requires_authentication(broker: &Broker, state: &ConnState, api_key: i16) -> bool {
    broker.sasl_enabled
        && !state.authenticated
        && !matches!(api_key, API_API_VERSIONS | API_SASL_HANDSHAKE | API_SASL_AUTHENTICATE)
}

fn error_body(code: i16) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_i16(code);
    buf
}

async fn write_response(peer: &mut PeerStream, correlation_id: i32, body: &[u8]) -> io::Result<()> {
    let mut framed = BytesMut::with_capacity(4 + body.len());
    ResponseHeader { correlation_id }.encode(&mut framed);
    framed.extend_from_slice(body);
    peer.write_frame(&framed).await
}

fn router_error_code(e: RouterError) -> i16 {
    let common: ridgeline_common::Error = e.into();
    match common {
        ridgeline_common::Error::Storage(se) => error_code::from_storage_error(&se),
        _ => error_code::CORRUPT_MESSAGE,
    }
}

fn log_error_code(e: LogError) -> i16 {
    let common: ridgeline_common::Error = e.into();
    match common {
        ridgeline_common::Error::Storage(se) => error_code::from_storage_error(&se),
        _ => error_code::CORRUPT_MESSAGE,
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn dispatch_buffered(
    broker: &Arc<Broker>,
    header: &RequestHeader,
    body: &mut BytesMut,
    state: &mut ConnState,
    cancel: &CancellationToken,
) -> io::Result<Handled> {
    let now = now_ms();
    let client_id = header.client_id.clone().unwrap_or_default();

    macro_rules! decode_or_corrupt {
        ($ty:ty) => {
            match <$ty>::decode(body) {
                Ok(r) => r,
                Err(_) => return Ok(Handled::Response(error_body(error_code::CORRUPT_MESSAGE))),
            }
        };
    }

    let response = match header.api_key {
        API_PRODUCE => return handle_produce(broker, body, cancel).await,
        API_LIST_OFFSETS => {
            let req = decode_or_corrupt!(ListOffsetsRequest);
            encode(&handle_list_offsets(broker, req))
        }
        API_METADATA => {
            let req = decode_or_corrupt!(MetadataRequest);
            encode(&handle_metadata(broker, req))
        }
        API_OFFSET_COMMIT => {
            let req = decode_or_corrupt!(OffsetCommitRequest);
            encode(&handle_offset_commit(broker, req, now))
        }
        API_OFFSET_FETCH => {
            let req = decode_or_corrupt!(OffsetFetchRequest);
            encode(&handle_offset_fetch(broker, req))
        }
        API_FIND_COORDINATOR => {
            let req = decode_or_corrupt!(FindCoordinatorRequest);
            encode(&handle_find_coordinator(broker, req))
        }
        API_JOIN_GROUP => {
            let req = decode_or_corrupt!(JoinGroupRequest);
            encode(&handle_join_group(broker, req, &client_id, &state.client_host, now).await)
        }
        API_SYNC_GROUP => {
            let req = decode_or_corrupt!(SyncGroupRequest);
            encode(&handle_sync_group(broker, req).await)
        }
        API_HEARTBEAT => {
            let req = decode_or_corrupt!(HeartbeatRequest);
            encode(&handle_heartbeat(broker, req, now))
        }
        API_LEAVE_GROUP => {
            let req = decode_or_corrupt!(LeaveGroupRequest);
            encode(&handle_leave_group(broker, req, now))
        }
        API_SASL_HANDSHAKE => {
            let req = decode_or_corrupt!(SaslHandshakeRequest);
            encode(&handle_sasl_handshake(state, req))
        }
        API_SASL_AUTHENTICATE => {
            let req = decode_or_corrupt!(SaslAuthenticateRequest);
            encode(&handle_sasl_authenticate(state, req).await)
        }
        API_API_VERSIONS => encode(&handle_api_versions()),
        API_CREATE_TOPICS => {
            let req = decode_or_corrupt!(CreateTopicsRequest);
            encode(&handle_create_topics(broker, req, now))
        }
        API_DELETE_TOPICS => {
            let req = decode_or_corrupt!(DeleteTopicsRequest);
            encode(&handle_delete_topics(broker, req))
        }
        API_DESCRIBE_CONFIGS => {
            let req = decode_or_corrupt!(DescribeConfigsRequest);
            encode(&handle_describe_configs(broker, req))
        }
        API_ALTER_CONFIGS => {
            let req = decode_or_corrupt!(AlterConfigsRequest);
            encode(&handle_alter_configs(broker, req))
        }
        _ => error_body(error_code::UNSUPPORTED_VERSION),
    };

    Ok(Handled::Response(response))
}

/// Every response type above exposes `encode(&self, buf: &mut impl BufMut)`;
/// this just runs it into a fresh buffer.
fn encode(response: &impl Encodable) -> BytesMut {
    let mut buf = BytesMut::new();
    response.encode(&mut buf);
    buf
}

trait Encodable {
    fn encode(&self, buf: &mut BytesMut);
}

macro_rules! impl_encodable {
    ($t:ty) => {
        impl Encodable for $t {
            fn encode(&self, buf: &mut BytesMut) {
                <$t>::encode(self, buf)
            }
        }
    };
}

impl_encodable!(ListOffsetsResponse);
impl_encodable!(MetadataResponse);
impl_encodable!(OffsetCommitResponse);
impl_encodable!(OffsetFetchResponse);
impl_encodable!(FindCoordinatorResponse);
impl_encodable!(JoinGroupResponse);
impl_encodable!(SyncGroupResponse);
impl_encodable!(HeartbeatResponse);
impl_encodable!(LeaveGroupResponse);
impl_encodable!(SaslHandshakeResponse);
impl_encodable!(SaslAuthenticateResponse);
impl_encodable!(ApiVersionsResponse);
impl_encodable!(CreateTopicsResponse);
impl_encodable!(DeleteTopicsResponse);
impl_encodable!(DescribeConfigsResponse);
impl_encodable!(AlterConfigsResponse);
impl_encodable!(ProduceResponse);

// ----------------------------------------------------------------- Produce

async fn handle_produce(broker: &Arc<Broker>, body: &mut BytesMut, cancel: &CancellationToken) -> io::Result<Handled> {
    let req = match ProduceRequest::decode(body) {
        Ok(r) => r,
        Err(_) => return Ok(Handled::Response(error_body(error_code::CORRUPT_MESSAGE))),
    };
    let now = now_ms();
    let mut total_bytes: u64 = 0;
    let mut topics = Vec::with_capacity(req.topics.len());

    for t in req.topics {
        let mut partitions = Vec::with_capacity(t.partitions.len());
        for p in t.partitions {
            let record_len = p.records.len() as u64;
            let (error_code, base_offset, log_append_time_ms, log_start_offset) =
                match produce_one(broker, &t.name, p.index, p.records, now) {
                    Ok((base_offset, log_start_offset)) => {
                        total_bytes += record_len;
                        (error_code::NONE, base_offset, now, log_start_offset)
                    }
                    Err(code) => (code, -1, -1, -1),
                };
            partitions.push(ProducePartitionResult {
                index: p.index,
                error_code,
                base_offset,
                log_append_time_ms,
                log_start_offset,
            });
        }
        topics.push(ProduceTopicResult { name: t.name, partitions });
    }

    if broker.throttle.allow(Direction::Producer, total_bytes, cancel).await.is_err() {
        return Err(io::Error::new(io::ErrorKind::Other, "throttle wait cancelled"));
    }

    if req.acks == 0 {
        return Ok(Handled::Suppressed);
    }

    let response = ProduceResponse { topics, throttle_time_ms: 0 };
    Ok(Handled::Response(encode(&response)))
}

/// Validate the batch decodes (catching corrupt framing/compression before
/// it reaches disk) then hand the original, still-possibly-compressed bytes
/// to storage, which never interprets record contents (spec §4.1/§4.5).
fn produce_one(broker: &Arc<Broker>, topic: &str, partition: i32, records: Vec<u8>, now: i64) -> Result<(i64, i64), i16> {
    let log = broker.router.get(topic, partition).map_err(router_error_code)?;
    if record::decode_batch_records(&records).is_err() {
        return Err(error_code::CORRUPT_MESSAGE);
    }
    let (base_offset, _) = log.append(records, now).map_err(log_error_code)?;
    Ok((base_offset, log.earliest_offset()))
}

// ------------------------------------------------------------------- Fetch

async fn handle_fetch(
    broker: &Arc<Broker>,
    header: &RequestHeader,
    body: &mut BytesMut,
    peer: &mut PeerStream,
    cancel: &CancellationToken,
) -> io::Result<()> {
    let req = match FetchRequest::decode(body) {
        Ok(r) => r,
        Err(_) => return write_response(peer, header.correlation_id, &error_body(error_code::CORRUPT_MESSAGE)).await,
    };

    struct PartitionFetch {
        index: i32,
        error_code: i16,
        high_watermark: i64,
        range: Option<SegmentRange>,
    }

    let mut topics: Vec<(String, Vec<PartitionFetch>)> = Vec::with_capacity(req.topics.len());
    let mut total_record_bytes: u64 = 0;

    for t in &req.topics {
        let mut partitions = Vec::with_capacity(t.partitions.len());
        for p in &t.partitions {
            let (error_code, high_watermark, range) = match broker.router.get(&t.name, p.index) {
                Ok(log) => {
                    let max_bytes = p.partition_max_bytes.max(0) as usize;
                    match log.read_descriptor(p.fetch_offset, max_bytes) {
                        Ok(desc) => (error_code::NONE, desc.high_watermark, desc.range),
                        Err(e) => (log_error_code(e), 0, None),
                    }
                }
                Err(e) => (router_error_code(e), 0, None),
            };
            if let Some(r) = &range {
                total_record_bytes += r.length as u64;
            }
            partitions.push(PartitionFetch {
                index: p.index,
                error_code,
                high_watermark,
                range,
            });
        }
        topics.push((t.name.clone(), partitions));
    }

    if broker.throttle.allow(Direction::Consumer, total_record_bytes, cancel).await.is_err() {
        return Err(io::Error::new(io::ErrorKind::Other, "throttle wait cancelled"));
    }

    let response = FetchResponse {
        throttle_time_ms: 0,
        topics: topics
            .iter()
            .map(|(name, partitions)| FetchTopicResult {
                name: name.clone(),
                partitions: partitions
                    .iter()
                    .map(|p| FetchPartitionResult {
                        index: p.index,
                        error_code: p.error_code,
                        high_watermark: p.high_watermark,
                        records: FetchRecords::LengthOnly(p.range.as_ref().map(|r| r.length).unwrap_or(0)),
                    })
                    .collect(),
            })
            .collect(),
    };

    let mut prelude = BytesMut::new();
    response.encode_prelude(&mut prelude);

    let mut framed_header = BytesMut::with_capacity(4);
    framed_header.put_i32(header.correlation_id);

    let total_len = framed_header.len() + prelude.len() + total_record_bytes as usize;
    peer.write_raw(&(total_len as i32).to_be_bytes()).await?;
    peer.write_raw(&framed_header).await?;
    peer.write_raw(&prelude).await?;

    for (_, partitions) in &topics {
        for p in partitions {
            if let Some(range) = &p.range {
                peer.stream_range(range).await?;
            }
        }
    }
    peer.flush().await
}

// ------------------------------------------------------------- ListOffsets

fn handle_list_offsets(broker: &Arc<Broker>, req: ListOffsetsRequest) -> ListOffsetsResponse {
    const LATEST: i64 = -1;
    const EARLIEST: i64 = -2;

    let topics = req
        .topics
        .into_iter()
        .map(|t| {
            let partitions = t
                .partitions
                .into_iter()
                .map(|p| {
                    let (error_code, offset) = match broker.router.get(&t.name, p.index) {
                        Ok(log) => {
                            let offset = match p.timestamp {
                                LATEST => log.high_watermark(),
                                EARLIEST => log.earliest_offset(),
                                ts => log.read_by_time(ts).unwrap_or_else(|| log.high_watermark()),
                            };
                            (error_code::NONE, offset)
                        }
                        Err(e) => (router_error_code(e), -1),
                    };
                    ListOffsetsPartitionResult {
                        index: p.index,
                        error_code,
                        timestamp: p.timestamp,
                        offset,
                    }
                })
                .collect();
            ListOffsetsTopicResult { name: t.name, partitions }
        })
        .collect();

    ListOffsetsResponse { topics }
}

// ---------------------------------------------------------------- Metadata

fn handle_metadata(broker: &Arc<Broker>, req: MetadataRequest) -> MetadataResponse {
    let names = req.topics.unwrap_or_else(|| broker.router.list().into_iter().map(|t| t.name).collect());

    let topics = names
        .into_iter()
        .map(|name| match broker.router.topic_info(&name) {
            Some(info) => {
                let partitions = (0..info.partition_count)
                    .map(|index| MetadataPartitionResult {
                        error_code: error_code::NONE,
                        index,
                        leader_id: broker.node_id,
                        replica_nodes: vec![broker.node_id],
                        isr_nodes: vec![broker.node_id],
                    })
                    .collect();
                MetadataTopicResult {
                    error_code: error_code::NONE,
                    name,
                    partitions,
                }
            }
            None => MetadataTopicResult {
                error_code: error_code::UNKNOWN_TOPIC_OR_PARTITION,
                name,
                partitions: Vec::new(),
            },
        })
        .collect();

    MetadataResponse {
        node_id: broker.node_id,
        host: broker.advertised_host.clone(),
        port: broker.advertised_port,
        topics,
    }
}

// ------------------------------------------------------------ OffsetCommit

fn handle_offset_commit(broker: &Arc<Broker>, req: OffsetCommitRequest, now: i64) -> OffsetCommitResponse {
    let mut commits = Vec::new();
    let mut topics = Vec::with_capacity(req.topics.len());

    for t in req.topics {
        let mut partitions = Vec::with_capacity(t.partitions.len());
        for p in t.partitions {
            commits.push((t.name.clone(), p.index, p.committed_offset, p.committed_metadata.unwrap_or_default()));
            partitions.push(OffsetCommitPartitionResult {
                index: p.index,
                error_code: error_code::NONE,
            });
        }
        topics.push(OffsetCommitTopicResult { name: t.name, partitions });
    }

    broker.groups.commit_offsets(&req.group_id, &commits, now);
    OffsetCommitResponse { topics }
}

// ------------------------------------------------------------- OffsetFetch

fn handle_offset_fetch(broker: &Arc<Broker>, req: OffsetFetchRequest) -> OffsetFetchResponse {
    let requested: Vec<(String, i32)> = match &req.topics {
        Some(topics) => topics
            .iter()
            .flat_map(|t| t.partition_indexes.iter().map(move |&idx| (t.name.clone(), idx)))
            .collect(),
        None => broker
            .groups
            .get_group(&req.group_id)
            .map(|g| g.all_offsets().keys().cloned().collect())
            .unwrap_or_default(),
    };

    let results = broker.groups.fetch_offsets(&req.group_id, &requested);

    let mut by_topic: HashMap<String, Vec<OffsetFetchPartitionResult>> = HashMap::new();
    for (topic, partition, entry) in results {
        let (offset, metadata) = match entry {
            Some(e) => (e.offset, Some(e.metadata)),
            None => (-1, None),
        };
        by_topic.entry(topic).or_default().push(OffsetFetchPartitionResult {
            index: partition,
            committed_offset: offset,
            metadata,
            error_code: error_code::NONE,
        });
    }

    OffsetFetchResponse {
        topics: by_topic
            .into_iter()
            .map(|(name, partitions)| OffsetFetchTopicResult { name, partitions })
            .collect(),
        error_code: error_code::NONE,
    }
}

// --------------------------------------------------------- FindCoordinator

fn handle_find_coordinator(broker: &Arc<Broker>, req: FindCoordinatorRequest) -> FindCoordinatorResponse {
    // Groups are created lazily on first touch (spec §4.4); FindCoordinator
    // is the usual first touch in a consumer's startup sequence.
    broker.groups.get_or_create_group(&req.key);
    FindCoordinatorResponse {
        error_code: error_code::NONE,
        node_id: broker.node_id,
        host: broker.advertised_host.clone(),
        port: broker.advertised_port,
    }
}

// --------------------------------------------------------------- JoinGroup

async fn handle_join_group(
    broker: &Arc<Broker>,
    req: JoinGroupRequest,
    client_id: &str,
    client_host: &str,
    now: i64,
) -> JoinGroupResponse {
    let group_req = GroupJoinRequest {
        member_id: req.member_id.clone(),
        client_id: client_id.to_string(),
        client_host: client_host.to_string(),
        protocol_type: req.protocol_type,
        session_timeout_ms: req.session_timeout_ms.max(0) as u32,
        rebalance_timeout_ms: req.rebalance_timeout_ms.max(0) as u32,
        protocols: req.protocols.into_iter().map(|p| (p.name, p.metadata)).collect(),
    };

    match broker.groups.join_group(&req.group_id, group_req, now).await {
        Ok(ridgeline_group::JoinGroupOutcome::MemberIdRequired { member_id }) => JoinGroupResponse {
            error_code: error_code::MEMBER_ID_REQUIRED,
            generation_id: -1,
            protocol_name: String::new(),
            leader: String::new(),
            member_id,
            members: Vec::new(),
        },
        Ok(ridgeline_group::JoinGroupOutcome::Joined {
            generation,
            member_id,
            leader_id,
            protocol_name,
            members,
        }) => {
            let result_members = members
                .into_iter()
                .map(|m| {
                    let metadata = m
                        .protocols
                        .into_iter()
                        .find(|(name, _)| *name == protocol_name)
                        .map(|(_, metadata)| metadata)
                        .unwrap_or_default();
                    JoinGroupMemberResult {
                        member_id: m.member_id,
                        metadata,
                    }
                })
                .collect();
            JoinGroupResponse {
                error_code: error_code::NONE,
                generation_id: generation,
                protocol_name,
                leader: leader_id,
                member_id,
                members: result_members,
            }
        }
        Err(e) => JoinGroupResponse {
            error_code: error_code::from_group_error(e),
            generation_id: -1,
            protocol_name: String::new(),
            leader: String::new(),
            member_id: req.member_id,
            members: Vec::new(),
        },
    }
}

// -------------------------------------------------------------- SyncGroup

async fn handle_sync_group(broker: &Arc<Broker>, req: SyncGroupRequest) -> SyncGroupResponse {
    let leader_assignments = if req.assignments.is_empty() {
        None
    } else {
        Some(req.assignments.into_iter().map(|a| (a.member_id, a.assignment)).collect())
    };

    match broker
        .groups
        .sync_group(&req.group_id, &req.member_id, req.generation_id, leader_assignments)
        .await
    {
        Ok(outcome) => SyncGroupResponse {
            error_code: error_code::NONE,
            assignment: outcome.assignment,
        },
        Err(e) => SyncGroupResponse {
            error_code: error_code::from_group_error(e),
            assignment: Vec::new(),
        },
    }
}

// -------------------------------------------------------------- Heartbeat

fn handle_heartbeat(broker: &Arc<Broker>, req: HeartbeatRequest, now: i64) -> HeartbeatResponse {
    match broker.groups.heartbeat(&req.group_id, &req.member_id, req.generation_id, now) {
        Ok(()) => HeartbeatResponse { error_code: error_code::NONE },
        Err(e) => HeartbeatResponse { error_code: error_code::from_group_error(e) },
    }
}

// ------------------------------------------------------------- LeaveGroup

fn handle_leave_group(broker: &Arc<Broker>, req: LeaveGroupRequest, now: i64) -> LeaveGroupResponse {
    match broker.groups.leave_group(&req.group_id, &req.member_id, now) {
        Ok(()) => LeaveGroupResponse { error_code: error_code::NONE },
        Err(e) => LeaveGroupResponse { error_code: error_code::from_group_error(e) },
    }
}

// ----------------------------------------------------------- SaslHandshake

fn handle_sasl_handshake(state: &mut ConnState, req: SaslHandshakeRequest) -> SaslHandshakeResponse {
    let mechanisms: Vec<String> = SUPPORTED_MECHANISMS.iter().map(|s| s.to_string()).collect();
    let Some(sasl) = state.sasl.as_mut() else {
        return SaslHandshakeResponse {
            error_code: error_code::ILLEGAL_SASL_STATE,
            mechanisms,
        };
    };
    match sasl.handshake(&req.mechanism) {
        Ok(()) => SaslHandshakeResponse { error_code: error_code::NONE, mechanisms },
        Err(_) => SaslHandshakeResponse {
            error_code: error_code::UNSUPPORTED_SASL_MECHANISM,
            mechanisms,
        },
    }
}

// -------------------------------------------------------- SaslAuthenticate

async fn handle_sasl_authenticate(state: &mut ConnState, req: SaslAuthenticateRequest) -> SaslAuthenticateResponse {
    let Some(sasl) = state.sasl.as_mut() else {
        return SaslAuthenticateResponse {
            error_code: error_code::ILLEGAL_SASL_STATE,
            error_message: Some("no SASL mechanism negotiated".to_string()),
            auth_bytes: Vec::new(),
        };
    };
    match sasl.authenticate(&req.auth_bytes).await {
        Ok(SaslOutcome::Continue(bytes)) => SaslAuthenticateResponse {
            error_code: error_code::NONE,
            error_message: None,
            auth_bytes: bytes,
        },
        Ok(SaslOutcome::Authenticated { final_message, .. }) => {
            state.authenticated = true;
            SaslAuthenticateResponse {
                error_code: error_code::NONE,
                error_message: None,
                auth_bytes: final_message.unwrap_or_default(),
            }
        }
        Err(e) => SaslAuthenticateResponse {
            error_code: error_code::from_auth_error(&e),
            error_message: Some(auth_error_message(&e)),
            auth_bytes: Vec::new(),
        },
    }
}

fn auth_error_message(e: &AuthError) -> String {
    match e {
        AuthError::AuthenticationFailed(msg) => msg.clone(),
        AuthError::UnsupportedMechanism(m) => format!("unsupported mechanism: {m}"),
        AuthError::InvalidCredentials => "invalid credentials".to_string(),
    }
}

// ---------------------------------------------------------------- ApiVersions

fn handle_api_versions() -> ApiVersionsResponse {
    ApiVersionsResponse {
        error_code: error_code::NONE,
        apis: ridgeline_codec::SUPPORTED_APIS.iter().map(|(key, _, min, max)| (*key, *min, *max)).collect(),
    }
}

// -------------------------------------------------------------- CreateTopics

fn handle_create_topics(broker: &Arc<Broker>, req: CreateTopicsRequest, now: i64) -> CreateTopicsResponse {
    let topics = req
        .topics
        .into_iter()
        .map(|t| {
            let partitions = if t.num_partitions < 1 { 1 } else { t.num_partitions };
            let configs: HashMap<String, String> = t.configs.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))).collect();
            let (error_code, error_message) = match broker.router.create_topic(&t.name, partitions, configs, now) {
                Ok(()) => (error_code::NONE, None),
                Err(e) => {
                    let message = e.to_string();
                    (router_error_code(e), Some(message))
                }
            };
            CreateTopicResult {
                name: t.name,
                error_code,
                error_message,
            }
        })
        .collect();

    CreateTopicsResponse { topics }
}

// -------------------------------------------------------------- DeleteTopics

fn handle_delete_topics(broker: &Arc<Broker>, req: DeleteTopicsRequest) -> DeleteTopicsResponse {
    let topics = req
        .names
        .into_iter()
        .map(|name| {
            let error_code = match broker.router.delete_topic(&name) {
                Ok(()) => error_code::NONE,
                Err(e) => router_error_code(e),
            };
            DeleteTopicResult { name, error_code }
        })
        .collect();

    DeleteTopicsResponse { topics }
}

// ----------------------------------------------------------- DescribeConfigs

fn handle_describe_configs(broker: &Arc<Broker>, req: DescribeConfigsRequest) -> DescribeConfigsResponse {
    let results = req
        .resources
        .into_iter()
        .map(|r| {
            if r.resource_type != RESOURCE_TYPE_TOPIC {
                return DescribeConfigsResult {
                    error_code: error_code::NONE,
                    resource_type: r.resource_type,
                    resource_name: r.resource_name,
                    configs: Vec::new(),
                };
            }
            match broker.router.topic_info(&r.resource_name) {
                Some(info) => {
                    let mut configs: Vec<DescribeConfigsEntry> = info
                        .configs
                        .iter()
                        .filter(|&(key, _)| r.config_names.as_ref().map_or(true, |names| names.contains(key)))
                        .map(|(key, value)| DescribeConfigsEntry {
                            name: key.clone(),
                            value: Some(value.clone()),
                            read_only: false,
                        })
                        .collect();
                    configs.sort_by(|a, b| a.name.cmp(&b.name));
                    DescribeConfigsResult {
                        error_code: error_code::NONE,
                        resource_type: r.resource_type,
                        resource_name: r.resource_name,
                        configs,
                    }
                }
                None => DescribeConfigsResult {
                    error_code: error_code::UNKNOWN_TOPIC_OR_PARTITION,
                    resource_type: r.resource_type,
                    resource_name: r.resource_name,
                    configs: Vec::new(),
                },
            }
        })
        .collect();

    DescribeConfigsResponse { results }
}

// -------------------------------------------------------------- AlterConfigs

fn handle_alter_configs(broker: &Arc<Broker>, req: AlterConfigsRequest) -> AlterConfigsResponse {
    let results = req
        .resources
        .into_iter()
        .map(|r| {
            if r.resource_type != RESOURCE_TYPE_TOPIC {
                return AlterConfigsResult {
                    error_code: error_code::NONE,
                    resource_type: r.resource_type,
                    resource_name: r.resource_name,
                };
            }
            let configs: HashMap<String, Option<String>> = r.configs.into_iter().collect();
            let error_code = match broker.router.alter_topic_configs(&r.resource_name, configs) {
                Ok(()) => error_code::NONE,
                Err(e) => router_error_code(e),
            };
            AlterConfigsResult {
                error_code,
                resource_type: r.resource_type,
                resource_name: r.resource_name,
            }
        })
        .collect();

    AlterConfigsResponse { results }
}
