//! The API key / version table from spec §6, plus the numeric error code
//! mapping the codec and `ridgeline-group` use to fill response fields.

/// `(apiKey, name, minVersion, maxVersion)`, exactly the table in spec §6.
pub const SUPPORTED_APIS: &[(i16, &str, i16, i16)] = &[
    (0, "Produce", 0, 9),
    (1, "Fetch", 0, 11),
    (2, "ListOffsets", 0, 5),
    (3, "Metadata", 0, 9),
    (8, "OffsetCommit", 0, 8),
    (9, "OffsetFetch", 0, 7),
    (10, "FindCoordinator", 0, 4),
    (11, "JoinGroup", 0, 7),
    (12, "Heartbeat", 0, 4),
    (13, "LeaveGroup", 0, 4),
    (14, "SyncGroup", 0, 5),
    (17, "SaslHandshake", 0, 1),
    (18, "ApiVersions", 0, 3),
    (19, "CreateTopics", 0, 7),
    (20, "DeleteTopics", 0, 6),
    (32, "DescribeConfigs", 0, 4),
    (33, "AlterConfigs", 0, 2),
    (36, "SaslAuthenticate", 0, 2),
];

pub fn version_range(api_key: i16) -> Option<(i16, i16)> {
    SUPPORTED_APIS
        .iter()
        .find(|(key, ..)| *key == api_key)
        .map(|(_, _, min, max)| (*min, *max))
}

pub fn is_supported(api_key: i16, api_version: i16) -> bool {
    matches!(version_range(api_key), Some((min, max)) if api_version >= min && api_version <= max)
}

/// Kafka's numeric error code table (spec §6 minimum set). `0` is `None`
/// (success). Used inline in every per-topic/per-partition response field.
pub mod error_code {
    pub const NONE: i16 = 0;
    pub const OFFSET_OUT_OF_RANGE: i16 = 1;
    pub const CORRUPT_MESSAGE: i16 = 2;
    pub const UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;
    pub const LEADER_NOT_AVAILABLE: i16 = 5;
    pub const NOT_LEADER_FOR_PARTITION: i16 = 6;
    pub const REQUEST_TIMED_OUT: i16 = 7;
    pub const COORDINATOR_NOT_AVAILABLE: i16 = 15;
    pub const NOT_COORDINATOR: i16 = 16;
    pub const INVALID_TOPIC: i16 = 17;
    pub const ILLEGAL_GENERATION: i16 = 22;
    pub const UNKNOWN_MEMBER_ID: i16 = 25;
    pub const INVALID_SESSION_TIMEOUT: i16 = 26;
    pub const REBALANCE_IN_PROGRESS: i16 = 27;
    pub const INCONSISTENT_GROUP_PROTOCOL: i16 = 23;
    pub const UNSUPPORTED_VERSION: i16 = 35;
    pub const TOPIC_ALREADY_EXISTS: i16 = 36;
    pub const INVALID_PARTITIONS: i16 = 37;
    pub const UNSUPPORTED_SASL_MECHANISM: i16 = 33;
    pub const ILLEGAL_SASL_STATE: i16 = 34;
    pub const MEMBER_ID_REQUIRED: i16 = 56;
    pub const SASL_AUTHENTICATION_FAILED: i16 = 58;

    /// Maps the broker's internal error type onto the numeric code a client
    /// expects in a response field. Unrecognized internal failures fall back
    /// to `CorruptMessage`, since clients have no generic "internal error"
    /// code in this table.
    pub fn from_storage_error(err: &ridgeline_common::error::StorageError) -> i16 {
        use ridgeline_common::error::StorageError::*;
        match err {
            TopicAlreadyExists(_) => TOPIC_ALREADY_EXISTS,
            UnknownTopicOrPartition(_) => UNKNOWN_TOPIC_OR_PARTITION,
            OffsetOutOfRange(_) => OFFSET_OUT_OF_RANGE,
            InvalidTopic(_) => INVALID_TOPIC,
            InvalidPartitions(_) => INVALID_PARTITIONS,
            LogUnhealthy(_) => LEADER_NOT_AVAILABLE,
            CorruptSegment(_) => CORRUPT_MESSAGE,
            DiskFull(_) => REQUEST_TIMED_OUT,
        }
    }

    pub fn from_group_error(err: ridgeline_common::error::GroupError) -> i16 {
        use ridgeline_common::error::GroupError::*;
        match err {
            UnknownMemberId => UNKNOWN_MEMBER_ID,
            IllegalGeneration => ILLEGAL_GENERATION,
            RebalanceInProgress => REBALANCE_IN_PROGRESS,
            InconsistentProtocol => INCONSISTENT_GROUP_PROTOCOL,
            InvalidSessionTimeout => INVALID_SESSION_TIMEOUT,
            CoordinatorNotAvailable => COORDINATOR_NOT_AVAILABLE,
            MemberIdRequired => MEMBER_ID_REQUIRED,
        }
    }

    /// SASL failures have no finer-grained codes in this table; any
    /// authentication error collapses to the one clients check for.
    pub fn from_auth_error(_err: &ridgeline_common::error::AuthError) -> i16 {
        SASL_AUTHENTICATION_FAILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_versions_in_range() {
        assert!(is_supported(0, 0));
        assert!(is_supported(0, 9));
        assert!(!is_supported(0, 10));
    }

    #[test]
    fn rejects_unknown_api_key() {
        assert!(!is_supported(999, 0));
    }
}
