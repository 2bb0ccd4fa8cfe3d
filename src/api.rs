//! Request and reply types of the session protocol.
//!
//! These are the messages a schema-typed RPC binding would map its wire
//! format onto. Publish, Ack and GetOffsets are unary; Subscribe and Receive
//! are server-streaming.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

/// Where to start reading when a group has no committed offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AutoOffsetReset {
    /// Defer to the records storage's default.
    #[default]
    Unset,
    Earliest,
    Latest,
}

/// An opaque identifier naming one live subscribe call.
///
/// Minted by the gateway when a subscription is opened; clients echo it on
/// Receive and Ack. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub(crate) fn mint() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One partition assigned to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub session_id: SessionId,
    pub partition: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic: String,
    pub key: Bytes,
    pub value: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReply {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub topic: String,

    /// Group name; may carry the legacy `-vN` version suffix.
    pub group: String,

    /// Explicit group version, `0` for unversioned.
    pub group_version: u32,

    pub auto_offset_reset: AutoOffsetReset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeReply {
    pub assignment: Assignment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub assignment: Assignment,

    /// Reserved for a future auto-ack-on-reconnect behavior; the gateway
    /// carries it but does not consult it.
    pub last_known_offset: u64,
}

/// Seconds/nanos split of a record timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: u32,
}

/// A record as delivered to a receiving client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredRecord {
    pub offset: u64,

    /// `true` iff this offset is not beyond the group's committed watermark,
    /// i.e. the record was (by some generation of the group) seen before.
    pub replay: bool,

    pub key: Bytes,
    pub value: Bytes,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveReply {
    pub record: DeliveredRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRequest {
    pub assignment: Assignment,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetOffsetsRequest {
    pub topic: String,
    pub group: String,
    pub group_version: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOffsetsReply {
    /// Committed offset per partition; empty when nothing is stored.
    pub offsets: BTreeMap<u32, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::mint(), SessionId::mint());
    }

    #[test]
    fn session_id_round_trips_through_wire_form() {
        let session = SessionId::mint();
        assert_eq!(SessionId::from(session.as_str()), session);
        assert_eq!(SessionId::from(session.to_string()), session);
    }
}
