use bytes::Bytes;
use chrono::{DateTime, Utc};

/// An outbound message as handed to the gateway by a publisher.
///
/// Envelopes are immutable; pre-processors consume one and produce a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// The topic this envelope is published to.
    pub topic: String,

    /// Partitioning key.
    pub key: Bytes,

    /// Opaque payload.
    pub value: Bytes,
}

/// A stored record as produced by a partition source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The envelope this record was published as.
    pub envelope: Envelope,

    /// The partition this record lives in.
    pub partition: u32,

    /// The record's offset within its partition.
    pub offset: u64,

    /// The timestamp assigned by the records storage on append.
    pub timestamp: DateTime<Utc>,
}

/// The coordinates a publish landed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetInfo {
    /// The topic the envelope was published to.
    pub topic: String,

    /// The partition the envelope was routed to.
    pub partition: u32,

    /// The offset the record was appended at.
    pub offset: u64,
}
