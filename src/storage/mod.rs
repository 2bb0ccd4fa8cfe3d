//! Capability boundaries towards the two backing stores.
//!
//! The gateway consumes a records storage (the partitioned, append-only log)
//! and a positions storage (committed offsets per group). Both are specified
//! here as traits so that concrete backends stay out of the core.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::group::GroupId;
use crate::record::{Envelope, OffsetInfo, Record};

pub mod memory;

/// A lazy sequence of records for one partition.
pub type RecordStream = BoxStream<'static, Result<Record, StorageError>>;

/// A snapshot of the partition sources currently assigned to a consumer.
///
/// Each event supersedes the previous one.
pub type AssignmentEvent = Vec<Arc<dyn PartitionSource>>;

/// The long-lived sequence of assignment events for one subscription.
pub type AssignmentStream = BoxStream<'static, Result<AssignmentEvent, StorageError>>;

/// A fault raised by either backing store.
///
/// Adapters wrap whatever their backend produces; the gateway never inspects
/// the cause, it only propagates the message.
#[derive(Debug, Error)]
#[error("{context}")]
pub struct StorageError {
    context: String,

    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StorageError {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            source: None,
        }
    }

    pub fn with_source(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            context: context.into(),
            source: Some(source.into()),
        }
    }
}

/// Start position for a subscription whose group has no committed offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    /// The conventional wire spelling understood by log brokers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

/// The partitioned record log.
#[async_trait]
pub trait RecordsStorage: Send + Sync + 'static {
    /// Append an envelope and report where it landed.
    async fn publish(&self, envelope: Envelope) -> Result<OffsetInfo, StorageError>;

    /// Join `group_name` on `topic` and start receiving assignment events.
    ///
    /// `offset_reset` applies only when the group has no committed position;
    /// `None` defers to the backend's default.
    async fn subscribe(
        &self,
        topic: &str,
        group_name: &str,
        offset_reset: Option<OffsetReset>,
    ) -> Result<Subscription, StorageError>;
}

/// A live storage-level subscription.
pub struct Subscription {
    /// Assignment snapshots, terminated when the subscription ends.
    pub assignments: AssignmentStream,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// One assigned partition: a record stream plus a one-shot reposition.
#[async_trait]
pub trait PartitionSource: Send + Sync {
    fn partition(&self) -> u32;

    /// Reposition the source so that [`Self::records`] starts at `offset`.
    ///
    /// Callers issue this at most once, before first draining the stream.
    async fn seek_to(&self, offset: u64) -> Result<(), StorageError>;

    /// The source's record sequence, starting at the current position.
    fn records(&self) -> RecordStream;
}

/// Committed offsets per `(topic, group, partition)`.
#[async_trait]
pub trait PositionsStorage: Send + Sync + 'static {
    /// Upsert the committed offset for one partition.
    async fn update(
        &self,
        topic: &str,
        group: &GroupId,
        partition: u32,
        offset: u64,
    ) -> Result<(), StorageError>;

    /// All committed offsets for one exact group identity.
    async fn find_all(
        &self,
        topic: &str,
        group: &GroupId,
    ) -> Result<BTreeMap<u32, u64>, StorageError>;

    /// Committed offsets for every known version of a group name, keyed by
    /// version in ascending order.
    async fn find_all_versions(
        &self,
        topic: &str,
        group_name: &str,
    ) -> Result<BTreeMap<u32, BTreeMap<u32, u64>>, StorageError>;
}
