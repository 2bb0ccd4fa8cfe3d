//! In-memory backends for both stores.
//!
//! These are complete single-process implementations, useful for local
//! deployments and as the test rig for the gateway's end-to-end properties.
//! There is no consumer-group rebalancing: every subscription is assigned
//! all partitions of its topic.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::group::GroupId;
use crate::record::{Envelope, OffsetInfo, Record};
use crate::storage::{
    AssignmentEvent, OffsetReset, PartitionSource, PositionsStorage, RecordStream, RecordsStorage,
    StorageError, Subscription,
};

/// Partitioned append-only log held in process memory.
#[derive(Debug)]
pub struct InMemoryRecordsStorage {
    partitions: u32,
    topics: Mutex<HashMap<String, Arc<TopicLog>>>,
}

impl InMemoryRecordsStorage {
    /// Create a storage whose topics all have `partitions` partitions.
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn topic(&self, name: &str) -> Arc<TopicLog> {
        let mut topics = self.topics.lock();
        match topics.get(name) {
            Some(topic) => Arc::clone(topic),
            None => {
                let topic = Arc::new(TopicLog::new(name, self.partitions));
                topics.insert(name.to_string(), Arc::clone(&topic));
                topic
            }
        }
    }

    fn partition_for(&self, key: &Bytes) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(self.partitions)) as u32
    }
}

#[async_trait]
impl RecordsStorage for InMemoryRecordsStorage {
    async fn publish(&self, envelope: Envelope) -> Result<OffsetInfo, StorageError> {
        let topic = self.topic(&envelope.topic);
        let partition = self.partition_for(&envelope.key);
        let offset = topic.partitions[partition as usize].append(envelope.key, envelope.value);

        Ok(OffsetInfo {
            topic: envelope.topic,
            partition,
            offset,
        })
    }

    async fn subscribe(
        &self,
        topic: &str,
        _group_name: &str,
        offset_reset: Option<OffsetReset>,
    ) -> Result<Subscription, StorageError> {
        let topic = self.topic(topic);

        // Start positions are snapshotted here, not when the stream is first
        // drained, so "latest" means latest as of the subscribe call.
        let sources: AssignmentEvent = topic
            .partitions
            .iter()
            .map(|log| {
                let start = match offset_reset {
                    Some(OffsetReset::Earliest) => 0,
                    Some(OffsetReset::Latest) | None => log.len(),
                };

                Arc::new(MemoryPartitionSource {
                    log: Arc::clone(log),
                    position: Arc::new(AtomicU64::new(start)),
                }) as Arc<dyn PartitionSource>
            })
            .collect();

        // A single snapshot covering every partition; the event stream then
        // stays open for the lifetime of the subscription.
        let assignments = stream::once(futures::future::ready(Ok(sources)))
            .chain(stream::pending())
            .boxed();

        Ok(Subscription { assignments })
    }
}

#[derive(Debug)]
struct TopicLog {
    partitions: Vec<Arc<PartitionLog>>,
}

impl TopicLog {
    fn new(topic: &str, partitions: u32) -> Self {
        Self {
            partitions: (0..partitions)
                .map(|partition| {
                    Arc::new(PartitionLog {
                        topic: topic.to_string(),
                        partition,
                        records: Mutex::new(Vec::new()),
                        appended: Notify::new(),
                    })
                })
                .collect(),
        }
    }
}

#[derive(Debug)]
struct PartitionLog {
    topic: String,
    partition: u32,
    records: Mutex<Vec<StoredRecord>>,
    appended: Notify,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Bytes,
    value: Bytes,
    timestamp: DateTime<Utc>,
}

impl PartitionLog {
    fn append(&self, key: Bytes, value: Bytes) -> u64 {
        let offset = {
            let mut records = self.records.lock();
            records.push(StoredRecord {
                key,
                value,
                timestamp: Utc::now(),
            });
            records.len() as u64 - 1
        };

        self.appended.notify_waiters();
        offset
    }

    fn len(&self) -> u64 {
        self.records.lock().len() as u64
    }

    fn get(&self, offset: u64) -> Option<StoredRecord> {
        self.records.lock().get(offset as usize).cloned()
    }

    /// Wait until a record exists at `position`, then step past it.
    async fn next_record(&self, position: &AtomicU64) -> Record {
        loop {
            let appended = self.appended.notified();
            tokio::pin!(appended);
            // register for wakeups before checking, so an append racing with
            // the check below is not lost
            appended.as_mut().enable();

            let offset = position.load(Ordering::SeqCst);
            if let Some(stored) = self.get(offset) {
                position.store(offset + 1, Ordering::SeqCst);
                return Record {
                    envelope: Envelope {
                        topic: self.topic.clone(),
                        key: stored.key,
                        value: stored.value,
                    },
                    partition: self.partition,
                    offset,
                    timestamp: stored.timestamp,
                };
            }

            appended.await;
        }
    }
}

struct MemoryPartitionSource {
    log: Arc<PartitionLog>,
    position: Arc<AtomicU64>,
}

#[async_trait]
impl PartitionSource for MemoryPartitionSource {
    fn partition(&self) -> u32 {
        self.log.partition
    }

    async fn seek_to(&self, offset: u64) -> Result<(), StorageError> {
        self.position.store(offset, Ordering::SeqCst);
        Ok(())
    }

    fn records(&self) -> RecordStream {
        let log = Arc::clone(&self.log);
        let position = Arc::clone(&self.position);

        stream::unfold((log, position), |(log, position)| async move {
            let record = log.next_record(&position).await;
            Some((Ok(record), (log, position)))
        })
        .boxed()
    }
}

/// Committed offsets held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryPositionsStorage {
    // (topic, group name) -> version -> partition -> offset
    groups: Mutex<HashMap<(String, String), BTreeMap<u32, BTreeMap<u32, u64>>>>,
}

impl InMemoryPositionsStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionsStorage for InMemoryPositionsStorage {
    async fn update(
        &self,
        topic: &str,
        group: &GroupId,
        partition: u32,
        offset: u64,
    ) -> Result<(), StorageError> {
        self.groups
            .lock()
            .entry((topic.to_string(), group.name().to_string()))
            .or_default()
            .entry(group.version())
            .or_default()
            .insert(partition, offset);

        Ok(())
    }

    async fn find_all(
        &self,
        topic: &str,
        group: &GroupId,
    ) -> Result<BTreeMap<u32, u64>, StorageError> {
        let offsets = self
            .groups
            .lock()
            .get(&(topic.to_string(), group.name().to_string()))
            .and_then(|versions| versions.get(&group.version()))
            .cloned()
            .unwrap_or_default();

        Ok(offsets)
    }

    async fn find_all_versions(
        &self,
        topic: &str,
        group_name: &str,
    ) -> Result<BTreeMap<u32, BTreeMap<u32, u64>>, StorageError> {
        let versions = self
            .groups
            .lock()
            .get(&(topic.to_string(), group_name.to_string()))
            .cloned()
            .unwrap_or_default();

        Ok(versions)
    }
}
