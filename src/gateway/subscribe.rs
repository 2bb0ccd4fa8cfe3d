//! The subscription engine.
//!
//! One driver task per subscribe call: it opens the storage subscription,
//! registers the session, fans every assignment snapshot out into partition
//! handles and assignment replies, and tears the session down when any leg
//! of the call ends. Replies flow through a bounded channel so that delivery
//! is paced by transport demand.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::api::{Assignment, AutoOffsetReset, SessionId, SubscribeReply, SubscribeRequest};
use crate::gateway::error::Error;
use crate::gateway::registry::{Registry, SessionSources, SourceHandle, StoredSubscription};
use crate::gateway::Gateway;
use crate::group::GroupId;
use crate::record::Record;
use crate::status::{map_terminal, Status};
use crate::storage::{
    AssignmentEvent, OffsetReset, PartitionSource, PositionsStorage, RecordsStorage, StorageError,
};

const ENDPOINT: &str = "subscribe";

pub(crate) fn run(
    gateway: &Gateway,
    request: SubscribeRequest,
) -> BoxStream<'static, Result<SubscribeReply, Status>> {
    let (tx, mut rx) = mpsc::channel(gateway.reply_buffer);

    tokio::spawn(drive(
        Arc::clone(&gateway.records),
        Arc::clone(&gateway.positions),
        Arc::clone(&gateway.registry),
        request,
        tx,
    ));

    stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()
}

async fn drive(
    records: Arc<dyn RecordsStorage>,
    positions: Arc<dyn PositionsStorage>,
    registry: Arc<Registry>,
    request: SubscribeRequest,
    tx: mpsc::Sender<Result<SubscribeReply, Status>>,
) {
    let SubscribeRequest {
        topic,
        group,
        group_version,
        auto_offset_reset,
    } = request;

    let group = GroupId::resolve(&group, group_version);
    let offset_reset = match auto_offset_reset {
        AutoOffsetReset::Unset => None,
        AutoOffsetReset::Earliest => Some(OffsetReset::Earliest),
        AutoOffsetReset::Latest => Some(OffsetReset::Latest),
    };

    let subscription = match records.subscribe(&topic, group.name(), offset_reset).await {
        Ok(subscription) => subscription,
        Err(err) => {
            let _ = tx.send(Err(map_terminal(ENDPOINT, err.into()))).await;
            return;
        }
    };

    let session = SessionId::mint();
    let stored = Arc::new(StoredSubscription {
        topic: topic.clone(),
        group: group.clone(),
    });
    let sources = registry.insert_session(&session, Arc::clone(&stored));

    // removes both registry entries on every exit path, including unwind
    let _teardown = SessionGuard {
        registry,
        session: session.clone(),
        subscription: stored,
        sources: Arc::clone(&sources),
    };

    debug!(session = %session, topic, group = %group, "session registered");

    let mut assignments = subscription.assignments;
    let mut fan_out: BoxFuture<'static, Result<(), Error>> = future::pending().boxed();

    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!(session = %session, "subscribe stream cancelled by client");
                return;
            }

            event = assignments.next() => match event {
                Some(Ok(event_sources)) => {
                    // switch-latest: the snapshot that just arrived supersedes
                    // the previous one, so any in-flight fan-out is dropped
                    fan_out = fan_out_event(
                        Arc::clone(&positions),
                        topic.clone(),
                        group.clone(),
                        session.clone(),
                        Arc::clone(&sources),
                        event_sources,
                        tx.clone(),
                    )
                    .boxed();
                }
                Some(Err(err)) => {
                    let _ = tx.send(Err(map_terminal(ENDPOINT, err.into()))).await;
                    return;
                }
                None => {
                    debug!(session = %session, "storage subscription completed");
                    return;
                }
            },

            result = fan_out.as_mut() => {
                fan_out = future::pending().boxed();
                if let Err(err) = result {
                    let _ = tx.send(Err(map_terminal(ENDPOINT, err))).await;
                    return;
                }
            }
        }
    }
}

struct SessionGuard {
    registry: Arc<Registry>,
    session: SessionId,
    subscription: Arc<StoredSubscription>,
    sources: Arc<SessionSources>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        debug!(session = %self.session, "removing session from registry");
        self.registry
            .remove_session_if(&self.session, &self.subscription, &self.sources);
    }
}

async fn fan_out_event(
    positions: Arc<dyn PositionsStorage>,
    topic: String,
    group: GroupId,
    session: SessionId,
    session_sources: Arc<SessionSources>,
    event: AssignmentEvent,
    tx: mpsc::Sender<Result<SubscribeReply, Status>>,
) -> Result<(), Error> {
    let versions = positions.find_all_versions(&topic, group.name()).await?;
    let latest_acked = latest_acked_offsets(&versions);
    let resume = resume_offsets(&versions, &group);

    debug!(
        session = %session,
        group = %group,
        partitions = event.len(),
        "processing assignment event"
    );

    for source in event {
        let partition = source.partition();
        let seek_to = resume.get(&partition).map(|last_acked| last_acked + 1);

        install_handle(&session_sources, source, latest_acked.clone(), seek_to);

        let reply = SubscribeReply {
            assignment: Assignment {
                session_id: session.clone(),
                partition,
            },
        };

        // the handle is registered before the reply leaves, so a receive
        // racing this reply can already find it
        if tx.send(Ok(reply)).await.is_err() {
            return Ok(());
        }
    }

    Ok(())
}

/// Per-partition maximum committed offset across all versions of the group.
fn latest_acked_offsets(versions: &BTreeMap<u32, BTreeMap<u32, u64>>) -> BTreeMap<u32, u64> {
    let mut latest = BTreeMap::new();

    for offsets in versions.values() {
        for (&partition, &offset) in offsets {
            latest
                .entry(partition)
                .and_modify(|current: &mut u64| *current = (*current).max(offset))
                .or_insert(offset);
        }
    }

    latest
}

/// The committed offsets the session resumes from.
///
/// A versioned group resumes from its exact version; an unversioned group
/// resumes from the smallest stored version. Note the asymmetry with
/// [`latest_acked_offsets`], which always takes the maximum across versions.
fn resume_offsets(
    versions: &BTreeMap<u32, BTreeMap<u32, u64>>,
    group: &GroupId,
) -> BTreeMap<u32, u64> {
    if group.is_versioned() {
        versions.get(&group.version()).cloned().unwrap_or_default()
    } else {
        versions.values().next().cloned().unwrap_or_default()
    }
}

/// Build and register the handle for one assigned partition source.
fn install_handle(
    session_sources: &Arc<SessionSources>,
    source: Arc<dyn PartitionSource>,
    latest_acked: BTreeMap<u32, u64>,
    seek_to: Option<u64>,
) {
    let partition = source.partition();

    let handle = Arc::new_cyclic(|weak: &Weak<SourceHandle>| {
        let on_terminal = {
            let weak_handle = weak.clone();
            let weak_sources = Arc::downgrade(session_sources);

            move || {
                let upgraded = (weak_handle.upgrade(), weak_sources.upgrade());
                if let (Some(handle), Some(sources)) = upgraded {
                    if sources.remove_if(partition, &handle) {
                        debug!(partition, "partition source terminated, handle removed");
                    }
                }
            }
        };

        let seek = seek_to.map(|offset| {
            let source = Arc::clone(&source);
            async move { source.seek_to(offset).await }.boxed()
        });

        let records = GatedRecords {
            seek,
            records: source.records(),
            on_terminal: Some(on_terminal),
            done: false,
        };

        SourceHandle {
            partition,
            latest_acked,
            records: Arc::new(AsyncMutex::new(records.boxed())),
        }
    });

    session_sources.install(handle);
}

pin_project! {
    /// A record stream whose head is a one-shot seek.
    ///
    /// The seek future is consumed by the first poll, so no drain of the
    /// stream can ever re-issue it. Terminal signals (natural end, a failed
    /// seek, or an error item) fire `on_terminal` exactly once and fuse the
    /// stream.
    struct GatedRecords<S, F> {
        seek: Option<BoxFuture<'static, Result<(), StorageError>>>,
        #[pin]
        records: S,
        on_terminal: Option<F>,
        done: bool,
    }
}

impl<S, F> Stream for GatedRecords<S, F>
where
    S: Stream<Item = Result<Record, StorageError>>,
    F: FnOnce(),
{
    type Item = Result<Record, StorageError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.done {
            return Poll::Ready(None);
        }

        if let Some(seek) = this.seek.as_mut() {
            match seek.as_mut().poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(())) => *this.seek = None,
                Poll::Ready(Err(err)) => {
                    *this.seek = None;
                    *this.done = true;
                    if let Some(terminal) = this.on_terminal.take() {
                        terminal();
                    }
                    return Poll::Ready(Some(Err(err)));
                }
            }
        }

        match this.records.poll_next(cx) {
            Poll::Ready(None) => {
                *this.done = true;
                if let Some(terminal) = this.on_terminal.take() {
                    terminal();
                }
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(err))) => {
                *this.done = true;
                if let Some(terminal) = this.on_terminal.take() {
                    terminal();
                }
                Poll::Ready(Some(Err(err)))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use bytes::Bytes;

    use crate::record::Envelope;

    fn record(offset: u64) -> Record {
        Record {
            envelope: Envelope {
                topic: "t".to_string(),
                key: Bytes::new(),
                value: Bytes::new(),
            },
            partition: 0,
            offset,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn latest_acked_takes_the_maximum_across_versions() {
        let versions = BTreeMap::from([
            (1, BTreeMap::from([(0, 5), (1, 9)])),
            (2, BTreeMap::from([(0, 7)])),
        ]);

        assert_eq!(
            latest_acked_offsets(&versions),
            BTreeMap::from([(0, 7), (1, 9)])
        );
        assert!(latest_acked_offsets(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn resume_uses_the_exact_version_when_versioned() {
        let versions = BTreeMap::from([
            (1, BTreeMap::from([(0, 5)])),
            (2, BTreeMap::from([(0, 7)])),
        ]);

        assert_eq!(
            resume_offsets(&versions, &GroupId::new("g", 2)),
            BTreeMap::from([(0, 7)])
        );
        assert!(resume_offsets(&versions, &GroupId::new("g", 3)).is_empty());
    }

    #[test]
    fn resume_uses_the_smallest_version_when_unversioned() {
        let versions = BTreeMap::from([
            (1, BTreeMap::from([(0, 5)])),
            (2, BTreeMap::from([(0, 7)])),
        ]);

        assert_eq!(
            resume_offsets(&versions, &GroupId::new("g", 0)),
            BTreeMap::from([(0, 5)])
        );
        assert!(resume_offsets(&BTreeMap::new(), &GroupId::new("g", 0)).is_empty());
    }

    #[tokio::test]
    async fn seek_runs_once_before_the_first_record() {
        let seeks = Arc::new(AtomicUsize::new(0));
        let seek = {
            let seeks = Arc::clone(&seeks);
            async move {
                seeks.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        };

        let mut gated = GatedRecords {
            seek: Some(seek),
            records: stream::iter([Ok(record(7)), Ok(record(8))]),
            on_terminal: Some(|| {}),
            done: false,
        };

        assert_eq!(gated.next().await.unwrap().unwrap().offset, 7);
        assert_eq!(seeks.load(Ordering::SeqCst), 1);

        assert_eq!(gated.next().await.unwrap().unwrap().offset, 8);
        assert_eq!(seeks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_seek_is_terminal() {
        let terminals = Arc::new(AtomicUsize::new(0));
        let on_terminal = {
            let terminals = Arc::clone(&terminals);
            move || {
                terminals.fetch_add(1, Ordering::SeqCst);
            }
        };

        let mut gated = GatedRecords {
            seek: Some(async { Err(StorageError::new("seek failed")) }.boxed()),
            records: stream::iter([Ok(record(0))]),
            on_terminal: Some(on_terminal),
            done: false,
        };

        assert_matches!(gated.next().await, Some(Err(_)));
        assert_eq!(terminals.load(Ordering::SeqCst), 1);

        // fused: the underlying records are never reached
        assert_matches!(gated.next().await, None);
        assert_eq!(terminals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn natural_end_fires_the_terminal_callback_once() {
        let terminals = Arc::new(AtomicUsize::new(0));
        let on_terminal = {
            let terminals = Arc::clone(&terminals);
            move || {
                terminals.fetch_add(1, Ordering::SeqCst);
            }
        };

        let mut gated = GatedRecords {
            seek: None,
            records: stream::iter([Ok(record(0))]),
            on_terminal: Some(on_terminal),
            done: false,
        };

        assert_matches!(gated.next().await, Some(Ok(_)));
        assert_matches!(gated.next().await, None);
        assert_matches!(gated.next().await, None);
        assert_eq!(terminals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_item_is_terminal() {
        let mut gated = GatedRecords {
            seek: None,
            records: stream::iter([
                Ok(record(0)),
                Err(StorageError::new("broken")),
                Ok(record(1)),
            ]),
            on_terminal: Some(|| {}),
            done: false,
        };

        assert_matches!(gated.next().await, Some(Ok(_)));
        assert_matches!(gated.next().await, Some(Err(_)));
        assert_matches!(gated.next().await, None);
    }
}
