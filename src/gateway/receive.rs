//! The delivery engine.
//!
//! Receive borrows the record sequence of a handle installed by an earlier
//! subscribe. The stored stream is locked for the duration of the call, so a
//! cancelled receive leaves the position where it stopped and a later
//! receive on the same handle resumes from there.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

use crate::api::{DeliveredRecord, ReceiveReply, ReceiveRequest, Timestamp};
use crate::gateway::{escape_request, Gateway};
use crate::record::Record;
use crate::status::{map_terminal, Status};
use crate::storage::RecordStream;

const ENDPOINT: &str = "receive";

pub(crate) fn run(
    gateway: &Gateway,
    request: ReceiveRequest,
) -> BoxStream<'static, Result<ReceiveReply, Status>> {
    let session = &request.assignment.session_id;
    let partition = request.assignment.partition;

    let Some(handle) = gateway.registry.handle(session, partition) else {
        // not an error: the session may have been torn down between the
        // client learning the assignment and asking for records
        warn!(
            request = %escape_request(&request),
            "no registered source for receive request"
        );
        return stream::empty().boxed();
    };

    // the request's last_known_offset is reserved for auto-ack on reconnect
    // and deliberately not consulted

    let last_seen = handle.latest_acked.get(&partition).copied();
    let records = gateway.post.apply(locked_records(Arc::clone(&handle.records)));

    records
        .map(move |result| match result {
            Ok(record) => Ok(to_reply(record, last_seen)),
            Err(err) => Err(map_terminal(ENDPOINT, err.into())),
        })
        .boxed()
}

fn to_reply(record: Record, last_seen: Option<u64>) -> ReceiveReply {
    ReceiveReply {
        record: DeliveredRecord {
            offset: record.offset,
            replay: last_seen.is_some_and(|last| record.offset <= last),
            key: record.envelope.key,
            value: record.envelope.value,
            timestamp: Timestamp {
                seconds: record.timestamp.timestamp(),
                nanos: record.timestamp.timestamp_subsec_nanos(),
            },
        },
    }
}

/// Lazily acquire the handle's stream and forward it while holding the lock.
fn locked_records(records: Arc<AsyncMutex<RecordStream>>) -> RecordStream {
    stream::once(async move { records.lock_owned().await })
        .flat_map(|guard| LockedRecords { guard })
        .boxed()
}

struct LockedRecords {
    guard: OwnedMutexGuard<RecordStream>,
}

impl Stream for LockedRecords {
    type Item = <RecordStream as Stream>::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.guard.as_mut().poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use chrono::TimeZone;

    use crate::record::Envelope;

    fn record(offset: u64) -> Record {
        Record {
            envelope: Envelope {
                topic: "t".to_string(),
                key: Bytes::from("k"),
                value: Bytes::from("v"),
            },
            partition: 0,
            offset,
            timestamp: chrono::Utc
                .timestamp_opt(1_700_000_000, 42)
                .single()
                .unwrap(),
        }
    }

    #[test]
    fn replay_is_stamped_against_the_watermark() {
        assert!(to_reply(record(3), Some(3)).record.replay);
        assert!(to_reply(record(2), Some(3)).record.replay);
        assert!(!to_reply(record(4), Some(3)).record.replay);

        // no watermark behaves like a watermark of -1
        assert!(!to_reply(record(0), None).record.replay);
    }

    #[test]
    fn timestamp_is_split_into_seconds_and_nanos() {
        let reply = to_reply(record(0), None);

        assert_eq!(reply.record.timestamp.seconds, 1_700_000_000);
        assert_eq!(reply.record.timestamp.nanos, 42);
        assert_eq!(reply.record.key, Bytes::from("k"));
        assert_eq!(reply.record.value, Bytes::from("v"));
    }

    #[tokio::test]
    async fn cancelled_drain_keeps_the_position() {
        let shared: Arc<AsyncMutex<RecordStream>> = Arc::new(AsyncMutex::new(
            stream::iter((0..4).map(|offset| Ok(record(offset)))).boxed(),
        ));

        {
            let mut first = locked_records(Arc::clone(&shared));
            assert_eq!(first.next().await.unwrap().unwrap().offset, 0);
            assert_eq!(first.next().await.unwrap().unwrap().offset, 1);
            // dropped here without being drained
        }

        let mut second = locked_records(shared);
        assert_eq!(second.next().await.unwrap().unwrap().offset, 2);
    }
}
