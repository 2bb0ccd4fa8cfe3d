//! Process-wide session registry.
//!
//! Two maps keyed by session: the stored subscription (needed by Ack) and
//! the per-partition source handles (needed by Receive). Entries are
//! inserted by the subscription engine and removed on teardown; removals
//! compare on identity so that a torn-down session can never evict a
//! concurrently re-minted one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::api::SessionId;
use crate::group::GroupId;
use crate::storage::RecordStream;

/// What Ack needs to commit an offset on behalf of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredSubscription {
    pub(crate) topic: String,
    pub(crate) group: GroupId,
}

/// The per-(session, partition) delivery state.
pub(crate) struct SourceHandle {
    pub(crate) partition: u32,

    /// Committed-offset watermark per partition, maximum across all known
    /// versions of the group; drives the replay flag.
    pub(crate) latest_acked: BTreeMap<u32, u64>,

    /// The handle's record sequence. Constructed exactly once, so the seek
    /// baked into its head runs on the first drain only; later drains resume
    /// wherever the previous one stopped.
    pub(crate) records: Arc<AsyncMutex<RecordStream>>,
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle")
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}

/// One session's partition handles.
#[derive(Debug, Default)]
pub(crate) struct SessionSources {
    by_partition: Mutex<HashMap<u32, Arc<SourceHandle>>>,
}

impl SessionSources {
    /// Install a handle, replacing any prior one for the same partition.
    pub(crate) fn install(&self, handle: Arc<SourceHandle>) {
        self.by_partition.lock().insert(handle.partition, handle);
    }

    pub(crate) fn get(&self, partition: u32) -> Option<Arc<SourceHandle>> {
        self.by_partition.lock().get(&partition).cloned()
    }

    /// Remove the handle for `partition` iff it is still `handle`.
    pub(crate) fn remove_if(&self, partition: u32, handle: &Arc<SourceHandle>) -> bool {
        let mut map = self.by_partition.lock();
        match map.get(&partition) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                map.remove(&partition);
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    subscriptions: Mutex<HashMap<SessionId, Arc<StoredSubscription>>>,
    sources: Mutex<HashMap<SessionId, Arc<SessionSources>>>,
}

impl Registry {
    /// Register a freshly minted session in both maps.
    pub(crate) fn insert_session(
        &self,
        session: &SessionId,
        subscription: Arc<StoredSubscription>,
    ) -> Arc<SessionSources> {
        self.subscriptions
            .lock()
            .insert(session.clone(), subscription);

        let sources = Arc::new(SessionSources::default());
        self.sources.lock().insert(session.clone(), Arc::clone(&sources));
        sources
    }

    pub(crate) fn subscription(&self, session: &SessionId) -> Option<Arc<StoredSubscription>> {
        self.subscriptions.lock().get(session).cloned()
    }

    pub(crate) fn handle(&self, session: &SessionId, partition: u32) -> Option<Arc<SourceHandle>> {
        let sources = self.sources.lock().get(session).cloned()?;
        sources.get(partition)
    }

    /// Remove both of a session's entries, each guarded by identity.
    pub(crate) fn remove_session_if(
        &self,
        session: &SessionId,
        subscription: &Arc<StoredSubscription>,
        sources: &Arc<SessionSources>,
    ) {
        {
            let mut map = self.subscriptions.lock();
            if let Some(current) = map.get(session) {
                if Arc::ptr_eq(current, subscription) {
                    map.remove(session);
                }
            }
        }

        {
            let mut map = self.sources.lock();
            if let Some(current) = map.get(session) {
                if Arc::ptr_eq(current, sources) {
                    map.remove(session);
                }
            }
        }
    }
}
