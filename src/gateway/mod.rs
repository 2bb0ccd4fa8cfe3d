//! The gateway service facade.
//!
//! A [`Gateway`] owns the two storage adapters, the processor chains and the
//! process-wide session registry, and exposes the five operations of the
//! session protocol. Construct one with [`GatewayBuilder`].

use std::sync::Arc;

use futures::stream::BoxStream;
use tracing::warn;

use crate::api::{
    AckRequest, GetOffsetsReply, GetOffsetsRequest, PublishReply, PublishRequest, ReceiveReply,
    ReceiveRequest, SubscribeReply, SubscribeRequest,
};
use crate::group::GroupId;
use crate::processor::{PostProcessor, PostProcessorChain, PreProcessor, PreProcessorChain};
use crate::record::Envelope;
use crate::status::{map_terminal, Status};
use crate::storage::{PositionsStorage, RecordsStorage};

pub mod error;
mod receive;
mod registry;
mod subscribe;

use self::registry::Registry;

/// Default bound of the per-call subscribe reply channel.
///
/// Models the transport window: replies beyond it wait for the client to
/// drain earlier ones.
pub const DEFAULT_REPLY_BUFFER: usize = 32;

/// Builder for [`Gateway`].
pub struct GatewayBuilder {
    records: Arc<dyn RecordsStorage>,
    positions: Arc<dyn PositionsStorage>,
    pre_processors: Vec<Arc<dyn PreProcessor>>,
    post_processors: Vec<Arc<dyn PostProcessor>>,
    reply_buffer: usize,
}

impl GatewayBuilder {
    /// Create a builder over the two storage adapters.
    pub fn new(records: Arc<dyn RecordsStorage>, positions: Arc<dyn PositionsStorage>) -> Self {
        Self {
            records,
            positions,
            pre_processors: Vec::new(),
            post_processors: Vec::new(),
            reply_buffer: DEFAULT_REPLY_BUFFER,
        }
    }

    /// Append a stage to the publish-path chain.
    pub fn pre_processor(mut self, processor: Arc<dyn PreProcessor>) -> Self {
        self.pre_processors.push(processor);
        self
    }

    /// Append a stage to the delivery-path chain.
    pub fn post_processor(mut self, processor: Arc<dyn PostProcessor>) -> Self {
        self.post_processors.push(processor);
        self
    }

    /// Bound of the subscribe reply channel.
    pub fn reply_buffer(mut self, reply_buffer: usize) -> Self {
        self.reply_buffer = reply_buffer.max(1);
        self
    }

    /// Build [`Gateway`].
    pub fn build(self) -> Gateway {
        Gateway {
            records: self.records,
            positions: self.positions,
            pre: PreProcessorChain::new(self.pre_processors),
            post: PostProcessorChain::new(self.post_processors),
            registry: Arc::new(Registry::default()),
            reply_buffer: self.reply_buffer,
        }
    }
}

impl std::fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBuilder").finish_non_exhaustive()
    }
}

/// The streaming gateway core.
///
/// Cheap to clone; clones share the session registry. Long-lived operations
/// spawn their drivers on the ambient tokio runtime.
#[derive(Clone)]
pub struct Gateway {
    records: Arc<dyn RecordsStorage>,
    positions: Arc<dyn PositionsStorage>,
    pre: PreProcessorChain,
    post: PostProcessorChain,
    registry: Arc<Registry>,
    reply_buffer: usize,
}

impl Gateway {
    /// Publish one envelope and report where it landed.
    ///
    /// The envelope runs through the pre-processor chain first; a failing
    /// stage aborts the publish.
    pub async fn publish(&self, request: PublishRequest) -> Result<PublishReply, Status> {
        let PublishRequest { topic, key, value } = request;
        let envelope = Envelope { topic, key, value };

        let envelope = self
            .pre
            .apply(envelope)
            .await
            .map_err(|err| map_terminal("publish", err))?;

        let info = self
            .records
            .publish(envelope)
            .await
            .map_err(|err| map_terminal("publish", err.into()))?;

        Ok(PublishReply {
            topic: info.topic,
            partition: info.partition,
            offset: info.offset,
        })
    }

    /// Join a consumer group and stream partition assignments.
    ///
    /// Each reply names a partition assigned to the freshly minted session.
    /// Dropping the stream cancels the subscription and tears the session
    /// down.
    pub fn subscribe(
        &self,
        request: SubscribeRequest,
    ) -> BoxStream<'static, Result<SubscribeReply, Status>> {
        subscribe::run(self, request)
    }

    /// Stream records for one assigned partition.
    ///
    /// An unknown (session, partition) completes empty: the session may have
    /// ended between assignment and this call. Dropping the stream pauses
    /// delivery without giving the partition up.
    pub fn receive(
        &self,
        request: ReceiveRequest,
    ) -> BoxStream<'static, Result<ReceiveReply, Status>> {
        receive::run(self, request)
    }

    /// Commit a consumed offset on behalf of a session.
    ///
    /// An unknown session completes successfully without committing, same
    /// race as [`Gateway::receive`]. Offsets are stored as sent: the gateway
    /// neither checks monotonicity nor deduplicates.
    pub async fn ack(&self, request: AckRequest) -> Result<(), Status> {
        let Some(subscription) = self.registry.subscription(&request.assignment.session_id)
        else {
            warn!(
                request = %escape_request(&request),
                "no registered subscription for ack request"
            );
            return Ok(());
        };

        self.positions
            .update(
                &subscription.topic,
                &subscription.group,
                request.assignment.partition,
                request.offset,
            )
            .await
            .map_err(|err| map_terminal("ack", err.into()))
    }

    /// Committed offsets for one exact group identity.
    pub async fn get_offsets(
        &self,
        request: GetOffsetsRequest,
    ) -> Result<GetOffsetsReply, Status> {
        let group = GroupId::resolve(&request.group, request.group_version);

        let offsets = self
            .positions
            .find_all(&request.topic, &group)
            .await
            .map_err(|err| map_terminal("get_offsets", err.into()))?;

        Ok(GetOffsetsReply { offsets })
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

/// Render a request for warning logs, keeping the entry on one line.
pub(crate) fn escape_request(request: &impl std::fmt::Debug) -> String {
    format!("{request:?}").replace('\n', "\\n").replace('\r', "\\r")
}
