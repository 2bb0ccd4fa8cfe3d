//! Processor chains applied around the record log.
//!
//! Pre-processors transform envelopes on the publish path; post-processors
//! transform record streams on the delivery path. Both chains are assembled
//! at startup and never change afterwards.

use std::sync::Arc;

use async_trait::async_trait;

use crate::gateway::error::{BoxError, Error};
use crate::record::Envelope;
use crate::storage::RecordStream;

/// A stage on the publish path.
#[async_trait]
pub trait PreProcessor: Send + Sync + 'static {
    /// Identity reported when this stage fails.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Transform an envelope, or fail the publish.
    async fn pre_process(&self, envelope: Envelope) -> Result<Envelope, BoxError>;
}

/// A stage on the delivery path.
pub trait PostProcessor: Send + Sync + 'static {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Wrap a record stream into a transformed one.
    fn post_process(&self, records: RecordStream) -> RecordStream;
}

/// Ordered pre-processors; stage `n` sees the output of stage `n - 1`.
#[derive(Clone, Default)]
pub struct PreProcessorChain {
    stages: Arc<[Arc<dyn PreProcessor>]>,
}

impl PreProcessorChain {
    pub fn new(stages: Vec<Arc<dyn PreProcessor>>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    /// Run the envelope through every stage in declared order.
    ///
    /// A failing stage aborts the chain; the error carries that stage's
    /// identity.
    pub(crate) async fn apply(&self, mut envelope: Envelope) -> Result<Envelope, Error> {
        for stage in self.stages.iter() {
            envelope = stage
                .pre_process(envelope)
                .await
                .map_err(|cause| Error::PreProcessor {
                    processor: stage.name().to_string(),
                    cause,
                })?;
        }

        Ok(envelope)
    }
}

impl std::fmt::Debug for PreProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreProcessorChain")
            .field("stages", &self.stages.len())
            .finish()
    }
}

/// Ordered post-processors over record streams.
#[derive(Clone, Default)]
pub struct PostProcessorChain {
    stages: Arc<[Arc<dyn PostProcessor>]>,
}

impl PostProcessorChain {
    pub fn new(stages: Vec<Arc<dyn PostProcessor>>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    pub(crate) fn apply(&self, records: RecordStream) -> RecordStream {
        self.stages
            .iter()
            .fold(records, |records, stage| stage.post_process(records))
    }
}

impl std::fmt::Debug for PostProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcessorChain")
            .field("stages", &self.stages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use bytes::Bytes;
    use futures::{stream, StreamExt};

    use crate::record::Record;

    struct TagValue(&'static str);

    #[async_trait]
    impl PreProcessor for TagValue {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn pre_process(&self, envelope: Envelope) -> Result<Envelope, BoxError> {
            let mut value = envelope.value.to_vec();
            value.extend_from_slice(self.0.as_bytes());

            Ok(Envelope {
                value: Bytes::from(value),
                ..envelope
            })
        }
    }

    struct RejectKey(&'static str);

    #[async_trait]
    impl PreProcessor for RejectKey {
        fn name(&self) -> &'static str {
            "reject-key"
        }

        async fn pre_process(&self, envelope: Envelope) -> Result<Envelope, BoxError> {
            if envelope.key == Bytes::from(self.0) {
                return Err(format!("key {:?} is rejected", self.0).into());
            }

            Ok(envelope)
        }
    }

    fn envelope(key: &'static str) -> Envelope {
        Envelope {
            topic: "t".to_string(),
            key: Bytes::from(key),
            value: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn pre_processors_run_in_declared_order() {
        let chain = PreProcessorChain::new(vec![Arc::new(TagValue("a")), Arc::new(TagValue("b"))]);

        let out = chain.apply(envelope("k")).await.unwrap();
        assert_eq!(out.value, Bytes::from("ab"));
    }

    #[tokio::test]
    async fn failure_carries_the_stage_identity() {
        let chain = PreProcessorChain::new(vec![
            Arc::new(TagValue("a")),
            Arc::new(RejectKey("bad")),
            Arc::new(TagValue("never")),
        ]);

        let err = chain.apply(envelope("bad")).await.unwrap_err();
        assert_matches!(&err, Error::PreProcessor { processor, .. } if processor == "reject-key");
        assert!(err.to_string().contains("reject-key"));
    }

    #[tokio::test]
    async fn empty_chain_is_the_identity() {
        let chain = PreProcessorChain::default();
        let input = envelope("k");
        assert_eq!(chain.apply(input.clone()).await.unwrap(), input);
    }

    struct DropOddOffsets;

    impl PostProcessor for DropOddOffsets {
        fn post_process(&self, records: RecordStream) -> RecordStream {
            records
                .filter(|record| {
                    let keep = match record {
                        Ok(record) => record.offset % 2 == 0,
                        Err(_) => true,
                    };
                    futures::future::ready(keep)
                })
                .boxed()
        }
    }

    fn record(offset: u64) -> Record {
        Record {
            envelope: envelope("k"),
            partition: 0,
            offset,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn post_processors_wrap_the_stream() {
        let chain = PostProcessorChain::new(vec![Arc::new(DropOddOffsets)]);

        let input = stream::iter((0..4).map(|offset| Ok(record(offset)))).boxed();
        let offsets: Vec<_> = chain
            .apply(input)
            .map(|record| record.unwrap().offset)
            .collect()
            .await;

        assert_eq!(offsets, vec![0, 2]);
    }
}
