//! Request/response exchanges with the transform and publish collaborators.

use std::future::Future;
use std::time::Instant;

use event_store::Event;

use crate::config::SequencerConfig;
use crate::error::SequencerError;
use crate::outcome::Stage;
use crate::services::{PublishReceipt, PublishService, TransformService};

/// Sends events to the transform and publish collaborators and reports the
/// result of each exchange.
///
/// Every exchange is bounded by the configured timeout, logged on failure
/// and measured. The coordinator holds no per-object state; ordering is the
/// dispatcher's concern.
pub struct PipelineCoordinator<T, P>
where
    T: TransformService,
    P: PublishService,
{
    transform: T,
    publish: P,
    config: SequencerConfig,
}

impl<T, P> PipelineCoordinator<T, P>
where
    T: TransformService,
    P: PublishService,
{
    pub fn new(transform: T, publish: P, config: SequencerConfig) -> Self {
        Self {
            transform,
            publish,
            config,
        }
    }

    /// Requests the transformed payload of `event`.
    #[tracing::instrument(skip(self, event), fields(object_id = %event.object_id, version = %event.version))]
    pub async fn request_transform(&self, event: &Event) -> Result<String, SequencerError> {
        self.exchange(Stage::Transform, event, self.transform.transform(event))
            .await
    }

    /// Requests publication of `event`, which must carry its transformed
    /// payload.
    #[tracing::instrument(skip(self, event), fields(object_id = %event.object_id, version = %event.version))]
    pub async fn request_publish(&self, event: &Event) -> Result<PublishReceipt, SequencerError> {
        let receipt = self
            .exchange(Stage::Publish, event, self.publish.publish(event))
            .await?;
        tracing::info!(queue = %receipt.queue, "event published");
        Ok(receipt)
    }

    async fn exchange<R>(
        &self,
        stage: Stage,
        event: &Event,
        call: impl Future<Output = Result<R, SequencerError>>,
    ) -> Result<R, SequencerError> {
        let started = Instant::now();

        let result = match self.config.exchange_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(SequencerError::Timeout {
                    stage,
                    object_id: event.object_id.clone(),
                    version: event.version,
                    timeout_ms: limit.as_millis(),
                }),
            },
            None => call.await,
        };

        metrics::histogram!("sequencer_exchange_duration_seconds", "stage" => stage.as_str())
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            metrics::counter!("sequencer_exchange_failures_total", "stage" => stage.as_str())
                .increment(1);
            tracing::error!(
                object_id = %event.object_id,
                version = %event.version,
                %stage,
                error = %e,
                "exchange failed"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::services::{InMemoryPublishService, InMemoryTransformService};
    use event_store::{MessageGroup, Version};

    fn event(version: i64) -> Event {
        Event::fresh("coord", Version::new(version), MessageGroup::default(), "<a/>")
    }

    #[tokio::test]
    async fn test_transform_then_publish() {
        let transform = InMemoryTransformService::new();
        let publish = InMemoryPublishService::new();
        let coordinator =
            PipelineCoordinator::new(transform.clone(), publish.clone(), SequencerConfig::new());

        let mut event = event(1);
        let payload = coordinator.request_transform(&event).await.unwrap();
        event.transformed_payload = Some(payload);
        let receipt = coordinator.request_publish(&event).await.unwrap();

        assert_eq!(receipt.queue, "gopsParcelSubQueue");
        assert_eq!(transform.transform_count(), 1);
        assert_eq!(publish.publish_count(), 1);
    }

    #[tokio::test]
    async fn test_collaborator_failure_is_returned() {
        let transform = InMemoryTransformService::new();
        transform.set_fail_on_transform(true);
        let coordinator = PipelineCoordinator::new(
            transform,
            InMemoryPublishService::new(),
            SequencerConfig::new(),
        );

        let result = coordinator.request_transform(&event(1)).await;
        assert!(matches!(result, Err(SequencerError::TransformService(_))));
    }

    #[tokio::test]
    async fn test_exchange_times_out() {
        let transform = InMemoryTransformService::new().with_delay(Duration::from_millis(200));
        let coordinator = PipelineCoordinator::new(
            transform,
            InMemoryPublishService::new(),
            SequencerConfig::new().with_exchange_timeout(Duration::from_millis(20)),
        );

        let err = coordinator.request_transform(&event(3)).await.unwrap_err();
        assert!(err.is_timeout());
        match err {
            SequencerError::Timeout {
                stage,
                version,
                timeout_ms,
                ..
            } => {
                assert_eq!(stage, Stage::Transform);
                assert_eq!(version, Version::new(3));
                assert_eq!(timeout_ms, 20);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_within_timeout_succeeds() {
        let transform = InMemoryTransformService::new().with_delay(Duration::from_millis(5));
        let coordinator = PipelineCoordinator::new(
            transform,
            InMemoryPublishService::new(),
            SequencerConfig::new().with_exchange_timeout(Duration::from_secs(2)),
        );

        assert!(coordinator.request_transform(&event(1)).await.is_ok());
    }
}
