//! The single-consumer message processing loop.
//!
//! The inbound transport pushes delivered messages onto the queue from
//! its own task; this loop is the only consumer. Processing is strictly
//! sequential, one message and one outbound call at a time, to preserve
//! the decorator ordering contract. Shutdown is cooperative: the signal
//! is observed at the queue wait and around the outbound call, and an
//! in-flight call finishes but has its result discarded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info};

use crate::message::InboundMessage;
use crate::pipeline::processor::{MessageProcessor, ProcessResult, RestMessageProcessor};

/// A delivered message waiting in the inbound queue.
pub type QueuedMessage = Arc<dyn InboundMessage>;

/// Published once per message, success or failure.
#[derive(Debug, Clone)]
pub struct MessageProcessed {
    pub result: ProcessResult,
    pub processed_at: DateTime<Utc>,
}

/// Queue consumer driving side-effect processors, the primary pipeline,
/// and result publication.
pub struct ProcessingLoop {
    queue: mpsc::Receiver<QueuedMessage>,
    side_processors: Vec<Arc<dyn MessageProcessor>>,
    processor: Arc<RestMessageProcessor>,
    events: broadcast::Sender<MessageProcessed>,
    shutdown: watch::Receiver<bool>,
}

impl ProcessingLoop {
    pub fn new(
        queue: mpsc::Receiver<QueuedMessage>,
        processor: Arc<RestMessageProcessor>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            queue,
            side_processors: Vec::new(),
            processor,
            events,
            shutdown,
        }
    }

    /// Register a side-effect processor. Registration order is execution
    /// order.
    pub fn with_side_processor(mut self, processor: Arc<dyn MessageProcessor>) -> Self {
        self.side_processors.push(processor);
        self
    }

    /// Subscribe to per-message results.
    pub fn subscribe(&self) -> broadcast::Receiver<MessageProcessed> {
        self.events.subscribe()
    }

    /// Drain the queue until it closes or shutdown is requested.
    pub async fn run(mut self) {
        info!("Message processing loop started");
        loop {
            let message = tokio::select! {
                changed = self.shutdown.changed() => {
                    match changed {
                        Ok(()) if *self.shutdown.borrow() => break,
                        Ok(()) => continue,
                        // Shutdown handle dropped: the host is gone.
                        Err(_) => break,
                    }
                }
                message = self.queue.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            if *self.shutdown.borrow() {
                break;
            }

            debug!("Processing message");
            for processor in &self.side_processors {
                if let Err(e) = processor.process(message.as_ref()).await {
                    error!(error = %e, "Error in side-effect message processor");
                }
            }

            let result = self.processor.process(message.as_ref()).await;
            // The in-flight call was allowed to finish; if shutdown came in
            // meanwhile its outcome is discarded, not reported.
            if *self.shutdown.borrow() {
                break;
            }
            // A blank error string counts as success; only real failures
            // are logged.
            if !result.is_success()
                && let Some(reason) = result.error()
            {
                error!(error = %reason, "Error processing message");
            }
            let _ = self.events.send(MessageProcessed {
                result,
                processed_at: Utc::now(),
            });
        }
        info!("Message processing loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::{ConfigStore, GatewayConfig, RoutingRule};
    use crate::error::{Error, TransportError};
    use crate::message::StaticMessage;
    use crate::pipeline::resolver::SenderKeyExtractor;
    use crate::rest::client::{RestClient, RestResponse};
    use crate::rest::decorators::AggregateDecorator;
    use crate::rest::input::RestInput;

    struct OkClient {
        calls: Mutex<Vec<RestInput>>,
    }

    #[async_trait]
    impl RestClient for OkClient {
        async fn invoke(&self, input: &RestInput) -> Result<RestResponse, TransportError> {
            self.calls.lock().unwrap().push(input.clone());
            Ok(RestResponse {
                status: 200,
                reason: None,
            })
        }
    }

    struct FailingSideProcessor;

    #[async_trait]
    impl MessageProcessor for FailingSideProcessor {
        async fn process(&self, _message: &dyn InboundMessage) -> Result<(), Error> {
            Err(TransportError::Http("side effect exploded".into()).into())
        }
    }

    struct CountingSideProcessor {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageProcessor for CountingSideProcessor {
        async fn process(&self, _message: &dyn InboundMessage) -> Result<(), Error> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn rest_processor(client: Arc<OkClient>) -> Arc<RestMessageProcessor> {
        let config = Arc::new(ConfigStore::from_config(GatewayConfig {
            endpoint: Some("http://example.com".into()),
            mappings: vec![RoutingRule {
                key: "sender@somewhere.com".into(),
                ..Default::default()
            }],
            ..Default::default()
        }));
        Arc::new(RestMessageProcessor::new(
            config.clone(),
            Arc::new(SenderKeyExtractor),
            AggregateDecorator::built_in(config),
            client,
        ))
    }

    fn message() -> QueuedMessage {
        Arc::new(StaticMessage::new(
            Some("sender@somewhere.com".to_string()),
            None,
            Some("body".to_string()),
        ))
    }

    #[tokio::test]
    async fn publishes_one_result_per_message() {
        let client = Arc::new(OkClient {
            calls: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let processing = ProcessingLoop::new(rx, rest_processor(client.clone()), shutdown_rx);
        let mut events = processing.subscribe();

        tx.send(message()).await.unwrap();
        tx.send(message()).await.unwrap();
        drop(tx);
        processing.run().await;

        assert!(events.recv().await.unwrap().result.is_success());
        assert!(events.recv().await.unwrap().result.is_success());
        assert!(events.recv().await.is_err());
        assert_eq!(client.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn side_processor_failure_does_not_block_the_pipeline() {
        let client = Arc::new(OkClient {
            calls: Mutex::new(Vec::new()),
        });
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let processing = ProcessingLoop::new(rx, rest_processor(client.clone()), shutdown_rx)
            .with_side_processor(Arc::new(FailingSideProcessor))
            .with_side_processor(Arc::new(CountingSideProcessor {
                count: count.clone(),
            }));
        let mut events = processing.subscribe();

        tx.send(message()).await.unwrap();
        drop(tx);
        processing.run().await;

        // The failing processor neither stopped the counting one nor the
        // primary pipeline.
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(events.recv().await.unwrap().result.is_success());
        assert_eq!(client.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_results_are_published_not_swallowed() {
        let client = Arc::new(OkClient {
            calls: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let processing = ProcessingLoop::new(rx, rest_processor(client), shutdown_rx);
        let mut events = processing.subscribe();

        let unmapped: QueuedMessage = Arc::new(StaticMessage::new(
            Some("other@nowhere.com".to_string()),
            None,
            None,
        ));
        tx.send(unmapped).await.unwrap();
        drop(tx);
        processing.run().await;

        let event = events.recv().await.unwrap();
        assert!(!event.result.is_success());
        assert!(event.result.error().unwrap().contains("No mapping found"));
    }

    struct ErrorCounter(Arc<AtomicUsize>);

    impl tracing::Subscriber for ErrorCounter {
        fn enabled(&self, metadata: &tracing::Metadata<'_>) -> bool {
            metadata.level() == &tracing::Level::ERROR
        }
        fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }
        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}
        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}
        fn event(&self, _: &tracing::Event<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn enter(&self, _: &tracing::span::Id) {}
        fn exit(&self, _: &tracing::span::Id) {}
    }

    #[tokio::test]
    async fn only_failed_results_are_logged_as_errors() {
        let errors = Arc::new(AtomicUsize::new(0));
        let _guard = tracing::subscriber::set_default(ErrorCounter(errors.clone()));

        let client = Arc::new(OkClient {
            calls: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let processing = ProcessingLoop::new(rx, rest_processor(client), shutdown_rx);
        let mut events = processing.subscribe();

        tx.send(message()).await.unwrap();
        let unmapped: QueuedMessage = Arc::new(StaticMessage::new(
            Some("other@nowhere.com".to_string()),
            None,
            None,
        ));
        tx.send(unmapped).await.unwrap();
        drop(tx);
        processing.run().await;

        assert!(events.recv().await.unwrap().result.is_success());
        assert!(!events.recv().await.unwrap().result.is_success());
        // One error line for the failed message, none for the success.
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_discards_pending_work_without_reporting() {
        let client = Arc::new(OkClient {
            calls: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let processing = ProcessingLoop::new(rx, rest_processor(client), shutdown_rx);
        let mut events = processing.subscribe();

        tx.send(message()).await.unwrap();
        shutdown_tx.send(true).unwrap();
        processing.run().await;

        // No result event was published for the discarded message.
        assert!(events.try_recv().is_err());
    }
}
