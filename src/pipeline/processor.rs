//! Per-message processing: the primary REST pipeline plus the seam for
//! host-registered side-effect processors.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::config::ConfigStore;
use crate::error::Error;
use crate::message::InboundMessage;
use crate::pipeline::resolver::{KeyExtractor, resolve_mapping};
use crate::rest::client::RestClient;
use crate::rest::decorators::AggregateDecorator;

/// Outcome of processing one message. Success is defined as the absence
/// of an error string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    error: Option<String>,
}

impl ProcessResult {
    pub fn success() -> Self {
        Self { error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        !self
            .error
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty())
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// A host-registered side-effect step that runs before the primary
/// pipeline. Failures are logged by the loop and never block subsequent
/// processors or the primary pipeline.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: &dyn InboundMessage) -> Result<(), Error>;
}

/// The primary pipeline: resolve the mapping, decorate a fresh request
/// descriptor, dispatch it, and fold every outcome into a
/// [`ProcessResult`].
pub struct RestMessageProcessor {
    config: Arc<ConfigStore>,
    key_extractor: Arc<dyn KeyExtractor>,
    decorator: AggregateDecorator,
    client: Arc<dyn RestClient>,
}

impl RestMessageProcessor {
    pub fn new(
        config: Arc<ConfigStore>,
        key_extractor: Arc<dyn KeyExtractor>,
        decorator: AggregateDecorator,
        client: Arc<dyn RestClient>,
    ) -> Self {
        Self {
            config,
            key_extractor,
            decorator,
            client,
        }
    }

    pub async fn process(&self, message: &dyn InboundMessage) -> ProcessResult {
        let (key, rule) =
            match resolve_mapping(message, self.key_extractor.as_ref(), &self.config) {
                Ok(resolved) => resolved,
                // Resolution errors short-circuit without touching the transport.
                Err(e) => return ProcessResult::failure(e.to_string()),
            };

        let input = self.decorator.decorate(&rule, message);
        match self.client.invoke(&input).await {
            Ok(response) if response.is_success() => ProcessResult::success(),
            Ok(response) => ProcessResult::failure(response.failure_reason()),
            Err(e) => {
                error!(key = %key, error = %e, "Error invoking REST service for mapping");
                ProcessResult::failure(format!(
                    "Error invoking REST service for mapping. Key='{key}'"
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::{GatewayConfig, RoutingRule};
    use crate::error::TransportError;
    use crate::message::StaticMessage;
    use crate::pipeline::resolver::SenderKeyExtractor;
    use crate::rest::client::RestResponse;
    use crate::rest::input::RestInput;

    enum Reply {
        Status(u16),
        Error,
    }

    struct MockClient {
        reply: Reply,
        calls: Mutex<Vec<RestInput>>,
    }

    impl MockClient {
        fn status(status: u16) -> Arc<Self> {
            Arc::new(Self {
                reply: Reply::Status(status),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn erroring() -> Arc<Self> {
            Arc::new(Self {
                reply: Reply::Error,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<RestInput> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RestClient for MockClient {
        async fn invoke(&self, input: &RestInput) -> Result<RestResponse, TransportError> {
            self.calls.lock().unwrap().push(input.clone());
            match self.reply {
                Reply::Status(status) => Ok(RestResponse {
                    status,
                    reason: Some("Service Unavailable".into()),
                }),
                Reply::Error => Err(TransportError::Http("connection refused".into())),
            }
        }
    }

    fn processor(client: Arc<MockClient>) -> RestMessageProcessor {
        let config = Arc::new(ConfigStore::from_config(GatewayConfig {
            endpoint: Some("http://example.com".into()),
            mappings: vec![RoutingRule {
                key: "sender@somewhere.com".into(),
                ..Default::default()
            }],
            ..Default::default()
        }));
        RestMessageProcessor::new(
            config.clone(),
            Arc::new(SenderKeyExtractor),
            AggregateDecorator::built_in(config),
            client,
        )
    }

    fn message() -> StaticMessage {
        StaticMessage::new(
            Some("sender@somewhere.com".to_string()),
            None,
            Some("body".to_string()),
        )
    }

    #[test]
    fn blank_error_counts_as_success() {
        assert!(ProcessResult::success().is_success());
        assert!(ProcessResult::failure("  ").is_success());
        assert!(!ProcessResult::failure("boom").is_success());
    }

    #[tokio::test]
    async fn successful_dispatch_reports_success() {
        let client = MockClient::status(200);
        let result = processor(client.clone()).process(&message()).await;
        assert!(result.is_success());
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn non_success_status_reports_the_reason() {
        let client = MockClient::status(503);
        let result = processor(client).process(&message()).await;
        assert!(!result.is_success());
        assert_eq!(result.error(), Some("Service Unavailable"));
    }

    #[tokio::test]
    async fn transport_error_reports_the_mapping_key() {
        let client = MockClient::erroring();
        let result = processor(client).process(&message()).await;
        assert!(!result.is_success());
        assert!(
            result
                .error()
                .unwrap()
                .contains("Key='sender@somewhere.com'")
        );
    }

    #[tokio::test]
    async fn missing_address_short_circuits_before_dispatch() {
        let client = MockClient::status(200);
        let result = processor(client.clone())
            .process(&StaticMessage::default())
            .await;
        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("No address"));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_mapping_short_circuits_before_dispatch() {
        let client = MockClient::status(200);
        let unknown = StaticMessage::new(Some("other@nowhere.com".to_string()), None, None);
        let result = processor(client.clone()).process(&unknown).await;
        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("No mapping found"));
        assert!(client.calls().is_empty());
    }
}
