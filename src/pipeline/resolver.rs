//! Mapping resolution: compute a lookup key from the message and fetch
//! the matching routing rule.

use std::sync::Arc;

use crate::config::{ConfigStore, RoutingRule};
use crate::error::ResolveError;
use crate::message::InboundMessage;

/// Key-extraction strategy, injected by the host. The default keys on the
/// sender address; a host may key on the recipient (or anything else)
/// without touching any other component.
pub trait KeyExtractor: Send + Sync {
    fn extract_key(&self, message: &dyn InboundMessage) -> Option<String>;
}

/// Default strategy: first sender address.
pub struct SenderKeyExtractor;

impl KeyExtractor for SenderKeyExtractor {
    fn extract_key(&self, message: &dyn InboundMessage) -> Option<String> {
        message.first_from_address().map(|s| s.to_string())
    }
}

/// Alternate strategy: first recipient address.
pub struct RecipientKeyExtractor;

impl KeyExtractor for RecipientKeyExtractor {
    fn extract_key(&self, message: &dyn InboundMessage) -> Option<String> {
        message.first_to_address().map(|s| s.to_string())
    }
}

/// Pure function of (message, extractor, table): returns the resolved key
/// and its rule, or the error that short-circuits the pipeline.
pub fn resolve_mapping(
    message: &dyn InboundMessage,
    extractor: &dyn KeyExtractor,
    store: &ConfigStore,
) -> Result<(String, Arc<RoutingRule>), ResolveError> {
    let key = extractor
        .extract_key(message)
        .ok_or(ResolveError::MissingAddress)?;
    let rule = store
        .mapping(&key)
        .ok_or_else(|| ResolveError::MappingNotFound(key.clone()))?;
    Ok((key, rule))
}
