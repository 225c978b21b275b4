//! Request decorators: composable units that each set or override one
//! aspect of the in-progress request descriptor.
//!
//! The aggregate applies a host-configurable ordered list to a fresh
//! [`RestInput`]. Order is significant: configuration seeds first, rule
//! overrides win over it, and token substitution runs last so it always
//! operates on the final literal strings. Hosts may insert their own
//! decorators anywhere in the list.

use std::sync::Arc;

use tracing::warn;

use crate::config::{ConfigStore, Content, RoutingRule};
use crate::message::InboundMessage;
use crate::rest::input::RestInput;
use crate::token::replace_message_tokens;

/// A single decoration step. Pure with respect to everything except the
/// descriptor it mutates; the pipeline applies decorators strictly in
/// sequence.
pub trait RestInputDecorator: Send + Sync {
    fn decorate(&self, input: &mut RestInput, rule: &RoutingRule, message: &dyn InboundMessage);
}

// ── Built-in decorators ─────────────────────────────────────────────

/// Seeds api token, HTTP method, and endpoint from the global
/// configuration. Lowest precedence; runs first.
pub struct ConfigurationDecorator {
    config: Arc<ConfigStore>,
}

impl ConfigurationDecorator {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }
}

impl RestInputDecorator for ConfigurationDecorator {
    fn decorate(&self, input: &mut RestInput, _rule: &RoutingRule, _message: &dyn InboundMessage) {
        let settings = self.config.settings();
        input.api_token = settings.api_token;
        if let Some(method) = settings.http_method.as_deref()
            && let Ok(parsed) = method.parse()
        {
            input.http_method = parsed;
        }
        input.endpoint = settings.endpoint;
    }
}

/// Overwrites api token, HTTP method, and endpoint with rule-level
/// `custom*` values when present. Rule always wins over configuration.
pub struct RuleOverridesDecorator;

impl RestInputDecorator for RuleOverridesDecorator {
    fn decorate(&self, input: &mut RestInput, rule: &RoutingRule, _message: &dyn InboundMessage) {
        if let Some(token) = &rule.custom_api_token {
            input.api_token = Some(token.clone());
        }
        if let Some(method) = rule.custom_http_method.as_deref()
            && let Ok(parsed) = method.parse()
        {
            input.http_method = parsed;
        }
        if let Some(endpoint) = &rule.custom_endpoint {
            input.endpoint = Some(endpoint.clone());
        }
    }
}

/// Sets the service path segment from the rule; the transport appends it
/// onto the endpoint when building the URL.
pub struct ServiceDecorator;

impl RestInputDecorator for ServiceDecorator {
    fn decorate(&self, input: &mut RestInput, rule: &RoutingRule, _message: &dyn InboundMessage) {
        input.service = rule.service.clone();
    }
}

/// Sets the query string from the rule.
pub struct QueryStringDecorator;

impl RestInputDecorator for QueryStringDecorator {
    fn decorate(&self, input: &mut RestInput, rule: &RoutingRule, _message: &dyn InboundMessage) {
        input.query_string = rule.query_string.clone();
    }
}

/// Sets the request content from the rule: a literal string is used
/// verbatim, a structured value is serialized to compact JSON, and an
/// absent value inherits whatever content is already on the descriptor.
pub struct ContentDecorator;

impl RestInputDecorator for ContentDecorator {
    fn decorate(&self, input: &mut RestInput, rule: &RoutingRule, _message: &dyn InboundMessage) {
        match &rule.content {
            Some(Content::Text(text)) => input.content = Some(text.clone()),
            Some(Content::Structured(value)) => match serde_json::to_string(value) {
                Ok(json) => input.content = Some(json),
                Err(e) => warn!(key = %rule.key, error = %e, "Unable to serialize rule content"),
            },
            None => {}
        }
    }
}

/// Sets the named outbound transport profile from the rule, enabling
/// per-rule client configuration.
pub struct HttpClientNameDecorator;

impl RestInputDecorator for HttpClientNameDecorator {
    fn decorate(&self, input: &mut RestInput, rule: &RoutingRule, _message: &dyn InboundMessage) {
        input.http_client_name = rule.custom_http_client_name.clone();
    }
}

// ── Token-substitution decorators ───────────────────────────────────
//
// One per field, so a host can drop or reorder substitution per field.
// They run after all literal values are in place.

pub struct EndpointTokenDecorator;

impl RestInputDecorator for EndpointTokenDecorator {
    fn decorate(&self, input: &mut RestInput, _rule: &RoutingRule, message: &dyn InboundMessage) {
        if let Some(endpoint) = &input.endpoint {
            input.endpoint = Some(replace_message_tokens(endpoint, message));
        }
    }
}

pub struct QueryStringTokenDecorator;

impl RestInputDecorator for QueryStringTokenDecorator {
    fn decorate(&self, input: &mut RestInput, _rule: &RoutingRule, message: &dyn InboundMessage) {
        if let Some(query) = &input.query_string {
            input.query_string = Some(replace_message_tokens(query, message));
        }
    }
}

pub struct ContentTokenDecorator;

impl RestInputDecorator for ContentTokenDecorator {
    fn decorate(&self, input: &mut RestInput, _rule: &RoutingRule, message: &dyn InboundMessage) {
        if let Some(content) = &input.content {
            input.content = Some(replace_message_tokens(content, message));
        }
    }
}

pub struct HttpClientNameTokenDecorator;

impl RestInputDecorator for HttpClientNameTokenDecorator {
    fn decorate(&self, input: &mut RestInput, _rule: &RoutingRule, message: &dyn InboundMessage) {
        if let Some(name) = &input.http_client_name {
            input.http_client_name = Some(replace_message_tokens(name, message));
        }
    }
}

// ── Aggregate ───────────────────────────────────────────────────────

/// Applies an ordered decorator list to a freshly constructed descriptor.
/// No business logic of its own; sequence is the whole contract.
pub struct AggregateDecorator {
    decorators: Vec<Arc<dyn RestInputDecorator>>,
}

impl AggregateDecorator {
    /// Build an aggregate from an explicit, host-ordered list.
    pub fn new(decorators: Vec<Arc<dyn RestInputDecorator>>) -> Self {
        Self { decorators }
    }

    /// The canonical built-in list, in precedence order.
    pub fn built_in(config: Arc<ConfigStore>) -> Self {
        Self::new(vec![
            Arc::new(ConfigurationDecorator::new(config)),
            Arc::new(RuleOverridesDecorator),
            Arc::new(ServiceDecorator),
            Arc::new(QueryStringDecorator),
            Arc::new(ContentDecorator),
            Arc::new(HttpClientNameDecorator),
            Arc::new(EndpointTokenDecorator),
            Arc::new(QueryStringTokenDecorator),
            Arc::new(ContentTokenDecorator),
            Arc::new(HttpClientNameTokenDecorator),
        ])
    }

    /// Apply the full list to a fresh descriptor and return it.
    pub fn decorate(&self, rule: &RoutingRule, message: &dyn InboundMessage) -> RestInput {
        let mut input = RestInput::default();
        for decorator in &self.decorators {
            decorator.decorate(&mut input, rule, message);
        }
        input
    }
}
