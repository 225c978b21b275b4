//! SMTP relay forwarding: the alternate outbound path that forwards a
//! message as mail instead of (or in addition to) the HTTP call.
//!
//! Effective settings cascade through three layers, each field resolved
//! independently: process-wide defaults, then the global configuration's
//! relay settings, then the resolved rule's override. Relay failures are
//! logged and never fatal to the rest of message processing.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{debug, error};

use crate::config::{ConfigStore, RelayOverride};
use crate::error::{Error, RelayError};
use crate::message::InboundMessage;
use crate::pipeline::processor::MessageProcessor;
use crate::pipeline::resolver::KeyExtractor;

// ── Effective settings ──────────────────────────────────────────────

/// Fully resolved relay settings, no optional fields left.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayOptions {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub authenticate: bool,
    pub username: String,
    pub password: String,
    pub use_ssl: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 587,
            authenticate: false,
            username: String::new(),
            password: String::new(),
            use_ssl: true,
        }
    }
}

impl RelayOptions {
    /// Overlay one override layer. Each field is resolved independently;
    /// `None` inherits the current value.
    pub fn apply(&mut self, overrides: Option<&RelayOverride>) {
        let Some(overrides) = overrides else { return };
        if let Some(enabled) = overrides.enabled {
            self.enabled = enabled;
        }
        if let Some(host) = &overrides.host {
            self.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(authenticate) = overrides.authenticate {
            self.authenticate = authenticate;
        }
        if let Some(username) = &overrides.username {
            self.username = username.clone();
        }
        if let Some(password) = &overrides.password {
            self.password = password.clone();
        }
        if let Some(use_ssl) = overrides.use_ssl {
            self.use_ssl = use_ssl;
        }
    }

    /// Cascade defaults → configuration layer → rule layer.
    pub fn layered(
        defaults: &RelayOptions,
        config: Option<&RelayOverride>,
        rule: Option<&RelayOverride>,
    ) -> RelayOptions {
        let mut options = defaults.clone();
        options.apply(config);
        options.apply(rule);
        options
    }
}

// ── Mail transport ──────────────────────────────────────────────────

/// Outbound mail transport boundary.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        message: &dyn InboundMessage,
        options: &RelayOptions,
    ) -> Result<(), RelayError>;
}

/// lettre-backed SMTP transport. `use_ssl` selects TLS relay versus a
/// plaintext connection; credentials are attached when `authenticate`.
pub struct LettreMailTransport;

impl LettreMailTransport {
    fn build_transport(options: &RelayOptions) -> Result<SmtpTransport, RelayError> {
        let builder = if options.use_ssl {
            SmtpTransport::relay(&options.host).map_err(|e| RelayError::Connect {
                host: options.host.clone(),
                port: options.port,
                reason: e.to_string(),
            })?
        } else {
            SmtpTransport::builder_dangerous(&options.host)
        };
        let mut builder = builder.port(options.port);
        if options.authenticate {
            builder = builder.credentials(Credentials::new(
                options.username.clone(),
                options.password.clone(),
            ));
        }
        Ok(builder.build())
    }
}

fn mailbox(address: &str) -> Result<Mailbox, RelayError> {
    address.parse().map_err(|e: lettre::address::AddressError| {
        RelayError::InvalidMailbox {
            mailbox: address.to_string(),
            reason: e.to_string(),
        }
    })
}

#[async_trait]
impl MailTransport for LettreMailTransport {
    async fn send(
        &self,
        message: &dyn InboundMessage,
        options: &RelayOptions,
    ) -> Result<(), RelayError> {
        let from = message
            .first_from_address()
            .ok_or(RelayError::MissingSender)?;
        let to = message
            .first_to_address()
            .ok_or(RelayError::MissingRecipient)?;

        let email = Message::builder()
            .from(mailbox(from)?)
            .to(mailbox(to)?)
            .body(message.body_as_string().unwrap_or_default().to_string())
            .map_err(|e| RelayError::Build(e.to_string()))?;

        let transport = Self::build_transport(options)?;
        transport
            .send(&email)
            .map_err(|e| RelayError::Send(e.to_string()))?;
        debug!(to = %to, host = %options.host, "Message relayed");
        Ok(())
    }
}

// ── Relay processor ─────────────────────────────────────────────────

/// Side-effect processor that forwards each message over SMTP when the
/// cascaded settings enable it. Uses the same key-extraction step as the
/// primary pipeline; an unmatched key simply skips the rule layer.
pub struct SmtpRelayProcessor {
    defaults: RelayOptions,
    config: Arc<ConfigStore>,
    key_extractor: Arc<dyn KeyExtractor>,
    transport: Arc<dyn MailTransport>,
}

impl SmtpRelayProcessor {
    pub fn new(
        defaults: RelayOptions,
        config: Arc<ConfigStore>,
        key_extractor: Arc<dyn KeyExtractor>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            defaults,
            config,
            key_extractor,
            transport,
        }
    }

    fn effective_options(&self, message: &dyn InboundMessage) -> RelayOptions {
        let settings = self.config.settings();
        let rule = self
            .key_extractor
            .extract_key(message)
            .and_then(|key| self.config.mapping(&key));
        RelayOptions::layered(
            &self.defaults,
            settings.smtp_relay.as_ref(),
            rule.as_ref().and_then(|r| r.smtp_relay.as_ref()),
        )
    }
}

#[async_trait]
impl MessageProcessor for SmtpRelayProcessor {
    async fn process(&self, message: &dyn InboundMessage) -> Result<(), Error> {
        let options = self.effective_options(message);
        if !options.enabled {
            debug!("SMTP relay disabled, skipping");
            return Ok(());
        }

        match self.transport.send(message, &options).await {
            Ok(()) => Ok(()),
            // Connection/authentication trouble stops the relay path only.
            Err(e @ RelayError::Connect { .. }) => {
                error!(error = %e, "Unable to configure SMTP relay with the provided settings");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
