//! Inbound message capability surface.
//!
//! The protocol engine that actually speaks SMTP is a collaborator; the
//! gateway only consumes this read-only view of a delivered message. A
//! message is immutable for the lifetime of processing one item.

use mail_parser::MessageParser;

/// Read-only view of an inbound message.
pub trait InboundMessage: Send + Sync {
    /// First sender address, if the message carried one.
    fn first_from_address(&self) -> Option<&str>;

    /// First recipient address, if the message carried one.
    fn first_to_address(&self) -> Option<&str>;

    /// Message body as readable text.
    fn body_as_string(&self) -> Option<&str>;
}

/// An inbound message parsed from raw RFC 822 bytes.
#[derive(Debug, Clone)]
pub struct ParsedEmail {
    from: Option<String>,
    to: Option<String>,
    body: Option<String>,
}

impl ParsedEmail {
    /// Parse raw RFC 822 bytes. Returns `None` when the bytes are not a
    /// parseable message at all; individual missing headers are fine.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;
        let from = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string());
        let to = parsed
            .to()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string());
        let body = parsed.body_text(0).map(|text| text.to_string());
        Some(Self { from, to, body })
    }
}

impl InboundMessage for ParsedEmail {
    fn first_from_address(&self) -> Option<&str> {
        self.from.as_deref()
    }

    fn first_to_address(&self) -> Option<&str> {
        self.to.as_deref()
    }

    fn body_as_string(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

/// In-memory message for hosts (and tests) that already hold the parts.
#[derive(Debug, Clone, Default)]
pub struct StaticMessage {
    pub from: Option<String>,
    pub to: Option<String>,
    pub body: Option<String>,
}

impl StaticMessage {
    pub fn new(
        from: impl Into<Option<String>>,
        to: impl Into<Option<String>>,
        body: impl Into<Option<String>>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            body: body.into(),
        }
    }
}

impl InboundMessage for StaticMessage {
    fn first_from_address(&self) -> Option<&str> {
        self.from.as_deref()
    }

    fn first_to_address(&self) -> Option<&str> {
        self.to.as_deref()
    }

    fn body_as_string(&self) -> Option<&str> {
        self.body.as_deref()
    }
}
