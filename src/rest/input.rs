//! The in-progress outbound request descriptor.

use std::fmt;
use std::str::FromStr;

/// HTTP method for the outbound request. Defaults to GET.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ();

    /// Case-insensitive parse. Configuration strings that do not name a
    /// method leave the prior value in place, so the error carries nothing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "TRACE" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

/// Mutable descriptor of the outbound HTTP request, built per message by
/// the decoration pipeline and then handed to the transport.
///
/// Decorators mutate it strictly in sequence; it is never shared between
/// decorators concurrently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestInput {
    pub api_token: Option<String>,
    pub http_method: HttpMethod,
    pub endpoint: Option<String>,
    pub service: Option<String>,
    pub query_string: Option<String>,
    pub content: Option<String>,
    pub http_client_name: Option<String>,
}
