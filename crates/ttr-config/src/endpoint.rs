use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// TCP endpoint the daemon listens on.
///
/// The wire protocol is TCP only; clients and the daemon agree on the
/// endpoint through this shared type.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ListenEndpoint {
    /// Host name or address to bind.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
}

impl ListenEndpoint {
    /// Builds an endpoint from its parts.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ListenEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "tcp://{}:{}", self.host, self.port)
    }
}

impl FromStr for ListenEndpoint {
    type Err = EndpointParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        if url.scheme() != "tcp" {
            return Err(EndpointParseError::UnsupportedScheme(
                url.scheme().to_owned(),
            ));
        }
        let host = url
            .host_str()
            .ok_or_else(|| EndpointParseError::MissingHost(input.to_owned()))?;
        let port = url
            .port()
            .ok_or_else(|| EndpointParseError::MissingPort(input.to_owned()))?;
        Ok(Self::new(host, port))
    }
}

/// Errors encountered while parsing a [`ListenEndpoint`] from text.
#[derive(Debug, Error)]
pub enum EndpointParseError {
    /// Scheme was not `tcp`.
    #[error("unsupported endpoint scheme '{0}'")]
    UnsupportedScheme(String),
    /// Host name was missing.
    #[error("missing host in '{0}'")]
    MissingHost(String),
    /// Port was missing from the address.
    #[error("missing port in '{0}'")]
    MissingPort(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_tcp_endpoint() {
        let endpoint = ListenEndpoint::new("127.0.0.1", 25000);
        assert_eq!(endpoint.to_string(), "tcp://127.0.0.1:25000");
    }

    #[test]
    fn parses_tcp_endpoint() {
        let endpoint: ListenEndpoint = "tcp://127.0.0.1:9000".parse().unwrap();
        assert_eq!(endpoint, ListenEndpoint::new("127.0.0.1", 9000));
    }

    #[test]
    fn rejects_non_tcp_scheme() {
        let error = "unix:///tmp/ttr.sock".parse::<ListenEndpoint>().unwrap_err();
        assert!(matches!(error, EndpointParseError::UnsupportedScheme(_)));
    }

    #[test]
    fn rejects_missing_port() {
        let error = "tcp://localhost".parse::<ListenEndpoint>().unwrap_err();
        assert!(matches!(error, EndpointParseError::MissingPort(_)));
    }
}
