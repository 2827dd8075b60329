//! WebSocket endpoint addressing.

use reqwest::Url;

use crate::error::{Error, Result};

/// Resolved `ws://` / `wss://` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// TLS required (`wss`).
    pub secure: bool,
    pub host: String,
    pub port: u16,
    /// Request target including the query string.
    pub path: String,
}

impl Endpoint {
    /// Parse a WebSocket URL. `http`/`https` are accepted and mapped to
    /// `ws`/`wss`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUrl` for unparsable URLs, other schemes, or
    /// URLs without a host.
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        Self::from_url(&parsed)
    }

    /// Join `path` onto the server base URL and convert the scheme.
    ///
    /// # Errors
    ///
    /// Same as [`Endpoint::parse`].
    pub fn derive(server_url: &str, path: &str) -> Result<Self> {
        let base =
            Url::parse(server_url).map_err(|e| Error::InvalidUrl(format!("{server_url}: {e}")))?;
        let joined = base
            .join(path)
            .map_err(|e| Error::InvalidUrl(format!("{path}: {e}")))?;
        Self::from_url(&joined)
    }

    fn from_url(url: &Url) -> Result<Self> {
        let secure = match url.scheme() {
            "ws" | "http" => false,
            "wss" | "https" => true,
            other => {
                return Err(Error::InvalidUrl(format!("unsupported scheme {other}")));
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(format!("{url}: missing host")))?
            .to_string();
        let port = url
            .port()
            .unwrap_or(if secure { 443 } else { 80 });
        let path = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };

        Ok(Self {
            secure,
            host,
            port,
            path,
        })
    }

    /// Host header value; the port is omitted when it is the scheme default.
    #[must_use]
    pub fn host_header(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// `host:port` for `TcpStream::connect`.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.secure { "wss" } else { "ws" };
        write!(f, "{scheme}://{}:{}{}", self.host, self.port, self.path)
    }
}
