//! Client side of the WebSocket opening handshake (RFC 6455 section 4.1).

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Parse header lines (everything after the request/status line) into a map
/// keyed by lowercase header name. Stops at the first empty line.
pub fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }
    headers
}

/// Computes the Sec-WebSocket-Accept value: Base64(SHA-1(key + GUID)).
///
/// ```
/// use wsprobe::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Fresh Sec-WebSocket-Key: 16 random bytes, base64 encoded.
///
/// # Errors
///
/// Returns `Error::Io` if the OS RNG is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(|e| Error::Io(e.to_string()))?;
    Ok(BASE64.encode(nonce))
}

/// Offset just past the `\r\n\r\n` that terminates an HTTP header block.
#[must_use]
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Upgrade request sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHandshake {
    /// Value of the Host header (`host` or `host:port`).
    pub host: String,
    /// Request target, including any query string.
    pub path: String,
    /// Sec-WebSocket-Key.
    pub key: String,
    /// Extra headers, written in order.
    pub headers: Vec<(String, String)>,
}

impl ClientHandshake {
    /// Build a request with a freshly generated key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if no key could be generated.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        Ok(Self {
            host: host.into(),
            path: path.into(),
            key: generate_key()?,
            headers: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Serialize the HTTP/1.1 upgrade request.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandshake` if a header value contains CR or LF.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n",
            self.path, self.host, self.key
        );
        for (name, value) in &self.headers {
            if value.contains(['\r', '\n']) || name.contains(['\r', '\n']) {
                return Err(Error::InvalidHandshake(format!(
                    "header {name} contains CR or LF"
                )));
            }
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        request.push_str("\r\n");
        Ok(request.into_bytes())
    }

    /// Accept value the server must answer with.
    #[must_use]
    pub fn expected_accept(&self) -> String {
        compute_accept_key(&self.key)
    }
}

/// Server answer to the upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Sec-WebSocket-Accept value.
    pub accept: String,
}

impl HandshakeResponse {
    /// Parse the response header block.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandshake` if the data is not UTF-8, the status
    /// is not 101, or `Upgrade`, `Connection` or `Sec-WebSocket-Accept` is
    /// missing or wrong.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| {
                Error::InvalidHandshake(format!("Malformed status line: {status_line}"))
            })?;
        if status != 101 {
            return Err(Error::InvalidHandshake(format!(
                "Expected 101 status, got: {status_line}"
            )));
        }

        let headers = parse_headers(lines);

        let upgrade = headers
            .get("upgrade")
            .ok_or_else(|| Error::InvalidHandshake("Missing Upgrade header in response".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Upgrade header: {upgrade}"
            )));
        }

        let connection = headers.get("connection").ok_or_else(|| {
            Error::InvalidHandshake("Missing Connection header in response".into())
        })?;
        if !connection.to_lowercase().contains("upgrade") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Connection header: {connection}"
            )));
        }

        let accept = headers
            .get("sec-websocket-accept")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?
            .clone();

        Ok(Self { status, accept })
    }

    /// Check the accept value against the request that produced it.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandshake` on mismatch.
    pub fn verify(&self, request: &ClientHandshake) -> Result<()> {
        if self.accept == request.expected_accept() {
            Ok(())
        } else {
            Err(Error::InvalidHandshake("Invalid Sec-WebSocket-Accept".into()))
        }
    }
}
