//! TCP dialing with optional TLS.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::connection::Endpoint;
use crate::error::{Error, Result};
#[cfg(feature = "tls-rustls")]
use crate::tls::{TlsConnector, TlsStream};

/// Plain TCP or TLS-wrapped TCP.
pub enum MaybeTlsStream {
    Plain(TcpStream),
    #[cfg(feature = "tls-rustls")]
    Tls(Box<TlsStream>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Opens transport streams to one endpoint. Built once and shared by every
/// client task.
#[derive(Debug, Clone)]
pub struct Dialer {
    endpoint: Endpoint,
    #[cfg(feature = "tls-rustls")]
    tls: Option<TlsConnector>,
}

impl Dialer {
    /// Prepare a dialer, loading TLS configuration if the endpoint is secure.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tls` for a secure endpoint when TLS support is not
    /// compiled in or the CA file is unusable.
    pub fn new(endpoint: Endpoint, ca_file: Option<&Path>) -> Result<Self> {
        #[cfg(feature = "tls-rustls")]
        {
            let tls = if endpoint.secure {
                Some(TlsConnector::new(crate::tls::client_config(ca_file)?))
            } else {
                None
            };
            Ok(Self { endpoint, tls })
        }

        #[cfg(not(feature = "tls-rustls"))]
        {
            let _ = ca_file;
            if endpoint.secure {
                return Err(Error::Tls(
                    "wss:// requires the tls-rustls feature".to_string(),
                ));
            }
            Ok(Self { endpoint })
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Open a TCP connection and run the TLS handshake when required.
    ///
    /// # Errors
    ///
    /// I/O errors from connect, or `Error::Tls` from the TLS handshake.
    pub async fn dial(&self) -> Result<MaybeTlsStream> {
        let tcp = TcpStream::connect(self.endpoint.socket_addr()).await?;
        tcp.set_nodelay(true)?;

        #[cfg(feature = "tls-rustls")]
        {
            if let Some(tls) = &self.tls {
                let stream = tls.connect(&self.endpoint.host, tcp).await?;
                return Ok(MaybeTlsStream::Tls(Box::new(stream)));
            }
        }

        if self.endpoint.secure {
            return Err(Error::Tls("no TLS connector configured".to_string()));
        }
        Ok(MaybeTlsStream::Plain(tcp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "tls-rustls"))]
    #[test]
    fn test_secure_endpoint_requires_tls_feature() {
        let endpoint = Endpoint::parse("wss://example.com/ws").unwrap();
        assert!(matches!(Dialer::new(endpoint, None), Err(Error::Tls(_))));
    }

    #[tokio::test]
    async fn test_dial_plain() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let endpoint = Endpoint::parse(&format!("ws://127.0.0.1:{port}/ws")).unwrap();
        let dialer = Dialer::new(endpoint, None).unwrap();
        let stream = dialer.dial().await.unwrap();
        assert!(matches!(stream, MaybeTlsStream::Plain(_)));
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = Endpoint::parse(&format!("ws://127.0.0.1:{port}/ws")).unwrap();
        let dialer = Dialer::new(endpoint, None).unwrap();
        assert!(matches!(dialer.dial().await, Err(Error::Io(_))));
    }
}
