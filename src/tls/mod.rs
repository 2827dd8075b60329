//! TLS for `wss://` notification endpoints.
//!
//! Only the rustls client side is provided (feature `tls-rustls`). Without the
//! feature, secure endpoints fail at dial time with [`crate::Error::Tls`].

#[cfg(feature = "tls-rustls")]
mod rustls_impl;

#[cfg(feature = "tls-rustls")]
pub use rustls_impl::{TlsConnector, TlsStream, client_config, load_certs_from_file};
