//! Client WebSocket connections used as notification channels.
//!
//! ## Connection Lifecycle
//!
//! 1. [`Dialer::dial`] opens TCP (and TLS for `wss://`)
//! 2. [`WebSocket::handshake`] upgrades the stream; the connection is **Open**
//! 3. [`WebSocket::close`] moves to **Closing** until the server replies
//! 4. **Closed** after the close handshake or when the stream ends

#[allow(clippy::module_inception)]
mod connection;
mod endpoint;
mod state;
mod stream;

pub use connection::WebSocket;
pub use endpoint::Endpoint;
pub use state::ConnectionState;
pub use stream::{Dialer, MaybeTlsStream};
