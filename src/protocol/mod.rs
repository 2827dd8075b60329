//! Wire formats spoken by the notification channel: client-role WebSocket
//! (RFC 6455) and the Socket.IO packets layered on top of it.

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod socketio;

pub use frame::{Frame, FrameHeader};
pub use handshake::{ClientHandshake, HandshakeResponse, WS_GUID, compute_accept_key};
pub use mask::apply_mask;
pub use opcode::OpCode;
