//! Engine.IO v4 / Socket.IO v5 packet encoding over WebSocket text frames.
//!
//! Only the subset a listening client needs: the open handshake, namespace
//! connect, heartbeats and incoming events.

use serde_json::Value;

use crate::error::{Error, Result};

/// Request path for a Socket.IO server reached directly over WebSocket.
pub const DEFAULT_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

/// Engine.IO pong answering a server ping.
pub const PONG: &str = "3";

/// Socket.IO connect request for the default namespace.
pub const CONNECT_DEFAULT_NAMESPACE: &str = "40";

/// Socket.IO disconnect from the default namespace.
pub const DISCONNECT_DEFAULT_NAMESPACE: &str = "41";

/// Engine.IO packet (first character of the frame).
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// `0` followed by the JSON handshake (sid, pingInterval, ...).
    Open(Value),
    /// `1`.
    Close,
    /// `2`, with optional probe data.
    Ping(String),
    /// `3`.
    Pong(String),
    /// `4` carrying a Socket.IO packet.
    Message(SocketPacket),
    /// `5` or `6`; irrelevant once on a WebSocket.
    Noop,
}

/// Socket.IO packet nested inside an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// `0`: namespace connected.
    Connect { namespace: String },
    /// `1`: namespace disconnected.
    Disconnect { namespace: String },
    /// `2`: event with its arguments.
    Event {
        namespace: String,
        name: String,
        args: Vec<Value>,
    },
    /// `4`: the server refused the namespace connect.
    ConnectError { namespace: String, message: String },
    /// `3`, `5`, `6`: acks and binary packets, unused here.
    Other,
}

impl EnginePacket {
    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::SocketIo` for an empty frame, an unknown packet type or
    /// a malformed JSON body.
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::SocketIo("empty packet".into()))?;
        let rest = chars.as_str();

        match kind {
            '0' => Ok(EnginePacket::Open(parse_json(rest)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(rest.to_string())),
            '3' => Ok(EnginePacket::Pong(rest.to_string())),
            '4' => Ok(EnginePacket::Message(SocketPacket::decode(rest)?)),
            '5' | '6' => Ok(EnginePacket::Noop),
            other => Err(Error::SocketIo(format!("unknown packet type {other:?}"))),
        }
    }
}

impl SocketPacket {
    fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::SocketIo("empty Socket.IO packet".into()))?;
        let (namespace, body) = split_namespace(chars.as_str());

        match kind {
            '0' => Ok(SocketPacket::Connect { namespace }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                // Optional ack id precedes the JSON array.
                let body = body.trim_start_matches(|c: char| c.is_ascii_digit());
                let mut args = match parse_json(body)? {
                    Value::Array(items) => items,
                    other => {
                        return Err(Error::SocketIo(format!(
                            "event payload is not an array: {other}"
                        )));
                    }
                };
                if args.is_empty() {
                    return Err(Error::SocketIo("event without a name".into()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(Error::SocketIo(format!("event name is not a string: {other}")));
                    }
                };
                Ok(SocketPacket::Event {
                    namespace,
                    name,
                    args,
                })
            }
            '4' => {
                let message = match parse_json(body) {
                    Ok(Value::Object(map)) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    _ => body.to_string(),
                };
                Ok(SocketPacket::ConnectError { namespace, message })
            }
            _ => Ok(SocketPacket::Other),
        }
    }
}

/// `"/admin,rest"` → `("/admin", "rest")`; no leading slash → default `/`.
fn split_namespace(text: &str) -> (String, &str) {
    if text.starts_with('/') {
        match text.split_once(',') {
            Some((ns, rest)) => (ns.to_string(), rest),
            None => (text.to_string(), ""),
        }
    } else {
        ("/".to_string(), text)
    }
}

fn parse_json(text: &str) -> Result<Value> {
    if text.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| Error::SocketIo(format!("bad JSON body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open() {
        let packet =
            EnginePacket::decode(r#"0{"sid":"abc","pingInterval":25000,"pingTimeout":20000}"#)
                .unwrap();
        match packet {
            EnginePacket::Open(body) => assert_eq!(body["sid"], "abc"),
            other => panic!("expected open, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_ping() {
        assert_eq!(
            EnginePacket::decode("2").unwrap(),
            EnginePacket::Ping(String::new())
        );
    }

    #[test]
    fn test_decode_connect_ack() {
        assert_eq!(
            EnginePacket::decode(r#"40{"sid":"xyz"}"#).unwrap(),
            EnginePacket::Message(SocketPacket::Connect {
                namespace: "/".into()
            })
        );
    }

    #[test]
    fn test_decode_event() {
        let packet =
            EnginePacket::decode(r#"42["gold-prices-updated",[{"type":"gold_1"}]]"#).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::Event {
                namespace: "/".into(),
                name: "gold-prices-updated".into(),
                args: vec![json!([{"type": "gold_1"}])],
            })
        );
    }

    #[test]
    fn test_decode_event_with_namespace_and_ack() {
        let packet = EnginePacket::decode(r#"42/prices,17["tick",1,2]"#).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::Event {
                namespace: "/prices".into(),
                name: "tick".into(),
                args: vec![json!(1), json!(2)],
            })
        );
    }

    #[test]
    fn test_decode_connect_error() {
        let packet = EnginePacket::decode(r#"44{"message":"Not authorized"}"#).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::ConnectError {
                namespace: "/".into(),
                message: "Not authorized".into(),
            })
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(EnginePacket::decode("").is_err());
        assert!(EnginePacket::decode("9").is_err());
        assert!(EnginePacket::decode("42{\"not\":\"array\"}").is_err());
        assert!(EnginePacket::decode("42[]").is_err());
    }
}
