//! WebSocket subscribers, plain or Socket.IO framed.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::config::{Framing, HarnessConfig, Limits};
use crate::connection::{Dialer, MaybeTlsStream, WebSocket};
use crate::error::{Error, Result};
use crate::harness::client::{ClientId, Connector, Subscriber};
use crate::message::{CloseCode, Message};
use crate::protocol::socketio::{self, EnginePacket, SocketPacket};

/// Opens WebSocket subscribers against the configured endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    dialer: Dialer,
    limits: Limits,
    framing: Framing,
}

impl WsConnector {
    /// # Errors
    ///
    /// Returns `Error::InvalidUrl` or `Error::Tls` if the endpoint cannot be
    /// used.
    pub fn new(config: &HarnessConfig) -> Result<Self> {
        let endpoint = config.ws_endpoint()?;
        let dialer = Dialer::new(endpoint, config.ca_file.as_deref())?;
        Ok(Self {
            dialer,
            limits: config.limits.clone(),
            framing: config.framing.clone(),
        })
    }

    #[must_use]
    pub fn dialer(&self) -> &Dialer {
        &self.dialer
    }
}

impl Connector for WsConnector {
    type Subscriber = WsSubscriber<MaybeTlsStream>;

    async fn connect(&self, id: ClientId) -> Result<Self::Subscriber> {
        let ws = WebSocket::connect(&self.dialer, self.limits.clone()).await?;
        let subscriber = WsSubscriber::open(ws, self.framing.clone()).await?;
        debug!(client = id, endpoint = %self.dialer.endpoint(), "subscriber connected");
        Ok(subscriber)
    }
}

/// A connected, acknowledged notification stream.
pub struct WsSubscriber<T> {
    ws: WebSocket<T>,
    framing: Framing,
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> WsSubscriber<T> {
    /// Finish the framing-level handshake on an upgraded connection.
    ///
    /// For Socket.IO this waits for the Engine.IO open packet, joins the
    /// default namespace and waits for the acknowledgment.
    ///
    /// # Errors
    ///
    /// `Error::SocketIo` if the server refuses the namespace, or
    /// `Error::ConnectionClosed` if the stream ends first.
    pub async fn open(mut ws: WebSocket<T>, framing: Framing) -> Result<Self> {
        if let Framing::SocketIo { .. } = framing {
            let mut opened = false;
            loop {
                let text = match ws.recv().await? {
                    Some(Message::Text(text)) => text,
                    Some(Message::Close(_)) | None => return Err(Error::ConnectionClosed(None)),
                    Some(_) => continue,
                };
                match EnginePacket::decode(&text)? {
                    EnginePacket::Open(_) if !opened => {
                        opened = true;
                        ws.send_text(socketio::CONNECT_DEFAULT_NAMESPACE).await?;
                    }
                    EnginePacket::Ping(data) => {
                        ws.send_text(&format!("{}{data}", socketio::PONG)).await?;
                    }
                    EnginePacket::Message(SocketPacket::Connect { namespace })
                        if opened && namespace == "/" =>
                    {
                        break;
                    }
                    EnginePacket::Message(SocketPacket::ConnectError { message, .. }) => {
                        return Err(Error::SocketIo(format!("connect refused: {message}")));
                    }
                    EnginePacket::Close => return Err(Error::ConnectionClosed(None)),
                    _ => {}
                }
            }
        }

        Ok(Self { ws, framing })
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Subscriber for WsSubscriber<T> {
    async fn next_notification(&mut self) -> Result<Option<String>> {
        loop {
            let text = match self.ws.recv().await? {
                Some(Message::Text(text)) => text,
                Some(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
                Some(Message::Ping(_) | Message::Pong(_)) => continue,
                Some(Message::Close(_)) | None => return Ok(None),
            };

            let event = match &self.framing {
                Framing::Raw => return Ok(Some(text)),
                Framing::SocketIo { event } => event,
            };

            match EnginePacket::decode(&text) {
                Ok(EnginePacket::Ping(data)) => {
                    self.ws
                        .send_text(&format!("{}{data}", socketio::PONG))
                        .await?;
                }
                Ok(EnginePacket::Message(SocketPacket::Event { name, mut args, .. }))
                    if &name == event =>
                {
                    let data = if args.len() == 1 {
                        args.remove(0)
                    } else {
                        Value::Array(args)
                    };
                    return Ok(Some(data.to_string()));
                }
                Ok(EnginePacket::Message(SocketPacket::Disconnect { .. }))
                | Ok(EnginePacket::Close) => return Ok(None),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "ignoring undecodable packet"),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.ws.is_open() {
            if let Framing::SocketIo { .. } = self.framing {
                let _ = self
                    .ws
                    .send_text(socketio::DISCONNECT_DEFAULT_NAMESPACE)
                    .await;
            }
            self.ws.close(CloseCode::Normal, "").await?;
        }
        Ok(())
    }
}
