use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::FrameCodec;
use crate::config::Limits;
use crate::connection::{ConnectionState, Dialer, MaybeTlsStream};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::handshake::find_header_end;
use crate::protocol::{ClientHandshake, Frame, HandshakeResponse, OpCode};

/// Client side of an upgraded WebSocket connection.
///
/// `recv` answers pings, echoes the server's close frame and reassembles
/// fragmented data messages; callers only see complete messages.
///
/// ## Example
///
/// ```rust,ignore
/// use wsprobe::connection::{Dialer, Endpoint, WebSocket};
///
/// let dialer = Dialer::new(Endpoint::parse("ws://localhost:3010/ws")?, None)?;
/// let mut ws = WebSocket::connect(&dialer, Limits::default()).await?;
/// while let Some(msg) = ws.recv().await? {
///     println!("{msg:?}");
/// }
/// ```
pub struct WebSocket<T> {
    codec: FrameCodec<T>,
    state: ConnectionState,
    partial: Option<(OpCode, Vec<u8>)>,
}

impl WebSocket<MaybeTlsStream> {
    /// Dial the endpoint and run the opening handshake.
    ///
    /// # Errors
    ///
    /// Transport, TLS and handshake errors.
    pub async fn connect(dialer: &Dialer, limits: Limits) -> Result<Self> {
        let endpoint = dialer.endpoint();
        let request = ClientHandshake::new(endpoint.host_header(), endpoint.path.clone())?;
        let stream = dialer.dial().await?;
        Self::handshake(stream, &request, limits).await
    }
}

impl<T> WebSocket<T> {
    /// Wrap a stream whose handshake already completed. `buffered` holds any
    /// bytes read past the end of the response headers.
    pub fn from_parts(io: T, buffered: BytesMut, limits: Limits) -> Self {
        Self {
            codec: FrameCodec::with_buffered(io, buffered, limits),
            state: ConnectionState::Open,
            partial: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> WebSocket<T> {
    /// Send the upgrade request over `io` and validate the answer.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidHandshake` for a bad or missing `101` response
    /// - `Error::HandshakeTooLarge` if the headers exceed the limit
    /// - I/O errors from the underlying stream
    pub async fn handshake(mut io: T, request: &ClientHandshake, limits: Limits) -> Result<Self> {
        io.write_all(&request.to_bytes()?).await?;
        io.flush().await?;

        let mut buf = BytesMut::with_capacity(1024);
        let header_end = loop {
            if let Some(end) = find_header_end(&buf) {
                break end;
            }
            limits.check_handshake_size(buf.len())?;
            if io.read_buf(&mut buf).await? == 0 {
                return Err(Error::InvalidHandshake(
                    "Connection closed during handshake".into(),
                ));
            }
        };
        limits.check_handshake_size(header_end)?;

        let response = HandshakeResponse::parse(&buf[..header_end])?;
        response.verify(request)?;

        let rest = buf.split_off(header_end);
        Ok(Self::from_parts(io, rest, limits))
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` once closing has started, or I/O errors.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::ConnectionClosed(None));
        }
        self.codec.write_frame(&Frame::text(text)).await
    }

    /// Receive the next complete message.
    ///
    /// Returns `Ok(None)` once the stream has ended.
    ///
    /// # Errors
    ///
    /// Protocol violations and I/O errors.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        if !self.state.can_receive() {
            return Ok(None);
        }

        loop {
            let frame = match self.codec.read_frame().await {
                Ok(frame) => frame,
                Err(Error::ConnectionClosed(_)) => {
                    self.state = ConnectionState::Closed;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            frame.validate()?;

            match frame.opcode {
                OpCode::Ping => {
                    if self.state.can_send() {
                        self.codec.write_frame(&Frame::pong(frame.payload())).await?;
                    }
                    return Ok(Some(Message::Ping(frame.into_payload())));
                }
                OpCode::Pong => return Ok(Some(Message::Pong(frame.into_payload()))),
                OpCode::Close => {
                    let close = CloseFrame::from_payload(frame.payload());
                    if self.state == ConnectionState::Open {
                        let reply = match &close {
                            Some(cf) => Frame::close(Some(cf.code.as_u16()), &cf.reason),
                            None => Frame::close(None, ""),
                        };
                        // Best effort: the server may already have gone.
                        let _ = self.codec.write_frame(&reply).await;
                    }
                    self.state = ConnectionState::Closed;
                    return Ok(Some(Message::Close(close)));
                }
                OpCode::Text | OpCode::Binary => {
                    if self.partial.is_some() {
                        return Err(Error::ProtocolViolation(
                            "New data frame before previous message finished".into(),
                        ));
                    }
                    let opcode = frame.opcode;
                    if frame.fin {
                        return Ok(Some(into_message(opcode, frame.into_payload())?));
                    }
                    self.codec.limits().check_message_size(frame.payload().len())?;
                    self.partial = Some((opcode, frame.into_payload()));
                }
                OpCode::Continuation => {
                    let Some((opcode, mut payload)) = self.partial.take() else {
                        return Err(Error::ProtocolViolation(
                            "Continuation frame without a started message".into(),
                        ));
                    };
                    self.codec
                        .limits()
                        .check_message_size(payload.len() + frame.payload().len())?;
                    payload.extend_from_slice(frame.payload());
                    if frame.fin {
                        return Ok(Some(into_message(opcode, payload)?));
                    }
                    self.partial = Some((opcode, payload));
                }
            }
        }
    }

    /// Start the close handshake and wait for the server's reply or the end
    /// of the stream. Callers bound the wait with a timeout.
    ///
    /// # Errors
    ///
    /// I/O errors while sending the close frame.
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Ok(());
        }

        self.state = ConnectionState::Closing;
        self.codec
            .write_frame(&Frame::close(Some(code.as_u16()), reason))
            .await?;

        loop {
            match self.recv().await {
                Ok(Some(Message::Close(_))) | Ok(None) | Err(_) => break,
                Ok(Some(_)) => {}
            }
        }
        self.state = ConnectionState::Closed;
        let _ = self.codec.shutdown().await;
        Ok(())
    }
}

fn into_message(opcode: OpCode, payload: Vec<u8>) -> Result<Message> {
    match opcode {
        OpCode::Text => String::from_utf8(payload)
            .map(Message::Text)
            .map_err(|_| Error::InvalidUtf8),
        OpCode::Binary => Ok(Message::Binary(payload)),
        _ => Err(Error::ProtocolViolation("Unexpected opcode".into())),
    }
}
