//! Buffered frame reader/writer over an async byte stream.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::mask::MaskGenerator;
use crate::protocol::{Frame, FrameHeader};

const READ_CHUNK: usize = 4096;

/// Client-role frame codec: outgoing frames are masked, incoming frames must
/// not be.
pub struct FrameCodec<T> {
    io: T,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
    masks: MaskGenerator,
    limits: Limits,
}

impl<T> FrameCodec<T> {
    #[must_use]
    pub fn new(io: T, limits: Limits) -> Self {
        Self::with_buffered(io, BytesMut::with_capacity(8192), limits)
    }

    /// Start with bytes already read from `io`, e.g. frames that arrived in
    /// the same segment as the handshake response.
    #[must_use]
    pub fn with_buffered(io: T, buffered: BytesMut, limits: Limits) -> Self {
        Self {
            io,
            read_buf: buffered,
            write_buf: Vec::with_capacity(256),
            masks: MaskGenerator::new(),
            limits,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.io
    }

    /// Try to take one complete frame off the read buffer.
    fn decode_buffered(&mut self) -> Result<Option<Frame>> {
        let header = match FrameHeader::parse(&self.read_buf) {
            Ok(header) => header,
            Err(Error::IncompleteFrame { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        if header.mask.is_some() {
            return Err(Error::MaskedServerFrame);
        }
        self.limits.check_frame_size(header.payload_len)?;

        match Frame::parse(&self.read_buf) {
            Ok((frame, consumed)) => {
                self.read_buf.advance(consumed);
                Ok(Some(frame))
            }
            Err(Error::IncompleteFrame { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> FrameCodec<T> {
    /// Read the next frame.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` on EOF
    /// - `Error::MaskedServerFrame` / `Error::FrameTooLarge` on invalid input
    /// - I/O errors from the underlying stream
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decode_buffered()? {
                return Ok(frame);
            }

            self.read_buf.reserve(READ_CHUNK);
            let n = self.io.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed(None));
            }
        }
    }

    /// Mask, write and flush one frame.
    ///
    /// # Errors
    ///
    /// I/O errors from the underlying stream.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mask = self.masks.next_mask();
        self.write_buf.clear();
        frame.write_to(&mut self.write_buf, Some(mask));
        self.io.write_all(&self.write_buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Shut down the write half of the stream.
    ///
    /// # Errors
    ///
    /// I/O errors from the underlying stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_read_unmasked_frame() {
        let (client, mut server) = duplex(1024);
        let mut codec = FrameCodec::new(client, Limits::default());

        server.write_all(&[0x81, 0x02, b'h', b'i']).await.unwrap();
        let frame = codec.read_frame().await.unwrap();
        assert_eq!(frame.payload(), b"hi");
    }

    #[tokio::test]
    async fn test_read_frame_split_across_reads() {
        let (client, mut server) = duplex(1024);
        let mut codec = FrameCodec::new(client, Limits::default());

        let writer = tokio::spawn(async move {
            server.write_all(&[0x81, 0x05, b'H']).await.unwrap();
            tokio::task::yield_now().await;
            server.write_all(b"ello").await.unwrap();
            server
        });

        let frame = codec.read_frame().await.unwrap();
        assert_eq!(frame.payload(), b"Hello");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_prebuffered_frame() {
        let (client, _server) = duplex(64);
        let buffered = BytesMut::from(&[0x81u8, 0x01, b'x'][..]);
        let mut codec = FrameCodec::with_buffered(client, buffered, Limits::default());

        let frame = codec.read_frame().await.unwrap();
        assert_eq!(frame.payload(), b"x");
    }

    #[tokio::test]
    async fn test_rejects_masked_server_frame() {
        let (client, mut server) = duplex(1024);
        let mut codec = FrameCodec::new(client, Limits::default());

        server
            .write_all(&[0x81, 0x81, 0x00, 0x00, 0x00, 0x00, b'x'])
            .await
            .unwrap();
        assert_eq!(codec.read_frame().await, Err(Error::MaskedServerFrame));
    }

    #[tokio::test]
    async fn test_rejects_oversized_frame_before_buffering_payload() {
        let (client, mut server) = duplex(1024);
        let limits = Limits {
            max_frame_size: 4,
            ..Limits::default()
        };
        let mut codec = FrameCodec::new(client, limits);

        server.write_all(&[0x82, 0x05]).await.unwrap();
        assert_eq!(
            codec.read_frame().await,
            Err(Error::FrameTooLarge { size: 5, max: 4 })
        );
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let (client, server) = duplex(64);
        let mut codec = FrameCodec::new(client, Limits::default());
        drop(server);
        assert_eq!(codec.read_frame().await, Err(Error::ConnectionClosed(None)));
    }

    #[tokio::test]
    async fn test_write_frame_is_masked() {
        let (client, mut server) = duplex(1024);
        let mut codec = FrameCodec::new(client, Limits::default());

        codec.write_frame(&Frame::text("Hi")).await.unwrap();

        let mut buf = [0u8; 8];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], 0x81);
        assert_eq!(buf[1], 0x82);

        let (frame, _) = Frame::parse(&buf).unwrap();
        assert_eq!(frame.payload(), b"Hi");
    }
}
