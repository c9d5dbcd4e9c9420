//! Async message reader and writer over tokio I/O.
//!
//! Both sides go through [`Payload`]; the reader drives a [`MessageCodec`].

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::Decoder;
use tracing::debug;

use super::error::{CloseEvent, SocketError, WebSocketError};
use super::frame::Opcode;
use super::payload::{Payload, PayloadConfig};
use super::MessageCodec;

/// Reads whole messages from any `AsyncRead`.
pub struct MessageReader<R> {
    reader: R,
    codec: MessageCodec,
    buffer: BytesMut,
}

impl<R: AsyncReadExt + Unpin> MessageReader<R> {
    /// Create a reader without size limits.
    pub fn new(reader: R) -> Self {
        Self::with_config(reader, PayloadConfig::default())
    }

    /// Create a reader applying `config` to every message.
    pub fn with_config(reader: R, config: PayloadConfig) -> Self {
        MessageReader {
            reader,
            codec: MessageCodec::with_config(config),
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` on a clean EOF between messages. EOF in the middle
    /// of a message is reported as a [`CloseEvent`] with the default code.
    pub async fn read_message(&mut self) -> Result<Option<Payload>, WebSocketError> {
        loop {
            if let Some(message) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(message));
            }

            let n = self.reader.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.codec.is_idle() && self.buffer.is_empty() {
                    return Ok(None);
                }
                debug!("stream ended inside a message");
                return Err(CloseEvent::new("stream ended inside a message").into());
            }
        }
    }
}

/// Writes messages to any `AsyncWrite`, one frame per message.
pub struct MessageWriter<W> {
    writer: Arc<Mutex<W>>,
    masked: bool,
}

impl<W: AsyncWriteExt + Unpin + Send> MessageWriter<W> {
    /// Create a writer. Clients must set `masked`; servers must not.
    pub fn new(writer: W, masked: bool) -> Self {
        MessageWriter {
            writer: Arc::new(Mutex::new(writer)),
            masked,
        }
    }

    /// Write a text message.
    pub async fn write_text(&self, text: &str) -> Result<(), WebSocketError> {
        self.write(text.as_bytes(), Opcode::Text).await
    }

    /// Write a binary message.
    pub async fn write_binary(&self, data: &[u8]) -> Result<(), WebSocketError> {
        self.write(data, Opcode::Binary).await
    }

    /// Write a ping.
    pub async fn write_ping(&self, data: &[u8]) -> Result<(), WebSocketError> {
        self.write(data, Opcode::Ping).await
    }

    /// Write a pong.
    pub async fn write_pong(&self, data: &[u8]) -> Result<(), WebSocketError> {
        self.write(data, Opcode::Pong).await
    }

    async fn write(&self, data: &[u8], opcode: Opcode) -> Result<(), WebSocketError> {
        let mut payload = Payload::new();
        payload.encode(data, opcode, self.masked);
        self.write_payload(&payload).await
    }

    /// Write every frame of an already encoded payload.
    pub async fn write_payload(&self, payload: &Payload) -> Result<(), WebSocketError> {
        let mut buffer = BytesMut::new();
        for frame in payload.frames() {
            buffer.extend_from_slice(&frame.frame_buffer()?);
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(&buffer).await.map_err(SocketError::Io)?;
        Ok(())
    }

    /// Send a close frame for `event`, then shut the stream down.
    pub async fn write_close(&self, event: &CloseEvent) -> Result<(), WebSocketError> {
        let mut payload = Payload::new();
        payload.encode_close(event, self.masked);
        self.write_payload(&payload).await?;
        self.end().await
    }

    /// Shut the stream down without sending a close frame.
    pub async fn end(&self) -> Result<(), WebSocketError> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await.map_err(SocketError::Io)?;
        Ok(())
    }
}
