//! Length-prefixed transport over any async byte stream.
//!
//! Wire format: `[4-byte length as u32 big-endian] [frame]`.

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::transport;
use crate::transport::Transport;

/// Frames larger than this are refused in both directions.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// A transport over a split read/write pair, e.g. the halves of a `TcpStream`.
pub struct StreamTransport<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

impl StreamTransport<tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf> {
    pub fn tcp(stream: tokio::net::TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not disable Nagle's algorithm: {}", e);
        }
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }
}

#[async_trait::async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(transport::Error::PayloadTooLarge(payload.len()));
        }
        let len = payload.len() as u32;

        // One writer at a time keeps prefix and frame adjacent.
        let mut writer = self.writer.lock().await;
        writer.write_all(&len.to_be_bytes()).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;

        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => (),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(transport::Error::PayloadTooLarge(len));
        }

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        Ok(Some(buf))
    }

    async fn close(&self) -> transport::Result<()> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}
