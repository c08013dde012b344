use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::core::error::Result;

/// A live client connection owned by the connection layer.
///
/// The core only ever pushes complete frames through it; reading is the
/// connection layer's business.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    async fn write_frame(&self, frame: Bytes) -> Result<()>;
}

/// Writes each frame as a 4-byte big-endian length prefix followed by the payload.
pub struct FramedConnection<W> {
    writer: Mutex<BufWriter<W>>,
}

impl<W> FramedConnection<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }
}

impl<W> fmt::Debug for FramedConnection<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedConnection").finish_non_exhaustive()
    }
}

#[async_trait]
impl<W> Connection for FramedConnection<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_frame(&self, frame: Bytes) -> Result<()> {
        let mut buf = BytesMut::with_capacity(4 + frame.len());
        buf.put_u32(frame.len() as u32);
        buf.extend_from_slice(&frame);

        let mut w = self.writer.lock().await;
        w.write_all(&buf).await?;
        w.flush().await?;
        Ok(())
    }
}
