//! Provider over any async byte source

use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, trace};

use crate::parser::DEFAULT_READ_SIZE;
use crate::protocol::{Frame, PacketId, QStreamCodec};
use crate::provider::Provider;
use crate::{QStreamError, Result};

/// Frames decoded from an [`AsyncRead`] with [`QStreamCodec`]
pub struct FramedProvider<R> {
    frames: FramedRead<R, QStreamCodec>,
    source: String,
    frame_count: u64,
}

impl<R> FramedProvider<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R, source: impl Into<String>) -> Self {
        Self::with_capacity(reader, source, DEFAULT_READ_SIZE)
    }

    /// Read buffer of `capacity` bytes.
    pub fn with_capacity(reader: R, source: impl Into<String>, capacity: usize) -> Self {
        Self {
            frames: FramedRead::with_capacity(reader, QStreamCodec::new(), capacity.max(1)),
            source: source.into(),
            frame_count: 0,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn into_inner(self) -> R {
        self.frames.into_inner()
    }
}

impl FramedProvider<tokio::fs::File> {
    /// Open a stream file.
    pub async fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| QStreamError::io(format!("opening {}", path.display()), e))?;
        info!("Opened stream file: {}", path.display());
        Ok(Self::with_capacity(file, path.display().to_string(), capacity))
    }
}

#[async_trait::async_trait]
impl<R> Provider for FramedProvider<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.frames.next().await.transpose()? {
            Some(frame) => {
                self.frame_count += 1;
                trace!(
                    source = %self.source,
                    frame = self.frame_count,
                    bytes = frame.wire_len(),
                    "frame"
                );
                Ok(Some(frame))
            }
            None => {
                debug!(source = %self.source, frames = self.frame_count, "source exhausted");
                Ok(None)
            }
        }
    }

    fn declare_packet_size(&mut self, id: PacketId, size: usize) {
        self.frames.decoder_mut().set_packet_size(id, size);
    }

    fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn frames_follow_declared_sizes() {
        let mut bytes = b"[00]000048<stream dataset_id=\"a\" byte_order=\"big_endian\"/>".to_vec();
        bytes.extend_from_slice(b":01:abc");
        let mut provider = FramedProvider::new(Cursor::new(bytes), "memory");

        let first = provider.next_frame().await.unwrap().unwrap();
        assert_eq!(first.id(), Some(PacketId::STREAM));

        provider.declare_packet_size(PacketId::new(1), 3);
        let second = provider.next_frame().await.unwrap().unwrap();
        let payload = bytes::Bytes::from_static(b"abc");
        assert_eq!(second, Frame::Data { id: PacketId::new(1), payload });
        assert!(provider.next_frame().await.unwrap().is_none());
        assert_eq!(provider.frame_count(), 2);
    }

    #[tokio::test]
    async fn undeclared_data_is_a_protocol_error() {
        let mut provider = FramedProvider::new(Cursor::new(b":07:xyz".to_vec()), "memory");
        let err = provider.next_frame().await.unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(err.packet_id(), Some(PacketId::new(7)));
    }
}
