//! Provider trait for frame sources

use crate::Result;
use crate::protocol::{Frame, PacketId};

/// Trait for QStream byte sources
///
/// Providers abstract over where the bytes come from (a file, a socket, an
/// in-memory buffer) and hand back whole frames. Data frames carry no length
/// on the wire, so the driver tells the provider the payload size of every
/// packet ID as descriptors are parsed.
#[async_trait::async_trait]
pub trait Provider: Send + 'static {
    /// Get the next frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - A complete frame
    /// - `Ok(None)` - Stream ended cleanly on a frame boundary
    /// - `Err(e)` - I/O failure or protocol violation
    async fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Payload size of data frames tagged with `id` from now on.
    fn declare_packet_size(&mut self, id: PacketId, size: usize);

    /// Human-readable name of the source, for logs.
    fn source(&self) -> &str;
}
