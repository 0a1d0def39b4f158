//! Driver spawns and manages the stream reading task

use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::provider::Provider;
use crate::Result;
use crate::parser::{PacketDispatcher, StreamHandler, StreamProgress};
use crate::serializer::SerializerRegistry;

/// Result of spawning the driver task
pub struct DriverChannels<H> {
    /// Counters of the stream read so far
    pub progress: watch::Receiver<StreamProgress>,
    /// The handler once the stream has ended, or the error that stopped it
    pub result: oneshot::Receiver<Result<H>>,
    /// Cancellation token for early shutdown
    pub cancel: CancellationToken,
}

/// Driver spawns and manages the task that pumps frames into a handler
///
/// The task owns the provider and the handler. Frames are dispatched in
/// order; every packet descriptor updates the provider's size table before
/// the next frame is requested.
pub struct Driver;

impl Driver {
    /// Spawn the reader task for `provider`, feeding `handler`.
    pub fn spawn<P, H>(
        provider: P,
        handler: H,
        serializers: Arc<SerializerRegistry>,
    ) -> DriverChannels<H>
    where
        P: Provider,
        H: StreamHandler + Send + 'static,
    {
        let (progress_tx, progress_rx) = watch::channel(StreamProgress::default());
        let (result_tx, result_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();

        tokio::spawn(async move {
            let result =
                Self::reader_task(provider, handler, serializers, progress_tx, cancel_task).await;
            if result_tx.send(result).is_err() {
                debug!("Stream result receiver dropped");
            }
        });

        DriverChannels { progress: progress_rx, result: result_rx, cancel }
    }

    /// Reader task - dispatches frames until the stream ends, fails or is cancelled
    async fn reader_task<P, H>(
        mut provider: P,
        mut handler: H,
        serializers: Arc<SerializerRegistry>,
        progress_tx: watch::Sender<StreamProgress>,
        cancel: CancellationToken,
    ) -> Result<H>
    where
        P: Provider,
        H: StreamHandler + Send + 'static,
    {
        info!("Reader task started for {}", provider.source());
        let mut dispatcher = PacketDispatcher::new(serializers);

        loop {
            // Use select to allow cancellation during provider.next_frame()
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Reader cancelled after {} records", dispatcher.progress().records);
                    return Ok(handler);
                }
                next = provider.next_frame() => next,
            };

            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    error!("Stream read failed: {}", e);
                    return Err(e);
                }
            };

            match dispatcher.dispatch(frame, &mut handler) {
                Ok(Some((id, size))) => {
                    trace!("Packet {} declared with {} byte records", id, size);
                    provider.declare_packet_size(id, size);
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Stream dispatch failed: {}", e);
                    return Err(e);
                }
            }
            progress_tx.send_replace(dispatcher.progress());
        }

        handler.stream_closed()?;
        let progress = dispatcher.progress();
        info!(
            "Reader task ended ({} descriptors, {} records, {} bytes)",
            progress.descriptors, progress.records, progress.bytes
        );
        Ok(handler)
    }
}
