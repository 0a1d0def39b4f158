//! Async connection to a QStream source
//!
//! A [`StreamConnection`] reads a stream on a background task and hands back
//! the [`DataSetStreamHandler`] once the stream ends. Progress can be watched
//! while the read is running.

use futures::{Stream, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::{oneshot, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ReaderConfig;
use crate::driver::Driver;
use crate::parser::StreamProgress;
use crate::provider::Provider;
use crate::providers::FramedProvider;
use crate::reader::DataSetStreamHandler;
use crate::serializer::SerializerRegistry;
use crate::{QStreamError, Result};


/// Stream being read in the background
pub struct StreamConnection {
    /// Progress watch receiver
    progress: watch::Receiver<StreamProgress>,

    /// Handler or error, delivered once
    result: Option<oneshot::Receiver<Result<DataSetStreamHandler>>>,

    /// Name of the source
    source: String,

    /// Cancellation token for stopping the task
    cancel: CancellationToken,
}

impl StreamConnection {
    /// Open a stream file with the default reader settings.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let serializers = Arc::new(SerializerRegistry::with_defaults());
        Self::open_with(path, ReaderConfig::default(), serializers).await
    }

    pub async fn open_with<P: AsRef<Path>>(
        path: P,
        config: ReaderConfig,
        serializers: Arc<SerializerRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let provider = FramedProvider::open(path, config.read_buffer_size).await?;
        Ok(Self::from_provider(provider, config, serializers))
    }

    /// Read from any async byte source. Must be called inside a tokio runtime.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let config = ReaderConfig::default();
        let provider = FramedProvider::with_capacity(reader, "reader", config.read_buffer_size);
        Self::from_provider(provider, config, Arc::new(SerializerRegistry::with_defaults()))
    }

    pub fn from_provider<P: Provider>(
        provider: P,
        config: ReaderConfig,
        serializers: Arc<SerializerRegistry>,
    ) -> Self {
        let source = provider.source().to_string();
        let handler = DataSetStreamHandler::with_config(config);
        let channels = Driver::spawn(provider, handler, serializers);
        info!("Stream connection opened: {}", source);
        Self {
            progress: channels.progress,
            result: Some(channels.result),
            source,
            cancel: channels.cancel,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Counters of the stream read so far.
    pub fn progress(&self) -> StreamProgress {
        *self.progress.borrow()
    }

    /// Progress as a stream of updates, ending with the read.
    pub fn progress_updates(&self) -> impl Stream<Item = StreamProgress> + 'static {
        WatchStream::new(self.progress.clone()).boxed()
    }

    /// Stop reading; [`finish`](Self::finish) returns what was read so far.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the stream to end and take the handler.
    pub async fn finish(mut self) -> Result<DataSetStreamHandler> {
        let result = self.result.take().ok_or_else(|| {
            QStreamError::parse("finishing stream connection", "result already taken")
        })?;
        result.await.map_err(|_| {
            QStreamError::parse("finishing stream connection", "reader task ended without a result")
        })?
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        debug!("Dropping stream connection: {}", self.source);
        // Cancel tasks on drop for clean shutdown
        self.cancel.cancel();
    }
}
