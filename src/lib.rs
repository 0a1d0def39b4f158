//! Self-describing streaming container for multidimensional datasets.
//!
//! A QStream is a sequence of framed XML descriptors and fixed-size binary or
//! ASCII records. Descriptors declare packet shapes under small integer IDs;
//! records reference those IDs, so a stream can be written and read
//! incrementally without ever knowing its total size.
//!
//! # Features
//!
//! - **Writer**: datasets with coordinates, error bars, bundles and joins,
//!   with transfer types picked from the data's units and precision
//! - **Reader**: event-driven parsing that rebuilds the same datasets
//! - **Async**: read streams on a background task with progress updates
//! - **Open properties**: custom property types through a serializer registry
//!
//! # Quick Start
//!
//! ```rust
//! use qstream::QStream;
//! use qstream::types::DataSet;
//!
//! # fn main() -> qstream::Result<()> {
//! let flux = DataSet::series(vec![1.0, 2.5, -3.25, 0.0, 100.125]);
//! let bytes = QStream::format(Vec::new(), &flux)?;
//!
//! let back = QStream::read_data_set(&bytes[..])?;
//! assert_eq!(back.flat_values(), flux.flat_values());
//! # Ok(())
//! # }
//! ```
//!
//! ## Example (async file read)
//!
//! ```rust,no_run
//! use qstream::QStream;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = QStream::open("/path/to/data.qds").await?;
//!     let handler = connection.finish().await?;
//!     for name in handler.names() {
//!         println!("{}: {} records", name, handler.record_count(name).unwrap_or(0));
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
pub mod descriptor;
mod error;
pub mod protocol;
pub mod serializer;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Reading and writing
pub mod parser;
pub mod reader;
pub mod writer;

// Async stream architecture
pub mod connection;
pub mod driver;
pub mod provider;
pub mod providers;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use config::{FormatterConfig, JoinMode, QStreamConfig, ReaderConfig};
pub use connection::StreamConnection;
pub use parser::{StreamHandler, StreamParser, StreamProgress};
pub use reader::DataSetStreamHandler;
pub use serializer::{PropertySerializer, SerializerRegistry};
pub use writer::StreamFormatter;

use std::io::{Read, Write};
use std::sync::Arc;

/// Unified entry point for writing and reading streams.
///
/// # Examples
///
/// ## Blocking round trip
/// ```rust
/// use qstream::{FormatterConfig, QStream};
/// use qstream::types::DataSet;
///
/// # fn main() -> qstream::Result<()> {
/// let series = DataSet::series(vec![0.5, 1.5]);
/// let bytes = QStream::format_with(Vec::new(), &series, FormatterConfig::ascii())?;
/// let handler = QStream::read_handler(&bytes[..])?;
/// assert_eq!(handler.get_data_set("ds_0")?.len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct QStream;

impl QStream {
    /// Write one dataset as a complete binary stream.
    pub fn format<W: Write>(out: W, data_set: &DataSet) -> Result<W> {
        Self::format_with(out, data_set, FormatterConfig::default())
    }

    pub fn format_with<W: Write>(out: W, data_set: &DataSet, config: FormatterConfig) -> Result<W> {
        let mut formatter = StreamFormatter::with_config(out, config)?;
        formatter.format(data_set)?;
        formatter.into_inner()
    }

    /// Read a whole stream into a handler.
    pub fn read_handler<R: Read>(reader: R) -> Result<DataSetStreamHandler> {
        let serializers = Arc::new(SerializerRegistry::with_defaults());
        Self::read_handler_with(reader, ReaderConfig::default(), serializers)
    }

    pub fn read_handler_with<R: Read>(
        reader: R,
        config: ReaderConfig,
        serializers: Arc<SerializerRegistry>,
    ) -> Result<DataSetStreamHandler> {
        config.validate()?;
        let mut parser =
            StreamParser::new(reader, serializers).with_read_size(config.read_buffer_size);
        let mut handler = DataSetStreamHandler::with_config(config);
        parser.parse(&mut handler)?;
        Ok(handler)
    }

    /// Read a stream and return the dataset its stream descriptor names.
    ///
    /// An in-band exception other than `NoDataInInterval` becomes an
    /// [`QStreamError::Upstream`] error.
    pub fn read_data_set<R: Read>(reader: R) -> Result<DataSet> {
        let handler = Self::read_handler(reader)?;
        handler.check_exception()?;
        handler.data_set()
    }

    /// Open a stream file for reading on a background task.
    pub async fn open<P: AsRef<std::path::Path>>(path: P) -> Result<StreamConnection> {
        StreamConnection::open(path).await
    }
}
