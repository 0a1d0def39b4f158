//! Test utilities shared by unit tests, integration tests and benches
//!
//! Synthetic datasets with the shapes streams usually carry, plus helpers to
//! push them through a writer and back.

#![cfg(any(test, feature = "benchmark"))]

use anyhow::Context;
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

use crate::config::{FormatterConfig, ReaderConfig};
use crate::reader::DataSetStreamHandler;
use crate::serializer::SerializerRegistry;
use crate::types::{DataSet, TimeBase, Units, properties};
use crate::writer::StreamFormatter;
use crate::QStream;

static TRACING: Once = Once::new();

/// Install a test-friendly subscriber once per process.
///
/// Honours `RUST_LOG`; defaults to `warn` so recovered problems show up in
/// failing test output.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

/// One-second `t2000` time tags starting at `start`.
pub fn time_tags(records: usize, start: f64) -> DataSet {
    DataSet::series((0..records).map(|i| start + i as f64).collect())
        .with_units(Units::Time(TimeBase::T2000))
}

/// `flux` in nT against a `time` coordinate, on a quarter grid.
pub fn sample_time_series(records: usize) -> DataSet {
    let values = (0..records).map(|i| (i as f64) * 0.25 - 3.0).collect();
    DataSet::series(values)
        .with_name("flux")
        .with_units(Units::Named("nT".into()))
        .with_property(properties::LABEL, "Magnetic flux")
        .with_depend(0, time_tags(records, 0.0))
}

/// Rank-2 `spectrogram` with a time coordinate and an energy table.
pub fn sample_spectrogram(records: usize, channels: usize) -> DataSet {
    let energies = DataSet::series((0..channels).map(|j| 10.0 * 2f64.powi(j as i32)).collect())
        .with_units(Units::Named("eV".into()));
    let values = (0..records * channels).map(|k| ((k % 97) as f64) * 1.5).collect();
    let qube = DataSet::qube(vec![records, channels], values)
        .unwrap_or_else(|_| DataSet::series(Vec::new()));
    qube.with_name("spectrogram").with_depend(0, time_tags(records, 0.0)).with_depend(1, energies)
}

/// Bundle of the channels `A`, `B` and `C` sharing one time coordinate.
pub fn sample_bundle(records: usize) -> anyhow::Result<DataSet> {
    let time = Arc::new(time_tags(records, 0.0));
    let member = |name: &str, scale: f64| {
        DataSet::series((0..records).map(|i| i as f64 * scale).collect())
            .with_name(name)
            .with_depend(0, Arc::clone(&time))
    };
    let bundle = DataSet::bundle(vec![member("A", 1.0), member("B", 0.5), member("C", -2.0)])
        .context("building sample bundle")?;
    Ok(bundle.with_name("abc"))
}

/// Write `data_set` with the default binary settings.
pub fn to_stream_bytes(data_set: &DataSet) -> anyhow::Result<Vec<u8>> {
    to_stream_bytes_with(data_set, FormatterConfig::default())
}

pub fn to_stream_bytes_with(
    data_set: &DataSet,
    config: FormatterConfig,
) -> anyhow::Result<Vec<u8>> {
    let mut formatter =
        StreamFormatter::with_config(Vec::new(), config).context("building formatter")?;
    formatter.format(data_set).context("formatting dataset")?;
    formatter.into_inner().context("flushing stream")
}

/// Read a whole stream from memory.
pub fn read_back(bytes: &[u8]) -> anyhow::Result<DataSetStreamHandler> {
    let serializers = Arc::new(SerializerRegistry::with_defaults());
    QStream::read_handler_with(bytes, ReaderConfig::default(), serializers)
        .context("reading stream back")
}
