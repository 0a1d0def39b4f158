//! Helpers shared by the integration tests

#![allow(dead_code)]

use anyhow::Context;
use qstream::types::properties;
use qstream::{
    DataSet, DataSetStreamHandler, FormatterConfig, QStream, StreamFormatter, TimeBase, Units,
};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

/// One-second `t2000` tags from `start`.
pub fn time_tags(records: usize, start: f64) -> DataSet {
    DataSet::series((0..records).map(|i| start + i as f64).collect())
        .with_units(Units::Time(TimeBase::T2000))
}

/// `flux` in nT: -3.0, -2.75, ... against `time_tags(records, start)`.
pub fn flux(records: usize, start: f64) -> DataSet {
    DataSet::series((0..records).map(|i| (start + i as f64) * 0.25 - 3.0).collect())
        .with_name("flux")
        .with_units(Units::Named("nT".into()))
        .with_property(properties::LABEL, "Magnetic flux")
        .with_depend(0, time_tags(records, start))
}

pub fn spectrogram(records: usize, channels: usize) -> DataSet {
    let energies = DataSet::series((0..channels).map(|j| 10.0 * 2f64.powi(j as i32)).collect())
        .with_units(Units::Named("eV".into()));
    let values = (0..records * channels).map(|k| ((k % 97) as f64) * 1.5).collect();
    DataSet::qube(vec![records, channels], values)
        .expect("shape matches values")
        .with_name("spectrogram")
        .with_depend(0, time_tags(records, 0.0))
        .with_depend(1, energies)
}

pub fn abc_bundle(records: usize) -> anyhow::Result<DataSet> {
    let time = Arc::new(time_tags(records, 0.0));
    let member = |name: &str, scale: f64| {
        DataSet::series((0..records).map(|i| i as f64 * scale).collect())
            .with_name(name)
            .with_depend(0, Arc::clone(&time))
    };
    let bundle = DataSet::bundle(vec![member("A", 1.0), member("B", 0.5), member("C", -2.0)])?;
    Ok(bundle.with_name("abc"))
}

pub fn write(data_set: &DataSet, config: FormatterConfig) -> anyhow::Result<Vec<u8>> {
    let mut formatter = StreamFormatter::with_config(Vec::new(), config)?;
    formatter.format(data_set).context("formatting")?;
    Ok(formatter.into_inner()?)
}

pub fn read(bytes: &[u8]) -> anyhow::Result<DataSetStreamHandler> {
    QStream::read_handler(bytes).context("reading stream back")
}
