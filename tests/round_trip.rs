//! Write-then-read tests over whole streams
//!
//! Datasets go through `StreamFormatter` into memory and back through
//! `DataSetStreamHandler`; the wire bytes are checked where their exact shape
//! matters.

mod common;

use anyhow::{Context, ensure};
use common::{abc_bundle, flux, init_test_tracing, read, spectrogram, write};
use qstream::types::properties;
use qstream::{
    DataSet, EnumerationUnits, FormatterConfig, QStream, QStreamError, ReaderConfig,
    SerializerRegistry, StreamFormatter, Units,
};
use std::sync::Arc;

/// Split a stream whose data frames are all `record` bytes long.
fn split_frames(mut bytes: &[u8], record: usize) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        let tag = String::from_utf8(bytes[..4].to_vec())?;
        if tag.starts_with('[') {
            let length: usize = std::str::from_utf8(&bytes[4..10])?.parse()?;
            frames.push((tag, bytes[10..10 + length].to_vec()));
            bytes = &bytes[10 + length..];
        } else {
            ensure!(tag.starts_with(':'), "unexpected frame tag {:?}", tag);
            frames.push((tag, bytes[4..4 + record].to_vec()));
            bytes = &bytes[4 + record..];
        }
    }
    Ok(frames)
}

#[test]
fn end_to_end_series_under_ds_0() -> anyhow::Result<()> {
    init_test_tracing();
    let values = vec![1.0, 2.5, -3.25, 0.0, 100.125];
    let bytes = QStream::format(Vec::new(), &DataSet::series(values.clone()))?;

    let frames = split_frames(&bytes, 8)?;
    assert_eq!(frames.len(), 7);
    assert_eq!(frames[0].0, "[00]");
    assert_eq!(
        String::from_utf8(frames[0].1.clone())?,
        r#"<stream dataset_id="ds_0" byte_order="little_endian"/>"#
    );
    assert_eq!(frames[1].0, "[01]");
    let packet = String::from_utf8(frames[1].1.clone())?;
    assert!(packet.contains(r#"<qdataset id="ds_0" rank="1">"#));
    assert!(packet.contains(r#"<values encoding="double" length=""/>"#));
    for (frame, value) in frames[2..].iter().zip(&values) {
        assert_eq!(frame.0, ":01:");
        assert_eq!(frame.1, value.to_le_bytes());
    }

    let back = QStream::read_data_set(&bytes[..])?;
    assert_eq!(back.name(), Some("ds_0"));
    assert_eq!(back.flat_values(), values);
    Ok(())
}

#[test]
fn time_series_keeps_coordinates_and_properties() -> anyhow::Result<()> {
    init_test_tracing();
    let series = flux(12, 0.0);
    let handler = read(&write(&series, FormatterConfig::default())?)?;

    assert_eq!(handler.names(), ["time", "flux"]);
    let back = handler.data_set()?;
    assert_eq!(back.name(), Some("flux"));
    assert_eq!(back.flat_values(), series.flat_values());
    assert_eq!(back.units(), Units::Named("nT".into()));
    assert_eq!(back.property(properties::LABEL).and_then(|p| p.as_str()), Some("Magnetic flux"));

    let time = back.depend(0).context("flux has no DEPEND_0")?;
    assert!(time.units().is_time_location());
    assert_eq!(time.flat_values(), (0..12).map(f64::from).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn spectrogram_with_inline_and_one_shot_tables() -> anyhow::Result<()> {
    // four energies travel inline, sixty in a one-shot packet
    for channels in [4, 60] {
        let expected = spectrogram(6, channels);
        let bytes = write(&expected, FormatterConfig::default())?;
        let back = read(&bytes)?.get_data_set("spectrogram")?;
        assert_eq!(back.shape(), vec![6, channels]);
        assert_eq!(back.flat_values(), expected.flat_values());
        let energies = back.depend(1).context("no DEPEND_1")?;
        assert_eq!(energies.flat_values(), expected.depend(1).unwrap().flat_values());
        assert_eq!(energies.units(), Units::Named("eV".into()));
        assert_eq!(back.depend(0).context("no DEPEND_0")?.len(), 6);
    }
    Ok(())
}

#[test]
fn bundle_members_come_back_by_name() -> anyhow::Result<()> {
    let bundle = abc_bundle(8)?;
    let bytes = write(&bundle, FormatterConfig::default())?;
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains(r#"<bundle ids="A,B,C"/>"#));

    let handler = read(&bytes)?;
    let back = handler.get_data_set("abc")?;
    assert_eq!(back.shape(), vec![8, 3]);
    let b = back.unbundle("B").context("no member B")?;
    assert_eq!(b.flat_values(), (0..8).map(|i| i as f64 * 0.5).collect::<Vec<_>>());
    assert_eq!(back.depend(0).context("no DEPEND_0")?.len(), 8);
    assert_eq!(handler.get_data_set("C")?.flat_values()[3], -6.0);
    Ok(())
}

#[test]
fn ascii_stream_is_line_oriented() -> anyhow::Result<()> {
    let series = flux(5, 0.0);
    let bytes = write(&series, FormatterConfig::ascii())?;
    let text = String::from_utf8(bytes.clone())?;
    assert!(text.contains(":01:2000-01-01T00:00:00.000 -3.00\n"));
    assert!(text.contains(":01:2000-01-01T00:00:04.000 -2.00\n"));
    assert_eq!(text.matches(":01:").count(), 5);

    let back = read(&bytes)?.get_data_set("flux")?;
    assert_eq!(back.flat_values(), series.flat_values());
    assert_eq!(back.depend(0).context("no DEPEND_0")?.flat_values(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    Ok(())
}

#[test]
fn ascii_overflow_fills_the_field() -> anyhow::Result<()> {
    let data = DataSet::series(vec![5.0, 1.0e150]).with_property(properties::FORMAT, "ascii6");
    let bytes = write(&data, FormatterConfig::ascii())?;
    assert!(bytes.windows(10).any(|w| w == b":01:5e+00\n"));
    assert!(bytes.ends_with(b":01:******"));

    let back = read(&bytes)?.data_set()?;
    let values = back.flat_values();
    assert_eq!(values[0], 5.0);
    assert!(values[1].is_nan());
    Ok(())
}

#[test]
fn nominal_labels_are_rebuilt() -> anyhow::Result<()> {
    let quality = EnumerationUnits::new("quality")
        .with_label(0, "good", Some(0x00ff00))
        .with_label(1, "bad", Some(0xff0000));
    let flags = DataSet::series(vec![0.0, 1.0, 1.0, 0.0, 7.0])
        .with_name("flags")
        .with_units(Units::Nominal(Arc::new(quality)));
    let handler = read(&write(&flags, FormatterConfig::default())?)?;

    let table = handler.enumeration("quality").context("labels were not announced")?;
    assert_eq!(table.label(1).map(|l| l.label.as_str()), Some("bad"));
    assert_eq!(table.label(1).and_then(|l| l.color), Some(0xff0000));
    // unlabelled ordinals are announced with their number
    assert_eq!(table.label(7).map(|l| l.label.as_str()), Some("7"));

    let back = handler.get_data_set("flags")?;
    assert_eq!(back.flat_values(), vec![0.0, 1.0, 1.0, 0.0, 7.0]);
    let units = back.units();
    let good = units.enumeration().and_then(|e| e.label(0));
    assert_eq!(good.map(|l| l.label.as_str()), Some("good"));
    Ok(())
}

#[test]
fn appended_chunks_share_one_descriptor() -> anyhow::Result<()> {
    let mut formatter = StreamFormatter::new(Vec::new());
    formatter.format(&flux(4, 0.0))?;
    formatter.format(&flux(2, 4.0))?;
    let bytes = formatter.into_inner()?;

    assert_eq!(bytes.windows(4).filter(|w| *w == b"[01]").count(), 1);
    let back = read(&bytes)?.get_data_set("flux")?;
    assert_eq!(back.flat_values(), vec![-3.0, -2.75, -2.5, -2.25, -2.0, -1.75]);
    let time = back.depend(0).context("no DEPEND_0")?;
    assert_eq!(time.flat_values(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    Ok(())
}

#[test]
fn upstream_exceptions_surface_on_read() -> anyhow::Result<()> {
    let mut formatter = StreamFormatter::new(Vec::new());
    formatter.format_exception("IllegalArgument", "time range is inverted")?;
    let bytes = formatter.into_inner()?;

    let err = QStream::read_data_set(&bytes[..]).unwrap_err();
    match err {
        QStreamError::Upstream { kind, message } => {
            assert_eq!(kind, "IllegalArgument");
            assert_eq!(message, "time range is inverted");
        }
        other => panic!("expected upstream error, got {other}"),
    }
    Ok(())
}

#[test]
fn no_data_in_interval_is_not_an_error() -> anyhow::Result<()> {
    let mut formatter = StreamFormatter::new(Vec::new());
    formatter.format_exception("NoDataInInterval", "nothing between the times")?;
    formatter.format_comment("taskProgress", "100")?;
    let handler = read(&formatter.into_inner()?)?;

    handler.check_exception()?;
    assert_eq!(handler.exceptions().len(), 1);
    assert_eq!(handler.comments()[0].message, "100");
    assert!(matches!(handler.data_set(), Err(QStreamError::DataSetNotFound { .. })));
    Ok(())
}

#[test]
fn missing_serializers_drop_properties_only() -> anyhow::Result<()> {
    let bytes = write(&flux(3, 0.0), FormatterConfig::default())?;
    let serializers = Arc::new(SerializerRegistry::empty());
    let handler = QStream::read_handler_with(&bytes[..], ReaderConfig::default(), serializers)?;
    let back = handler.get_data_set("flux")?;
    assert_eq!(back.flat_values(), vec![-3.0, -2.75, -2.5]);
    assert!(back.property(properties::LABEL).is_none());
    assert_eq!(back.depend(0).context("references do not need serializers")?.len(), 3);
    Ok(())
}

#[test]
fn coordinate_named_like_its_channel_is_renamed() -> anyhow::Result<()> {
    let series = DataSet::series(vec![1.0, 2.0, 3.0])
        .with_name("flux")
        .with_depend(0, DataSet::series(vec![0.0, 1.0, 2.0]).with_name("flux"));
    let bytes = write(&series, FormatterConfig::default())?;
    assert!(String::from_utf8_lossy(&bytes).contains(r#"value="flux_1""#));

    let handler = read(&bytes)?;
    assert_eq!(handler.names(), ["flux_1", "flux"]);
    let back = handler.get_data_set("flux")?;
    assert_eq!(back.flat_values(), vec![1.0, 2.0, 3.0]);
    assert_eq!(back.depend(0).context("no DEPEND_0")?.flat_values(), vec![0.0, 1.0, 2.0]);
    Ok(())
}
