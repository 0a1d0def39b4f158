//! Joins written both ways, and chunked channels that flatten back to one series

mod common;

use anyhow::Context;
use common::{flux, init_test_tracing, read, time_tags};
use qstream::{DataSet, FormatterConfig, JoinMode, StreamFormatter};

fn ragged_join() -> DataSet {
    let slices = [4usize, 5, 6]
        .iter()
        .scan(0.0, |start, &len| {
            let slice = DataSet::series((0..len).map(|i| *start + i as f64 * 2.0).collect())
                .with_depend(0, time_tags(len, *start));
            *start += len as f64;
            Some(slice)
        })
        .collect();
    DataSet::join(slices).with_name("flux")
}

#[test]
fn redeclared_chunks_flatten_to_one_series() -> anyhow::Result<()> {
    init_test_tracing();
    let config = FormatterConfig { reuse_descriptors: false, ..FormatterConfig::default() };
    let mut formatter = StreamFormatter::with_config(Vec::new(), config)?;
    for start in [0.0, 10.0, 20.0] {
        formatter.format(&flux(10, start))?;
    }
    let bytes = formatter.into_inner()?;
    assert_eq!(bytes.windows(4).filter(|w| *w == b"[01]").count(), 3);

    let back = read(&bytes)?.get_data_set("flux")?;
    assert!(!back.is_join());
    assert_eq!(back.len(), 30);
    assert_eq!(back.flat_values(), flux(30, 0.0).flat_values());
    let time = back.depend(0).context("no DEPEND_0")?;
    assert_eq!(time.flat_values(), (0..30).map(f64::from).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn ragged_join_round_trips_as_a_join() -> anyhow::Result<()> {
    init_test_tracing();
    let join = ragged_join();
    let mut formatter = StreamFormatter::new(Vec::new());
    formatter.format_join(&join)?;
    let back = read(&formatter.into_inner()?)?.get_data_set("flux")?;

    assert!(back.is_join());
    assert_eq!(back.rank(), 2);
    let slices = back.slices().context("join has no slices")?;
    assert_eq!(slices.len(), 3);
    for (slice, expected) in slices.iter().zip(join.slices().context("source is not a join")?) {
        assert_eq!(slice.flat_values(), expected.flat_values());
        let time = slice.depend(0).context("slice lost its DEPEND_0")?;
        assert_eq!(time.len(), expected.len());
        let expected_time = expected.depend(0).context("source slice time")?;
        assert_eq!(time.flat_values(), expected_time.flat_values());
    }
    Ok(())
}

#[test]
fn children_mode_names_each_slice() -> anyhow::Result<()> {
    init_test_tracing();
    let config = FormatterConfig { join_mode: JoinMode::Children, ..FormatterConfig::default() };
    let mut formatter = StreamFormatter::with_config(Vec::new(), config)?;
    formatter.format_join(&ragged_join())?;
    assert_eq!(formatter.registry().live_count(), 0);
    let bytes = formatter.into_inner()?;
    assert!(String::from_utf8_lossy(&bytes).contains(r#"<join children="flux_0,flux_1,flux_2"/>"#));

    let handler = read(&bytes)?;
    assert!(handler.names().iter().any(|n| n == "flux_0"));
    let back = handler.get_data_set("flux")?;
    assert!(back.is_join());
    assert_eq!(back.slices().map(<[DataSet]>::len), Some(3));
    assert_eq!(handler.get_data_set("flux_2")?.len(), 6);
    Ok(())
}

#[test]
fn join_of_scalars_is_rejected() {
    let join = DataSet::join(vec![DataSet::scalar(1.0), DataSet::scalar(2.0)]).with_name("bad");
    let mut formatter = StreamFormatter::new(Vec::new());
    assert!(formatter.format_join(&join).is_err());
}
