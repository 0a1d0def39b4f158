use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use super::builder::{JoinAccumulator, PlaneBuilder};
use super::resolve::Resolver;
use crate::config::ReaderConfig;
use crate::descriptor::{
    CommentDescriptor, EnumerationDescriptor, ExceptionDescriptor, PacketDescriptor, PlaneContent,
    PlaneDescriptor, PropertyEntry, StreamDescriptor,
};
use crate::parser::StreamHandler;
use crate::protocol::PacketId;
use crate::types::{DataSet, EnumerationUnits};
use crate::{QStreamError, Result};

/// What a name on the stream stands for.
#[derive(Debug, Clone)]
pub(crate) enum Entry {
    Data(JoinAccumulator),
    Bundle { rank: usize, members: Vec<String>, properties: BTreeMap<String, PropertyEntry> },
    Children { rank: usize, children: Vec<String>, properties: BTreeMap<String, PropertyEntry> },
}

/// Rebuilds datasets from stream events.
///
/// Feed it with a [`StreamParser`](crate::parser::StreamParser) or the async
/// [`Driver`](crate::driver::Driver), then fetch results by name:
///
/// ```rust
/// use qstream::reader::DataSetStreamHandler;
/// use qstream::writer::StreamFormatter;
/// use qstream::types::DataSet;
/// use qstream::QStream;
///
/// let mut formatter = StreamFormatter::new(Vec::new());
/// formatter.format(&DataSet::series(vec![1.0, 2.0, 3.0])).unwrap();
/// let bytes = formatter.into_inner().unwrap();
///
/// let handler: DataSetStreamHandler = QStream::read_handler(&bytes[..]).unwrap();
/// assert_eq!(handler.data_set().unwrap().flat_values(), vec![1.0, 2.0, 3.0]);
/// ```
#[derive(Debug, Default)]
pub struct DataSetStreamHandler {
    config: ReaderConfig,
    stream: Option<StreamDescriptor>,
    entries: HashMap<String, Entry>,
    order: Vec<String>,
    enumerations: HashMap<String, EnumerationUnits>,
    exceptions: Vec<ExceptionDescriptor>,
    comments: Vec<CommentDescriptor>,
}

impl DataSetStreamHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ReaderConfig) -> Self {
        Self { config, ..Self::default() }
    }

    /// Names declared on the stream, in order of first declaration.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Build the dataset called `name`, leaving the stream state intact.
    pub fn get_data_set(&self, name: &str) -> Result<DataSet> {
        if !self.entries.contains_key(name) {
            return Err(QStreamError::DataSetNotFound { name: name.to_string() });
        }
        let mut resolver =
            Resolver::new(&self.entries, &self.enumerations, self.config.flatten_joins);
        resolver.resolve(name).map(Arc::unwrap_or_clone)
    }

    /// Build the dataset called `name` and drop its accumulated values.
    pub fn take_data_set(&mut self, name: &str) -> Result<DataSet> {
        let data_set = self.get_data_set(name)?;
        self.entries.remove(name);
        self.order.retain(|n| n != name);
        debug!(name, "released dataset");
        Ok(data_set)
    }

    /// The dataset named by the stream descriptor.
    pub fn data_set(&self) -> Result<DataSet> {
        match &self.stream {
            Some(stream) => self.get_data_set(&stream.dataset_id),
            None => Err(QStreamError::DataSetNotFound { name: String::new() }),
        }
    }

    pub fn stream_descriptor(&self) -> Option<&StreamDescriptor> {
        self.stream.as_ref()
    }

    pub fn exceptions(&self) -> &[ExceptionDescriptor] {
        &self.exceptions
    }

    pub fn comments(&self) -> &[CommentDescriptor] {
        &self.comments
    }

    /// Label table of nominal units `id` announced on the stream.
    pub fn enumeration(&self, id: &str) -> Option<&EnumerationUnits> {
        self.enumerations.get(id)
    }

    /// Records received for `name` across all its declarations.
    pub fn record_count(&self, name: &str) -> Option<usize> {
        match self.entries.get(name)? {
            Entry::Data(acc) => Some(acc.total_records()),
            _ => None,
        }
    }

    /// Fail with the first in-band exception other than "no data".
    pub fn check_exception(&self) -> Result<()> {
        match self.exceptions.iter().find(|e| e.kind != ExceptionDescriptor::NO_DATA_IN_INTERVAL) {
            Some(exception) => Err(QStreamError::Upstream {
                kind: exception.kind.clone(),
                message: exception.message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn declare(
        &mut self,
        name: &str,
        declared_rank: usize,
        slice_rank: usize,
        cycle: PlaneBuilder,
    ) -> Result<()> {
        match self.entries.get_mut(name) {
            None => {
                let acc = JoinAccumulator::new(declared_rank, slice_rank, cycle);
                self.entries.insert(name.to_string(), Entry::Data(acc));
                self.order.push(name.to_string());
                Ok(())
            }
            Some(Entry::Data(acc)) => {
                acc.push_cycle(name, declared_rank, slice_rank, cycle)?;
                debug!(name, "name re-declared, opening join slice");
                Ok(())
            }
            Some(_) => Err(QStreamError::protocol(
                None,
                format!(
                    "'{}' was declared as a bundle or join and is now declared with values",
                    name
                ),
            )),
        }
    }

    fn declare_structure(&mut self, name: &str, entry: Entry) {
        if self.entries.insert(name.to_string(), entry).is_some() {
            debug!(name, "structure re-declared");
        } else {
            self.order.push(name.to_string());
        }
    }

    fn declare_plane(&mut self, plane: &PlaneDescriptor, stream_rank: usize) -> Result<()> {
        match &plane.content {
            PlaneContent::Encoded(_) => {
                let slice_rank = plane.qube.len() + stream_rank;
                let cycle = PlaneBuilder::encoded(plane, stream_rank > 0);
                self.declare(&plane.name, plane.rank, slice_rank, cycle)
            }
            PlaneContent::Inline(values) => {
                let slice_rank = plane.qube.len();
                let cycle = PlaneBuilder::inline(plane, values);
                self.declare(&plane.name, plane.rank, slice_rank, cycle)
            }
            PlaneContent::Bundle(members) => {
                let entry = Entry::Bundle {
                    rank: plane.rank,
                    members: members.clone(),
                    properties: plane.properties.clone(),
                };
                self.declare_structure(&plane.name, entry);
                Ok(())
            }
            PlaneContent::Join(children) => {
                let entry = Entry::Children {
                    rank: plane.rank,
                    children: children.clone(),
                    properties: plane.properties.clone(),
                };
                self.declare_structure(&plane.name, entry);
                Ok(())
            }
        }
    }
}

impl StreamHandler for DataSetStreamHandler {
    fn stream_descriptor(&mut self, descriptor: &StreamDescriptor) -> Result<()> {
        self.stream = Some(descriptor.clone());
        Ok(())
    }

    fn packet_descriptor(
        &mut self,
        _id: PacketId,
        descriptor: &Arc<PacketDescriptor>,
    ) -> Result<()> {
        for plane in &descriptor.planes {
            self.declare_plane(plane, descriptor.stream_rank)?;
        }
        Ok(())
    }

    fn packet(
        &mut self,
        id: PacketId,
        descriptor: &PacketDescriptor,
        payload: &[u8],
    ) -> Result<()> {
        let mut offset = 0;
        for plane in &descriptor.planes {
            let Some(tt) = plane.transfer_type() else { continue };
            let size = plane.size_bytes();
            let field = payload.get(offset..offset + size).ok_or_else(|| {
                let context = format!("plane '{}'", plane.name);
                QStreamError::buffer(context, offset + size, payload.len())
            })?;
            offset += size;

            let Some(Entry::Data(acc)) = self.entries.get_mut(&plane.name) else {
                return Err(QStreamError::protocol(
                    Some(id.value()),
                    format!("plane '{}' has no accumulator", plane.name),
                ));
            };
            acc.current_mut().read_record(tt, field).map_err(|e| match e {
                QStreamError::TimeFormat { field, details } => QStreamError::TimeFormat {
                    field,
                    details: format!("{} (plane '{}' of packet [{}])", details, plane.name, id),
                },
                other => other,
            })?;
        }
        Ok(())
    }

    fn exception(&mut self, exception: &ExceptionDescriptor) -> Result<()> {
        warn!(kind = %exception.kind, message = %exception.message, "upstream exception on stream");
        self.exceptions.push(exception.clone());
        Ok(())
    }

    fn comment(&mut self, comment: &CommentDescriptor) -> Result<()> {
        debug!(kind = %comment.kind, message = %comment.message, "stream comment");
        self.comments.push(comment.clone());
        Ok(())
    }

    fn enumeration(&mut self, enumeration: &EnumerationDescriptor) -> Result<()> {
        self.enumerations
            .entry(enumeration.units.clone())
            .or_insert_with(|| EnumerationUnits::new(enumeration.units.as_str()))
            .insert(enumeration.ordinal, enumeration.label.as_str(), enumeration.color);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::properties;
    use crate::types::{ByteOrder, TransferType, Units};

    fn double() -> TransferType {
        TransferType::Double(ByteOrder::LittleEndian)
    }

    fn record(values: &[f64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn series_packet(name: &str, rank: usize) -> Arc<PacketDescriptor> {
        Arc::new(PacketDescriptor::new(vec![
            PlaneDescriptor::encoded("time", rank, vec![], double()),
            PlaneDescriptor::encoded(name, rank, vec![], double())
                .with_reference(properties::DEPEND_0, "time"),
        ]))
    }

    fn feed(
        handler: &mut DataSetStreamHandler,
        packet: &Arc<PacketDescriptor>,
        records: &[[f64; 2]],
    ) {
        let id = PacketId::new(1);
        handler.packet_descriptor(id, packet).unwrap();
        for r in records {
            handler.packet(id, packet, &record(r)).unwrap();
        }
    }

    fn handler() -> DataSetStreamHandler {
        let mut handler = DataSetStreamHandler::new();
        StreamHandler::stream_descriptor(&mut handler, &StreamDescriptor::new("flux", ByteOrder::LittleEndian)).unwrap();
        handler
    }

    #[test]
    fn builds_series_with_coordinate() {
        let mut handler = handler();
        feed(&mut handler, &series_packet("flux", 1), &[[0.0, 1.5], [1.0, 2.5]]);
        let flux = handler.data_set().unwrap();
        assert_eq!(flux.flat_values(), vec![1.5, 2.5]);
        assert_eq!(flux.name(), Some("flux"));
        assert_eq!(flux.depend(0).unwrap().flat_values(), vec![0.0, 1.0]);
        assert_eq!(handler.names(), ["time".to_string(), "flux".to_string()]);
        assert_eq!(handler.record_count("flux"), Some(2));
    }

    #[test]
    fn redeclaration_at_same_rank_flattens() {
        let mut handler = handler();
        let packet = series_packet("flux", 1);
        feed(&mut handler, &packet, &[[0.0, 1.0], [1.0, 2.0]]);
        feed(&mut handler, &packet, &[[2.0, 3.0]]);
        let flux = handler.get_data_set("flux").unwrap();
        assert!(!flux.is_join());
        assert_eq!(flux.flat_values(), vec![1.0, 2.0, 3.0]);
        assert_eq!(flux.depend(0).unwrap().flat_values(), vec![0.0, 1.0, 2.0]);

        let raw = DataSetStreamHandler {
            config: ReaderConfig { flatten_joins: false, ..ReaderConfig::default() },
            ..handler
        };
        assert_eq!(raw.get_data_set("flux").unwrap().len(), 2);
    }

    #[test]
    fn redeclaration_one_rank_up_builds_a_join() {
        let mut handler = handler();
        let packet = series_packet("flux", 2);
        feed(&mut handler, &packet, &[[0.0, 1.0], [1.0, 2.0]]);
        feed(&mut handler, &packet, &[[5.0, 3.0]]);
        let flux = handler.get_data_set("flux").unwrap();
        assert!(flux.is_join());
        assert_eq!(flux.rank(), 2);
        let second = flux.slice(1).unwrap();
        assert_eq!(second.flat_values(), vec![3.0]);
        assert_eq!(second.depend(0).unwrap().flat_values(), vec![5.0]);
    }

    #[test]
    fn rank_change_is_a_protocol_error() {
        let mut handler = handler();
        feed(&mut handler, &series_packet("flux", 1), &[]);
        let flux = PlaneDescriptor::encoded("flux", 2, vec![3], double());
        let rank2 = Arc::new(PacketDescriptor::new(vec![flux]));
        let err = handler.packet_descriptor(PacketId::new(2), &rank2).unwrap_err();
        assert!(matches!(err, QStreamError::RankMismatch { expected: 1, found: 2, .. }));
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn missing_reference_is_unresolved() {
        let mut handler = handler();
        let packet = Arc::new(PacketDescriptor::new(vec![
            PlaneDescriptor::encoded("flux", 1, vec![], double())
                .with_reference(properties::DEPEND_0, "epoch"),
        ]));
        handler.packet_descriptor(PacketId::new(1), &packet).unwrap();
        let err = handler.data_set().unwrap_err();
        assert!(matches!(
            err,
            QStreamError::UnresolvedReference { ref reference, .. } if reference == "epoch"
        ));
        assert!(matches!(handler.get_data_set("nope"), Err(QStreamError::DataSetNotFound { .. })));
    }

    #[test]
    fn circular_references_are_parse_errors() {
        let mut handler = handler();
        let packet = Arc::new(PacketDescriptor::new(vec![
            PlaneDescriptor::encoded("a", 1, vec![], double())
                .with_reference(properties::DEPEND_0, "b"),
            PlaneDescriptor::encoded("b", 1, vec![], double())
                .with_reference(properties::DEPEND_0, "a"),
        ]));
        handler.packet_descriptor(PacketId::new(1), &packet).unwrap();
        let err = handler.get_data_set("a").unwrap_err();
        assert!(matches!(
            err,
            QStreamError::Parse { ref details, .. } if details.contains("circular")
        ));
    }

    #[test]
    fn nominal_units_receive_announced_labels() {
        let mut handler = handler();
        let good = EnumerationDescriptor {
            units: "q".into(),
            ordinal: 1,
            label: "good".into(),
            color: None,
        };
        StreamHandler::enumeration(&mut handler, &good).unwrap();
        let packet = Arc::new(PacketDescriptor::new(vec![
            PlaneDescriptor::encoded("flux", 1, vec![], double())
                .with_property(properties::UNITS, Units::parse("nominal:q")),
        ]));
        feed(&mut handler, &packet, &[]);
        let flux = handler.data_set().unwrap();
        let units = flux.units();
        let label = units.enumeration().and_then(|e| e.label(1));
        assert_eq!(label.map(|l| l.label.as_str()), Some("good"));
    }

    fn bundle_packet(rank: usize) -> Arc<PacketDescriptor> {
        Arc::new(PacketDescriptor::new(vec![
            PlaneDescriptor::encoded("A", 1, vec![], double()),
            PlaneDescriptor::encoded("B", 1, vec![], double()),
            PlaneDescriptor::bundle("ab", rank, vec!["A".into(), "B".into()]),
        ]))
    }

    #[test]
    fn bundle_rank_must_match_its_members() {
        let mut matching = handler();
        feed(&mut matching, &bundle_packet(2), &[[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(matching.get_data_set("ab").unwrap().shape(), vec![2, 2]);

        let mut mismatched = handler();
        feed(&mut mismatched, &bundle_packet(3), &[[1.0, 2.0]]);
        let err = mismatched.get_data_set("ab").unwrap_err();
        assert!(matches!(err, QStreamError::RankMismatch { expected: 3, found: 2, .. }));
    }

    #[test]
    fn take_releases_the_name() {
        let mut handler = handler();
        feed(&mut handler, &series_packet("flux", 1), &[[0.0, 1.0]]);
        assert_eq!(handler.take_data_set("flux").unwrap().len(), 1);
        assert!(!handler.contains("flux"));
        assert!(handler.get_data_set("time").is_ok());
    }

    #[test]
    fn exceptions_other_than_no_data_fail_the_check() {
        let mut handler = handler();
        let empty = ExceptionDescriptor::new(ExceptionDescriptor::NO_DATA_IN_INTERVAL, "empty");
        handler.exception(&empty).unwrap();
        assert!(handler.check_exception().is_ok());
        let failure = ExceptionDescriptor::new(ExceptionDescriptor::SERVER_ERROR, "disk full");
        handler.exception(&failure).unwrap();
        assert!(matches!(
            handler.check_exception(),
            Err(QStreamError::Upstream { ref message, .. }) if message == "disk full"
        ));
    }
}
