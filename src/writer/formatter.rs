use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info, trace};

use super::encoding::choose_transfer_type;
use super::names::NameRegistry;
use crate::config::{FormatterConfig, JoinMode};
use crate::descriptor::{
    CommentDescriptor, Descriptor, EnumerationDescriptor, ExceptionDescriptor, PacketDescriptor,
    PlaneContent, PlaneDescriptor, PropertyEntry, StreamDescriptor,
};
use crate::protocol::{
    DescriptorHandle, DescriptorRegistry, write_data_frame, write_descriptor_frame,
};
use crate::serializer::SerializerRegistry;
use crate::types::ascii::FIELD_SEPARATOR;
use crate::types::properties::{self, PropertyValue};
use crate::types::{DataSet, EnumerationUnits, Units};
use crate::{QStreamError, Result};

/// Planes of one packet and the datasets their values come from.
#[derive(Default)]
struct Layout {
    planes: Vec<PlaneDescriptor>,
    sources: Vec<Option<DataSet>>,
}

impl Layout {
    fn push(&mut self, plane: PlaneDescriptor, source: Option<DataSet>) {
        self.planes.push(plane);
        self.sources.push(source);
    }
}

/// Writes datasets as a QStream to a blocking sink.
///
/// ```rust
/// use qstream::writer::StreamFormatter;
/// use qstream::types::DataSet;
///
/// let mut formatter = StreamFormatter::new(Vec::new());
/// formatter.format(&DataSet::series(vec![1.0, 2.5, -3.25, 0.0, 100.125])).unwrap();
/// let bytes = formatter.into_inner().unwrap();
/// assert!(bytes.starts_with(b"[00]"));
/// ```
pub struct StreamFormatter<W: Write> {
    out: W,
    config: FormatterConfig,
    serializers: Arc<SerializerRegistry>,
    registry: DescriptorRegistry,
    names: NameRegistry,
    stream_sent: bool,
    /// Live packet of each channel
    channels: HashMap<String, DescriptorHandle>,
    /// One-shot dependencies on the stream, by name
    emitted: HashMap<String, Arc<DataSet>>,
    /// Dependencies already sent for the packet being laid out
    emitted_now: HashSet<String>,
    announced: HashSet<(String, i64)>,
    records: u64,
}

impl<W: Write> StreamFormatter<W> {
    pub fn new(out: W) -> Self {
        Self::build(out, FormatterConfig::default(), Arc::new(SerializerRegistry::with_defaults()))
    }

    pub fn with_config(out: W, config: FormatterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(out, config, Arc::new(SerializerRegistry::with_defaults())))
    }

    /// Use a shared serializer registry for property values.
    pub fn with_serializers(mut self, serializers: Arc<SerializerRegistry>) -> Self {
        self.serializers = serializers;
        self
    }

    fn build(out: W, config: FormatterConfig, serializers: Arc<SerializerRegistry>) -> Self {
        Self {
            out,
            config,
            serializers,
            registry: DescriptorRegistry::new(),
            names: NameRegistry::new(),
            stream_sent: false,
            channels: HashMap::new(),
            emitted: HashMap::new(),
            emitted_now: HashSet::new(),
            announced: HashSet::new(),
            records: 0,
        }
    }

    pub fn config(&self) -> &FormatterConfig {
        &self.config
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    /// Data frames written so far.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Write `data_set` and everything it refers to.
    ///
    /// A dataset with the same name and packet shape as an earlier one is
    /// appended to it without a new descriptor.
    pub fn format(&mut self, data_set: &DataSet) -> Result<()> {
        if data_set.is_join() {
            return self.format_join(data_set);
        }
        self.names.begin();
        self.emitted_now.clear();
        let name = self.names.channel_name(data_set);
        self.ensure_stream(&name)?;

        if data_set.rank() == 0 {
            let references = self.references(data_set, &name, false, &HashMap::new())?;
            return self.write_one_shot(&name, data_set, references);
        }
        self.write_channel(data_set, &name, 0, false)
    }

    /// Write a join, one slice at a time.
    pub fn format_join(&mut self, join: &DataSet) -> Result<()> {
        let slices = join
            .slices()
            .ok_or_else(|| QStreamError::parse("formatting join", "dataset is not a join"))?;
        if let Some(slice) = slices.iter().find(|s| s.rank() == 0 || s.is_join()) {
            return Err(QStreamError::parse(
                "formatting join",
                format!("join slices must be qubes of rank 1 or more, found rank {}", slice.rank()),
            ));
        }
        self.names.begin();
        let name = self.names.channel_name(join);
        self.ensure_stream(&name)?;

        match self.config.join_mode {
            JoinMode::Redeclare => {
                for slice in slices {
                    self.emitted_now.clear();
                    self.write_channel(slice, &name, 1, true)?;
                }
            }
            JoinMode::Children => {
                let mut children = Vec::with_capacity(slices.len());
                for (index, slice) in slices.iter().enumerate() {
                    self.emitted_now.clear();
                    let child = self.names.claim(&format!("{}_{}", name, index), &name);
                    self.write_channel(slice, &child, 0, false)?;
                    if let Some(handle) = self.channels.remove(&child) {
                        self.registry.retire(handle)?;
                    }
                    children.push(child);
                }
                let mut plane = PlaneDescriptor::join(name.as_str(), join.rank(), children);
                plane.properties = value_properties(join);
                let (handle, _) = self.declare(PacketDescriptor::one_shot(vec![plane]), true)?;
                self.registry.retire(handle)?;
            }
        }
        debug!(name, slices = slices.len(), "join written");
        Ok(())
    }

    /// Announce an upstream failure in band.
    pub fn format_exception(&mut self, kind: &str, message: &str) -> Result<()> {
        let descriptor = Descriptor::Exception(ExceptionDescriptor::new(kind, message));
        self.write_untracked(&descriptor)
    }

    pub fn format_comment(&mut self, kind: &str, message: &str) -> Result<()> {
        let descriptor = Descriptor::Comment(CommentDescriptor::new(kind, message));
        self.write_untracked(&descriptor)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(|e| QStreamError::io("flushing stream", e))
    }

    /// Flush and hand back the sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        info!(records = self.records, "stream written");
        Ok(self.out)
    }

    fn ensure_stream(&mut self, name: &str) -> Result<()> {
        if self.stream_sent {
            return Ok(());
        }
        let descriptor = StreamDescriptor::new(name, self.config.byte_order);
        self.registry.register_stream(descriptor.to_element().to_xml()?);
        self.registry.send_stream(&mut self.out)?;
        self.stream_sent = true;
        info!(dataset = name, byte_order = self.config.byte_order.wire_name(), "stream started");
        Ok(())
    }

    fn write_untracked(&mut self, descriptor: &Descriptor) -> Result<()> {
        let xml = descriptor.to_xml(&self.serializers)?;
        write_descriptor_frame(&mut self.out, None, xml.as_bytes())
    }

    /// Register `packet`, or find a live identical one, and send its
    /// descriptor when it is new or `resend` is set.
    fn declare(
        &mut self,
        packet: PacketDescriptor,
        resend: bool,
    ) -> Result<(DescriptorHandle, Arc<PacketDescriptor>)> {
        packet.validate()?;
        if self.config.reuse_descriptors {
            if let Some(handle) = self.registry.has_descriptor(&packet) {
                let live = self.registry.packet(handle)?;
                if resend {
                    let id = self.registry.send(handle, &mut self.out)?;
                    trace!(%id, "re-sent packet descriptor");
                } else {
                    let id = self.registry.id_of(handle)?;
                    trace!(%id, "reusing live packet descriptor");
                }
                return Ok((handle, live));
            }
        }
        let xml = packet.to_element(&self.serializers)?.to_xml()?;
        let packet = Arc::new(packet);
        let handle = self.registry.add(Arc::clone(&packet), xml)?;
        let id = self.registry.send(handle, &mut self.out)?;
        debug!(%id, planes = packet.planes.len(), size = packet.size_bytes(), "declared packet");
        Ok((handle, packet))
    }

    /// Stream `data_set` record by record under `name`.
    fn write_channel(
        &mut self,
        data_set: &DataSet,
        name: &str,
        extra_rank: usize,
        resend: bool,
    ) -> Result<()> {
        let layout = self.layout(data_set, name, extra_rank, resend)?;
        let (handle, packet) = self.declare(PacketDescriptor::new(layout.planes), resend)?;
        if let Some(previous) = self.channels.insert(name.to_string(), handle) {
            if previous != handle && self.registry.retire(previous).is_ok() {
                debug!(name, "retired superseded packet");
            }
        }
        self.write_records(handle, &packet, &layout.sources, data_set.len())?;
        if !self.config.reuse_descriptors {
            self.channels.remove(name);
            self.registry.retire(handle)?;
        }
        Ok(())
    }

    /// Plane order: primary coordinate, record-varying auxiliary planes, channels.
    fn layout(
        &mut self,
        data_set: &DataSet,
        name: &str,
        extra_rank: usize,
        force: bool,
    ) -> Result<Layout> {
        let records = data_set.len();
        let mut streamed: HashMap<usize, String> = HashMap::new();
        let mut companions: Vec<(String, Arc<DataSet>)> = Vec::new();

        let candidates = std::iter::once(properties::DEPEND_0)
            .chain(properties::AUXILIARY)
            .chain(properties::DEPEND[1..].iter().copied());
        for role in candidates {
            let Some(dependency) = data_set.property(role).and_then(PropertyValue::as_data_set)
            else {
                continue;
            };
            let on_record_axis = properties::depend_index(role).is_none_or(|dim| dim == 0);
            let aligned = dependency.is_qube()
                && !dependency.is_join()
                && dependency.rank() >= 1
                && dependency.len() == records
                && (on_record_axis || dependency.rank() >= 2);
            if !aligned {
                continue;
            }
            let key = Arc::as_ptr(dependency) as usize;
            if streamed.contains_key(&key) {
                continue;
            }
            let target = self.names.dependency_name(dependency, role, name);
            streamed.insert(key, target.clone());
            companions.push((target, Arc::clone(dependency)));
        }

        let mut layout = Layout::default();
        for (target, companion) in &companions {
            let mut plane = self.streamed_plane(target, companion, extra_rank);
            for (property, reference) in self.references(companion, target, force, &streamed)? {
                plane.properties.insert(property, PropertyEntry::Reference(reference));
            }
            layout.push(plane, Some((**companion).clone()));
        }

        let references = self.references(data_set, name, force, &streamed)?;
        if is_bundle(data_set) {
            let mut members = Vec::new();
            for index in 0..data_set.shape()[1] {
                let Some(member) = data_set.unbundle_index(index) else { continue };
                let fallback = format!("ch_{}", index);
                let member_name =
                    self.names.claim_part(member.name().unwrap_or(fallback.as_str()), name);
                let mut plane = self.streamed_plane(&member_name, &member, extra_rank);
                let references = self.references(&member, &member_name, force, &streamed)?;
                for (property, reference) in references {
                    plane.properties.insert(property, PropertyEntry::Reference(reference));
                }
                members.push(member_name);
                layout.push(plane, Some(member));
            }
            let mut plane = PlaneDescriptor::bundle(name, data_set.rank() + extra_rank, members);
            plane.properties = value_properties(data_set);
            for (property, reference) in references {
                plane.properties.insert(property, PropertyEntry::Reference(reference));
            }
            layout.push(plane, None);
        } else {
            let mut plane = self.streamed_plane(name, data_set, extra_rank);
            for (property, reference) in references {
                plane.properties.insert(property, PropertyEntry::Reference(reference));
            }
            layout.push(plane, Some(data_set.clone()));
        }
        Ok(layout)
    }

    /// Encoded plane carrying one record of `source` per data frame.
    fn streamed_plane(&self, name: &str, source: &DataSet, extra_rank: usize) -> PlaneDescriptor {
        let tt = choose_transfer_type(source, &self.config);
        let qube = source.shape().get(1..).map(<[usize]>::to_vec).unwrap_or_default();
        let mut plane = PlaneDescriptor::encoded(name, source.rank() + extra_rank, qube, tt);
        plane.properties = value_properties(source);
        plane
    }

    /// Names of the datasets `source` links to, emitting those not streamed
    /// in the same packet.
    fn references(
        &mut self,
        source: &DataSet,
        owner: &str,
        force: bool,
        streamed: &HashMap<usize, String>,
    ) -> Result<Vec<(String, String)>> {
        let mut references = Vec::new();
        for (property, value) in source.properties() {
            let Some(dependency) = value.as_data_set() else { continue };
            let target = match streamed.get(&(Arc::as_ptr(dependency) as usize)) {
                Some(target) => target.clone(),
                None => self.emit_dependency(dependency, property, owner, force)?,
            };
            references.push((property.clone(), target));
        }
        Ok(references)
    }

    /// Send a dependency ahead of the packet that refers to it.
    fn emit_dependency(
        &mut self,
        dependency: &Arc<DataSet>,
        role: &str,
        owner: &str,
        force: bool,
    ) -> Result<String> {
        let name = self.names.dependency_name(dependency, role, owner);
        if self.emitted_now.contains(&name) {
            return Ok(name);
        }
        if !force {
            if let Some(previous) = self.emitted.get(&name) {
                if previous.equivalent(dependency) {
                    trace!(name, "dependency already on the stream");
                    self.emitted_now.insert(name.clone());
                    return Ok(name);
                }
            }
        }
        self.emitted_now.insert(name.clone());

        let data = if dependency.is_join() {
            dependency.flatten_join().ok_or_else(|| {
                QStreamError::parse(
                    format!("writing dependency '{}'", name),
                    "ragged join cannot be sent as a dependency",
                )
            })?
        } else {
            (**dependency).clone()
        };
        let references = self.references(&data, &name, force, &HashMap::new())?;
        self.write_one_shot(&name, &data, references)?;
        self.emitted.insert(name.clone(), Arc::new(data));
        Ok(name)
    }

    /// Send a whole dataset in one packet, then free its ID.
    ///
    /// Small datasets travel as values in the descriptor itself.
    fn write_one_shot(
        &mut self,
        name: &str,
        data: &DataSet,
        references: Vec<(String, String)>,
    ) -> Result<()> {
        let values = data.flat_values();
        let mut properties = value_properties(data);
        for (property, reference) in references {
            properties.insert(property, PropertyEntry::Reference(reference));
        }
        self.announce_values(&data.units(), &values)?;

        let inline = values.len() <= self.config.inline_values_limit;
        let plane = if inline {
            PlaneDescriptor {
                name: name.to_string(),
                rank: data.rank(),
                qube: data.shape(),
                content: PlaneContent::Inline(values.clone()),
                properties,
            }
        } else {
            let tt = choose_transfer_type(data, &self.config);
            let mut plane = PlaneDescriptor::encoded(name, data.rank(), data.shape(), tt);
            plane.properties = properties;
            plane
        };
        let (handle, packet) = self.declare(PacketDescriptor::one_shot(vec![plane]), true)?;
        if !inline {
            let id = self.registry.id_of(handle)?;
            let payload = encode_record(&packet, &[values.as_slice()])?;
            write_data_frame(&mut self.out, id, &payload)?;
            self.records += 1;
        }
        let id = self.registry.retire(handle)?;
        trace!(name, %id, inline, "one-shot dataset sent");
        Ok(())
    }

    fn write_records(
        &mut self,
        handle: DescriptorHandle,
        packet: &PacketDescriptor,
        sources: &[Option<DataSet>],
        records: usize,
    ) -> Result<()> {
        if packet.size_bytes() == 0 {
            return Ok(());
        }
        let id = self.registry.id_of(handle)?;
        // encoded planes in packet order, with the label table of nominal ones
        let columns: Vec<(&DataSet, Option<Arc<EnumerationUnits>>)> = packet
            .planes
            .iter()
            .zip(sources)
            .filter(|(plane, _)| plane.transfer_type().is_some())
            .filter_map(|(plane, source)| {
                let nominal = match plane.units() {
                    Units::Nominal(units) => Some(units),
                    _ => None,
                };
                source.as_ref().map(|source| (source, nominal))
            })
            .collect();

        let mut record = Vec::with_capacity(columns.len());
        for index in 0..records {
            record.clear();
            for (source, nominal) in &columns {
                let values = source.record(index).ok_or_else(|| {
                    QStreamError::parse("writing records", format!("record {} is missing", index))
                })?;
                if let Some(units) = nominal {
                    self.announce(units, values)?;
                }
                record.push(values);
            }
            let payload = encode_record(packet, &record)?;
            write_data_frame(&mut self.out, id, &payload)?;
        }
        self.records += records as u64;
        trace!(%id, records, "records written");
        Ok(())
    }

    fn announce_values(&mut self, units: &Units, values: &[f64]) -> Result<()> {
        match units {
            Units::Nominal(units) => self.announce(units, values),
            _ => Ok(()),
        }
    }

    /// Send the label of each ordinal in `values` the first time it appears.
    fn announce(&mut self, units: &EnumerationUnits, values: &[f64]) -> Result<()> {
        for value in values.iter().filter(|v| v.is_finite()) {
            let ordinal = value.round() as i64;
            if !self.announced.insert((units.id.clone(), ordinal)) {
                continue;
            }
            let (label, color) = match units.label(ordinal) {
                Some(label) => (label.label.clone(), label.color),
                None => (ordinal.to_string(), None),
            };
            let descriptor = Descriptor::Enumeration(EnumerationDescriptor {
                units: units.id.clone(),
                ordinal,
                label,
                color,
            });
            self.write_untracked(&descriptor)?;
        }
        Ok(())
    }
}

fn is_bundle(data_set: &DataSet) -> bool {
    data_set.bundle_descriptor().is_some() && data_set.rank() == 2 && !data_set.is_join()
}

/// Properties that travel as values; datasets travel by reference.
fn value_properties(data_set: &DataSet) -> BTreeMap<String, PropertyEntry> {
    data_set
        .properties()
        .iter()
        .filter(|(name, value)| {
            name.as_str() != properties::NAME
                && !matches!(value, PropertyValue::DataSet(_) | PropertyValue::Bundle(_))
        })
        .map(|(name, value)| (name.clone(), PropertyEntry::Value(value.clone())))
        .collect()
}

/// Encode one data frame from the per-plane values of its encoded planes.
fn encode_record(packet: &PacketDescriptor, planes: &[&[f64]]) -> Result<Vec<u8>> {
    let mut payload = vec![0u8; packet.size_bytes()];
    let mut offset = 0;
    let encoded = packet.planes.iter().filter_map(|p| p.transfer_type().map(|tt| (p, tt)));
    for ((plane, tt), values) in encoded.zip(planes) {
        if values.len() != plane.element_count() {
            return Err(QStreamError::buffer(
                format!("encoding plane '{}'", plane.name),
                plane.element_count(),
                values.len(),
            ));
        }
        for value in values.iter() {
            tt.write(*value, &mut payload[offset..])?;
            offset += tt.size_bytes();
        }
    }
    // overflow fill keeps all its bytes
    if packet.is_ascii() {
        if let Some(last) = payload.last_mut().filter(|last| **last == FIELD_SEPARATOR) {
            *last = b'\n';
        }
    }
    Ok(payload)
}
