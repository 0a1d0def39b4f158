//! Second reader phase: link datasets by name
//!
//! Planes refer to each other by name (`DEPEND_0="time"`), and a reference may
//! name a plane declared later in the stream. Resolution therefore runs only
//! once the stream has been read, walking references depth first.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

use super::builder::{JoinAccumulator, PlaneBuilder};
use super::handler::Entry;
use crate::descriptor::PropertyEntry;
use crate::types::properties::{self, PropertyValue};
use crate::types::{DataSet, EnumerationUnits, Units};
use crate::{QStreamError, Result};

#[derive(Debug, Clone)]
struct Resolved {
    /// Join of every cycle, before flattening
    raw: Arc<DataSet>,
    /// What callers see
    public: Arc<DataSet>,
    cycles: usize,
}

pub(crate) struct Resolver<'a> {
    entries: &'a HashMap<String, Entry>,
    enumerations: &'a HashMap<String, EnumerationUnits>,
    flatten_joins: bool,
    done: HashMap<String, Resolved>,
    path: Vec<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        entries: &'a HashMap<String, Entry>,
        enumerations: &'a HashMap<String, EnumerationUnits>,
        flatten_joins: bool,
    ) -> Self {
        Self { entries, enumerations, flatten_joins, done: HashMap::new(), path: Vec::new() }
    }

    pub fn resolve(&mut self, name: &str) -> Result<Arc<DataSet>> {
        self.resolve_entry(name).map(|resolved| resolved.public)
    }

    fn resolve_entry(&mut self, name: &str) -> Result<Resolved> {
        if let Some(resolved) = self.done.get(name) {
            return Ok(resolved.clone());
        }
        if self.path.iter().any(|n| n == name) {
            let mut chain = self.path.clone();
            chain.push(name.to_string());
            let details = format!("circular reference {}", chain.join(" -> "));
            return Err(QStreamError::parse("resolving references", details));
        }
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| QStreamError::DataSetNotFound { name: name.to_string() })?;

        self.path.push(name.to_string());
        let built = match entry {
            Entry::Data(acc) => self.build_data(name, acc),
            Entry::Bundle { rank, members, properties } => {
                self.build_bundle(name, *rank, members, properties)
            }
            Entry::Children { rank, children, properties } => {
                self.build_children(name, *rank, children, properties)
            }
        };
        self.path.pop();

        let resolved = built?;
        self.done.insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Target of `property` on slice `slice` of `owner`, which has `cycles` slices.
    fn reference(
        &mut self,
        owner: &str,
        property: &str,
        target: &str,
        slice: usize,
        cycles: usize,
    ) -> Result<Arc<DataSet>> {
        if !self.entries.contains_key(target) {
            return Err(QStreamError::UnresolvedReference {
                name: owner.to_string(),
                property: property.to_string(),
                reference: target.to_string(),
            });
        }
        let resolved = self.resolve_entry(target)?;
        if cycles > 1 && resolved.cycles == cycles {
            if let Some(part) = resolved.raw.slice(slice) {
                return Ok(Arc::new(part));
            }
        }
        Ok(resolved.public)
    }

    fn apply_properties(
        &mut self,
        owner: &str,
        data_set: &mut DataSet,
        props: &BTreeMap<String, PropertyEntry>,
        slice: usize,
        cycles: usize,
    ) -> Result<()> {
        for (key, entry) in props {
            match entry {
                PropertyEntry::Value(value) => data_set.set_property(key, self.fill_units(value)),
                PropertyEntry::Reference(target) => {
                    let linked = self.reference(owner, key, target, slice, cycles)?;
                    data_set.set_property(key, linked);
                }
            }
        }
        data_set.set_property(properties::NAME, owner);
        Ok(())
    }

    /// Attach the label table announced on the stream to nominal units.
    fn fill_units(&self, value: &PropertyValue) -> PropertyValue {
        match value {
            PropertyValue::Units(Units::Nominal(units)) => match self.enumerations.get(&units.id) {
                Some(table) => PropertyValue::Units(Units::Nominal(Arc::new(table.clone()))),
                None => value.clone(),
            },
            other => other.clone(),
        }
    }

    fn build_data(&mut self, name: &str, acc: &JoinAccumulator) -> Result<Resolved> {
        let cycles = acc.slices();
        let count = cycles.len();
        let mut slices = Vec::with_capacity(count);
        for (index, cycle) in cycles.iter().enumerate() {
            slices.push(self.build_slice(name, cycle, index, count)?);
        }

        if count == 1 && !acc.is_rank_join() {
            let single = Arc::new(slices.remove(0));
            return Ok(Resolved { raw: Arc::clone(&single), public: single, cycles: 1 });
        }

        let joined = Arc::new(DataSet::join(slices).with_name(name));
        let public = if acc.is_rank_join() || !self.flatten_joins {
            Arc::clone(&joined)
        } else {
            match joined.flatten_join() {
                Some(flat) => Arc::new(flat),
                None => {
                    warn!(
                        name,
                        slices = count,
                        "join slices differ in shape or coordinates, returning the join"
                    );
                    Arc::clone(&joined)
                }
            }
        };
        Ok(Resolved { raw: joined, public, cycles: count })
    }

    fn build_slice(
        &mut self,
        name: &str,
        cycle: &PlaneBuilder,
        index: usize,
        count: usize,
    ) -> Result<DataSet> {
        let mut data_set = cycle.to_data_set().map_err(|e| match e {
            QStreamError::Parse { context, details } => {
                QStreamError::Parse { context: format!("{} of '{}'", context, name), details }
            }
            other => other,
        })?;
        self.apply_properties(name, &mut data_set, cycle.properties(), index, count)?;
        Ok(data_set)
    }

    fn build_bundle(
        &mut self,
        name: &str,
        rank: usize,
        members: &[String],
        props: &BTreeMap<String, PropertyEntry>,
    ) -> Result<Resolved> {
        let mut columns = Vec::with_capacity(members.len());
        for member in members {
            let column = self.reference(name, properties::BUNDLE_1, member, 0, 1)?;
            columns.push(Arc::unwrap_or_clone(column));
        }
        let mut bundle = DataSet::bundle(columns)?;
        if bundle.rank() != rank {
            return Err(QStreamError::RankMismatch {
                name: name.to_string(),
                expected: rank,
                found: bundle.rank(),
            });
        }
        self.apply_properties(name, &mut bundle, props, 0, 1)?;
        let bundle = Arc::new(bundle);
        Ok(Resolved { raw: Arc::clone(&bundle), public: bundle, cycles: 1 })
    }

    fn build_children(
        &mut self,
        name: &str,
        rank: usize,
        children: &[String],
        props: &BTreeMap<String, PropertyEntry>,
    ) -> Result<Resolved> {
        let mut slices = Vec::with_capacity(children.len());
        for child in children {
            let slice = self.reference(name, "children", child, 0, 1)?;
            slices.push(Arc::unwrap_or_clone(slice));
        }
        let slice_rank = slices.first().map_or(0, DataSet::rank);
        let mut joined = DataSet::join(slices);
        self.apply_properties(name, &mut joined, props, 0, 1)?;
        let joined = Arc::new(joined);

        let public = if rank == slice_rank && self.flatten_joins {
            match joined.flatten_join() {
                Some(flat) => Arc::new(flat),
                None => {
                    warn!(name, "join children differ in shape or coordinates, returning the join");
                    Arc::clone(&joined)
                }
            }
        } else {
            Arc::clone(&joined)
        };
        Ok(Resolved { raw: joined, public, cycles: 1 })
    }
}
