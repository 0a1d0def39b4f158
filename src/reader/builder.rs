//! Growable per-name value stores
//!
//! Every dataset name on the stream owns one [`JoinAccumulator`]. Each
//! declaration of the name opens a new [`PlaneBuilder`] cycle; records append
//! to the newest cycle. A name declared once is a trivial join of one slice.

use std::collections::BTreeMap;

use crate::descriptor::{PlaneDescriptor, PropertyEntry};
use crate::types::{DataSet, TransferType};
use crate::{QStreamError, Result};

/// Values of one declaration of a name.
#[derive(Debug, Clone)]
pub struct PlaneBuilder {
    properties: BTreeMap<String, PropertyEntry>,
    qube: Vec<usize>,
    values: Vec<f64>,
    records: usize,
    streamed: bool,
}

impl PlaneBuilder {
    /// Builder for an encoded plane; `streamed` when each data frame is a record.
    pub fn encoded(plane: &PlaneDescriptor, streamed: bool) -> Self {
        Self {
            properties: plane.properties.clone(),
            qube: plane.qube.clone(),
            values: Vec::new(),
            records: 0,
            streamed,
        }
    }

    /// Builder already holding the values carried in the descriptor.
    pub fn inline(plane: &PlaneDescriptor, values: &[f64]) -> Self {
        Self {
            properties: plane.properties.clone(),
            qube: plane.qube.clone(),
            values: values.to_vec(),
            records: 1,
            streamed: false,
        }
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyEntry> {
        &self.properties
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn is_streamed(&self) -> bool {
        self.streamed
    }

    /// Decode `count` elements of `tt` from `bytes` as one record.
    ///
    /// A one-shot plane holds a single record; a repeat replaces it.
    pub fn read_record(&mut self, tt: TransferType, bytes: &[u8]) -> Result<()> {
        let width = tt.size_bytes();
        let count: usize = self.qube.iter().product();
        if bytes.len() < width * count {
            return Err(QStreamError::buffer("decoding record", width * count, bytes.len()));
        }
        if !self.streamed {
            self.values.clear();
            self.records = 0;
        }
        self.values.reserve(count);
        for field in bytes.chunks_exact(width).take(count) {
            self.values.push(tt.read(field)?);
        }
        self.records += 1;
        Ok(())
    }

    pub fn shape(&self) -> Vec<usize> {
        if self.streamed {
            let mut shape = Vec::with_capacity(self.qube.len() + 1);
            shape.push(self.records);
            shape.extend_from_slice(&self.qube);
            shape
        } else {
            self.qube.clone()
        }
    }

    /// The values as a dataset, before any property is attached.
    pub fn to_data_set(&self) -> Result<DataSet> {
        if !self.streamed && self.records == 0 {
            return Err(QStreamError::parse(
                "building dataset",
                "one-shot packet was declared but its data frame never arrived",
            ));
        }
        DataSet::qube(self.shape(), self.values.clone())
    }

    /// Same shape and values, `NaN` equal to `NaN`.
    fn same_values(&self, other: &PlaneBuilder) -> bool {
        self.shape() == other.shape()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a == b || (a.is_nan() && b.is_nan()))
    }
}

/// All declarations of one name.
#[derive(Debug, Clone)]
pub struct JoinAccumulator {
    declared_rank: usize,
    slice_rank: usize,
    cycles: Vec<PlaneBuilder>,
}

impl JoinAccumulator {
    pub fn new(declared_rank: usize, slice_rank: usize, first: PlaneBuilder) -> Self {
        Self { declared_rank, slice_rank, cycles: vec![first] }
    }

    pub fn declared_rank(&self) -> usize {
        self.declared_rank
    }

    pub fn slice_rank(&self) -> usize {
        self.slice_rank
    }

    /// Whether the name was declared one rank above its slices.
    pub fn is_rank_join(&self) -> bool {
        self.declared_rank == self.slice_rank + 1
    }

    /// Open a new cycle for a re-declaration of the name.
    pub fn push_cycle(
        &mut self,
        name: &str,
        declared_rank: usize,
        slice_rank: usize,
        cycle: PlaneBuilder,
    ) -> Result<()> {
        if slice_rank != self.slice_rank {
            return Err(QStreamError::RankMismatch {
                name: name.to_string(),
                expected: self.slice_rank,
                found: slice_rank,
            });
        }
        if declared_rank != self.declared_rank {
            return Err(QStreamError::RankMismatch {
                name: name.to_string(),
                expected: self.declared_rank,
                found: declared_rank,
            });
        }
        self.cycles.push(cycle);
        Ok(())
    }

    /// Cycle receiving records.
    pub fn current_mut(&mut self) -> &mut PlaneBuilder {
        let last = self.cycles.len() - 1;
        &mut self.cycles[last]
    }

    /// Cycles as slices of the result.
    ///
    /// Repeats of a non-streamed plane with identical values collapse into
    /// one, so a coordinate re-sent by each of several concatenated streams
    /// stays a single coordinate.
    pub fn slices(&self) -> &[PlaneBuilder] {
        let first = &self.cycles[0];
        let repeated = !self.is_rank_join()
            && self.cycles.iter().all(|c| !c.is_streamed())
            && self.cycles[1..].iter().all(|c| c.same_values(first));
        if repeated { &self.cycles[..1] } else { &self.cycles }
    }

    pub fn total_records(&self) -> usize {
        self.cycles.iter().map(PlaneBuilder::records).sum()
    }
}
