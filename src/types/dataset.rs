//! Minimal in-memory dataset
//!
//! A [`DataSet`] is either a rectangular array of `f64` (a qube) or a join of
//! other datasets along a new leading axis. Coordinates, error bars and bundle
//! column descriptions hang off the property map, linked by `Arc` so that
//! several datasets can share one coordinate.

use std::sync::Arc;

use super::properties::{self, BundleDescriptor, Properties, PropertyValue};
use super::Units;
use crate::{QStreamError, Result};

/// Backing storage of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    /// Row-major values with the given extents; an empty shape is a scalar
    Qube { shape: Vec<usize>, values: Vec<f64> },
    /// Slices joined along a new leading axis
    Join(Vec<DataSet>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    storage: Storage,
    properties: Properties,
}

impl DataSet {
    /// Rank-0 dataset holding one value.
    pub fn scalar(value: f64) -> Self {
        Self {
            storage: Storage::Qube { shape: Vec::new(), values: vec![value] },
            properties: Properties::new(),
        }
    }

    /// Rank-1 dataset.
    pub fn series(values: Vec<f64>) -> Self {
        let shape = vec![values.len()];
        Self { storage: Storage::Qube { shape, values }, properties: Properties::new() }
    }

    /// Rectangular dataset; `values.len()` must equal the product of `shape`.
    pub fn qube(shape: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(QStreamError::parse(
                "building qube",
                format!("shape {:?} holds {} values, got {}", shape, expected, values.len()),
            ));
        }
        Ok(Self { storage: Storage::Qube { shape, values }, properties: Properties::new() })
    }

    /// Join `slices` along a new leading axis.
    pub fn join(slices: Vec<DataSet>) -> Self {
        Self { storage: Storage::Join(slices), properties: Properties::new() }
    }

    /// Bundle rank-1 channels of equal length into one rank-2 dataset.
    ///
    /// Column `i` keeps the properties of `members[i]` in the bundle
    /// descriptor; members without a name are called `ch_<i>`. The first
    /// member's `DEPEND_0` becomes the bundle's record coordinate.
    pub fn bundle(members: Vec<DataSet>) -> Result<Self> {
        let first = members.first().ok_or_else(|| {
            QStreamError::parse("building bundle", "a bundle needs at least one member")
        })?;
        let records = first.len();
        let width = members.len();
        let depend_0 = first.depend(0).cloned();

        let mut values = vec![0.0; records * width];
        let mut descriptor = BundleDescriptor::default();
        for (column, member) in members.into_iter().enumerate() {
            let column_values = match member.storage {
                Storage::Qube { ref shape, ref values } if shape[..] == [records] => values,
                _ => {
                    return Err(QStreamError::parse(
                        "building bundle",
                        format!("member {} is not a rank-1 series of length {}", column, records),
                    ));
                }
            };
            for (record, value) in column_values.iter().enumerate() {
                values[record * width + column] = *value;
            }
            let mut props = member.properties;
            props.remove(properties::DEPEND_0);
            props
                .entry(properties::NAME.to_string())
                .or_insert_with(|| format!("ch_{}", column).into());
            descriptor.members.push(props);
        }

        let mut bundle = Self::qube(vec![records, width], values)?
            .with_property(properties::BUNDLE_1, PropertyValue::Bundle(Arc::new(descriptor)));
        if let Some(depend_0) = depend_0 {
            bundle.set_property(properties::DEPEND_0, depend_0);
        }
        Ok(bundle)
    }

    pub fn with_property(mut self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.set_property(name, value);
        self
    }

    pub fn with_name(self, name: &str) -> Self {
        self.with_property(properties::NAME, name)
    }

    pub fn with_units(self, units: Units) -> Self {
        self.with_property(properties::UNITS, units)
    }

    /// Attach the coordinate of dimension `dim`.
    pub fn with_depend(self, dim: usize, coordinate: impl Into<Arc<DataSet>>) -> Self {
        let name = properties::DEPEND.get(dim).copied().unwrap_or(properties::DEPEND_3);
        self.with_property(name, coordinate.into())
    }

    pub fn set_property(&mut self, name: &str, value: impl Into<PropertyValue>) {
        self.properties.insert(name.to_string(), value.into());
    }

    pub fn remove_property(&mut self, name: &str) -> Option<PropertyValue> {
        self.properties.remove(name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn name(&self) -> Option<&str> {
        self.property(properties::NAME)?.as_str()
    }

    /// Units of the values; joins fall back to their first slice.
    pub fn units(&self) -> Units {
        if let Some(units) = self.property(properties::UNITS).and_then(PropertyValue::as_units) {
            return units.clone();
        }
        match &self.storage {
            Storage::Join(slices) => slices.first().map(DataSet::units).unwrap_or_default(),
            Storage::Qube { .. } => Units::Dimensionless,
        }
    }

    /// Coordinate of dimension `dim`, if one is attached.
    pub fn depend(&self, dim: usize) -> Option<&Arc<DataSet>> {
        self.property(properties::DEPEND.get(dim)?)?.as_data_set()
    }

    pub fn bundle_descriptor(&self) -> Option<&Arc<BundleDescriptor>> {
        self.property(properties::BUNDLE_1)?.as_bundle()
    }

    pub fn rank(&self) -> usize {
        match &self.storage {
            Storage::Qube { shape, .. } => shape.len(),
            Storage::Join(slices) => 1 + slices.first().map_or(0, DataSet::rank),
        }
    }

    /// Length of the leading dimension; a scalar has no records.
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Qube { shape, .. } => shape.first().copied().unwrap_or(0),
            Storage::Join(slices) => slices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extents of every dimension. A ragged join reports its first slice.
    pub fn shape(&self) -> Vec<usize> {
        match &self.storage {
            Storage::Qube { shape, .. } => shape.clone(),
            Storage::Join(slices) => {
                let mut shape = vec![slices.len()];
                if let Some(first) = slices.first() {
                    shape.extend(first.shape());
                }
                shape
            }
        }
    }

    /// Whether every slice has the same shape.
    pub fn is_qube(&self) -> bool {
        match &self.storage {
            Storage::Qube { .. } => true,
            Storage::Join(slices) => {
                let Some(first) = slices.first() else { return true };
                let shape = first.shape();
                slices.iter().all(|s| s.is_qube() && s.shape() == shape)
            }
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(self.storage, Storage::Join(_))
    }

    /// Row-major values of a qube.
    pub fn values(&self) -> Option<&[f64]> {
        match &self.storage {
            Storage::Qube { values, .. } => Some(values),
            Storage::Join(_) => None,
        }
    }

    /// All values in order, joins concatenated.
    pub fn flat_values(&self) -> Vec<f64> {
        match &self.storage {
            Storage::Qube { values, .. } => values.clone(),
            Storage::Join(slices) => slices.iter().flat_map(DataSet::flat_values).collect(),
        }
    }

    pub fn value(&self, index: &[usize]) -> Option<f64> {
        match &self.storage {
            Storage::Qube { shape, values } => {
                if index.len() != shape.len() {
                    return None;
                }
                let mut offset = 0;
                for (i, extent) in index.iter().zip(shape) {
                    if i >= extent {
                        return None;
                    }
                    offset = offset * extent + i;
                }
                values.get(offset).copied()
            }
            Storage::Join(slices) => {
                let (first, rest) = index.split_first()?;
                slices.get(*first)?.value(rest)
            }
        }
    }

    /// Number of values in one record of a qube.
    pub fn record_size(&self) -> usize {
        self.shape().iter().skip(1).product()
    }

    /// Values of record `index` of a qube.
    pub fn record(&self, index: usize) -> Option<&[f64]> {
        match &self.storage {
            Storage::Qube { shape, values } if !shape.is_empty() => {
                let size: usize = shape[1..].iter().product();
                values.get(index * size..(index + 1) * size)
            }
            _ => None,
        }
    }

    pub fn slices(&self) -> Option<&[DataSet]> {
        match &self.storage {
            Storage::Join(slices) => Some(slices),
            Storage::Qube { .. } => None,
        }
    }

    /// Slice `index` of the leading dimension.
    ///
    /// Slicing a qube shifts `DEPEND_n` to `DEPEND_(n-1)`, slicing record
    /// varying coordinates along with the data.
    pub fn slice(&self, index: usize) -> Option<DataSet> {
        match &self.storage {
            Storage::Join(slices) => slices.get(index).cloned(),
            Storage::Qube { shape, .. } => {
                if shape.is_empty() || index >= shape[0] {
                    return None;
                }
                let values = self.record(index)?.to_vec();
                let mut slice = DataSet::qube(shape[1..].to_vec(), values).ok()?;
                for name in [
                    properties::UNITS,
                    properties::FORMAT,
                    properties::LABEL,
                    properties::FILL_VALUE,
                    properties::VALID_MIN,
                    properties::VALID_MAX,
                ] {
                    if let Some(value) = self.property(name) {
                        slice.set_property(name, value.clone());
                    }
                }
                for dim in 1..properties::DEPEND.len() {
                    let Some(coordinate) = self.depend(dim) else { continue };
                    let shifted = properties::DEPEND[dim - 1];
                    if coordinate.rank() > 1 {
                        if let Some(row) = coordinate.slice(index) {
                            slice.set_property(shifted, row);
                        }
                    } else {
                        slice.set_property(shifted, Arc::clone(coordinate));
                    }
                }
                Some(slice)
            }
        }
    }

    /// Column `name` of a bundle as a rank-1 series.
    pub fn unbundle(&self, name: &str) -> Option<DataSet> {
        let index = match &self.storage {
            Storage::Join(slices) => slices.first()?.bundle_descriptor()?.index_of(name)?,
            Storage::Qube { .. } => self.bundle_descriptor()?.index_of(name)?,
        };
        self.unbundle_index(index)
    }

    /// Column `index` of a bundle as a rank-1 series.
    pub fn unbundle_index(&self, index: usize) -> Option<DataSet> {
        match &self.storage {
            Storage::Join(slices) => {
                let columns =
                    slices.iter().map(|s| s.unbundle_index(index)).collect::<Option<Vec<_>>>()?;
                let joined = DataSet::join(columns);
                Some(joined.flatten_join().unwrap_or(joined))
            }
            Storage::Qube { shape, values } => {
                let descriptor = self.bundle_descriptor()?;
                if shape.len() != 2 || index >= shape[1] {
                    return None;
                }
                let width = shape[1];
                let column = values.iter().skip(index).step_by(width).copied().collect();
                let mut series = DataSet::series(column);
                if let Some(member) = descriptor.members.get(index) {
                    series.properties.extend(member.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                if let Some(depend_0) = self.depend(0) {
                    series.set_property(properties::DEPEND_0, Arc::clone(depend_0));
                }
                Some(series)
            }
        }
    }

    /// Concatenate the slices of a join into one qube.
    ///
    /// Returns `None` unless every slice is a qube with the same trailing
    /// shape and equivalent non-leading coordinates. Record coordinates and
    /// auxiliary planes present on every slice are concatenated alongside.
    pub fn flatten_join(&self) -> Option<DataSet> {
        let slices = self.slices()?;
        let first = slices.first()?;
        let first_shape = first.shape();
        if first_shape.is_empty() {
            return None;
        }
        let trailing = &first_shape[1..];
        for slice in slices {
            let shape = slice.shape();
            if slice.is_join() || shape.is_empty() || &shape[1..] != trailing {
                return None;
            }
        }
        for dim in 1..properties::DEPEND.len() {
            let reference = first.depend(dim);
            let consistent = slices.iter().all(|s| match (reference, s.depend(dim)) {
                (None, None) => true,
                (Some(a), Some(b)) => a.equivalent(b),
                _ => false,
            });
            if !consistent {
                return None;
            }
        }

        let total: usize = slices.iter().map(DataSet::len).sum();
        let values: Vec<f64> = slices.iter().flat_map(DataSet::flat_values).collect();
        let mut shape = vec![total];
        shape.extend_from_slice(trailing);
        let mut flat = DataSet::qube(shape, values).ok()?;

        for (name, value) in first.properties() {
            if name == properties::DEPEND_0 || properties::AUXILIARY.contains(&name.as_str()) {
                continue;
            }
            flat.properties.insert(name.clone(), value.clone());
        }
        for name in std::iter::once(properties::DEPEND_0).chain(properties::AUXILIARY) {
            let parts: Option<Vec<DataSet>> = slices
                .iter()
                .map(|s| {
                    s.property(name).and_then(PropertyValue::as_data_set).map(|d| (**d).clone())
                })
                .collect();
            if let Some(joined) = parts.and_then(|p| DataSet::join(p).flatten_join()) {
                flat.set_property(name, joined);
            }
        }
        for (name, value) in &self.properties {
            flat.properties.insert(name.clone(), value.clone());
        }
        Some(flat)
    }

    /// Same shape, units and values, with `NaN` equal to `NaN`.
    pub fn equivalent(&self, other: &DataSet) -> bool {
        if self.shape() != other.shape() || self.units() != other.units() {
            return false;
        }
        let a = self.flat_values();
        let b = other.flat_values();
        a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeBase;

    fn time_axis(start: f64, len: usize) -> DataSet {
        DataSet::series((0..len).map(|i| start + i as f64).collect())
            .with_units(Units::Time(TimeBase::T2000))
    }

    #[test]
    fn qube_rejects_wrong_value_count() {
        assert!(DataSet::qube(vec![2, 3], vec![0.0; 5]).is_err());
        let q = DataSet::qube(vec![2, 3], (0..6).map(f64::from).collect()).unwrap();
        assert_eq!(q.rank(), 2);
        assert_eq!(q.value(&[1, 2]), Some(5.0));
        assert_eq!(q.value(&[2, 0]), None);
        assert_eq!(q.record(1), Some(&[3.0, 4.0, 5.0][..]));
    }

    #[test]
    fn scalar_has_rank_zero_and_no_records() {
        let s = DataSet::scalar(4.0);
        assert_eq!(s.rank(), 0);
        assert!(s.is_empty());
        assert_eq!(s.value(&[]), Some(4.0));
    }

    #[test]
    fn join_reports_leading_axis() {
        let join =
            DataSet::join(vec![DataSet::series(vec![1.0; 4]), DataSet::series(vec![2.0; 4])]);
        assert_eq!(join.rank(), 2);
        assert_eq!(join.shape(), vec![2, 4]);
        assert!(join.is_qube());
        assert_eq!(join.value(&[1, 3]), Some(2.0));
    }

    #[test]
    fn flatten_concatenates_series_and_coordinates() {
        let slices = (0..3)
            .map(|i| {
                DataSet::series(vec![i as f64; 10]).with_depend(0, time_axis(i as f64 * 10.0, 10))
            })
            .collect();
        let flat = DataSet::join(slices).flatten_join().expect("flattenable");
        assert_eq!(flat.shape(), vec![30]);
        let time = flat.depend(0).expect("time");
        assert_eq!(time.len(), 30);
        assert_eq!(time.value(&[29]), Some(29.0));
        assert_eq!(time.units(), Units::Time(TimeBase::T2000));
    }

    #[test]
    fn flatten_refuses_differing_trailing_coordinates() {
        let square = || DataSet::qube(vec![2, 2], vec![0.0; 4]).unwrap();
        let a = square().with_depend(1, DataSet::series(vec![1.0, 2.0]));
        let b = square().with_depend(1, DataSet::series(vec![1.0, 3.0]));
        assert!(DataSet::join(vec![a.clone(), b]).flatten_join().is_none());
        let flat = DataSet::join(vec![a.clone(), a]).flatten_join();
        assert_eq!(flat.map(|f| f.shape()), Some(vec![4, 2]));
    }

    #[test]
    fn bundle_and_unbundle() {
        let time = Arc::new(time_axis(0.0, 3));
        let a = DataSet::series(vec![1.0, 2.0, 3.0])
            .with_name("A")
            .with_depend(0, Arc::clone(&time));
        let b = DataSet::series(vec![4.0, 5.0, 6.0]).with_name("B");
        let bundle = DataSet::bundle(vec![a, b]).unwrap();
        assert_eq!(bundle.shape(), vec![3, 2]);
        let column = bundle.unbundle("B").unwrap();
        assert_eq!(column.flat_values(), vec![4.0, 5.0, 6.0]);
        assert_eq!(column.name(), Some("B"));
        assert!(column.depend(0).is_some());
        assert!(bundle.unbundle("C").is_none());
    }

    #[test]
    fn bundle_rejects_ragged_members() {
        let ragged = vec![DataSet::series(vec![1.0]), DataSet::series(vec![1.0, 2.0])];
        let err = DataSet::bundle(ragged).unwrap_err();
        assert!(matches!(err, QStreamError::Parse { .. }));
    }

    #[test]
    fn slice_shifts_coordinates() {
        let q = DataSet::qube(vec![2, 3], (0..6).map(f64::from).collect())
            .unwrap()
            .with_depend(0, DataSet::series(vec![0.0, 1.0]))
            .with_depend(1, DataSet::series(vec![10.0, 20.0, 30.0]));
        let row = q.slice(1).unwrap();
        assert_eq!(row.flat_values(), vec![3.0, 4.0, 5.0]);
        assert_eq!(row.depend(0).map(|d| d.len()), Some(3));
        assert!(row.depend(1).is_none());
    }

    #[test]
    fn equivalence_treats_nan_as_equal() {
        let a = DataSet::series(vec![1.0, f64::NAN]);
        let b = DataSet::series(vec![1.0, f64::NAN]);
        assert!(a.equivalent(&b));
        assert!(!a.equivalent(&DataSet::series(vec![1.0, 2.0])));
    }
}
