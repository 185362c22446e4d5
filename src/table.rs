use crate::config::is_masked;
use crate::error::{FieldError, FieldResult};
use ndarray::Array2;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// `(layer, inest, row, col)`, unique per table.
pub type CellKey = (usize, usize, usize, usize);

/// Geometry of one table row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellCoord {
    pub layer: usize,
    pub inest: usize,
    pub row: usize,
    pub col: usize,
    pub x: f64,
    pub y: f64,
}

impl CellCoord {
    pub fn key(&self) -> CellKey {
        (self.layer, self.inest, self.row, self.col)
    }
}

/// One row of a flat field table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRow {
    pub layer: usize,
    pub inest: usize,
    pub row: usize,
    pub col: usize,
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

impl FieldRow {
    pub fn coord(&self) -> CellCoord {
        CellCoord {
            layer: self.layer,
            inest: self.inest,
            row: self.row,
            col: self.col,
            x: self.x,
            y: self.y,
        }
    }
}

/// Row filter on layer ids, nest ids and excluded values.
///
/// `None` for layers or nests means every id present in the table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub layers: Option<Vec<usize>>,
    pub nests: Option<Vec<usize>>,
    pub masked_values: Vec<f64>,
}

impl Selection {
    pub fn all() -> Self {
        Selection::default()
    }

    pub fn layer(mut self, layer: usize) -> Self {
        self.layers.get_or_insert_with(Vec::new).push(layer);
        self
    }

    pub fn layers(mut self, layers: &[usize]) -> Self {
        self.layers
            .get_or_insert_with(Vec::new)
            .extend_from_slice(layers);
        self
    }

    pub fn inest(mut self, inest: usize) -> Self {
        self.nests.get_or_insert_with(Vec::new).push(inest);
        self
    }

    pub fn nests(mut self, nests: &[usize]) -> Self {
        self.nests.get_or_insert_with(Vec::new).extend_from_slice(nests);
        self
    }

    pub fn masked(mut self, masked_values: &[f64]) -> Self {
        self.masked_values = masked_values.to_vec();
        self
    }

    pub fn matches(&self, coord: &CellCoord, value: f64) -> bool {
        let layer_ok = self
            .layers
            .as_ref()
            .is_none_or(|ls| ls.contains(&coord.layer));
        let nest_ok = self
            .nests
            .as_ref()
            .is_none_or(|ns| ns.contains(&coord.inest));
        layer_ok && nest_ok && !is_masked(value, &self.masked_values)
    }
}

/// Flat field table: one row per grid cell across every layer and nest.
///
/// Geometry is shared behind an `Arc` and never mutated, so tables derived
/// from the same source only differ by their value buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldTable {
    geometry: Arc<[CellCoord]>,
    values: Vec<f64>,
}

impl FieldTable {
    pub fn from_rows(rows: Vec<FieldRow>) -> FieldResult<Self> {
        let geometry: Vec<CellCoord> = rows.iter().map(FieldRow::coord).collect();
        let values = rows.iter().map(|r| r.value).collect();
        Self::from_parts(geometry.into(), values)
    }

    pub fn from_parts(geometry: Arc<[CellCoord]>, values: Vec<f64>) -> FieldResult<Self> {
        if geometry.len() != values.len() {
            return Err(FieldError::LengthMismatch {
                what: "table values",
                expected: geometry.len(),
                found: values.len(),
            });
        }
        let mut seen = BTreeSet::new();
        for c in geometry.iter() {
            if !seen.insert(c.key()) {
                return Err(FieldError::shape(
                    c.layer,
                    c.inest,
                    format!("duplicate cell at row {} col {}", c.row, c.col),
                ));
            }
        }
        Ok(FieldTable { geometry, values })
    }

    /// New table sharing this table's geometry.
    pub fn with_values(&self, values: Vec<f64>) -> FieldResult<Self> {
        if values.len() != self.len() {
            return Err(FieldError::LengthMismatch {
                what: "table values",
                expected: self.len(),
                found: values.len(),
            });
        }
        Ok(FieldTable {
            geometry: Arc::clone(&self.geometry),
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn geometry(&self) -> &Arc<[CellCoord]> {
        &self.geometry
    }

    pub fn coord(&self, idx: usize) -> &CellCoord {
        &self.geometry[idx]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn row(&self, idx: usize) -> FieldRow {
        let c = &self.geometry[idx];
        FieldRow {
            layer: c.layer,
            inest: c.inest,
            row: c.row,
            col: c.col,
            x: c.x,
            y: c.y,
            value: self.values[idx],
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = FieldRow> + '_ {
        (0..self.len()).map(|i| self.row(i))
    }

    pub fn shares_geometry(&self, other: &FieldTable) -> bool {
        Arc::ptr_eq(&self.geometry, &other.geometry)
    }

    pub fn same_geometry(&self, other: &FieldTable) -> bool {
        self.shares_geometry(other) || self.geometry == other.geometry
    }

    /// True when both tables hold the same cell keys in the same row order.
    pub fn keys_aligned(&self, other: &FieldTable) -> bool {
        self.shares_geometry(other)
            || (self.len() == other.len()
                && self
                    .geometry
                    .iter()
                    .zip(other.geometry.iter())
                    .all(|(a, b)| a.key() == b.key()))
    }

    pub fn key_index(&self) -> HashMap<CellKey, usize> {
        self.geometry
            .iter()
            .enumerate()
            .map(|(i, c)| (c.key(), i))
            .collect()
    }

    /// Distinct layer ids, ascending.
    pub fn layers(&self) -> Vec<usize> {
        let set: BTreeSet<usize> = self.geometry.iter().map(|c| c.layer).collect();
        set.into_iter().collect()
    }

    /// Distinct nest ids, ascending.
    pub fn nests(&self) -> Vec<usize> {
        let set: BTreeSet<usize> = self.geometry.iter().map(|c| c.inest).collect();
        set.into_iter().collect()
    }

    /// Present `(inest, layer)` pairs, nest ascending then layer ascending.
    pub fn groups(&self) -> Vec<(usize, usize)> {
        let set: BTreeSet<(usize, usize)> =
            self.geometry.iter().map(|c| (c.inest, c.layer)).collect();
        set.into_iter().collect()
    }

    pub fn select_mask(&self, sel: &Selection) -> Vec<bool> {
        self.geometry
            .iter()
            .zip(&self.values)
            .map(|(c, v)| sel.matches(c, *v))
            .collect()
    }

    pub fn select_idx(&self, sel: &Selection) -> Vec<usize> {
        self.geometry
            .iter()
            .zip(&self.values)
            .enumerate()
            .filter(|(_, (c, v))| sel.matches(c, **v))
            .map(|(i, _)| i)
            .collect()
    }

    /// Subset table with its own geometry.
    pub fn select(&self, sel: &Selection) -> FieldTable {
        self.subset(&self.select_mask(sel))
    }

    pub fn subset(&self, mask: &[bool]) -> FieldTable {
        let (geometry, values): (Vec<CellCoord>, Vec<f64>) = self
            .geometry
            .iter()
            .zip(&self.values)
            .zip(mask)
            .filter(|(_, keep)| **keep)
            .map(|((c, v), _)| (*c, *v))
            .unzip();
        FieldTable {
            geometry: geometry.into(),
            values,
        }
    }

    /// Dense `(max(row)+1, max(col)+1)` array of one (layer, inest) group.
    ///
    /// Cells are placed by their (row, col) key; a group with holes is an
    /// error, never padded.
    pub fn as_dense(&self, layer: usize, inest: usize) -> FieldResult<Array2<f64>> {
        let group: Vec<usize> = (0..self.len())
            .filter(|&i| {
                let c = &self.geometry[i];
                c.layer == layer && c.inest == inest
            })
            .collect();
        if group.is_empty() {
            return Err(FieldError::shape(layer, inest, "no cell in group"));
        }

        let nrow = group.iter().map(|&i| self.geometry[i].row).max().unwrap_or(0) + 1;
        let ncol = group.iter().map(|&i| self.geometry[i].col).max().unwrap_or(0) + 1;
        if group.len() != nrow * ncol {
            return Err(FieldError::shape(
                layer,
                inest,
                format!(
                    "{} cells cannot fill a {nrow}x{ncol} rectangle",
                    group.len()
                ),
            ));
        }

        let mut array = Array2::from_elem((nrow, ncol), f64::NAN);
        for &i in &group {
            let c = &self.geometry[i];
            array[[c.row, c.col]] = self.values[i];
        }
        Ok(array)
    }

    /// One dense array per present (layer, inest) pair of the selection,
    /// layer outer, nest inner. Excluded values are not applied.
    pub fn as_arrays(&self, sel: &Selection) -> FieldResult<Vec<Array2<f64>>> {
        let layers = sel.layers.clone().unwrap_or_else(|| self.layers());
        let nests = sel.nests.clone().unwrap_or_else(|| self.nests());
        let present: BTreeSet<(usize, usize)> = self.groups().into_iter().collect();

        let mut arrays = Vec::new();
        for &layer in &layers {
            for &inest in &nests {
                if present.contains(&(inest, layer)) {
                    arrays.push(self.as_dense(layer, inest)?);
                }
            }
        }
        Ok(arrays)
    }

    /// Content comparison keyed by cell, independent of row order.
    pub fn approx_eq(&self, other: &FieldTable, tol: f64) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let index = other.key_index();
        self.rows().all(|a| match index.get(&a.coord().key()) {
            Some(&j) => {
                let b = other.row(j);
                (a.x - b.x).abs() <= tol
                    && (a.y - b.y).abs() <= tol
                    && (a.value == b.value
                        || (a.value.is_nan() && b.value.is_nan())
                        || (a.value - b.value).abs() <= tol)
            }
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(layer: usize, inest: usize, r: usize, c: usize, value: f64) -> FieldRow {
        FieldRow {
            layer,
            inest,
            row: r,
            col: c,
            x: c as f64 + 0.5,
            y: 1.5 - r as f64,
            value,
        }
    }

    fn two_layers() -> FieldTable {
        let mut rows = Vec::new();
        for layer in 0..2 {
            for r in 0..2 {
                for c in 0..2 {
                    rows.push(row(layer, 0, r, c, (layer * 10 + r * 2 + c) as f64));
                }
            }
        }
        FieldTable::from_rows(rows).unwrap()
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let err = FieldTable::from_rows(vec![row(0, 0, 0, 0, 1.0), row(0, 0, 0, 0, 2.0)])
            .unwrap_err();
        assert!(matches!(err, FieldError::Shape { .. }));
    }

    #[test]
    fn select_filters_layer_and_values() {
        let t = two_layers();
        let sel = Selection::all().layer(1).masked(&[10.0]);
        assert_eq!(t.select_idx(&sel), vec![5, 6, 7]);
        let mask = t.select_mask(&sel);
        assert_eq!(mask.len(), t.len());
        assert_eq!(mask.iter().filter(|m| **m).count(), 3);
        let sub = t.select(&sel);
        assert_eq!(sub.values(), &[11.0, 12.0, 13.0]);
        assert!(!sub.shares_geometry(&t));
    }

    #[test]
    fn dense_projection_is_key_addressed() {
        let rows = vec![
            row(0, 0, 1, 1, 4.0),
            row(0, 0, 0, 0, 1.0),
            row(0, 0, 1, 0, 3.0),
            row(0, 0, 0, 1, 2.0),
        ];
        let t = FieldTable::from_rows(rows).unwrap();
        let a = t.as_dense(0, 0).unwrap();
        assert_eq!(a, ndarray::array![[1.0, 2.0], [3.0, 4.0]]);
    }

    #[test]
    fn dense_projection_rejects_holes() {
        let t = FieldTable::from_rows(vec![
            row(0, 1, 0, 0, 1.0),
            row(0, 1, 1, 1, 4.0),
            row(0, 1, 0, 1, 2.0),
        ])
        .unwrap();
        let err = t.as_dense(0, 1).unwrap_err();
        assert!(matches!(err, FieldError::Shape { layer: 0, inest: 1, .. }));
        assert!(t.as_dense(3, 0).is_err());
    }

    #[test]
    fn as_arrays_orders_layer_then_nest() {
        let t = two_layers();
        let arrays = t.as_arrays(&Selection::all()).unwrap();
        assert_eq!(arrays.len(), 2);
        assert_eq!(arrays[1][[0, 0]], 10.0);
    }

    #[test]
    fn with_values_shares_geometry() {
        let t = two_layers();
        let u = t.with_values(vec![0.0; t.len()]).unwrap();
        assert!(u.shares_geometry(&t));
        assert!(t.with_values(vec![0.0; 3]).is_err());
    }

    #[test]
    fn approx_eq_ignores_row_order() {
        let t = two_layers();
        let mut rows: Vec<FieldRow> = t.rows().collect();
        rows.reverse();
        let r = FieldTable::from_rows(rows).unwrap();
        assert!(t.approx_eq(&r, 1e-9));
        assert!(!t.keys_aligned(&r));
        assert_eq!(t.groups(), vec![(0, 0), (0, 1)]);
    }
}
