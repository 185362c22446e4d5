use crate::config::{FieldConfig, is_masked};
use crate::convert::grids_to_table;
use crate::error::FieldResult;
use crate::grid::GridDescriptor;
use crate::sample::{CellIndex, Footprints};
use crate::table::{FieldTable, Selection};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Active-cell reference: a table whose sentinel values mark cells outside
/// the computational domain. Owns the spatial index cache for its geometry.
#[derive(Debug)]
pub struct DomainRef {
    table: FieldTable,
    masked_values: Vec<f64>,
    footprints: Option<Footprints>,
    index: OnceLock<CellIndex>,
}

impl DomainRef {
    /// Reference over a bare table. Cell footprints are rebuilt from the
    /// centres, so only evenly spaced grids are indexed exactly.
    pub fn new(table: FieldTable, config: &FieldConfig) -> Self {
        DomainRef {
            table,
            masked_values: config.masked_values.clone(),
            footprints: None,
            index: OnceLock::new(),
        }
    }

    /// Reference over the grids of the reference field, keeping their real
    /// cell footprints for the spatial index.
    pub fn from_grids(grids: &[GridDescriptor], config: &FieldConfig) -> FieldResult<Self> {
        Ok(DomainRef {
            table: grids_to_table(grids)?,
            masked_values: config.masked_values.clone(),
            footprints: Some(Footprints::from_grids(grids)),
            index: OnceLock::new(),
        })
    }

    pub fn footprints(&self) -> Option<&Footprints> {
        self.footprints.as_ref()
    }

    pub fn data(&self) -> &FieldTable {
        &self.table
    }

    pub fn masked_values(&self) -> &[f64] {
        &self.masked_values
    }

    pub fn get_data(&self, sel: &Selection) -> FieldTable {
        self.table.select(sel)
    }

    /// Rows of the selection whose reference value is not a sentinel.
    pub fn active_mask(&self, sel: &Selection) -> Vec<bool> {
        let sel = sel.clone().masked(&self.masked_values);
        self.table.select_mask(&sel)
    }

    pub fn active_count(&self) -> usize {
        self.active_mask(&Selection::all())
            .iter()
            .filter(|m| **m)
            .count()
    }

    pub fn is_active(&self, idx: usize) -> bool {
        !is_masked(self.table.values()[idx], &self.masked_values)
    }

    pub fn layer_count(&self) -> usize {
        self.table.layers().len()
    }

    pub fn has_nests(&self) -> bool {
        self.table.geometry().iter().any(|c| c.inest != 0)
    }

    /// Spatial index over the reference geometry, built on first use.
    pub fn spatial_index(&self) -> &CellIndex {
        self.index.get_or_init(|| {
            debug!(cells = self.table.len(), "building spatial index");
            match &self.footprints {
                Some(fp) => CellIndex::with_footprints(&self.table, fp),
                None => CellIndex::build(&self.table),
            }
        })
    }

    /// Swaps the reference table; the cached index and the grid footprints
    /// are dropped when the geometry changes.
    pub fn replace_table(&mut self, table: FieldTable) {
        if !table.same_geometry(&self.table) {
            self.index = OnceLock::new();
            self.footprints = None;
        }
        self.table = table;
    }
}

/// Masks `input` against the domain reference.
///
/// The output shares the reference geometry. Active reference rows take the
/// input value of the same cell; other rows keep the reference sentinel.
pub fn get_masked(input: &FieldTable, domain: &DomainRef) -> FieldResult<FieldTable> {
    let active = domain.active_mask(&Selection::all());
    let (values, missing) = overlay_values(domain.data(), input, Some(&active));
    if missing > 0 {
        warn!(missing, "cells absent from source kept their reference value");
    }
    domain.data().with_values(values)
}

/// Reference values overwritten, cell by cell, with the values of `source`.
///
/// Only rows flagged in `only` are overwritten when it is given. Cells absent
/// from `source` keep the reference value; their count is returned alongside.
pub(crate) fn overlay_values(
    reference: &FieldTable,
    source: &FieldTable,
    only: Option<&[bool]>,
) -> (Vec<f64>, usize) {
    let mut values = reference.values().to_vec();
    let wanted = |i: usize| only.is_none_or(|m| m[i]);

    if reference.keys_aligned(source) {
        for (i, v) in values.iter_mut().enumerate() {
            if wanted(i) {
                *v = source.values()[i];
            }
        }
        return (values, 0);
    }

    let index = source.key_index();
    let mut missing = 0usize;
    for (i, v) in values.iter_mut().enumerate() {
        if !wanted(i) {
            continue;
        }
        match index.get(&reference.coord(i).key()) {
            Some(&j) => *v = source.values()[j],
            None => missing += 1,
        }
    }
    (values, missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SpatialIndex;
    use crate::table::FieldRow;

    fn table(values: &[f64]) -> FieldTable {
        let rows = values
            .iter()
            .enumerate()
            .map(|(i, &value)| FieldRow {
                layer: 0,
                inest: 0,
                row: i / 2,
                col: i % 2,
                x: (i % 2) as f64 + 0.5,
                y: 1.5 - (i / 2) as f64,
                value,
            })
            .collect();
        FieldTable::from_rows(rows).unwrap()
    }

    #[test]
    fn masking_keeps_reference_sentinels() {
        let domain = DomainRef::new(table(&[1.0, 0.0, 9999.0, 1.0]), &FieldConfig::default());
        let masked = get_masked(&table(&[5.0, 6.0, 7.0, 8.0]), &domain).unwrap();
        assert_eq!(masked.values(), &[5.0, 0.0, 9999.0, 8.0]);
        assert!(masked.shares_geometry(domain.data()));
        assert_eq!(domain.active_count(), 2);
    }

    #[test]
    fn masking_is_idempotent() {
        let domain = DomainRef::new(table(&[1.0, -9999.0, 1.0, 1.0]), &FieldConfig::default());
        let once = get_masked(&table(&[2.0, 3.0, 4.0, 5.0]), &domain).unwrap();
        let twice = get_masked(&once, &domain).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn masking_aligns_by_cell_key() {
        let domain = DomainRef::new(table(&[1.0, 1.0, 1.0, 0.0]), &FieldConfig::default());
        let mut rows: Vec<FieldRow> = table(&[5.0, 6.0, 7.0, 8.0]).rows().collect();
        rows.reverse();
        let shuffled = FieldTable::from_rows(rows).unwrap();
        let masked = get_masked(&shuffled, &domain).unwrap();
        assert_eq!(masked.values(), &[5.0, 6.0, 7.0, 0.0]);
    }

    #[test]
    fn grid_domains_index_real_footprints() {
        let grid = crate::grid::GridDescriptor::new(
            "imask",
            0,
            0,
            0.0,
            0.0,
            vec![1.0, 3.0],
            vec![1.0],
            ndarray::array![[1.0, 1.0]],
        )
        .unwrap();
        let domain = DomainRef::from_grids(&[grid], &FieldConfig::default()).unwrap();
        let hits = domain.spatial_index().intersection(3.8, 0.5);
        assert_eq!(hits.iter().map(|h| h.row).collect::<Vec<_>>(), vec![1]);
        assert!(domain.spatial_index().intersection(-0.3, 0.5).is_empty());
    }

    #[test]
    fn missing_cells_are_counted() {
        let reference = table(&[1.0, 1.0, 1.0, 1.0]);
        let rows: Vec<FieldRow> = table(&[5.0, 6.0, 7.0, 8.0])
            .rows()
            .map(|r| FieldRow { layer: 1, ..r })
            .collect();
        let shifted = FieldTable::from_rows(rows).unwrap();
        let (values, missing) = overlay_values(&reference, &shifted, None);
        assert_eq!(missing, 4);
        assert_eq!(values, vec![1.0; 4]);
    }

    #[test]
    fn replacing_geometry_drops_index() {
        let mut domain = DomainRef::new(table(&[1.0; 4]), &FieldConfig::default());
        assert_eq!(domain.spatial_index().len(), 4);
        domain.replace_table(table(&[1.0; 2]));
        assert_eq!(domain.spatial_index().len(), 2);
    }
}
