use crate::domain::DomainRef;
use crate::error::{FieldError, FieldResult};
use crate::grid::GridDescriptor;
use crate::table::{FieldRow, FieldTable, Selection};
use ndarray::{ArrayD, Axis, Ix3};

/// One grid descriptor per present (inest, layer) pair of the selection,
/// nest ascending then layer ascending.
pub fn table_to_grids(
    table: &FieldTable,
    field: &str,
    sel: &Selection,
) -> FieldResult<Vec<GridDescriptor>> {
    table
        .groups()
        .into_iter()
        .filter(|(inest, layer)| {
            sel.layers.as_ref().is_none_or(|ls| ls.contains(layer))
                && sel.nests.as_ref().is_none_or(|ns| ns.contains(inest))
        })
        .map(|(inest, layer)| grid_from_table(table, field, layer, inest))
        .collect()
}

/// Rebuilds the grid of one (layer, inest) group from its table rows.
pub fn grid_from_table(
    table: &FieldTable,
    field: &str,
    layer: usize,
    inest: usize,
) -> FieldResult<GridDescriptor> {
    let array = table.as_dense(layer, inest)?;

    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for c in table.geometry().iter() {
        if c.layer == layer && c.inest == inest {
            xs.push(c.x);
            ys.push(c.y);
        }
    }
    let xcc = distinct_sorted(xs);
    let mut ycc = distinct_sorted(ys);
    ycc.reverse();

    GridDescriptor::from_centers(field, layer, inest, xcc, ycc, array)
}

/// Concatenates grids into a table in canonical (nest, layer, row, col)
/// order, whatever the order they are supplied in.
pub fn grids_to_table(grids: &[GridDescriptor]) -> FieldResult<FieldTable> {
    let mut ordered: Vec<&GridDescriptor> = grids.iter().collect();
    ordered.sort_by_key(|g| (g.inest, g.layer));

    let total = ordered.iter().map(|g| g.nrow * g.ncol).sum();
    let mut rows: Vec<FieldRow> = Vec::with_capacity(total);
    for g in ordered {
        rows.extend(g.to_rows());
    }
    FieldTable::from_rows(rows)
}

/// Writes a dense (layer, row, col) array over the reference geometry.
///
/// Only base grids are addressable this way: the reference must carry no
/// nested cell, and every layer slice must match its grid shape.
pub fn array3d_to_table(array: &ArrayD<f64>, domain: &DomainRef) -> FieldResult<FieldTable> {
    if array.ndim() != 3 {
        return Err(FieldError::dimension(format!(
            "array must be 3D, got shape {:?}",
            array.shape()
        )));
    }
    if domain.has_nests() {
        return Err(FieldError::dimension(
            "3D arrays cannot address nested grids",
        ));
    }
    let array = array
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|e| FieldError::dimension(e.to_string()))?;

    let reference = domain.data();
    let layers = reference.layers();
    if array.len_of(Axis(0)) != layers.len() {
        return Err(FieldError::dimension(format!(
            "array has {} layers, reference has {}",
            array.len_of(Axis(0)),
            layers.len()
        )));
    }
    for (slot, &layer) in layers.iter().enumerate() {
        let (nrow, ncol) = layer_shape(reference, layer);
        let got = array.index_axis(Axis(0), slot).dim();
        if got != (nrow, ncol) {
            return Err(FieldError::dimension(format!(
                "layer {layer} slice has shape {got:?}, grid is ({nrow}, {ncol})"
            )));
        }
    }

    let mut values = reference.values().to_vec();
    for (i, c) in reference.geometry().iter().enumerate() {
        let slot = layers.binary_search(&c.layer).unwrap_or_default();
        values[i] = array[[slot, c.row, c.col]];
    }
    reference.with_values(values)
}

fn layer_shape(table: &FieldTable, layer: usize) -> (usize, usize) {
    let (mut nrow, mut ncol) = (0, 0);
    for c in table.geometry().iter().filter(|c| c.layer == layer) {
        nrow = nrow.max(c.row + 1);
        ncol = ncol.max(c.col + 1);
    }
    (nrow, ncol)
}

fn distinct_sorted(mut v: Vec<f64>) -> Vec<f64> {
    v.sort_by(f64::total_cmp);
    v.dedup();
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;
    use ndarray::{Array2, array};

    fn nested_grids() -> Vec<GridDescriptor> {
        vec![
            GridDescriptor::uniform("h", 1, 0, 0.0, 0.0, 2.0, array![[5.0, 6.0], [7.0, 8.0]])
                .unwrap(),
            GridDescriptor::uniform("h", 0, 1, 0.0, 2.0, 1.0, array![[9.0, 9.5], [9.7, 9.9]])
                .unwrap(),
            GridDescriptor::uniform("h", 0, 0, 0.0, 0.0, 2.0, array![[1.0, 2.0], [3.0, 4.0]])
                .unwrap(),
        ]
    }

    #[test]
    fn grids_come_back_nest_then_layer() {
        let table = grids_to_table(&nested_grids()).unwrap();
        assert_eq!(table.len(), 12);
        let grids = table_to_grids(&table, "h", &Selection::all()).unwrap();
        let order: Vec<_> = grids.iter().map(|g| (g.inest, g.layer)).collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0)]);
        let nest = &grids[2];
        assert_eq!((nest.xl, nest.yl), (0.0, 2.0));
        assert_eq!(nest.dx, vec![1.0, 1.0]);
        assert_eq!(nest.array, array![[9.0, 9.5], [9.7, 9.9]]);
    }

    #[test]
    fn grid_order_does_not_change_the_table() {
        let mut grids = nested_grids();
        let a = grids_to_table(&grids).unwrap();
        grids.reverse();
        let b = grids_to_table(&grids).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn selection_restricts_grids() {
        let table = grids_to_table(&nested_grids()).unwrap();
        let grids = table_to_grids(&table, "h", &Selection::all().inest(0)).unwrap();
        assert_eq!(grids.len(), 2);
        let grids = table_to_grids(&table, "h", &Selection::all().layer(1)).unwrap();
        assert_eq!(grids.len(), 1);
    }

    #[test]
    fn array3d_overwrites_reference_values() {
        let mut grids = nested_grids();
        grids.truncate(1);
        grids.push(
            GridDescriptor::uniform("h", 0, 0, 0.0, 0.0, 2.0, array![[1.0, 0.0], [1.0, 1.0]])
                .unwrap(),
        );
        let domain = DomainRef::new(grids_to_table(&grids).unwrap(), &FieldConfig::default());
        let arr = ndarray::Array3::from_shape_fn((2, 2, 2), |(l, r, c)| (l * 4 + r * 2 + c) as f64)
            .into_dyn();
        let table = array3d_to_table(&arr, &domain).unwrap();
        assert!(table.shares_geometry(domain.data()));
        assert_eq!(table.as_dense(1, 0).unwrap()[[1, 1]], 7.0);
    }

    #[test]
    fn array3d_rejects_wrong_rank_and_nests() {
        let domain = DomainRef::new(
            grids_to_table(&nested_grids()[2..]).unwrap(),
            &FieldConfig::default(),
        );
        let flat = Array2::<f64>::zeros((2, 2)).into_dyn();
        assert!(matches!(
            array3d_to_table(&flat, &domain),
            Err(FieldError::Dimension { .. })
        ));

        let nested = DomainRef::new(
            grids_to_table(&nested_grids()).unwrap(),
            &FieldConfig::default(),
        );
        let arr = ndarray::Array3::<f64>::zeros((2, 2, 2)).into_dyn();
        assert!(matches!(
            array3d_to_table(&arr, &nested),
            Err(FieldError::Dimension { .. })
        ));
    }

    #[test]
    fn array3d_rejects_mismatched_slices() {
        let domain = DomainRef::new(
            grids_to_table(&nested_grids()[2..]).unwrap(),
            &FieldConfig::default(),
        );
        let arr = ndarray::Array3::<f64>::zeros((1, 3, 2)).into_dyn();
        assert!(matches!(
            array3d_to_table(&arr, &domain),
            Err(FieldError::Dimension { .. })
        ));
    }
}
