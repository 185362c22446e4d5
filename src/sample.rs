use crate::config::is_masked;
use crate::error::{FieldError, FieldResult};
use crate::grid::{GridDescriptor, paired_spacing};
use crate::table::{CellKey, FieldTable};
use std::collections::{BTreeMap, HashMap};

/// A candidate returned by a spatial index query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexHit {
    pub row: usize,
    pub layer: usize,
    pub inest: usize,
    /// Value carried by the indexed table at build time.
    pub value: f64,
}

/// Point lookup over cell footprints.
pub trait SpatialIndex {
    /// Every cell whose closed footprint contains `(x, y)`, in row order.
    fn intersection(&self, x: f64, y: f64) -> Vec<IndexHit>;
}

#[derive(Debug, Clone)]
struct Entry {
    bounds: [f64; 4],
    hit: IndexHit,
}

impl Entry {
    fn contains(&self, x: f64, y: f64) -> bool {
        let [xmin, ymin, xmax, ymax] = self.bounds;
        x >= xmin && x <= xmax && y >= ymin && y <= ymax
    }
}

/// Real cell footprints of a set of grids, keyed by cell, plus the column
/// and row boundaries of every (layer, inest) grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Footprints {
    cells: HashMap<CellKey, [f64; 4]>,
    edges: BTreeMap<(usize, usize), (Vec<f64>, Vec<f64>)>,
}

impl Footprints {
    pub fn from_grids(grids: &[GridDescriptor]) -> Self {
        let mut fp = Footprints::default();
        for g in grids {
            fp.edges
                .insert((g.layer, g.inest), (g.xvertices(), g.yvertices()));
            for row in 0..g.nrow {
                for col in 0..g.ncol {
                    let (xmin, ymin, xmax, ymax) = g.cell_bounds(row, col);
                    fp.cells
                        .insert((g.layer, g.inest, row, col), [xmin, ymin, xmax, ymax]);
                }
            }
        }
        fp
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// `[xmin, ymin, xmax, ymax]` of one cell.
    pub fn cell(&self, key: &CellKey) -> Option<[f64; 4]> {
        self.cells.get(key).copied()
    }

    /// Column boundaries west to east and row boundaries north to south.
    pub fn vertices(&self, layer: usize, inest: usize) -> Option<(&[f64], &[f64])> {
        self.edges
            .get(&(layer, inest))
            .map(|(xs, ys)| (xs.as_slice(), ys.as_slice()))
    }
}

/// Uniform bucket grid over the cell footprints of a table.
///
/// Footprints come from [`Footprints`] when the source grids are known.
/// Cells without one get a footprint rebuilt from the cell centres: the
/// spacing of each (layer, inest) group is the local gradient of its
/// distinct centres, exact only on evenly spaced grids.
#[derive(Debug, Clone)]
pub struct CellIndex {
    entries: Vec<Entry>,
    extent: [f64; 4],
    nbx: usize,
    nby: usize,
    buckets: Vec<Vec<usize>>,
}

impl CellIndex {
    pub fn build(table: &FieldTable) -> Self {
        Self::index(table, None)
    }

    pub fn with_footprints(table: &FieldTable, footprints: &Footprints) -> Self {
        Self::index(table, Some(footprints))
    }

    fn index(table: &FieldTable, footprints: Option<&Footprints>) -> Self {
        let mut axes: HashMap<(usize, usize), (Vec<f64>, Vec<f64>)> = HashMap::new();
        for c in table.geometry().iter() {
            let entry = axes.entry((c.layer, c.inest)).or_default();
            entry.0.push(c.x);
            entry.1.push(c.y);
        }
        let spacing: HashMap<(usize, usize), GroupAxes> = axes
            .into_iter()
            .map(|(key, (xs, ys))| (key, GroupAxes::new(xs, ys)))
            .collect();

        let mut entries = Vec::with_capacity(table.len());
        let mut extent = [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY];
        for (row, c) in table.geometry().iter().enumerate() {
            let bounds = footprints
                .and_then(|fp| fp.cell(&c.key()))
                .unwrap_or_else(|| {
                    let (hx, hy) = spacing[&(c.layer, c.inest)].half_sizes(c.x, c.y);
                    [c.x - hx, c.y - hy, c.x + hx, c.y + hy]
                });
            extent[0] = extent[0].min(bounds[0]);
            extent[1] = extent[1].min(bounds[1]);
            extent[2] = extent[2].max(bounds[2]);
            extent[3] = extent[3].max(bounds[3]);
            entries.push(Entry {
                bounds,
                hit: IndexHit {
                    row,
                    layer: c.layer,
                    inest: c.inest,
                    value: table.values()[row],
                },
            });
        }

        let side = ((entries.len() as f64).sqrt() / 2.0).ceil().max(1.0) as usize;
        let mut index = CellIndex {
            entries,
            extent,
            nbx: side,
            nby: side,
            buckets: vec![Vec::new(); side * side],
        };
        for i in 0..index.entries.len() {
            let [xmin, ymin, xmax, ymax] = index.entries[i].bounds;
            let (bx0, by0) = index.bucket_of(xmin, ymin);
            let (bx1, by1) = index.bucket_of(xmax, ymax);
            for by in by0..=by1 {
                for bx in bx0..=bx1 {
                    index.buckets[by * index.nbx + bx].push(i);
                }
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn bucket_of(&self, x: f64, y: f64) -> (usize, usize) {
        let [xmin, ymin, xmax, ymax] = self.extent;
        let slot = |v: f64, lo: f64, hi: f64, n: usize| {
            let width = if hi > lo { hi - lo } else { 1.0 };
            (((v - lo) / width * n as f64).floor().max(0.0) as usize).min(n - 1)
        };
        (slot(x, xmin, xmax, self.nbx), slot(y, ymin, ymax, self.nby))
    }
}

impl SpatialIndex for CellIndex {
    fn intersection(&self, x: f64, y: f64) -> Vec<IndexHit> {
        let [xmin, ymin, xmax, ymax] = self.extent;
        if self.entries.is_empty() || x < xmin || x > xmax || y < ymin || y > ymax {
            return Vec::new();
        }
        let (bx, by) = self.bucket_of(x, y);
        self.buckets[by * self.nbx + bx]
            .iter()
            .map(|&i| &self.entries[i])
            .filter(|e| e.contains(x, y))
            .map(|e| e.hit)
            .collect()
    }
}

struct GroupAxes {
    xs: Vec<f64>,
    ys: Vec<f64>,
    dx: Vec<f64>,
    dy: Vec<f64>,
}

impl GroupAxes {
    fn new(mut xs: Vec<f64>, mut ys: Vec<f64>) -> Self {
        xs.sort_by(f64::total_cmp);
        xs.dedup();
        ys.sort_by(f64::total_cmp);
        ys.dedup();
        let (dx, dy) = paired_spacing(&xs, &ys);
        GroupAxes { xs, ys, dx, dy }
    }

    fn half_sizes(&self, x: f64, y: f64) -> (f64, f64) {
        let ix = self.xs.binary_search_by(|v| v.total_cmp(&x)).unwrap_or(0);
        let iy = self.ys.binary_search_by(|v| v.total_cmp(&y)).unwrap_or(0);
        (self.dx[ix] / 2.0, self.dy[iy] / 2.0)
    }
}

/// Query points with one layer id per point.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPoints {
    x: Vec<f64>,
    y: Vec<f64>,
    layer: Vec<usize>,
}

impl QueryPoints {
    /// A single layer id is broadcast over every point. Lengths are checked
    /// before any lookup happens.
    pub fn new(x: &[f64], y: &[f64], layer: &[usize]) -> FieldResult<Self> {
        if y.len() != x.len() {
            return Err(FieldError::LengthMismatch {
                what: "y coordinates",
                expected: x.len(),
                found: y.len(),
            });
        }
        let layer = if layer.len() == 1 && x.len() > 1 {
            vec![layer[0]; x.len()]
        } else {
            layer.to_vec()
        };
        if layer.len() != x.len() {
            return Err(FieldError::LengthMismatch {
                what: "layer ids",
                expected: x.len(),
                found: layer.len(),
            });
        }
        Ok(QueryPoints {
            x: x.to_vec(),
            y: y.to_vec(),
            layer,
        })
    }

    pub fn single(x: f64, y: f64, layer: usize) -> Self {
        QueryPoints {
            x: vec![x],
            y: vec![y],
            layer: vec![layer],
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64, usize)> + '_ {
        self.x
            .iter()
            .zip(&self.y)
            .zip(&self.layer)
            .map(|((x, y), l)| (*x, *y, *l))
    }
}

/// Hits of one point that match its layer and whose payload is not masked.
pub fn point_hits<I: SpatialIndex + ?Sized>(
    index: &I,
    x: f64,
    y: f64,
    layer: usize,
    masked_values: &[f64],
) -> Vec<IndexHit> {
    index
        .intersection(x, y)
        .into_iter()
        .filter(|h| h.layer == layer && !is_masked(h.value, masked_values))
        .collect()
}

/// Row indices hit by the query points.
///
/// Multiplicity is preserved: a point on a shared cell edge, or several
/// points in one cell, give repeated or multiple entries. Compare
/// [`sample_mask`], which collapses duplicates.
pub fn sample_idx<I: SpatialIndex + ?Sized>(
    index: &I,
    points: &QueryPoints,
    masked_values: &[f64],
) -> Vec<usize> {
    points
        .iter()
        .flat_map(|(x, y, layer)| point_hits(index, x, y, layer, masked_values))
        .map(|h| h.row)
        .collect()
}

/// Boolean row mask of length `len` flagging every row hit by the points.
///
/// Duplicate hits collapse into a single `true`, so the mask never has more
/// `true` entries than [`sample_idx`] returns indices.
pub fn sample_mask<I: SpatialIndex + ?Sized>(
    index: &I,
    points: &QueryPoints,
    masked_values: &[f64],
    len: usize,
) -> Vec<bool> {
    let mut mask = vec![false; len];
    for idx in sample_idx(index, points, masked_values) {
        if let Some(m) = mask.get_mut(idx) {
            *m = true;
        }
    }
    mask
}
