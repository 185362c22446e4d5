use crate::config::FieldConfig;
use crate::convert::{array3d_to_table, grid_from_table, grids_to_table, table_to_grids};
use crate::domain::{DomainRef, get_masked};
use crate::error::{FieldError, FieldResult};
use crate::grid::GridDescriptor;
use crate::io::stream::StreamWriter;
use crate::sample::{self, CellIndex, Footprints, QueryPoints};
use crate::table::{FieldTable, Selection};
use crate::zonal::{self, Polygon, ZonalStats};
use ndarray::{Array2, Array3, ArrayD, Axis};
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Input accepted when building or replacing field data.
#[derive(Debug, Clone)]
pub enum FieldSource {
    Grids(Vec<GridDescriptor>),
    Array(ArrayD<f64>),
    Scalar(f64),
    Table(FieldTable),
}

impl From<Vec<GridDescriptor>> for FieldSource {
    fn from(grids: Vec<GridDescriptor>) -> Self {
        FieldSource::Grids(grids)
    }
}

impl From<Array3<f64>> for FieldSource {
    fn from(array: Array3<f64>) -> Self {
        FieldSource::Array(array.into_dyn())
    }
}

impl From<ArrayD<f64>> for FieldSource {
    fn from(array: ArrayD<f64>) -> Self {
        FieldSource::Array(array)
    }
}

impl From<f64> for FieldSource {
    fn from(value: f64) -> Self {
        FieldSource::Scalar(value)
    }
}

impl From<FieldTable> for FieldSource {
    fn from(table: FieldTable) -> Self {
        FieldSource::Table(table)
    }
}

/// Row overwrite keyed by layer and zone id, as produced by calibration
/// parameter files.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneUpdate {
    /// Every selected row gets the same value.
    Zone { layer: usize, zone: f64, value: f64 },
    /// Selected rows get one value each, in row order.
    PilotPoints {
        layer: usize,
        zone: f64,
        values: Vec<f64>,
    },
}

pub struct FieldBuilder {
    name: String,
    domain: Option<Arc<DomainRef>>,
    use_mask: bool,
    config: Arc<FieldConfig>,
    target: Selection,
}

impl FieldBuilder {
    pub fn domain(mut self, domain: Arc<DomainRef>) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn use_mask(mut self, use_mask: bool) -> Self {
        self.use_mask = use_mask;
        self
    }

    pub fn config(mut self, config: Arc<FieldConfig>) -> Self {
        self.config = config;
        self
    }

    /// Restricts a scalar source to the given layer. Other sources ignore it.
    pub fn layer(mut self, layer: usize) -> Self {
        self.target = self.target.layer(layer);
        self
    }

    /// Restricts a scalar source to the given nest. Other sources ignore it.
    pub fn inest(mut self, inest: usize) -> Self {
        self.target = self.target.inest(inest);
        self
    }

    pub fn build(self, source: impl Into<FieldSource>) -> FieldResult<Field> {
        let mut field = Field {
            name: self.name,
            table: FieldTable::from_rows(Vec::new())?,
            domain: self.domain,
            use_mask: self.use_mask,
            config: self.config,
            footprints: None,
            own_index: OnceLock::new(),
        };
        let source = source.into();
        field.footprints = grid_footprints(&source);
        field.table = field.table_from_source(source, &self.target)?;
        Ok(field)
    }
}

/// A named distributed property: a flat table, optionally bound to an
/// active-cell reference.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    table: FieldTable,
    domain: Option<Arc<DomainRef>>,
    use_mask: bool,
    config: Arc<FieldConfig>,
    footprints: Option<Arc<Footprints>>,
    own_index: OnceLock<CellIndex>,
}

fn grid_footprints(source: &FieldSource) -> Option<Arc<Footprints>> {
    match source {
        FieldSource::Grids(grids) => Some(Arc::new(Footprints::from_grids(grids))),
        _ => None,
    }
}

impl Field {
    pub fn builder(name: impl Into<String>) -> FieldBuilder {
        FieldBuilder {
            name: name.into(),
            domain: None,
            use_mask: true,
            config: Arc::new(FieldConfig::default()),
            target: Selection::all(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn table(&self) -> &FieldTable {
        &self.table
    }

    pub fn domain(&self) -> Option<&Arc<DomainRef>> {
        self.domain.as_ref()
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    /// True when the data is masked against the domain reference.
    pub fn is_domain_bound(&self) -> bool {
        self.use_mask && self.domain.is_some() && !self.config.is_reference(&self.name)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn require_domain(&self, what: &str) -> FieldResult<&Arc<DomainRef>> {
        self.domain.as_ref().ok_or_else(|| {
            FieldError::config(format!(
                "{what} source for field `{}` needs a domain reference",
                self.name
            ))
        })
    }

    fn masked(&self, table: FieldTable) -> FieldResult<FieldTable> {
        match &self.domain {
            Some(domain) if self.is_domain_bound() => get_masked(&table, domain),
            _ => Ok(table),
        }
    }

    fn table_from_source(&self, source: FieldSource, target: &Selection) -> FieldResult<FieldTable> {
        match source {
            FieldSource::Grids(grids) => self.masked(grids_to_table(&grids)?),
            FieldSource::Table(table) => self.masked(table),
            FieldSource::Array(array) => {
                let domain = self.require_domain("3D array")?;
                self.masked(array3d_to_table(&array, domain)?)
            }
            FieldSource::Scalar(value) => {
                let domain = self.require_domain("scalar")?;
                let active = domain.active_mask(target);
                let values = domain
                    .data()
                    .values()
                    .iter()
                    .zip(&active)
                    .map(|(v, a)| if *a { value } else { *v })
                    .collect();
                domain.data().with_values(values)
            }
        }
    }

    /// Replaces the whole table.
    ///
    /// A scalar goes into the existing value column of every row that is not
    /// a sentinel, keeping the geometry. Only an empty field takes the domain
    /// geometry from a scalar.
    pub fn set_data(&mut self, source: impl Into<FieldSource>) -> FieldResult<()> {
        let source = source.into();
        if let FieldSource::Scalar(value) = source {
            if !self.table.is_empty() {
                self.set_scalar(value, &Selection::all());
                return Ok(());
            }
        }
        let footprints = grid_footprints(&source);
        let table = self.table_from_source(source, &Selection::all())?;
        if footprints.is_some() || !table.same_geometry(&self.table) {
            self.footprints = footprints;
        }
        self.table = table;
        self.own_index = OnceLock::new();
        Ok(())
    }

    /// Broadcasts `value` to the selected rows whose current value is not a
    /// sentinel.
    pub fn set_scalar(&mut self, value: f64, sel: &Selection) {
        let sel = sel.clone().masked(&self.config.masked_values);
        let mask = self.table.select_mask(&sel);
        for (v, m) in self.table.values_mut().iter_mut().zip(mask) {
            if m {
                *v = value;
            }
        }
        self.own_index = OnceLock::new();
    }

    /// Overwrites the rows of `layer` whose zone id in `izone` matches.
    pub fn apply_zone_update(&mut self, update: &ZoneUpdate, izone: &Field) -> FieldResult<()> {
        if izone.len() != self.len() {
            return Err(FieldError::LengthMismatch {
                what: "zone field rows",
                expected: self.len(),
                found: izone.len(),
            });
        }
        let (layer, zone) = match update {
            ZoneUpdate::Zone { layer, zone, .. } => (*layer, *zone),
            ZoneUpdate::PilotPoints { layer, zone, .. } => (*layer, *zone),
        };
        let sel = Selection::all()
            .layer(layer)
            .masked(&self.config.masked_values);
        let rows: Vec<usize> = self
            .table
            .select_idx(&sel)
            .into_iter()
            .filter(|&i| izone.table.values()[i] == zone)
            .collect();

        match update {
            ZoneUpdate::Zone { value, .. } => {
                for &i in &rows {
                    self.table.values_mut()[i] = *value;
                }
            }
            ZoneUpdate::PilotPoints { values, .. } => {
                if values.len() != rows.len() {
                    return Err(FieldError::LengthMismatch {
                        what: "pilot point values",
                        expected: rows.len(),
                        found: values.len(),
                    });
                }
                for (&i, &v) in rows.iter().zip(values) {
                    self.table.values_mut()[i] = v;
                }
            }
        }
        self.own_index = OnceLock::new();
        Ok(())
    }

    pub fn get_data(&self, sel: &Selection) -> FieldTable {
        self.table.select(sel)
    }

    pub fn get_mask(&self, sel: &Selection) -> Vec<bool> {
        self.table.select_mask(sel)
    }

    pub fn as_arrays(&self, sel: &Selection) -> FieldResult<Vec<Array2<f64>>> {
        self.table.as_arrays(sel)
    }

    /// Base-grid values as a (layer, row, col) array.
    pub fn as_3darray(&self) -> FieldResult<Array3<f64>> {
        if self.table.geometry().iter().any(|c| c.inest != 0) {
            return Err(FieldError::dimension(format!(
                "field `{}` contains nested grids",
                self.name
            )));
        }
        let arrays = self.as_arrays(&Selection::all().inest(0))?;
        let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
        ndarray::stack(Axis(0), &views).map_err(|e| FieldError::dimension(e.to_string()))
    }

    pub fn to_grids(&self, sel: &Selection) -> FieldResult<Vec<GridDescriptor>> {
        table_to_grids(&self.table, &self.name, sel)
    }

    /// Number of base-grid layers.
    pub fn maxlayer(&self) -> usize {
        self.table.groups().iter().filter(|(n, _)| *n == 0).count()
    }

    /// Number of nested grids on the first layer, base grid excluded.
    pub fn maxnest(&self) -> usize {
        let first = self.table.layers().first().copied().unwrap_or(0);
        self.table
            .groups()
            .iter()
            .filter(|(_, l)| *l == first)
            .count()
            .saturating_sub(1)
    }

    /// Real cell footprints of the grids behind this field's geometry, when
    /// known. The domain reference's take precedence on shared geometry.
    pub fn footprints(&self) -> Option<&Footprints> {
        match &self.domain {
            Some(domain)
                if domain.footprints().is_some() && domain.data().same_geometry(&self.table) =>
            {
                domain.footprints()
            }
            _ => self.footprints.as_deref(),
        }
    }

    /// Cell vertices of every first-layer grid, each grid row by row from
    /// the north edge.
    pub fn xy_vertices(&self) -> FieldResult<(Vec<f64>, Vec<f64>)> {
        let first = self.table.layers().first().copied().unwrap_or(0);
        let footprints = self.footprints();
        let mut vx = Vec::new();
        let mut vy = Vec::new();
        for (inest, layer) in self.table.groups().into_iter().filter(|(_, l)| *l == first) {
            let (xs, ys) = match footprints.and_then(|fp| fp.vertices(layer, inest)) {
                Some((xs, ys)) => (xs.to_vec(), ys.to_vec()),
                None => {
                    let g = grid_from_table(&self.table, &self.name, layer, inest)?;
                    (g.xvertices(), g.yvertices())
                }
            };
            for y in ys {
                for x in &xs {
                    vx.push(*x);
                    vy.push(y);
                }
            }
        }
        Ok((vx, vy))
    }

    /// Spatial index over this field's geometry. A domain-bound field reuses
    /// the reference's cached index.
    pub fn spatial_index(&self) -> &CellIndex {
        match &self.domain {
            Some(domain) if domain.data().same_geometry(&self.table) => domain.spatial_index(),
            _ => self.own_index.get_or_init(|| match &self.footprints {
                Some(fp) => CellIndex::with_footprints(&self.table, fp),
                None => CellIndex::build(&self.table),
            }),
        }
    }

    /// Rows under the query points, each row at most once.
    pub fn sample(&self, points: &QueryPoints, masked_values: &[f64]) -> FieldTable {
        self.table.subset(&self.sample_mask(points, masked_values))
    }

    /// Row index per index hit; duplicates are kept.
    pub fn sample_idx(&self, points: &QueryPoints, masked_values: &[f64]) -> Vec<usize> {
        sample::sample_idx(self.spatial_index(), points, masked_values)
    }

    /// Boolean row mask; duplicate hits collapse.
    pub fn sample_mask(&self, points: &QueryPoints, masked_values: &[f64]) -> Vec<bool> {
        sample::sample_mask(self.spatial_index(), points, masked_values, self.len())
    }

    pub fn zonal_stats(
        &self,
        stats: &[&str],
        polygons: &[Polygon],
        layers: Option<&[usize]>,
        names: Option<&[String]>,
        transform: &str,
    ) -> FieldResult<ZonalStats> {
        zonal::zonal_stats(self, stats, polygons, layers, names, transform)
    }

    /// Writes every grid of the field as timestep 0 of a stream file.
    pub fn write_data<W: StreamWriter>(&self, writer: &W, path: &Path) -> FieldResult<()> {
        let grids = self.to_grids(&Selection::all())?;
        writer.write_steps(path, &[(0, grids)])
    }
}
