use crate::config::{FieldConfig, IndexKind, is_masked};
use crate::convert::grids_to_table;
use crate::domain::{DomainRef, overlay_values};
use crate::error::{FieldError, FieldResult};
use crate::field::{Field, FieldSource};
use crate::io::results::{SeriesKey, TimeSeries};
use crate::io::stream::{StreamBlock, StreamReader};
use crate::sample::{QueryPoints, point_hits};
use crate::state::{LoadState, SeriesSlots};
use crate::table::FieldTable;
use chrono::{Duration, NaiveDateTime};
use indicatif::ProgressBar;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Per-timestep snapshots of the fields of a simulation output stream.
///
/// The stream is indexed once on open. Timesteps are read into tables only
/// when a field is loaded, each one sharing the domain reference geometry.
pub struct FieldSeries<R: StreamReader> {
    reader: R,
    path: PathBuf,
    domain: Arc<DomainRef>,
    config: Arc<FieldConfig>,
    blocks: Vec<StreamBlock>,
    fields: Vec<String>,
    data: HashMap<String, SeriesSlots>,
    dates: BTreeMap<usize, NaiveDateTime>,
}

impl<R: StreamReader> FieldSeries<R> {
    pub fn open(
        reader: R,
        path: impl Into<PathBuf>,
        domain: Arc<DomainRef>,
        config: Arc<FieldConfig>,
    ) -> FieldResult<Self> {
        let path = path.into();
        let blocks = reader.index(&path)?;

        let mut fields = Vec::new();
        let mut steps: HashMap<String, BTreeSet<usize>> = HashMap::new();
        for b in &blocks {
            if !steps.contains_key(&b.field) {
                fields.push(b.field.clone());
            }
            steps.entry(b.field.clone()).or_default().insert(b.istep);
        }
        let data = steps
            .into_iter()
            .map(|(field, isteps)| (field, SeriesSlots::new(isteps)))
            .collect();

        info!(
            path = %path.display(),
            blocks = blocks.len(),
            fields = fields.len(),
            "indexed output stream"
        );
        Ok(FieldSeries {
            reader,
            path,
            domain,
            config,
            blocks,
            fields,
            data,
            dates: BTreeMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn domain(&self) -> &Arc<DomainRef> {
        &self.domain
    }

    /// Field names in order of first appearance in the stream.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn blocks(&self) -> &[StreamBlock] {
        &self.blocks
    }

    pub fn set_dates(&mut self, dates: BTreeMap<usize, NaiveDateTime>) {
        self.dates = dates;
    }

    /// Dates every indexed timestep as `start + istep * step`. Fails without
    /// touching the current dates when one of them is out of range.
    pub fn set_regular_dates(&mut self, start: NaiveDateTime, step: Duration) -> FieldResult<()> {
        self.dates = self
            .blocks
            .iter()
            .map(|b| b.istep)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|istep| {
                i32::try_from(istep)
                    .ok()
                    .and_then(|n| step.checked_mul(n))
                    .and_then(|offset| start.checked_add_signed(offset))
                    .map(|date| (istep, date))
                    .ok_or_else(|| {
                        FieldError::config(format!("date of istep {istep} is out of range"))
                    })
            })
            .collect::<FieldResult<_>>()?;
        Ok(())
    }

    pub fn dates(&self) -> &BTreeMap<usize, NaiveDateTime> {
        &self.dates
    }

    /// `(exists, loaded)` for a field name.
    pub fn check_field(&self, field: &str) -> (bool, bool) {
        match self.data.get(field) {
            Some(slots) => (true, slots.loaded_count() > 0),
            None => (false, false),
        }
    }

    fn slots(&self, field: &str) -> FieldResult<&SeriesSlots> {
        self.data.get(field).ok_or_else(|| FieldError::UnknownField {
            field: field.to_string(),
        })
    }

    fn loaded_slots(&self, field: &str) -> FieldResult<&SeriesSlots> {
        let slots = self.slots(field)?;
        if slots.loaded_count() == 0 {
            return Err(FieldError::NotLoaded {
                field: field.to_string(),
            });
        }
        Ok(slots)
    }

    pub fn available_isteps(&self, field: &str) -> FieldResult<Vec<usize>> {
        Ok(self.slots(field)?.available().iter().copied().collect())
    }

    pub fn loaded_isteps(&self, field: &str) -> FieldResult<Vec<usize>> {
        Ok(self.slots(field)?.loaded().map(|(i, _)| i).collect())
    }

    pub fn state(&self, field: &str) -> FieldResult<LoadState> {
        Ok(self.slots(field)?.state())
    }

    /// Reads the requested timesteps of `field` into tables.
    ///
    /// `None` loads every timestep. Requested timesteps absent from the
    /// stream are skipped. Each timestep is stored only once fully built.
    /// Returns the timesteps loaded by this call.
    pub fn load_field(
        &mut self,
        field: &str,
        isteps: Option<&[usize]>,
        pb: &ProgressBar,
    ) -> FieldResult<Vec<usize>> {
        let available = self.slots(field)?.available().clone();
        let wanted: Vec<usize> = match isteps {
            None => available.iter().copied().collect(),
            Some(requested) => {
                let kept: BTreeSet<usize> = requested
                    .iter()
                    .copied()
                    .filter(|i| available.contains(i))
                    .collect();
                let dropped: Vec<usize> = requested
                    .iter()
                    .copied()
                    .filter(|i| !available.contains(i))
                    .collect();
                if !dropped.is_empty() {
                    debug!(field, ?dropped, "requested timesteps absent from stream");
                }
                kept.into_iter().collect()
            }
        };

        pb.set_length(wanted.len() as u64);
        pb.set_position(0);
        let mut loaded = Vec::with_capacity(wanted.len());
        for istep in wanted {
            let table = self.read_step(field, istep)?;
            if let Some(slots) = self.data.get_mut(field) {
                slots.insert(istep, table);
            }
            loaded.push(istep);
            pb.inc(1);
        }
        pb.finish();

        info!(field, loaded = loaded.len(), "loaded field timesteps");
        Ok(loaded)
    }

    // Builds the table of one timestep from its own blocks only
    fn read_step(&self, field: &str, istep: usize) -> FieldResult<FieldTable> {
        let mut grids = Vec::new();
        for b in self
            .blocks
            .iter()
            .filter(|b| b.field == field && b.istep == istep)
        {
            grids.extend(self.reader.read_grids(&self.path, Some((b.start, b.end)))?);
        }
        let snapshot = grids_to_table(&grids)?;

        let reference = self.domain.data();
        if snapshot.len() != reference.len() {
            return Err(FieldError::LengthMismatch {
                what: "timestep cells against domain reference",
                expected: reference.len(),
                found: snapshot.len(),
            });
        }
        let (values, missing) = overlay_values(reference, &snapshot, None);
        if missing > 0 {
            return Err(FieldError::LengthMismatch {
                what: "timestep cells matching domain reference keys",
                expected: reference.len(),
                found: reference.len() - missing,
            });
        }
        reference.with_values(values)
    }

    pub fn unload_field(&mut self, field: &str) -> FieldResult<()> {
        self.slots(field)?;
        if let Some(slots) = self.data.get_mut(field) {
            slots.clear();
        }
        Ok(())
    }

    pub fn table(&self, field: &str, istep: usize) -> Option<&FieldTable> {
        self.data.get(field).and_then(|s| s.get(istep))
    }

    /// Loaded timestep as a standalone field named `{field}_{istep}`, the
    /// timestep zero-padded to the width of the largest loaded one.
    pub fn snapshot(&self, field: &str, istep: usize) -> FieldResult<Field> {
        let slots = self.loaded_slots(field)?;
        let table = slots.get(istep).ok_or_else(|| FieldError::NotLoaded {
            field: format!("{field} (istep {istep})"),
        })?;
        let last = slots.loaded().map(|(i, _)| i).max().unwrap_or(istep);
        let width = last.to_string().len();
        Field::builder(format!("{field}_{istep:0width$}"))
            .domain(Arc::clone(&self.domain))
            .config(Arc::clone(&self.config))
            .use_mask(false)
            .build(FieldSource::Table(table.clone()))
    }

    // One domain row per query point: layer match and active cell first,
    // finest nest first, then lowest row
    fn resolve_rows(&self, points: &QueryPoints) -> FieldResult<Vec<usize>> {
        let index = self.domain.spatial_index();
        points
            .iter()
            .map(|(x, y, layer)| {
                let mut hits = point_hits(index, x, y, layer, self.domain.masked_values());
                if hits.is_empty() {
                    hits = point_hits(index, x, y, layer, &[]);
                }
                hits.iter()
                    .max_by_key(|h| (h.inest, Reverse(h.row)))
                    .map(|h| h.row)
                    .ok_or(FieldError::NoCell { x, y, layer })
            })
            .collect()
    }

    fn series_key(&self, kind: IndexKind, istep: usize) -> FieldResult<SeriesKey> {
        let date = || {
            self.dates
                .get(&istep)
                .copied()
                .ok_or_else(|| FieldError::config(format!("no date for istep {istep}")))
        };
        Ok(match kind {
            IndexKind::Istep => SeriesKey::Istep(istep),
            IndexKind::Date => SeriesKey::Date(date()?),
            IndexKind::Combined => SeriesKey::Combined(istep, date()?),
        })
    }

    /// Values of a loaded field at the query points, one row per loaded
    /// timestep in ascending order.
    ///
    /// Values in `masked_values` become NaN in place. Default column names
    /// are `{row}i_{col}j_{layer}k`, shifted by `base`.
    pub fn get_tseries(
        &self,
        field: &str,
        points: &QueryPoints,
        names: Option<&[String]>,
        kind: IndexKind,
        masked_values: &[f64],
        base: usize,
    ) -> FieldResult<TimeSeries> {
        let slots = self.loaded_slots(field)?;
        if let Some(names) = names {
            if names.len() != points.len() {
                return Err(FieldError::LengthMismatch {
                    what: "point names",
                    expected: points.len(),
                    found: names.len(),
                });
            }
        }
        let keys = slots
            .loaded()
            .map(|(istep, _)| self.series_key(kind, istep))
            .collect::<FieldResult<Vec<_>>>()?;
        let rows = self.resolve_rows(points)?;

        let columns = match names {
            Some(names) => names.to_vec(),
            None => rows
                .iter()
                .map(|&r| {
                    let c = self.domain.data().coord(r);
                    format!("{}i_{}j_{}k", c.row + base, c.col + base, c.layer + base)
                })
                .collect(),
        };

        let mut series = TimeSeries::new(kind, columns);
        for (key, (_, table)) in keys.into_iter().zip(slots.loaded()) {
            let values = rows
                .iter()
                .map(|&r| {
                    let v = table.values()[r];
                    if is_masked(v, masked_values) { f64::NAN } else { v }
                })
                .collect();
            series.push(key, values);
        }
        Ok(series)
    }
}
