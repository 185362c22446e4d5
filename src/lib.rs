//! Gridded field engine: flat cell tables over multi-layer, nested regular
//! grids, with masking against an active-cell reference, grid conversion,
//! point sampling, zonal statistics and timestep series extraction.

pub mod config;
pub mod convert;
pub mod domain;
pub mod error;
pub mod field;
pub mod grid;
pub mod io;
pub mod sample;
pub mod series;
pub mod state;
pub mod table;
pub mod zonal;

pub use config::{DEFAULT_MASKED_VALUES, FieldConfig, IndexKind};
pub use domain::{DomainRef, get_masked};
pub use error::{FieldError, FieldResult};
pub use field::{Field, FieldBuilder, FieldSource, ZoneUpdate};
pub use grid::GridDescriptor;
pub use io::csv::CsvStream;
pub use io::results::{SeriesKey, TimeSeries};
pub use sample::{CellIndex, Footprints, QueryPoints, SpatialIndex};
pub use series::FieldSeries;
pub use table::{CellCoord, FieldRow, FieldTable, Selection};
pub use zonal::{Polygon, Stat, Transform, ZonalStats};
