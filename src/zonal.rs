use crate::error::{FieldError, FieldResult};
use crate::field::Field;
use crate::sample::QueryPoints;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Single-part polygon given by its ring of vertices. The ring may or may not
/// repeat its first vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    ring: Vec<(f64, f64)>,
}

impl Polygon {
    pub fn new(ring: Vec<(f64, f64)>) -> Self {
        Polygon { ring }
    }

    pub fn ring(&self) -> &[(f64, f64)] {
        &self.ring
    }

    /// Even-odd rule. Rings with fewer than three vertices have no interior.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let n = self.ring.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = self.ring[i];
            let (xj, yj) = self.ring[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Mean,
    Min,
    Max,
    Median,
    Count,
    Sum,
    Std,
    Var,
    First,
    Last,
}

impl Stat {
    pub fn name(&self) -> &'static str {
        match self {
            Stat::Mean => "mean",
            Stat::Min => "min",
            Stat::Max => "max",
            Stat::Median => "median",
            Stat::Count => "count",
            Stat::Sum => "sum",
            Stat::Std => "std",
            Stat::Var => "var",
            Stat::First => "first",
            Stat::Last => "last",
        }
    }

    /// Aggregates `values`, NaN already removed. Empty input gives NaN for
    /// everything but `count`.
    pub fn apply(&self, values: &[f64]) -> f64 {
        let n = values.len();
        if *self == Stat::Count {
            return n as f64;
        }
        if n == 0 {
            return f64::NAN;
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        match self {
            Stat::Mean => mean,
            Stat::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Stat::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Stat::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                if n % 2 == 1 {
                    sorted[n / 2]
                } else {
                    (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
                }
            }
            Stat::Sum => values.iter().sum(),
            Stat::Var | Stat::Std => {
                if n < 2 {
                    return f64::NAN;
                }
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
                if *self == Stat::Std { var.sqrt() } else { var }
            }
            Stat::First => values[0],
            Stat::Last => values[n - 1],
            Stat::Count => n as f64,
        }
    }
}

impl FromStr for Stat {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Stat::Mean),
            "min" => Ok(Stat::Min),
            "max" => Ok(Stat::Max),
            "median" => Ok(Stat::Median),
            "count" => Ok(Stat::Count),
            "sum" => Ok(Stat::Sum),
            "std" => Ok(Stat::Std),
            "var" => Ok(Stat::Var),
            "first" => Ok(Stat::First),
            "last" => Ok(Stat::Last),
            other => Err(FieldError::config(format!("unknown statistic `{other}`"))),
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Numeric transform applied to values before aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    None,
    Log10,
    Ln,
    Exp,
    Pow10,
    Sqrt,
}

impl Transform {
    pub fn apply(&self, v: f64) -> f64 {
        match self {
            Transform::None => v,
            Transform::Log10 => v.log10(),
            Transform::Ln => v.ln(),
            Transform::Exp => v.exp(),
            Transform::Pow10 => 10f64.powf(v),
            Transform::Sqrt => v.sqrt(),
        }
    }
}

impl FromStr for Transform {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Transform::None),
            "log10" => Ok(Transform::Log10),
            "ln" | "log" => Ok(Transform::Ln),
            "exp" => Ok(Transform::Exp),
            "pow10" | "10**" => Ok(Transform::Pow10),
            "sqrt" => Ok(Transform::Sqrt),
            other => Err(FieldError::config(format!("unknown transform `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZonalRow {
    pub zone: String,
    pub layer: usize,
    /// One value per statistic, in the order of [`ZonalStats::stats`].
    pub values: Vec<f64>,
}

/// Zonal statistics indexed by (zone, layer).
#[derive(Debug, Clone, PartialEq)]
pub struct ZonalStats {
    pub stats: Vec<Stat>,
    pub rows: Vec<ZonalRow>,
}

impl ZonalStats {
    pub fn get(&self, zone: &str, layer: usize, stat: Stat) -> Option<f64> {
        let col = self.stats.iter().position(|s| *s == stat)?;
        self.rows
            .iter()
            .find(|r| r.zone == zone && r.layer == layer)
            .map(|r| r.values[col])
    }
}

/// Aggregates field values over the grid vertices falling inside each
/// polygon, per requested layer.
///
/// Statistic and transform names are validated before any zone is processed.
pub fn zonal_stats(
    field: &Field,
    stats: &[&str],
    polygons: &[Polygon],
    layers: Option<&[usize]>,
    names: Option<&[String]>,
    transform: &str,
) -> FieldResult<ZonalStats> {
    let stats = stats
        .iter()
        .map(|s| s.parse::<Stat>())
        .collect::<FieldResult<Vec<_>>>()?;
    let transform: Transform = transform.parse()?;

    let layers = match layers {
        Some(ls) => ls.to_vec(),
        None => field.table().layers(),
    };
    let names: Vec<String> = match names {
        Some(names) if names.len() != polygons.len() => {
            return Err(FieldError::LengthMismatch {
                what: "zone names",
                expected: polygons.len(),
                found: names.len(),
            });
        }
        Some(names) => names.to_vec(),
        None => (0..polygons.len())
            .map(|i| format!("{}_z{i}", field.name()))
            .collect(),
    };

    let (vx, vy) = field.xy_vertices()?;
    let masked_values = field.config().masked_values.clone();

    let mut rows = Vec::with_capacity(polygons.len() * layers.len());
    for (polygon, zone) in polygons.iter().zip(names) {
        let (xs, ys): (Vec<f64>, Vec<f64>) = vx
            .iter()
            .zip(&vy)
            .filter(|(x, y)| polygon.contains(**x, **y))
            .map(|(x, y)| (*x, *y))
            .unzip();

        for &layer in &layers {
            let hit_rows: BTreeSet<usize> = if xs.is_empty() {
                BTreeSet::new()
            } else {
                let points = QueryPoints::new(&xs, &ys, &vec![layer; xs.len()])?;
                field.sample_idx(&points, &masked_values).into_iter().collect()
            };
            let values: Vec<f64> = hit_rows
                .iter()
                .map(|&i| transform.apply(field.table().values()[i]))
                .filter(|v| !v.is_nan())
                .collect();
            rows.push(ZonalRow {
                zone: zone.clone(),
                layer,
                values: stats.iter().map(|s| s.apply(&values)).collect(),
            });
        }
    }

    Ok(ZonalStats { stats, rows })
}
