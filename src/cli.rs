use chrono::NaiveDateTime;
use clap::{Parser, Subcommand, ValueEnum};
use field_rs::IndexKind;
use std::path::PathBuf;

/// Inspect simulation field streams and extract point time series
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// JSON settings file (masked values, reference field name)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the fields and timesteps of a stream
    Fields {
        /// Field stream file
        stream: PathBuf,
    },
    /// Extract the values of a field at points, one row per timestep
    Tseries(TseriesArgs),
}

#[derive(clap::Args, Debug)]
pub struct TseriesArgs {
    /// Field stream file
    pub stream: PathBuf,

    /// Stream holding the active-cell reference field
    #[arg(short, long)]
    pub domain: PathBuf,

    /// Field to extract
    #[arg(short, long)]
    pub field: String,

    /// Point x coordinates
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub x: Vec<f64>,

    /// Point y coordinates
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub y: Vec<f64>,

    /// Point layers, a single value applies to every point
    #[arg(short, long, value_delimiter = ',', default_value = "0")]
    pub layer: Vec<usize>,

    /// Column names, one per point
    #[arg(short, long, value_delimiter = ',')]
    pub names: Option<Vec<String>>,

    /// Timesteps to load, all of them when omitted
    #[arg(short, long, value_delimiter = ',')]
    pub istep: Option<Vec<usize>>,

    /// Date of timestep 0, as "YYYY-MM-DD HH:MM:SS"
    #[arg(long, value_parser = parse_date)]
    pub start_date: Option<NaiveDateTime>,

    /// Seconds between consecutive timesteps
    #[arg(long, default_value_t = 86400)]
    pub step_seconds: i64,

    /// Row index of the output table
    #[arg(long, value_enum, default_value_t = IndexArg::Istep)]
    pub index: IndexArg,

    /// Shift applied to row, column and layer in default column names
    #[arg(long, default_value_t = 1)]
    pub base: usize,

    /// Output CSV file
    #[arg(short, long, default_value = "tseries.csv")]
    pub output: PathBuf,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum IndexArg {
    Istep,
    Date,
    Combined,
}

impl From<IndexArg> for IndexKind {
    fn from(arg: IndexArg) -> Self {
        match arg {
            IndexArg::Istep => IndexKind::Istep,
            IndexArg::Date => IndexKind::Date,
            IndexArg::Combined => IndexKind::Combined,
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
}

pub fn get_args() -> Args {
    Args::parse()
}
