use anyhow::{Context, Result, bail};
use chrono::Duration;
use field_rs::io::stream::{StreamBlock, StreamReader};
use field_rs::{CsvStream, DomainRef, FieldConfig, FieldSeries, IndexKind, QueryPoints};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::Level;

mod cli;

use cli::{Command, TseriesArgs, get_args};

fn main() -> Result<()> {
    let args = get_args();

    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = match &args.config {
        Some(path) => FieldConfig::from_json_file(path)
            .with_context(|| format!("Failed to read settings: {:?}", path))?,
        None => FieldConfig::default(),
    };
    let config = Arc::new(config);

    match args.command {
        Command::Fields { stream } => list_fields(&stream),
        Command::Tseries(t) => extract_tseries(t, config),
    }
}

fn list_fields(stream: &Path) -> Result<()> {
    let blocks = CsvStream
        .index(stream)
        .with_context(|| format!("Failed to index stream: {:?}", stream))?;

    println!("Stream {:?}: {} blocks", stream, blocks.len());
    for (field, isteps) in steps_by_field(&blocks) {
        let first = isteps.first().copied().unwrap_or_default();
        let last = isteps.last().copied().unwrap_or_default();
        println!(
            "  {:<12} {} timesteps ({} to {})",
            field,
            isteps.len(),
            first,
            last
        );
    }
    Ok(())
}

/// Distinct isteps per field, whatever order the blocks come in.
fn steps_by_field(blocks: &[StreamBlock]) -> BTreeMap<&str, BTreeSet<usize>> {
    let mut steps: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
    for b in blocks {
        steps.entry(b.field.as_str()).or_default().insert(b.istep);
    }
    steps
}

fn load_domain(path: &Path, config: &FieldConfig) -> Result<DomainRef> {
    let grids: Vec<_> = CsvStream
        .read_grids(path, None)
        .with_context(|| format!("Failed to read domain stream: {:?}", path))?
        .into_iter()
        .filter(|g| config.is_reference(&g.field))
        .collect();
    if grids.is_empty() {
        bail!(
            "No `{}` grid found in domain stream {:?}",
            config.reference_field,
            path
        );
    }
    Ok(DomainRef::from_grids(&grids, config)?)
}

fn extract_tseries(args: TseriesArgs, config: Arc<FieldConfig>) -> Result<()> {
    println!("Loading domain reference...");
    let domain = Arc::new(load_domain(&args.domain, &config)?);
    println!(
        "  {} cells, {} active, {} layers",
        domain.data().len(),
        domain.active_count(),
        domain.layer_count()
    );

    let mut series = FieldSeries::open(CsvStream, &args.stream, domain, Arc::clone(&config))
        .with_context(|| format!("Failed to open stream: {:?}", args.stream))?;
    if let Some(start) = args.start_date {
        let step = Duration::try_seconds(args.step_seconds)
            .context("--step-seconds is out of range")?;
        series.set_regular_dates(start, step)?;
    }

    let kind = IndexKind::from(args.index);
    if kind != IndexKind::Istep && args.start_date.is_none() {
        bail!("--start-date is required for a date index");
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} timesteps ({eta})")?
            .progress_chars("#>-"),
    );

    println!("\nLoading field {}...", args.field);
    let loaded = series.load_field(&args.field, args.istep.as_deref(), &pb)?;
    if loaded.is_empty() {
        bail!("No requested timestep of `{}` found in stream", args.field);
    }

    let points = QueryPoints::new(&args.x, &args.y, &args.layer)?;
    let ts = series.get_tseries(
        &args.field,
        &points,
        args.names.as_deref(),
        kind,
        &config.series_masked_values,
        args.base,
    )?;

    ts.write_csv(&args.output)
        .with_context(|| format!("Failed to write {:?}", args.output))?;
    println!(
        "\nExtracted {} timesteps at {} points. Output saved to {:?}",
        ts.len(),
        ts.columns.len(),
        args.output
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(field: &str, istep: usize, layer: usize) -> StreamBlock {
        StreamBlock {
            field: field.to_string(),
            istep,
            layer,
            inest: 0,
            start: 0,
            end: 0,
        }
    }

    #[test]
    fn interleaved_blocks_count_each_istep_once() {
        let blocks = [
            block("HEAD", 1, 0),
            block("CHARGE", 1, 0),
            block("HEAD", 1, 1),
            block("CHARGE", 2, 0),
            block("HEAD", 2, 0),
            block("CHARGE", 1, 1),
        ];
        let steps = steps_by_field(&blocks);
        assert_eq!(steps["CHARGE"].iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(steps["HEAD"].len(), 2);
    }
}
