//! Command-line front end: analyze measurement records against the GLI
//! reference tables and print the result as JSON.
//!
//! ```bash
//! RUST_LOG=info gli-reference --tables ./tables record.json
//! gli-reference --panel diffusion record.json
//! gli-reference --report record.json
//! gli-reference --compare 2023-01-10_visit.json 2024-01-12_visit.json
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use gli_reference::analysis::trend::record_label;
use gli_reference::{
    compare_reports, MeasurementRecord, Panel, PanelAnalyzer, ReferenceConfig, ReferenceStore,
};
use log::{error, info};
use serde_json::Value as JsonValue;

#[derive(Parser)]
#[command(
    name = "gli-reference",
    about = "GLI reference values and z-scores for pulmonary function tests",
    long_about = "Reads measurement records (flat JSON objects) and prints predicted values, \
                  z-scores and severity labels for the spirometry, diffusion and lung-volume panels. \
                  With several records the results are printed as an array, or lined up over \
                  time with --compare"
)]
struct Args {
    /// Directory holding lookuptables*, lookuptablesdlco* and lookuptablesvol*
    /// (.parquet, .csv or .json). Defaults to GLI_TABLES_DIR or the current directory.
    #[arg(long)]
    tables: Option<PathBuf>,

    /// Analyze a single panel (spirometry, diffusion, volumes)
    #[arg(long)]
    panel: Option<Panel>,

    /// Print the combined diagnostic report instead of the panel results
    #[arg(long, conflicts_with = "panel")]
    report: bool,

    /// Compare FEV1, FVC, DLCO and TLC z-scores across two or more records,
    /// in the order given. Labels come from the file names (text before the
    /// first '_').
    #[arg(long, conflicts_with_all = ["panel", "report"])]
    compare: bool,

    /// Load every reference table before analyzing; fail fast if one is broken
    #[arg(long)]
    preload: bool,

    /// Measurement records (JSON)
    #[arg(required = true, num_args = 1..)]
    records: Vec<PathBuf>,
}

fn read_record(path: &Path) -> Result<MeasurementRecord> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn run(args: &Args) -> Result<String> {
    let config = match &args.tables {
        Some(dir) => ReferenceConfig::from_dir(dir),
        None => ReferenceConfig::from_env(),
    };
    let store = ReferenceStore::from_config(config);
    if args.preload {
        store.preload().context("preloading reference tables")?;
    }

    let analyzer = PanelAnalyzer::new(store);

    if args.compare {
        let mut reports = Vec::with_capacity(args.records.len());
        for path in &args.records {
            let record = read_record(path)?;
            reports.push((record_label(path), analyzer.report(&record)));
        }
        info!("Comparing {} records", reports.len());
        return Ok(serde_json::to_string_pretty(&compare_reports(&reports)?)?);
    }

    let mut outputs = Vec::with_capacity(args.records.len());
    for path in &args.records {
        let record = read_record(path)?;
        let value = if args.report {
            serde_json::to_value(analyzer.report(&record))?
        } else if let Some(panel) = args.panel {
            serde_json::to_value(analyzer.analyze_panel(&record, panel))?
        } else {
            serde_json::to_value(analyzer.analyze_all(&record))?
        };
        outputs.push(value);
    }

    let json = match outputs.len() {
        1 => serde_json::to_string_pretty(&outputs[0])?,
        _ => serde_json::to_string_pretty(&JsonValue::Array(outputs))?,
    };
    Ok(json)
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
