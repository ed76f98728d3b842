//! Writes deterministic synthetic GLI lookup tables for manual runs.
//!
//! ```bash
//! cargo run --bin generate-tables -- --out tables
//! cargo run --bin gli-reference -- --tables tables record.json
//! ```
//!
//! The splines are smooth made-up curves, not the published GLI tables.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use clap::Parser;
use gli_reference::config::ReferenceConfig;
use gli_reference::data::model::{CoefficientSet, Panel, Parameter, Sex};
use parquet::arrow::ArrowWriter;

#[derive(Parser)]
#[command(
    name = "generate-tables",
    about = "Write synthetic GLI reference tables (Parquet and CSV)"
)]
struct Args {
    /// Output directory
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Also write CSV copies next to the Parquet files
    #[arg(long)]
    csv: bool,
}

struct Row {
    parameter: Parameter,
    sex: Sex,
    age: f64,
    spline: f64,
    coefficients: Option<CoefficientSet>,
}

/// Synthetic spirometry constants; the diffusion and volume constants are
/// built into the engine.
fn spirometry_coefficients(parameter: Parameter, sex: Sex) -> Option<CoefficientSet> {
    let set = match (parameter, sex) {
        (Parameter::Fev1, Sex::Male) => CoefficientSet::new(-10.3420, 2.2196, 0.0574),
        (Parameter::Fev1, Sex::Female) => CoefficientSet::new(-9.6987, 2.1211, 0.0388),
        (Parameter::Fvc, Sex::Male) => CoefficientSet::new(-12.2394, 2.6226, 0.0612),
        (Parameter::Fvc, Sex::Female) => CoefficientSet::new(-11.3600, 2.4282, 0.0471),
        (Parameter::Fef2575, Sex::Male) => CoefficientSet::new(-7.9000, 1.8000, -0.1500),
        (Parameter::Fef2575, Sex::Female) => CoefficientSet::new(-7.4400, 1.7200, -0.1400),
        _ => return None,
    };
    Some(set)
}

/// Growth ramp in childhood, flat plateau, linear decline after 25.
fn spline_at(panel: Panel, parameter: Parameter, sex: Sex, age: f64) -> f64 {
    let sex_shift = match sex {
        Sex::Male => 0.0,
        Sex::Female => -0.01,
    };
    match panel {
        Panel::Spirometry => {
            let growth = -0.35 * (-(age - 3.0) / 6.0).exp();
            let decline = match parameter {
                Parameter::Fef2575 => -0.009,
                _ => -0.0045,
            } * (age - 25.0).max(0.0);
            growth + decline + sex_shift
        }
        Panel::Diffusion | Panel::Volumes => 0.02 * (age / 15.0).sin() + sex_shift,
    }
}

fn panel_rows(panel: Panel) -> Vec<Row> {
    let (start, end, step) = match panel {
        Panel::Spirometry => (3.0, 95.0, 0.25),
        Panel::Diffusion | Panel::Volumes => (5.0, 90.0, 0.5),
    };
    let steps = ((end - start) / step) as usize;

    let mut rows = Vec::new();
    for key in panel.required_keys() {
        let coefficients = spirometry_coefficients(key.parameter, key.sex);
        for i in 0..=steps {
            let age = start + i as f64 * step;
            rows.push(Row {
                parameter: key.parameter,
                sex: key.sex,
                age,
                spline: spline_at(panel, key.parameter, key.sex, age),
                // The block rides on the first row of each sheet.
                coefficients: if i == 0 { coefficients } else { None },
            });
        }
    }
    rows
}

fn to_batch(panel: Panel, rows: &[Row]) -> Result<RecordBatch> {
    let parameter: StringArray = rows.iter().map(|r| Some(r.parameter.name())).collect();
    let sex: StringArray = rows.iter().map(|r| Some(r.sex.to_string())).collect();
    let age = Float64Array::from(rows.iter().map(|r| r.age).collect::<Vec<_>>());
    let spline = Float64Array::from(rows.iter().map(|r| r.spline).collect::<Vec<_>>());

    let mut fields = vec![
        Field::new("parameter", DataType::Utf8, false),
        Field::new("sex", DataType::Utf8, false),
        Field::new("age", DataType::Float64, false),
        Field::new("spline", DataType::Float64, false),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(parameter),
        Arc::new(sex),
        Arc::new(age),
        Arc::new(spline),
    ];

    if panel == Panel::Spirometry {
        let column = |pick: fn(CoefficientSet) -> f64| -> ArrayRef {
            Arc::new(
                rows.iter()
                    .map(|r| r.coefficients.map(pick))
                    .collect::<Float64Array>(),
            )
        };
        fields.extend(["a", "p", "q"].map(|name| Field::new(name, DataType::Float64, true)));
        columns.push(column(|c| c.a));
        columns.push(column(|c| c.p));
        columns.push(column(|c| c.q));
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("Failed to create RecordBatch")
}

fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), None).context("Failed to create writer")?;
    writer.write(batch).context("Failed to write batch")?;
    writer.close().context("Failed to close writer")?;
    Ok(())
}

fn write_csv(path: &Path, panel: Panel, rows: &[Row]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let fmt_opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();

    if panel == Panel::Spirometry {
        writer.write_record(["parameter", "sex", "age", "spline", "a", "p", "q"])?;
    } else {
        writer.write_record(["parameter", "sex", "age", "spline"])?;
    }
    for r in rows {
        let mut record = vec![
            r.parameter.name().to_string(),
            r.sex.to_string(),
            r.age.to_string(),
            r.spline.to_string(),
        ];
        if panel == Panel::Spirometry {
            record.push(fmt_opt(r.coefficients.map(|c| c.a)));
            record.push(fmt_opt(r.coefficients.map(|c| c.p)));
            record.push(fmt_opt(r.coefficients.map(|c| c.q)));
        }
        writer.write_record(&record)?;
    }
    writer.flush().context("Failed to flush CSV")?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("Failed to create {}", args.out.display()))?;

    for panel in Panel::ALL {
        let rows = panel_rows(panel);
        let stem = ReferenceConfig::stem(panel);

        let parquet_path = args.out.join(format!("{stem}.parquet"));
        write_parquet(&parquet_path, &to_batch(panel, &rows)?)?;
        println!("Wrote {} {panel} rows to {}", rows.len(), parquet_path.display());

        if args.csv {
            let csv_path = args.out.join(format!("{stem}.csv"));
            write_csv(&csv_path, panel, &rows)?;
            println!("Wrote {} {panel} rows to {}", rows.len(), csv_path.display());
        }
    }
    Ok(())
}
