use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, ArrayRef, AsArray, Float32Array, Float64Array, Int32Array, Int64Array, StringArray,
};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{
    CoefficientSet, Panel, Parameter, ReferencePoint, ReferenceSheet, Sex, SplineTable, TableKey,
};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load the reference sheets of one panel from a file.  Dispatch by extension.
///
/// Every format uses the same long layout, one row per table point:
///
/// | column      | content                                               |
/// |-------------|-------------------------------------------------------|
/// | `parameter` | `FEV1`, `DLCO`, `RV/TLC`, ...                         |
/// | `sex`       | `male` / `female` (Spanish spellings accepted)        |
/// | `age`       | years                                                 |
/// | `spline`    | Mspline correction                                    |
/// | `a` `p` `q` | optional coefficient block, read once per sheet       |
///
/// Supported formats:
/// * `.parquet` – columns as above (recommended)
/// * `.json`    – `[{ "parameter": "FEV1", "sex": "male", "age": 3.0, "spline": 0.01 }, ...]`
/// * `.csv`     – header row with the column names above
pub fn load_file(path: &Path, panel: Panel) -> Result<Vec<ReferenceSheet>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let rows = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path)?,
        "json" => load_json(path)?,
        "csv" => load_csv(path)?,
        other => bail!("Unsupported file extension: .{other}"),
    };

    assemble_sheets(rows, panel)
}

// ---------------------------------------------------------------------------
// RawRow – one table point before grouping into sheets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct RawRow {
    parameter: String,
    sex: String,
    age: f64,
    spline: f64,
    a: Option<f64>,
    p: Option<f64>,
    q: Option<f64>,
}

impl RawRow {
    fn coefficients(&self, row: usize) -> Result<Option<CoefficientSet>> {
        match (self.a, self.p, self.q) {
            (Some(a), Some(p), Some(q)) => Ok(Some(CoefficientSet::new(a, p, q))),
            (None, None, None) => Ok(None),
            _ => bail!("Row {row}: incomplete coefficient block (a, p and q are all required)"),
        }
    }
}

/// Group rows into sheets keyed by (parameter, sex), keeping file order, and
/// check the panel's sheets are all there.
fn assemble_sheets(rows: Vec<RawRow>, panel: Panel) -> Result<Vec<ReferenceSheet>> {
    let mut grouped: BTreeMap<TableKey, (Vec<ReferencePoint>, Option<CoefficientSet>)> =
        BTreeMap::new();

    for (row_no, row) in rows.iter().enumerate() {
        let parameter: Parameter = row
            .parameter
            .parse()
            .with_context(|| format!("Row {row_no}: bad parameter"))?;
        if parameter.panel() != panel {
            bail!("Row {row_no}: parameter {parameter} does not belong to the {panel} tables");
        }
        let sex: Sex = row
            .sex
            .parse()
            .with_context(|| format!("Row {row_no}: bad sex"))?;

        for (name, v) in [("age", row.age), ("spline", row.spline)] {
            if !v.is_finite() {
                bail!("Row {row_no}: '{name}' is not a finite number");
            }
        }
        let coefficients = row.coefficients(row_no)?;
        if let Some(c) = coefficients {
            if ![c.a, c.p, c.q].iter().all(|v| v.is_finite()) {
                bail!("Row {row_no}: coefficient block is not finite");
            }
        }

        let entry = grouped
            .entry(TableKey::new(parameter, sex))
            .or_insert_with(|| (Vec::new(), None));
        entry.0.push(ReferencePoint {
            age: row.age,
            spline: row.spline,
        });
        // First row carrying the block wins.
        if entry.1.is_none() {
            entry.1 = coefficients;
        }
    }

    for key in panel.required_keys() {
        match grouped.get(&key) {
            None => bail!("Missing reference sheet for {key}"),
            Some((_, None)) if panel == Panel::Spirometry => {
                bail!("Reference sheet for {key} has no coefficient block")
            }
            Some(_) => {}
        }
    }

    grouped
        .into_iter()
        .map(|(key, (points, coefficients))| {
            let table = SplineTable::new(points)
                .with_context(|| format!("Reference sheet for {key} is empty"))?;
            Ok(ReferenceSheet {
                key,
                table,
                coefficients,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, the default `df.to_json(orient='records')`):
///
/// ```json
/// [
///   { "parameter": "FEV1", "sex": "male", "age": 3.0, "spline": -0.0112,
///     "a": -10.342, "p": 2.2196, "q": 0.0574 },
///   { "parameter": "FEV1", "sex": "male", "age": 3.25, "spline": -0.0102 },
///   ...
/// ]
/// ```
fn load_json(path: &Path) -> Result<Vec<RawRow>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root
        .as_array()
        .context("Expected top-level JSON array")?;

    records
        .iter()
        .enumerate()
        .map(|(i, rec)| {
            let obj = rec
                .as_object()
                .with_context(|| format!("Row {i} is not a JSON object"))?;

            Ok(RawRow {
                parameter: json_string(obj.get("parameter"), i, "parameter")?,
                sex: json_string(obj.get("sex"), i, "sex")?,
                age: json_f64(obj.get("age"), i, "age")?,
                spline: json_f64(obj.get("spline"), i, "spline")?,
                a: json_opt_f64(obj.get("a"), i, "a")?,
                p: json_opt_f64(obj.get("p"), i, "p")?,
                q: json_opt_f64(obj.get("q"), i, "q")?,
            })
        })
        .collect()
}

fn json_string(val: Option<&JsonValue>, row: usize, col: &str) -> Result<String> {
    val.and_then(|v| v.as_str())
        .map(str::to_string)
        .with_context(|| format!("Row {row}: missing or invalid '{col}' string"))
}

fn json_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<f64> {
    json_opt_f64(val, row, col)?.with_context(|| format!("Row {row}: missing '{col}'"))
}

fn json_opt_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Option<f64>> {
    match val {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Number(n)) => n
            .as_f64()
            .map(Some)
            .with_context(|| format!("Row {row}, {col}: not a number")),
        Some(JsonValue::String(s)) => parse_cell(s, row, col),
        Some(other) => bail!("Row {row}, {col}: expected a number, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names (case-insensitive).
/// `parameter`, `sex`, `age` and `spline` are required; `a`, `p`, `q` may be
/// absent or left blank on all but one row of each sheet.
fn load_csv(path: &Path) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .collect();

    let parameter_idx = required_column(&headers, "parameter")?;
    let sex_idx = required_column(&headers, "sex")?;
    let age_idx = required_column(&headers, "age")?;
    let spline_idx = required_column(&headers, "spline")?;
    let a_idx = column_index(&headers, "a");
    let p_idx = column_index(&headers, "p");
    let q_idx = column_index(&headers, "q");

    let mut rows = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let cell = |idx: usize| record.get(idx).unwrap_or("").to_string();
        let opt_cell = |idx: Option<usize>, col: &str| match idx {
            Some(i) => parse_cell(&cell(i), row_no, col),
            None => Ok(None),
        };

        rows.push(RawRow {
            parameter: cell(parameter_idx),
            sex: cell(sex_idx),
            age: parse_cell(&cell(age_idx), row_no, "age")?
                .with_context(|| format!("Row {row_no}: empty 'age'"))?,
            spline: parse_cell(&cell(spline_idx), row_no, "spline")?
                .with_context(|| format!("Row {row_no}: empty 'spline'"))?,
            a: opt_cell(a_idx, "a")?,
            p: opt_cell(p_idx, "p")?,
            q: opt_cell(q_idx, "q")?,
        });
    }

    Ok(rows)
}

fn column_index(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

fn required_column(headers: &[String], name: &str) -> Result<usize> {
    column_index(headers, name).with_context(|| format!("CSV missing '{name}' column"))
}

/// Parse a numeric cell. Blank cells are `None`; a decimal comma is accepted
/// because spreadsheet exports in Spanish locales use it.
fn parse_cell(s: &str, row: usize, col: &str) -> Result<Option<f64>> {
    let tok = s.trim();
    if tok.is_empty() {
        return Ok(None);
    }
    tok.replace(',', ".")
        .parse::<f64>()
        .map(Some)
        .with_context(|| format!("Row {row}, {col}: '{tok}' is not a number"))
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file containing reference rows.
///
/// Expected schema:
/// - `parameter`, `sex`: Utf8 or LargeUtf8
/// - `age`, `spline`: Float64, Float32, Int64 or Int32, non-null
/// - `a`, `p`, `q`: same numeric types, optional and nullable
fn load_parquet(path: &Path) -> Result<Vec<RawRow>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut rows = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        rows.extend(rows_from_batch(&batch, rows.len())?);
    }

    Ok(rows)
}

fn rows_from_batch(batch: &RecordBatch, offset: usize) -> Result<Vec<RawRow>> {
    let parameter_col = required_array(batch, "parameter")?;
    let sex_col = required_array(batch, "sex")?;
    let age_col = required_array(batch, "age")?;
    let spline_col = required_array(batch, "spline")?;
    let a_col = optional_array(batch, "a");
    let p_col = optional_array(batch, "p");
    let q_col = optional_array(batch, "q");

    (0..batch.num_rows())
        .map(|row| {
            let row_no = offset + row;
            let read = |col: &ArrayRef, name: &str| -> Result<f64> {
                extract_f64(col, row)?
                    .with_context(|| format!("Row {row_no}: null value in '{name}'"))
            };
            let read_opt = |col: &Option<ArrayRef>, name: &str| -> Result<Option<f64>> {
                match col {
                    Some(c) => extract_f64(c, row)
                        .with_context(|| format!("Row {row_no}: failed to read '{name}'")),
                    None => Ok(None),
                }
            };

            Ok(RawRow {
                parameter: extract_string(&parameter_col, row)
                    .with_context(|| format!("Row {row_no}: failed to read 'parameter'"))?,
                sex: extract_string(&sex_col, row)
                    .with_context(|| format!("Row {row_no}: failed to read 'sex'"))?,
                age: read(&age_col, "age")?,
                spline: read(&spline_col, "spline")?,
                a: read_opt(&a_col, "a")?,
                p: read_opt(&p_col, "p")?,
                q: read_opt(&q_col, "q")?,
            })
        })
        .collect()
}

fn required_array(batch: &RecordBatch, name: &str) -> Result<ArrayRef> {
    optional_array(batch, name).with_context(|| format!("Parquet file missing '{name}' column"))
}

fn optional_array(batch: &RecordBatch, name: &str) -> Option<ArrayRef> {
    batch
        .schema()
        .index_of(name)
        .ok()
        .map(|i| Arc::clone(batch.column(i)))
}

// -- Parquet / Arrow helpers --

/// Extract a numeric cell as `f64`. Nulls come back as `None`.
fn extract_f64(col: &ArrayRef, row: usize) -> Result<Option<f64>> {
    if col.is_null(row) {
        return Ok(None);
    }
    let value = match col.data_type() {
        DataType::Float64 => col
            .as_any()
            .downcast_ref::<Float64Array>()
            .context("expected Float64Array")?
            .value(row),
        DataType::Float32 => col
            .as_any()
            .downcast_ref::<Float32Array>()
            .context("expected Float32Array")?
            .value(row) as f64,
        DataType::Int64 => col
            .as_any()
            .downcast_ref::<Int64Array>()
            .context("expected Int64Array")?
            .value(row) as f64,
        DataType::Int32 => col
            .as_any()
            .downcast_ref::<Int32Array>()
            .context("expected Int32Array")?
            .value(row) as f64,
        other => bail!("Expected a numeric column, got {other:?}"),
    };
    Ok(Some(value))
}

fn extract_string(col: &ArrayRef, row: usize) -> Result<String> {
    if col.is_null(row) {
        bail!("null value in text column");
    }
    match col.data_type() {
        DataType::Utf8 => {
            let s = col
                .as_any()
                .downcast_ref::<StringArray>()
                .context("expected StringArray")?;
            Ok(s.value(row).to_string())
        }
        DataType::LargeUtf8 => Ok(col.as_string::<i64>().value(row).to_string()),
        other => bail!("Expected a text column, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use arrow::datatypes::{Field, Schema};
    use parquet::arrow::ArrowWriter;

    use super::*;

    const VOLUMES_CSV: &str = "\
parameter,sex,age,spline
TLC,male,5,0.01
TLC,male,6,0.02
TLC,female,5,0.03
VC,male,5,0.0
VC,female,5,0.0
RV,male,5,0.0
RV,female,5,0.0
RV/TLC,male,5,0.0
RV/TLC,female,5,0.0
";

    fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn sheet(sheets: &[ReferenceSheet], parameter: Parameter, sex: Sex) -> &ReferenceSheet {
        sheets
            .iter()
            .find(|s| s.key == TableKey::new(parameter, sex))
            .unwrap()
    }

    #[test]
    fn csv_volumes_load_in_file_order() {
        let file = write_temp(".csv", VOLUMES_CSV);
        let sheets = load_file(file.path(), Panel::Volumes).unwrap();
        assert_eq!(sheets.len(), 8);

        let tlc = sheet(&sheets, Parameter::Tlc, Sex::Male);
        assert_eq!(tlc.table.len(), 2);
        assert_eq!(tlc.table.points()[0].age, 5.0);
        assert_eq!(tlc.table.points()[1].spline, 0.02);
        assert!(tlc.coefficients.is_none());
    }

    #[test]
    fn csv_spirometry_reads_coefficient_block_once_per_sheet() {
        let csv = "\
parameter,sex,age,spline,a,p,q
FEV1,male,3,0.1,-10.0,2.0,0.05
FEV1,male,4,0.2,,,
FEV1,female,3,0.1,-9.0,1.9,0.04
FVC,male,3,0.1,-11.0,2.2,0.06
FVC,female,3,0.1,-10.5,2.1,0.05
FEF25-75%,male,3,0.1,-8.0,1.5,0.01
FEF25-75%,female,3,0.1,-7.5,1.4,0.02
";
        let file = write_temp(".csv", csv);
        let sheets = load_file(file.path(), Panel::Spirometry).unwrap();
        let fev1 = sheet(&sheets, Parameter::Fev1, Sex::Male);
        assert_eq!(fev1.coefficients, Some(CoefficientSet::new(-10.0, 2.0, 0.05)));
        assert_eq!(fev1.table.len(), 2);
    }

    #[test]
    fn spirometry_without_coefficients_is_rejected() {
        let csv = "\
parameter,sex,age,spline
FEV1,male,3,0.1
FEV1,female,3,0.1
FVC,male,3,0.1
FVC,female,3,0.1
FEF25-75%,male,3,0.1
FEF25-75%,female,3,0.1
";
        let file = write_temp(".csv", csv);
        let err = load_file(file.path(), Panel::Spirometry).unwrap_err();
        assert!(format!("{err:#}").contains("coefficient block"));
    }

    #[test]
    fn missing_sheet_is_rejected() {
        let csv = "parameter,sex,age,spline\nTLC,male,5,0.01\n";
        let file = write_temp(".csv", csv);
        let err = load_file(file.path(), Panel::Volumes).unwrap_err();
        assert!(format!("{err:#}").contains("Missing reference sheet"));
    }

    #[test]
    fn missing_column_is_rejected() {
        let file = write_temp(".csv", "parameter,sex,age\nTLC,male,5\n");
        let err = load_file(file.path(), Panel::Volumes).unwrap_err();
        assert!(format!("{err:#}").contains("'spline'"));
    }

    #[test]
    fn non_numeric_cell_is_rejected() {
        let file = write_temp(".csv", "parameter,sex,age,spline\nTLC,male,five,0.01\n");
        let err = load_file(file.path(), Panel::Volumes).unwrap_err();
        assert!(format!("{err:#}").contains("'five' is not a number"));
    }

    #[test]
    fn foreign_parameter_is_rejected() {
        let csv = VOLUMES_CSV.replace("VC,male", "DLCO,male");
        let file = write_temp(".csv", &csv);
        let err = load_file(file.path(), Panel::Volumes).unwrap_err();
        assert!(format!("{err:#}").contains("does not belong"));
    }

    #[test]
    fn decimal_comma_is_accepted() {
        let csv = VOLUMES_CSV.replace("TLC,male,5,0.01", "TLC,male,5,\"0,01\"");
        let file = write_temp(".csv", &csv);
        let sheets = load_file(file.path(), Panel::Volumes).unwrap();
        assert_eq!(sheet(&sheets, Parameter::Tlc, Sex::Male).table.points()[0].spline, 0.01);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let file = write_temp(".xlsx", "");
        let err = load_file(file.path(), Panel::Volumes).unwrap_err();
        assert!(err.to_string().contains("Unsupported file extension"));
    }

    #[test]
    fn json_matches_csv() {
        let mut records = Vec::new();
        for line in VOLUMES_CSV.lines().skip(1) {
            let cols: Vec<&str> = line.split(',').collect();
            records.push(serde_json::json!({
                "parameter": cols[0],
                "sex": cols[1],
                "age": cols[2].parse::<f64>().unwrap(),
                "spline": cols[3].parse::<f64>().unwrap(),
            }));
        }
        let json = write_temp(".json", &serde_json::to_string(&records).unwrap());
        let csv = write_temp(".csv", VOLUMES_CSV);

        let from_json = load_file(json.path(), Panel::Volumes).unwrap();
        let from_csv = load_file(csv.path(), Panel::Volumes).unwrap();
        assert_eq!(from_json, from_csv);
    }

    #[test]
    fn parquet_matches_csv() {
        let lines: Vec<Vec<&str>> = VOLUMES_CSV
            .lines()
            .skip(1)
            .map(|l| l.split(',').collect())
            .collect();

        let schema = Arc::new(Schema::new(vec![
            Field::new("parameter", DataType::Utf8, false),
            Field::new("sex", DataType::Utf8, false),
            Field::new("age", DataType::Float64, false),
            Field::new("spline", DataType::Float32, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(lines.iter().map(|c| c[0]).collect::<Vec<_>>())),
                Arc::new(StringArray::from(lines.iter().map(|c| c[1]).collect::<Vec<_>>())),
                Arc::new(Float64Array::from(
                    lines.iter().map(|c| c[2].parse::<f64>().unwrap()).collect::<Vec<_>>(),
                )),
                Arc::new(Float32Array::from(
                    lines.iter().map(|c| c[3].parse::<f32>().unwrap()).collect::<Vec<_>>(),
                )),
            ],
        )
        .unwrap();

        let file = tempfile::Builder::new().suffix(".parquet").tempfile().unwrap();
        let out = std::fs::File::create(file.path()).unwrap();
        let mut writer = ArrowWriter::try_new(out, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let sheets = load_file(file.path(), Panel::Volumes).unwrap();
        assert_eq!(sheets.len(), 8);
        let tlc = sheet(&sheets, Parameter::Tlc, Sex::Male);
        assert_eq!(tlc.table.points()[0].age, 5.0);
        assert!((tlc.table.points()[1].spline - 0.02).abs() < 1e-6);
    }
}
