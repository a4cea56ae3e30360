//! Columnar logs (`.csv`, `.parquet`).
//!
//! The first column is the x axis; every other column is one point-data
//! spectrum. Headers may carry units as `name (unit)`. A column called
//! `<name>_err` holds the errors of column `<name>`, and columns whose
//! name starts with `monitor` are monitor spectra.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::data::assemble::{assemble, RawSpectrum, Titles};
use crate::data::attr;
use crate::data::instrument::base_file_name;
use crate::data::model::{Attributes, DataSet, Spectrum, XScale};
use crate::diagnostics::DiagnosticSink;
use crate::retriever::{status, DataSetType, Retriever};

const DEFAULT_X_UNITS: &str = "Time(s)";
const DEFAULT_Y_UNITS: &str = "Counts";
const ERROR_SUFFIX: &str = "_err";

/// Column names plus column-major cells; `None` marks a missing or
/// non-numeric cell.
#[derive(Debug, Default)]
pub struct Table {
    pub names: Vec<String>,
    pub columns: Vec<Vec<Option<f64>>>,
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Read a columnar log. Dispatch by extension.
pub fn load_table(path: &Path) -> Result<Table> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

fn load_csv(path: &Path) -> Result<Table> {
    let reader = csv::Reader::from_path(path).context("opening CSV")?;
    read_csv(reader)
}

pub fn read_csv<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Table> {
    let names: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if names.len() < 2 {
        bail!("CSV needs an x column and at least one value column");
    }

    let mut columns = vec![Vec::new(); names.len()];
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        for (i, column) in columns.iter_mut().enumerate() {
            column.push(record.get(i).and_then(|cell| cell.trim().parse::<f64>().ok()));
        }
    }
    Ok(Table { names, columns })
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Numeric and string columns are both accepted; strings that do not
/// parse as numbers become missing cells.
fn load_parquet(path: &Path) -> Result<Table> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let names: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().trim().to_string())
        .collect();
    if names.len() < 2 {
        bail!("Parquet file needs an x column and at least one value column");
    }
    let reader = builder.build().context("building parquet reader")?;

    let mut columns = vec![Vec::new(); names.len()];
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        for (i, column) in columns.iter_mut().enumerate() {
            let as_f64 = cast(batch.column(i), &DataType::Float64)
                .with_context(|| format!("column '{}' is not numeric", names[i]))?;
            column.extend(as_f64.as_primitive::<Float64Type>().iter());
        }
    }
    Ok(Table { names, columns })
}

// ---------------------------------------------------------------------------
// Table → spectra
// ---------------------------------------------------------------------------

/// Split a `name (unit)` header.
pub fn split_header(header: &str) -> (&str, Option<&str>) {
    if let Some(stripped) = header.strip_suffix(')') {
        if let Some(open) = stripped.rfind(" (") {
            return (stripped[..open].trim(), Some(stripped[open + 2..].trim()));
        }
    }
    (header, None)
}

fn is_monitor(name: &str) -> bool {
    name.to_ascii_lowercase().starts_with("monitor")
}

/// Build one spectrum per value column. Rows with a missing x are
/// reported and skipped; missing y cells become NaN.
pub fn spectra_from_table(table: &Table, source: &str, sink: &dyn DiagnosticSink) -> Vec<RawSpectrum> {
    let Some(x_column) = table.columns.first() else {
        return Vec::new();
    };
    let (_, x_units) = split_header(&table.names[0]);
    let x_units = x_units.unwrap_or(DEFAULT_X_UNITS);

    let mut rows = Vec::with_capacity(x_column.len());
    for (row, x) in x_column.iter().enumerate() {
        match x {
            Some(x) if x.is_finite() => rows.push(row),
            _ => sink.report(source, &format!("row {row}: x value is not a number, skipped")),
        }
    }
    let x: Vec<f64> = rows.iter().filter_map(|&r| x_column[r]).collect();
    let x_scale = match XScale::variable(x) {
        Ok(scale) => scale,
        Err(e) => {
            sink.report(source, &format!("x column '{}': {e}", table.names[0]));
            return Vec::new();
        }
    };
    let pick = |column: &[Option<f64>]| -> Vec<f64> {
        rows.iter()
            .map(|&r| column.get(r).copied().flatten().unwrap_or(f64::NAN))
            .collect()
    };

    let mut next_group = 1;
    let mut out = Vec::new();
    for (i, header) in table.names.iter().enumerate().skip(1) {
        let (name, units) = split_header(header);
        if name.ends_with(ERROR_SUFFIX) {
            continue;
        }
        let error_name = format!("{name}{ERROR_SUFFIX}");
        let errors = table
            .names
            .iter()
            .position(|h| split_header(h).0 == error_name)
            .map(|j| pick(&table.columns[j]));
        let group_id = if is_monitor(name) {
            0
        } else {
            next_group += 1;
            next_group - 1
        };
        match Spectrum::new(x_scale.clone(), pick(&table.columns[i]), errors, group_id) {
            Ok(mut spectrum) => {
                spectrum.set_attribute(attr::COLUMN_NAME, name);
                out.push(RawSpectrum {
                    spectrum,
                    x_units: x_units.to_string(),
                    y_units: units.unwrap_or(DEFAULT_Y_UNITS).to_string(),
                });
            }
            Err(e) => sink.report(source, &format!("column '{name}': {e}")),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Retriever
// ---------------------------------------------------------------------------

pub struct ColumnLogRetriever {
    name: String,
    readable: bool,
    data_sets: Vec<(DataSetType, DataSet)>,
}

impl ColumnLogRetriever {
    pub fn open(name: &str, sink: Arc<dyn DiagnosticSink>) -> Self {
        match load_table(Path::new(name)) {
            Ok(table) => Self::from_table(name, &table, sink.as_ref()),
            Err(e) => {
                sink.report(name, &format!("{e:#}"));
                ColumnLogRetriever {
                    name: name.to_string(),
                    readable: false,
                    data_sets: Vec::new(),
                }
            }
        }
    }

    pub fn from_table(name: &str, table: &Table, sink: &dyn DiagnosticSink) -> Self {
        let raw = spectra_from_table(table, name, sink);
        let mut shared = Attributes::new();
        shared.insert(attr::FILE_NAME.to_string(), name.into());
        shared.insert(attr::RUN_TITLE.to_string(), base_file_name(name).into());
        ColumnLogRetriever {
            name: name.to_string(),
            readable: true,
            data_sets: assemble(raw, &shared, &Titles::default()),
        }
    }
}

impl Retriever for ColumnLogRetriever {
    fn data_source_name(&self) -> &str {
        &self.name
    }

    fn num_data_sets(&mut self) -> i32 {
        if !self.readable {
            return status::BAD_FILE_NAME;
        }
        self.data_sets.len() as i32
    }

    fn get_type(&mut self, index: usize) -> DataSetType {
        self.data_sets
            .get(index)
            .map(|(ty, _)| *ty)
            .unwrap_or(DataSetType::Invalid)
    }

    fn get_data_set(&mut self, index: usize) -> Option<DataSet> {
        self.data_sets.get(index).map(|(_, ds)| ds.clone())
    }
}
