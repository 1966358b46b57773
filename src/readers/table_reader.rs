use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ProcessingError, Result};
use crate::models::{Column, ColumnType, Reading, Station, Table, Value};
use crate::utils::constants::{DATE_FORMAT, MISSING_TOKENS, PREVIEW_ROWS};
use crate::utils::stats::NumericSummary;

/// Reads delimited text into a typed [`Table`] and describes its structure.
pub struct TableReader {
    delimiter: u8,
    schema: HashMap<String, ColumnType>,
    extra_missing_tokens: Vec<String>,
}

impl TableReader {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            schema: HashMap::new(),
            extra_missing_tokens: Vec::new(),
        }
    }

    /// Fix the type of known columns instead of inferring it
    pub fn with_schema(mut self, columns: &[Column]) -> Self {
        self.schema = columns
            .iter()
            .map(|c| (c.name.clone(), c.dtype))
            .collect();
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_missing_tokens(mut self, tokens: &[String]) -> Self {
        self.extra_missing_tokens = tokens.iter().map(|t| t.trim().to_lowercase()).collect();
        self
    }

    /// Load a table and its structural summary
    pub fn read(&self, path: &Path) -> Result<(Table, TableSummary)> {
        if !path.exists() {
            return Err(ProcessingError::data_source(path, "file does not exist"));
        }
        if !path.is_file() {
            return Err(ProcessingError::data_source(path, "path is not a regular file"));
        }

        let file = File::open(path)
            .map_err(|e| ProcessingError::data_source(path, format!("cannot open file: {}", e)))?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(false)
            .from_reader(BufReader::new(file));

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| ProcessingError::data_source(path, format!("unreadable header: {}", e)))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
            return Err(ProcessingError::data_source(path, "no columns found in header row"));
        }

        let mut raw_rows: Vec<Vec<String>> = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                // Header is line 1
                ProcessingError::data_source(path, format!("data line {}: {}", i + 2, e))
            })?;
            raw_rows.push(record.iter().map(|s| s.to_string()).collect());
        }

        let columns: Vec<Column> = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let dtype = self
                    .schema
                    .get(name)
                    .copied()
                    .unwrap_or_else(|| self.infer_type(raw_rows.iter().map(|r| r[idx].as_str())));
                Column::new(name.clone(), dtype)
            })
            .collect();

        let mut table = Table::new(columns.clone())
            .map_err(|e| ProcessingError::data_source(path, e.to_string()))?;
        let mut unparseable = vec![0usize; columns.len()];

        for raw in &raw_rows {
            let mut row = Vec::with_capacity(columns.len());
            for (idx, (cell, column)) in raw.iter().zip(&columns).enumerate() {
                let value = self.parse_cell(cell, column.dtype);
                if value.is_missing() && !self.is_missing_token(cell) {
                    unparseable[idx] += 1;
                }
                row.push(value);
            }
            table.push_row(row)?;
        }

        for (column, count) in columns.iter().zip(&unparseable) {
            if *count > 0 {
                warn!(
                    "{}: {} cell(s) in column '{}' could not be parsed as {} and were marked missing",
                    path.display(),
                    count,
                    column.name,
                    column.dtype
                );
            }
        }

        let mut summary = TableSummary::describe(&table);
        summary.source = Some(path.to_path_buf());
        for (column_summary, count) in summary.column_summaries.iter_mut().zip(unparseable) {
            column_summary.unparseable = count;
        }

        info!(
            "Loaded {} rows x {} columns from {}",
            table.row_count(),
            table.column_count(),
            path.display()
        );

        Ok((table, summary))
    }

    fn is_missing_token(&self, cell: &str) -> bool {
        let normalized = cell.trim().to_lowercase();
        MISSING_TOKENS.contains(&normalized.as_str())
            || self.extra_missing_tokens.iter().any(|t| *t == normalized)
    }

    fn parse_cell(&self, cell: &str, dtype: ColumnType) -> Value {
        if self.is_missing_token(cell) {
            return Value::Missing;
        }
        match dtype {
            ColumnType::Text => Value::Text(cell.to_string()),
            ColumnType::Number => parse_number(cell).map_or(Value::Missing, Value::Number),
            ColumnType::Date => parse_date(cell).map_or(Value::Missing, Value::Date),
        }
    }

    /// Majority vote over non-missing cells
    fn infer_type<'a>(&self, cells: impl Iterator<Item = &'a str>) -> ColumnType {
        let mut present = 0usize;
        let mut numbers = 0usize;
        let mut dates = 0usize;

        for cell in cells.filter(|c| !self.is_missing_token(c)) {
            present += 1;
            if parse_number(cell).is_some() {
                numbers += 1;
            } else if parse_date(cell).is_some() {
                dates += 1;
            }
        }

        if present == 0 {
            ColumnType::Text
        } else if numbers * 2 > present {
            ColumnType::Number
        } else if dates * 2 > present {
            ColumnType::Date
        } else {
            ColumnType::Text
        }
    }
}

impl Default for TableReader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_date(cell: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(cell.trim(), DATE_FORMAT).ok()
}

/// Load a station table with the station columns typed
pub fn load_stations(path: &Path) -> Result<(Table, TableSummary)> {
    TableReader::new().with_schema(&Station::schema()).read(path)
}

/// Load a readings table with the reading columns typed
pub fn load_readings(path: &Path) -> Result<(Table, TableSummary)> {
    TableReader::new().with_schema(&Reading::schema()).read(path)
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnSummary {
    pub name: String,
    pub dtype: ColumnType,
    pub missing: usize,
    /// Cells present in the file that could not be parsed as `dtype`
    pub unparseable: usize,
    pub distinct: usize,
    pub numeric: Option<NumericSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub source: Option<PathBuf>,
    pub rows: usize,
    pub columns: usize,
    pub column_summaries: Vec<ColumnSummary>,
    pub total_missing: usize,
    pub duplicate_rows: usize,
    /// Header plus the first rows, rendered as text
    pub preview: Vec<Vec<String>>,
}

impl TableSummary {
    /// Structural summary of an in-memory table
    pub fn describe(table: &Table) -> Self {
        let column_summaries: Vec<ColumnSummary> = table
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let cells = table.rows().iter().map(|r| &r[idx]);
                let missing = cells.clone().filter(|v| v.is_missing()).count();
                let distinct: HashSet<String> = cells
                    .clone()
                    .filter(|v| !v.is_missing())
                    .map(|v| v.render())
                    .collect();
                let numeric = if column.dtype == ColumnType::Number {
                    let values: Vec<f64> = cells.filter_map(|v| v.as_f64()).collect();
                    NumericSummary::from_values(&values)
                } else {
                    None
                };

                ColumnSummary {
                    name: column.name.clone(),
                    dtype: column.dtype,
                    missing,
                    unparseable: 0,
                    distinct: distinct.len(),
                    numeric,
                }
            })
            .collect();

        let mut seen = HashSet::new();
        let duplicate_rows = table
            .rows()
            .iter()
            .filter(|row| !seen.insert(row.iter().map(|v| v.render()).collect::<Vec<_>>()))
            .count();

        let mut preview: Vec<Vec<String>> = vec![table.column_names().iter().map(|n| n.to_string()).collect()];
        preview.extend(
            table
                .head(PREVIEW_ROWS)
                .rows()
                .iter()
                .map(|row| row.iter().map(|v| v.render()).collect()),
        );

        let total_missing = column_summaries.iter().map(|c| c.missing).sum();
        debug!(
            "Described table: {} rows, {} missing cells, {} duplicate rows",
            table.row_count(),
            total_missing,
            duplicate_rows
        );

        Self {
            source: None,
            rows: table.row_count(),
            columns: table.column_count(),
            column_summaries,
            total_missing,
            duplicate_rows,
            preview,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSummary> {
        self.column_summaries.iter().find(|c| c.name == name)
    }

    /// Human-readable exploration report
    pub fn report(&self) -> String {
        let mut out = String::new();

        out.push_str("=== Table Summary ===\n");
        if let Some(source) = &self.source {
            out.push_str(&format!("Source: {}\n", source.display()));
        }
        out.push_str(&format!("Shape: {} rows x {} columns\n", self.rows, self.columns));
        out.push_str(&format!("Missing cells: {}\n", self.total_missing));
        out.push_str(&format!("Duplicate rows: {}\n", self.duplicate_rows));
        out.push_str("\nColumns:\n");

        for column in &self.column_summaries {
            out.push_str(&format!(
                "  {:<20} {:<7} missing={} unparseable={} distinct={}\n",
                column.name, column.dtype, column.missing, column.unparseable, column.distinct
            ));
            if let Some(n) = &column.numeric {
                out.push_str(&format!(
                    "  {:<20} min={:.2} q1={:.2} median={:.2} q3={:.2} max={:.2} mean={:.2}\n",
                    "", n.min, n.q1, n.median, n.q3, n.max, n.mean
                ));
            }
        }

        if self.preview.len() > 1 {
            out.push_str(&format!("\nFirst {} row(s):\n", self.preview.len() - 1));
            for line in &self.preview {
                out.push_str(&format!("  {}\n", line.join(" | ")));
            }
        }

        out
    }
}
