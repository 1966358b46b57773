use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::{ExportConfig, ExportFormat};
use crate::error::{ProcessingError, Result};
use crate::models::Table;
use crate::utils::constants::SUMMARY_SIDECAR_SUFFIX;

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub format: ExportFormat,
    pub rows: usize,
    pub columns: Vec<String>,
    pub file_size: u64,
    /// Data rows counted when reading the written file back
    pub verified_rows: usize,
    pub exported_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar: Option<PathBuf>,
}

pub struct CsvExporter {
    config: ExportConfig,
}

impl CsvExporter {
    pub fn new() -> Self {
        Self {
            config: ExportConfig::default(),
        }
    }

    pub fn with_config(config: ExportConfig) -> Self {
        Self { config }
    }

    pub fn with_format(mut self, format: ExportFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn allow_empty(mut self, allow: bool) -> Self {
        self.config.allow_empty = allow;
        self
    }

    pub fn with_summary_file(mut self, write: bool) -> Self {
        self.config.write_summary = write;
        self
    }

    /// Write `table` to `path`.
    ///
    /// Data goes to a temporary file in the target directory which is verified
    /// and then renamed over `path`. On any failure the temporary file is
    /// deleted and `path` is left untouched.
    pub fn export(&self, table: &Table, path: &Path) -> Result<ExportSummary> {
        if table.is_empty() {
            if !self.config.allow_empty {
                return Err(ProcessingError::export(
                    path,
                    "table has no rows (enable allow_empty to write a header-only file)",
                    None,
                ));
            }
            warn!("Exporting empty table to {}", path.display());
        }
        if path.is_dir() {
            return Err(ProcessingError::export(path, "target is a directory", None));
        }

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| {
            ProcessingError::export(
                path,
                format!("cannot create directory {}", dir.display()),
                Some(e),
            )
        })?;

        let mut temp = NamedTempFile::new_in(&dir).map_err(|e| {
            ProcessingError::export(path, "cannot create temporary file", Some(e))
        })?;
        debug!("Writing {} rows via {}", table.row_count(), temp.path().display());

        self.write_table(table, temp.as_file_mut())
            .map_err(|e| ProcessingError::export(path, "write failed", Some(e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| ProcessingError::export(path, "flush to disk failed", Some(e)))?;

        let verified_rows = self
            .count_rows(temp.path(), table.column_count())
            .map_err(|e| ProcessingError::export(path, "written file could not be read back", Some(e)))?;
        if verified_rows != table.row_count() {
            return Err(ProcessingError::export(
                path,
                format!(
                    "verification failed: wrote {} rows but read back {}",
                    table.row_count(),
                    verified_rows
                ),
                None,
            ));
        }

        temp.persist(path)
            .map_err(|e| ProcessingError::export(path, "cannot move file into place", Some(e.error)))?;

        let file_size = fs::metadata(path)
            .map_err(|e| ProcessingError::export(path, "cannot stat exported file", Some(e)))?
            .len();

        let mut summary = ExportSummary {
            path: path.to_path_buf(),
            format: self.config.format,
            rows: table.row_count(),
            columns: table.column_names().iter().map(|c| c.to_string()).collect(),
            file_size,
            verified_rows,
            exported_at: Utc::now(),
            sidecar: None,
        };

        if self.config.write_summary {
            summary.sidecar = Some(self.write_sidecar(&summary)?);
        }

        info!(
            "Exported {} rows x {} columns to {} ({} bytes)",
            summary.rows,
            summary.columns.len(),
            path.display(),
            summary.file_size
        );

        Ok(summary)
    }

    fn write_table<W: Write>(&self, table: &Table, out: W) -> io::Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.config.format.delimiter())
            .from_writer(out);

        writer.write_record(table.column_names())?;
        for row in table.rows() {
            writer.write_record(row.iter().map(|v| v.render()))?;
        }
        writer.flush()
    }

    fn count_rows(&self, path: &Path, expected_columns: usize) -> io::Result<usize> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.config.format.delimiter())
            .has_headers(true)
            .from_path(path)?;

        let header_len = reader.headers()?.len();
        if header_len != expected_columns {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("header has {} columns, expected {}", header_len, expected_columns),
            ));
        }

        let mut rows = 0;
        for record in reader.records() {
            record?;
            rows += 1;
        }
        Ok(rows)
    }

    fn write_sidecar(&self, summary: &ExportSummary) -> Result<PathBuf> {
        let sidecar = sidecar_path(&summary.path);
        let json = serde_json::to_string_pretty(summary)?;
        fs::write(&sidecar, json).map_err(|e| {
            ProcessingError::export(&sidecar, "cannot write summary file", Some(e))
        })?;
        Ok(sidecar)
    }

    pub fn generate_summary(&self, summary: &ExportSummary) -> String {
        let mut out = String::new();
        out.push_str("=== Export Summary ===\n");
        out.push_str(&format!("File: {}\n", summary.path.display()));
        out.push_str(&format!(
            "Rows: {} (verified {})\n",
            summary.rows, summary.verified_rows
        ));
        out.push_str(&format!(
            "Columns ({}): {}\n",
            summary.columns.len(),
            summary.columns.join(", ")
        ));
        out.push_str(&format!("Size: {} bytes\n", summary.file_size));
        out.push_str(&format!(
            "Exported at: {}\n",
            summary.exported_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        if let Some(sidecar) = &summary.sidecar {
            out.push_str(&format!("Summary file: {}\n", sidecar.display()));
        }
        out
    }
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self::new()
    }
}

/// `<file>.summary.json` next to an exported file
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(SUMMARY_SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// Export `table` in `format` with default settings
pub fn export(table: &Table, path: &Path, format: ExportFormat) -> Result<ExportSummary> {
    CsvExporter::new().with_format(format).export(table, path)
}
