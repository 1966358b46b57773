use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::{AggregationConfig, EmptyGroupPolicy};
use crate::error::{ProcessingError, Result};
use crate::models::{Column, ColumnType, Table, Value};
use crate::utils::stats;

/// Descriptive statistics of one measurement within one station
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldStats {
    pub field: String,
    /// Non-missing values
    pub count: usize,
    pub missing: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    /// Sample standard deviation, `None` below two values
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub outliers: usize,
}

impl FieldStats {
    fn empty(field: &str) -> Self {
        Self {
            field: field.to_string(),
            count: 0,
            missing: 0,
            mean: None,
            median: None,
            std: None,
            min: None,
            max: None,
            outliers: 0,
        }
    }

    fn from_values(field: &str, values: &[f64], rows: usize, outlier_std_devs: f64) -> Self {
        let sorted = stats::sorted(values);
        let mean = stats::mean(&sorted);
        let std = stats::sample_std(&sorted);

        let outliers = match (mean, std) {
            (Some(m), Some(s)) if s > 0.0 => values
                .iter()
                .filter(|v| (*v - m).abs() > outlier_std_devs * s)
                .count(),
            _ => 0,
        };

        Self {
            field: field.to_string(),
            count: sorted.len(),
            missing: rows - sorted.len(),
            mean,
            median: stats::median(&sorted),
            std,
            min: sorted.first().copied(),
            max: sorted.last().copied(),
            outliers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationSummary {
    pub station_id: String,
    pub reading_count: usize,
    pub fields: Vec<FieldStats>,
}

impl StationSummary {
    pub fn has_outlier(&self) -> bool {
        self.fields.iter().any(|f| f.outliers > 0)
    }

    pub fn field(&self, name: &str) -> Option<&FieldStats> {
        self.fields.iter().find(|f| f.field == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationReport {
    pub input_rows: usize,
    /// Rows skipped because the group key was missing
    pub unkeyed_rows: usize,
    pub measurement_columns: Vec<String>,
    pub summaries: Vec<StationSummary>,
    /// Roster stations that had no readings
    pub empty_stations: Vec<String>,
    pub total_outliers: usize,
}

impl AggregationReport {
    pub fn station(&self, station_id: &str) -> Option<&StationSummary> {
        self.summaries.iter().find(|s| s.station_id == station_id)
    }

    pub fn stations_with_outliers(&self) -> Vec<&str> {
        self.summaries
            .iter()
            .filter(|s| s.has_outlier())
            .map(|s| s.station_id.as_str())
            .collect()
    }
}

pub struct StationAggregator {
    config: AggregationConfig,
    roster: Option<Vec<String>>,
}

impl StationAggregator {
    pub fn new() -> Self {
        Self {
            config: AggregationConfig::default(),
            roster: None,
        }
    }

    pub fn with_config(config: AggregationConfig) -> Self {
        Self {
            config,
            roster: None,
        }
    }

    pub fn with_measurement_columns(mut self, columns: &[&str]) -> Self {
        self.config.measurement_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_outlier_threshold(mut self, std_devs: f64) -> Self {
        self.config.outlier_std_devs = std_devs;
        self
    }

    /// Known station ids, used to report stations without readings
    pub fn with_roster<I, S>(mut self, station_ids: I, policy: EmptyGroupPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roster = Some(station_ids.into_iter().map(Into::into).collect());
        self.config.empty_groups = policy;
        self
    }

    fn resolve_measurements(&self, table: &Table) -> Result<Vec<String>> {
        if self.config.measurement_columns.is_empty() {
            let columns: Vec<String> = table
                .columns()
                .iter()
                .filter(|c| c.dtype == ColumnType::Number && c.name != self.config.group_column)
                .map(|c| c.name.clone())
                .collect();
            if columns.is_empty() {
                return Err(ProcessingError::SchemaMismatch(format!(
                    "no numeric columns to aggregate (columns: {})",
                    table.column_names().join(", ")
                )));
            }
            return Ok(columns);
        }

        for name in &self.config.measurement_columns {
            table.number_column(name)?;
        }
        Ok(self.config.measurement_columns.clone())
    }

    /// Per-station summary table, one row per station sorted by id
    pub fn aggregate(&self, table: &Table) -> Result<(Table, AggregationReport)> {
        let key_idx = table.column_index(&self.config.group_column)?;
        let measurements = self.resolve_measurements(table)?;
        let measurement_idx: Vec<usize> = measurements
            .iter()
            .map(|m| table.column_index(m))
            .collect::<Result<_>>()?;
        debug!(
            "Aggregating {} rows by '{}' over {:?}",
            table.row_count(),
            self.config.group_column,
            measurements
        );

        // station -> (row count, values per measurement)
        let mut groups: BTreeMap<String, (usize, Vec<Vec<f64>>)> = BTreeMap::new();
        let mut unkeyed_rows = 0;

        for row in table.rows() {
            let key = &row[key_idx];
            if key.is_missing() {
                unkeyed_rows += 1;
                continue;
            }
            let entry = groups
                .entry(key.render())
                .or_insert_with(|| (0, vec![Vec::new(); measurements.len()]));
            entry.0 += 1;
            for (slot, &idx) in measurement_idx.iter().enumerate() {
                if let Some(v) = row[idx].as_f64() {
                    entry.1[slot].push(v);
                }
            }
        }

        if unkeyed_rows > 0 {
            warn!(
                "{} row(s) have no '{}' and were left out of aggregation",
                unkeyed_rows, self.config.group_column
            );
        }

        let mut summaries: BTreeMap<String, StationSummary> = groups
            .into_iter()
            .map(|(station_id, (reading_count, values))| {
                let fields = measurements
                    .iter()
                    .zip(values.iter())
                    .map(|(m, v)| FieldStats::from_values(m, v, reading_count, self.config.outlier_std_devs))
                    .collect();
                let summary = StationSummary {
                    station_id: station_id.clone(),
                    reading_count,
                    fields,
                };
                (station_id, summary)
            })
            .collect();

        let mut empty_stations = Vec::new();
        if let Some(roster) = &self.roster {
            for station_id in roster {
                if summaries.contains_key(station_id) || empty_stations.contains(station_id) {
                    continue;
                }
                empty_stations.push(station_id.clone());
                if self.config.empty_groups == EmptyGroupPolicy::Report {
                    summaries.insert(
                        station_id.clone(),
                        StationSummary {
                            station_id: station_id.clone(),
                            reading_count: 0,
                            fields: measurements.iter().map(|m| FieldStats::empty(m)).collect(),
                        },
                    );
                }
            }
            empty_stations.sort();
        }

        let summaries: Vec<StationSummary> = summaries.into_values().collect();
        let output = self.summary_table(&measurements, &summaries)?;
        let report = AggregationReport {
            input_rows: table.row_count(),
            unkeyed_rows,
            total_outliers: summaries
                .iter()
                .flat_map(|s| s.fields.iter())
                .map(|f| f.outliers)
                .sum(),
            measurement_columns: measurements,
            summaries,
            empty_stations,
        };

        info!(
            "Aggregated {} rows into {} station summaries",
            report.input_rows - report.unkeyed_rows,
            report.summaries.len()
        );

        Ok((output, report))
    }

    fn summary_table(&self, measurements: &[String], summaries: &[StationSummary]) -> Result<Table> {
        let mut columns = vec![
            Column::new(self.config.group_column.as_str(), ColumnType::Text),
            Column::new("reading_count", ColumnType::Number),
        ];
        for m in measurements {
            for stat in ["count", "mean", "median", "std", "min", "max", "outliers"] {
                columns.push(Column::new(format!("{}_{}", m, stat), ColumnType::Number));
            }
        }
        columns.push(Column::new("has_outlier", ColumnType::Text));

        let mut table = Table::new(columns)?;
        for summary in summaries {
            let mut row = vec![
                Value::Text(summary.station_id.clone()),
                Value::Number(summary.reading_count as f64),
            ];
            for f in &summary.fields {
                row.push(Value::Number(f.count as f64));
                row.push(Value::from_option_f64(f.mean));
                row.push(Value::from_option_f64(f.median));
                row.push(Value::from_option_f64(f.std));
                row.push(Value::from_option_f64(f.min));
                row.push(Value::from_option_f64(f.max));
                row.push(Value::Number(f.outliers as f64));
            }
            row.push(Value::Text(summary.has_outlier().to_string()));
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn generate_summary(&self, report: &AggregationReport) -> String {
        let mut summary = String::new();
        summary.push_str("=== Station Aggregation ===\n");
        summary.push_str(&format!(
            "Rows aggregated: {} ({} without a station key)\n",
            report.input_rows - report.unkeyed_rows,
            report.unkeyed_rows
        ));
        summary.push_str(&format!("Stations: {}\n", report.summaries.len()));
        summary.push_str(&format!(
            "Measurements: {}\n",
            report.measurement_columns.join(", ")
        ));

        for s in &report.summaries {
            summary.push_str(&format!("\n{} ({} readings)\n", s.station_id, s.reading_count));
            for f in &s.fields {
                match (f.mean, f.min, f.max) {
                    (Some(mean), Some(min), Some(max)) => summary.push_str(&format!(
                        "  {}: mean {:.2}, range {:.2}..{:.2}, std {}, {} outlier(s)\n",
                        f.field,
                        mean,
                        min,
                        max,
                        f.std.map_or("n/a".to_string(), |s| format!("{:.2}", s)),
                        f.outliers
                    )),
                    _ => summary.push_str(&format!("  {}: no values\n", f.field)),
                }
            }
        }

        if !report.empty_stations.is_empty() {
            summary.push_str(&format!(
                "\nStations without readings: {}\n",
                report.empty_stations.join(", ")
            ));
        }
        if report.total_outliers > 0 {
            summary.push_str(&format!(
                "Outliers: {} across {}\n",
                report.total_outliers,
                report.stations_with_outliers().join(", ")
            ));
        }
        summary
    }
}

impl Default for StationAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate with the default configuration
pub fn aggregate_by_station(table: &Table) -> Result<(Table, AggregationReport)> {
    StationAggregator::new().aggregate(table)
}
