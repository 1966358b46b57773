use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::config::ValidationConfig;
use crate::error::Result;
use crate::models::{Column, ColumnType, Table, Value};
use crate::utils::constants::COL_STATION_ID;
use crate::utils::coordinates::decimal_places;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinateFlags {
    pub missing: bool,
    pub out_of_range: bool,
    pub zero_or_null_island: bool,
    pub low_precision: bool,
}

impl CoordinateFlags {
    pub fn is_clean(&self) -> bool {
        !(self.missing || self.out_of_range || self.zero_or_null_island || self.low_precision)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RowValidation {
    pub row: usize,
    pub station_id: Option<String>,
    pub flags: CoordinateFlags,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinateValidationReport {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub missing_count: usize,
    pub lat_out_of_range: usize,
    pub lon_out_of_range: usize,
    pub out_of_range_count: usize,
    pub null_island_count: usize,
    pub low_precision_count: usize,
    /// Rows sharing a coordinate pair with an earlier row; not part of the score
    pub duplicate_locations: usize,
    /// Fraction of rows with no flag set
    pub quality_score: f64,
    pub rows: Vec<RowValidation>,
    /// Most widespread problem first
    pub recommendations: Vec<String>,
}

impl CoordinateValidationReport {
    pub fn flagged_rows(&self) -> impl Iterator<Item = &RowValidation> {
        self.rows.iter().filter(|r| !r.flags.is_clean())
    }
}

pub struct CoordinateValidator {
    config: ValidationConfig,
}

impl CoordinateValidator {
    pub fn new() -> Self {
        Self {
            config: ValidationConfig::default(),
        }
    }

    pub fn with_config(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn with_columns(mut self, lat_column: &str, lon_column: &str) -> Self {
        self.config.lat_column = lat_column.to_string();
        self.config.lon_column = lon_column.to_string();
        self
    }

    /// Check every row's coordinates. The input table is not modified.
    pub fn validate(&self, table: &Table) -> Result<CoordinateValidationReport> {
        let lats = table.number_column(&self.config.lat_column)?;
        let lons = table.number_column(&self.config.lon_column)?;
        let ids = table.text_column(COL_STATION_ID).ok();

        let (lat_min, lat_max) = self.config.lat_bounds;
        let (lon_min, lon_max) = self.config.lon_bounds;

        let mut rows = Vec::with_capacity(table.row_count());
        let mut lat_out_of_range = 0;
        let mut lon_out_of_range = 0;
        let mut duplicate_locations = 0;
        let mut seen_locations: HashMap<(u64, u64), usize> = HashMap::new();

        for i in 0..table.row_count() {
            let mut flags = CoordinateFlags::default();
            let mut issues = Vec::new();

            match (lats.get(i), lons.get(i)) {
                (Some(lat), Some(lon)) => {
                    if !(lat_min..=lat_max).contains(&lat) {
                        flags.out_of_range = true;
                        lat_out_of_range += 1;
                        issues.push(format!(
                            "latitude {} outside [{}, {}]",
                            lat, lat_min, lat_max
                        ));
                    }
                    if !(lon_min..=lon_max).contains(&lon) {
                        flags.out_of_range = true;
                        lon_out_of_range += 1;
                        issues.push(format!(
                            "longitude {} outside [{}, {}]",
                            lon, lon_min, lon_max
                        ));
                    }
                    if lat == 0.0 && lon == 0.0 {
                        flags.zero_or_null_island = true;
                        issues.push("coordinates are (0, 0)".to_string());
                    }
                    let min_places = self.config.min_decimal_places;
                    if decimal_places(lat) < min_places && decimal_places(lon) < min_places {
                        flags.low_precision = true;
                        issues.push(format!(
                            "fewer than {} decimal place(s) in both coordinates",
                            min_places
                        ));
                    }

                    let key = (lat.to_bits(), lon.to_bits());
                    let first = *seen_locations.entry(key).or_insert(i);
                    if first != i {
                        duplicate_locations += 1;
                    }
                }
                (lat, lon) => {
                    flags.missing = true;
                    if lat.is_none() {
                        issues.push(format!("missing {}", self.config.lat_column));
                    }
                    if lon.is_none() {
                        issues.push(format!("missing {}", self.config.lon_column));
                    }
                }
            }

            rows.push(RowValidation {
                row: i,
                station_id: ids.and_then(|c| c.get(i)).map(|s| s.to_string()),
                flags,
                issues,
            });
        }

        let count = |f: fn(&CoordinateFlags) -> bool| rows.iter().filter(|r| f(&r.flags)).count();
        let missing_count = count(|f| f.missing);
        let out_of_range_count = count(|f| f.out_of_range);
        let null_island_count = count(|f| f.zero_or_null_island);
        let low_precision_count = count(|f| f.low_precision);
        let valid_rows = count(CoordinateFlags::is_clean);

        let total_rows = rows.len();
        let quality_score = if total_rows == 0 {
            1.0
        } else {
            valid_rows as f64 / total_rows as f64
        };

        let mut report = CoordinateValidationReport {
            total_rows,
            valid_rows,
            missing_count,
            lat_out_of_range,
            lon_out_of_range,
            out_of_range_count,
            null_island_count,
            low_precision_count,
            duplicate_locations,
            quality_score,
            rows,
            recommendations: Vec::new(),
        };
        report.recommendations = self.recommendations(&report);

        if report.valid_rows < report.total_rows {
            warn!(
                "{} of {} rows have coordinate issues (quality score {:.2})",
                report.total_rows - report.valid_rows,
                report.total_rows,
                report.quality_score
            );
        } else {
            info!("All {} rows passed coordinate validation", report.total_rows);
        }

        Ok(report)
    }

    fn recommendations(&self, report: &CoordinateValidationReport) -> Vec<String> {
        if report.total_rows == 0 {
            return vec!["No rows to validate; check the input filter or source file".to_string()];
        }

        let pct = |n: usize| 100.0 * n as f64 / report.total_rows as f64;
        let (lat_min, lat_max) = self.config.lat_bounds;
        let (lon_min, lon_max) = self.config.lon_bounds;

        let mut ranked: Vec<(usize, String)> = vec![
            (
                report.missing_count,
                format!(
                    "{:.1}% of rows ({}) are missing a coordinate; geocode or drop them before spatial analysis",
                    pct(report.missing_count),
                    report.missing_count
                ),
            ),
            (
                report.lat_out_of_range,
                format!(
                    "{:.1}% of rows ({}) have out-of-range latitude outside [{}, {}]; check for swapped or mis-scaled values",
                    pct(report.lat_out_of_range),
                    report.lat_out_of_range,
                    lat_min,
                    lat_max
                ),
            ),
            (
                report.lon_out_of_range,
                format!(
                    "{:.1}% of rows ({}) have out-of-range longitude outside [{}, {}]; check for swapped or mis-scaled values",
                    pct(report.lon_out_of_range),
                    report.lon_out_of_range,
                    lon_min,
                    lon_max
                ),
            ),
            (
                report.null_island_count,
                format!(
                    "{:.1}% of rows ({}) sit at (0, 0); these are usually placeholders for unknown locations",
                    pct(report.null_island_count),
                    report.null_island_count
                ),
            ),
            (
                report.low_precision_count,
                format!(
                    "{:.1}% of rows ({}) have low coordinate precision; record at least {} decimal place(s)",
                    pct(report.low_precision_count),
                    report.low_precision_count,
                    self.config.min_decimal_places
                ),
            ),
            (
                report.duplicate_locations,
                format!(
                    "{:.1}% of rows ({}) repeat an earlier coordinate pair; confirm co-located stations are intended",
                    pct(report.duplicate_locations),
                    report.duplicate_locations
                ),
            ),
        ];

        ranked.retain(|(n, _)| *n > 0);
        // Stable sort keeps declaration order for ties
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        if ranked.is_empty() {
            return vec!["All coordinates passed validation".to_string()];
        }
        ranked.into_iter().map(|(_, message)| message).collect()
    }

    /// Copy of `table` with one text column per flag ("true"/"false")
    pub fn annotate(&self, table: &Table, report: &CoordinateValidationReport) -> Result<Table> {
        let mut columns = table.columns().to_vec();
        for name in ["coord_missing", "coord_out_of_range", "coord_null_island", "coord_low_precision"] {
            columns.push(Column::new(name, ColumnType::Text));
        }
        let mut out = Table::new(columns)?;

        for (row, validation) in table.rows().iter().zip(&report.rows) {
            let flag = |b: bool| Value::Text(b.to_string());
            let mut new_row = row.clone();
            new_row.extend([
                flag(validation.flags.missing),
                flag(validation.flags.out_of_range),
                flag(validation.flags.zero_or_null_island),
                flag(validation.flags.low_precision),
            ]);
            out.push_row(new_row)?;
        }

        Ok(out)
    }

    /// Generate a summary report
    pub fn generate_summary(&self, report: &CoordinateValidationReport) -> String {
        let mut summary = String::new();

        summary.push_str("=== Coordinate Validation Report ===\n");
        summary.push_str(&format!("Total Rows: {}\n", report.total_rows));
        summary.push_str(&format!(
            "Valid Rows: {} (quality score {:.2})\n",
            report.valid_rows, report.quality_score
        ));
        summary.push_str(&format!("Missing: {}\n", report.missing_count));
        summary.push_str(&format!(
            "Out of Range: {} (lat {}, lon {})\n",
            report.out_of_range_count, report.lat_out_of_range, report.lon_out_of_range
        ));
        summary.push_str(&format!("Null Island: {}\n", report.null_island_count));
        summary.push_str(&format!("Low Precision: {}\n", report.low_precision_count));
        summary.push_str(&format!("Duplicate Locations: {}\n", report.duplicate_locations));

        summary.push_str("\nRecommendations:\n");
        for (i, recommendation) in report.recommendations.iter().enumerate() {
            summary.push_str(&format!("  {}. {}\n", i + 1, recommendation));
        }

        let flagged: Vec<&RowValidation> = report.flagged_rows().take(10).collect();
        if !flagged.is_empty() {
            summary.push_str("\nFlagged Rows (first 10):\n");
            for row in flagged {
                summary.push_str(&format!(
                    "  row {} ({}): {}\n",
                    row.row + 1,
                    row.station_id.as_deref().unwrap_or("unknown station"),
                    row.issues.join("; ")
                ));
            }
        }

        summary
    }
}

impl Default for CoordinateValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate coordinates and return the flag-annotated table with its report
pub fn validate_coordinates(
    table: &Table,
    config: &ValidationConfig,
) -> Result<(Table, CoordinateValidationReport)> {
    let validator = CoordinateValidator::with_config(config.clone());
    let report = validator.validate(table)?;
    let annotated = validator.annotate(table, &report)?;
    Ok((annotated, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessingError;
    use crate::models::{stations_to_table, Station};

    fn stations(coords: &[(&str, f64, f64)]) -> Table {
        let stations: Vec<Station> = coords
            .iter()
            .map(|(id, lat, lon)| Station::new(*id, "Test", *lat, *lon, None, "urban"))
            .collect();
        stations_to_table(&stations).unwrap()
    }

    #[test]
    fn test_out_of_range_station_flagged() -> Result<()> {
        let table = stations(&[("STN_001", 40.7, -74.0), ("STN_002", 999.0, -74.0)]);
        let report = CoordinateValidator::new().validate(&table)?;

        assert_eq!(report.quality_score, 0.5);
        assert!(report.rows[0].flags.is_clean());
        assert!(report.rows[1].flags.out_of_range);
        assert_eq!(report.rows[1].station_id.as_deref(), Some("STN_002"));
        assert_eq!(report.lat_out_of_range, 1);
        assert_eq!(report.lon_out_of_range, 0);
        Ok(())
    }

    #[test]
    fn test_missing_and_null_island() -> Result<()> {
        let mut table = stations(&[("STN_001", 0.0, 0.0), ("STN_002", 33.43, -112.01)]);
        let mut row = Station::new("STN_003", "No fix", 1.0, 1.0, None, "rural").to_row();
        row[3] = Value::Missing;
        table.push_row(row)?;

        let report = CoordinateValidator::new().validate(&table)?;
        assert!(report.rows[0].flags.zero_or_null_island);
        assert!(report.rows[2].flags.missing);
        assert!(!report.rows[2].flags.out_of_range);
        assert_eq!(report.valid_rows, 1);
        assert!((report.quality_score - 1.0 / 3.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_low_precision_requires_both_coordinates() -> Result<()> {
        let table = stations(&[("STN_001", 33.0, -112.0), ("STN_002", 33.5, -112.0)]);
        let report = CoordinateValidator::new().validate(&table)?;
        assert!(report.rows[0].flags.low_precision);
        assert!(!report.rows[1].flags.low_precision);
        Ok(())
    }

    #[test]
    fn test_recommendations_ranked_by_count() -> Result<()> {
        let table = stations(&[
            ("A", 95.0, 10.5),
            ("B", 95.0, 10.5),
            ("C", 10.5, 200.0),
            ("D", 10.5, 10.5),
        ]);
        let report = CoordinateValidator::new().validate(&table)?;

        assert!(report.recommendations[0].contains("latitude"));
        assert!(report.recommendations[0].starts_with("50.0%"));
        assert!(report.recommendations.iter().any(|r| r.contains("longitude")));
        assert_eq!(report.duplicate_locations, 1);
        Ok(())
    }

    #[test]
    fn test_empty_table_scores_one() -> Result<()> {
        let table = stations(&[]);
        let report = CoordinateValidator::new().validate(&table)?;
        assert_eq!(report.quality_score, 1.0);
        assert_eq!(report.recommendations.len(), 1);
        Ok(())
    }

    #[test]
    fn test_missing_column_named_in_error() {
        let table = stations(&[("STN_001", 40.7, -74.0)]);
        let err = CoordinateValidator::new()
            .with_columns("lat", "lon")
            .validate(&table)
            .unwrap_err();
        assert!(matches!(err, ProcessingError::ColumnNotFound { ref column, .. } if column == "lat"));
    }

    #[test]
    fn test_annotate_does_not_touch_input() -> Result<()> {
        let table = stations(&[("STN_001", 40.7, -74.0), ("STN_002", 999.0, -74.0)]);
        let before = table.clone();
        let (annotated, report) = validate_coordinates(&table, &ValidationConfig::default())?;

        assert_eq!(table, before);
        assert_eq!(annotated.column_count(), table.column_count() + 4);
        assert_eq!(
            annotated.value(1, "coord_out_of_range")?,
            &Value::Text("true".into())
        );
        assert!(CoordinateValidator::new()
            .generate_summary(&report)
            .contains("STN_002"));
        Ok(())
    }
}
