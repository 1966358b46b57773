use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::JoinConfig;
use crate::error::{ProcessingError, Result};
use crate::models::{Column, ColumnType, Table, Value};
use crate::utils::constants::{COL_JOIN_STATUS, STATION_COLUMN_SUFFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Readings whose station exists
    Inner,
    /// Every reading, station attributes missing for orphans
    Left,
    /// Every station, reading columns missing for stations without readings
    StationsLeft,
    /// Full outer join annotated with a `join_status` column
    Validation,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinKind::Inner => "inner",
            JoinKind::Left => "left",
            JoinKind::StationsLeft => "stations_left",
            JoinKind::Validation => "validation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NearMissKind {
    Whitespace,
    Case,
}

/// Orphaned reading key that would match a station after normalisation.
/// Reported only; keys are never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NearMiss {
    pub reading_key: String,
    pub station_key: String,
    pub kind: NearMissKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinQualityReport {
    pub kind: JoinKind,
    pub reading_rows: usize,
    pub station_rows: usize,
    pub matched_readings: usize,
    pub orphan_readings: usize,
    /// Distinct reading keys with no station, sorted
    pub orphan_keys: Vec<String>,
    pub stations_without_readings: Vec<String>,
    pub duplicate_station_keys: Vec<String>,
    pub near_misses: Vec<NearMiss>,
    pub unmatched_ratio: f64,
    pub exceeds_tolerance: bool,
    pub output_rows: usize,
}

enum Status {
    Matched,
    OrphanReading,
    StationWithoutReadings,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Status::Matched => "matched",
            Status::OrphanReading => "orphan_reading",
            Status::StationWithoutReadings => "station_without_readings",
        }
    }
}

pub struct JoinReconciler {
    config: JoinConfig,
}

impl JoinReconciler {
    pub fn new() -> Self {
        Self {
            config: JoinConfig::default(),
        }
    }

    pub fn with_config(config: JoinConfig) -> Self {
        Self { config }
    }

    pub fn with_key_column(mut self, key: &str) -> Self {
        self.config.key_column = key.to_string();
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.config.unmatched_tolerance = tolerance;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    fn key_index(&self, table: &Table, side: &str) -> Result<usize> {
        table.column_index(&self.config.key_column).map_err(|_| {
            ProcessingError::JoinKey(format!(
                "{} table has no '{}' column (available: {})",
                side,
                self.config.key_column,
                table.column_names().join(", ")
            ))
        })
    }

    /// Join station metadata with readings on the configured key.
    /// `Left` keeps every reading; `StationsLeft` keeps every station.
    pub fn join(
        &self,
        stations: &Table,
        readings: &Table,
        kind: JoinKind,
    ) -> Result<(Table, JoinQualityReport)> {
        let key = self.config.key_column.as_str();
        let reading_key = self.key_index(readings, "readings")?;
        let station_key = self.key_index(stations, "stations")?;

        let reading_dtype = readings.columns()[reading_key].dtype;
        let station_dtype = stations.columns()[station_key].dtype;
        if reading_dtype != station_dtype {
            return Err(ProcessingError::JoinKey(format!(
                "'{}' is {} in readings but {} in stations",
                key, reading_dtype, station_dtype
            )));
        }

        // First occurrence of a station key wins
        let mut station_lookup: HashMap<String, usize> = HashMap::new();
        let mut station_order: Vec<String> = Vec::new();
        let mut duplicates: Vec<String> = Vec::new();
        for (i, row) in stations.rows().iter().enumerate() {
            let cell = &row[station_key];
            if cell.is_missing() {
                warn!("Station row {} has no '{}' and cannot be joined", i + 1, key);
                continue;
            }
            let k = cell.render();
            if station_lookup.contains_key(&k) {
                if !duplicates.contains(&k) {
                    duplicates.push(k);
                }
                continue;
            }
            station_lookup.insert(k.clone(), i);
            station_order.push(k);
        }
        if !duplicates.is_empty() {
            warn!(
                "{} duplicate station key(s), keeping the first of each: {}",
                duplicates.len(),
                duplicates.join(", ")
            );
        }

        // Resolve every reading before building output
        let mut matches: Vec<Option<usize>> = Vec::with_capacity(readings.row_count());
        let mut seen_stations: HashSet<&str> = HashSet::new();
        let mut orphan_keys: Vec<String> = Vec::new();
        let mut reading_keys_present = false;
        for row in readings.rows() {
            let cell = &row[reading_key];
            if cell.is_missing() {
                matches.push(None);
                continue;
            }
            reading_keys_present = true;
            let k = cell.render();
            match station_lookup.get_key_value(&k) {
                Some((station_k, &idx)) => {
                    seen_stations.insert(station_k.as_str());
                    matches.push(Some(idx));
                }
                None => {
                    if !orphan_keys.contains(&k) {
                        orphan_keys.push(k);
                    }
                    matches.push(None);
                }
            }
        }
        orphan_keys.sort();

        if reading_keys_present && !station_lookup.is_empty() && seen_stations.is_empty() {
            return Err(ProcessingError::JoinKey(format!(
                "no '{}' value in readings matches any station; check that both files use the same identifiers",
                key
            )));
        }

        let matched_readings = matches.iter().filter(|m| m.is_some()).count();
        let orphan_readings = readings.row_count() - matched_readings;

        if self.config.strict && orphan_readings > 0 {
            let sample: Vec<&str> = orphan_keys.iter().take(5).map(|k| k.as_str()).collect();
            return Err(ProcessingError::JoinKey(format!(
                "{} reading(s) reference unknown stations (e.g. {})",
                orphan_readings,
                sample.join(", ")
            )));
        }

        let stations_without_readings: Vec<String> = station_order
            .iter()
            .filter(|k| !seen_stations.contains(k.as_str()))
            .cloned()
            .collect();
        let near_misses = find_near_misses(&orphan_keys, &station_order);
        for miss in &near_misses {
            warn!(
                "Reading key '{}' does not match but is close to station '{}' ({:?})",
                miss.reading_key, miss.station_key, miss.kind
            );
        }

        let unmatched_ratio = if readings.row_count() == 0 {
            0.0
        } else {
            orphan_readings as f64 / readings.row_count() as f64
        };
        let exceeds_tolerance = unmatched_ratio > self.config.unmatched_tolerance;
        if exceeds_tolerance {
            warn!(
                "{:.1}% of readings have no station, above the {:.1}% tolerance",
                unmatched_ratio * 100.0,
                self.config.unmatched_tolerance * 100.0
            );
        }

        // Output layout: reading columns, then station columns without the key
        let station_columns: Vec<usize> = (0..stations.column_count())
            .filter(|&i| i != station_key)
            .collect();
        let mut columns = readings.columns().to_vec();
        for &i in &station_columns {
            let column = &stations.columns()[i];
            let mut name = column.name.clone();
            while columns.iter().any(|c| c.name == name) {
                name.push_str(STATION_COLUMN_SUFFIX);
            }
            columns.push(Column::new(name, column.dtype));
        }
        if kind == JoinKind::Validation {
            columns.push(Column::new(COL_JOIN_STATUS, ColumnType::Text));
        }
        let mut output = Table::new(columns)?;

        let station_part = |station_row: Option<usize>| -> Vec<Value> {
            match station_row {
                Some(s) => station_columns
                    .iter()
                    .map(|&c| stations.rows()[s][c].clone())
                    .collect(),
                None => vec![Value::Missing; station_columns.len()],
            }
        };

        for (row, matched) in readings.rows().iter().zip(matches.iter()) {
            let status = match matched {
                Some(_) => Status::Matched,
                None if matches!(kind, JoinKind::Inner | JoinKind::StationsLeft) => continue,
                None => Status::OrphanReading,
            };
            let mut out_row = row.clone();
            out_row.extend(station_part(*matched));
            if kind == JoinKind::Validation {
                out_row.push(Value::Text(status.as_str().to_string()));
            }
            output.push_row(out_row)?;
        }

        if matches!(kind, JoinKind::StationsLeft | JoinKind::Validation) {
            for k in &stations_without_readings {
                let Some(&s) = station_lookup.get(k) else {
                    continue;
                };
                let mut out_row = vec![Value::Missing; readings.column_count()];
                out_row[reading_key] = stations.rows()[s][station_key].clone();
                out_row.extend(station_part(Some(s)));
                if kind == JoinKind::Validation {
                    out_row.push(Value::Text(
                        Status::StationWithoutReadings.as_str().to_string(),
                    ));
                }
                output.push_row(out_row)?;
            }
        }

        debug!(
            "{} join: {} matched, {} orphaned, {} stations without readings",
            kind,
            matched_readings,
            orphan_readings,
            stations_without_readings.len()
        );

        let report = JoinQualityReport {
            kind,
            reading_rows: readings.row_count(),
            station_rows: stations.row_count(),
            matched_readings,
            orphan_readings,
            orphan_keys,
            stations_without_readings,
            duplicate_station_keys: duplicates,
            near_misses,
            unmatched_ratio,
            exceeds_tolerance,
            output_rows: output.row_count(),
        };

        info!(
            "Joined {} readings with {} stations ({} join, {} rows out)",
            report.reading_rows, report.station_rows, kind, report.output_rows
        );

        Ok((output, report))
    }

    pub fn generate_summary(&self, report: &JoinQualityReport) -> String {
        let mut summary = String::new();
        summary.push_str("=== Join Quality Report ===\n");
        summary.push_str(&format!("Join kind: {}\n", report.kind));
        summary.push_str(&format!(
            "Readings: {} ({} matched, {} orphaned, {:.1}%)\n",
            report.reading_rows,
            report.matched_readings,
            report.orphan_readings,
            report.unmatched_ratio * 100.0
        ));
        summary.push_str(&format!("Stations: {}\n", report.station_rows));
        summary.push_str(&format!("Output rows: {}\n", report.output_rows));

        if !report.orphan_keys.is_empty() {
            summary.push_str(&format!(
                "\nUnknown station ids in readings: {}\n",
                report.orphan_keys.join(", ")
            ));
        }
        if !report.stations_without_readings.is_empty() {
            summary.push_str(&format!(
                "Stations without readings: {}\n",
                report.stations_without_readings.join(", ")
            ));
        }
        if !report.duplicate_station_keys.is_empty() {
            summary.push_str(&format!(
                "Duplicate station ids (first kept): {}\n",
                report.duplicate_station_keys.join(", ")
            ));
        }
        for miss in &report.near_misses {
            let hint = match miss.kind {
                NearMissKind::Whitespace => "differs only by surrounding whitespace",
                NearMissKind::Case => "differs only by letter case",
            };
            summary.push_str(&format!(
                "  '{}' {} from station '{}'\n",
                miss.reading_key, hint, miss.station_key
            ));
        }
        if report.exceeds_tolerance {
            summary.push_str(&format!(
                "\nWARNING: unmatched readings exceed the {:.1}% tolerance\n",
                self.config.unmatched_tolerance * 100.0
            ));
        }
        summary
    }
}

impl Default for JoinReconciler {
    fn default() -> Self {
        Self::new()
    }
}

fn find_near_misses(orphan_keys: &[String], station_keys: &[String]) -> Vec<NearMiss> {
    let trimmed: HashMap<&str, &str> = station_keys
        .iter()
        .map(|k| (k.trim(), k.as_str()))
        .collect();
    let folded: HashMap<String, &str> = station_keys
        .iter()
        .map(|k| (k.trim().to_ascii_lowercase(), k.as_str()))
        .collect();

    orphan_keys
        .iter()
        .filter_map(|orphan| {
            let key = orphan.trim();
            if let Some(station) = trimmed.get(key) {
                return Some(NearMiss {
                    reading_key: orphan.clone(),
                    station_key: station.to_string(),
                    kind: NearMissKind::Whitespace,
                });
            }
            folded.get(&key.to_ascii_lowercase()).map(|station| NearMiss {
                reading_key: orphan.clone(),
                station_key: station.to_string(),
                kind: NearMissKind::Case,
            })
        })
        .collect()
}

/// Join with the default configuration
pub fn join_stations_with_readings(
    stations: &Table,
    readings: &Table,
    kind: JoinKind,
) -> Result<(Table, JoinQualityReport)> {
    JoinReconciler::new().join(stations, readings, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{readings_to_table, stations_to_table, DataQuality, Reading, Station};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn stations() -> Table {
        stations_to_table(&[
            Station::new("STN_001", "Central Park", 40.7, -74.0, Some(10.0), "urban"),
            Station::new("STN_002", "Phoenix Sky Harbor", 33.4342, -112.0116, Some(337.0), "airport"),
            Station::new("STN_003", "Tucson", 32.1161, -110.9395, None, "rural"),
        ])
        .unwrap()
    }

    fn readings(ids: &[&str]) -> Table {
        let date = NaiveDate::from_ymd_opt(2023, 1, 15).unwrap();
        let rows: Vec<Reading> = ids
            .iter()
            .map(|id| Reading::new(*id, date, Some(20.0), Some(50.0), DataQuality::Good))
            .collect();
        readings_to_table(&rows).unwrap()
    }

    #[test]
    fn test_inner_and_left_counts() -> Result<()> {
        let r = readings(&["STN_001", "STN_002", "STN_999", "STN_001"]);
        let s = stations();

        let (inner, report) = join_stations_with_readings(&s, &r, JoinKind::Inner)?;
        let (left, _) = join_stations_with_readings(&s, &r, JoinKind::Left)?;

        assert_eq!(inner.row_count(), 3);
        assert_eq!(left.row_count(), r.row_count());
        assert!(inner.row_count() <= left.row_count());
        assert_eq!(report.orphan_readings, 1);
        assert_eq!(report.orphan_keys, vec!["STN_999".to_string()]);
        assert_eq!(report.stations_without_readings, vec!["STN_003".to_string()]);
        assert!(report.exceeds_tolerance);

        assert_eq!(left.value(2, "station_name")?, &Value::Missing);
        assert_eq!(left.value(1, "station_name")?, &Value::Text("Phoenix Sky Harbor".into()));
        Ok(())
    }

    #[test]
    fn test_output_columns_and_clash_suffix() -> Result<()> {
        let mut columns = Station::schema();
        columns.push(Column::new("date", ColumnType::Text));
        let mut s = Table::new(columns)?;
        let mut row = Station::new("STN_001", "A", 1.5, 2.5, None, "urban").to_row();
        row.push(Value::Text("installed 2001".into()));
        s.push_row(row)?;

        let (out, _) = join_stations_with_readings(&s, &readings(&["STN_001"]), JoinKind::Inner)?;
        let names = out.column_names();
        assert_eq!(names[0], "station_id");
        assert!(names.contains(&"date"));
        assert!(names.contains(&"date_station"));
        assert_eq!(names.iter().filter(|n| **n == "station_id").count(), 1);
        Ok(())
    }

    #[test]
    fn test_stations_come_first() -> Result<()> {
        let s = stations();
        let r = readings(&["STN_001", "STN_002", "STN_099"]);

        let (left, report) = JoinReconciler::new().join(&s, &r, JoinKind::Left)?;
        assert_eq!(left.row_count(), 3);
        assert_eq!(report.reading_rows, 3);
        assert_eq!(report.station_rows, 3);
        assert_eq!(report.orphan_readings, 1);
        assert_eq!(report.orphan_keys, vec!["STN_099".to_string()]);
        assert_eq!(report.stations_without_readings, vec!["STN_003".to_string()]);
        assert_eq!(left.value(0, "station_name")?, &Value::Text("Central Park".into()));
        Ok(())
    }

    #[test]
    fn test_suffix_repeats_until_unique() -> Result<()> {
        let mut columns = Reading::schema();
        columns.push(Column::new("station_name", ColumnType::Text));
        columns.push(Column::new("station_name_station", ColumnType::Text));
        let mut r = Table::new(columns)?;
        let date = NaiveDate::from_ymd_opt(2023, 1, 15).unwrap();
        let mut row = Reading::new("STN_001", date, Some(5.0), None, DataQuality::Good).to_row();
        row.push(Value::Text("as logged".into()));
        row.push(Value::Text("logger copy".into()));
        r.push_row(row)?;

        let (out, _) = join_stations_with_readings(&stations(), &r, JoinKind::Left)?;
        assert_eq!(out.row_count(), 1);
        assert_eq!(out.value(0, "station_name")?, &Value::Text("as logged".into()));
        assert_eq!(
            out.value(0, "station_name_station")?,
            &Value::Text("logger copy".into())
        );
        assert_eq!(
            out.value(0, "station_name_station_station")?,
            &Value::Text("Central Park".into())
        );
        Ok(())
    }

    #[test]
    fn test_stations_left_and_validation() -> Result<()> {
        let r = readings(&["STN_001", "STN_999"]);
        let s = stations();

        let (out, _) = join_stations_with_readings(&s, &r, JoinKind::StationsLeft)?;
        assert_eq!(out.row_count(), 3);
        assert_eq!(out.value(1, "station_id")?, &Value::Text("STN_002".into()));
        assert!(out.value(1, "temperature_c")?.is_missing());

        let (out, report) = join_stations_with_readings(&s, &r, JoinKind::Validation)?;
        assert_eq!(out.row_count(), 4);
        let statuses: Vec<&str> = out.text_column("join_status")?.iter().flatten().collect();
        assert_eq!(
            statuses,
            vec!["matched", "orphan_reading", "station_without_readings", "station_without_readings"]
        );
        assert_eq!(report.output_rows, 4);
        Ok(())
    }

    #[test]
    fn test_key_errors() {
        let s = stations();

        let err = join_stations_with_readings(&s, &readings(&["X1", "X2"]), JoinKind::Inner).unwrap_err();
        assert!(matches!(err, ProcessingError::JoinKey(_)));

        let err = JoinReconciler::new()
            .with_key_column("site")
            .join(&s, &readings(&["STN_001"]), JoinKind::Inner)
            .unwrap_err();
        assert!(err.to_string().contains("site"));

        let err = JoinReconciler::new()
            .strict(true)
            .join(&s, &readings(&["STN_001", "STN_999"]), JoinKind::Left)
            .unwrap_err();
        assert!(err.to_string().contains("STN_999"));
    }

    #[test]
    fn test_near_misses_reported_not_corrected() -> Result<()> {
        let r = readings(&["STN_001", "stn_002", " STN_003"]);
        let (out, report) = join_stations_with_readings(&stations(), &r, JoinKind::Inner)?;
        assert_eq!(out.row_count(), 1);
        assert_eq!(
            report.near_misses,
            vec![
                NearMiss {
                    reading_key: " STN_003".into(),
                    station_key: "STN_003".into(),
                    kind: NearMissKind::Whitespace,
                },
                NearMiss {
                    reading_key: "stn_002".into(),
                    station_key: "STN_002".into(),
                    kind: NearMissKind::Case,
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_duplicate_station_keys_first_wins() -> Result<()> {
        let s = stations_to_table(&[
            Station::new("STN_001", "First", 1.5, 1.5, None, "urban"),
            Station::new("STN_001", "Second", 2.5, 2.5, None, "urban"),
        ])?;
        let (out, report) = join_stations_with_readings(&s, &readings(&["STN_001"]), JoinKind::Left)?;
        assert_eq!(out.row_count(), 1);
        assert_eq!(out.value(0, "station_name")?, &Value::Text("First".into()));
        assert_eq!(report.duplicate_station_keys, vec!["STN_001".to_string()]);
        Ok(())
    }

    #[test]
    fn test_empty_readings_join_cleanly() -> Result<()> {
        let r = readings(&[]);
        let (out, report) = join_stations_with_readings(&stations(), &r, JoinKind::Left)?;
        assert!(out.is_empty());
        assert_eq!(report.unmatched_ratio, 0.0);
        assert!(!report.exceeds_tolerance);
        Ok(())
    }
}
