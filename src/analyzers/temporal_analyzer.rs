use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::TemporalConfig;
use crate::error::{ProcessingError, Result};
use crate::models::{Column, ColumnType, Table, Value};
use crate::utils::constants::{COL_STATION_ID, EXPECTED_INTERVAL_DAYS};
use crate::utils::stats;

/// Group label used when the whole table is analysed as one series
pub const GLOBAL_SERIES: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Flat,
    InsufficientData,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Flat => "flat",
            Trend::InsufficientData => "insufficient_data",
        };
        f.write_str(label)
    }
}

/// Run of expected calendar days with no observation, between two observed dates
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GapInterval {
    pub after: NaiveDate,
    pub before: NaiveDate,
    pub missing_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: Option<f64>,
    pub rolling_mean: Option<f64>,
    /// Days since the previous observation; `None` for the first point
    pub interval_days: Option<i64>,
    pub irregular: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyMean {
    pub year: i32,
    pub month: u32,
    pub mean: f64,
    pub count: usize,
}

/// Calendar quarter (1 = Jan-Mar)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuarterlyMean {
    pub year: i32,
    pub quarter: u32,
    pub mean: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationTemporalAnalysis {
    pub station_id: String,
    pub observations: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    /// Distinct observed days over days spanned; `None` for fewer than two distinct dates
    pub completeness: Option<f64>,
    pub gaps: Vec<GapInterval>,
    pub series: Vec<SeriesPoint>,
    pub trend: Trend,
    /// Least-squares slope in value units per day
    pub slope: Option<f64>,
    /// Pearson correlation between day offset and value
    pub time_correlation: Option<f64>,
    pub monthly_means: Vec<MonthlyMean>,
    pub quarterly_means: Vec<QuarterlyMean>,
}

impl StationTemporalAnalysis {
    pub fn total_missing_days(&self) -> i64 {
        self.gaps.iter().map(|g| g.missing_days).sum()
    }

    pub fn irregular_points(&self) -> usize {
        self.series.iter().filter(|p| p.irregular).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemporalAnalysisResult {
    pub value_column: String,
    pub window: usize,
    pub stations: BTreeMap<String, StationTemporalAnalysis>,
    /// Rows without a date
    pub undated_rows: usize,
    /// Rows without a group key
    pub unkeyed_rows: usize,
}

impl TemporalAnalysisResult {
    pub fn station(&self, station_id: &str) -> Option<&StationTemporalAnalysis> {
        self.stations.get(station_id)
    }
}

pub struct TemporalAnalyzer {
    config: TemporalConfig,
}

impl TemporalAnalyzer {
    pub fn new() -> Self {
        Self {
            config: TemporalConfig::default(),
        }
    }

    pub fn with_config(config: TemporalConfig) -> Self {
        Self { config }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.config.window = window;
        self
    }

    pub fn with_value_column(mut self, column: &str) -> Self {
        self.config.value_column = column.to_string();
        self
    }

    /// `None` treats the table as a single series
    pub fn with_group_column(mut self, column: Option<&str>) -> Self {
        self.config.group_column = column.map(str::to_string);
        self
    }

    pub fn analyze(&self, table: &Table) -> Result<(Table, TemporalAnalysisResult)> {
        if self.config.window == 0 {
            return Err(ProcessingError::Config(
                "rolling window must be at least 1".to_string(),
            ));
        }

        let dates = table.date_column(&self.config.date_column)?;
        let values = table.number_column(&self.config.value_column)?;
        let group_idx = match &self.config.group_column {
            Some(name) => Some(table.column_index(name)?),
            None => None,
        };

        let mut groups: BTreeMap<String, Vec<(NaiveDate, Option<f64>)>> = BTreeMap::new();
        let mut undated_rows = 0;
        let mut unkeyed_rows = 0;

        for (i, row) in table.rows().iter().enumerate() {
            let key = match group_idx {
                Some(idx) if row[idx].is_missing() => {
                    unkeyed_rows += 1;
                    continue;
                }
                Some(idx) => row[idx].render(),
                None => GLOBAL_SERIES.to_string(),
            };
            let Some(date) = dates.get(i) else {
                undated_rows += 1;
                continue;
            };
            groups.entry(key).or_default().push((date, values.get(i)));
        }

        if undated_rows > 0 {
            warn!(
                "{} row(s) without '{}' skipped in temporal analysis",
                undated_rows, self.config.date_column
            );
        }
        if unkeyed_rows > 0 {
            warn!("{} row(s) without a group key skipped", unkeyed_rows);
        }

        let stations: BTreeMap<String, StationTemporalAnalysis> = groups
            .into_iter()
            .map(|(key, mut observations)| {
                // stable: duplicate dates keep input order
                observations.sort_by_key(|(date, _)| *date);
                let analysis = self.analyze_series(&key, &observations);
                (key, analysis)
            })
            .collect();

        let output = self.series_table(&stations)?;
        let result = TemporalAnalysisResult {
            value_column: self.config.value_column.clone(),
            window: self.config.window,
            stations,
            undated_rows,
            unkeyed_rows,
        };

        info!(
            "Temporal analysis of '{}' over {} series ({} points)",
            result.value_column,
            result.stations.len(),
            output.row_count()
        );

        Ok((output, result))
    }

    fn analyze_series(
        &self,
        station_id: &str,
        observations: &[(NaiveDate, Option<f64>)],
    ) -> StationTemporalAnalysis {
        let window = self.config.window;
        let mut series = Vec::with_capacity(observations.len());
        let mut gaps = Vec::new();

        for (i, &(date, value)) in observations.iter().enumerate() {
            let interval_days = (i > 0).then(|| (date - observations[i - 1].0).num_days());
            if let Some(days) = interval_days {
                if days > EXPECTED_INTERVAL_DAYS {
                    gaps.push(GapInterval {
                        after: observations[i - 1].0,
                        before: date,
                        missing_days: days - EXPECTED_INTERVAL_DAYS,
                    });
                }
            }

            let rolling_mean = if i + 1 >= window {
                observations[i + 1 - window..=i]
                    .iter()
                    .map(|(_, v)| *v)
                    .collect::<Option<Vec<f64>>>()
                    .and_then(|w| stats::mean(&w))
            } else {
                None
            };

            series.push(SeriesPoint {
                date,
                value,
                rolling_mean,
                interval_days,
                irregular: interval_days.is_some_and(|d| d != EXPECTED_INTERVAL_DAYS),
            });
        }

        let first_date = observations.first().map(|(d, _)| *d);
        let last_date = observations.last().map(|(d, _)| *d);
        let mut distinct: Vec<NaiveDate> = observations.iter().map(|(d, _)| *d).collect();
        distinct.dedup();

        let completeness = match (first_date, last_date) {
            (Some(first), Some(last)) if distinct.len() > 1 => {
                let span = (last - first).num_days() + 1;
                Some(distinct.len() as f64 / span as f64)
            }
            _ => None,
        };

        let points: Vec<(f64, f64)> = match first_date {
            Some(origin) => observations
                .iter()
                .filter_map(|(date, value)| value.map(|v| ((*date - origin).num_days() as f64, v)))
                .collect(),
            None => Vec::new(),
        };
        let (trend, slope) = self.trend(&points);

        debug!(
            "{}: {} observations, {} gap(s), trend {}",
            station_id,
            observations.len(),
            gaps.len(),
            trend
        );

        StationTemporalAnalysis {
            station_id: station_id.to_string(),
            observations: observations.len(),
            first_date,
            last_date,
            completeness,
            gaps,
            series,
            trend,
            slope,
            time_correlation: stats::pearson_correlation(&points),
            monthly_means: monthly_means(observations),
            quarterly_means: quarterly_means(observations),
        }
    }

    fn trend(&self, points: &[(f64, f64)]) -> (Trend, Option<f64>) {
        if points.len() < 2 {
            return (Trend::InsufficientData, None);
        }

        match stats::least_squares_slope(points) {
            Some(slope) if slope.abs() <= self.config.flat_slope_threshold => (Trend::Flat, Some(slope)),
            Some(slope) if slope > 0.0 => (Trend::Increasing, Some(slope)),
            Some(slope) => (Trend::Decreasing, Some(slope)),
            None => (Trend::InsufficientData, None),
        }
    }

    fn series_table(&self, stations: &BTreeMap<String, StationTemporalAnalysis>) -> Result<Table> {
        let key_column = self
            .config
            .group_column
            .clone()
            .unwrap_or_else(|| COL_STATION_ID.to_string());
        let mut table = Table::new(vec![
            Column::new(key_column, ColumnType::Text),
            Column::new(self.config.date_column.as_str(), ColumnType::Date),
            Column::new(self.config.value_column.as_str(), ColumnType::Number),
            Column::new("rolling_mean", ColumnType::Number),
            Column::new("interval_days", ColumnType::Number),
            Column::new("irregular", ColumnType::Text),
        ])?;

        for (key, analysis) in stations {
            for point in &analysis.series {
                table.push_row(vec![
                    Value::Text(key.clone()),
                    Value::Date(point.date),
                    Value::from_option_f64(point.value),
                    Value::from_option_f64(point.rolling_mean),
                    Value::from_option_f64(point.interval_days.map(|d| d as f64)),
                    Value::Text(point.irregular.to_string()),
                ])?;
            }
        }
        Ok(table)
    }

    pub fn generate_summary(&self, result: &TemporalAnalysisResult) -> String {
        let mut summary = String::new();
        summary.push_str("=== Temporal Analysis ===\n");
        summary.push_str(&format!(
            "Value: {}  Rolling window: {}\n",
            result.value_column, result.window
        ));
        if result.undated_rows > 0 {
            summary.push_str(&format!("Rows without a date: {}\n", result.undated_rows));
        }

        for analysis in result.stations.values() {
            summary.push_str(&format!("\n{}\n", analysis.station_id));
            if let (Some(first), Some(last)) = (analysis.first_date, analysis.last_date) {
                summary.push_str(&format!(
                    "  Period: {} to {} ({} observations)\n",
                    first, last, analysis.observations
                ));
            }
            match analysis.completeness {
                Some(c) => summary.push_str(&format!("  Completeness: {:.1}%\n", c * 100.0)),
                None => summary.push_str("  Completeness: undefined\n"),
            }
            for gap in &analysis.gaps {
                summary.push_str(&format!(
                    "  Gap: {} missing day(s) between {} and {}\n",
                    gap.missing_days, gap.after, gap.before
                ));
            }
            if analysis.gaps.len() > 1 {
                summary.push_str(&format!(
                    "  Missing days in total: {}\n",
                    analysis.total_missing_days()
                ));
            }
            match analysis.slope {
                Some(slope) => summary.push_str(&format!(
                    "  Trend: {} ({:+.4} per day)\n",
                    analysis.trend, slope
                )),
                None => summary.push_str(&format!("  Trend: {}\n", analysis.trend)),
            }
            if let Some(r) = analysis.time_correlation {
                summary.push_str(&format!("  Time/value correlation: {:+.3}\n", r));
            }
            for m in &analysis.monthly_means {
                summary.push_str(&format!(
                    "  {}-{:02}: mean {:.2} over {} value(s)\n",
                    m.year, m.month, m.mean, m.count
                ));
            }
            for q in &analysis.quarterly_means {
                summary.push_str(&format!(
                    "  {} Q{}: mean {:.2} over {} value(s)\n",
                    q.year, q.quarter, q.mean, q.count
                ));
            }
        }
        summary
    }
}

impl Default for TemporalAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn monthly_means(observations: &[(NaiveDate, Option<f64>)]) -> Vec<MonthlyMean> {
    let mut months: BTreeMap<(i32, u32), Vec<f64>> = BTreeMap::new();
    for (date, value) in observations {
        if let Some(v) = value {
            months.entry((date.year(), date.month())).or_default().push(*v);
        }
    }
    months
        .into_iter()
        .filter_map(|((year, month), values)| {
            stats::mean(&values).map(|mean| MonthlyMean {
                year,
                month,
                mean,
                count: values.len(),
            })
        })
        .collect()
}

fn quarterly_means(observations: &[(NaiveDate, Option<f64>)]) -> Vec<QuarterlyMean> {
    let mut quarters: BTreeMap<(i32, u32), Vec<f64>> = BTreeMap::new();
    for (date, value) in observations {
        if let Some(v) = value {
            quarters
                .entry((date.year(), date.month0() / 3 + 1))
                .or_default()
                .push(*v);
        }
    }
    quarters
        .into_iter()
        .filter_map(|((year, quarter), values)| {
            stats::mean(&values).map(|mean| QuarterlyMean {
                year,
                quarter,
                mean,
                count: values.len(),
            })
        })
        .collect()
}

/// Analyse `table` per station with the given rolling window
pub fn analyze_temporal(table: &Table, window: usize) -> Result<(Table, TemporalAnalysisResult)> {
    TemporalAnalyzer::new().with_window(window).analyze(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{readings_to_table, DataQuality, Reading};
    use pretty_assertions::assert_eq;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, d).unwrap()
    }

    fn series(station: &str, points: &[(u32, Option<f64>)]) -> Vec<Reading> {
        points
            .iter()
            .map(|(d, t)| Reading::new(station, day(*d), *t, None, DataQuality::Good))
            .collect()
    }

    #[test]
    fn test_gap_detection() -> Result<()> {
        let table = readings_to_table(&series(
            "STN_001",
            &[(15, Some(20.0)), (16, Some(21.0)), (17, Some(22.0)), (20, Some(23.0))],
        ))?;
        let (_, result) = analyze_temporal(&table, 3)?;
        let stn = result.station("STN_001").unwrap();

        assert_eq!(
            stn.gaps,
            vec![GapInterval {
                after: day(17),
                before: day(20),
                missing_days: 2,
            }]
        );
        assert_eq!(stn.completeness, Some(4.0 / 6.0));
        assert_eq!(stn.irregular_points(), 1);
        assert_eq!(stn.trend, Trend::Increasing);
        Ok(())
    }

    #[test]
    fn test_unsorted_input_is_sorted_and_rolled() -> Result<()> {
        let table = readings_to_table(&series(
            "STN_001",
            &[(3, Some(3.0)), (1, Some(1.0)), (4, None), (2, Some(2.0)), (5, Some(5.0))],
        ))?;
        let (out, result) = analyze_temporal(&table, 2)?;
        let stn = result.station("STN_001").unwrap();

        let dates: Vec<NaiveDate> = stn.series.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![day(1), day(2), day(3), day(4), day(5)]);
        let rolling: Vec<Option<f64>> = stn.series.iter().map(|p| p.rolling_mean).collect();
        assert_eq!(rolling, vec![None, Some(1.5), Some(2.5), None, None]);
        assert!(stn.gaps.is_empty());
        assert_eq!(stn.completeness, Some(1.0));

        assert_eq!(out.row_count(), 5);
        assert!(out.value(3, "rolling_mean")?.is_missing());
        Ok(())
    }

    #[test]
    fn test_trend_labels() -> Result<()> {
        let mut rows = series("DOWN", &[(1, Some(9.0)), (2, Some(6.0)), (3, Some(3.0))]);
        rows.extend(series("FLAT", &[(1, Some(5.0)), (2, Some(5.0)), (3, Some(5.0))]));
        rows.extend(series("ONE", &[(1, Some(5.0))]));
        rows.extend(series("SAMEDAY", &[(1, Some(5.0)), (1, Some(7.0))]));
        let (_, result) = analyze_temporal(&readings_to_table(&rows)?, 3)?;

        assert_eq!(result.station("DOWN").unwrap().trend, Trend::Decreasing);
        assert_eq!(result.station("FLAT").unwrap().trend, Trend::Flat);

        let one = result.station("ONE").unwrap();
        assert_eq!(one.trend, Trend::InsufficientData);
        assert_eq!(one.completeness, None);

        let same_day = result.station("SAMEDAY").unwrap();
        assert_eq!(same_day.trend, Trend::InsufficientData);
        assert_eq!(same_day.series[1].interval_days, Some(0));
        assert!(same_day.series[1].irregular);
        Ok(())
    }

    #[test]
    fn test_global_series_and_monthly_means() -> Result<()> {
        let mut rows = series("A", &[(30, Some(10.0)), (31, Some(20.0))]);
        rows.push(Reading::new(
            "B",
            NaiveDate::from_ymd_opt(2023, 2, 1).unwrap(),
            Some(30.0),
            None,
            DataQuality::Good,
        ));
        let analyzer = TemporalAnalyzer::new().with_group_column(None);
        let (out, result) = analyzer.analyze(&readings_to_table(&rows)?)?;

        assert_eq!(result.stations.len(), 1);
        let all = result.station(GLOBAL_SERIES).unwrap();
        assert_eq!(
            all.monthly_means,
            vec![
                MonthlyMean { year: 2023, month: 1, mean: 15.0, count: 2 },
                MonthlyMean { year: 2023, month: 2, mean: 30.0, count: 1 },
            ]
        );
        assert_eq!(out.value(0, "station_id")?, &Value::Text("all".into()));
        assert!(analyzer.generate_summary(&result).contains("Trend: increasing"));
        Ok(())
    }

    #[test]
    fn test_quarterly_means_and_correlation() -> Result<()> {
        let on = |m: u32, d: u32| NaiveDate::from_ymd_opt(2023, m, d).unwrap();
        let rows: Vec<Reading> = [(1, 10, 4.0), (3, 20, 8.0), (4, 1, 12.0), (7, 15, 25.0), (9, 30, 27.0)]
            .iter()
            .map(|&(m, d, t)| Reading::new("STN_001", on(m, d), Some(t), None, DataQuality::Good))
            .collect();
        let analyzer = TemporalAnalyzer::new();
        let (_, result) = analyzer.analyze(&readings_to_table(&rows)?)?;
        let stn = result.station("STN_001").unwrap();

        assert_eq!(
            stn.quarterly_means,
            vec![
                QuarterlyMean { year: 2023, quarter: 1, mean: 6.0, count: 2 },
                QuarterlyMean { year: 2023, quarter: 2, mean: 12.0, count: 1 },
                QuarterlyMean { year: 2023, quarter: 3, mean: 26.0, count: 2 },
            ]
        );
        assert!(stn.time_correlation.unwrap() > 0.9);
        assert!(stn.total_missing_days() > 0);

        let summary = analyzer.generate_summary(&result);
        assert!(summary.contains("2023 Q3: mean 26.00"));
        assert!(summary.contains("Time/value correlation: +"));
        assert!(summary.contains("Missing days in total"));

        let flat = readings_to_table(&series("FLAT", &[(1, Some(5.0)), (2, Some(5.0))]))?;
        let (_, result) = analyze_temporal(&flat, 1)?;
        assert_eq!(result.station("FLAT").unwrap().time_correlation, None);
        Ok(())
    }

    #[test]
    fn test_requires_date_column() -> Result<()> {
        let table = readings_to_table(&series("A", &[(1, Some(1.0))]))?;
        let analyzer = TemporalAnalyzer::with_config(TemporalConfig {
            date_column: "timestamp".to_string(),
            ..TemporalConfig::default()
        });
        assert!(matches!(
            analyzer.analyze(&table),
            Err(ProcessingError::ColumnNotFound { .. })
        ));

        let (out, result) = analyze_temporal(&readings_to_table(&[])?, 3)?;
        assert!(out.is_empty());
        assert!(result.stations.is_empty());
        Ok(())
    }
}
