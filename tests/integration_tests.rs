use chrono::NaiveDate;
use envmon_processor::analyzers::analyze_temporal;
use envmon_processor::config::{EmptyGroupPolicy, ExportFormat};
use envmon_processor::models::{
    readings_from_table, readings_to_table, stations_to_table, DataQuality, Reading, Station, Table,
    Value,
};
use envmon_processor::processors::{
    aggregate_by_station, filter, join_stations_with_readings, validate_coordinates, Condition,
    FilterSpec, JoinKind, StationAggregator,
};
use envmon_processor::readers::{load_readings, load_stations};
use envmon_processor::writers::export;
use envmon_processor::{ProcessingError, Result};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::fs;
use tempfile::TempDir;
use validator::Validate;

const STATIONS_CSV: &str = "\
station_id,station_name,latitude,longitude,elevation_m,station_type
STN_001,Central Park,40.7829,-73.9654,42,urban
STN_002,Phoenix Sky Harbor,33.4342,-112.0116,337,airport
STN_003,Tucson,32.1161,-110.9395,NA,rural
STN_004,Flagstaff,35.1983,-111.6513,2135,mountain
";

const READINGS_CSV: &str = "\
station_id,date,temperature_c,humidity_percent,data_quality
STN_001,2023-01-15,2.5,65,good
STN_001,2023-01-16,3.1,60,good
STN_001,2023-01-17,,58,fair
STN_001,2023-01-20,4.0,55,good
STN_002,2023-01-15,18.2,20,good
STN_002,2023-01-16,19.0,22,poor
STN_002,2023-01-17,21.4,18,good
STN_003,2023-01-15,16.0,N/A,good
STN_099,2023-01-15,10.0,40,good
";

fn write_inputs(dir: &TempDir) -> Result<(std::path::PathBuf, std::path::PathBuf)> {
    let stations = dir.path().join("stations.csv");
    let readings = dir.path().join("readings.csv");
    fs::write(&stations, STATIONS_CSV)?;
    fs::write(&readings, READINGS_CSV)?;
    Ok((stations, readings))
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn test_load_counts_every_data_line() -> Result<()> {
    let dir = TempDir::new()?;
    let (stations_path, readings_path) = write_inputs(&dir)?;

    let (stations, summary) = load_stations(&stations_path)?;
    assert_eq!(stations.row_count(), STATIONS_CSV.lines().count() - 1);
    assert_eq!(summary.column("station_id").unwrap().unparseable, 0);
    assert_eq!(summary.column("station_id").unwrap().missing, 0);
    assert_eq!(summary.column("elevation_m").unwrap().missing, 1);

    let (readings, summary) = load_readings(&readings_path)?;
    assert_eq!(readings.row_count(), READINGS_CSV.lines().count() - 1);
    assert_eq!(summary.column("temperature_c").unwrap().missing, 1);

    // typed records validate against their declared ranges
    for reading in readings_from_table(&readings)? {
        assert!(reading.validate().is_ok());
    }
    Ok(())
}

#[test]
fn test_missing_and_empty_inputs_are_data_source_errors() -> Result<()> {
    let dir = TempDir::new()?;
    let missing = dir.path().join("nope.csv");
    assert!(matches!(
        load_stations(&missing),
        Err(ProcessingError::DataSource { .. })
    ));

    let empty = dir.path().join("empty.csv");
    fs::write(&empty, "")?;
    let err = load_readings(&empty).unwrap_err();
    assert!(matches!(err, ProcessingError::DataSource { .. }));
    assert!(err.to_string().contains("empty.csv"));
    Ok(())
}

#[test]
fn test_coordinate_scenario_scores_half() -> Result<()> {
    let stations = stations_to_table(&[
        Station::new("STN_001", "A", 40.7, -74.0, None, "urban"),
        Station::new("STN_002", "B", 999.0, -74.0, None, "urban"),
    ])?;

    let (annotated, report) = validate_coordinates(&stations, &Default::default())?;
    assert_eq!(report.quality_score, 0.5);
    assert!(!report.rows[0].flags.out_of_range);
    assert!(report.rows[1].flags.out_of_range);
    assert_eq!(report.rows[1].station_id.as_deref(), Some("STN_002"));
    assert_eq!(annotated.row_count(), 2);
    Ok(())
}

fn ninety_five_rows() -> Table {
    let rows: Vec<Reading> = (0..95)
        .map(|i| {
            let temp = if i < 60 { 25.0 } else { 15.0 };
            let quality = if i < 45 || i >= 80 {
                DataQuality::Good
            } else {
                DataQuality::Poor
            };
            Reading::new(format!("STN_{:03}", i % 7), date(2023, 3, 1 + (i % 28) as u32), Some(temp), None, quality)
        })
        .collect();
    readings_to_table(&rows).unwrap()
}

#[test]
fn test_filter_scenario_and_breakdown() -> Result<()> {
    let table = ninety_five_rows();
    let spec = FilterSpec::new()
        .and(Condition::gt("temperature_c", 20.0))
        .and(Condition::eq("data_quality", "good"));

    let (out, stats) = filter(&table, &spec)?;
    assert_eq!(out.row_count(), 45);
    assert_eq!(stats.removed_rows, 50);
    assert_eq!(stats.conditions[0].failed_rows, 35);
    assert_eq!(stats.conditions[1].failed_rows, 35);

    let both = stats.removed.iter().filter(|r| r.violated.len() == 2).count();
    assert_eq!(
        stats.conditions[0].failed_rows + stats.conditions[1].failed_rows - both,
        stats.removed_rows
    );
    assert!(stats.removed.iter().all(|r| !r.violated.is_empty()));

    // every kept row satisfies both conditions
    for i in 0..out.row_count() {
        assert!(out.value(i, "temperature_c")?.as_f64().unwrap() > 20.0);
        assert_eq!(out.value(i, "data_quality")?, &Value::Text("good".into()));
    }

    let (again, _) = filter(&out, &spec)?;
    assert_eq!(again, out);
    Ok(())
}

#[test]
fn test_aggregate_one_row_per_station() -> Result<()> {
    let dir = TempDir::new()?;
    let (_, readings_path) = write_inputs(&dir)?;
    let (readings, _) = load_readings(&readings_path)?;

    let (out, report) = aggregate_by_station(&readings)?;
    let distinct: BTreeSet<&str> = readings
        .text_column("station_id")?
        .iter()
        .flatten()
        .collect();
    assert_eq!(out.row_count(), distinct.len());

    let ids: Vec<&str> = out.text_column("station_id")?.iter().flatten().collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    let total: f64 = out.number_column("reading_count")?.iter().flatten().sum();
    assert_eq!(total as usize, readings.row_count());

    let stn_003 = report.station("STN_003").unwrap();
    assert_eq!(stn_003.field("temperature_c").unwrap().std, None);
    Ok(())
}

#[test]
fn test_empty_group_policy_with_roster() -> Result<()> {
    let dir = TempDir::new()?;
    let (stations_path, readings_path) = write_inputs(&dir)?;
    let (readings, _) = load_readings(&readings_path)?;
    let (stations, _) = load_stations(&stations_path)?;
    let roster: Vec<String> = stations
        .text_column("station_id")?
        .iter()
        .flatten()
        .map(str::to_string)
        .collect();

    let (omitted, report) = StationAggregator::new()
        .with_roster(roster.clone(), EmptyGroupPolicy::Omit)
        .aggregate(&readings)?;
    assert_eq!(report.empty_stations, vec!["STN_004".to_string()]);
    assert_eq!(omitted.row_count(), 4);

    let (reported, _) = StationAggregator::new()
        .with_roster(roster, EmptyGroupPolicy::Report)
        .aggregate(&readings)?;
    assert_eq!(reported.row_count(), 5);
    Ok(())
}

#[test]
fn test_inner_join_bounded_by_left_join() -> Result<()> {
    let dir = TempDir::new()?;
    let (stations_path, readings_path) = write_inputs(&dir)?;
    let (stations, _) = load_stations(&stations_path)?;
    let (readings, _) = load_readings(&readings_path)?;

    let (inner, report) = join_stations_with_readings(&stations, &readings, JoinKind::Inner)?;
    let (left, _) = join_stations_with_readings(&stations, &readings, JoinKind::Left)?;
    assert!(inner.row_count() < left.row_count());
    assert_eq!(report.orphan_keys, vec!["STN_099".to_string()]);
    assert_eq!(report.stations_without_readings, vec!["STN_004".to_string()]);

    // equality once every reading has a station
    let spec = FilterSpec::new().and(Condition::ne("station_id", "STN_099"));
    let (matched_only, _) = filter(&readings, &spec)?;
    let (inner, report) = join_stations_with_readings(&stations, &matched_only, JoinKind::Inner)?;
    let (left, _) = join_stations_with_readings(&stations, &matched_only, JoinKind::Left)?;
    assert_eq!(inner.row_count(), left.row_count());
    assert_eq!(report.orphan_readings, 0);
    assert!(!report.exceeds_tolerance);
    Ok(())
}

#[test]
fn test_gap_scenario() -> Result<()> {
    let dir = TempDir::new()?;
    let (_, readings_path) = write_inputs(&dir)?;
    let (readings, _) = load_readings(&readings_path)?;

    let (_, result) = analyze_temporal(&readings, 3)?;
    let stn = result.station("STN_001").unwrap();
    assert_eq!(stn.gaps.len(), 1);
    assert_eq!(stn.gaps[0].missing_days, 2);
    assert_eq!(stn.gaps[0].after, date(2023, 1, 17));

    let single = result.station("STN_003").unwrap();
    assert_eq!(single.completeness, None);
    assert_eq!(single.trend.to_string(), "insufficient_data");
    Ok(())
}

#[test]
fn test_export_then_load_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let (stations_path, readings_path) = write_inputs(&dir)?;
    let (stations, _) = load_stations(&stations_path)?;
    let (readings, _) = load_readings(&readings_path)?;
    let (joined, _) = join_stations_with_readings(&stations, &readings, JoinKind::Left)?;

    let out_path = dir.path().join("out").join("joined.csv");
    let summary = export(&joined, &out_path, ExportFormat::Csv)?;
    assert_eq!(summary.verified_rows, joined.row_count());

    let (reloaded, _) = envmon_processor::readers::TableReader::new().read(&out_path)?;
    assert_eq!(reloaded.row_count(), joined.row_count());
    assert_eq!(reloaded.column_count(), joined.column_count());
    assert_eq!(reloaded.column_names(), joined.column_names());
    Ok(())
}
