use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::analyzers::TemporalAnalyzer;
use crate::cli::args::{Cli, Commands, TableKind};
use crate::config::{EmptyGroupPolicy, PipelineConfig};
use crate::models::{Reading, Station, Table};
use crate::processors::{
    environmental_filter, Condition, CoordinateValidator, FilterEngine, FilterPreset, FilterSpec,
    JoinKind, JoinReconciler, StationAggregator,
};
use crate::readers::{TableReader, TableSummary};
use crate::utils::constants::{
    COL_DATA_QUALITY, COL_DISTANCE_KM, COL_LATITUDE, COL_LONGITUDE, COL_STATION_ID,
};
use crate::utils::{
    generate_default_output_filename, generate_output_filename_in, with_distance_column,
    ProgressReporter,
};
use crate::writers::{CsvExporter, ExportSummary};

pub fn run(cli: Cli) -> Result<()> {
    setup_logging(cli.verbose, cli.log_file.as_deref())?;

    let config = PipelineConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Invalid configuration in environment".to_string(),
    })?;
    debug!("Configuration: {:?}", config);

    match cli.command {
        Commands::Explore { input, kind } => {
            let (_, summary) = load_table(&config, &input, kind)?;
            println!("{}", summary.report());
        }

        Commands::Validate {
            stations,
            output_file,
            report_only,
        } => {
            let (table, _) = load_table(&config, &stations, TableKind::Stations)?;
            let validator = CoordinateValidator::with_config(config.validation.clone());
            let report = validator
                .validate(&table)
                .context("Coordinate validation failed")?;
            println!("{}", validator.generate_summary(&report));

            if !report_only {
                let annotated = validator.annotate(&table, &report)?;
                let path = output_file.unwrap_or_else(|| generate_default_output_filename("validated"));
                export_table(&config, &annotated, &path)?;
            }
        }

        Commands::Filter {
            input,
            spec,
            preset,
            min_temp,
            max_temp,
            quality,
            near,
            radius_km,
            output_file,
        } => {
            let (mut table, _) = load_table(&config, &input, TableKind::Auto)?;

            let mut filter_spec = match (spec, preset) {
                (Some(path), _) => FilterSpec::from_path(&path)
                    .with_context(|| format!("Failed to read filter spec {}", path.display()))?,
                (None, Some(path)) => read_preset(&path)?.to_spec(),
                (None, None) => FilterSpec::new(),
            };
            if let (Some(min), Some(max)) = (min_temp, max_temp) {
                filter_spec = filter_spec.and_group(environmental_filter(
                    min,
                    max,
                    quality.as_deref().unwrap_or("good"),
                ));
            } else if let Some(q) = &quality {
                filter_spec = filter_spec.and(Condition::eq(COL_DATA_QUALITY, q.as_str()));
            }
            if let Some(point) = near {
                table = with_distance_column(&table, COL_LATITUDE, COL_LONGITUDE, point, COL_DISTANCE_KM)
                    .context("Distance filtering needs latitude and longitude columns")?;
                if let Some(radius) = radius_km {
                    filter_spec = filter_spec.and(Condition::le(COL_DISTANCE_KM, radius));
                }
            }

            let (filtered, stats) = FilterEngine::new().filter(&table, &filter_spec)?;
            println!("{}", stats.summary());

            let path = output_file.unwrap_or_else(|| generate_default_output_filename("filtered"));
            export_table(&config, &filtered, &path)?;
        }

        Commands::Aggregate {
            input,
            stations,
            report_empty,
            output_file,
        } => {
            let (readings, _) = load_table(&config, &input, TableKind::Readings)?;
            let mut aggregator = StationAggregator::with_config(config.aggregation.clone());
            if let Some(path) = stations {
                let (station_table, _) = load_table(&config, &path, TableKind::Stations)?;
                let policy = if report_empty {
                    EmptyGroupPolicy::Report
                } else {
                    config.aggregation.empty_groups
                };
                aggregator = aggregator.with_roster(station_ids(&station_table)?, policy);
            }

            let (summary_table, report) = aggregator.aggregate(&readings)?;
            println!("{}", aggregator.generate_summary(&report));

            let path = output_file.unwrap_or_else(|| generate_default_output_filename("stations"));
            export_table(&config, &summary_table, &path)?;
        }

        Commands::Join {
            readings,
            stations,
            how,
            strict,
            output_file,
        } => {
            let (reading_table, _) = load_table(&config, &readings, TableKind::Readings)?;
            let (station_table, _) = load_table(&config, &stations, TableKind::Stations)?;

            let reconciler = JoinReconciler::with_config(config.join.clone())
                .strict(strict || config.join.strict);
            let (joined, report) = reconciler
                .join(&station_table, &reading_table, how.into())
                .context("Join failed")?;
            println!("{}", reconciler.generate_summary(&report));

            let path = output_file.unwrap_or_else(|| generate_default_output_filename("joined"));
            export_table(&config, &joined, &path)?;
        }

        Commands::Temporal {
            input,
            window,
            value_column,
            global,
            output_file,
        } => {
            let (readings, _) = load_table(&config, &input, TableKind::Readings)?;

            let mut analyzer = TemporalAnalyzer::with_config(config.temporal.clone());
            if let Some(window) = window {
                analyzer = analyzer.with_window(window);
            }
            if let Some(column) = &value_column {
                analyzer = analyzer.with_value_column(column);
            }
            if global {
                analyzer = analyzer.with_group_column(None);
            }

            let (series, result) = analyzer.analyze(&readings)?;
            println!("{}", analyzer.generate_summary(&result));

            let path = output_file.unwrap_or_else(|| generate_default_output_filename("temporal"));
            export_table(&config, &series, &path)?;
        }

        Commands::Run {
            stations,
            readings,
            spec,
            output_dir,
            quiet,
        } => {
            run_pipeline(&config, &stations, &readings, spec.as_deref(), &output_dir, quiet)?;
        }
    }

    Ok(())
}

/// Full pipeline: validate stations, filter readings, join, aggregate and analyse
fn run_pipeline(
    config: &PipelineConfig,
    stations_path: &Path,
    readings_path: &Path,
    spec_path: Option<&Path>,
    output_dir: &Path,
    quiet: bool,
) -> Result<Vec<ExportSummary>> {
    let progress = ProgressReporter::new(6, "Loading input tables", quiet);
    let mut exports = Vec::new();

    // A stage that selects nothing still writes its (header-only) file
    let mut config = config.clone();
    config.export.allow_empty = true;
    let config = &config;

    let (stations, _) = load_table(config, stations_path, TableKind::Stations)?;
    let (readings, _) = load_table(config, readings_path, TableKind::Readings)?;

    progress.stage("Validating coordinates");
    let validator = CoordinateValidator::with_config(config.validation.clone());
    let validation = validator.validate(&stations)?;
    progress.println(&validator.generate_summary(&validation));
    let annotated = validator.annotate(&stations, &validation)?;
    exports.push(export_table(
        config,
        &annotated,
        &generate_output_filename_in(output_dir, "validated"),
    )?);

    progress.stage("Filtering readings");
    let spec = match spec_path {
        Some(path) => FilterSpec::from_path(path)
            .with_context(|| format!("Failed to read filter spec {}", path.display()))?,
        None => FilterSpec::new(),
    };
    let (filtered, stats) = FilterEngine::without_removal_reasons().filter(&readings, &spec)?;
    progress.println(&stats.summary());

    progress.stage("Joining readings with stations");
    let reconciler = JoinReconciler::with_config(config.join.clone());
    let (joined, join_report) = reconciler.join(&stations, &filtered, JoinKind::Left)?;
    progress.println(&reconciler.generate_summary(&join_report));
    exports.push(export_table(
        config,
        &joined,
        &generate_output_filename_in(output_dir, "joined"),
    )?);

    progress.stage("Aggregating per station");
    let aggregator = StationAggregator::with_config(config.aggregation.clone())
        .with_roster(station_ids(&stations)?, config.aggregation.empty_groups);
    let (station_summary, aggregation) = aggregator.aggregate(&filtered)?;
    progress.println(&aggregator.generate_summary(&aggregation));
    exports.push(export_table(
        config,
        &station_summary,
        &generate_output_filename_in(output_dir, "stations"),
    )?);

    progress.stage("Analysing time series");
    let analyzer = TemporalAnalyzer::with_config(config.temporal.clone());
    let (series, temporal) = analyzer.analyze(&filtered)?;
    progress.println(&analyzer.generate_summary(&temporal));
    exports.push(export_table(
        config,
        &series,
        &generate_output_filename_in(output_dir, "temporal"),
    )?);

    progress.stage("Done");
    progress.finish_with_message(&format!(
        "Pipeline complete: {} files written to {}",
        exports.len(),
        output_dir.display()
    ));
    info!("Pipeline wrote {} files", exports.len());

    Ok(exports)
}

fn load_table(config: &PipelineConfig, path: &Path, kind: TableKind) -> Result<(Table, TableSummary)> {
    let mut reader = TableReader::new()
        .with_delimiter(config.loader.delimiter_byte())
        .with_missing_tokens(&config.loader.extra_missing_tokens);
    reader = match kind {
        TableKind::Stations => reader.with_schema(&Station::schema()),
        TableKind::Readings => reader.with_schema(&Reading::schema()),
        TableKind::Auto => reader,
    };
    reader
        .read(path)
        .with_context(|| format!("Failed to load {}", path.display()))
}

fn read_preset(path: &Path) -> Result<FilterPreset> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read filter preset {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Malformed filter preset {}", path.display()))
}

fn station_ids(stations: &Table) -> Result<Vec<String>> {
    Ok(stations
        .text_column(COL_STATION_ID)?
        .iter()
        .flatten()
        .map(str::to_string)
        .collect())
}

fn export_table(config: &PipelineConfig, table: &Table, path: &Path) -> Result<ExportSummary> {
    let exporter = CsvExporter::with_config(config.export.clone());
    let summary = exporter
        .export(table, path)
        .with_context(|| format!("Failed to export {}", path.display()))?;
    println!("{}", exporter.generate_summary(&summary));
    Ok(summary)
}

/// Set up structured logging to stderr and optionally a log file
fn setup_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("envmon_processor={}", log_level)));

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_timer(fmt::time::uptime())
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()
        .context("Failed to initialise logging")?;

    debug!("Logging initialized at level: {}", log_level);
    Ok(())
}
