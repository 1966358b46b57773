use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::processors::JoinKind;

#[derive(Parser)]
#[command(name = "envmon-processor")]
#[command(about = "Validate, filter, aggregate, join and analyse environmental monitoring data")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Configuration file (TOML or JSON)")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log file path")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a table and print its structural summary
    Explore {
        #[arg(short, long, help = "Input CSV file")]
        input: PathBuf,

        #[arg(long, value_enum, default_value_t = TableKind::Auto)]
        kind: TableKind,
    },

    /// Check station coordinates and report data quality
    Validate {
        #[arg(short, long, help = "Station CSV file")]
        stations: PathBuf,

        #[arg(
            short,
            long,
            help = "Write stations with flag columns [default: output/envmon-validated-{YYMMDD}.csv]"
        )]
        output_file: Option<PathBuf>,

        #[arg(long, help = "Only print the report")]
        report_only: bool,
    },

    /// Select rows with a filter specification
    Filter {
        #[arg(short, long, help = "Input CSV file")]
        input: PathBuf,

        #[arg(long, help = "JSON filter specification", conflicts_with = "preset")]
        spec: Option<PathBuf>,

        #[arg(long, help = "JSON filter preset")]
        preset: Option<PathBuf>,

        #[arg(long, help = "Minimum temperature (inclusive)", requires = "max_temp")]
        min_temp: Option<f64>,

        #[arg(long, help = "Maximum temperature (inclusive)", requires = "min_temp")]
        max_temp: Option<f64>,

        #[arg(long, help = "Required data quality")]
        quality: Option<String>,

        #[arg(long, value_parser = parse_point, help = "Reference point as LAT,LON")]
        near: Option<(f64, f64)>,

        #[arg(long, requires = "near", help = "Keep rows within this many km of --near")]
        radius_km: Option<f64>,

        #[arg(
            short,
            long,
            help = "Output CSV file [default: output/envmon-filtered-{YYMMDD}.csv]"
        )]
        output_file: Option<PathBuf>,
    },

    /// Summarise readings per station
    Aggregate {
        #[arg(short, long, help = "Readings CSV file")]
        input: PathBuf,

        #[arg(long, help = "Station CSV file used as roster for stations without readings")]
        stations: Option<PathBuf>,

        #[arg(long, requires = "stations", help = "Include roster stations without readings")]
        report_empty: bool,

        #[arg(
            short,
            long,
            help = "Output CSV file [default: output/envmon-stations-{YYMMDD}.csv]"
        )]
        output_file: Option<PathBuf>,
    },

    /// Join readings with station metadata and report key quality
    Join {
        #[arg(short, long, help = "Readings CSV file")]
        readings: PathBuf,

        #[arg(short, long, help = "Station CSV file")]
        stations: PathBuf,

        #[arg(long, value_enum, default_value_t = JoinHow::Left)]
        how: JoinHow,

        #[arg(long, help = "Fail when any reading has no station")]
        strict: bool,

        #[arg(
            short,
            long,
            help = "Output CSV file [default: output/envmon-joined-{YYMMDD}.csv]"
        )]
        output_file: Option<PathBuf>,
    },

    /// Rolling means, gaps and trends per station
    Temporal {
        #[arg(short, long, help = "Readings CSV file")]
        input: PathBuf,

        #[arg(short, long, help = "Rolling window in observations")]
        window: Option<usize>,

        #[arg(long, help = "Numeric column to analyse")]
        value_column: Option<String>,

        #[arg(long, help = "Treat the whole table as one series")]
        global: bool,

        #[arg(
            short,
            long,
            help = "Output CSV file [default: output/envmon-temporal-{YYMMDD}.csv]"
        )]
        output_file: Option<PathBuf>,
    },

    /// Run validation, filtering, join, aggregation and temporal analysis
    Run {
        #[arg(short, long, help = "Station CSV file")]
        stations: PathBuf,

        #[arg(short, long, help = "Readings CSV file")]
        readings: PathBuf,

        #[arg(long, help = "JSON filter specification applied to readings")]
        spec: Option<PathBuf>,

        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        #[arg(long, help = "Suppress progress output")]
        quiet: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TableKind {
    Auto,
    Stations,
    Readings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JoinHow {
    Inner,
    Left,
    StationsLeft,
    Validation,
}

impl From<JoinHow> for JoinKind {
    fn from(how: JoinHow) -> Self {
        match how {
            JoinHow::Inner => JoinKind::Inner,
            JoinHow::Left => JoinKind::Left,
            JoinHow::StationsLeft => JoinKind::StationsLeft,
            JoinHow::Validation => JoinKind::Validation,
        }
    }
}

fn parse_point(s: &str) -> std::result::Result<(f64, f64), String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON, got '{}'", s))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|_| format!("invalid latitude '{}'", lat))?;
    let lon: f64 = lon
        .trim()
        .parse()
        .map_err(|_| format!("invalid longitude '{}'", lon))?;
    Ok((lat, lon))
}
