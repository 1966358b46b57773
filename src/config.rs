use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use validator::{Validate, ValidationError};

use crate::error::Result;
use crate::utils::constants::*;

/// Settings for every pipeline stage, layered from defaults, an optional
/// config file and `ENVMON__SECTION__FIELD` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    #[validate(nested)]
    pub loader: LoaderConfig,

    #[validate(nested)]
    pub validation: ValidationConfig,

    #[validate(nested)]
    pub aggregation: AggregationConfig,

    #[validate(nested)]
    pub join: JoinConfig,

    #[validate(nested)]
    pub temporal: TemporalConfig,

    #[validate(nested)]
    pub export: ExportConfig,
}

impl PipelineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("ENVMON")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: PipelineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_delimiter"))]
pub struct LoaderConfig {
    /// Field separator of input files; must be a single ASCII character
    pub delimiter: char,

    /// Extra cell contents treated as missing on top of the built-in tokens
    pub extra_missing_tokens: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            extra_missing_tokens: Vec::new(),
        }
    }
}

impl LoaderConfig {
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter as u8
    }
}

fn validate_delimiter(config: &LoaderConfig) -> std::result::Result<(), ValidationError> {
    if !config.delimiter.is_ascii() || config.delimiter == '"' {
        return Err(ValidationError::new("delimiter_not_ascii"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_bounds"))]
pub struct ValidationConfig {
    #[validate(length(min = 1))]
    pub lat_column: String,

    #[validate(length(min = 1))]
    pub lon_column: String,

    pub lat_bounds: (f64, f64),

    pub lon_bounds: (f64, f64),

    #[validate(range(max = 15))]
    pub min_decimal_places: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            lat_column: COL_LATITUDE.to_string(),
            lon_column: COL_LONGITUDE.to_string(),
            lat_bounds: (MIN_LATITUDE, MAX_LATITUDE),
            lon_bounds: (MIN_LONGITUDE, MAX_LONGITUDE),
            min_decimal_places: DEFAULT_MIN_DECIMAL_PLACES,
        }
    }
}

fn validate_bounds(config: &ValidationConfig) -> std::result::Result<(), ValidationError> {
    if config.lat_bounds.0 > config.lat_bounds.1 || config.lon_bounds.0 > config.lon_bounds.1 {
        return Err(ValidationError::new("bounds_inverted"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyGroupPolicy {
    /// Stations without readings do not appear in the output
    Omit,
    /// Roster stations without readings appear with a zero count and null statistics
    Report,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AggregationConfig {
    #[validate(length(min = 1))]
    pub group_column: String,

    /// Numeric columns to summarise; empty means every numeric column
    pub measurement_columns: Vec<String>,

    #[validate(range(exclusive_min = 0.0))]
    pub outlier_std_devs: f64,

    pub empty_groups: EmptyGroupPolicy,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            group_column: COL_STATION_ID.to_string(),
            measurement_columns: Vec::new(),
            outlier_std_devs: DEFAULT_OUTLIER_STD_DEVS,
            empty_groups: EmptyGroupPolicy::Omit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct JoinConfig {
    #[validate(length(min = 1))]
    pub key_column: String,

    /// Fraction of readings allowed to be orphaned before the report raises its flag
    #[validate(range(min = 0.0, max = 1.0))]
    pub unmatched_tolerance: f64,

    /// Any orphaned reading fails the join
    pub strict: bool,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            key_column: COL_STATION_ID.to_string(),
            unmatched_tolerance: DEFAULT_UNMATCHED_TOLERANCE,
            strict: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TemporalConfig {
    #[validate(length(min = 1))]
    pub date_column: String,

    #[validate(length(min = 1))]
    pub value_column: String,

    /// `None` analyses the whole table as a single series
    pub group_column: Option<String>,

    #[validate(range(min = 1))]
    pub window: usize,

    #[validate(range(min = 0.0))]
    pub flat_slope_threshold: f64,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            date_column: COL_DATE.to_string(),
            value_column: COL_TEMPERATURE.to_string(),
            group_column: Some(COL_STATION_ID.to_string()),
            window: DEFAULT_ROLLING_WINDOW,
            flat_slope_threshold: DEFAULT_FLAT_SLOPE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Tsv,
}

impl ExportFormat {
    pub fn delimiter(&self) -> u8 {
        match self {
            ExportFormat::Csv => b',',
            ExportFormat::Tsv => b'\t',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ExportConfig {
    pub format: ExportFormat,

    /// Write an empty table (header only) with a warning instead of failing
    pub allow_empty: bool,

    /// Write a JSON summary next to the exported file
    pub write_summary: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: ExportFormat::Csv,
            allow_empty: false,
            write_summary: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Environment variables are process-wide; loads that read them run one at a time
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.temporal.window, 3);
        assert_eq!(config.aggregation.outlier_std_devs, 2.0);
        assert_eq!(config.aggregation.empty_groups, EmptyGroupPolicy::Omit);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() -> Result<()> {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "[temporal]\nwindow = 7\n\n[join]\nstrict = true")?;

        let config = PipelineConfig::load(Some(file.path()))?;
        assert_eq!(config.temporal.window, 7);
        assert!(config.join.strict);
        assert_eq!(config.join.unmatched_tolerance, DEFAULT_UNMATCHED_TOLERANCE);
        Ok(())
    }

    #[test]
    fn test_invalid_values_rejected_before_use() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[temporal]\nwindow = 0").unwrap();
        assert!(PipelineConfig::load(Some(file.path())).is_err());

        let mut config = PipelineConfig::default();
        config.validation.lat_bounds = (90.0, -90.0);
        assert!(config.validate().is_err());

        config = PipelineConfig::default();
        config.join.unmatched_tolerance = 1.5;
        assert!(config.validate().is_err());

        config = PipelineConfig::default();
        config.loader.delimiter = 'é';
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_overrides_file_and_defaults() -> Result<()> {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "[temporal]\nwindow = 7")?;

        std::env::set_var("ENVMON__TEMPORAL__WINDOW", "11");
        std::env::set_var("ENVMON__JOIN__STRICT", "true");
        let loaded = PipelineConfig::load(Some(file.path()));
        let defaults_only = PipelineConfig::load(None);
        std::env::remove_var("ENVMON__TEMPORAL__WINDOW");
        std::env::remove_var("ENVMON__JOIN__STRICT");

        let config = loaded?;
        assert_eq!(config.temporal.window, 11);
        assert!(config.join.strict);
        assert_eq!(config.temporal.value_column, COL_TEMPERATURE);

        let config = defaults_only?;
        assert_eq!(config.temporal.window, 11);
        assert_eq!(config.loader.delimiter, ',');
        Ok(())
    }

    #[test]
    fn test_missing_file_is_error() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let file = NamedTempFile::new().unwrap();
        let path = file.path().with_extension("missing.toml");
        assert!(PipelineConfig::load(Some(&path)).is_err());
    }
}
