/// Column names of the station table
pub const COL_STATION_ID: &str = "station_id";
pub const COL_STATION_NAME: &str = "station_name";
pub const COL_LATITUDE: &str = "latitude";
pub const COL_LONGITUDE: &str = "longitude";
pub const COL_ELEVATION: &str = "elevation_m";
pub const COL_STATION_TYPE: &str = "station_type";

/// Column names of the readings table
pub const COL_DATE: &str = "date";
pub const COL_TEMPERATURE: &str = "temperature_c";
pub const COL_HUMIDITY: &str = "humidity_percent";
pub const COL_DATA_QUALITY: &str = "data_quality";

/// Derived column names
pub const COL_DISTANCE_KM: &str = "distance_km";
pub const COL_JOIN_STATUS: &str = "join_status";

/// Date format used for input and output
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Cell contents treated as missing (compared case-insensitively after trimming)
pub const MISSING_TOKENS: &[&str] = &["", "na", "n/a", "nan", "null", "none"];

/// Geographic bounds
pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;

/// Processing defaults
pub const PREVIEW_ROWS: usize = 5;
pub const DEFAULT_MIN_DECIMAL_PLACES: usize = 1;
pub const DEFAULT_OUTLIER_STD_DEVS: f64 = 2.0;
pub const DEFAULT_UNMATCHED_TOLERANCE: f64 = 0.05;
pub const DEFAULT_ROLLING_WINDOW: usize = 3;
pub const DEFAULT_FLAT_SLOPE_THRESHOLD: f64 = 1e-6;
pub const EXPECTED_INTERVAL_DAYS: i64 = 1;

/// Suffix applied to station columns whose name clashes with a reading column
pub const STATION_COLUMN_SUFFIX: &str = "_station";

/// Extension appended to an exported file for its summary sidecar
pub const SUMMARY_SIDECAR_SUFFIX: &str = "summary.json";
