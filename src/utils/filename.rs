use chrono::{Datelike, Local};
use std::path::{Path, PathBuf};

/// Default output file name with format: envmon-{stage}-{YYMMDD}.csv
pub fn generate_default_output_filename(stage: &str) -> PathBuf {
    generate_output_filename_in(Path::new("output"), stage)
}

/// Output file name for `stage` inside `dir`, stamped with today's date
pub fn generate_output_filename_in(dir: &Path, stage: &str) -> PathBuf {
    let now = Local::now();
    let year = now.year() % 100; // Get last 2 digits of year
    let filename = format!(
        "envmon-{}-{:02}{:02}{:02}.csv",
        stage,
        year,
        now.month(),
        now.day()
    );
    dir.join(filename)
}
