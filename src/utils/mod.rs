pub mod constants;
pub mod coordinates;
pub mod filename;
pub mod progress;
pub mod stats;

pub use constants::*;
pub use coordinates::{haversine_distance, with_distance_column};
pub use filename::{generate_default_output_filename, generate_output_filename_in};
pub use progress::ProgressReporter;
pub use stats::NumericSummary;
