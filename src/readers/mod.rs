pub mod table_reader;

pub use table_reader::{load_readings, load_stations, ColumnSummary, TableReader, TableSummary};
