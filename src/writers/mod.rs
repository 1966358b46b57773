pub mod csv_writer;

pub use csv_writer::{export, sidecar_path, CsvExporter, ExportSummary};
