pub mod reading;
pub mod station;
pub mod table;

pub use reading::{readings_from_table, readings_to_table, DataQuality, Reading};
pub use station::{stations_from_table, stations_to_table, Station};
pub use table::{Column, ColumnType, DateColumn, NumberColumn, Table, TextColumn, Value};
