use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{ProcessingError, Result};
use crate::models::table::{Column, ColumnType, Table, Value};
use crate::utils::constants::{
    COL_ELEVATION, COL_LATITUDE, COL_LONGITUDE, COL_STATION_ID, COL_STATION_NAME,
    COL_STATION_TYPE,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Station {
    #[validate(length(min = 1))]
    pub station_id: String,

    pub station_name: String,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    pub elevation_m: Option<f64>,

    pub station_type: String,
}

impl Station {
    pub fn new(
        station_id: impl Into<String>,
        station_name: impl Into<String>,
        latitude: f64,
        longitude: f64,
        elevation_m: Option<f64>,
        station_type: impl Into<String>,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            station_name: station_name.into(),
            latitude,
            longitude,
            elevation_m,
            station_type: station_type.into(),
        }
    }

    /// Column layout of a station table
    pub fn schema() -> Vec<Column> {
        vec![
            Column::new(COL_STATION_ID, ColumnType::Text),
            Column::new(COL_STATION_NAME, ColumnType::Text),
            Column::new(COL_LATITUDE, ColumnType::Number),
            Column::new(COL_LONGITUDE, ColumnType::Number),
            Column::new(COL_ELEVATION, ColumnType::Number),
            Column::new(COL_STATION_TYPE, ColumnType::Text),
        ]
    }

    pub fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Text(self.station_id.clone()),
            Value::Text(self.station_name.clone()),
            Value::Number(self.latitude),
            Value::Number(self.longitude),
            Value::from_option_f64(self.elevation_m),
            Value::Text(self.station_type.clone()),
        ]
    }
}

pub fn stations_to_table(stations: &[Station]) -> Result<Table> {
    let mut table = Table::new(Station::schema())?;
    for station in stations {
        table.push_row(station.to_row())?;
    }
    Ok(table)
}

/// Typed stations from a loaded table. A row without an id or coordinates is
/// a format error naming the row; out-of-range values are kept for validation.
pub fn stations_from_table(table: &Table) -> Result<Vec<Station>> {
    let ids = table.text_column(COL_STATION_ID)?;
    let lats = table.number_column(COL_LATITUDE)?;
    let lons = table.number_column(COL_LONGITUDE)?;
    let names = table.text_column(COL_STATION_NAME).ok();
    let elevations = table.number_column(COL_ELEVATION).ok();
    let types = table.text_column(COL_STATION_TYPE).ok();

    (0..table.row_count())
        .map(|i| {
            let missing = |field: &str| {
                ProcessingError::InvalidFormat(format!("station row {}: missing {}", i + 1, field))
            };
            Ok(Station {
                station_id: ids.get(i).ok_or_else(|| missing(COL_STATION_ID))?.to_string(),
                station_name: names.and_then(|c| c.get(i)).unwrap_or_default().to_string(),
                latitude: lats.get(i).ok_or_else(|| missing(COL_LATITUDE))?,
                longitude: lons.get(i).ok_or_else(|| missing(COL_LONGITUDE))?,
                elevation_m: elevations.and_then(|c| c.get(i)),
                station_type: types.and_then(|c| c.get(i)).unwrap_or_default().to_string(),
            })
        })
        .collect()
}
