use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use crate::error::{ProcessingError, Result};
use crate::models::table::{Column, ColumnType, Table, Value};
use crate::utils::constants::{
    COL_DATA_QUALITY, COL_DATE, COL_HUMIDITY, COL_STATION_ID, COL_TEMPERATURE,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataQuality {
    Good,
    Fair,
    Poor,
    Verified,
    Provisional,
    Other(String),
}

impl DataQuality {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "good" => DataQuality::Good,
            "fair" => DataQuality::Fair,
            "poor" => DataQuality::Poor,
            "verified" => DataQuality::Verified,
            "provisional" => DataQuality::Provisional,
            _ => DataQuality::Other(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DataQuality::Good => "good",
            DataQuality::Fair => "fair",
            DataQuality::Poor => "poor",
            DataQuality::Verified => "verified",
            DataQuality::Provisional => "provisional",
            DataQuality::Other(s) => s,
        }
    }
}

impl fmt::Display for DataQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Reading {
    #[validate(length(min = 1))]
    pub station_id: String,

    pub date: NaiveDate,

    #[validate(range(min = -50.0, max = 60.0))]
    pub temperature_c: Option<f64>,

    #[validate(range(min = 0.0, max = 100.0))]
    pub humidity_percent: Option<f64>,

    pub data_quality: DataQuality,
}

impl Reading {
    pub fn new(
        station_id: impl Into<String>,
        date: NaiveDate,
        temperature_c: Option<f64>,
        humidity_percent: Option<f64>,
        data_quality: DataQuality,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            date,
            temperature_c,
            humidity_percent,
            data_quality,
        }
    }

    /// Column layout of a readings table
    pub fn schema() -> Vec<Column> {
        vec![
            Column::new(COL_STATION_ID, ColumnType::Text),
            Column::new(COL_DATE, ColumnType::Date),
            Column::new(COL_TEMPERATURE, ColumnType::Number),
            Column::new(COL_HUMIDITY, ColumnType::Number),
            Column::new(COL_DATA_QUALITY, ColumnType::Text),
        ]
    }

    pub fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Text(self.station_id.clone()),
            Value::Date(self.date),
            Value::from_option_f64(self.temperature_c),
            Value::from_option_f64(self.humidity_percent),
            Value::Text(self.data_quality.to_string()),
        ]
    }
}

pub fn readings_to_table(readings: &[Reading]) -> Result<Table> {
    let mut table = Table::new(Reading::schema())?;
    for reading in readings {
        table.push_row(reading.to_row())?;
    }
    Ok(table)
}

/// Typed readings from a loaded table; rows without a station id or date are format errors
pub fn readings_from_table(table: &Table) -> Result<Vec<Reading>> {
    let ids = table.text_column(COL_STATION_ID)?;
    let dates = table.date_column(COL_DATE)?;
    let temps = table.number_column(COL_TEMPERATURE)?;
    let humidity = table.number_column(COL_HUMIDITY)?;
    let quality = table.text_column(COL_DATA_QUALITY)?;

    (0..table.row_count())
        .map(|i| {
            let missing = |field: &str| {
                ProcessingError::InvalidFormat(format!("reading row {}: missing {}", i + 1, field))
            };
            Ok(Reading {
                station_id: ids.get(i).ok_or_else(|| missing(COL_STATION_ID))?.to_string(),
                date: dates.get(i).ok_or_else(|| missing(COL_DATE))?,
                temperature_c: temps.get(i),
                humidity_percent: humidity.get(i),
                data_quality: DataQuality::parse(quality.get(i).unwrap_or_default()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_parsing() {
        assert_eq!(DataQuality::parse("Good"), DataQuality::Good);
        assert_eq!(DataQuality::parse(" provisional "), DataQuality::Provisional);
        assert_eq!(
            DataQuality::parse("excellent"),
            DataQuality::Other("excellent".to_string())
        );
    }

    #[test]
    fn test_reading_validation() {
        let date = NaiveDate::from_ymd_opt(2023, 7, 15).unwrap();
        let valid = Reading::new("STN_001", date, Some(31.2), Some(18.0), DataQuality::Good);
        assert!(valid.validate().is_ok());

        let invalid = Reading::new("STN_001", date, Some(75.0), Some(120.0), DataQuality::Good);
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_table_round_trip() -> Result<()> {
        let date = NaiveDate::from_ymd_opt(2023, 1, 15).unwrap();
        let readings = vec![
            Reading::new("STN_001", date, Some(12.5), None, DataQuality::Good),
            Reading::new("STN_002", date, None, Some(40.0), DataQuality::Provisional),
        ];
        let table = readings_to_table(&readings)?;
        assert_eq!(table.row_count(), 2);
        assert_eq!(readings_from_table(&table)?, readings);
        Ok(())
    }
}
