use crate::error::Result;
use crate::models::{Column, ColumnType, Table, Value};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometres (Haversine formula)
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Number of digits after the decimal point in the shortest representation of `value`
pub fn decimal_places(value: f64) -> usize {
    let repr = value.to_string();
    match repr.split_once('.') {
        Some((_, fraction)) => fraction.len(),
        None => 0,
    }
}

/// Copy of `table` with an extra numeric column holding the distance of each
/// row from a reference point. Rows with a missing coordinate get a missing distance.
///
/// Radius filtering is then an ordinary `le` condition on the new column.
pub fn with_distance_column(
    table: &Table,
    lat_column: &str,
    lon_column: &str,
    reference: (f64, f64),
    output_column: &str,
) -> Result<Table> {
    let lats = table.number_column(lat_column)?;
    let lons = table.number_column(lon_column)?;

    let mut columns = table.columns().to_vec();
    columns.push(Column::new(output_column, ColumnType::Number));
    let mut out = Table::new(columns)?;

    for (i, row) in table.rows().iter().enumerate() {
        let distance = match (lats.get(i), lons.get(i)) {
            (Some(lat), Some(lon)) => {
                Value::Number(haversine_distance(reference.0, reference.1, lat, lon))
            }
            _ => Value::Missing,
        };
        let mut new_row = row.clone();
        new_row.push(distance);
        out.push_row(new_row)?;
    }

    Ok(out)
}
