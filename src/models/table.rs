use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{ProcessingError, Result};
use crate::utils::constants::DATE_FORMAT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Number,
    Date,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Text => "text",
            ColumnType::Number => "number",
            ColumnType::Date => "date",
        };
        f.write_str(name)
    }
}

/// A single cell. Missing values are explicit rather than NaN sentinels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Missing,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Type of a present value, `None` for missing
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Missing => None,
            Value::Text(_) => Some(ColumnType::Text),
            Value::Number(_) => Some(ColumnType::Number),
            Value::Date(_) => Some(ColumnType::Date),
        }
    }

    /// Text form used when writing delimited output
    pub fn render(&self) -> String {
        match self {
            Value::Missing => String::new(),
            Value::Text(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Date(d) => d.format(DATE_FORMAT).to_string(),
        }
    }

    pub fn from_option_f64(value: Option<f64>) -> Self {
        value.map_or(Value::Missing, Value::Number)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Missing => f.write_str("<missing>"),
            other => f.write_str(&other.render()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub dtype: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, dtype: ColumnType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

/// Row-oriented table with a fixed, named and typed schema.
///
/// Column names are resolved through an index built at construction, so a
/// misspelled column fails immediately with [`ProcessingError::ColumnNotFound`].
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut index = HashMap::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            if column.name.is_empty() {
                return Err(ProcessingError::SchemaMismatch(format!(
                    "column {} has an empty name",
                    i + 1
                )));
            }
            if index.insert(column.name.clone(), i).is_some() {
                return Err(ProcessingError::SchemaMismatch(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
        }

        Ok(Self {
            columns,
            index,
            rows: Vec::new(),
        })
    }

    /// Empty table sharing this table's schema
    pub fn empty_like(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            index: self.index.clone(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(ProcessingError::SchemaMismatch(format!(
                "row {} has {} values, expected {}",
                self.rows.len() + 1,
                row.len(),
                self.columns.len()
            )));
        }

        for (value, column) in row.iter().zip(&self.columns) {
            if let Some(actual) = value.column_type() {
                if actual != column.dtype {
                    return Err(ProcessingError::ColumnType {
                        column: column.name.clone(),
                        expected: column.dtype.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }
        }

        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ProcessingError::ColumnNotFound {
                column: name.to_string(),
                available: self.column_names().join(", "),
            })
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        let idx = self.column_index(name)?;
        Ok(&self.columns[idx])
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row(&self, idx: usize) -> Option<&[Value]> {
        self.rows.get(idx).map(|r| r.as_slice())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn value(&self, row: usize, column: &str) -> Result<&Value> {
        let idx = self.column_index(column)?;
        self.rows
            .get(row)
            .map(|r| &r[idx])
            .ok_or_else(|| {
                ProcessingError::InvalidFormat(format!(
                    "row {} out of bounds (table has {} rows)",
                    row,
                    self.rows.len()
                ))
            })
    }

    /// New table containing the given rows, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut table = self.empty_like();
        table.rows = indices
            .iter()
            .filter_map(|&i| self.rows.get(i).cloned())
            .collect();
        table
    }

    /// First `n` rows
    pub fn head(&self, n: usize) -> Self {
        let mut table = self.empty_like();
        table.rows = self.rows.iter().take(n).cloned().collect();
        table
    }

    fn typed_index(&self, name: &str, expected: ColumnType) -> Result<usize> {
        let idx = self.column_index(name)?;
        let actual = self.columns[idx].dtype;
        if actual != expected {
            return Err(ProcessingError::ColumnType {
                column: name.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(idx)
    }

    pub fn number_column(&self, name: &str) -> Result<NumberColumn<'_>> {
        let idx = self.typed_index(name, ColumnType::Number)?;
        Ok(NumberColumn { table: self, idx })
    }

    pub fn text_column(&self, name: &str) -> Result<TextColumn<'_>> {
        let idx = self.typed_index(name, ColumnType::Text)?;
        Ok(TextColumn { table: self, idx })
    }

    pub fn date_column(&self, name: &str) -> Result<DateColumn<'_>> {
        let idx = self.typed_index(name, ColumnType::Date)?;
        Ok(DateColumn { table: self, idx })
    }
}

/// Typed view over a numeric column
#[derive(Debug, Clone, Copy)]
pub struct NumberColumn<'a> {
    table: &'a Table,
    idx: usize,
}

impl<'a> NumberColumn<'a> {
    pub fn get(&self, row: usize) -> Option<f64> {
        self.table.rows.get(row).and_then(|r| r[self.idx].as_f64())
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<f64>> + 'a {
        let (table, idx): (&'a Table, usize) = (self.table, self.idx);
        table.rows.iter().map(move |r| r[idx].as_f64())
    }
}

/// Typed view over a text column
#[derive(Debug, Clone, Copy)]
pub struct TextColumn<'a> {
    table: &'a Table,
    idx: usize,
}

impl<'a> TextColumn<'a> {
    pub fn get(&self, row: usize) -> Option<&'a str> {
        let table: &'a Table = self.table;
        table.rows.get(row).and_then(|r| r[self.idx].as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&'a str>> + 'a {
        let (table, idx): (&'a Table, usize) = (self.table, self.idx);
        table.rows.iter().map(move |r| r[idx].as_str())
    }
}

/// Typed view over a date column
#[derive(Debug, Clone, Copy)]
pub struct DateColumn<'a> {
    table: &'a Table,
    idx: usize,
}

impl<'a> DateColumn<'a> {
    pub fn get(&self, row: usize) -> Option<NaiveDate> {
        self.table.rows.get(row).and_then(|r| r[self.idx].as_date())
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<NaiveDate>> + 'a {
        let (table, idx): (&'a Table, usize) = (self.table, self.idx);
        table.rows.iter().map(move |r| r[idx].as_date())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        let mut table = Table::new(vec![
            Column::new("station_id", ColumnType::Text),
            Column::new("temperature_c", ColumnType::Number),
        ])
        .unwrap();
        table
            .push_row(vec![Value::Text("STN_001".into()), Value::Number(21.5)])
            .unwrap();
        table
            .push_row(vec![Value::Text("STN_002".into()), Value::Missing])
            .unwrap();
        table
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let result = Table::new(vec![
            Column::new("a", ColumnType::Text),
            Column::new("a", ColumnType::Number),
        ]);
        assert!(matches!(result, Err(ProcessingError::SchemaMismatch(_))));
    }

    #[test]
    fn test_unknown_column_names_column() {
        let table = sample_table();
        let err = table.column_index("temprature_c").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("temprature_c"));
        assert!(message.contains("temperature_c"));
    }

    #[test]
    fn test_push_row_type_checked() {
        let mut table = sample_table();
        let result = table.push_row(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert!(matches!(result, Err(ProcessingError::ColumnType { .. })));

        let result = table.push_row(vec![Value::Text("x".into())]);
        assert!(matches!(result, Err(ProcessingError::SchemaMismatch(_))));
    }

    #[test]
    fn test_typed_accessors() {
        let table = sample_table();
        let temps: Vec<Option<f64>> = table.number_column("temperature_c").unwrap().iter().collect();
        assert_eq!(temps, vec![Some(21.5), None]);

        let ids = table.text_column("station_id").unwrap();
        assert_eq!(ids.get(1), Some("STN_002"));

        assert!(matches!(
            table.number_column("station_id"),
            Err(ProcessingError::ColumnType { .. })
        ));
    }

    #[test]
    fn test_select_rows_preserves_schema() {
        let table = sample_table();
        let selected = table.select_rows(&[1]);
        assert_eq!(selected.column_count(), 2);
        assert_eq!(selected.row_count(), 1);
        assert_eq!(
            selected.value(0, "station_id").unwrap(),
            &Value::Text("STN_002".into())
        );
    }

    #[test]
    fn test_value_render() {
        let date = NaiveDate::from_ymd_opt(2023, 1, 15).unwrap();
        assert_eq!(Value::Date(date).render(), "2023-01-15");
        assert_eq!(Value::Number(-74.0).render(), "-74");
        assert_eq!(Value::Missing.render(), "");
    }
}
