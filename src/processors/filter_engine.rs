use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{ProcessingError, Result};
use crate::models::{ColumnType, Table, Value};
use crate::utils::constants::{
    COL_DATA_QUALITY, COL_DATE, COL_HUMIDITY, COL_STATION_ID, COL_STATION_TYPE, COL_TEMPERATURE,
    DATE_FORMAT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Between,
    Contains,
    StartsWith,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "in",
            Operator::Between => "between",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts_with",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connective {
    #[default]
    And,
    Or,
}

/// Literal operand. Dates are written as ISO text and typed against the column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::Text(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<NaiveDate> for Scalar {
    fn from(value: NaiveDate) -> Self {
        Scalar::Text(value.format(DATE_FORMAT).to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Single(Scalar),
    List(Vec<Scalar>),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Single(s) => write!(f, "{}", s),
            Operand::List(items) => {
                let parts: Vec<String> = items.iter().map(|s| s.to_string()).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub value: Operand,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: Operator, value: Operand) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    fn single(field: &str, op: Operator, value: impl Into<Scalar>) -> Self {
        Self::new(field, op, Operand::Single(value.into()))
    }

    pub fn eq(field: &str, value: impl Into<Scalar>) -> Self {
        Self::single(field, Operator::Eq, value)
    }

    pub fn ne(field: &str, value: impl Into<Scalar>) -> Self {
        Self::single(field, Operator::Ne, value)
    }

    pub fn lt(field: &str, value: impl Into<Scalar>) -> Self {
        Self::single(field, Operator::Lt, value)
    }

    pub fn le(field: &str, value: impl Into<Scalar>) -> Self {
        Self::single(field, Operator::Le, value)
    }

    pub fn gt(field: &str, value: impl Into<Scalar>) -> Self {
        Self::single(field, Operator::Gt, value)
    }

    pub fn ge(field: &str, value: impl Into<Scalar>) -> Self {
        Self::single(field, Operator::Ge, value)
    }

    pub fn contains(field: &str, needle: &str) -> Self {
        Self::single(field, Operator::Contains, needle)
    }

    pub fn starts_with(field: &str, prefix: &str) -> Self {
        Self::single(field, Operator::StartsWith, prefix)
    }

    pub fn is_in<S: Into<Scalar>>(field: &str, values: impl IntoIterator<Item = S>) -> Self {
        Self::new(
            field,
            Operator::In,
            Operand::List(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Inclusive on both ends
    pub fn between(field: &str, low: impl Into<Scalar>, high: impl Into<Scalar>) -> Self {
        Self::new(
            field,
            Operator::Between,
            Operand::List(vec![low.into(), high.into()]),
        )
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.op, &self.value) {
            (Operator::Between, Operand::List(bounds)) if bounds.len() == 2 => {
                write!(f, "{} between {} and {}", self.field, bounds[0], bounds[1])
            }
            _ => write!(f, "{} {} {}", self.field, self.op, self.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Predicate {
    Condition(Condition),
    /// Parenthesised sub-expression
    Group(FilterSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    /// How this term joins the previous one; ignored on the first term
    #[serde(default)]
    pub connective: Connective,
    #[serde(flatten)]
    pub predicate: Predicate,
}

/// Declarative row-selection request.
///
/// Terms are combined left to right with AND binding tighter than OR, so
/// `a AND b OR c` means `(a AND b) OR c`. Use a group to override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub terms: Vec<Term>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ProcessingError::FilterConfig(format!("malformed filter spec: {}", e)))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProcessingError::data_source(path, e.to_string()))?;
        Self::from_json(&contents)
    }

    fn push(mut self, connective: Connective, predicate: Predicate) -> Self {
        self.terms.push(Term {
            connective,
            predicate,
        });
        self
    }

    pub fn and(self, condition: Condition) -> Self {
        self.push(Connective::And, Predicate::Condition(condition))
    }

    pub fn or(self, condition: Condition) -> Self {
        self.push(Connective::Or, Predicate::Condition(condition))
    }

    pub fn and_group(self, group: FilterSpec) -> Self {
        self.push(Connective::And, Predicate::Group(group))
    }

    pub fn or_group(self, group: FilterSpec) -> Self {
        self.push(Connective::Or, Predicate::Group(group))
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// All conditions in the order they appear, groups expanded depth-first
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        for term in &self.terms {
            match &term.predicate {
                Predicate::Condition(c) => out.push(c),
                Predicate::Group(g) => out.extend(g.conditions()),
            }
        }
        out
    }

    /// Check the spec against a table's schema without evaluating any row
    pub fn validate(&self, table: &Table) -> Result<()> {
        self.compile(table).map(|_| ())
    }

    fn compile(&self, table: &Table) -> Result<CompiledSpec> {
        let mut conditions = Vec::new();
        let root = compile_expr(self, table, &mut conditions)?;
        Ok(CompiledSpec { root, conditions })
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return f.write_str("<all rows>");
        }
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                let word = match term.connective {
                    Connective::And => " AND ",
                    Connective::Or => " OR ",
                };
                f.write_str(word)?;
            }
            match &term.predicate {
                Predicate::Condition(c) => write!(f, "{}", c)?,
                Predicate::Group(g) => write!(f, "({})", g)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Typed {
    Number(f64),
    Text(String),
    Date(NaiveDate),
}

#[derive(Debug, Clone)]
enum CompiledOperand {
    Single(Typed),
    Set(Vec<Typed>),
    Range(Typed, Typed),
}

#[derive(Debug, Clone)]
struct CompiledCondition {
    column: usize,
    op: Operator,
    operand: CompiledOperand,
}

enum Node {
    Condition(usize),
    Group(Expr),
}

/// Disjunction of conjunctions; an empty expression matches every row
struct Expr {
    disjuncts: Vec<Vec<Node>>,
}

struct CompiledSpec {
    root: Expr,
    conditions: Vec<CompiledCondition>,
}

fn compile_expr(
    spec: &FilterSpec,
    table: &Table,
    conditions: &mut Vec<CompiledCondition>,
) -> Result<Expr> {
    let mut disjuncts: Vec<Vec<Node>> = Vec::new();

    for (i, term) in spec.terms.iter().enumerate() {
        let node = match &term.predicate {
            Predicate::Condition(c) => {
                conditions.push(compile_condition(c, table)?);
                Node::Condition(conditions.len() - 1)
            }
            Predicate::Group(g) => Node::Group(compile_expr(g, table, conditions)?),
        };

        match disjuncts.last_mut() {
            Some(conjunction) if i > 0 && term.connective == Connective::And => {
                conjunction.push(node)
            }
            _ => disjuncts.push(vec![node]),
        }
    }

    Ok(Expr { disjuncts })
}

fn compile_condition(condition: &Condition, table: &Table) -> Result<CompiledCondition> {
    let column = table.column_index(&condition.field).map_err(|_| {
        ProcessingError::FilterConfig(format!(
            "condition '{}' references unknown column '{}' (available: {})",
            condition,
            condition.field,
            table.column_names().join(", ")
        ))
    })?;
    let dtype = table.columns()[column].dtype;
    let config_error = |reason: String| {
        ProcessingError::FilterConfig(format!("condition '{}': {}", condition, reason))
    };

    let operand = match (condition.op, &condition.value) {
        (Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge, Operand::Single(s)) => {
            CompiledOperand::Single(type_scalar(s, dtype, &condition.field).map_err(config_error)?)
        }
        (Operator::Contains | Operator::StartsWith, Operand::Single(Scalar::Text(needle))) => {
            if dtype != ColumnType::Text {
                return Err(config_error(format!(
                    "'{}' requires a text column, '{}' is {}",
                    condition.op, condition.field, dtype
                )));
            }
            CompiledOperand::Single(Typed::Text(needle.clone()))
        }
        (Operator::Contains | Operator::StartsWith, _) => {
            return Err(config_error(format!(
                "'{}' expects a single text value",
                condition.op
            )))
        }
        (Operator::In, Operand::List(items)) => CompiledOperand::Set(
            items
                .iter()
                .map(|s| type_scalar(s, dtype, &condition.field))
                .collect::<std::result::Result<Vec<_>, String>>()
                .map_err(config_error)?,
        ),
        (Operator::Between, Operand::List(bounds)) if bounds.len() == 2 => {
            let low = type_scalar(&bounds[0], dtype, &condition.field).map_err(config_error)?;
            let high = type_scalar(&bounds[1], dtype, &condition.field).map_err(config_error)?;
            if compare_typed(&low, &high) == Some(Ordering::Greater) {
                return Err(config_error(format!(
                    "lower bound {} is greater than upper bound {}",
                    bounds[0], bounds[1]
                )));
            }
            CompiledOperand::Range(low, high)
        }
        (Operator::Between, _) => {
            return Err(config_error("'between' expects exactly two values [low, high]".to_string()))
        }
        (Operator::In, Operand::Single(_)) => {
            return Err(config_error("'in' expects a list of values".to_string()))
        }
        (op, Operand::List(_)) => {
            return Err(config_error(format!("operator '{}' expects a single value", op)))
        }
    };

    Ok(CompiledCondition {
        column,
        op: condition.op,
        operand,
    })
}

fn type_scalar(scalar: &Scalar, dtype: ColumnType, field: &str) -> std::result::Result<Typed, String> {
    match (dtype, scalar) {
        (ColumnType::Number, Scalar::Number(n)) => Ok(Typed::Number(*n)),
        (ColumnType::Number, Scalar::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Typed::Number)
            .map_err(|_| format!("value \"{}\" is not a number but '{}' is numeric", s, field)),
        (ColumnType::Text, Scalar::Text(s)) => Ok(Typed::Text(s.clone())),
        (ColumnType::Text, Scalar::Number(n)) => Err(format!(
            "value {} is numeric but '{}' is a text column; quote it to compare as text",
            n, field
        )),
        (ColumnType::Date, Scalar::Text(s)) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
            .map(Typed::Date)
            .map_err(|_| format!("value \"{}\" is not a YYYY-MM-DD date but '{}' is a date column", s, field)),
        (ColumnType::Date, Scalar::Number(n)) => Err(format!(
            "value {} is numeric but '{}' is a date column",
            n, field
        )),
    }
}

fn compare_typed(a: &Typed, b: &Typed) -> Option<Ordering> {
    match (a, b) {
        (Typed::Number(x), Typed::Number(y)) => x.partial_cmp(y),
        (Typed::Text(x), Typed::Text(y)) => Some(x.cmp(y)),
        (Typed::Date(x), Typed::Date(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_cell(cell: &Value, operand: &Typed) -> Option<Ordering> {
    match (cell, operand) {
        (Value::Number(x), Typed::Number(y)) => x.partial_cmp(y),
        (Value::Text(x), Typed::Text(y)) => Some(x.as_str().cmp(y.as_str())),
        (Value::Date(x), Typed::Date(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

impl CompiledCondition {
    /// Missing cells never match, whatever the operator
    fn matches(&self, row: &[Value]) -> bool {
        let cell = &row[self.column];
        if cell.is_missing() {
            return false;
        }

        match (&self.op, &self.operand) {
            (Operator::Contains, CompiledOperand::Single(Typed::Text(needle))) => {
                cell.as_str().is_some_and(|s| s.contains(needle.as_str()))
            }
            (Operator::StartsWith, CompiledOperand::Single(Typed::Text(prefix))) => {
                cell.as_str().is_some_and(|s| s.starts_with(prefix.as_str()))
            }
            (Operator::In, CompiledOperand::Set(items)) => items
                .iter()
                .any(|item| compare_cell(cell, item) == Some(Ordering::Equal)),
            (Operator::Between, CompiledOperand::Range(low, high)) => {
                matches!(compare_cell(cell, low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(compare_cell(cell, high), Some(Ordering::Less | Ordering::Equal))
            }
            (op, CompiledOperand::Single(operand)) => match compare_cell(cell, operand) {
                Some(ordering) => match op {
                    Operator::Eq => ordering == Ordering::Equal,
                    Operator::Ne => ordering != Ordering::Equal,
                    Operator::Lt => ordering == Ordering::Less,
                    Operator::Le => ordering != Ordering::Greater,
                    Operator::Gt => ordering == Ordering::Greater,
                    Operator::Ge => ordering != Ordering::Less,
                    _ => false,
                },
                None => false,
            },
            _ => false,
        }
    }
}

impl Expr {
    fn matches(&self, row: &[Value], conditions: &[CompiledCondition]) -> bool {
        if self.disjuncts.is_empty() {
            return true;
        }
        // any/all short-circuit
        self.disjuncts.iter().any(|conjunction| {
            conjunction.iter().all(|node| match node {
                Node::Condition(idx) => conditions[*idx].matches(row),
                Node::Group(group) => group.matches(row, conditions),
            })
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConditionStats {
    pub index: usize,
    pub condition: String,
    /// Input rows this condition rejects on its own
    pub failed_rows: usize,
    /// Of those, rows rejected because the cell was missing
    pub missing_cells: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovedRow {
    pub row: usize,
    /// Indices into `FilterStats::conditions` of the conditions this row violates
    pub violated: Vec<usize>,
}

/// Text value requested by an `eq`/`in` condition that no input row carries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbsentValue {
    pub condition: usize,
    pub column: String,
    pub value: String,
    /// Distinct values the column does contain, sorted
    pub available: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnRange {
    pub column: String,
    pub min: f64,
    pub max: f64,
}

/// Value counts of a text column, most frequent first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueCounts {
    pub column: String,
    pub counts: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterStats {
    pub spec: String,
    pub input_rows: usize,
    pub output_rows: usize,
    pub removed_rows: usize,
    pub conditions: Vec<ConditionStats>,
    pub removed: Vec<RemovedRow>,
    pub absent_values: Vec<AbsentValue>,
    /// Range of each numeric column a condition tests, over the kept rows
    pub output_ranges: Vec<ColumnRange>,
    /// Distribution of each text column an `eq`/`in` condition tests, over the kept rows
    pub output_distributions: Vec<ValueCounts>,
}

impl FilterStats {
    pub fn retained_percentage(&self) -> f64 {
        if self.input_rows == 0 {
            return 100.0;
        }
        100.0 * self.output_rows as f64 / self.input_rows as f64
    }

    /// Condition that rejects the most rows on its own
    pub fn most_restrictive(&self) -> Option<&ConditionStats> {
        self.conditions
            .iter()
            .filter(|c| c.failed_rows > 0)
            .max_by(|a, b| a.failed_rows.cmp(&b.failed_rows).then(b.index.cmp(&a.index)))
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str("=== Filter Report ===\n");
        out.push_str(&format!("Filter: {}\n", self.spec));
        out.push_str(&format!(
            "Rows: {} -> {} ({} removed, {:.1}% retained)\n",
            self.input_rows,
            self.output_rows,
            self.removed_rows,
            self.retained_percentage()
        ));
        for c in &self.conditions {
            out.push_str(&format!(
                "  [{}] {}: rejects {} row(s), {} due to missing values\n",
                c.index + 1,
                c.condition,
                c.failed_rows,
                c.missing_cells
            ));
        }
        if let Some(c) = self.most_restrictive() {
            out.push_str(&format!("Most restrictive: {}\n", c.condition));
        }
        for absent in &self.absent_values {
            out.push_str(&format!(
                "WARNING: '{}' does not occur in {} (available: {})\n",
                absent.value,
                absent.column,
                absent.available.join(", ")
            ));
        }
        for range in &self.output_ranges {
            out.push_str(&format!(
                "{} in output: {:.2} to {:.2}\n",
                range.column, range.min, range.max
            ));
        }
        for dist in &self.output_distributions {
            let counts: Vec<String> = dist
                .counts
                .iter()
                .map(|(value, n)| format!("{}={}", value, n))
                .collect();
            out.push_str(&format!("{} in output: {}\n", dist.column, counts.join(", ")));
        }
        out
    }
}

pub struct FilterEngine {
    record_removed_rows: bool,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self {
            record_removed_rows: true,
        }
    }

    /// Skip per-row removal reasons (counts are still reported)
    pub fn without_removal_reasons() -> Self {
        Self {
            record_removed_rows: false,
        }
    }

    pub fn filter(&self, table: &Table, spec: &FilterSpec) -> Result<(Table, FilterStats)> {
        let compiled = spec.compile(table)?;
        let labels: Vec<String> = spec.conditions().iter().map(|c| c.to_string()).collect();
        debug!("Applying filter: {}", spec);

        let mut kept = Vec::new();
        let mut removed = Vec::new();
        let mut conditions: Vec<ConditionStats> = labels
            .into_iter()
            .enumerate()
            .map(|(index, condition)| ConditionStats {
                index,
                condition,
                failed_rows: 0,
                missing_cells: 0,
            })
            .collect();

        for (i, row) in table.rows().iter().enumerate() {
            let selected = compiled.root.matches(row, &compiled.conditions);

            let mut violated = Vec::new();
            for (idx, condition) in compiled.conditions.iter().enumerate() {
                if !condition.matches(row) {
                    conditions[idx].failed_rows += 1;
                    if row[condition.column].is_missing() {
                        conditions[idx].missing_cells += 1;
                    }
                    violated.push(idx);
                }
            }

            if selected {
                kept.push(i);
            } else if self.record_removed_rows {
                removed.push(RemovedRow { row: i, violated });
            }
        }

        let output = table.select_rows(&kept);
        let absent_values = absent_values(table, &compiled.conditions);
        let (output_ranges, output_distributions) = output_profile(&output, &compiled.conditions);
        let stats = FilterStats {
            spec: spec.to_string(),
            input_rows: table.row_count(),
            output_rows: output.row_count(),
            removed_rows: table.row_count() - output.row_count(),
            conditions,
            removed,
            absent_values,
            output_ranges,
            output_distributions,
        };

        info!(
            "Filter kept {} of {} rows ({} removed)",
            stats.output_rows, stats.input_rows, stats.removed_rows
        );

        Ok((output, stats))
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn absent_values(table: &Table, conditions: &[CompiledCondition]) -> Vec<AbsentValue> {
    let mut absent = Vec::new();
    for (index, condition) in conditions.iter().enumerate() {
        let requested: Vec<&str> = match (condition.op, &condition.operand) {
            (Operator::Eq, CompiledOperand::Single(Typed::Text(v))) => vec![v.as_str()],
            (Operator::In, CompiledOperand::Set(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Typed::Text(v) => Some(v.as_str()),
                    _ => None,
                })
                .collect(),
            _ => continue,
        };
        if requested.is_empty() {
            continue;
        }

        let present: BTreeSet<&str> = table
            .rows()
            .iter()
            .filter_map(|row| row[condition.column].as_str())
            .collect();
        let column = &table.columns()[condition.column].name;
        for value in requested.into_iter().filter(|v| !present.contains(v)) {
            let available: Vec<String> = present.iter().map(|s| s.to_string()).collect();
            warn!(
                "Filter value '{}' does not occur in column '{}' (available: {})",
                value,
                column,
                available.join(", ")
            );
            absent.push(AbsentValue {
                condition: index,
                column: column.clone(),
                value: value.to_string(),
                available,
            });
        }
    }
    absent
}

fn output_profile(
    output: &Table,
    conditions: &[CompiledCondition],
) -> (Vec<ColumnRange>, Vec<ValueCounts>) {
    let mut ranges: Vec<ColumnRange> = Vec::new();
    let mut distributions: Vec<ValueCounts> = Vec::new();

    for condition in conditions {
        let column = &output.columns()[condition.column];
        match column.dtype {
            ColumnType::Number if !ranges.iter().any(|r| r.column == column.name) => {
                let values = output.rows().iter().filter_map(|row| row[condition.column].as_f64());
                let bounds = values.fold(None, |acc: Option<(f64, f64)>, v| match acc {
                    Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                    None => Some((v, v)),
                });
                if let Some((min, max)) = bounds {
                    ranges.push(ColumnRange {
                        column: column.name.clone(),
                        min,
                        max,
                    });
                }
            }
            ColumnType::Text
                if matches!(condition.op, Operator::Eq | Operator::In)
                    && !distributions.iter().any(|d| d.column == column.name) =>
            {
                let mut tally: BTreeMap<&str, usize> = BTreeMap::new();
                for row in output.rows() {
                    if let Some(v) = row[condition.column].as_str() {
                        *tally.entry(v).or_default() += 1;
                    }
                }
                let mut counts: Vec<(String, usize)> =
                    tally.into_iter().map(|(v, n)| (v.to_string(), n)).collect();
                // stable: ties stay alphabetical
                counts.sort_by(|a, b| b.1.cmp(&a.1));
                distributions.push(ValueCounts {
                    column: column.name.clone(),
                    counts,
                });
            }
            _ => {}
        }
    }

    (ranges, distributions)
}

/// Evaluate `spec` over `table`
pub fn filter(table: &Table, spec: &FilterSpec) -> Result<(Table, FilterStats)> {
    FilterEngine::new().filter(table, spec)
}

/// Inclusive temperature band combined with an exact quality match
pub fn environmental_filter(min_temp: f64, max_temp: f64, quality: &str) -> FilterSpec {
    FilterSpec::new()
        .and(Condition::between(COL_TEMPERATURE, min_temp, max_temp))
        .and(Condition::eq(COL_DATA_QUALITY, quality))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumericRange {
    fn condition(&self, field: &str) -> Option<Condition> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some(Condition::between(field, min, max)),
            (Some(min), None) => Some(Condition::ge(field, min)),
            (None, Some(max)) => Some(Condition::le(field, max)),
            (None, None) => None,
        }
    }
}

/// Common filtering criteria, every populated field ANDed together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPreset {
    pub temperature: Option<NumericRange>,
    pub humidity: Option<NumericRange>,
    pub quality: Vec<String>,
    pub station_types: Vec<String>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub station_id_prefix: Option<String>,
}

impl FilterPreset {
    pub fn to_spec(&self) -> FilterSpec {
        let mut spec = FilterSpec::new();
        if let Some(c) = self.temperature.and_then(|r| r.condition(COL_TEMPERATURE)) {
            spec = spec.and(c);
        }
        if let Some(c) = self.humidity.and_then(|r| r.condition(COL_HUMIDITY)) {
            spec = spec.and(c);
        }
        if !self.quality.is_empty() {
            spec = spec.and(Condition::is_in(COL_DATA_QUALITY, self.quality.iter().cloned()));
        }
        if !self.station_types.is_empty() {
            spec = spec.and(Condition::is_in(COL_STATION_TYPE, self.station_types.iter().cloned()));
        }
        if let Some((start, end)) = self.date_range {
            spec = spec.and(Condition::between(COL_DATE, start, end));
        }
        if let Some(prefix) = &self.station_id_prefix {
            spec = spec.and(Condition::starts_with(COL_STATION_ID, prefix));
        }
        spec
    }
}
