//! Core data types for the snapshot store.
//!
//! - [`CellValue`]: The small variant type every collected cell is stored as
//! - [`Record`]: One collected row (column name -> value)
//! - [`WriteMode`]: How a write treats an already existing table
//! - [`Generation`]: All rows of one table sharing one run timestamp

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};

/// A single cell of collected device state.
///
/// Values are ordered `Null < Bool < Int < Float < Text`. Floats compare with
/// [`f64::total_cmp`], so the order is total and `Eq` holds. Equality is exact:
/// `Int(1)` and `Float(1.0)` are different values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum CellValue {
    /// Absent or null value.
    #[default]
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text (also used for nested JSON, encoded as its JSON text).
    Text(String),
}

impl CellValue {
    /// Returns true for [`CellValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the text payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::Text(_) => 4,
        }
    }

    /// Encode for storage: SQL NULL for `Null`, JSON text otherwise.
    ///
    /// Writes reject non-finite floats before encoding.
    pub(crate) fn encode(&self) -> Option<String> {
        if self.is_null() {
            return None;
        }
        Some(Value::from(self.clone()).to_string())
    }

    /// Decode a stored cell. Text that is not valid JSON is kept verbatim.
    pub(crate) fn decode(raw: Option<String>) -> Self {
        match raw {
            None => Self::Null,
            Some(s) => serde_json::from_str::<Value>(&s)
                .map(Self::from)
                .unwrap_or(Self::Text(s)),
        }
    }
}

impl Ord for CellValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for CellValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CellValue {}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<Value> for CellValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map_or_else(|| Self::Text(n.to_string()), Self::Float),
            },
            Value::String(s) => Self::Text(s),
            nested => Self::Text(nested.to_string()),
        }
    }
}

impl From<CellValue> for Value {
    fn from(value: CellValue) -> Self {
        match value {
            CellValue::Null => Value::Null,
            CellValue::Bool(b) => Value::Bool(b),
            CellValue::Int(i) => Value::from(i),
            CellValue::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            CellValue::Text(s) => Value::String(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for CellValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for CellValue {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One collected row: column name -> value.
///
/// A column missing from a record reads the same as an explicit `Null`.
pub type Record = BTreeMap<String, CellValue>;

/// Build a [`Record`] from `column => value` pairs.
///
/// ```
/// use netdrift::{record, CellValue};
///
/// let row = record! { "pool" => "P1", "members" => 3 };
/// assert_eq!(row["members"], CellValue::Int(3));
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::storage::Record::new() };
    ($($col:expr => $val:expr),+ $(,)?) => {{
        let mut row = $crate::storage::Record::new();
        $( row.insert(::std::string::String::from($col), $crate::storage::CellValue::from($val)); )+
        row
    }};
}

/// What a write does when the target table already exists.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum WriteMode {
    /// Add a new generation, widening the schema when new columns appear.
    #[default]
    Append,
    /// Discard every prior generation and keep only the new one.
    Replace,
    /// Refuse to write when the table already exists.
    FailIfExists,
}

/// One `write` call's worth of input.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    /// Target table name.
    pub table: String,
    /// Rows of the new generation.
    pub rows: Vec<Record>,
    /// Run timestamp stamped on every row.
    pub timestamp: DateTime<Utc>,
    /// Behaviour when the table exists.
    pub mode: WriteMode,
}

/// Result of a committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    /// Normalized table name.
    pub table: String,
    /// Generation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Number of rows written.
    pub rows: usize,
    /// Whether the physical table was (re)created by this write.
    pub created: bool,
    /// Columns added by schema widening.
    pub added_columns: Vec<String>,
}

/// All rows of a table that share one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Generation {
    /// Run timestamp of the generation.
    pub timestamp: DateTime<Utc>,
    /// Rows in insertion order, each carrying every column of the table schema.
    pub rows: Vec<Record>,
}

/// Schema and newest generations of a table, read from one transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSnapshot {
    /// Column names, excluding the timestamp column.
    pub columns: Vec<String>,
    /// Newest generations, newest first.
    pub generations: Vec<Generation>,
}

/// Generation listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationInfo {
    /// Run timestamp of the generation.
    pub timestamp: DateTime<Utc>,
    /// Number of rows in the generation.
    pub rows: usize,
}

/// Catalog entry of a snapshot table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    /// Table name.
    pub name: String,
    /// Write mode of the most recent write.
    pub write_mode: WriteMode,
    /// When the table was first created.
    pub created_at: DateTime<Utc>,
    /// When the table was last written.
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_cell_value_order_is_total() {
        let mut values = vec![
            CellValue::from("b"),
            CellValue::Float(1.5),
            CellValue::Null,
            CellValue::Int(7),
            CellValue::Bool(true),
            CellValue::from("a"),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                CellValue::Null,
                CellValue::Bool(true),
                CellValue::Int(7),
                CellValue::Float(1.5),
                CellValue::from("a"),
                CellValue::from("b"),
            ]
        );
    }

    #[test]
    fn test_cell_value_equality_is_exact() {
        assert_ne!(CellValue::Int(1), CellValue::Float(1.0));
        assert_ne!(CellValue::from("1"), CellValue::Int(1));
        assert_eq!(CellValue::from(None::<String>), CellValue::Null);
    }

    #[test]
    fn test_cell_value_storage_encoding() {
        for value in [
            CellValue::Bool(false),
            CellValue::Int(-42),
            CellValue::Float(0.25),
            CellValue::from("up"),
            CellValue::from("123"),
        ] {
            assert_eq!(CellValue::decode(value.encode()), value);
        }
        assert_eq!(CellValue::Null.encode(), None);
        assert_eq!(CellValue::decode(None), CellValue::Null);
    }

    #[test]
    fn test_cell_value_from_nested_json() {
        let value = CellValue::from(serde_json::json!({"vlan": 10}));
        assert_eq!(value, CellValue::from(r#"{"vlan":10}"#));
    }

    #[test]
    fn test_record_macro() {
        let row = record! { "pool" => "P1", "up" => true, "members" => 3 };
        assert_eq!(row.len(), 3);
        assert_eq!(row["pool"], CellValue::from("P1"));
        assert_eq!(row["up"], CellValue::Bool(true));
    }

    #[test]
    fn test_write_mode_strings() {
        assert_eq!(WriteMode::from_str("append").unwrap(), WriteMode::Append);
        assert_eq!(WriteMode::from_str("REPLACE").unwrap(), WriteMode::Replace);
        assert_eq!(
            WriteMode::from_str("fail_if_exists").unwrap(),
            WriteMode::FailIfExists
        );
        assert_eq!(WriteMode::FailIfExists.as_ref(), "fail_if_exists");
        assert!(WriteMode::from_str("upsert").is_err());
    }
}
