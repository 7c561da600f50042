use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result, ValidationError};

pub const NO_DATA_PREVIEW: &str = "No data loaded.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Infers a typed value from raw cell text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if let Ok(int) = trimmed.parse::<i64>() {
            return Value::Int(int);
        }
        if let Ok(float) = trimmed.parse::<f64>() {
            if float.is_finite() {
                return Value::Float(float);
            }
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Text(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Int(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Text(_) => Some(ColumnType::Text),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
    Empty,
    Mixed,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
            ColumnType::Empty => "empty",
            ColumnType::Mixed => "mixed",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    fn merge(self, other: ColumnType) -> ColumnType {
        match (self, other) {
            (ColumnType::Empty, t) | (t, ColumnType::Empty) => t,
            (a, b) if a == b => a,
            (ColumnType::Integer, ColumnType::Float) | (ColumnType::Float, ColumnType::Integer) => {
                ColumnType::Float
            }
            _ => ColumnType::Mixed,
        }
    }
}

/// A loaded table: named columns over rows of typed cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Builds a table, padding short rows with nulls and dropping cells past
    /// the last column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Null);
                row
            })
            .collect();
        Self { columns, rows }
    }

    /// Loads a delimited text file or a spreadsheet, chosen by extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match extension(path).as_deref() {
            Some("xlsx" | "xlsm" | "xls" | "ods") => Self::from_excel_path(path),
            _ => Self::from_csv_path(path),
        }
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let delimiter = match extension(path).as_deref() {
            Some("csv" | "txt") => b',',
            Some("tsv" | "tab") => b'\t',
            _ => return Err(CoreError::UnsupportedInput(path.to_path_buf())),
        };
        let file = fs::File::open(path)?;
        Self::from_csv_reader(file, delimiter)
    }

    /// First worksheet of a workbook; its first row holds the column names.
    pub fn from_excel_path(path: &Path) -> Result<Self> {
        let mut workbook = open_workbook_auto(path)?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| CoreError::EmptyWorkbook(path.to_path_buf()))??;
        let mut rows = range.rows();
        let Some(header) = rows.next() else {
            return Ok(Self::default());
        };
        let columns = header
            .iter()
            .map(|cell| cell.to_string().trim().to_string())
            .collect();
        let rows = rows
            .filter(|row| !row.iter().all(|cell| matches!(cell, Data::Empty)))
            .map(|row| row.iter().map(cell_value).collect())
            .collect();
        Ok(Self::new(columns, rows))
    }

    pub fn from_csv_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(reader);
        let columns = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            rows.push(record.iter().map(Value::parse).collect());
        }
        Ok(Self::new(columns, rows))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_values(&self, column: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().filter_map(move |row| row.get(column))
    }

    pub fn column_type(&self, column: usize) -> ColumnType {
        self.column_values(column)
            .filter_map(Value::column_type)
            .fold(ColumnType::Empty, ColumnType::merge)
    }

    /// Checks the table can be indexed. Each rule is reported independently.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.rows.is_empty() {
            errors.push(ValidationError::EmptyTable);
        }
        if self.columns.is_empty() {
            errors.push(ValidationError::NoColumns);
        }
        errors
    }

    /// Renders a row as comma-separated `col: value` pairs.
    pub fn render_row(&self, row: usize) -> Option<String> {
        let cells = self.rows.get(row)?;
        Some(
            self.columns
                .iter()
                .zip(cells)
                .map(|(name, value)| format!("{name}: {value}"))
                .collect::<Vec<_>>()
                .join(", "),
        )
    }

    /// Pipe-delimited header plus the first `limit` rows.
    pub fn preview(&self, limit: usize) -> String {
        if self.columns.is_empty() {
            return NO_DATA_PREVIEW.to_string();
        }
        let mut out = String::new();
        out.push_str(&self.columns.join(" | "));
        out.push('\n');
        for row in self.rows.iter().take(limit) {
            let cells = row.iter().map(|v| v.to_string()).collect::<Vec<_>>();
            out.push_str(&cells.join(" | "));
            out.push('\n');
        }
        if self.rows.len() > limit {
            out.push_str(&format!("... ({} more rows)\n", self.rows.len() - limit));
        }
        out
    }

    /// SHA-256 over the rendered header and cells.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for column in &self.columns {
            hasher.update(column.as_bytes());
            hasher.update([0x1fu8]);
        }
        for row in &self.rows {
            hasher.update([0x1eu8]);
            for value in row {
                hasher.update(value.to_string().as_bytes());
                hasher.update([0x1fu8]);
            }
        }
        hex::encode(hasher.finalize())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Spreadsheet cells go through the same inference as CSV text, so a
/// whole-number float such as `100.0` becomes `Int(100)`.
fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::Bool(flag) => Value::Bool(*flag),
        Data::Int(int) => Value::Int(*int),
        other => Value::parse(&other.to_string()),
    }
}
