use std::fs;

use camino::Utf8Path;
use serde::Serialize;
use serde_json::Value;

use crate::error::PipeError;

/// A single cell value. `Missing` is distinct from `Text("")` and from
/// `Number(0.0)`: it marks a cell that was absent or failed coercion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Text(String),
    Number(f64),
    Bool(bool),
    Missing,
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    /// Missing, or text that is empty after trim.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Missing => true,
            Cell::Text(value) => value.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// The value as written to a sheet cell or CSV field. `Missing`
    /// renders as the empty string.
    pub fn display(&self) -> String {
        match self {
            Cell::Text(value) => value.clone(),
            Cell::Number(value) => format_number(*value),
            Cell::Bool(value) => value.to_string(),
            Cell::Missing => String::new(),
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(text) => Cell::Text(text.clone()),
            Value::Number(number) => number
                .as_f64()
                .map(Cell::Number)
                .unwrap_or(Cell::Missing),
            Value::Bool(flag) => Cell::Bool(*flag),
            _ => Cell::Missing,
        }
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// A loose bag of named fields, the input shape for upsert and the
/// per-page shape produced by the Notion adapter.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: Vec<(String, Cell)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, cell: Cell) -> Self {
        self.push(name, cell);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, cell: Cell) {
        self.fields.push((name.into(), cell));
    }

    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, cell)| cell)
    }

    pub fn fields(&self) -> &[(String, Cell)] {
        &self.fields
    }

    pub fn from_json(value: &Value) -> Result<Self, PipeError> {
        let object = value.as_object().ok_or_else(|| {
            PipeError::InvalidRows("expected a JSON object per row".to_string())
        })?;
        let mut record = Record::new();
        for (name, field) in object {
            record.push(name.clone(), Cell::from_json(field));
        }
        Ok(record)
    }
}

/// An ordered-column table. Rows always have exactly one cell per
/// column; ragged input is padded with `Cell::Missing`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_columns(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a table from a header row plus raw string rows, the shape
    /// returned by spreadsheet value reads and CSV parsing.
    pub fn from_string_rows(header: Vec<String>, raw_rows: Vec<Vec<String>>) -> Self {
        let mut table = Table::with_columns(header);
        for raw in raw_rows {
            let cells = raw.into_iter().map(Cell::Text).collect();
            table.push_row(cells);
        }
        table
    }

    /// Builds a table from record bags, unioning field names into
    /// columns in first-seen order.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for (name, _) in record.fields() {
                if !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
        }
        let mut table = Table::with_columns(columns);
        for record in records {
            let cells = table
                .columns
                .iter()
                .map(|column| record.get(column).cloned().unwrap_or(Cell::Missing))
                .collect();
            table.push_row(cells);
        }
        table
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn cell(&self, row: usize, name: &str) -> Option<&Cell> {
        let index = self.column_index(name)?;
        self.rows.get(row).and_then(|cells| cells.get(index))
    }

    pub fn set_cell(&mut self, row: usize, name: &str, cell: Cell) {
        if let Some(index) = self.column_index(name) {
            if let Some(cells) = self.rows.get_mut(row) {
                cells[index] = cell;
            }
        }
    }

    pub fn push_row(&mut self, mut cells: Vec<Cell>) {
        cells.resize(self.columns.len(), Cell::Missing);
        self.rows.push(cells);
    }

    pub fn add_column(&mut self, name: impl Into<String>, fill: Cell) {
        self.columns.push(name.into());
        for row in &mut self.rows {
            row.push(fill.clone());
        }
    }

    pub fn rename_columns<F>(&mut self, rename: F)
    where
        F: Fn(&str) -> String,
    {
        for column in &mut self.columns {
            *column = rename(column);
        }
    }

    /// Same columns, only the rows matching the predicate (cloned).
    pub fn filtered<F>(&self, predicate: F) -> Table
    where
        F: Fn(&[Cell]) -> bool,
    {
        Table {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| predicate(row.as_slice()))
                .cloned()
                .collect(),
        }
    }

    /// Header row plus display-rendered data rows, the shape accepted
    /// by spreadsheet value writes.
    pub fn to_sheet_values(&self) -> Vec<Vec<String>> {
        let mut values = Vec::with_capacity(self.rows.len() + 1);
        values.push(self.columns.clone());
        for row in &self.rows {
            values.push(row.iter().map(Cell::display).collect());
        }
        values
    }

    pub fn to_csv_string(&self) -> Result<String, PipeError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|err| PipeError::Csv(err.to_string()))?;
        for row in &self.rows {
            let fields: Vec<String> = row.iter().map(Cell::display).collect();
            writer
                .write_record(&fields)
                .map_err(|err| PipeError::Csv(err.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| PipeError::Csv(err.to_string()))?;
        String::from_utf8(bytes).map_err(|err| PipeError::Csv(err.to_string()))
    }

    pub fn write_csv(&self, path: &Utf8Path) -> Result<(), PipeError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PipeError::Filesystem(err.to_string()))?;
        let content = self.to_csv_string()?;
        let temp = tempfile::Builder::new()
            .prefix("pinpon-csv")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| PipeError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content.as_bytes())
            .map_err(|err| PipeError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| PipeError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
