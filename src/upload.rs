use calamine::{Data, Reader, open_workbook_auto};
use camino::Utf8Path;

use crate::error::PipeError;
use crate::normalize::normalize;
use crate::table::{Cell, Table};

/// Loads an uploaded file, dispatching on extension, and returns the
/// normalized table. Anything that is neither CSV nor a spreadsheet
/// workbook is rejected.
pub fn load_file(path: &Utf8Path) -> Result<Table, PipeError> {
    let extension = path
        .extension()
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let table = match extension.as_str() {
        "csv" => read_csv(path)?,
        "xlsx" | "xlsm" | "xls" | "ods" => read_workbook(path)?,
        _ => return Err(PipeError::UnsupportedFormat(path.to_string())),
    };
    tracing::info!(%path, rows = table.len(), "file loaded");
    Ok(normalize(&table))
}

fn read_csv(path: &Utf8Path) -> Result<Table, PipeError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path.as_std_path())
        .map_err(|err| PipeError::Csv(err.to_string()))?;
    let header: Vec<String> = reader
        .headers()
        .map_err(|err| PipeError::Csv(err.to_string()))?
        .iter()
        .map(|field| field.to_string())
        .collect();
    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|err| PipeError::Csv(err.to_string()))?;
        rows.push(record.iter().map(|field| field.to_string()).collect());
    }
    Ok(Table::from_string_rows(header, rows))
}

fn read_workbook(path: &Utf8Path) -> Result<Table, PipeError> {
    let mut workbook = open_workbook_auto(path.as_std_path())
        .map_err(|err| PipeError::Workbook(err.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| PipeError::Workbook("workbook has no sheets".to_string()))?
        .map_err(|err| PipeError::Workbook(err.to_string()))?;

    let mut rows = range.rows();
    let header: Vec<String> = match rows.next() {
        Some(cells) => cells.iter().map(|cell| data_to_cell(cell).display()).collect(),
        None => return Ok(Table::empty()),
    };
    let mut table = Table::with_columns(header);
    for cells in rows {
        table.push_row(cells.iter().map(data_to_cell).collect());
    }
    Ok(table)
}

fn data_to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Missing,
        Data::String(text) => Cell::Text(text.clone()),
        Data::Float(value) => Cell::Number(*value),
        Data::Int(value) => Cell::Number(*value as f64),
        Data::Bool(flag) => Cell::Bool(*flag),
        Data::DateTime(datetime) => Cell::Number(datetime.as_f64()),
        Data::DateTimeIso(text) | Data::DurationIso(text) => Cell::Text(text.clone()),
        Data::Error(_) => Cell::Missing,
    }
}
