use regex::Regex;

use crate::error::PipeError;
use crate::normalize::normalize;
use crate::sheets::SheetsApi;
use crate::table::Table;

pub fn spreadsheet_id_from_url(url: &str) -> Result<String, PipeError> {
    let pattern = Regex::new(r"/spreadsheets/d/([A-Za-z0-9_-]+)").unwrap();
    pattern
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
        .ok_or_else(|| PipeError::InvalidSheetUrl(url.to_string()))
}

/// Loads the first worksheet of the document behind a Google Sheets
/// URL: first row is the header, the rest are data rows. A sheet with
/// no rows yields an empty table.
pub fn load_sheet_url(api: &dyn SheetsApi, url: &str) -> Result<Table, PipeError> {
    let spreadsheet_id = spreadsheet_id_from_url(url)?;
    let titles = api.sheet_titles(&spreadsheet_id)?;
    let first = titles
        .first()
        .ok_or_else(|| PipeError::NotFound(format!("no worksheets in {spreadsheet_id}")))?;

    let mut values = api.values(&spreadsheet_id, first)?;
    if values.is_empty() {
        return Ok(Table::empty());
    }
    let header = values.remove(0);
    let table = Table::from_string_rows(header, values);
    tracing::info!(sheet = %first, rows = table.len(), "sheet loaded");
    Ok(normalize(&table))
}
