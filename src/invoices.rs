//! Read/write access to the invoices worksheet. Every operation is a
//! full-table read-modify-write with no concurrency token: two callers
//! mutating the same spreadsheet concurrently lose one side's update
//! (last writer wins at whole-sheet granularity).

use crate::error::PipeError;
use crate::sheets::SheetsApi;
use crate::table::{Cell, Record, Table};

/// Invoice Record columns in canonical order; also the header row
/// written when the worksheet is first created.
pub const INVOICE_COLUMNS: [&str; 13] = [
    "ID",
    "FECHA",
    "PACIENTE",
    "HOSPITAL",
    "PROVEEDOR",
    "CATEGORIA",
    "CONCEPTO",
    "COSTO_MXN",
    "PRECIO_MXN",
    "IVA_16",
    "TOTAL_MXN",
    "ESTATUS",
    "FOLIO",
];

/// A row with a non-empty CONCEPTO must have every one of these.
pub const BUSINESS_KEY_COLUMNS: [&str; 7] = [
    "ID",
    "FECHA",
    "PACIENTE",
    "HOSPITAL",
    "PROVEEDOR",
    "CATEGORIA",
    "CONCEPTO",
];

pub const MONEY_COLUMNS: [&str; 4] = ["COSTO_MXN", "PRECIO_MXN", "IVA_16", "TOTAL_MXN"];

pub const STATUS_POR_ENVIAR: &str = "Por enviar";
pub const STATUS_TIMBRADA: &str = "Timbrada";
pub const STATUS_PAGADA: &str = "Pagada";

pub struct InvoiceStore<S: SheetsApi> {
    api: S,
    spreadsheet_id: String,
    invoice_sheet: String,
    accountant_sheet: String,
}

impl<S: SheetsApi> InvoiceStore<S> {
    pub fn new(
        api: S,
        spreadsheet_id: impl Into<String>,
        invoice_sheet: impl Into<String>,
        accountant_sheet: impl Into<String>,
    ) -> Self {
        Self {
            api,
            spreadsheet_id: spreadsheet_id.into(),
            invoice_sheet: invoice_sheet.into(),
            accountant_sheet: accountant_sheet.into(),
        }
    }

    pub fn invoice_sheet(&self) -> &str {
        &self.invoice_sheet
    }

    pub fn accountant_sheet(&self) -> &str {
        &self.accountant_sheet
    }

    /// Fetches the invoice table, creating the worksheet with its
    /// header row on first use, and guarantees the full column set:
    /// absent required columns are appended in canonical order, filled
    /// with 0 for the monetary columns and "" otherwise.
    pub fn read(&self) -> Result<Table, PipeError> {
        self.ensure_invoice_sheet()?;
        let mut table = self.fetch(&self.invoice_sheet)?;
        for column in INVOICE_COLUMNS {
            if !table.has_column(column) {
                let fill = if MONEY_COLUMNS.contains(&column) {
                    Cell::Number(0.0)
                } else {
                    Cell::text("")
                };
                table.add_column(column, fill);
            }
        }
        Ok(table)
    }

    /// Applies each input row by ID: an existing row gets only the
    /// supplied fields overwritten, a new ID is appended with unset
    /// columns defaulted to empty string, and rows without an ID are
    /// skipped. The result is validated and written back whole; an
    /// invalid result aborts with no write.
    pub fn upsert(&self, rows: &[Record]) -> Result<Table, PipeError> {
        let mut table = self.read()?;
        for record in rows {
            let id = record.get("ID").map(Cell::display).unwrap_or_default();
            let id = id.trim();
            if id.is_empty() {
                tracing::debug!("upsert row without ID skipped");
                continue;
            }
            let existing = (0..table.len()).find(|row| {
                table
                    .cell(*row, "ID")
                    .map(|cell| cell.display().trim() == id)
                    .unwrap_or(false)
            });
            match existing {
                Some(row) => {
                    for (name, cell) in record.fields() {
                        if table.has_column(name) {
                            table.set_cell(row, name, cell.clone());
                        } else {
                            tracing::debug!(field = %name, "field matches no invoice column, ignored");
                        }
                    }
                }
                None => {
                    let cells: Vec<Cell> = table
                        .columns()
                        .iter()
                        .map(|column| record.get(column).cloned().unwrap_or_else(|| Cell::text("")))
                        .collect();
                    table.push_row(cells);
                }
            }
        }

        let (ok, invalid) = validate(&table)?;
        if !ok {
            return Err(PipeError::Validation { invalid });
        }
        self.write_invoices(&table)?;
        tracing::info!(rows = table.len(), "invoice table written");
        Ok(table)
    }

    pub fn write_invoices(&self, table: &Table) -> Result<(), PipeError> {
        self.api.overwrite(
            &self.spreadsheet_id,
            &self.invoice_sheet,
            &table.to_sheet_values(),
        )
    }

    pub fn read_accountant(&self) -> Result<Table, PipeError> {
        let titles = self.api.sheet_titles(&self.spreadsheet_id)?;
        if !titles.iter().any(|title| title == &self.accountant_sheet) {
            return Err(PipeError::NotFound(format!(
                "worksheet {} does not exist yet",
                self.accountant_sheet
            )));
        }
        self.fetch(&self.accountant_sheet)
    }

    pub fn write_accountant(&self, table: &Table) -> Result<(), PipeError> {
        let titles = self.api.sheet_titles(&self.spreadsheet_id)?;
        if !titles.iter().any(|title| title == &self.accountant_sheet) {
            self.api.add_sheet(&self.spreadsheet_id, &self.accountant_sheet)?;
        }
        self.api.overwrite(
            &self.spreadsheet_id,
            &self.accountant_sheet,
            &table.to_sheet_values(),
        )
    }

    fn ensure_invoice_sheet(&self) -> Result<(), PipeError> {
        let titles = self.api.sheet_titles(&self.spreadsheet_id)?;
        if !titles.iter().any(|title| title == &self.invoice_sheet) {
            self.api.add_sheet(&self.spreadsheet_id, &self.invoice_sheet)?;
            let header: Vec<Vec<String>> = vec![
                INVOICE_COLUMNS
                    .iter()
                    .map(|column| column.to_string())
                    .collect(),
            ];
            self.api
                .overwrite(&self.spreadsheet_id, &self.invoice_sheet, &header)?;
        }
        Ok(())
    }

    fn fetch(&self, sheet: &str) -> Result<Table, PipeError> {
        let mut values = self.api.values(&self.spreadsheet_id, sheet)?;
        if values.is_empty() {
            return Ok(Table::empty());
        }
        let header = values.remove(0);
        Ok(Table::from_string_rows(header, values))
    }
}

/// Checks the business-key invariant: rows with a non-empty CONCEPTO
/// must not be missing any business-key field. Returns whether the
/// table is valid together with the invalid subset.
pub fn validate(table: &Table) -> Result<(bool, Table), PipeError> {
    if table.is_empty() {
        return Ok((true, table.filtered(|_| false)));
    }

    let missing: Vec<String> = BUSINESS_KEY_COLUMNS
        .iter()
        .filter(|column| !table.has_column(column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PipeError::Schema(missing));
    }

    let mut invalid = table.filtered(|_| false);
    for row in 0..table.len() {
        let concepto_set = table
            .cell(row, "CONCEPTO")
            .map(|cell| !cell.display().trim().is_empty())
            .unwrap_or(false);
        if !concepto_set {
            continue;
        }
        let incomplete = BUSINESS_KEY_COLUMNS.iter().any(|column| {
            table
                .cell(row, column)
                .map(Cell::is_missing)
                .unwrap_or(true)
        });
        if incomplete {
            invalid.push_row(table.rows()[row].clone());
        }
    }
    Ok((invalid.len() == 0, invalid))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::table::Record;

    fn row(concepto: &str, paciente: Cell) -> Record {
        Record::new()
            .with("ID", Cell::text("1"))
            .with("FECHA", Cell::text("2025-03-01"))
            .with("PACIENTE", paciente)
            .with("HOSPITAL", Cell::text("H1"))
            .with("PROVEEDOR", Cell::text("P1"))
            .with("CATEGORIA", Cell::text("C1"))
            .with("CONCEPTO", Cell::text(concepto))
    }

    #[test]
    fn concepto_with_missing_business_key_is_invalid() {
        let table = Table::from_records(vec![row("servicio", Cell::Missing)]);
        let (ok, invalid) = validate(&table).unwrap();
        assert!(!ok);
        assert_eq!(invalid.len(), 1);
    }

    #[test]
    fn empty_concepto_is_never_flagged() {
        let table = Table::from_records(vec![row("", Cell::Missing)]);
        let (ok, invalid) = validate(&table).unwrap();
        assert!(ok);
        assert_eq!(invalid.len(), 0);
    }

    #[test]
    fn empty_string_fields_count_as_present() {
        let table = Table::from_records(vec![row("servicio", Cell::text(""))]);
        let (ok, _) = validate(&table).unwrap();
        assert!(ok);
    }

    #[test]
    fn absent_business_key_column_is_a_schema_error() {
        let table = Table::from_records(vec![
            Record::new()
                .with("ID", Cell::text("1"))
                .with("CONCEPTO", Cell::text("servicio")),
        ]);
        let err = validate(&table).unwrap_err();
        assert_matches!(err, PipeError::Schema(columns) => {
            assert!(columns.contains(&"PACIENTE".to_string()));
        });
    }

    #[test]
    fn empty_table_is_valid() {
        let (ok, invalid) = validate(&Table::empty()).unwrap();
        assert!(ok);
        assert_eq!(invalid.len(), 0);
    }
}
