//! Export/import cycle between the invoice table and the accountant
//! worksheet, keyed by ID. ESTATUS acts as an advisory state tag
//! ("Por enviar" → "Timbrada" → "Pagada"); the protocol reacts to the
//! current value and never enforces transition order.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::PipeError;
use crate::invoices::{InvoiceStore, STATUS_POR_ENVIAR, validate};
use crate::sheets::SheetsApi;
use crate::table::{Cell, Table};

#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub exported: usize,
    pub sheet: String,
    pub exported_at: String,
    pub table: Table,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub updated: usize,
    pub synced_at: String,
    pub table: Table,
}

/// Exports every invoice row whose ESTATUS is exactly "Por enviar" to
/// the accountant worksheet, replacing its contents. Blank FOLIO cells
/// are normalized to empty strings; already-assigned folios are kept.
/// An empty filter result performs no write. Rows violating the
/// business-key invariant abort the export.
pub fn export_pending<S: SheetsApi>(store: &InvoiceStore<S>) -> Result<ExportOutcome, PipeError> {
    let table = store.read()?;
    let (ok, invalid) = validate(&table)?;
    if !ok {
        return Err(PipeError::Validation { invalid });
    }

    let Some(status_index) = table.column_index("ESTATUS") else {
        return Ok(outcome(store, Table::empty()));
    };
    let mut exported = table.filtered(|row| row[status_index].display() == STATUS_POR_ENVIAR);
    if exported.len() == 0 {
        tracing::info!("no rows pending export");
        return Ok(outcome(store, exported));
    }

    for row in 0..exported.len() {
        let blank = exported
            .cell(row, "FOLIO")
            .map(Cell::is_blank)
            .unwrap_or(true);
        if blank {
            exported.set_cell(row, "FOLIO", Cell::text(""));
        }
    }

    store.write_accountant(&exported)?;
    tracing::info!(rows = exported.len(), sheet = store.accountant_sheet(), "pending rows exported");
    Ok(outcome(store, exported))
}

fn outcome<S: SheetsApi>(store: &InvoiceStore<S>, table: Table) -> ExportOutcome {
    ExportOutcome {
        exported: table.len(),
        sheet: store.accountant_sheet().to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        table,
    }
}

/// Pulls FOLIO/ESTATUS assignments back from the accountant worksheet
/// into the invoice table, keyed by ID. Empty-after-trim accountant
/// values never overwrite existing data. The invoice table is written
/// back unconditionally once the pass completes.
pub fn sync_folios<S: SheetsApi>(store: &InvoiceStore<S>) -> Result<SyncOutcome, PipeError> {
    let mut invoices = store.read()?;
    let accountant = store.read_accountant()?;
    let synced_at = chrono::Utc::now().to_rfc3339();

    if invoices.is_empty() || accountant.is_empty() {
        return Ok(SyncOutcome {
            updated: 0,
            synced_at,
            table: invoices,
        });
    }

    let missing: Vec<String> = ["ID", "FOLIO", "ESTATUS"]
        .iter()
        .filter(|column| !accountant.has_column(column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PipeError::Schema(missing));
    }

    let mut assignments: HashMap<String, (Cell, Cell)> = HashMap::new();
    for row in 0..accountant.len() {
        let id = accountant.cell(row, "ID").map(Cell::display).unwrap_or_default();
        let id = id.trim();
        if id.is_empty() {
            continue;
        }
        let folio = accountant.cell(row, "FOLIO").cloned().unwrap_or(Cell::Missing);
        let estatus = accountant
            .cell(row, "ESTATUS")
            .cloned()
            .unwrap_or(Cell::Missing);
        assignments.insert(id.to_string(), (folio, estatus));
    }

    let mut updated = 0usize;
    for row in 0..invoices.len() {
        let id = invoices.cell(row, "ID").map(Cell::display).unwrap_or_default();
        let Some((folio, estatus)) = assignments.get(id.trim()) else {
            continue;
        };
        if !folio.is_blank() {
            invoices.set_cell(row, "FOLIO", folio.clone());
        }
        if !estatus.is_blank() {
            invoices.set_cell(row, "ESTATUS", estatus.clone());
        }
        updated += 1;
    }

    store.write_invoices(&invoices)?;
    tracing::info!(updated, "folios synchronized");
    Ok(SyncOutcome {
        updated,
        synced_at,
        table: invoices,
    })
}
