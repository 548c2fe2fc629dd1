use std::io::{self, Write};

use serde::Serialize;

use crate::kpi::{InvoiceSummary, Kpis};
use crate::sync::{ExportOutcome, SyncOutcome};
use crate::table::Table;

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub rows: usize,
    pub kpis: Kpis,
    pub table: Table,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceReport {
    pub rows: usize,
    pub summary: InvoiceSummary,
    pub table: Table,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_load(result: &LoadReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_invoices(result: &InvoiceReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_export(result: &ExportOutcome) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_sync(result: &SyncOutcome) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
