use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;

use pinpon_datapipe::error::PipeError;
use pinpon_datapipe::invoices::{INVOICE_COLUMNS, InvoiceStore};
use pinpon_datapipe::sheets::SheetsApi;
use pinpon_datapipe::sync::{export_pending, sync_folios};
use pinpon_datapipe::table::Cell;

const FACT: &str = "FACTURAS";
const CONT: &str = "FACTURAS_PARA_CONTADOR";

#[derive(Clone, Default)]
struct MockSheets {
    sheets: Arc<Mutex<BTreeMap<String, Vec<Vec<String>>>>>,
    writes: Arc<Mutex<usize>>,
}

impl MockSheets {
    fn insert(&self, name: &str, values: Vec<Vec<String>>) {
        self.sheets
            .lock()
            .unwrap()
            .insert(name.to_string(), values);
    }

    fn rows(&self, name: &str) -> Option<Vec<Vec<String>>> {
        self.sheets.lock().unwrap().get(name).cloned()
    }

    fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

impl SheetsApi for MockSheets {
    fn sheet_titles(&self, _spreadsheet_id: &str) -> Result<Vec<String>, PipeError> {
        Ok(self.sheets.lock().unwrap().keys().cloned().collect())
    }

    fn values(&self, _spreadsheet_id: &str, sheet: &str) -> Result<Vec<Vec<String>>, PipeError> {
        self.sheets
            .lock()
            .unwrap()
            .get(sheet)
            .cloned()
            .ok_or_else(|| PipeError::NotFound(sheet.to_string()))
    }

    fn overwrite(
        &self,
        _spreadsheet_id: &str,
        sheet: &str,
        values: &[Vec<String>],
    ) -> Result<(), PipeError> {
        self.sheets
            .lock()
            .unwrap()
            .insert(sheet.to_string(), values.to_vec());
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }

    fn add_sheet(&self, _spreadsheet_id: &str, title: &str) -> Result<(), PipeError> {
        self.sheets.lock().unwrap().insert(title.to_string(), Vec::new());
        Ok(())
    }
}

fn store(mock: &MockSheets) -> InvoiceStore<MockSheets> {
    InvoiceStore::new(mock.clone(), "sheet-1", FACT, CONT)
}

fn header() -> Vec<String> {
    INVOICE_COLUMNS.iter().map(|c| c.to_string()).collect()
}

fn full_row(id: &str, estatus: &str, folio: &str) -> Vec<String> {
    vec![
        id.to_string(),
        "2025-03-01".to_string(),
        "Ana".to_string(),
        "H1".to_string(),
        "P1".to_string(),
        "C1".to_string(),
        "consulta".to_string(),
        "60".to_string(),
        "100".to_string(),
        "16".to_string(),
        "116".to_string(),
        estatus.to_string(),
        folio.to_string(),
    ]
}

#[test]
fn export_filters_on_por_enviar_and_blanks_folio() {
    let mock = MockSheets::default();
    mock.insert(
        FACT,
        vec![
            header(),
            full_row("1", "Por enviar", ""),
            full_row("2", "Timbrada", ""),
        ],
    );

    let outcome = export_pending(&store(&mock)).unwrap();

    assert_eq!(outcome.exported, 1);
    assert_eq!(outcome.table.cell(0, "ID"), Some(&Cell::text("1")));
    assert_eq!(outcome.table.cell(0, "FOLIO"), Some(&Cell::text("")));

    let written = mock.rows(CONT).unwrap();
    assert_eq!(written[0], header());
    assert_eq!(written.len(), 2);
}

#[test]
fn export_keeps_folios_that_were_already_assigned() {
    let mock = MockSheets::default();
    mock.insert(FACT, vec![header(), full_row("1", "Por enviar", "F-9")]);

    let outcome = export_pending(&store(&mock)).unwrap();
    assert_eq!(outcome.table.cell(0, "FOLIO"), Some(&Cell::text("F-9")));
}

#[test]
fn export_with_nothing_pending_performs_no_write() {
    let mock = MockSheets::default();
    mock.insert(FACT, vec![header(), full_row("1", "Timbrada", "")]);

    let outcome = export_pending(&store(&mock)).unwrap();

    assert_eq!(outcome.exported, 0);
    assert_eq!(mock.write_count(), 0);
    assert!(mock.rows(CONT).is_none());
}

#[test]
fn sync_requires_the_accountant_worksheet() {
    let mock = MockSheets::default();
    mock.insert(FACT, vec![header(), full_row("1", "Por enviar", "")]);

    let err = sync_folios(&store(&mock)).unwrap_err();
    assert_matches!(err, PipeError::NotFound(_));
}

#[test]
fn sync_with_an_empty_accountant_table_performs_no_write() {
    let mock = MockSheets::default();
    mock.insert(FACT, vec![header(), full_row("1", "Por enviar", "")]);
    mock.insert(CONT, vec![header()]);

    let outcome = sync_folios(&store(&mock)).unwrap();

    assert_eq!(outcome.updated, 0);
    assert_eq!(outcome.table.len(), 1);
    assert_eq!(mock.write_count(), 0);
}

#[test]
fn sync_fails_when_accountant_columns_are_missing() {
    let mock = MockSheets::default();
    mock.insert(FACT, vec![header(), full_row("1", "Por enviar", "")]);
    mock.insert(
        CONT,
        vec![
            vec!["ID".to_string(), "FOLIO".to_string()],
            vec!["1".to_string(), "F-1".to_string()],
        ],
    );

    let err = sync_folios(&store(&mock)).unwrap_err();
    assert_matches!(err, PipeError::Schema(columns) => {
        assert_eq!(columns, vec!["ESTATUS".to_string()]);
    });
}

#[test]
fn sync_applies_folio_and_estatus_by_id() {
    let mock = MockSheets::default();
    mock.insert(
        FACT,
        vec![
            header(),
            full_row("1", "Por enviar", ""),
            full_row("2", "Por enviar", ""),
        ],
    );
    mock.insert(CONT, vec![header(), full_row("1", "Timbrada", "A-77")]);

    let outcome = sync_folios(&store(&mock)).unwrap();

    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.table.cell(0, "FOLIO"), Some(&Cell::text("A-77")));
    assert_eq!(outcome.table.cell(0, "ESTATUS"), Some(&Cell::text("Timbrada")));
    // the unmatched row is untouched
    assert_eq!(outcome.table.cell(1, "ESTATUS"), Some(&Cell::text("Por enviar")));
}

#[test]
fn sync_never_erases_with_blank_accountant_values() {
    let mock = MockSheets::default();
    mock.insert(FACT, vec![header(), full_row("1", "Timbrada", "F-1")]);
    mock.insert(CONT, vec![header(), full_row("1", "  ", "")]);

    let outcome = sync_folios(&store(&mock)).unwrap();

    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.table.cell(0, "FOLIO"), Some(&Cell::text("F-1")));
    assert_eq!(outcome.table.cell(0, "ESTATUS"), Some(&Cell::text("Timbrada")));
}

#[test]
fn sync_writes_the_invoice_table_even_when_nothing_changed() {
    let mock = MockSheets::default();
    mock.insert(FACT, vec![header(), full_row("1", "Timbrada", "F-1")]);
    mock.insert(CONT, vec![header(), full_row("9", "Pagada", "F-2")]);

    let outcome = sync_folios(&store(&mock)).unwrap();

    assert_eq!(outcome.updated, 0);
    assert_eq!(mock.write_count(), 1);
}
