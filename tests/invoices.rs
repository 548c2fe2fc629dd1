use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;

use pinpon_datapipe::error::PipeError;
use pinpon_datapipe::invoices::{INVOICE_COLUMNS, InvoiceStore};
use pinpon_datapipe::sheets::SheetsApi;
use pinpon_datapipe::table::{Cell, Record};

#[derive(Clone, Default)]
struct MockSheets {
    sheets: Arc<Mutex<BTreeMap<String, Vec<Vec<String>>>>>,
    writes: Arc<Mutex<usize>>,
}

impl MockSheets {
    fn with_sheet(name: &str, values: Vec<Vec<String>>) -> Self {
        let mock = Self::default();
        mock.sheets
            .lock()
            .unwrap()
            .insert(name.to_string(), values);
        mock
    }

    fn rows(&self, name: &str) -> Vec<Vec<String>> {
        self.sheets
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
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
    InvoiceStore::new(mock.clone(), "sheet-1", "FACTURAS", "FACTURAS_PARA_CONTADOR")
}

fn header() -> Vec<String> {
    INVOICE_COLUMNS.iter().map(|c| c.to_string()).collect()
}

fn full_row(id: &str, estatus: &str) -> Vec<String> {
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
        String::new(),
    ]
}

#[test]
fn read_bootstraps_the_worksheet_with_its_header() {
    let mock = MockSheets::default();
    let table = store(&mock).read().unwrap();

    assert_eq!(table.columns(), INVOICE_COLUMNS);
    assert_eq!(table.len(), 0);
    assert_eq!(mock.rows("FACTURAS"), vec![header()]);
}

#[test]
fn read_backfills_absent_required_columns() {
    let mock = MockSheets::with_sheet(
        "FACTURAS",
        vec![
            vec!["ID".to_string(), "CONCEPTO".to_string()],
            vec!["1".to_string(), "consulta".to_string()],
        ],
    );
    let table = store(&mock).read().unwrap();

    assert_eq!(table.columns().len(), INVOICE_COLUMNS.len());
    assert_eq!(table.cell(0, "COSTO_MXN"), Some(&Cell::Number(0.0)));
    assert_eq!(table.cell(0, "ESTATUS"), Some(&Cell::text("")));
    // pre-existing columns keep their position
    assert_eq!(&table.columns()[..2], ["ID", "CONCEPTO"]);
}

#[test]
fn upsert_twice_with_identical_values_keeps_one_row() {
    let mock = MockSheets::with_sheet("FACTURAS", vec![header()]);
    let st = store(&mock);
    let record = Record::new()
        .with("ID", Cell::text("7"))
        .with("CONCEPTO", Cell::text("servicio"))
        .with("PRECIO_MXN", Cell::Number(100.0));

    let first = st.upsert(std::slice::from_ref(&record)).unwrap();
    let second = st.upsert(std::slice::from_ref(&record)).unwrap();

    assert_eq!(first, second);
    assert_eq!(second.len(), 1);
    assert_eq!(second.cell(0, "PRECIO_MXN"), Some(&Cell::Number(100.0)));
}

#[test]
fn upsert_overwrites_only_the_supplied_fields() {
    let mock = MockSheets::with_sheet(
        "FACTURAS",
        vec![header(), full_row("1", "Por enviar")],
    );
    let table = store(&mock)
        .upsert(&[Record::new()
            .with("ID", Cell::text("1"))
            .with("ESTATUS", Cell::text("Pagada"))])
        .unwrap();

    assert_eq!(table.len(), 1);
    assert_eq!(table.cell(0, "ESTATUS"), Some(&Cell::text("Pagada")));
    assert_eq!(table.cell(0, "PACIENTE"), Some(&Cell::text("Ana")));
    assert_eq!(table.cell(0, "TOTAL_MXN"), Some(&Cell::text("116")));
}

#[test]
fn upsert_appends_unknown_ids_with_empty_defaults() {
    let mock = MockSheets::with_sheet(
        "FACTURAS",
        vec![header(), full_row("1", "Timbrada")],
    );
    let table = store(&mock)
        .upsert(&[Record::new()
            .with("ID", Cell::text("2"))
            .with("CONCEPTO", Cell::text("material"))])
        .unwrap();

    assert_eq!(table.len(), 2);
    assert_eq!(table.cell(1, "PACIENTE"), Some(&Cell::text("")));
    assert_eq!(table.cell(1, "CONCEPTO"), Some(&Cell::text("material")));
}

#[test]
fn upsert_skips_rows_without_an_id() {
    let mock = MockSheets::with_sheet(
        "FACTURAS",
        vec![header(), full_row("1", "Timbrada")],
    );
    let table = store(&mock)
        .upsert(&[
            Record::new().with("CONCEPTO", Cell::text("sin id")),
            Record::new()
                .with("ID", Cell::text("  "))
                .with("CONCEPTO", Cell::text("blanco")),
        ])
        .unwrap();

    assert_eq!(table.len(), 1);
}

#[test]
fn invalid_upsert_fails_without_writing() {
    let mock = MockSheets::with_sheet(
        "FACTURAS",
        vec![header(), full_row("1", "Por enviar")],
    );
    let err = store(&mock)
        .upsert(&[Record::new()
            .with("ID", Cell::text("1"))
            .with("PACIENTE", Cell::Missing)])
        .unwrap_err();

    assert_matches!(err, PipeError::Validation { invalid } => {
        assert_eq!(invalid.len(), 1);
    });
    assert_eq!(mock.write_count(), 0);
    assert_eq!(mock.rows("FACTURAS").len(), 2);
}

#[test]
fn numeric_ids_match_their_text_form() {
    let mock = MockSheets::with_sheet(
        "FACTURAS",
        vec![header(), full_row("1", "Timbrada")],
    );
    let table = store(&mock)
        .upsert(&[Record::new()
            .with("ID", Cell::Number(1.0))
            .with("FOLIO", Cell::text("F-22"))])
        .unwrap();

    assert_eq!(table.len(), 1);
    assert_eq!(table.cell(0, "FOLIO"), Some(&Cell::text("F-22")));
}
