use crate::table::{Cell, Table};

/// Canonical financial fields and the recognized aliases for each.
/// Matching is exact-string after trim + lowercase.
pub const CANONICAL_FIELDS: [(&str, &[&str]); 4] = [
    (
        "precio_venta",
        &["precio", "venta", "pv", "precio final", "monto", "importe"],
    ),
    (
        "costo_proveedor",
        &["costo", "cp", "costo unitario", "compra"],
    ),
    ("iva", &["impuesto", "vat"]),
    ("total", &["importe_total", "monto_total"]),
];

pub fn canonical_label(label: &str) -> Option<&'static str> {
    let needle = label.trim().to_lowercase();
    for (canonical, aliases) in CANONICAL_FIELDS {
        if needle == canonical || aliases.contains(&needle.as_str()) {
            return Some(canonical);
        }
    }
    None
}

/// Canonicalizes column labels, coerces the four canonical columns to
/// numbers, and derives `total`/`iva` when the counterpart fields are
/// present. Empty tables pass through unchanged; the input is never
/// mutated.
pub fn normalize(table: &Table) -> Table {
    if table.is_empty() {
        return table.clone();
    }

    let mut out = table.clone();
    out.rename_columns(|label| {
        canonical_label(label)
            .map(str::to_string)
            .unwrap_or_else(|| label.to_string())
    });

    for (field, _) in CANONICAL_FIELDS {
        coerce_numeric_column(&mut out, field);
    }

    if !out.has_column("total") && out.has_column("precio_venta") && out.has_column("iva") {
        derive_column(&mut out, "total", "precio_venta", "iva", |pv, iva| pv + iva);
    }
    if !out.has_column("iva") && out.has_column("precio_venta") && out.has_column("total") {
        derive_column(&mut out, "iva", "total", "precio_venta", |total, pv| {
            total - pv
        });
    }

    out
}

fn coerce_numeric_column(table: &mut Table, field: &str) {
    if !table.has_column(field) {
        return;
    }
    for row in 0..table.len() {
        let coerced = match table.cell(row, field) {
            Some(cell) => coerce_numeric(cell),
            None => Cell::Missing,
        };
        table.set_cell(row, field, coerced);
    }
}

/// Per-cell coercion failures become `Missing`, never an error.
fn coerce_numeric(cell: &Cell) -> Cell {
    match cell {
        Cell::Number(value) => Cell::Number(*value),
        Cell::Bool(flag) => Cell::Number(if *flag { 1.0 } else { 0.0 }),
        Cell::Text(text) => match text.trim().parse::<f64>() {
            Ok(value) => Cell::Number(value),
            Err(_) => {
                if !text.trim().is_empty() {
                    tracing::debug!(value = %text, "cell did not coerce to a number");
                }
                Cell::Missing
            }
        },
        Cell::Missing => Cell::Missing,
    }
}

fn derive_column<F>(table: &mut Table, target: &str, left: &str, right: &str, combine: F)
where
    F: Fn(f64, f64) -> f64,
{
    table.add_column(target, Cell::Missing);
    for row in 0..table.len() {
        let lhs = table.cell(row, left).and_then(Cell::as_number);
        let rhs = table.cell(row, right).and_then(Cell::as_number);
        if let (Some(lhs), Some(rhs)) = (lhs, rhs) {
            table.set_cell(row, target, Cell::Number(combine(lhs, rhs)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Record;

    fn single_column(label: &str, value: &str) -> Table {
        Table::from_string_rows(vec![label.to_string()], vec![vec![value.to_string()]])
    }

    #[test]
    fn every_alias_maps_to_its_canonical_name() {
        for (canonical, aliases) in CANONICAL_FIELDS {
            for alias in std::iter::once(&canonical).chain(aliases) {
                let table = normalize(&single_column(alias, "10"));
                assert_eq!(table.columns(), [canonical], "alias {alias}");
            }
        }
    }

    #[test]
    fn alias_matching_trims_and_lowercases() {
        let table = normalize(&single_column("  Precio Final ", "10"));
        assert_eq!(table.columns(), ["precio_venta"]);
    }

    #[test]
    fn unmatched_labels_keep_their_original_casing() {
        let table = normalize(&single_column("PACIENTE", "Ana"));
        assert_eq!(table.columns(), ["PACIENTE"]);
    }

    #[test]
    fn unparseable_numeric_cells_become_missing() {
        let table = normalize(&single_column("iva", "n/a"));
        assert_eq!(table.cell(0, "iva"), Some(&Cell::Missing));
    }

    #[test]
    fn derives_total_from_precio_and_iva() {
        let table = Table::from_records(vec![
            Record::new()
                .with("precio_venta", Cell::text("100"))
                .with("iva", Cell::text("16")),
        ]);
        let normalized = normalize(&table);
        assert_eq!(normalized.cell(0, "total"), Some(&Cell::Number(116.0)));
    }

    #[test]
    fn derives_iva_from_total_and_precio() {
        let table = Table::from_records(vec![
            Record::new()
                .with("precio_venta", Cell::Number(100.0))
                .with("total", Cell::Number(116.0)),
        ]);
        let normalized = normalize(&table);
        assert_eq!(normalized.cell(0, "iva"), Some(&Cell::Number(16.0)));
    }

    #[test]
    fn no_derivation_when_all_three_present() {
        let table = Table::from_records(vec![
            Record::new()
                .with("precio_venta", Cell::Number(100.0))
                .with("iva", Cell::Number(10.0))
                .with("total", Cell::Number(999.0)),
        ]);
        let normalized = normalize(&table);
        assert_eq!(normalized.cell(0, "total"), Some(&Cell::Number(999.0)));
        assert_eq!(normalized.cell(0, "iva"), Some(&Cell::Number(10.0)));
    }

    #[test]
    fn derivation_leaves_missing_when_an_input_is_missing() {
        let table = Table::from_records(vec![
            Record::new()
                .with("precio_venta", Cell::Number(100.0))
                .with("iva", Cell::Missing),
        ]);
        let normalized = normalize(&table);
        assert_eq!(normalized.cell(0, "total"), Some(&Cell::Missing));
    }

    #[test]
    fn normalize_is_idempotent() {
        let table = Table::from_records(vec![
            Record::new()
                .with("Precio", Cell::text("100"))
                .with("IVA", Cell::text("16"))
                .with("PACIENTE", Cell::text("Ana")),
        ]);
        let once = normalize(&table);
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_table_passes_through() {
        let table = Table::empty();
        assert_eq!(normalize(&table), table);
    }
}
