use serde::Serialize;

use crate::invoices::{STATUS_PAGADA, STATUS_POR_ENVIAR, STATUS_TIMBRADA};
use crate::table::{Cell, Table};

/// How `iva_pct_prom` treats rows whose ratio is undefined (missing
/// operand or `precio_venta` of zero).
///
/// `ZeroFill` reproduces the historically observed output: undefined
/// ratios count as 0 in the average, which deflates it. It stays the
/// default for parity; `ExcludeUndefined` drops those rows instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RatioPolicy {
    #[default]
    ZeroFill,
    ExcludeUndefined,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Kpis {
    pub ticket_promedio: Option<f64>,
    pub margen_promedio: Option<f64>,
    pub iva_pct_prom: Option<f64>,
}

pub fn compute_kpis(table: &Table) -> Kpis {
    compute_kpis_with(table, RatioPolicy::default())
}

/// Each metric is reported only when its required columns exist;
/// otherwise it is `None`, never zero.
pub fn compute_kpis_with(table: &Table, policy: RatioPolicy) -> Kpis {
    if table.is_empty() {
        return Kpis::default();
    }

    let ticket_promedio = if table.has_column("total") {
        mean(&column_numbers(table, "total"))
    } else {
        None
    };

    let margen_promedio = if table.has_column("precio_venta") && table.has_column("costo_proveedor")
    {
        let margins: Vec<f64> = (0..table.len())
            .filter_map(|row| {
                let precio = numeric_cell(table, row, "precio_venta")?;
                let costo = numeric_cell(table, row, "costo_proveedor")?;
                Some(precio - costo)
            })
            .collect();
        mean(&margins)
    } else {
        None
    };

    let iva_pct_prom = if table.has_column("iva") && table.has_column("precio_venta") {
        iva_ratio_mean(table, policy).map(|ratio| ratio * 100.0)
    } else {
        None
    };

    Kpis {
        ticket_promedio,
        margen_promedio,
        iva_pct_prom,
    }
}

fn iva_ratio_mean(table: &Table, policy: RatioPolicy) -> Option<f64> {
    let ratios: Vec<Option<f64>> = (0..table.len())
        .map(|row| {
            let iva = numeric_cell(table, row, "iva")?;
            let precio = numeric_cell(table, row, "precio_venta")?;
            if precio == 0.0 { None } else { Some(iva / precio) }
        })
        .collect();
    match policy {
        RatioPolicy::ZeroFill => mean(
            &ratios
                .iter()
                .map(|ratio| ratio.unwrap_or(0.0))
                .collect::<Vec<_>>(),
        ),
        RatioPolicy::ExcludeUndefined => {
            mean(&ratios.into_iter().flatten().collect::<Vec<_>>())
        }
    }
}

/// Quick dashboard figures for the invoice table: money column sums
/// plus a count of rows in each protocol status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvoiceSummary {
    pub ingreso_precio: f64,
    pub iva: f64,
    pub total: f64,
    pub por_enviar: usize,
    pub timbradas: usize,
    pub pagadas: usize,
}

pub fn invoice_summary(table: &Table) -> InvoiceSummary {
    InvoiceSummary {
        ingreso_precio: column_numbers(table, "PRECIO_MXN").iter().sum(),
        iva: column_numbers(table, "IVA_16").iter().sum(),
        total: column_numbers(table, "TOTAL_MXN").iter().sum(),
        por_enviar: status_count(table, STATUS_POR_ENVIAR),
        timbradas: status_count(table, STATUS_TIMBRADA),
        pagadas: status_count(table, STATUS_PAGADA),
    }
}

fn status_count(table: &Table, status: &str) -> usize {
    (0..table.len())
        .filter(|row| {
            table
                .cell(*row, "ESTATUS")
                .map(|cell| cell.display() == status)
                .unwrap_or(false)
        })
        .count()
}

fn column_numbers(table: &Table, name: &str) -> Vec<f64> {
    (0..table.len())
        .filter_map(|row| numeric_cell(table, row, name))
        .collect()
}

fn numeric_cell(table: &Table, row: usize, name: &str) -> Option<f64> {
    match table.cell(row, name)? {
        Cell::Number(value) => Some(*value),
        Cell::Text(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
