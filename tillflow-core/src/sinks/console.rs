//! Human-readable console output of enriched records.

use itertools::Itertools;

use crate::types::{EnrichedEvent, EVENT_TIME_FORMAT};

const HEADERS: [&str; 7] = [
    "invoice_no",
    "country",
    "timestamp",
    "total_cost",
    "total_items",
    "is_order",
    "is_return",
];

/// Prints batches of enriched records as an aligned table, fields
/// untruncated. Stateless diagnostic output, no checkpoint.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    batch_no: u64,
}

impl ConsoleSink {
    /// New sink starting at batch 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Print one batch. Empty batches still print a header so the cadence
    /// stays visible.
    pub fn print_batch(&mut self, events: &[EnrichedEvent]) {
        println!("--- batch {} ---", self.batch_no);
        println!("{}", format_table(events));
        self.batch_no += 1;
    }
}

/// Render events as an aligned table with every field shown in full
pub(crate) fn format_table(events: &[EnrichedEvent]) -> String {
    let rows: Vec<[String; 7]> = events
        .iter()
        .map(|ev| {
            [
                ev.invoice_no.to_string(),
                ev.country.clone(),
                ev.timestamp.format(EVENT_TIME_FORMAT).to_string(),
                format!("{:.2}", ev.total_cost),
                ev.total_items.to_string(),
                ev.is_order.to_string(),
                ev.is_return.to_string(),
            ]
        })
        .collect();

    let widths: Vec<usize> = HEADERS
        .iter()
        .enumerate()
        .map(|(i, header)| {
            rows.iter()
                .map(|row| row[i].len())
                .chain([header.len()])
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: &[String]| -> String {
        let body = cells
            .iter()
            .zip(widths.iter().copied())
            .map(|(cell, width)| format!("{cell:<width$}"))
            .join(" | ");
        format!("| {body} |")
    };

    let header_cells: Vec<String> = HEADERS.iter().map(|h| (*h).to_owned()).collect();
    let separator = format!(
        "+{}+",
        widths.iter().map(|w| "-".repeat(w + 2)).join("+")
    );

    let mut out = vec![separator.clone(), line(&header_cells), separator.clone()];
    out.extend(rows.iter().map(|row| line(row.as_slice())));
    out.push(separator);
    out.join("\n")
}
