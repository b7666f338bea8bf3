//! Text and JSON rendering for command reports.
//!
//! Every listing is a slice of one report shape; [`Row`] names its columns
//! so each command only picks the shape and the empty-state message.

use provision_core::ledger::LedgerEntry;
use provision_core::registry::TenantRecord;
use provision_core::secrets::Recipient;
use provision_core::tier::TierPolicy;
use serde::Serialize;

const STAMP: &str = "%Y-%m-%d %H:%M";

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// A report shape that lists as one table row.
pub trait Row {
    const HEADERS: &'static [&'static str];

    fn cells(&self) -> Vec<String>;
}

impl Row for TenantRecord {
    const HEADERS: &'static [&'static str] =
        &["NAMESPACE", "DOMAIN", "TEMPLATE", "TIER", "DATABASE", "UPDATED"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.namespace.clone(),
            self.domain.clone(),
            self.template.clone(),
            self.tier.clone(),
            self.database_name.clone(),
            self.updated_at.format(STAMP).to_string(),
        ]
    }
}

impl Row for LedgerEntry {
    const HEADERS: &'static [&'static str] = &["DOMAIN", "NAMESPACE", "REGISTERED", "REMOVED"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.domain.clone(),
            self.namespace.clone(),
            self.registered_at.format(STAMP).to_string(),
            self.removed_at
                .map(|t| t.format(STAMP).to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]
    }
}

impl Row for TierPolicy {
    const HEADERS: &'static [&'static str] =
        &["TIER", "DATABASE", "STORAGE", "CPU", "MEMORY", "RATE LIMIT"];

    fn cells(&self) -> Vec<String> {
        let database = if self.mariadb_enabled { "dedicated" } else { "shared" };
        let storage = if self.persistence_enabled {
            self.storage_size.clone()
        } else {
            "-".to_string()
        };
        vec![
            self.tier.clone(),
            database.to_string(),
            storage,
            self.resources.limits.cpu.clone(),
            self.resources.limits.memory.clone(),
            format!("{} rpm / {} conn", self.rate_limit.rpm, self.rate_limit.connections),
        ]
    }
}

impl Row for Recipient {
    const HEADERS: &'static [&'static str] = &["NAME", "TYPE", "ID", "ADDED"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.key_type.to_string(),
            self.short_id(),
            self.added_at.format("%Y-%m-%d").to_string(),
        ]
    }
}

/// Aligned table of `rows`, or `empty` when there are none.
pub fn render_rows<R: Row>(rows: &[R], empty: &str) -> String {
    if rows.is_empty() {
        return format!("{empty}\n");
    }
    let cells: Vec<Vec<String>> = rows.iter().map(R::cells).collect();
    // Column widths count characters; key ids carry a multi-byte ellipsis.
    let mut widths: Vec<usize> = R::HEADERS.iter().map(|h| h.chars().count()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = line(R::HEADERS.iter().copied(), &widths);
    let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    out.push_str(&rule.join("  "));
    out.push('\n');
    for row in &cells {
        out.push_str(&line(row.iter().map(String::as_str), &widths));
    }
    out
}

fn line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .zip(widths)
        .map(|(cell, &w)| format!("{cell:w$}"))
        .collect();
    format!("{}\n", padded.join("  ").trim_end())
}

pub fn print_rows<R: Row>(rows: &[R], empty: &str) {
    print!("{}", render_rows(rows, empty));
}

/// Print `label: value` with labels padded to a common width.
pub fn print_fields(fields: &[(&str, String)]) {
    let width = fields.iter().map(|(l, _)| l.len()).max().unwrap_or(0) + 1;
    for (label, value) in fields {
        println!("  {:width$} {value}", format!("{label}:"), width = width);
    }
}
