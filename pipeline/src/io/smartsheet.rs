//! Smartsheet CSV exports: one raw record per data row.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result, bail};
use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::debug;

use crate::core::types::{RawRecord, SourceRef};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Parse an exported sheet. Fields are keyed by header name, which must be
/// unique; blank cells are left out, so they read as absent. Rows with no
/// non-blank cell are skipped but still count towards row numbering.
pub fn read_sheet(bytes: &[u8], document: &str, supplier_column: &str) -> Result<Vec<RawRecord>> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(bytes);

    let headers = reader.headers().context("read header row")?.clone();
    let Some(supplier_index) = headers.iter().position(|name| name == supplier_column) else {
        bail!("missing supplier column '{supplier_column}'");
    };
    let mut seen = BTreeSet::new();
    for name in headers.iter().filter(|name| !name.is_empty()) {
        if !seen.insert(name) {
            bail!("duplicate column '{name}'");
        }
    }

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row_number = index + 1;
        let row = row.with_context(|| format!("read row {row_number}"))?;
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        records.push(to_record(&headers, &row, supplier_index, document, row_number));
    }
    debug!(document, rows = records.len(), "sheet parsed");
    Ok(records)
}

fn to_record(
    headers: &StringRecord,
    row: &StringRecord,
    supplier_index: usize,
    document: &str,
    row_number: usize,
) -> RawRecord {
    let supplier_id = row.get(supplier_index).unwrap_or_default().trim();
    let fields: BTreeMap<String, String> = headers
        .iter()
        .zip(row.iter())
        .enumerate()
        .filter(|(index, (name, value))| {
            *index != supplier_index && !name.is_empty() && !value.trim().is_empty()
        })
        .map(|(_, (name, value))| (name.to_string(), value.to_string()))
        .collect();
    RawRecord::new(supplier_id, fields, SourceRef::row(document, row_number))
}
