//! Raw fields for PDF documents, read from the extraction collaborator's
//! sidecar files.
//!
//! For `invoice.pdf` the collaborator leaves either `invoice.fields.json`
//! (already keyed fields) or `invoice.txt` (plain extracted text). Text is
//! turned into fields by the supplier profiles declared in the rule file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::core::types::{RawRecord, SourceRef};

/// Declarative text extraction for one supplier.
#[derive(Debug, Clone)]
pub struct ExtractionProfile {
    pub supplier_id: String,
    /// Literal string whose presence identifies the supplier's documents.
    pub marker: String,
    /// Canonical field name and its pattern (exactly one capture group).
    pub patterns: Vec<(String, Regex)>,
}

/// Ordered supplier profiles; the first profile whose marker occurs wins.
#[derive(Debug, Clone, Default)]
pub struct TextExtractor {
    profiles: Vec<ExtractionProfile>,
}

impl TextExtractor {
    pub fn new(profiles: Vec<ExtractionProfile>) -> Self {
        Self { profiles }
    }

    pub fn profiles(&self) -> &[ExtractionProfile] {
        &self.profiles
    }

    /// Build a raw record from extracted text. Text matching no marker yields
    /// a record with an empty supplier id and no fields.
    pub fn extract(&self, text: &str, source: SourceRef) -> RawRecord {
        let Some(profile) = self
            .profiles
            .iter()
            .find(|profile| text.contains(profile.marker.as_str()))
        else {
            debug!(source = %source, "no supplier marker matched");
            return RawRecord::new("", BTreeMap::new(), source);
        };

        let mut fields = BTreeMap::new();
        for (name, pattern) in &profile.patterns {
            let value = pattern
                .captures(text)
                .and_then(|captures| captures.get(1))
                .map(|found| found.as_str().trim())
                .filter(|value| !value.is_empty());
            if let Some(value) = value {
                fields.insert(name.clone(), value.to_string());
            }
        }
        debug!(source = %source, supplier = %profile.supplier_id, fields = fields.len(), "text extracted");
        RawRecord::new(profile.supplier_id.clone(), fields, source)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldsSidecar {
    supplier_id: String,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

/// `<stem>.fields.json` next to `pdf_path`.
pub fn fields_sidecar_path(pdf_path: &Path) -> PathBuf {
    sidecar(pdf_path, "fields.json")
}

/// `<stem>.txt` next to `pdf_path`.
pub fn text_sidecar_path(pdf_path: &Path) -> PathBuf {
    sidecar(pdf_path, "txt")
}

fn sidecar(pdf_path: &Path, extension: &str) -> PathBuf {
    pdf_path.with_extension(extension)
}

/// Read the raw record for one PDF. Prefers the fields sidecar over the text
/// sidecar; fails when neither exists or the sidecar is malformed.
pub fn read_pdf_record(
    pdf_path: &Path,
    source: SourceRef,
    extractor: &TextExtractor,
) -> Result<RawRecord> {
    let fields_path = fields_sidecar_path(pdf_path);
    if fields_path.is_file() {
        let raw = fs::read_to_string(&fields_path)
            .with_context(|| format!("read {}", fields_path.display()))?;
        return parse_fields_sidecar(&raw, source)
            .with_context(|| format!("parse {}", fields_path.display()));
    }

    let text_path = text_sidecar_path(pdf_path);
    if text_path.is_file() {
        let text = fs::read_to_string(&text_path)
            .with_context(|| format!("read {}", text_path.display()))?;
        return Ok(extractor.extract(&text, source));
    }

    bail!(
        "no extracted fields for {} (expected {} or {})",
        pdf_path.display(),
        fields_path.display(),
        text_path.display()
    )
}

fn parse_fields_sidecar(raw: &str, source: SourceRef) -> Result<RawRecord> {
    let sidecar: FieldsSidecar = serde_json::from_str(raw)?;
    let mut fields = BTreeMap::new();
    for (name, value) in sidecar.fields {
        let text = match value {
            Value::String(text) => text,
            Value::Number(number) => number.to_string(),
            Value::Null => continue,
            other => return Err(anyhow!("field '{name}' must be a string or number, got {other}")),
        };
        fields.insert(name, text);
    }
    Ok(RawRecord::new(sidecar.supplier_id, fields, source))
}
