//! Source document discovery and reading.
//!
//! Each document's bytes are read exactly once; the same bytes are hashed for
//! the manifest and handed to the matching adapter, so the recorded digest is
//! always the digest of what was parsed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::types::{RawRecord, SourceRef};
use crate::identity::identify;
use crate::io::config::SourceSettings;
use crate::io::extract::{TextExtractor, read_pdf_record};
use crate::io::smartsheet::read_sheet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Smartsheet CSV export.
    Sheet,
    /// PDF with an extraction sidecar.
    Pdf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// File name within the input folder; used as the source reference.
    pub name: String,
    pub path: PathBuf,
    pub kind: SourceKind,
}

/// What reading one document produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRead {
    /// Bytes read and parsed.
    Parsed {
        sha256: String,
        records: Vec<RawRecord>,
    },
    /// Bytes read (and hashed) but not parseable.
    Unparseable { sha256: String, error: String },
    /// Bytes could not be read at all.
    Unreadable { error: String },
}

/// List source documents directly inside `input`, ordered by lowercase file
/// name (ties broken by the exact name). Other files are ignored.
pub fn discover(input: &Path) -> Result<Vec<SourceDocument>> {
    let entries = fs::read_dir(input).with_context(|| format!("read {}", input.display()))?;
    let mut documents = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("list {}", input.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(kind) = kind_of(&path) else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        documents.push(SourceDocument { name, path, kind });
    }
    documents.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
    debug!(input = %input.display(), documents = documents.len(), "sources discovered");
    Ok(documents)
}

fn kind_of(path: &Path) -> Option<SourceKind> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "csv" => Some(SourceKind::Sheet),
        "pdf" => Some(SourceKind::Pdf),
        _ => None,
    }
}

/// Read, hash and parse one document. Never fails the run: every problem is
/// folded into the returned [`SourceRead`].
pub fn read_source(
    document: &SourceDocument,
    settings: &SourceSettings,
    extractor: &TextExtractor,
) -> SourceRead {
    let bytes = match fs::read(&document.path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(source = %document.name, error = %err, "source unreadable");
            return SourceRead::Unreadable {
                error: format!("read {}: {err}", document.name),
            };
        }
    };
    let sha256 = identify(&bytes);

    let parsed = match document.kind {
        SourceKind::Sheet => read_sheet(&bytes, &document.name, &settings.supplier_column),
        SourceKind::Pdf => read_pdf_record(
            &document.path,
            SourceRef::document(&document.name),
            extractor,
        )
        .map(|record| vec![record]),
    };

    match parsed {
        Ok(records) => SourceRead::Parsed { sha256, records },
        Err(err) => {
            warn!(source = %document.name, error = %format!("{err:#}"), "source not parseable");
            SourceRead::Unparseable {
                sha256,
                error: format!("{err:#}"),
            }
        }
    }
}
