//! Loading a published bundle back from disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use tracing::debug;

use pipeline::io::export::{
    ARTIFACT_FILES, MANIFEST_FILE, METADATA_FILE, ManifestRow, MetadataDocument, PROCESSED_FILE,
    ProcessedRow, REPORT_FILE, ReportRow,
};

/// The four artifacts of one bundle, parsed, plus their raw bytes.
#[derive(Debug)]
pub struct LoadedBundle {
    pub dir: PathBuf,
    pub raw: BTreeMap<&'static str, Vec<u8>>,
    pub metadata: MetadataDocument,
    pub processed: Vec<ProcessedRow>,
    pub report: Vec<ReportRow>,
    pub manifest: Vec<ManifestRow>,
}

impl LoadedBundle {
    /// Directory name, which a published bundle shares with its run id.
    pub fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn bytes(&self, file: &str) -> &[u8] {
        self.raw.get(file).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Read every artifact of the bundle at `dir`. Fails on the first missing
/// or malformed file.
pub fn load(dir: &Path) -> Result<LoadedBundle> {
    if !dir.is_dir() {
        bail!("bundle {} is not a directory", dir.display());
    }
    let mut raw = BTreeMap::new();
    for file in ARTIFACT_FILES {
        let path = dir.join(file);
        if !path.is_file() {
            bail!("bundle {} is incomplete: {} is missing", dir.display(), file);
        }
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        raw.insert(file, bytes);
    }

    let metadata = load_metadata(dir)?;
    let processed = parse_rows(dir, PROCESSED_FILE, &raw)?;
    let report = parse_rows(dir, REPORT_FILE, &raw)?;
    let manifest = parse_rows(dir, MANIFEST_FILE, &raw)?;
    debug!(
        bundle = %dir.display(),
        processed = processed.len(),
        report = report.len(),
        manifest = manifest.len(),
        "bundle loaded"
    );

    Ok(LoadedBundle {
        dir: dir.to_path_buf(),
        raw,
        metadata,
        processed,
        report,
        manifest,
    })
}

/// Parse `run_metadata.json` alone, for listings.
pub fn load_metadata(dir: &Path) -> Result<MetadataDocument> {
    let path = dir.join(METADATA_FILE);
    let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
}

fn parse_rows<T: DeserializeOwned>(
    dir: &Path,
    file: &'static str,
    raw: &BTreeMap<&'static str, Vec<u8>>,
) -> Result<Vec<T>> {
    let bytes = raw.get(file).map(Vec::as_slice).unwrap_or_default();
    let mut reader = csv::Reader::from_reader(bytes);
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .with_context(|| format!("parse {}", dir.join(file).display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::io::export::export;
    use pipeline::test_support::finalized_ledger;

    #[test]
    fn loads_an_exported_bundle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = finalized_ledger().expect("ledger");
        let published = export(&ledger, temp.path()).expect("export");

        let bundle = load(&published.dir).expect("load");
        assert_eq!(bundle.name(), ledger.run_id().as_str());
        assert_eq!(bundle.processed.len(), 1);
        assert_eq!(bundle.report.len(), 2);
        assert_eq!(bundle.manifest.len(), 1);
        assert_eq!(bundle.manifest[0].invoice_number, None);
        assert_eq!(bundle.metadata.run.valid_count, 1);
        assert_eq!(bundle.raw.len(), ARTIFACT_FILES.len());
    }

    #[test]
    fn missing_artifact_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let published = export(&finalized_ledger().expect("ledger"), temp.path()).expect("export");
        fs::remove_file(&published.manifest).expect("remove");

        let err = load(&published.dir).expect_err("incomplete");
        assert!(format!("{err:#}").contains(MANIFEST_FILE));
    }

    #[test]
    fn malformed_metadata_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let published = export(&finalized_ledger().expect("ledger"), temp.path()).expect("export");
        fs::write(&published.metadata, "{").expect("write");

        let err = load(&published.dir).expect_err("malformed");
        assert!(format!("{err:#}").contains("parse"));
    }
}
