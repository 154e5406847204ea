//! Bundle export: the four run artifacts, published all-or-nothing.
//!
//! Artifacts are staged in `<output>/.staging-<run id>/` in a fixed order and
//! the staging directory is renamed to `<output>/<run id>/` only after every
//! write succeeded. On any failure the staging directory is removed and no
//! bundle becomes visible. An existing bundle is never overwritten.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use csv::{Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{NormalizedRecord, ValidationOutcome};
use crate::identity::{RunId, identify};
use crate::ledger::{FinalizedRunLedger, LedgerEntry, RunMetadata, SourceManifestEntry};

pub const PROCESSED_FILE: &str = "processed_invoices.csv";
pub const REPORT_FILE: &str = "validation_report.csv";
pub const METADATA_FILE: &str = "run_metadata.json";
pub const MANIFEST_FILE: &str = "source_manifest.csv";

/// Artifacts in write order.
pub const ARTIFACT_FILES: [&str; 4] = [PROCESSED_FILE, REPORT_FILE, METADATA_FILE, MANIFEST_FILE];

pub const PROCESSED_HEADER: [&str; 8] = [
    "invoice_number",
    "supplier_id",
    "date",
    "net",
    "vat",
    "vat_code",
    "works_type",
    "total",
];
pub const REPORT_HEADER: [&str; 5] = [
    "invoice_reference",
    "supplier_id",
    "status",
    "reason_code",
    "detail",
];
pub const MANIFEST_HEADER: [&str; 4] = ["source", "sha256", "supplier_id", "invoice_number"];

pub const STATUS_OK: &str = "OK";
pub const STATUS_EXCEPTION: &str = "EXCEPTION";

const STAGING_PREFIX: &str = ".staging-";

/// Destination for artifact bytes.
pub trait ArtifactWriter {
    fn write(&mut self, path: &Path, contents: &[u8]) -> Result<()>;
}

/// Writes artifacts straight to the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsWriter;

impl ArtifactWriter for FsWriter {
    fn write(&mut self, path: &Path, contents: &[u8]) -> Result<()> {
        fs::write(path, contents).with_context(|| format!("write {}", path.display()))
    }
}

/// One line of `processed_invoices.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRow {
    pub invoice_number: String,
    pub supplier_id: String,
    pub date: String,
    pub net: String,
    pub vat: String,
    pub vat_code: String,
    pub works_type: String,
    pub total: String,
}

impl From<&NormalizedRecord> for ProcessedRow {
    fn from(record: &NormalizedRecord) -> Self {
        Self {
            invoice_number: record.invoice_number.clone(),
            supplier_id: record.supplier_id.clone(),
            date: record.date.format("%Y-%m-%d").to_string(),
            net: record.net.to_string(),
            vat: record.vat.to_string(),
            vat_code: record.vat_code.clone(),
            works_type: record.works_type.clone(),
            total: record.total.to_string(),
        }
    }
}

/// One line of `validation_report.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    pub invoice_reference: String,
    pub supplier_id: String,
    pub status: String,
    pub reason_code: String,
    pub detail: String,
}

impl From<&ValidationOutcome> for ReportRow {
    fn from(outcome: &ValidationOutcome) -> Self {
        match outcome {
            ValidationOutcome::Valid(record) => Self {
                invoice_reference: record.invoice_number.clone(),
                supplier_id: record.supplier_id.clone(),
                status: STATUS_OK.to_string(),
                reason_code: String::new(),
                detail: String::new(),
            },
            ValidationOutcome::Exception(exception) => Self {
                invoice_reference: exception.record_ref.reference(),
                supplier_id: exception.record_ref.supplier_id.clone(),
                status: STATUS_EXCEPTION.to_string(),
                reason_code: exception.reason.to_string(),
                detail: exception.detail.clone(),
            },
        }
    }
}

/// One line of `source_manifest.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub source: String,
    pub sha256: String,
    pub supplier_id: Option<String>,
    pub invoice_number: Option<String>,
}

impl From<&SourceManifestEntry> for ManifestRow {
    fn from(entry: &SourceManifestEntry) -> Self {
        Self {
            source: entry.source.clone(),
            sha256: entry.sha256.clone(),
            supplier_id: entry.supplier_id.clone(),
            invoice_number: entry.invoice_number.clone(),
        }
    }
}

/// Contents of `run_metadata.json`: the finalized run metadata plus the
/// SHA-256 of every other artifact in the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataDocument {
    #[serde(flatten)]
    pub run: RunMetadata,
    pub artifacts: BTreeMap<String, String>,
}

/// Paths of a published bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub dir: PathBuf,
    pub processed: PathBuf,
    pub report: PathBuf,
    pub metadata: PathBuf,
    pub manifest: PathBuf,
}

impl Bundle {
    pub fn at(dir: PathBuf) -> Self {
        Self {
            processed: dir.join(PROCESSED_FILE),
            report: dir.join(REPORT_FILE),
            metadata: dir.join(METADATA_FILE),
            manifest: dir.join(MANIFEST_FILE),
            dir,
        }
    }
}

pub fn bundle_dir(output_dir: &Path, run_id: &RunId) -> PathBuf {
    output_dir.join(run_id.as_str())
}

pub fn staging_dir(output_dir: &Path, run_id: &RunId) -> PathBuf {
    output_dir.join(format!("{STAGING_PREFIX}{run_id}"))
}

/// True for leftover staging directories, which are never bundles.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

/// Export a finalized ledger to `<output_dir>/<run id>/`.
pub fn export(ledger: &FinalizedRunLedger, output_dir: &Path) -> Result<Bundle> {
    export_with(ledger, output_dir, &mut FsWriter)
}

/// [`export`] with an explicit artifact writer.
#[instrument(skip_all, fields(run_id = %ledger.run_id(), output = %output_dir.display()))]
pub fn export_with(
    ledger: &FinalizedRunLedger,
    output_dir: &Path,
    writer: &mut dyn ArtifactWriter,
) -> Result<Bundle> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("create output directory {}", output_dir.display()))?;

    let target = bundle_dir(output_dir, ledger.run_id());
    if target.exists() {
        bail!("bundle {} already exists; refusing to overwrite", target.display());
    }
    let staging = staging_dir(output_dir, ledger.run_id());
    fs::create_dir(&staging)
        .with_context(|| format!("create staging directory {}", staging.display()))?;

    let published = stage(ledger, &staging, writer).and_then(|()| {
        fs::rename(&staging, &target).with_context(|| {
            format!("publish {} as {}", staging.display(), target.display())
        })
    });
    if let Err(err) = published {
        if let Err(cleanup) = fs::remove_dir_all(&staging) {
            warn!(staging = %staging.display(), error = %cleanup, "failed to discard staging directory");
        }
        return Err(err);
    }

    info!(bundle = %target.display(), "bundle published");
    Ok(Bundle::at(target))
}

fn stage(ledger: &FinalizedRunLedger, staging: &Path, writer: &mut dyn ArtifactWriter) -> Result<()> {
    let processed = processed_csv(ledger.entries())?;
    let report = report_csv(ledger.entries())?;
    let manifest = manifest_csv(ledger.manifest())?;

    let artifacts: BTreeMap<String, String> = [
        (PROCESSED_FILE, &processed),
        (REPORT_FILE, &report),
        (MANIFEST_FILE, &manifest),
    ]
    .into_iter()
    .map(|(name, bytes)| (name.to_string(), identify(bytes)))
    .collect();
    let metadata = metadata_json(&MetadataDocument {
        run: ledger.metadata().clone(),
        artifacts,
    })?;

    for (name, bytes) in [
        (PROCESSED_FILE, &processed),
        (REPORT_FILE, &report),
        (METADATA_FILE, &metadata),
        (MANIFEST_FILE, &manifest),
    ] {
        writer.write(&staging.join(name), bytes)?;
        debug!(artifact = name, bytes = bytes.len(), "artifact staged");
    }
    Ok(())
}

/// Serialize `processed_invoices.csv`: valid records in ledger order.
pub fn processed_csv(entries: &[LedgerEntry]) -> Result<Vec<u8>> {
    let rows = entries.iter().filter_map(|entry| match &entry.outcome {
        ValidationOutcome::Valid(record) => Some(ProcessedRow::from(record)),
        ValidationOutcome::Exception(_) => None,
    });
    to_csv(&PROCESSED_HEADER, rows)
}

/// Serialize `validation_report.csv`: one row per ledger entry.
pub fn report_csv(entries: &[LedgerEntry]) -> Result<Vec<u8>> {
    to_csv(
        &REPORT_HEADER,
        entries.iter().map(|entry| ReportRow::from(&entry.outcome)),
    )
}

/// Serialize `source_manifest.csv`.
pub fn manifest_csv(manifest: &[SourceManifestEntry]) -> Result<Vec<u8>> {
    to_csv(&MANIFEST_HEADER, manifest.iter().map(ManifestRow::from))
}

/// Pretty JSON with a trailing newline.
pub fn metadata_json(document: &MetadataDocument) -> Result<Vec<u8>> {
    let mut payload = serde_json::to_string_pretty(document).context("serialize run metadata")?;
    payload.push('\n');
    Ok(payload.into_bytes())
}

fn to_csv<T: Serialize>(header: &[&str], rows: impl Iterator<Item = T>) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(header).context("write csv header")?;
    for row in rows {
        writer.serialize(row).context("write csv row")?;
    }
    writer.into_inner().context("flush csv")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{finalized_ledger, open_ledger};
    use chrono::Utc;

    fn finalized() -> FinalizedRunLedger {
        finalized_ledger().expect("sample ledger")
    }

    /// Succeeds for the first `allowed` writes, then fails.
    struct FailingWriter {
        allowed: usize,
    }

    impl ArtifactWriter for FailingWriter {
        fn write(&mut self, path: &Path, contents: &[u8]) -> Result<()> {
            if self.allowed == 0 {
                bail!("injected failure writing {}", path.display());
            }
            self.allowed -= 1;
            FsWriter.write(path, contents)
        }
    }

    #[test]
    fn csv_artifacts_have_fixed_headers_and_rows() {
        let ledger = finalized();
        let processed = String::from_utf8(processed_csv(ledger.entries()).expect("csv")).expect("utf8");
        assert_eq!(
            processed,
            "invoice_number,supplier_id,date,net,vat,vat_code,works_type,total\n\
             INV-1,acme,2026-03-01,100.00,20.00,T1,OTHER,120.00\n"
        );

        let report = String::from_utf8(report_csv(ledger.entries()).expect("csv")).expect("utf8");
        assert_eq!(
            report,
            "invoice_reference,supplier_id,status,reason_code,detail\n\
             INV-1,acme,OK,,\n\
             s.csv#4,,EXCEPTION,MISSING_FIELD,\"missing required field(s): date, net\"\n"
        );

        let manifest = String::from_utf8(manifest_csv(ledger.manifest()).expect("csv")).expect("utf8");
        assert_eq!(
            manifest,
            format!("source,sha256,supplier_id,invoice_number\na.pdf,{},acme,\n", identify(b"a"))
        );
    }

    #[test]
    fn empty_ledger_still_writes_headers() {
        let mut ledger = open_ledger();
        ledger.finalize(Utc::now()).expect("finalize");
        let ledger = ledger.into_finalized().expect("finalized");
        assert_eq!(
            processed_csv(ledger.entries()).expect("csv"),
            b"invoice_number,supplier_id,date,net,vat,vat_code,works_type,total\n"
        );
    }

    #[test]
    fn export_publishes_all_four_artifacts_with_digests() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = finalized();
        let bundle = export(&ledger, temp.path()).expect("export");

        assert_eq!(bundle.dir, temp.path().join(ledger.run_id().as_str()));
        for path in [&bundle.processed, &bundle.report, &bundle.metadata, &bundle.manifest] {
            assert!(path.is_file(), "missing {}", path.display());
        }
        assert!(!staging_dir(temp.path(), ledger.run_id()).exists());

        let metadata: MetadataDocument =
            serde_json::from_slice(&fs::read(&bundle.metadata).expect("read")).expect("json");
        assert_eq!(&metadata.run, ledger.metadata());
        let processed = fs::read(&bundle.processed).expect("read");
        assert_eq!(metadata.artifacts[PROCESSED_FILE], identify(&processed));
        assert_eq!(metadata.artifacts.len(), 3);
    }

    #[test]
    fn failed_write_publishes_nothing() {
        for allowed in 0..4 {
            let temp = tempfile::tempdir().expect("tempdir");
            let ledger = finalized();
            let err = export_with(&ledger, temp.path(), &mut FailingWriter { allowed })
                .expect_err("injected failure");
            assert!(format!("{err:#}").contains("injected failure"));

            let leftovers: Vec<_> = fs::read_dir(temp.path()).expect("read").collect();
            assert!(leftovers.is_empty(), "after {allowed} writes: {leftovers:?}");
        }
    }

    #[test]
    fn existing_bundle_is_never_overwritten() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = finalized();
        let bundle = export(&ledger, temp.path()).expect("first export");
        let before = fs::read(&bundle.report).expect("read");

        let err = export(&ledger, temp.path()).expect_err("second export");
        assert!(err.to_string().contains("already exists"));
        assert_eq!(fs::read(&bundle.report).expect("read"), before);
        assert!(!staging_dir(temp.path(), ledger.run_id()).exists());
    }
}
