//! Independent re-verification of a loaded bundle.
//!
//! Every check reads only the bundle (and, optionally, the input folder),
//! never the pipeline's in-memory state, and reports problems as findings
//! rather than stopping at the first one.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use pipeline::core::types::ReasonCode;
use pipeline::identity::identify;
use pipeline::io::export::{
    MANIFEST_FILE, PROCESSED_FILE, REPORT_FILE, STATUS_EXCEPTION, STATUS_OK,
};

use crate::bundle::LoadedBundle;

/// Artifacts whose digests are recorded in `run_metadata.json`.
const DIGESTED_FILES: [&str; 3] = [PROCESSED_FILE, REPORT_FILE, MANIFEST_FILE];

/// One problem found in a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    MissingDigest {
        file: &'static str,
    },
    DigestMismatch {
        file: &'static str,
        recorded: String,
        actual: String,
    },
    RunIdMismatch {
        dir_name: String,
        run_id: String,
    },
    CountMismatch {
        what: &'static str,
        recorded: usize,
        actual: usize,
    },
    /// The OK rows of the report and the processed rows disagree at `index`.
    PartitionBroken {
        index: usize,
        reported: Option<String>,
        processed: Option<String>,
    },
    UnknownStatus {
        row: usize,
        status: String,
    },
    BadReason {
        row: usize,
        status: String,
        reason: String,
    },
    BadAmount {
        invoice: String,
        column: &'static str,
        value: String,
    },
    TotalMismatch {
        invoice: String,
        net: String,
        vat: String,
        total: String,
    },
    SourceMissing {
        source: String,
    },
    SourceChanged {
        source: String,
        recorded: String,
        actual: String,
    },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::MissingDigest { file } => write!(f, "no digest recorded for {file}"),
            Finding::DigestMismatch {
                file,
                recorded,
                actual,
            } => write!(f, "{file} digest {actual} does not match recorded {recorded}"),
            Finding::RunIdMismatch { dir_name, run_id } => {
                write!(f, "bundle directory {dir_name} holds run {run_id}")
            }
            Finding::CountMismatch {
                what,
                recorded,
                actual,
            } => write!(f, "{what}: metadata records {recorded}, bundle has {actual}"),
            Finding::PartitionBroken {
                index,
                reported,
                processed,
            } => write!(
                f,
                "valid record {index}: report has {}, processed has {}",
                reported.as_deref().unwrap_or("nothing"),
                processed.as_deref().unwrap_or("nothing")
            ),
            Finding::UnknownStatus { row, status } => {
                write!(f, "report row {row}: unknown status '{status}'")
            }
            Finding::BadReason {
                row,
                status,
                reason,
            } => write!(f, "report row {row}: reason '{reason}' invalid for status {status}"),
            Finding::BadAmount {
                invoice,
                column,
                value,
            } => write!(f, "invoice {invoice}: {column} '{value}' is not a decimal"),
            Finding::TotalMismatch {
                invoice,
                net,
                vat,
                total,
            } => write!(f, "invoice {invoice}: total {total} != net {net} + vat {vat}"),
            Finding::SourceMissing { source } => write!(f, "source {source} not found in input"),
            Finding::SourceChanged {
                source,
                recorded,
                actual,
            } => write!(f, "source {source} hashes to {actual}, manifest records {recorded}"),
        }
    }
}

/// Run every bundle check. With `input`, also re-hash the source documents
/// listed in the manifest.
pub fn verify(bundle: &LoadedBundle, input: Option<&Path>) -> Vec<Finding> {
    let mut findings = Vec::new();
    check_digests(bundle, &mut findings);
    check_run_id(bundle, &mut findings);
    check_counts(bundle, &mut findings);
    check_report_rows(bundle, &mut findings);
    check_partition(bundle, &mut findings);
    check_totals(bundle, &mut findings);
    if let Some(input) = input {
        check_sources(bundle, input, &mut findings);
    }
    for finding in &findings {
        warn!(bundle = %bundle.dir.display(), %finding, "finding");
    }
    debug!(bundle = %bundle.dir.display(), findings = findings.len(), "verified");
    findings
}

fn check_digests(bundle: &LoadedBundle, findings: &mut Vec<Finding>) {
    for file in DIGESTED_FILES {
        let actual = identify(bundle.bytes(file));
        match bundle.metadata.artifacts.get(file) {
            None => findings.push(Finding::MissingDigest { file }),
            Some(recorded) if *recorded != actual => findings.push(Finding::DigestMismatch {
                file,
                recorded: recorded.clone(),
                actual,
            }),
            Some(_) => {}
        }
    }
}

fn check_run_id(bundle: &LoadedBundle, findings: &mut Vec<Finding>) {
    let dir_name = bundle.name();
    let run_id = bundle.metadata.run.run_id.as_str();
    if dir_name != run_id {
        findings.push(Finding::RunIdMismatch {
            dir_name,
            run_id: run_id.to_string(),
        });
    }
}

fn check_counts(bundle: &LoadedBundle, findings: &mut Vec<Finding>) {
    let run = &bundle.metadata.run;
    let ok_rows = count_status(bundle, STATUS_OK);
    let exception_rows = count_status(bundle, STATUS_EXCEPTION);
    let checks = [
        ("valid_count vs processed rows", run.valid_count, bundle.processed.len()),
        ("valid_count vs OK report rows", run.valid_count, ok_rows),
        ("exception_count vs EXCEPTION report rows", run.exception_count, exception_rows),
        ("source_count vs manifest rows", run.source_count, bundle.manifest.len()),
    ];
    for (what, recorded, actual) in checks {
        if recorded != actual {
            findings.push(Finding::CountMismatch {
                what,
                recorded,
                actual,
            });
        }
    }
}

fn count_status(bundle: &LoadedBundle, status: &str) -> usize {
    bundle
        .report
        .iter()
        .filter(|row| row.status == status)
        .count()
}

fn check_report_rows(bundle: &LoadedBundle, findings: &mut Vec<Finding>) {
    for (index, row) in bundle.report.iter().enumerate() {
        let line = index + 1;
        let reason_ok = match row.status.as_str() {
            STATUS_OK => row.reason_code.is_empty(),
            STATUS_EXCEPTION => ReasonCode::from_str(&row.reason_code).is_ok(),
            _ => {
                findings.push(Finding::UnknownStatus {
                    row: line,
                    status: row.status.clone(),
                });
                continue;
            }
        };
        if !reason_ok {
            findings.push(Finding::BadReason {
                row: line,
                status: row.status.clone(),
                reason: row.reason_code.clone(),
            });
        }
    }
}

/// OK report rows and processed rows must name the same invoices in the
/// same order.
fn check_partition(bundle: &LoadedBundle, findings: &mut Vec<Finding>) {
    let reported: Vec<String> = bundle
        .report
        .iter()
        .filter(|row| row.status == STATUS_OK)
        .map(|row| format!("{}/{}", row.supplier_id, row.invoice_reference))
        .collect();
    let processed: Vec<String> = bundle
        .processed
        .iter()
        .map(|row| format!("{}/{}", row.supplier_id, row.invoice_number))
        .collect();

    let longest = reported.len().max(processed.len());
    if let Some(index) = (0..longest).find(|&i| reported.get(i) != processed.get(i)) {
        findings.push(Finding::PartitionBroken {
            index: index + 1,
            reported: reported.get(index).cloned(),
            processed: processed.get(index).cloned(),
        });
    }
}

fn check_totals(bundle: &LoadedBundle, findings: &mut Vec<Finding>) {
    for row in &bundle.processed {
        let amounts = [("net", &row.net), ("vat", &row.vat), ("total", &row.total)];
        let mut parsed = Vec::with_capacity(amounts.len());
        for (column, value) in amounts {
            match Decimal::from_str(value) {
                Ok(amount) => parsed.push(amount),
                Err(_) => findings.push(Finding::BadAmount {
                    invoice: row.invoice_number.clone(),
                    column,
                    value: value.clone(),
                }),
            }
        }
        if let [net, vat, total] = parsed[..] {
            if net.checked_add(vat) != Some(total) {
                findings.push(Finding::TotalMismatch {
                    invoice: row.invoice_number.clone(),
                    net: row.net.clone(),
                    vat: row.vat.clone(),
                    total: row.total.clone(),
                });
            }
        }
    }
}

fn check_sources(bundle: &LoadedBundle, input: &Path, findings: &mut Vec<Finding>) {
    for row in &bundle.manifest {
        let path = input.join(&row.source);
        match fs::read(&path) {
            Ok(bytes) => {
                let actual = identify(&bytes);
                if actual != row.sha256 {
                    findings.push(Finding::SourceChanged {
                        source: row.source.clone(),
                        recorded: row.sha256.clone(),
                        actual,
                    });
                }
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "source not readable");
                findings.push(Finding::SourceMissing {
                    source: row.source.clone(),
                });
            }
        }
    }
}
