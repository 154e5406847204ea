//! Orchestration for `pipeline run`.
//!
//! One invocation: load the rule file, discover and read source documents in
//! order, validate every raw record, accumulate outcomes in a fresh
//! [`RunLedger`], finalize it and export the bundle. Records are processed
//! strictly sequentially so ledger order equals input order.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{RawRecord, ReasonCode, RecordRef, SourceRef, ValidationOutcome};
use crate::core::validator::validate;
use crate::exit_codes;
use crate::identity::{RunId, next_run_id};
use crate::io::config::{LoadedRuleset, load_ruleset};
use crate::io::export::{Bundle, export};
use crate::io::source::{SourceDocument, SourceRead, discover, read_source};
use crate::ledger::{LedgerError, RunLedger, SourceManifestEntry};

/// Unrecoverable run failures. Record-level problems never surface here.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid rules: {0:#}")]
    Config(anyhow::Error),

    #[error("invalid input folder: {0:#}")]
    Input(anyhow::Error),

    #[error("none of the {0} source document(s) could be read; no bundle written")]
    AllSourcesUnreadable(usize),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("export failed, nothing published: {0:#}")]
    Export(anyhow::Error),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) | RunError::Input(_) | RunError::Ledger(_) => exit_codes::INVALID,
            RunError::AllSourcesUnreadable(_) => exit_codes::NO_READABLE_SOURCES,
            RunError::Export(_) => exit_codes::EXPORT_FAILED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub rules: PathBuf,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub bundle: Bundle,
    pub valid_count: usize,
    pub exception_count: usize,
    pub source_count: usize,
}

/// Execute one run with a freshly generated run id.
pub fn execute_run(options: &RunOptions) -> Result<RunSummary, RunError> {
    let ruleset = load_ruleset(&options.rules).map_err(RunError::Config)?;
    execute_with_ruleset(options, &ruleset, next_run_id())
}

/// Execute one run against an already loaded rule set.
#[instrument(skip_all, fields(run_id = %run_id, input = %options.input.display()))]
pub fn execute_with_ruleset(
    options: &RunOptions,
    ruleset: &LoadedRuleset,
    run_id: RunId,
) -> Result<RunSummary, RunError> {
    let started_at = Utc::now();
    let documents = discover(&options.input).map_err(RunError::Input)?;

    let mut ledger = RunLedger::open(run_id.clone(), ruleset.info.clone(), started_at);
    let mut unreadable = 0;
    for document in &documents {
        if !process_document(&mut ledger, document, ruleset)? {
            unreadable += 1;
        }
    }
    if !documents.is_empty() && unreadable == documents.len() {
        return Err(RunError::AllSourcesUnreadable(documents.len()));
    }

    let metadata = ledger.finalize(Utc::now())?.clone();
    let finalized = ledger.into_finalized()?;
    let bundle = export(&finalized, &options.output).map_err(RunError::Export)?;

    info!(
        valid = metadata.valid_count,
        exceptions = metadata.exception_count,
        sources = metadata.source_count,
        "run complete"
    );
    Ok(RunSummary {
        run_id,
        bundle,
        valid_count: metadata.valid_count,
        exception_count: metadata.exception_count,
        source_count: metadata.source_count,
    })
}

/// Read one document and append its manifest entry and outcomes.
/// Returns `false` when the document yielded only `SOURCE_UNREADABLE`.
fn process_document(
    ledger: &mut RunLedger,
    document: &SourceDocument,
    ruleset: &LoadedRuleset,
) -> Result<bool, LedgerError> {
    let source = SourceRef::document(&document.name);
    match read_source(document, &ruleset.sources, &ruleset.extractor) {
        SourceRead::Unreadable { error } => {
            ledger.record(unreadable(source, error))?;
            Ok(false)
        }
        SourceRead::Unparseable { sha256, error } => {
            ledger.add_manifest_entry(SourceManifestEntry {
                source: document.name.clone(),
                sha256,
                supplier_id: None,
                invoice_number: None,
            })?;
            ledger.record(unreadable(source, error))?;
            Ok(false)
        }
        SourceRead::Parsed { sha256, records } => {
            let outcomes: Vec<ValidationOutcome> = records
                .iter()
                .map(|record| validate_record(record, ruleset))
                .collect();
            ledger.add_manifest_entry(manifest_entry(&document.name, sha256, &outcomes))?;
            debug!(source = %document.name, records = outcomes.len(), "document validated");
            for outcome in outcomes {
                let outcome = screen_duplicate(ledger, outcome);
                ledger.record(outcome)?;
            }
            Ok(true)
        }
    }
}

fn validate_record(record: &RawRecord, ruleset: &LoadedRuleset) -> ValidationOutcome {
    let supplier = ruleset.rules.supplier(record.supplier_id());
    validate(record, supplier, &ruleset.rules)
}

fn unreadable(source: SourceRef, error: String) -> ValidationOutcome {
    ValidationOutcome::exception(
        RecordRef::unreadable(source),
        ReasonCode::SourceUnreadable,
        error,
    )
}

/// Reclassify a valid record whose invoice was already accepted in this run.
fn screen_duplicate(ledger: &RunLedger, outcome: ValidationOutcome) -> ValidationOutcome {
    let record = match outcome {
        ValidationOutcome::Valid(record) => record,
        exception @ ValidationOutcome::Exception(_) => return exception,
    };
    if !ledger.contains_invoice(&record.supplier_id, &record.invoice_number) {
        return ValidationOutcome::Valid(record);
    }
    warn!(
        supplier = %record.supplier_id,
        invoice = %record.invoice_number,
        source = %record.source,
        "duplicate invoice"
    );
    let detail = format!(
        "invoice '{}' from '{}' was already accepted in this run",
        record.invoice_number, record.supplier_id
    );
    ValidationOutcome::exception(
        RecordRef {
            supplier_id: record.supplier_id,
            invoice_number: Some(record.invoice_number),
            source: record.source,
        },
        ReasonCode::DuplicateInvoice,
        detail,
    )
}

/// Manifest row for a parsed document. Supplier and invoice are linked only
/// when they are unambiguous for the whole document.
fn manifest_entry(name: &str, sha256: String, outcomes: &[ValidationOutcome]) -> SourceManifestEntry {
    let supplier_id = outcomes
        .first()
        .map(ValidationOutcome::supplier_id)
        .filter(|first| {
            !first.is_empty() && outcomes.iter().all(|outcome| outcome.supplier_id() == *first)
        })
        .map(str::to_string);
    let invoice_number = match outcomes {
        [only] => invoice_number(only).map(str::to_string),
        _ => None,
    };

    SourceManifestEntry {
        source: name.to_string(),
        sha256,
        supplier_id,
        invoice_number,
    }
}

fn invoice_number(outcome: &ValidationOutcome) -> Option<&str> {
    match outcome {
        ValidationOutcome::Valid(record) => Some(record.invoice_number.as_str()),
        ValidationOutcome::Exception(exception) => exception.record_ref.invoice_number.as_deref(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{normalized, open_ledger, raw_record, rule_table, supplier};
    use rust_decimal_macros::dec;

    #[test]
    fn exit_codes_follow_failure_kind() {
        assert_eq!(
            RunError::AllSourcesUnreadable(2).exit_code(),
            exit_codes::NO_READABLE_SOURCES
        );
        assert_eq!(
            RunError::Export(anyhow::anyhow!("disk full")).exit_code(),
            exit_codes::EXPORT_FAILED
        );
        assert_eq!(
            RunError::Config(anyhow::anyhow!("bad")).exit_code(),
            exit_codes::INVALID
        );
    }

    #[test]
    fn second_acceptance_of_an_invoice_is_a_duplicate() {
        let mut ledger = open_ledger();
        let first = ValidationOutcome::Valid(normalized("acme", "INV-1", dec!(1.00), dec!(0.20)));
        let first = screen_duplicate(&ledger, first);
        assert!(first.is_valid());
        ledger.record(first).expect("record");

        let again = ValidationOutcome::Valid(normalized("acme", "INV-1", dec!(2.00), dec!(0.40)));
        let again = screen_duplicate(&ledger, again);
        assert_eq!(again.reason(), Some(ReasonCode::DuplicateInvoice));

        let other_supplier =
            ValidationOutcome::Valid(normalized("zeta", "INV-1", dec!(1.00), dec!(0.20)));
        assert!(screen_duplicate(&ledger, other_supplier).is_valid());
    }

    #[test]
    fn manifest_links_only_unambiguous_values() {
        let definition = supplier("acme", &[]);
        let rules = rule_table(vec![definition.clone()]);
        let one = vec![validate(
            &raw_record("acme", &[("invoice_number", "A-1")]),
            Some(&definition),
            &rules,
        )];
        let entry = manifest_entry("a.pdf", "h".to_string(), &one);
        assert_eq!(entry.supplier_id.as_deref(), Some("acme"));
        assert_eq!(entry.invoice_number.as_deref(), Some("A-1"));

        let mixed = vec![
            validate(&raw_record("acme", &[("invoice_number", "A-1")]), Some(&definition), &rules),
            validate(&raw_record("zeta", &[("invoice_number", "Z-1")]), None, &rules),
        ];
        let entry = manifest_entry("s.csv", "h".to_string(), &mixed);
        assert_eq!(entry.supplier_id, None);
        assert_eq!(entry.invoice_number, None);

        let same_supplier = vec![
            validate(&raw_record("acme", &[("invoice_number", "A-1")]), Some(&definition), &rules),
            validate(&raw_record("acme", &[("invoice_number", "A-2")]), Some(&definition), &rules),
        ];
        let entry = manifest_entry("s.csv", "h".to_string(), &same_supplier);
        assert_eq!(entry.supplier_id.as_deref(), Some("acme"));
        assert_eq!(entry.invoice_number, None);
    }
}
