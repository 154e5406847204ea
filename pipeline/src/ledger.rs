//! Per-run accumulation of outcomes, manifest entries and metadata.
//!
//! A ledger is `Open` while the run feeds it and `Finalized` afterwards.
//! Everything is stored in insertion order; nothing is edited once appended.
//! Only a [`FinalizedRunLedger`] can be exported.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::invariants::validate_outcomes;
use crate::core::types::ValidationOutcome;
use crate::identity::{RecordId, RunId};

/// Approval state stamped on every bundle; approval happens downstream.
pub const APPROVAL_PENDING: &str = "pending";

/// Errors produced by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger is {state}; cannot {operation}")]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },

    #[error("source '{0}' already has a manifest entry")]
    DuplicateSource(String),

    #[error("ledger invariants violated:\n- {}", .0.join("\n- "))]
    InvariantViolation(Vec<String>),
}

/// Identity of the rule set a run was validated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesetInfo {
    pub version: String,
    /// SHA-256 of the rule file bytes.
    pub sha256: String,
}

/// One source document as first read. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceManifestEntry {
    pub source: String,
    pub sha256: String,
    pub supplier_id: Option<String>,
    pub invoice_number: Option<String>,
}

/// An outcome together with its run-scoped identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: RecordId,
    pub outcome: ValidationOutcome,
}

/// Finalized run metadata, persisted as `run_metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: RunId,
    pub ruleset_version: String,
    pub ruleset_sha256: String,
    pub tool_version: String,
    /// Finalization time, ISO 8601 UTC.
    pub timestamp: String,
    pub started_at: String,
    pub valid_count: usize,
    pub exception_count: usize,
    pub source_count: usize,
    /// Supplier ids seen in this run, sorted.
    pub suppliers: Vec<String>,
    pub approval_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LedgerState {
    Open,
    Finalized(RunMetadata),
}

impl LedgerState {
    fn label(&self) -> &'static str {
        match self {
            LedgerState::Open => "open",
            LedgerState::Finalized(_) => "finalized",
        }
    }
}

/// Single-writer accumulator for one run.
#[derive(Debug)]
pub struct RunLedger {
    run_id: RunId,
    ruleset: RulesetInfo,
    started_at: DateTime<Utc>,
    state: LedgerState,
    entries: Vec<LedgerEntry>,
    manifest: Vec<SourceManifestEntry>,
    next_id: RecordId,
    sources: HashSet<String>,
    hashes: HashMap<String, String>,
    accepted: HashSet<(String, String)>,
}

impl RunLedger {
    pub fn open(run_id: RunId, ruleset: RulesetInfo, started_at: DateTime<Utc>) -> Self {
        debug!(run_id = %run_id, ruleset = %ruleset.version, "ledger opened");
        Self {
            run_id,
            ruleset,
            started_at,
            state: LedgerState::Open,
            entries: Vec::new(),
            manifest: Vec::new(),
            next_id: RecordId::first(),
            sources: HashSet::new(),
            hashes: HashMap::new(),
            accepted: HashSet::new(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.state, LedgerState::Finalized(_))
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn manifest(&self) -> &[SourceManifestEntry] {
        &self.manifest
    }

    /// True when a valid record for this supplier and invoice number is
    /// already in the ledger.
    pub fn contains_invoice(&self, supplier_id: &str, invoice_number: &str) -> bool {
        self.accepted
            .contains(&(supplier_id.to_string(), invoice_number.to_string()))
    }

    /// Append one outcome and return its run-scoped id.
    pub fn record(&mut self, outcome: ValidationOutcome) -> Result<RecordId, LedgerError> {
        self.ensure_open("record outcome")?;
        let id = self.next_id;
        self.next_id = id.next();
        if let ValidationOutcome::Valid(record) = &outcome {
            self.accepted
                .insert((record.supplier_id.clone(), record.invoice_number.clone()));
        }
        debug!(record_id = %id, valid = outcome.is_valid(), reason = ?outcome.reason(), "outcome recorded");
        self.entries.push(LedgerEntry { id, outcome });
        Ok(id)
    }

    /// Append the manifest entry for a source document read in this run.
    pub fn add_manifest_entry(&mut self, entry: SourceManifestEntry) -> Result<(), LedgerError> {
        self.ensure_open("add manifest entry")?;
        if !self.sources.insert(entry.source.clone()) {
            return Err(LedgerError::DuplicateSource(entry.source));
        }
        if let Some(first) = self.hashes.get(&entry.sha256) {
            warn!(
                source = %entry.source,
                first_seen = %first,
                sha256 = %entry.sha256,
                "source content already read in this run"
            );
        } else {
            self.hashes.insert(entry.sha256.clone(), entry.source.clone());
        }
        self.manifest.push(entry);
        Ok(())
    }

    /// Freeze the run metadata and move to `Finalized`.
    ///
    /// Fails if the ledger is already finalized or an invariant is violated;
    /// on failure the ledger stays as it was.
    pub fn finalize(&mut self, finalized_at: DateTime<Utc>) -> Result<&RunMetadata, LedgerError> {
        self.ensure_open("finalize")?;
        let errors = validate_outcomes(self.entries.iter().map(|entry| &entry.outcome));
        if !errors.is_empty() {
            return Err(LedgerError::InvariantViolation(errors));
        }

        let valid_count = self
            .entries
            .iter()
            .filter(|entry| entry.outcome.is_valid())
            .count();
        let suppliers: BTreeSet<String> = self
            .entries
            .iter()
            .map(|entry| entry.outcome.supplier_id())
            .chain(
                self.manifest
                    .iter()
                    .filter_map(|entry| entry.supplier_id.as_deref()),
            )
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();

        let metadata = RunMetadata {
            run_id: self.run_id.clone(),
            ruleset_version: self.ruleset.version.clone(),
            ruleset_sha256: self.ruleset.sha256.clone(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: finalized_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            started_at: self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            valid_count,
            exception_count: self.entries.len() - valid_count,
            source_count: self.manifest.len(),
            suppliers: suppliers.into_iter().collect(),
            approval_status: APPROVAL_PENDING.to_string(),
        };
        debug!(
            run_id = %metadata.run_id,
            valid = metadata.valid_count,
            exceptions = metadata.exception_count,
            "ledger finalized"
        );
        self.state = LedgerState::Finalized(metadata);
        match &self.state {
            LedgerState::Finalized(metadata) => Ok(metadata),
            LedgerState::Open => Err(self.invalid_state("finalize")),
        }
    }

    /// Hand a finalized ledger over for export.
    pub fn into_finalized(self) -> Result<FinalizedRunLedger, LedgerError> {
        match self.state {
            LedgerState::Finalized(metadata) => Ok(FinalizedRunLedger {
                metadata,
                entries: self.entries,
                manifest: self.manifest,
            }),
            LedgerState::Open => Err(LedgerError::InvalidState {
                state: "open",
                operation: "export",
            }),
        }
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), LedgerError> {
        match self.state {
            LedgerState::Open => Ok(()),
            LedgerState::Finalized(_) => Err(self.invalid_state(operation)),
        }
    }

    fn invalid_state(&self, operation: &'static str) -> LedgerError {
        LedgerError::InvalidState {
            state: self.state.label(),
            operation,
        }
    }
}

/// Read-only view of a finalized run, the only input the exporter accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedRunLedger {
    metadata: RunMetadata,
    entries: Vec<LedgerEntry>,
    manifest: Vec<SourceManifestEntry>,
}

impl FinalizedRunLedger {
    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn manifest(&self) -> &[SourceManifestEntry] {
        &self.manifest
    }

    pub fn run_id(&self) -> &RunId {
        &self.metadata.run_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ReasonCode, RecordRef, SourceRef};
    use crate::test_support::{manifest_entry, normalized, open_ledger};
    use rust_decimal_macros::dec;

    fn exception(source: &str) -> ValidationOutcome {
        ValidationOutcome::exception(
            RecordRef::unreadable(SourceRef::document(source)),
            ReasonCode::SourceUnreadable,
            "unreadable",
        )
    }

    #[test]
    fn records_keep_insertion_order_and_sequential_ids() {
        let mut ledger = open_ledger();
        let first = ledger.record(exception("b.pdf")).expect("record");
        let second = ledger
            .record(ValidationOutcome::Valid(normalized(
                "acme",
                "INV-1",
                dec!(1.00),
                dec!(0.20),
            )))
            .expect("record");
        assert_eq!(first.to_string(), "R000001");
        assert_eq!(second.to_string(), "R000002");
        assert_eq!(ledger.entries()[0].id, first);
        assert!(ledger.contains_invoice("acme", "INV-1"));
        assert!(!ledger.contains_invoice("acme", "INV-2"));
    }

    #[test]
    fn finalize_freezes_counts_and_suppliers() {
        let mut ledger = open_ledger();
        ledger
            .add_manifest_entry(manifest_entry("a.pdf", b"a", Some("zeta")))
            .expect("manifest");
        ledger
            .record(ValidationOutcome::Valid(normalized(
                "acme",
                "INV-1",
                dec!(10.00),
                dec!(2.00),
            )))
            .expect("record");
        ledger.record(exception("c.pdf")).expect("record");

        let metadata = ledger.finalize(Utc::now()).expect("finalize").clone();
        assert_eq!(metadata.valid_count, 1);
        assert_eq!(metadata.exception_count, 1);
        assert_eq!(metadata.source_count, 1);
        assert_eq!(metadata.suppliers, vec!["acme", "zeta"]);
        assert_eq!(metadata.approval_status, "pending");
        assert!(metadata.timestamp.ends_with('Z'));
        assert!(ledger.is_finalized());
    }

    #[test]
    fn accumulation_after_finalize_is_invalid_state() {
        let mut ledger = open_ledger();
        ledger.finalize(Utc::now()).expect("finalize");

        let err = ledger.record(exception("x.pdf")).expect_err("record");
        assert!(matches!(err, LedgerError::InvalidState { state: "finalized", .. }));
        let err = ledger
            .add_manifest_entry(manifest_entry("x.pdf", b"x", None))
            .expect_err("manifest");
        assert!(matches!(err, LedgerError::InvalidState { .. }));
        let err = ledger.finalize(Utc::now()).expect_err("finalize twice");
        assert!(matches!(err, LedgerError::InvalidState { .. }));
    }

    #[test]
    fn open_ledger_cannot_be_exported() {
        let err = open_ledger().into_finalized().expect_err("open");
        assert_eq!(
            err,
            LedgerError::InvalidState {
                state: "open",
                operation: "export"
            }
        );
    }

    #[test]
    fn duplicate_source_is_rejected_but_duplicate_content_is_allowed() {
        let mut ledger = open_ledger();
        ledger
            .add_manifest_entry(manifest_entry("a.pdf", b"same", None))
            .expect("first");
        ledger
            .add_manifest_entry(manifest_entry("copy-of-a.pdf", b"same", None))
            .expect("same bytes, new name");
        let err = ledger
            .add_manifest_entry(manifest_entry("a.pdf", b"other", None))
            .expect_err("same name");
        assert_eq!(err, LedgerError::DuplicateSource("a.pdf".to_string()));
        assert_eq!(ledger.manifest().len(), 2);
    }

    #[test]
    fn finalize_refuses_invariant_violations() {
        let mut ledger = open_ledger();
        let mut broken = normalized("acme", "INV-1", dec!(10.00), dec!(2.00));
        broken.total = dec!(99.00);
        ledger
            .record(ValidationOutcome::Valid(broken))
            .expect("record");
        let err = ledger.finalize(Utc::now()).expect_err("invariant");
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
        assert!(!ledger.is_finalized());
    }
}
