//! Shared deterministic types for the validation core.
//!
//! These types are the contract between extraction adapters, the validator,
//! the run ledger and the exporter. They carry no I/O and serialize stably.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Canonical field names understood by the validator.
pub mod field {
    pub const INVOICE_NUMBER: &str = "invoice_number";
    pub const DATE: &str = "date";
    pub const NET: &str = "net";
    pub const VAT: &str = "vat";
    pub const TOTAL: &str = "total";
    pub const VAT_CODE: &str = "vat_code";
    pub const WORKS_TYPE: &str = "works_type";
    pub const DESCRIPTION: &str = "description";

    /// Every canonical field, in a stable order.
    pub const ALL: [&str; 8] = [
        INVOICE_NUMBER,
        DATE,
        NET,
        VAT,
        TOTAL,
        VAT_CODE,
        WORKS_TYPE,
        DESCRIPTION,
    ];
}

/// Where a raw record came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Document identifier (file name within the input folder).
    pub document: String,
    /// 1-based data row for tabular sources; `None` for one-record documents.
    pub row: Option<usize>,
}

impl SourceRef {
    pub fn document(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            row: None,
        }
    }

    pub fn row(document: impl Into<String>, row: usize) -> Self {
        Self {
            document: document.into(),
            row: Some(row),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(f, "{}#{}", self.document, row),
            None => f.write_str(&self.document),
        }
    }
}

/// One unvalidated invoice as produced by an extraction collaborator.
///
/// Fields keep whatever names the source used; the validator resolves them
/// through the supplier's column mapping. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    supplier_id: String,
    fields: BTreeMap<String, String>,
    source: SourceRef,
}

impl RawRecord {
    pub fn new(
        supplier_id: impl Into<String>,
        fields: BTreeMap<String, String>,
        source: SourceRef,
    ) -> Self {
        Self {
            supplier_id: supplier_id.into(),
            fields,
            source,
        }
    }

    pub fn supplier_id(&self) -> &str {
        &self.supplier_id
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    /// Raw value stored under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// A record that passed every check. Amounts are rounded to the configured
/// currency precision and `total` is always `net + vat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub supplier_id: String,
    pub invoice_number: String,
    pub date: NaiveDate,
    pub net: Decimal,
    pub vat: Decimal,
    pub vat_code: String,
    pub works_type: String,
    pub total: Decimal,
    pub source: SourceRef,
}

/// Stable reason codes for exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    MissingField,
    BadAmount,
    BadDate,
    VatMismatch,
    TotalMismatch,
    UnknownWorksType,
    UnknownSupplier,
    DuplicateInvoice,
    SourceUnreadable,
}

impl ReasonCode {
    pub const ALL: [ReasonCode; 9] = [
        ReasonCode::MissingField,
        ReasonCode::BadAmount,
        ReasonCode::BadDate,
        ReasonCode::VatMismatch,
        ReasonCode::TotalMismatch,
        ReasonCode::UnknownWorksType,
        ReasonCode::UnknownSupplier,
        ReasonCode::DuplicateInvoice,
        ReasonCode::SourceUnreadable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::MissingField => "MISSING_FIELD",
            ReasonCode::BadAmount => "BAD_AMOUNT",
            ReasonCode::BadDate => "BAD_DATE",
            ReasonCode::VatMismatch => "VAT_MISMATCH",
            ReasonCode::TotalMismatch => "TOTAL_MISMATCH",
            ReasonCode::UnknownWorksType => "UNKNOWN_WORKS_TYPE",
            ReasonCode::UnknownSupplier => "UNKNOWN_SUPPLIER",
            ReasonCode::DuplicateInvoice => "DUPLICATE_INVOICE",
            ReasonCode::SourceUnreadable => "SOURCE_UNREADABLE",
        }
    }
}

impl FromStr for ReasonCode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        ReasonCode::ALL
            .into_iter()
            .find(|code| code.as_str() == raw)
            .ok_or_else(|| format!("unknown reason code '{raw}'"))
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the input behind an exception in the validation report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub supplier_id: String,
    /// Invoice number when one was extracted (non-empty).
    pub invoice_number: Option<String>,
    pub source: SourceRef,
}

impl RecordRef {
    pub fn from_raw(record: &RawRecord, invoice_number: Option<&str>) -> Self {
        Self {
            supplier_id: record.supplier_id().to_string(),
            invoice_number: invoice_number
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            source: record.source().clone(),
        }
    }

    /// Reference for a document that produced no record at all.
    pub fn unreadable(source: SourceRef) -> Self {
        Self {
            supplier_id: String::new(),
            invoice_number: None,
            source,
        }
    }

    /// Human-facing reference: the invoice number, else the source location.
    pub fn reference(&self) -> String {
        match &self.invoice_number {
            Some(number) => number.clone(),
            None => self.source.to_string(),
        }
    }
}

/// A record classified as failing validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationException {
    pub record_ref: RecordRef,
    pub reason: ReasonCode,
    pub detail: String,
}

/// Result of classifying one raw record. There is no third state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Valid(NormalizedRecord),
    Exception(ValidationException),
}

impl ValidationOutcome {
    pub fn exception(record_ref: RecordRef, reason: ReasonCode, detail: impl Into<String>) -> Self {
        ValidationOutcome::Exception(ValidationException {
            record_ref,
            reason,
            detail: detail.into(),
        })
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid(_))
    }

    pub fn supplier_id(&self) -> &str {
        match self {
            ValidationOutcome::Valid(record) => &record.supplier_id,
            ValidationOutcome::Exception(exception) => &exception.record_ref.supplier_id,
        }
    }

    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            ValidationOutcome::Valid(_) => None,
            ValidationOutcome::Exception(exception) => Some(exception.reason),
        }
    }
}
