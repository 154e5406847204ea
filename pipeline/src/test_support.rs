//! Test-only helpers for constructing records, rule tables and input folders.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::core::rules::{RuleTable, SupplierDefinition};
use crate::core::types::{
    NormalizedRecord, RawRecord, ReasonCode, RecordRef, SourceRef, ValidationOutcome,
};
use crate::identity::{build_run_id, identify};
use crate::ledger::{
    FinalizedRunLedger, LedgerError, RulesetInfo, RunLedger, SourceManifestEntry,
};

/// Rule file used by integration tests: two suppliers, one remapped, plus
/// a credit-note supplier and a small works-type table.
pub const SAMPLE_RULES: &str = r#"
version = "2026.1"

[settings]
currency_precision = 2
tolerance = "0.01"

[vat]
allow_default = true
default_code = "T1"

[[vat.codes]]
code = "T1"
rate = "20"
label = "Standard"

[[vat.codes]]
code = "T0"
rate = "0"
label = "Zero rated"

[[works_types]]
code = "ELEC"
label = "Electrical"
patterns = ["cable", "socket"]

[[works_types]]
code = "PLANT"
label = "Plant hire"
patterns = ["hire"]

[suppliers.acme]
name = "Acme Electrical"
required_fields = ["invoice_number", "date", "net"]

[suppliers.acme.columns]
invoice_number = "Invoice No"
date = "Invoice Date"
net = "Net"
vat = "VAT"
total = "Gross"
description = "Description"

[suppliers.hirer]
name = "Hire Co"
required_fields = ["invoice_number", "date", "net", "vat_code"]
default_works_type = "PLANT"

[suppliers.refunds]
name = "Refunds Ltd"
credit_note = true

[[extraction]]
supplier = "hirer"
marker = "HIRE CO LTD"

[extraction.patterns]
invoice_number = 'Invoice No[:\s]+(\S+)'
date = 'Date[:\s]+(\d{2}/\d{2}/\d{4})'
net = 'Net[:\s]+([\d,.]+)'
vat_code = 'VAT Code[:\s]+(\w+)'
"#;

/// Supplier with the given required fields and no column remapping.
pub fn supplier(id: &str, required: &[&str]) -> SupplierDefinition {
    SupplierDefinition {
        id: id.to_string(),
        name: format!("{id} supplier"),
        required_fields: required.iter().map(|name| name.to_string()).collect(),
        columns: BTreeMap::new(),
        default_vat_code: None,
        default_works_type: None,
        credit_note: false,
    }
}

/// Raw record from `test.csv` row 1.
pub fn raw_record(supplier_id: &str, fields: &[(&str, &str)]) -> RawRecord {
    let fields = fields
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    RawRecord::new(supplier_id, fields, SourceRef::row("test.csv", 1))
}

/// Default rule table containing exactly `suppliers`.
pub fn rule_table(suppliers: Vec<SupplierDefinition>) -> RuleTable {
    RuleTable {
        version: "test".to_string(),
        suppliers: suppliers
            .into_iter()
            .map(|supplier| (supplier.id.clone(), supplier))
            .collect(),
        ..RuleTable::default()
    }
}

/// Valid record with `total = net + vat`.
pub fn normalized(supplier: &str, invoice: &str, net: Decimal, vat: Decimal) -> NormalizedRecord {
    NormalizedRecord {
        supplier_id: supplier.to_string(),
        invoice_number: invoice.to_string(),
        date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap_or_default(),
        net,
        vat,
        vat_code: "T1".to_string(),
        works_type: "OTHER".to_string(),
        total: net + vat,
        source: SourceRef::document(format!("{invoice}.pdf")),
    }
}

/// Open ledger with a fixed run id and ruleset.
pub fn open_ledger() -> RunLedger {
    let at = Utc
        .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_default();
    RunLedger::open(
        build_run_id(at, "test00"),
        RulesetInfo {
            version: "test".to_string(),
            sha256: identify(b"rules"),
        },
        at,
    )
}

pub fn manifest_entry(source: &str, bytes: &[u8], supplier_id: Option<&str>) -> SourceManifestEntry {
    SourceManifestEntry {
        source: source.to_string(),
        sha256: identify(bytes),
        supplier_id: supplier_id.map(str::to_string),
        invoice_number: None,
    }
}

/// Finalized ledger with one manifest entry, one valid record (`INV-1`,
/// 100.00 + 20.00) and one `MISSING_FIELD` exception from `s.csv#4`.
pub fn finalized_ledger() -> Result<FinalizedRunLedger, LedgerError> {
    let mut ledger = open_ledger();
    ledger.add_manifest_entry(manifest_entry("a.pdf", b"a", Some("acme")))?;
    ledger.record(ValidationOutcome::Valid(normalized(
        "acme",
        "INV-1",
        Decimal::new(10000, 2),
        Decimal::new(2000, 2),
    )))?;
    ledger.record(ValidationOutcome::exception(
        RecordRef::unreadable(SourceRef::row("s.csv", 4)),
        ReasonCode::MissingField,
        "missing required field(s): date, net",
    ))?;
    ledger.finalize(Utc::now())?;
    ledger.into_finalized()
}

/// Input folder, output folder and rule file inside one temp directory.
pub struct TestWorkspace {
    dir: tempfile::TempDir,
}

impl TestWorkspace {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("input"))?;
        fs::write(dir.path().join("rules.toml"), SAMPLE_RULES)?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn input(&self) -> PathBuf {
        self.dir.path().join("input")
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    pub fn rules(&self) -> PathBuf {
        self.dir.path().join("rules.toml")
    }

    pub fn write_input(&self, name: &str, contents: impl AsRef<[u8]>) -> std::io::Result<PathBuf> {
        let path = self.input().join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// A Smartsheet export for `acme` with one valid row, one VAT mismatch
    /// and one missing date.
    pub fn write_sample_sheet(&self, name: &str) -> std::io::Result<PathBuf> {
        self.write_input(
            name,
            "Supplier ID,Invoice No,Invoice Date,Net,VAT,Gross,Description\n\
             acme,A-100,2026-03-01,100.00,20.00,120.00,Twin socket\n\
             acme,A-101,2026-03-02,50.00,5.00,55.00,Cable drum\n\
             acme,A-102,,10.00,2.00,12.00,Sundries\n",
        )
    }
}
