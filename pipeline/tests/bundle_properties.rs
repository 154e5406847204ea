//! End-to-end properties of published bundles.
//!
//! Drives `execute_run` against temp input folders built from the sample
//! rule set and checks determinism, completeness, the partition law, the
//! total invariant and the all-or-nothing bundle behaviour.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

use pipeline::identity::identify;
use pipeline::io::export::{
    MANIFEST_FILE, METADATA_FILE, MetadataDocument, PROCESSED_FILE, ProcessedRow, REPORT_FILE,
    ReportRow, STATUS_EXCEPTION, STATUS_OK,
};
use pipeline::io::source::discover;
use pipeline::run::{RunError, RunOptions, RunSummary, execute_run};
use pipeline::test_support::TestWorkspace;

fn options(workspace: &TestWorkspace) -> RunOptions {
    RunOptions {
        input: workspace.input(),
        output: workspace.output(),
        rules: workspace.rules(),
    }
}

fn run(workspace: &TestWorkspace) -> RunSummary {
    execute_run(&options(workspace)).expect("run")
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let mut reader = csv::Reader::from_path(path).expect("open csv");
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .expect("parse csv")
}

fn write_fields(workspace: &TestWorkspace, stem: &str, json: &str) {
    workspace
        .write_input(&format!("{stem}.pdf"), format!("%PDF-1.7 {stem}"))
        .expect("pdf");
    workspace
        .write_input(&format!("{stem}.fields.json"), json)
        .expect("sidecar");
}

/// Sheet (1 valid, 2 exceptions), one valid PDF, one PDF without sidecar.
fn mixed_inputs(workspace: &TestWorkspace) {
    workspace.write_sample_sheet("acme-march.csv").expect("sheet");
    write_fields(
        workspace,
        "hirer-0001",
        r#"{"supplier_id": "hirer", "fields": {"invoice_number": "H-1", "date": "02/03/2026", "net": "250.00", "vat_code": "T1"}}"#,
    );
    workspace
        .write_input("orphan.pdf", "%PDF-1.7 orphan")
        .expect("orphan");
}

#[test]
fn identical_inputs_produce_byte_identical_csvs() {
    let workspace = TestWorkspace::new().expect("workspace");
    mixed_inputs(&workspace);

    let first = run(&workspace);
    let second = run(&workspace);
    assert_ne!(first.run_id, second.run_id);

    for file in [PROCESSED_FILE, REPORT_FILE, MANIFEST_FILE] {
        let a = fs::read(first.bundle.dir.join(file)).expect("first");
        let b = fs::read(second.bundle.dir.join(file)).expect("second");
        assert_eq!(a, b, "{file} differs between runs");
    }
}

#[test]
fn every_record_is_reported_once_and_partitioned() {
    let workspace = TestWorkspace::new().expect("workspace");
    mixed_inputs(&workspace);
    let summary = run(&workspace);

    let report: Vec<ReportRow> = read_rows(&summary.bundle.report);
    let processed: Vec<ProcessedRow> = read_rows(&summary.bundle.processed);

    // 3 sheet rows + 1 parsed PDF + 1 unreadable PDF.
    assert_eq!(report.len(), 5);
    assert_eq!(summary.valid_count + summary.exception_count, 5);

    let ok: Vec<&ReportRow> = report.iter().filter(|row| row.status == STATUS_OK).collect();
    assert_eq!(ok.len(), processed.len());
    assert_eq!(ok.len(), 2);
    for (reported, emitted) in ok.iter().zip(&processed) {
        assert_eq!(reported.invoice_reference, emitted.invoice_number);
        assert!(reported.reason_code.is_empty());
    }
    for row in report.iter().filter(|row| row.status == STATUS_EXCEPTION) {
        assert!(!row.reason_code.is_empty());
        assert!(
            !processed
                .iter()
                .any(|emitted| emitted.invoice_number == row.invoice_reference)
        );
    }

    let reasons: Vec<(&str, &str)> = report
        .iter()
        .map(|row| (row.invoice_reference.as_str(), row.reason_code.as_str()))
        .collect();
    assert_eq!(
        reasons,
        vec![
            ("A-100", ""),
            ("A-101", "VAT_MISMATCH"),
            ("A-102", "MISSING_FIELD"),
            ("H-1", ""),
            ("orphan.pdf", "SOURCE_UNREADABLE"),
        ]
    );
}

#[test]
fn processed_rows_satisfy_total_invariant() {
    let workspace = TestWorkspace::new().expect("workspace");
    mixed_inputs(&workspace);
    let summary = run(&workspace);

    let processed: Vec<ProcessedRow> = read_rows(&summary.bundle.processed);
    assert!(!processed.is_empty());
    for row in &processed {
        let net = Decimal::from_str(&row.net).expect("net");
        let vat = Decimal::from_str(&row.vat).expect("vat");
        let total = Decimal::from_str(&row.total).expect("total");
        assert_eq!(total, net + vat, "row {}", row.invoice_number);
        assert_eq!(row.total.split('.').nth(1).map(str::len), Some(2));
    }

    let hire = processed
        .iter()
        .find(|row| row.invoice_number == "H-1")
        .expect("H-1");
    assert_eq!(hire.date, "2026-03-02");
    assert_eq!(hire.vat, "50.00");
    assert_eq!(hire.total, "300.00");
    assert_eq!(hire.works_type, "PLANT");
}

#[test]
fn metadata_links_the_bundle() {
    let workspace = TestWorkspace::new().expect("workspace");
    mixed_inputs(&workspace);
    let summary = run(&workspace);

    let metadata: MetadataDocument =
        serde_json::from_slice(&fs::read(&summary.bundle.metadata).expect("read")).expect("json");
    assert_eq!(metadata.run.run_id, summary.run_id);
    assert_eq!(
        summary.bundle.dir.file_name().and_then(|name| name.to_str()),
        Some(summary.run_id.as_str())
    );
    assert_eq!(metadata.run.valid_count, 2);
    assert_eq!(metadata.run.exception_count, 3);
    assert_eq!(metadata.run.source_count, 3);
    assert_eq!(metadata.run.suppliers, vec!["acme", "hirer"]);
    assert_eq!(metadata.run.approval_status, "pending");
    assert_eq!(
        metadata.run.ruleset_sha256,
        identify(&fs::read(workspace.rules()).expect("rules"))
    );
    for file in [PROCESSED_FILE, REPORT_FILE, MANIFEST_FILE] {
        let bytes = fs::read(summary.bundle.dir.join(file)).expect("artifact");
        assert_eq!(metadata.artifacts[file], identify(&bytes), "{file}");
    }
    assert!(!metadata.artifacts.contains_key(METADATA_FILE));
}

#[test]
fn manifest_hashes_every_read_document() {
    let workspace = TestWorkspace::new().expect("workspace");
    mixed_inputs(&workspace);
    let summary = run(&workspace);

    let manifest = fs::read_to_string(&summary.bundle.manifest).expect("manifest");
    let documents = discover(&workspace.input()).expect("discover");
    assert_eq!(manifest.lines().count(), documents.len() + 1);
    for document in documents {
        let digest = identify(&fs::read(&document.path).expect("source"));
        assert!(
            manifest.contains(&format!("{},{digest}", document.name)),
            "{} missing from manifest",
            document.name
        );
    }
    assert!(manifest.contains("hirer-0001.pdf"));
    assert!(manifest.contains(",hirer,H-1\n"));
    assert!(manifest.contains(",acme,\n"));
}

#[test]
fn missing_required_date_yields_single_missing_field_row() {
    let workspace = TestWorkspace::new().expect("workspace");
    write_fields(
        &workspace,
        "hirer-0002",
        r#"{"supplier_id": "hirer", "fields": {"invoice_number": "H-2", "net": "100.00", "vat_code": "T1"}}"#,
    );
    let summary = run(&workspace);

    let report: Vec<ReportRow> = read_rows(&summary.bundle.report);
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].reason_code, "MISSING_FIELD");
    assert!(report[0].detail.contains("date"));
    let processed: Vec<ProcessedRow> = read_rows(&summary.bundle.processed);
    assert!(processed.is_empty());
}

#[test]
fn text_sidecar_is_extracted_with_supplier_profile() {
    let workspace = TestWorkspace::new().expect("workspace");
    workspace.write_input("scan.pdf", "%PDF scan").expect("pdf");
    workspace
        .write_input(
            "scan.txt",
            "HIRE CO LTD\nInvoice No: HX-77\nDate: 05/03/2026\nNet: 1,000.00\nVAT Code: T0\n",
        )
        .expect("text");
    let summary = run(&workspace);

    let processed: Vec<ProcessedRow> = read_rows(&summary.bundle.processed);
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].invoice_number, "HX-77");
    assert_eq!(processed[0].supplier_id, "hirer");
    assert_eq!(processed[0].vat, "0.00");
    assert_eq!(processed[0].total, "1000.00");
}

#[test]
fn repeated_invoice_is_reported_as_duplicate() {
    let workspace = TestWorkspace::new().expect("workspace");
    let fields = r#"{"supplier_id": "hirer", "fields": {"invoice_number": "H-9", "date": "2026-03-01", "net": "10.00", "vat_code": "T1"}}"#;
    write_fields(&workspace, "a-original", fields);
    write_fields(&workspace, "b-resent", fields);
    let summary = run(&workspace);

    let report: Vec<ReportRow> = read_rows(&summary.bundle.report);
    let reasons: Vec<&str> = report.iter().map(|row| row.reason_code.as_str()).collect();
    assert_eq!(reasons, vec!["", "DUPLICATE_INVOICE"]);
    assert_eq!(summary.valid_count, 1);
}

#[test]
fn empty_input_folder_is_a_zero_record_bundle() {
    let workspace = TestWorkspace::new().expect("workspace");
    let summary = run(&workspace);

    assert_eq!(summary.valid_count, 0);
    assert_eq!(summary.exception_count, 0);
    assert_eq!(
        fs::read_to_string(&summary.bundle.report).expect("report"),
        "invoice_reference,supplier_id,status,reason_code,detail\n"
    );
    assert!(summary.bundle.metadata.is_file());
}

#[test]
fn all_sources_unreadable_publishes_nothing() {
    let workspace = TestWorkspace::new().expect("workspace");
    workspace.write_input("a.pdf", "%PDF a").expect("pdf");
    workspace.write_input("b.pdf", "%PDF b").expect("pdf");

    let err = execute_run(&options(&workspace)).expect_err("all unreadable");
    assert!(matches!(err, RunError::AllSourcesUnreadable(2)));
    let published = fs::read_dir(workspace.output())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(published, 0);
}

#[test]
fn one_readable_source_is_enough_to_publish() {
    let workspace = TestWorkspace::new().expect("workspace");
    workspace.write_input("a.pdf", "%PDF a").expect("pdf");
    workspace.write_sample_sheet("sheet.csv").expect("sheet");
    let summary = run(&workspace);
    assert_eq!(summary.exception_count, 3);
    assert_eq!(summary.valid_count, 1);
}

#[test]
fn invalid_rules_abort_before_any_output() {
    let workspace = TestWorkspace::new().expect("workspace");
    workspace.write_sample_sheet("sheet.csv").expect("sheet");
    fs::write(workspace.rules(), "version = \"\"\n").expect("rules");

    let err = execute_run(&options(&workspace)).expect_err("invalid rules");
    assert!(matches!(err, RunError::Config(_)));
    assert!(!workspace.output().exists());
}
