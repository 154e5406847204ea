//! CLI command implementations. Each returns the number of findings.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use pipeline::io::export::is_staging_name;

use crate::bundle::{load, load_metadata};
use crate::compare::compare;
use crate::verify::verify;

/// Verify one bundle, optionally re-hashing its sources in `input`.
pub fn verify_bundle(dir: &Path, input: Option<&Path>) -> Result<usize> {
    let bundle = load(dir)?;
    let findings = verify(&bundle, input);
    let run = &bundle.metadata.run;
    println!(
        "verify: run_id={} valid={} exceptions={} sources={}",
        run.run_id, run.valid_count, run.exception_count, run.source_count
    );
    for finding in &findings {
        println!("verify: finding {}", finding);
    }
    println!(
        "verify: findings={} sources_checked={}",
        findings.len(),
        input.is_some()
    );
    Ok(findings.len())
}

/// Byte-compare the deterministic artifacts of two bundles.
pub fn compare_bundles(left: &Path, right: &Path) -> Result<usize> {
    let differences = compare(left, right)?;
    for difference in &differences {
        println!(
            "compare: {} differs at line {}: {} | {}",
            difference.file,
            difference.line,
            difference.left.as_deref().unwrap_or("<end>"),
            difference.right.as_deref().unwrap_or("<end>")
        );
    }
    println!("compare: differences={}", differences.len());
    Ok(differences.len())
}

/// List bundles in an output folder. Leftover staging directories and
/// bundles without readable metadata count as findings.
pub fn list_bundles(output_dir: &Path) -> Result<usize> {
    let mut names = Vec::new();
    for entry in
        fs::read_dir(output_dir).with_context(|| format!("read {}", output_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    debug!(output = %output_dir.display(), entries = names.len(), "listing bundles");

    let mut findings = 0;
    let mut bundles = 0;
    for name in names {
        if is_staging_name(&name) {
            warn!(name = %name, "leftover staging directory");
            println!("list: staging {}", name);
            findings += 1;
            continue;
        }
        match load_metadata(&output_dir.join(&name)) {
            Ok(metadata) => {
                let run = metadata.run;
                println!(
                    "list: {} valid={} exceptions={} sources={} ruleset={} approval={}",
                    name,
                    run.valid_count,
                    run.exception_count,
                    run.source_count,
                    run.ruleset_version,
                    run.approval_status
                );
                bundles += 1;
            }
            Err(err) => {
                println!("list: incomplete {} ({:#})", name, err);
                findings += 1;
            }
        }
    }
    println!("list: bundles={} findings={}", bundles, findings);
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::io::export::export;
    use pipeline::test_support::finalized_ledger;

    #[test]
    fn list_counts_staging_and_incomplete_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        export(&finalized_ledger().expect("ledger"), temp.path()).expect("export");
        assert_eq!(list_bundles(temp.path()).expect("list"), 0);

        fs::create_dir(temp.path().join(".staging-run-x")).expect("staging");
        fs::create_dir(temp.path().join("run-empty")).expect("empty");
        fs::write(temp.path().join("notes.txt"), "ignored").expect("file");
        assert_eq!(list_bundles(temp.path()).expect("list"), 2);
    }

    #[test]
    fn list_of_missing_folder_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(list_bundles(&temp.path().join("absent")).is_err());
    }

    #[test]
    fn verify_of_clean_bundle_has_no_findings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let bundle = export(&finalized_ledger().expect("ledger"), temp.path()).expect("export");
        assert_eq!(verify_bundle(&bundle.dir, None).expect("verify"), 0);
    }
}
