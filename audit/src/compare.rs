//! Byte comparison of the deterministic artifacts of two bundles.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use pipeline::io::export::{MANIFEST_FILE, PROCESSED_FILE, REPORT_FILE};

/// Artifacts that must be byte-identical for identical inputs and rules.
pub const DETERMINISTIC_FILES: [&str; 3] = [PROCESSED_FILE, REPORT_FILE, MANIFEST_FILE];

/// First line at which an artifact differs between two bundles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Difference {
    pub file: &'static str,
    /// 1-based.
    pub line: usize,
    pub left: Option<String>,
    pub right: Option<String>,
}

pub fn compare(left: &Path, right: &Path) -> Result<Vec<Difference>> {
    let mut differences = Vec::new();
    for file in DETERMINISTIC_FILES {
        let a = read(&left.join(file))?;
        let b = read(&right.join(file))?;
        if a != b {
            differences.push(first_difference(file, &a, &b));
        }
    }
    Ok(differences)
}

fn read(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn first_difference(file: &'static str, a: &str, b: &str) -> Difference {
    let mut left = a.split_inclusive('\n');
    let mut right = b.split_inclusive('\n');
    let mut line = 1;
    loop {
        let (l, r) = (left.next(), right.next());
        if l != r {
            return Difference {
                file,
                line,
                left: l.map(|text| text.trim_end_matches('\n').to_string()),
                right: r.map(|text| text.trim_end_matches('\n').to_string()),
            };
        }
        line += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(root: &Path, name: &str, report: &str) -> std::path::PathBuf {
        let dir = root.join(name);
        fs::create_dir(&dir).expect("dir");
        fs::write(dir.join(PROCESSED_FILE), "invoice_number\n").expect("write");
        fs::write(dir.join(REPORT_FILE), report).expect("write");
        fs::write(dir.join(MANIFEST_FILE), "source,sha256\n").expect("write");
        dir
    }

    #[test]
    fn identical_bundles_have_no_differences() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = bundle(temp.path(), "a", "h\nx\n");
        let b = bundle(temp.path(), "b", "h\nx\n");
        assert_eq!(compare(&a, &b).expect("compare"), Vec::new());
    }

    #[test]
    fn reports_first_differing_line() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = bundle(temp.path(), "a", "h\nx\ny\n");
        let b = bundle(temp.path(), "b", "h\nx\nz\n");
        assert_eq!(
            compare(&a, &b).expect("compare"),
            vec![Difference {
                file: REPORT_FILE,
                line: 3,
                left: Some("y".to_string()),
                right: Some("z".to_string()),
            }]
        );
    }

    #[test]
    fn shorter_artifact_differs_where_it_ends() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = bundle(temp.path(), "a", "h\nx\n");
        let b = bundle(temp.path(), "b", "h\n");
        let differences = compare(&a, &b).expect("compare");
        assert_eq!(differences[0].line, 2);
        assert_eq!(differences[0].right, None);
    }

    #[test]
    fn missing_trailing_newline_is_a_difference() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = bundle(temp.path(), "a", "h\nx\n");
        let b = bundle(temp.path(), "b", "h\nx");
        let differences = compare(&a, &b).expect("compare");
        assert_eq!(differences.len(), 1);
        assert_eq!(differences[0].line, 2);
    }

    #[test]
    fn missing_artifact_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = bundle(temp.path(), "a", "h\n");
        let b = temp.path().join("missing");
        assert!(compare(&a, &b).is_err());
    }
}
