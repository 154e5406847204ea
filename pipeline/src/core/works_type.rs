//! Deterministic works-type classification from invoice descriptions.

use crate::core::rules::{SupplierDefinition, WorksTypeTable};

/// Resolve the works-type code for a record with no explicit code.
///
/// - First table rule with a keyword contained in the lowercased description.
/// - Otherwise the supplier default, when the supplier is known and has one.
/// - Otherwise the table fallback.
pub fn classify(
    table: &WorksTypeTable,
    description: Option<&str>,
    supplier: Option<&SupplierDefinition>,
) -> String {
    if let Some(description) = description {
        let lowered = description.to_lowercase();
        let matched = table.rules.iter().find(|rule| {
            rule.patterns
                .iter()
                .any(|pattern| !pattern.is_empty() && lowered.contains(pattern.as_str()))
        });
        if let Some(rule) = matched {
            return rule.code.clone();
        }
    }
    supplier
        .and_then(|supplier| supplier.default_works_type.clone())
        .unwrap_or_else(|| table.fallback.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::WorksTypeRule;
    use crate::test_support::supplier;

    fn table() -> WorksTypeTable {
        WorksTypeTable {
            rules: vec![
                WorksTypeRule {
                    code: "ELEC".to_string(),
                    label: "Electrical".to_string(),
                    patterns: vec!["cable".to_string(), "socket".to_string()],
                },
                WorksTypeRule {
                    code: "FIX".to_string(),
                    label: "Fixings".to_string(),
                    patterns: vec!["anchor".to_string(), "socket".to_string()],
                },
            ],
            fallback: "OTHER".to_string(),
        }
    }

    #[test]
    fn first_matching_rule_wins() {
        assert_eq!(classify(&table(), Some("Twin SOCKET outlet"), None), "ELEC");
        assert_eq!(classify(&table(), Some("Chemical anchor"), None), "FIX");
    }

    #[test]
    fn falls_back_to_supplier_default_then_table_fallback() {
        let mut known = supplier("acme", &[]);
        known.default_works_type = Some("PLANT".to_string());
        assert_eq!(classify(&table(), Some("hire"), Some(&known)), "PLANT");
        assert_eq!(classify(&table(), None, Some(&known)), "PLANT");
        assert_eq!(classify(&table(), Some("hire"), None), "OTHER");
    }
}
