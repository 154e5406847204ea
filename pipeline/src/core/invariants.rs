//! Bundle-level invariants checked before a run ledger may be finalized.

use std::collections::HashSet;

use crate::core::types::ValidationOutcome;

/// Check invariants over the ordered outcomes of a run:
/// - Every valid record satisfies `total == net + vat` exactly.
/// - No `(supplier, invoice number)` pair is accepted twice.
///
/// Returns stable messages in input order; empty means the run is sound.
pub fn validate_outcomes<'a, I>(outcomes: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a ValidationOutcome>,
{
    let mut errors = Vec::new();
    let mut accepted = HashSet::new();

    for (index, outcome) in outcomes.into_iter().enumerate() {
        let ValidationOutcome::Valid(record) = outcome else {
            continue;
        };
        let position = index + 1;
        if record.net.checked_add(record.vat) != Some(record.total) {
            errors.push(format!(
                "record {position}: total {} != net {} + vat {}",
                record.total, record.net, record.vat
            ));
        }
        if !accepted.insert((record.supplier_id.as_str(), record.invoice_number.as_str())) {
            errors.push(format!(
                "record {position}: invoice '{}' from '{}' accepted twice",
                record.invoice_number, record.supplier_id
            ));
        }
    }

    errors
}
