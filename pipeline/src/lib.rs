//! Deterministic invoice validation-and-audit pipeline.
//!
//! Raw invoice records from supplier PDFs and Smartsheet exports are validated
//! against a supplier/VAT/works-type rule table, accumulated in a per-run
//! ledger, and exported as a four-file bundle that is either published whole
//! or not at all.
//!
//! - **[`core`]**: Pure, deterministic logic (types, rules, validator).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (rule file, source documents, export).
//!
//! [`ledger`] holds run state, [`identity`] hashing and identifiers, and
//! [`run`] wires them together for `pipeline run`.

pub mod core;
pub mod exit_codes;
pub mod identity;
pub mod io;
pub mod ledger;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
