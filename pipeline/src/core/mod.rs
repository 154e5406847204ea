//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod amount;
pub mod invariants;
pub mod rules;
pub mod types;
pub mod validator;
pub mod works_type;
