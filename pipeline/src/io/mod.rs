//! I/O adapters for pipeline runs.

pub mod config;
pub mod export;
pub mod extract;
pub mod smartsheet;
pub mod source;
