//! Stable exit codes for audit commands.

/// Nothing to report.
pub const OK: i32 = 0;
/// The command could not run: missing bundle, unreadable artifact.
pub const ERROR: i32 = 1;
/// The command ran and found problems or differences.
pub const FINDINGS: i32 = 2;
