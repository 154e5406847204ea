//! Stable exit codes for pipeline CLI commands.

/// Run completed and its bundle was published (exceptions included).
pub const OK: i32 = 0;
/// Invalid setup: unreadable or invalid rule file, missing input folder.
pub const INVALID: i32 = 1;
/// Bundle export failed; nothing was published.
pub const EXPORT_FAILED: i32 = 2;
/// Every source document in the input folder was unreadable.
pub const NO_READABLE_SOURCES: i32 = 3;
