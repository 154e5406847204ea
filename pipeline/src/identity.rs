//! Content hashing and run/record identifiers.
//!
//! Source documents are identified by the SHA-256 of their exact bytes, so
//! reprocessing or tampering with a source is detectable from the manifest.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`.
pub fn identify(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Identifier shared by every artifact of one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a run id from the current time plus a random suffix.
pub fn next_run_id() -> RunId {
    build_run_id(Utc::now(), &generate_short_id())
}

/// `run-<YYYYmmdd_HHMMSS>-<suffix>`.
pub fn build_run_id(at: DateTime<Utc>, suffix: &str) -> RunId {
    RunId(format!("run-{}-{suffix}", at.format("%Y%m%d_%H%M%S")))
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

/// Run-scoped sequential record identifier, assigned in ledger insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(u32);

impl RecordId {
    pub fn first() -> Self {
        RecordId(1)
    }

    pub fn next(self) -> Self {
        RecordId(self.0 + 1)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{:06}", self.0)
    }
}
