//! Fingerprints for features, execution records and reproducers.
//!
//! Feature and record fingerprints are 64-bit xxHash values used to tag log
//! lines and bug reports. Reproducer ids are SHA-256 so they are stable
//! across versions and usable as file names.

use sha2::{Digest, Sha256};
use xxhash_rust::xxh64;

use crate::feature::SyntaxFeature;
use crate::feedback::ExecutionRecord;

const SEED: u64 = 0x517cc1b727220a95;

pub fn feature_fingerprint(feature: &SyntaxFeature) -> u64 {
    xxh64::xxh64(feature.to_string().as_bytes(), SEED)
}

/// Fingerprint of a record's non-meta feature set and status.
///
/// Use counts are ignored: two records exercising the same features hash
/// equal.
pub fn record_fingerprint(record: &ExecutionRecord) -> u64 {
    let mut combined = String::new();
    for (i, feature) in record.feature_set().enumerate() {
        if i > 0 {
            combined.push('\x1E'); // record separator
        }
        combined.push_str(&feature.to_string());
    }
    combined.push('\x1E');
    combined.push_str(if record.success { "ok" } else { "\x00FAIL\x00" });
    xxh64::xxh64(combined.as_bytes(), SEED)
}

/// Hex SHA-256 over statements joined by newlines.
pub fn statements_id<S: AsRef<str>>(statements: &[S]) -> String {
    let mut hasher = Sha256::new();
    for statement in statements {
        hasher.update(statement.as_ref().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}
