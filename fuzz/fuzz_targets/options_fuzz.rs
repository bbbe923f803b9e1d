//! Fuzz target: disabled-options loader.
//!
//! Arbitrary CSV must load without panicking, and every row the loader
//! applies must leave its feature disabled.

#![no_main]

use dialect_fuzz::feedback::{FeedbackSettings, FeedbackStats};
use dialect_fuzz::report::{load_disabled_options, split_fields};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    for line in text.lines() {
        let _ = split_fields(line);
    }
    let mut stats = FeedbackStats::new(FeedbackSettings::default());
    if let Ok(applied) = load_disabled_options(text.as_bytes(), &mut stats) {
        assert!(applied <= text.lines().count());
        for entry in stats.entries() {
            assert!(!entry.enabled);
        }
    }
});
