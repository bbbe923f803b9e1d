//! Fuzz target: fragment rows and templates.
//!
//! Feeds arbitrary lines through every store's row parser and the template
//! parser. Malformed input must be rejected with an error, never a panic,
//! and an accepted template must keep its trimmed source.

#![no_main]

use dialect_fuzz::feature::HoleKind;
use dialect_fuzz::fragments::{FragmentStore, Template};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    for line in text.lines().take(64) {
        if let Ok(template) = Template::parse(line) {
            assert_eq!(template.source(), line.trim());
        }
        for hole in HoleKind::ALL {
            let store = FragmentStore::new(hole);
            if let Ok(Some((key, template))) = store.parse_line(line) {
                store.ingest(&key, [template.as_str()]);
            }
        }
    }
});
