//! Fuzz target for queue entry name parsing.
//!
//! This tests that name parsing never panics on arbitrary input and that
//! every accepted name carries a purely numeric version.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tree_replication_engine::queue::QueueEntry;

fuzz_target!(|name: &str| {
    // Should never panic
    if let Some((version, kind)) = QueueEntry::parse_name(name) {
        let (prefix, _) = name.split_once('.').unwrap();
        assert!(prefix.bytes().all(|b| b.is_ascii_digit()));
        assert_eq!(prefix.parse::<u64>().unwrap(), version);

        // Canonical names parse back to the same pair
        let canonical = QueueEntry::file_name(version, kind);
        assert_eq!(QueueEntry::parse_name(&canonical), Some((version, kind)));
    }
});
