//! Fuzz target for exclude projection onto transfer roots.
//!
//! Projection must never panic and never emit an absolute pattern.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::path::Path;
use tree_replication_engine::filter::project_pattern;

fuzz_target!(|data: (&str, &str)| {
    let (pattern, root) = data;

    if let Some(projected) = project_pattern(pattern, Path::new(root)) {
        if pattern.starts_with('/') {
            assert!(!projected.is_empty());
        } else {
            assert_eq!(projected, pattern);
        }
    }
});
