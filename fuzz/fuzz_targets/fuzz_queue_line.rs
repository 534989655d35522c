//! Fuzz target for queue body line parsing.
//!
//! Entry bodies are written by the origin but read from a mirrored
//! directory; a damaged line must never panic the reconciler.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tree_replication_engine::queue::{QueueLine, DELETE_SENTINEL};

fuzz_target!(|line: &str| {
    match QueueLine::parse(line) {
        Some(QueueLine::Delete(path)) => {
            assert!(line.starts_with(DELETE_SENTINEL));
            assert!(!path.as_os_str().is_empty());
        }
        Some(QueueLine::Upsert(_)) => {
            assert!(!line.starts_with(DELETE_SENTINEL));
        }
        None => {}
    }
});
