#![allow(dead_code)]

//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - A filesystem-backed `Transfer` that stands in for the rsync daemon
//! - A per-test fixture: origin tree, working dirs and replica in one tempdir
//! - Queue entry helpers

pub mod fixture;
pub mod local_transfer;

pub use fixture::*;
pub use local_transfer::*;
