// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Exclude filtering.
//!
//! The same [`ExcludeSet`] is applied twice: when the origin captures an
//! event (the Event Filter) and again when a follower invokes the transfer
//! tool, so a path that slipped through capture is still excluded on the
//! wire.
//!
//! Patterns are shell-style globs (`*`, `?`, `[...]`) matched against the
//! absolute path. `*` crosses `/`, like `fnmatch`. The process's own working
//! directories are always excluded so the origin never observes its own
//! queue writes.

use crate::error::{ReplicationError, Result};
use crate::queue::ChangeEvent;
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};

/// Compiled exclude globs plus the implicit working-directory excludes.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    patterns: Vec<String>,
    set: GlobSet,
    working_dirs: Vec<PathBuf>,
}

impl ExcludeSet {
    /// Compile a list of glob patterns. Any invalid pattern is an error.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let set = compile(&patterns)?;
        Ok(Self {
            patterns,
            set,
            working_dirs: Vec::new(),
        })
    }

    /// An empty set (nothing excluded).
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
            working_dirs: Vec::new(),
        }
    }

    /// Add directories that are always excluded, together with everything below them.
    pub fn with_working_dirs<I>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.working_dirs.extend(dirs);
        self
    }

    /// A new set with `more` patterns appended (follower-side extension).
    pub fn extended<I, S>(&self, more: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut patterns = self.patterns.clone();
        patterns.extend(more.into_iter().map(Into::into));
        let set = compile(&patterns)?;
        Ok(Self {
            patterns,
            set,
            working_dirs: self.working_dirs.clone(),
        })
    }

    /// Glob patterns as configured (without the implicit working dirs).
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn working_dirs(&self) -> &[PathBuf] {
        &self.working_dirs
    }

    /// Whether an absolute path is excluded.
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.working_dirs.iter().any(|dir| path.starts_with(dir)) {
            return true;
        }
        self.set.is_match(path)
    }

    /// Event Filter: `true` if the event should be recorded.
    pub fn accept(&self, event: &ChangeEvent) -> bool {
        !self.is_excluded(&event.path)
    }

    /// Exclude options for a transfer rooted at `root`.
    ///
    /// Relative patterns pass through unchanged. Absolute patterns are
    /// rewritten relative to `root` when nested under it and dropped
    /// otherwise. Working directories under `root` are emitted anchored.
    pub fn transfer_patterns(&self, root: &Path) -> Vec<String> {
        let mut out: Vec<String> = self
            .patterns
            .iter()
            .filter_map(|p| project_pattern(p, root))
            .collect();

        for dir in &self.working_dirs {
            if let Ok(rel) = dir.strip_prefix(root) {
                let rel = rel.to_string_lossy();
                if !rel.is_empty() {
                    out.push(format!("/{}/", rel));
                }
            }
        }
        out
    }
}

/// Rewrite one exclude pattern relative to a transfer root.
///
/// Returns `None` when an absolute pattern does not live under `root`, so
/// excludes of one watch root never leak into another.
pub fn project_pattern(pattern: &str, root: &Path) -> Option<String> {
    if !pattern.starts_with('/') {
        return Some(pattern.to_string());
    }

    let root = root.to_string_lossy();
    let root = root.trim_end_matches('/');
    let rest = if root.is_empty() {
        pattern.trim_start_matches('/')
    } else {
        pattern.strip_prefix(root)?.strip_prefix('/')?
    };

    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// Compile one shell-style glob (`*` crosses `/`).
pub fn shell_glob(pattern: &str) -> Result<Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
        .map_err(|source| ReplicationError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

fn compile(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(shell_glob(pattern)?);
    }
    builder.build().map_err(|source| ReplicationError::Pattern {
        pattern: patterns.join(", "),
        source,
    })
}
