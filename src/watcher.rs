// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filesystem watch adapter.
//!
//! Wraps a recursive `notify` watcher over every watched root and turns its
//! events into [`ChangeEvent`]s on an unbounded channel. The origin loop
//! drains the channel once per poll interval, so everything observed in one
//! interval lands in one queue entry.
//!
//! | notify event                  | change event |
//! |-------------------------------|--------------|
//! | create, modify, close-write   | upsert       |
//! | remove                        | delete       |
//! | rename from                   | delete       |
//! | rename to                     | upsert       |
//! | rename both (from, to)        | delete, upsert |
//! | access, any, other            | ignored      |

use crate::error::{ReplicationError, Result};
use crate::queue::ChangeEvent;
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Map one notify event to zero or more change events.
pub fn classify_event(event: &Event) -> Vec<ChangeEvent> {
    let upsert_all = || event.paths.iter().cloned().map(ChangeEvent::upsert).collect();
    let delete_all = || event.paths.iter().cloned().map(ChangeEvent::delete).collect();

    match &event.kind {
        EventKind::Create(_) => upsert_all(),
        EventKind::Remove(_) => delete_all(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => delete_all(),
            RenameMode::To => upsert_all(),
            RenameMode::Both => {
                let mut events = Vec::with_capacity(2);
                if let Some(from) = event.paths.first() {
                    events.push(ChangeEvent::delete(from.clone()));
                }
                if let Some(to) = event.paths.get(1) {
                    events.push(ChangeEvent::upsert(to.clone()));
                }
                events
            }
            // backend could not tell the direction: trust the filesystem now
            _ => event
                .paths
                .iter()
                .map(|p| {
                    if p.symlink_metadata().is_ok() {
                        ChangeEvent::upsert(p.clone())
                    } else {
                        ChangeEvent::delete(p.clone())
                    }
                })
                .collect(),
        },
        EventKind::Modify(_) => upsert_all(),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => upsert_all(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Recursive watcher over the watched roots.
pub struct TreeWatcher {
    // dropping the watcher stops delivery
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl TreeWatcher {
    /// Start watching every root recursively. Any root that cannot be
    /// watched is an error.
    pub fn start(roots: &[PathBuf]) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for change in classify_event(&event) {
                        if tx.send(change).is_err() {
                            // receiver gone: the origin loop has stopped
                            return;
                        }
                    }
                }
                Err(e) => error!(error = %e, "Watch error"),
            },
            Config::default(),
        )?;

        for root in roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(ReplicationError::Watch)?;
            info!(root = %root.display(), "Watching");
        }

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Everything observed since the last drain, consecutive duplicates collapsed.
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events.dedup();
        if !events.is_empty() {
            debug!(events = events.len(), "Drained watch events");
        }
        events
    }
}
