// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Action Trigger: post-sync hooks.
//!
//! Every synced path is tested against every [`ActionRule`] glob. Matched
//! commands are collected into a set, so a command reached through several
//! paths or several rules runs once per call. Each command is launched
//! through `sh -c` in its own process group and abandoned: the trigger never
//! waits for it, never retries it and never reports its exit status.

use crate::config::ActionRule;
use crate::error::Result;
use crate::filter::shell_glob;
use crate::metrics;
use globset::GlobMatcher;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct CompiledRule {
    matcher: GlobMatcher,
    command: String,
}

/// Compiled action rules.
#[derive(Debug, Clone)]
pub struct ActionTrigger {
    rules: Vec<CompiledRule>,
    dry_run: bool,
}

impl ActionTrigger {
    /// Compile rules. An invalid glob is a configuration error.
    pub fn new(rules: &[ActionRule], dry_run: bool) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    matcher: shell_glob(&rule.pattern)?.compile_matcher(),
                    command: rule.command.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules, dry_run })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The TriggerSet for `paths`.
    pub fn matched_commands(&self, paths: &[PathBuf]) -> BTreeSet<String> {
        let mut commands = BTreeSet::new();
        for path in paths {
            for rule in &self.rules {
                if rule.matcher.is_match(path) {
                    commands.insert(rule.command.clone());
                }
            }
        }
        commands
    }

    /// Launch every matched command and return without waiting.
    ///
    /// Must be called from within a tokio runtime. Returns the commands that
    /// were launched (or, in dry-run mode, would have been).
    pub fn trigger(&self, paths: &[PathBuf]) -> Vec<String> {
        let commands = self.matched_commands(paths);
        let mut launched = Vec::with_capacity(commands.len());

        for command in commands {
            if self.dry_run {
                info!(command = %command, "Dry run, not launching action");
                launched.push(command);
                continue;
            }
            match launch_detached(&command) {
                Ok(()) => {
                    info!(command = %command, "Action launched");
                    launched.push(command);
                }
                Err(e) => warn!(command = %command, error = %e, "Failed to launch action"),
            }
        }

        metrics::record_actions_triggered(launched.len());
        launched
    }
}

fn launch_detached(command: &str) -> std::io::Result<()> {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // own process group: a Ctrl-C aimed at us does not reach the hook
    #[cfg(unix)]
    cmd.process_group(0);

    // dropping the handle abandons the child; tokio reaps it in the background
    let _child = cmd.spawn()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn paths(list: &[&str]) -> Vec<PathBuf> {
        list.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_dedup_across_rules_and_paths() {
        let trigger = ActionTrigger::new(
            &[
                ActionRule::new("/etc/nginx/*", "service nginx reload"),
                ActionRule::new("*.conf", "service nginx reload"),
                ActionRule::new("/srv/www/*", "purge-cache"),
            ],
            false,
        )
        .unwrap();

        let commands = trigger.matched_commands(&paths(&[
            "/etc/nginx/nginx.conf",
            "/etc/nginx/sites/default",
            "/srv/www/index.html",
        ]));
        assert_eq!(
            commands.into_iter().collect::<Vec<_>>(),
            vec!["purge-cache".to_string(), "service nginx reload".to_string()]
        );
    }

    #[test]
    fn test_no_match() {
        let trigger = ActionTrigger::new(&[ActionRule::new("/etc/*", "reload")], false).unwrap();
        assert!(trigger.matched_commands(&paths(&["/srv/a"])).is_empty());
        assert!(trigger.matched_commands(&[]).is_empty());
    }

    #[test]
    fn test_invalid_rule_pattern() {
        assert!(ActionTrigger::new(&[ActionRule::new("/etc/[", "x")], false).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_launches_nothing() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("ran");
        let rule = ActionRule::new("*", format!("touch {}", marker.display()));
        let trigger = ActionTrigger::new(&[rule], true).unwrap();

        let launched = trigger.trigger(&paths(&["/a"]));
        assert_eq!(launched.len(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_trigger_runs_once_detached() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("log");
        let rule_a = ActionRule::new("/srv/*", format!("echo x >> {}", log.display()));
        let rule_b = ActionRule::new("*.html", format!("echo x >> {}", log.display()));
        let trigger = ActionTrigger::new(&[rule_a, rule_b], false).unwrap();

        let launched = trigger.trigger(&paths(&["/srv/a.html", "/srv/b.html"]));
        assert_eq!(launched.len(), 1);

        let mut body = String::new();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            body = std::fs::read_to_string(&log).unwrap_or_default();
            if !body.is_empty() {
                break;
            }
        }
        assert_eq!(body, "x\n");
    }
}
