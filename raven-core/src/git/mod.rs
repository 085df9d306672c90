//! Git Surface: a thin verb wrapper around the `git` CLI.
//!
//! Grounded on `harness::git_manager::GitManager`
//! (`current_branch`, `has_uncommitted_changes`, `stash`/`stash_pop`,
//! `recent_commits`) but made cancellable — every verb spawns via
//! `tokio::process::Command` and accepts a `CancellationToken`, the way
//! [`crate::agent::exec::run_subprocess`] does, instead of
//! blocking `std::process::Command::output()`. Ref/branch names are
//! validated against the spec's allowlist before being placed on any
//! command line (§4.7, §4.11: "prevent shell-arg injection").

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{RavenError, RavenResult};

fn ref_allowlist_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_./-]+$").unwrap())
}

/// Validate a branch or ref name against the spec's allowlist
/// (`^[A-Za-z0-9_./-]+$`).
pub fn validate_ref(name: &str) -> RavenResult<()> {
    if name.is_empty() || !ref_allowlist_re().is_match(name) {
        return Err(RavenError::InvalidInput(format!(
            "ref/branch name '{name}' fails the allowlist check"
        )));
    }
    Ok(())
}

/// A file entry from `diff --name-status`, with rename old/new paths
/// preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffEntry {
    Added(String),
    Modified(String),
    Deleted(String),
    Renamed { old: String, new: String },
    Other { status: String, path: String },
}

impl DiffEntry {
    pub fn path(&self) -> &str {
        match self {
            DiffEntry::Added(p) | DiffEntry::Modified(p) | DiffEntry::Deleted(p) => p,
            DiffEntry::Renamed { new, .. } => new,
            DiffEntry::Other { path, .. } => path,
        }
    }
}

/// `--numstat` line: `-1` in either column means binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumstatEntry<'a> {
    pub added: Option<u64>,
    pub removed: Option<u64>,
    pub path: &'a str,
}

pub struct GitSurface {
    working_dir: PathBuf,
}

impl GitSurface {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    async fn run(&self, cancel: &CancellationToken, args: &[&str]) -> RavenResult<String> {
        let mut command = Command::new("git");
        command.args(args).current_dir(&self.working_dir);

        let spawned = command.output();
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(RavenError::Cancelled),
            result = spawned => result,
        };

        let output = output.map_err(|e| {
            RavenError::subprocess_failed(
                format!("git {}", args.join(" ")),
                None,
                format!("failed to start: {e}"),
            )
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(RavenError::subprocess_failed(
                format!("git {}", args.join(" ")),
                output.status.code(),
                stderr,
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub async fn current_branch(&self, cancel: &CancellationToken) -> RavenResult<String> {
        self.run(cancel, &["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    pub async fn has_uncommitted_changes(&self, cancel: &CancellationToken) -> RavenResult<bool> {
        let status = self.run(cancel, &["status", "--porcelain"]).await?;
        Ok(!status.is_empty())
    }

    pub async fn stash(&self, cancel: &CancellationToken, message: &str) -> RavenResult<()> {
        self.run(cancel, &["stash", "push", "-m", message]).await?;
        Ok(())
    }

    pub async fn stash_pop(&self, cancel: &CancellationToken) -> RavenResult<()> {
        self.run(cancel, &["stash", "pop"]).await?;
        Ok(())
    }

    pub async fn fetch(&self, cancel: &CancellationToken, remote: &str) -> RavenResult<()> {
        validate_ref(remote)?;
        self.run(cancel, &["fetch", remote]).await?;
        Ok(())
    }

    pub async fn push(
        &self,
        cancel: &CancellationToken,
        remote: &str,
        branch: &str,
    ) -> RavenResult<()> {
        validate_ref(remote)?;
        validate_ref(branch)?;
        self.run(cancel, &["push", remote, branch]).await?;
        Ok(())
    }

    pub async fn checkout(&self, cancel: &CancellationToken, branch: &str) -> RavenResult<()> {
        validate_ref(branch)?;
        self.run(cancel, &["checkout", branch]).await?;
        Ok(())
    }

    /// Checkout `branch`, creating it from `base` if it does not yet
    /// exist (idempotent — matches §4.9 "create or switch to it").
    pub async fn checkout_or_create(
        &self,
        cancel: &CancellationToken,
        branch: &str,
        base: Option<&str>,
    ) -> RavenResult<()> {
        validate_ref(branch)?;
        if let Some(base) = base {
            validate_ref(base)?;
        }
        if self.checkout(cancel, branch).await.is_ok() {
            return Ok(());
        }
        let mut args = vec!["checkout", "-b", branch];
        if let Some(base) = base {
            args.push(base);
        }
        self.run(cancel, &args).await?;
        Ok(())
    }

    pub async fn log(&self, cancel: &CancellationToken, count: usize) -> RavenResult<Vec<String>> {
        let format_arg = format!("-{count}");
        let output = self
            .run(cancel, &["log", "--oneline", &format_arg])
            .await?;
        Ok(output.lines().map(|s| s.to_string()).collect())
    }

    /// `git diff --name-status base...HEAD` (three-dot: common-ancestor
    /// semantics, §4.7).
    pub async fn diff_name_status(
        &self,
        cancel: &CancellationToken,
        base: &str,
    ) -> RavenResult<Vec<DiffEntry>> {
        validate_ref(base)?;
        let range = format!("{base}...HEAD");
        let output = self
            .run(cancel, &["diff", "--name-status", &range])
            .await?;
        Ok(output.lines().filter_map(parse_name_status_line).collect())
    }

    /// `git diff --numstat base...HEAD`.
    pub async fn diff_numstat(&self, cancel: &CancellationToken, base: &str) -> RavenResult<String> {
        validate_ref(base)?;
        let range = format!("{base}...HEAD");
        self.run(cancel, &["diff", "--numstat", &range]).await
    }

    /// Unified diff text, `git diff base...HEAD`.
    pub async fn diff_unified(&self, cancel: &CancellationToken, base: &str) -> RavenResult<String> {
        validate_ref(base)?;
        let range = format!("{base}...HEAD");
        self.run(cancel, &["diff", &range]).await
    }
}

fn parse_name_status_line(line: &str) -> Option<DiffEntry> {
    let mut fields = line.split('\t');
    let status = fields.next()?.trim();
    match status.chars().next()? {
        'A' => Some(DiffEntry::Added(fields.next()?.to_string())),
        'M' => Some(DiffEntry::Modified(fields.next()?.to_string())),
        'D' => Some(DiffEntry::Deleted(fields.next()?.to_string())),
        'R' => {
            let old = fields.next()?.to_string();
            let new = fields.next()?.to_string();
            Some(DiffEntry::Renamed { old, new })
        }
        _ => {
            let path = fields.next().unwrap_or_default().to_string();
            Some(DiffEntry::Other {
                status: status.to_string(),
                path,
            })
        }
    }
}

/// Parse a single `--numstat` line. `-` in the added/removed column
/// means binary (§6: "`-1` treated as binary file" — git actually
/// emits a literal `-`, normalized here to `None`).
pub fn parse_numstat_line(line: &str) -> Option<NumstatEntry<'_>> {
    let mut fields = line.splitn(3, '\t');
    let added = fields.next()?;
    let removed = fields.next()?;
    let path = fields.next()?;
    Some(NumstatEntry {
        added: added.parse().ok(),
        removed: removed.parse().ok(),
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_allowlist_accepts_typical_branch_names() {
        assert!(validate_ref("phase/3-add-auth").is_ok());
        assert!(validate_ref("feature_branch.v2").is_ok());
    }

    #[test]
    fn ref_allowlist_rejects_shell_metacharacters() {
        assert!(validate_ref("main; rm -rf /").is_err());
        assert!(validate_ref("$(whoami)").is_err());
        assert!(validate_ref("").is_err());
    }

    #[test]
    fn parses_name_status_rename_with_both_paths() {
        let entry = parse_name_status_line("R100\told/path.rs\tnew/path.rs").unwrap();
        assert_eq!(
            entry,
            DiffEntry::Renamed {
                old: "old/path.rs".into(),
                new: "new/path.rs".into()
            }
        );
        assert_eq!(entry.path(), "new/path.rs");
    }

    #[test]
    fn parses_numstat_binary_marker_as_none() {
        let entry = parse_numstat_line("-\t-\timage.png").unwrap();
        assert_eq!(entry.added, None);
        assert_eq!(entry.removed, None);
        assert_eq!(entry.path, "image.png");
    }

    #[test]
    fn parses_numstat_normal_line() {
        let entry = parse_numstat_line("12\t3\tsrc/main.rs").unwrap();
        assert_eq!(entry.added, Some(12));
        assert_eq!(entry.removed, Some(3));
    }

    #[tokio::test]
    async fn checkout_or_create_rejects_invalid_branch_name() {
        let surface = GitSurface::new(".");
        let cancel = CancellationToken::new();
        let result = surface
            .checkout_or_create(&cancel, "bad;branch", None)
            .await;
        assert!(result.is_err());
    }
}
