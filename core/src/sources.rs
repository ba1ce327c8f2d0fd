/*
 * SPDX-FileCopyrightText: 2025 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::warn;
use uuid::Uuid;

use super::consts::{BENCHMARK_REPO_DIR, REPOS_DIR};
use super::input::{hex_to_vec, vec_to_hex};

// Field separator for the commit pretty-format. The message is the last
// field, so embedded newlines survive the split.
const COMMIT_FORMAT: &str = "--format=%H%x1f%P%x1f%an%x1f%ae%x1f%at%x1f%cn%x1f%ce%x1f%ct%x1f%B";

/// A commit as read from a local clone. Never persisted; the known-commit
/// table only records hashes and benchmark bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCommit {
    pub hash: Vec<u8>,
    pub parents: Vec<Vec<u8>>,
    pub author_name: String,
    pub author_email: Option<String>,
    pub authored_at: NaiveDateTime,
    pub committer_name: String,
    pub committer_email: Option<String>,
    pub committed_at: NaiveDateTime,
    pub message: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RecloneReason {
    #[error("local clone is missing")]
    Missing,
    #[error("local clone failed to open: {0}")]
    Corrupted(String),
    #[error("configured remote `{configured}` does not match registered remote `{registered}`")]
    RemoteChanged {
        configured: String,
        registered: String,
    },
}

/// Outcome of trying to open a local clone. Reclone handling is an explicit
/// follow-up call by the synchronization loop, not an error path.
#[derive(Debug)]
pub enum RepoOpen {
    Ready(LocalRepo),
    NeedsReclone(RecloneReason),
}

/// Read access to one local bare clone, implemented as git subprocesses
/// against a configurable binary.
#[derive(Debug, Clone)]
pub struct LocalRepo {
    binpath_git: String,
    path: PathBuf,
}

#[async_trait]
pub trait CommitGraphReader: Send + Sync {
    /// Resolves a single commit, `None` if the hash cannot be resolved in
    /// the repository's object store.
    async fn commit(&self, hash: &[u8]) -> Result<Option<GitCommit>>;

    /// Every commit reachable from the given tips through the parent
    /// relation. Unresolvable tips are skipped.
    async fn reachable_from(&self, tips: &[Vec<u8>]) -> Result<HashSet<Vec<u8>>> {
        let mut reachable: HashSet<Vec<u8>> = HashSet::new();
        let mut frontier: VecDeque<Vec<u8>> = tips.iter().cloned().collect();

        while let Some(hash) = frontier.pop_front() {
            if reachable.contains(&hash) {
                continue;
            }

            match self.commit(&hash).await? {
                Some(commit) => {
                    frontier.extend(
                        commit
                            .parents
                            .into_iter()
                            .filter(|p| !reachable.contains(p)),
                    );
                    reachable.insert(hash);
                }
                None => {
                    warn!(hash = %vec_to_hex(&hash), "Commit not resolvable while computing reachability");
                }
            }
        }

        Ok(reachable)
    }
}

impl LocalRepo {
    /// Opens an existing local clone, verifying it is usable and that its
    /// configured remote still matches the registered one.
    pub async fn open(
        binpath_git: &str,
        path: PathBuf,
        registered_remote: Option<&str>,
    ) -> Result<RepoOpen> {
        if !path.is_dir() {
            return Ok(RepoOpen::NeedsReclone(RecloneReason::Missing));
        }

        let repo = LocalRepo {
            binpath_git: binpath_git.to_string(),
            path,
        };

        match repo.git(&["rev-parse", "--is-bare-repository"]).await {
            Ok(out) if out.trim() == "true" => {}
            Ok(out) => {
                return Ok(RepoOpen::NeedsReclone(RecloneReason::Corrupted(format!(
                    "not a bare repository: {}",
                    out.trim()
                ))));
            }
            Err(e) => {
                return Ok(RepoOpen::NeedsReclone(RecloneReason::Corrupted(
                    e.to_string(),
                )));
            }
        }

        if let Some(registered) = registered_remote {
            match repo.git(&["config", "--get", "remote.origin.url"]).await {
                Ok(configured) if configured.trim() == registered => {}
                Ok(configured) => {
                    return Ok(RepoOpen::NeedsReclone(RecloneReason::RemoteChanged {
                        configured: configured.trim().to_string(),
                        registered: registered.to_string(),
                    }));
                }
                Err(e) => {
                    return Ok(RepoOpen::NeedsReclone(RecloneReason::Corrupted(
                        e.to_string(),
                    )));
                }
            }
        }

        Ok(RepoOpen::Ready(repo))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binpath_git)
            .arg("-C")
            .arg(&self.path)
            .args(args)
            .output()
            .await
            .context("Failed to execute git")?;

        if !output.status.success() {
            anyhow::bail!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Updates all branch refs from the remote, pruning deleted ones.
    pub async fn fetch(&self) -> Result<()> {
        self.git(&[
            "fetch",
            "--quiet",
            "--prune",
            "origin",
            "+refs/heads/*:refs/heads/*",
        ])
        .await
        .map(|_| ())
    }

    /// The live ref list as (branch name, tip hash) pairs.
    pub async fn branches(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let output = self
            .git(&[
                "for-each-ref",
                "--format=%(objectname) %(refname:short)",
                "refs/heads",
            ])
            .await?;

        let mut branches = Vec::new();
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            match parse_ref_line(line) {
                Ok(branch) => branches.push(branch),
                Err(e) => warn!(line = %line, error = %e, "Skipping unparsable ref line"),
            }
        }

        Ok(branches)
    }

    pub async fn head_commit(&self) -> Result<Vec<u8>> {
        let output = self.git(&["rev-parse", "HEAD"]).await?;
        hex_to_vec(output.trim()).map_err(|e| anyhow::anyhow!("Invalid HEAD hash: {}", e))
    }

    /// Materializes a disposable working copy of the repository at the given
    /// commit. The copy carries no `.git` directory, so its content is fully
    /// determined by the commit.
    pub async fn checkout_into(&self, hash: &[u8], dest: &Path) -> Result<()> {
        let hex = vec_to_hex(hash);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create checkout parent directory")?;
        }

        let output = Command::new(&self.binpath_git)
            .arg("clone")
            .arg("--quiet")
            .arg("--no-checkout")
            .arg(&self.path)
            .arg(dest)
            .output()
            .await
            .context("Failed to execute git clone")?;

        if !output.status.success() {
            anyhow::bail!(
                "git clone failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let output = Command::new(&self.binpath_git)
            .arg("-C")
            .arg(dest)
            .arg("checkout")
            .arg("--quiet")
            .arg("--detach")
            .arg(&hex)
            .output()
            .await
            .context("Failed to execute git checkout")?;

        if !output.status.success() {
            anyhow::bail!(
                "git checkout of {} failed: {}",
                hex,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        tokio::fs::remove_dir_all(dest.join(".git"))
            .await
            .context("Failed to strip .git from checkout")?;

        Ok(())
    }
}

#[async_trait]
impl CommitGraphReader for LocalRepo {
    async fn commit(&self, hash: &[u8]) -> Result<Option<GitCommit>> {
        let hex = vec_to_hex(hash);
        let output = Command::new(&self.binpath_git)
            .arg("-C")
            .arg(&self.path)
            .arg("show")
            .arg("-s")
            .arg(COMMIT_FORMAT)
            .arg(&hex)
            .output()
            .await
            .context("Failed to execute git show")?;

        if !output.status.success() {
            // Unresolvable hashes are "not found", not an error
            return Ok(None);
        }

        parse_commit_record(&String::from_utf8_lossy(&output.stdout)).map(Some)
    }

    async fn reachable_from(&self, tips: &[Vec<u8>]) -> Result<HashSet<Vec<u8>>> {
        if tips.is_empty() {
            return Ok(HashSet::new());
        }

        let mut args = vec!["rev-list".to_string()];
        args.extend(tips.iter().map(|t| vec_to_hex(t)));

        let output = self
            .git(&args.iter().map(|a| a.as_str()).collect::<Vec<&str>>())
            .await?;

        let mut reachable = HashSet::new();
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            match hex_to_vec(line.trim()) {
                Ok(hash) => {
                    reachable.insert(hash);
                }
                Err(e) => warn!(line = %line, error = %e, "Skipping unparsable rev-list line"),
            }
        }

        Ok(reachable)
    }
}

/// Creates a fresh bare clone at `dest`.
pub async fn clone_repo(binpath_git: &str, remote_url: &str, dest: &Path) -> Result<LocalRepo> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create clone parent directory")?;
    }

    let output = Command::new(binpath_git)
        .arg("clone")
        .arg("--quiet")
        .arg("--bare")
        .arg(remote_url)
        .arg(dest)
        .output()
        .await
        .context("Failed to execute git clone")?;

    if !output.status.success() {
        anyhow::bail!(
            "git clone of {} failed: {}",
            remote_url,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(LocalRepo {
        binpath_git: binpath_git.to_string(),
        path: dest.to_path_buf(),
    })
}

pub fn repository_dir(base_path: &str, repository: Uuid) -> PathBuf {
    Path::new(base_path)
        .join(REPOS_DIR)
        .join(repository.to_string())
}

pub fn benchmark_repo_dir(base_path: &str) -> PathBuf {
    Path::new(base_path).join(BENCHMARK_REPO_DIR)
}

pub fn parse_ref_line(line: &str) -> Result<(String, Vec<u8>), String> {
    let parts = line.split_whitespace().collect::<Vec<&str>>();

    if parts.len() != 2 {
        return Err(format!("expected `<hash> <name>`, got `{}`", line));
    }

    let hash = hex_to_vec(parts[0])?;
    Ok((parts[1].to_string(), hash))
}

pub fn parse_commit_record(raw: &str) -> Result<GitCommit> {
    let fields = raw
        .trim_end_matches('\n')
        .split('\u{1f}')
        .collect::<Vec<&str>>();

    if fields.len() != 9 {
        anyhow::bail!("expected 9 commit fields, got {}", fields.len());
    }

    let hash =
        hex_to_vec(fields[0]).map_err(|e| anyhow::anyhow!("invalid commit hash: {}", e))?;

    let parents = fields[1]
        .split_whitespace()
        .map(hex_to_vec)
        .collect::<Result<Vec<Vec<u8>>, String>>()
        .map_err(|e| anyhow::anyhow!("invalid parent hash: {}", e))?;

    let author_email = match fields[3] {
        "" => None,
        email => Some(email.to_string()),
    };
    let committer_email = match fields[6] {
        "" => None,
        email => Some(email.to_string()),
    };

    Ok(GitCommit {
        hash,
        parents,
        author_name: fields[2].to_string(),
        author_email,
        authored_at: parse_timestamp(fields[4])?,
        committer_name: fields[5].to_string(),
        committer_email,
        committed_at: parse_timestamp(fields[7])?,
        message: fields[8].trim_end().to_string(),
    })
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    let seconds = s
        .parse::<i64>()
        .with_context(|| format!("invalid unix timestamp `{}`", s))?;

    DateTime::from_timestamp(seconds, 0)
        .map(|t| t.naive_utc())
        .ok_or_else(|| anyhow::anyhow!("unix timestamp `{}` out of range", s))
}
