/*
 * SPDX-FileCopyrightText: 2025 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use core::consts::{ARCHIVES_DIR, BENCHMARK_REPO_DIR, CHECKOUTS_DIR, TARBALLS_DIR};
use core::input::vec_to_hex;
use core::queue::TaskEvent;
use core::sources::{benchmark_repo_dir, repository_dir, LocalRepo, RepoOpen};
use core::types::*;
use sea_orm::EntityTrait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Checkout or tar creation failed. The snapshot was never good, the
    /// caller may retry.
    #[error("archive preparation failed: {0}")]
    Preparation(anyhow::Error),
    /// Writing to the output failed after a good snapshot was prepared.
    /// Retrying the preparation is pointless, the connection is broken.
    #[error("archive transfer failed: {0}")]
    Transfer(std::io::Error),
}

/// Cache key of one materialized snapshot: (repository directory name, hex
/// commit hash).
pub(crate) type SnapshotKey = (String, String);

/// Size-bounded LRU index over the on-disk snapshot artifacts. Evicted or
/// invalidated entries have their checkout and tar file deleted.
#[derive(Debug)]
pub(crate) struct SnapshotCache {
    capacity: usize,
    // LRU order, least recently used first
    entries: Vec<SnapshotKey>,
}

impl SnapshotCache {
    pub(crate) fn new(capacity: usize) -> Self {
        SnapshotCache {
            capacity,
            entries: Vec::new(),
        }
    }

    pub(crate) fn contains(&self, key: &SnapshotKey) -> bool {
        self.entries.iter().any(|k| k == key)
    }

    pub(crate) fn touch(&mut self, key: &SnapshotKey) {
        if let Some(pos) = self.entries.iter().position(|k| k == key) {
            let entry = self.entries.remove(pos);
            self.entries.push(entry);
        }
    }

    /// Records a key as most recently used and returns the evicted entry
    /// when the cache overflows.
    pub(crate) fn insert(&mut self, key: SnapshotKey) -> Option<SnapshotKey> {
        self.touch(&key);

        if !self.contains(&key) {
            self.entries.push(key);
        }

        if self.entries.len() > self.capacity {
            Some(self.entries.remove(0))
        } else {
            None
        }
    }

    pub(crate) fn remove_repository(&mut self, repo_dir: &str) -> Vec<SnapshotKey> {
        let (dropped, kept): (Vec<SnapshotKey>, Vec<SnapshotKey>) = self
            .entries
            .drain(..)
            .partition(|(repository, _)| repository == repo_dir);
        self.entries = kept;
        dropped
    }
}

/// Builds tar snapshots of commit worktrees and uploaded tarballs. Holds
/// the preparation lock while checking out and packing, so one snapshot is
/// built at a time; streaming happens outside the lock from an already
/// opened file handle.
#[derive(Debug)]
pub struct ArchiveBuilder {
    state: Arc<ServerState>,
    snapshots: Mutex<SnapshotCache>,
}

impl ArchiveBuilder {
    pub fn new(state: Arc<ServerState>) -> Self {
        let capacity = state.cli.archive_cache_capacity;

        ArchiveBuilder {
            state,
            snapshots: Mutex::new(SnapshotCache::new(capacity)),
        }
    }

    /// Streams the snapshot of a task source into `out`: for a commit
    /// source a tar of the repository worktree at that commit, for a
    /// tarball source the uploaded tarball itself.
    pub async fn materialize<W>(&self, source: &TaskSource, out: &mut W) -> Result<(), ArchiveError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        match source {
            TaskSource::Commit { repository, hash } => {
                let file = self
                    .prepare_commit_snapshot(*repository, hash)
                    .await
                    .map_err(ArchiveError::Preparation)?;
                stream_file(file, out).await
            }
            TaskSource::Tarball { tarball, .. } => {
                let path = tarball_file(&self.state.cli.base_path, *tarball);

                let file = tokio::fs::File::open(&path).await.map_err(|e| {
                    ArchiveError::Preparation(anyhow::anyhow!(
                        "uploaded tarball {} not found: {}",
                        tarball,
                        e
                    ))
                })?;

                stream_file(file, out).await
            }
        }
    }

    /// Streams a snapshot of the benchmark-definition repository at its
    /// current head. Preparation runs under the benchmark repository lock
    /// since the synchronization loop mutates that clone.
    pub async fn materialize_benchmarks<W>(&self, out: &mut W) -> Result<(), ArchiveError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let file = {
            let _lock = self.state.benchmark_repo_lock.lock().await;
            let dir = benchmark_repo_dir(&self.state.cli.base_path);

            let local = match LocalRepo::open(&self.state.cli.binpath_git, dir, None)
                .await
                .map_err(ArchiveError::Preparation)?
            {
                RepoOpen::Ready(local) => local,
                RepoOpen::NeedsReclone(reason) => {
                    return Err(ArchiveError::Preparation(anyhow::anyhow!(
                        "benchmark repository unavailable: {}",
                        reason
                    )));
                }
            };

            let head = local
                .head_commit()
                .await
                .map_err(ArchiveError::Preparation)?;

            self.prepare_snapshot(BENCHMARK_REPO_DIR, &local, &head)
                .await
                .map_err(ArchiveError::Preparation)?
        };

        stream_file(file, out).await
    }

    /// Drops every cached snapshot of a repository, on disk included.
    pub async fn invalidate_repository(&self, repo_dir: &str) {
        info!(repository = %repo_dir, "Invalidating cached snapshots");

        {
            let mut snapshots = self.snapshots.lock().await;
            snapshots.remove_repository(repo_dir);
        }

        let base = &self.state.cli.base_path;
        let checkouts = Path::new(base).join(CHECKOUTS_DIR).join(repo_dir);
        let archives = Path::new(base).join(ARCHIVES_DIR).join(repo_dir);

        // Also catches artifacts from before the current process started
        for dir in [checkouts, archives] {
            if dir.is_dir() {
                if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                    warn!(error = %e, path = %dir.display(), "Failed to delete cached snapshot artifacts");
                }
            }
        }
    }

    async fn prepare_commit_snapshot(
        &self,
        repository: Uuid,
        hash: &[u8],
    ) -> Result<tokio::fs::File> {
        ERepository::find_by_id(repository)
            .one(&self.state.db)
            .await
            .context("Failed to query repository")?
            .ok_or_else(|| anyhow::anyhow!("repository {} not found", repository))?;

        let dir = repository_dir(&self.state.cli.base_path, repository);

        let local = match LocalRepo::open(&self.state.cli.binpath_git, dir, None).await? {
            RepoOpen::Ready(local) => local,
            RepoOpen::NeedsReclone(reason) => {
                anyhow::bail!("local clone unavailable: {}", reason)
            }
        };

        self.prepare_snapshot(&repository.to_string(), &local, hash)
            .await
    }

    /// Returns an open handle on the cached tar file for (repository
    /// directory, commit), building checkout and tar on a miss.
    async fn prepare_snapshot(
        &self,
        repo_dir: &str,
        local: &LocalRepo,
        hash: &[u8],
    ) -> Result<tokio::fs::File> {
        let key: SnapshotKey = (repo_dir.to_string(), vec_to_hex(hash));
        let base = self.state.cli.base_path.clone();
        let archive = archive_file(&base, &key);

        let mut snapshots = self.snapshots.lock().await;

        if snapshots.contains(&key) && archive.is_file() {
            snapshots.touch(&key);
            debug!(repository = %key.0, commit = %key.1, "Serving snapshot from cache");

            return tokio::fs::File::open(&archive)
                .await
                .context("Failed to open cached archive");
        }

        let checkout = checkout_dir(&base, &key);

        // Half-built leftovers from an interrupted run
        if checkout.is_dir() {
            tokio::fs::remove_dir_all(&checkout)
                .await
                .context("Failed to clear stale checkout")?;
        }

        local
            .checkout_into(hash, &checkout)
            .await
            .context("Failed to check out commit")?;

        if let Some(parent) = archive.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create archive directory")?;
        }

        pack_tar(checkout.clone(), archive.clone()).await?;

        debug!(repository = %key.0, commit = %key.1, "Built snapshot");

        if let Some(evicted) = snapshots.insert(key) {
            delete_artifacts(&base, &evicted).await;
        }

        tokio::fs::File::open(&archive)
            .await
            .context("Failed to open archive")
    }
}

/// Listens for repository teardown and remote changes and drops the
/// affected snapshot caches.
pub async fn invalidation_loop(state: Arc<ServerState>, builder: Arc<ArchiveBuilder>) {
    let mut repo_events = state.repo_events.subscribe();
    let mut queue_events = state.queue.subscribe();

    loop {
        tokio::select! {
            event = repo_events.recv() => match event {
                Ok(RepositoryEvent::RemoteChanged(repository))
                | Ok(RepositoryEvent::Deleted(repository)) => {
                    builder.invalidate_repository(&repository.to_string()).await;
                }
                Ok(RepositoryEvent::BenchmarkHeadChanged) => {
                    builder.invalidate_repository(BENCHMARK_REPO_DIR).await;
                }
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Repository event stream lagged");
                }
            },
            event = queue_events.recv() => match event {
                Ok(TaskEvent::RepositoryCleared(repository)) => {
                    builder.invalidate_repository(&repository.to_string()).await;
                }
                Ok(_) => {}
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Task event stream lagged");
                }
            },
        }
    }
}

/// Packs a directory into an uncompressed tar file on the blocking pool.
pub(crate) async fn pack_tar(src: PathBuf, dest: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::create(&dest).context("Failed to create archive file")?;
        let mut builder = tar::Builder::new(file);

        builder
            .append_dir_all(".", &src)
            .context("Failed to pack worktree")?;
        builder.finish().context("Failed to finish archive")?;

        Ok(())
    })
    .await
    .context("Archive packing task failed")?
}

async fn delete_artifacts(base_path: &str, key: &SnapshotKey) {
    let checkout = checkout_dir(base_path, key);
    let archive = archive_file(base_path, key);

    if checkout.is_dir() {
        if let Err(e) = tokio::fs::remove_dir_all(&checkout).await {
            warn!(error = %e, path = %checkout.display(), "Failed to delete evicted checkout");
        }
    }

    if archive.is_file() {
        if let Err(e) = tokio::fs::remove_file(&archive).await {
            warn!(error = %e, path = %archive.display(), "Failed to delete evicted archive");
        }
    }
}

async fn stream_file<W>(mut file: tokio::fs::File, out: &mut W) -> Result<(), ArchiveError>
where
    W: AsyncWrite + Unpin + Send,
{
    tokio::io::copy(&mut file, out)
        .await
        .map_err(ArchiveError::Transfer)?;
    out.flush().await.map_err(ArchiveError::Transfer)?;
    Ok(())
}

pub(crate) fn checkout_dir(base_path: &str, key: &SnapshotKey) -> PathBuf {
    Path::new(base_path)
        .join(CHECKOUTS_DIR)
        .join(&key.0)
        .join(&key.1)
}

pub(crate) fn archive_file(base_path: &str, key: &SnapshotKey) -> PathBuf {
    Path::new(base_path)
        .join(ARCHIVES_DIR)
        .join(&key.0)
        .join(format!("{}.tar", key.1))
}

pub(crate) fn tarball_file(base_path: &str, tarball: Uuid) -> PathBuf {
    Path::new(base_path)
        .join(TARBALLS_DIR)
        .join(format!("{}.tar", tarball))
}
