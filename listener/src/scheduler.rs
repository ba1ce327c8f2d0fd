/*
 * SPDX-FileCopyrightText: 2025 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use chrono::Utc;
use core::consts::{LISTENER_AUTHOR, REPOS_DIR, TASK_PRIORITY_DEFAULT};
use core::database::{run_analyze, run_vacuum};
use core::sources::{
    benchmark_repo_dir, clone_repo, repository_dir, LocalRepo, RecloneReason, RepoOpen,
};
use core::types::*;
use sea_orm::EntityTrait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, instrument, warn};

use super::synchronizer::sync_repository;

/// The scheduled synchronization loop. Ticks immediately, then on the
/// configured poll interval; the whole tick body runs under the coordinator
/// lock so overlapping ticks cannot interleave repository mutation.
pub async fn listen_loop(state: Arc<ServerState>) {
    let _guard = if state.cli.report_errors {
        state.cli.sentry_dsn.as_deref().map(sentry::init)
    } else {
        None
    };

    let mut interval = time::interval(Duration::from_secs(state.cli.poll_interval));
    let mut last_compaction = Utc::now().naive_utc();
    let mut benchmark_head: Option<Vec<u8>> = None;

    info!("Repository synchronization loop started");

    loop {
        interval.tick().await;

        let _lock = state.sync_lock.lock().await;

        if let Err(e) = sync_benchmark_repository(Arc::clone(&state), &mut benchmark_head).await {
            warn!(error = %e, "Benchmark repository sync failed");
        }

        let repositories = match ERepository::find().all(&state.db).await {
            Ok(repositories) => repositories,
            Err(e) => {
                error!(error = %e, "Failed to list repositories");
                continue;
            }
        };

        if let Err(e) = delete_orphaned_clones(&state, &repositories).await {
            warn!(error = %e, "Failed to clean up orphaned clones");
        }

        for repository in &repositories {
            sync_one_repository(Arc::clone(&state), repository).await;
        }

        if let Err(e) = run_analyze(&state.db).await {
            warn!(error = %e, "Query planner refresh failed");
        }

        let now = Utc::now().naive_utc();
        if (now - last_compaction).num_seconds() >= state.cli.compaction_interval {
            match run_vacuum(&state.db).await {
                Ok(()) => {
                    last_compaction = now;
                    debug!("Storage compaction completed");
                }
                Err(e) => warn!(error = %e, "Storage compaction failed"),
            }
        }
    }
}

#[instrument(skip(state, repository), fields(repository = %repository.id, name = %repository.name))]
async fn sync_one_repository(state: Arc<ServerState>, repository: &MRepository) {
    let local = match ensure_local_repo(Arc::clone(&state), repository).await {
        Ok(Some(local)) => local,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "Skipping repository this tick");
            return;
        }
    };

    let new_commits = match sync_repository(Arc::clone(&state), repository, &local).await {
        Ok(commits) => commits,
        Err(e) => {
            warn!(error = %e, "Repository synchronization failed");
            return;
        }
    };

    if new_commits.is_empty() {
        debug!("No new commits discovered");
        return;
    }

    info!(commit_count = new_commits.len(), "Discovered new commits");

    let hashes: Vec<Vec<u8>> = new_commits.iter().map(|c| c.hash.clone()).collect();

    match state
        .queue
        .enqueue_commits(
            LISTENER_AUTHOR,
            repository.id,
            &hashes,
            TASK_PRIORITY_DEFAULT,
        )
        .await
    {
        Ok(tasks) => debug!(task_count = tasks.len(), "Enqueued benchmark tasks"),
        Err(e) => error!(error = %e, "Failed to enqueue benchmark tasks"),
    }
}

/// Opens the local clone, recloning it first when it is missing, corrupted,
/// or configured against a stale remote. Returns `None` when the reclone
/// failed; the repository is retried on the next tick.
async fn ensure_local_repo(
    state: Arc<ServerState>,
    repository: &MRepository,
) -> Result<Option<LocalRepo>> {
    let dir = repository_dir(&state.cli.base_path, repository.id);

    match LocalRepo::open(
        &state.cli.binpath_git,
        dir.clone(),
        Some(&repository.remote_url),
    )
    .await?
    {
        RepoOpen::Ready(local) => {
            if let Err(e) = local.fetch().await {
                // Sync continues against the last fetched state
                warn!(error = %e, "Fetch failed");
            }
            Ok(Some(local))
        }
        RepoOpen::NeedsReclone(reason) => {
            warn!(reason = %reason, "Recloning repository");

            if matches!(reason, RecloneReason::RemoteChanged { .. }) {
                let _ = state
                    .repo_events
                    .send(RepositoryEvent::RemoteChanged(repository.id));
            }

            reclone(&state, &repository.remote_url, &dir).await
        }
    }
}

async fn reclone(
    state: &Arc<ServerState>,
    remote_url: &str,
    dir: &Path,
) -> Result<Option<LocalRepo>> {
    if dir.exists() {
        tokio::fs::remove_dir_all(dir)
            .await
            .context("Failed to delete local clone")?;
    }

    match clone_repo(&state.cli.binpath_git, remote_url, dir).await {
        Ok(local) => Ok(Some(local)),
        Err(e) => {
            warn!(error = %e, url = %remote_url, "Reclone failed, retrying next tick");
            Ok(None)
        }
    }
}

/// The benchmark-definition repository is synchronized like any tracked
/// repository but its commits are never queued. Request handlers read it
/// concurrently for archive building, hence the dedicated lock.
async fn sync_benchmark_repository(
    state: Arc<ServerState>,
    last_head: &mut Option<Vec<u8>>,
) -> Result<()> {
    let _lock = state.benchmark_repo_lock.lock().await;
    let dir = benchmark_repo_dir(&state.cli.base_path);

    let local = match LocalRepo::open(
        &state.cli.binpath_git,
        dir.clone(),
        Some(&state.cli.benchmark_repo_url),
    )
    .await?
    {
        RepoOpen::Ready(local) => {
            if let Err(e) = local.fetch().await {
                warn!(error = %e, "Benchmark repository fetch failed");
            }
            local
        }
        RepoOpen::NeedsReclone(reason) => {
            warn!(reason = %reason, "Recloning benchmark repository");

            if dir.exists() {
                tokio::fs::remove_dir_all(&dir)
                    .await
                    .context("Failed to delete benchmark repository clone")?;
            }

            clone_repo(&state.cli.binpath_git, &state.cli.benchmark_repo_url, &dir)
                .await
                .context("Failed to clone benchmark repository")?
        }
    };

    let head = local
        .head_commit()
        .await
        .context("Failed to resolve benchmark repository head")?;

    if last_head.as_ref().is_some_and(|h| *h != head) {
        info!("Benchmark repository head changed");
        let _ = state.repo_events.send(RepositoryEvent::BenchmarkHeadChanged);
    }

    *last_head = Some(head);
    Ok(())
}

/// Deletes clone directories that no longer correspond to a registered
/// repository. The benchmark-definition clone lives outside the clone root
/// and is never collected.
async fn delete_orphaned_clones(
    state: &Arc<ServerState>,
    repositories: &[MRepository],
) -> Result<()> {
    let repos_root = Path::new(&state.cli.base_path).join(REPOS_DIR);

    if !repos_root.is_dir() {
        return Ok(());
    }

    let keep: HashSet<String> = repositories.iter().map(|r| r.id.to_string()).collect();

    let mut entries = tokio::fs::read_dir(&repos_root)
        .await
        .context("Failed to read clone root")?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .context("Failed to read clone root entry")?
    {
        let name = entry.file_name().to_string_lossy().into_owned();

        if keep.contains(&name) {
            continue;
        }

        info!(clone = %name, "Deleting orphaned local clone");

        if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
            warn!(error = %e, clone = %name, "Failed to delete orphaned clone");
        }
    }

    Ok(())
}
