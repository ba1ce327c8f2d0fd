/*
 * SPDX-FileCopyrightText: 2025 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use chrono::Utc;
use core::sources::{CommitGraphReader, GitCommit, LocalRepo};
use core::types::*;
use entity::known_commit::BenchmarkStatus;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, TransactionTrait,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::discovery::{find_unknown_commits, DbKnownCommits};

const INSERT_BATCH_SIZE: usize = 1000;

/// One synchronization cycle for one repository: refresh the branch table,
/// discover commits unknown so far, record them as benchmark-required, and
/// recompute which known commits are still reachable from tracked branches.
///
/// Returns the newly discovered tracked commits oldest-authored-first, the
/// order in which they are to be enqueued.
pub async fn sync_repository(
    state: Arc<ServerState>,
    repository: &MRepository,
    local: &LocalRepo,
) -> Result<Vec<GitCommit>> {
    let branches = refresh_branches(Arc::clone(&state), repository, local).await?;

    let tracked_tips: Vec<Vec<u8>> = branches
        .iter()
        .filter(|b| b.tracked)
        .map(|b| b.hash.clone())
        .collect();

    let probe = DbKnownCommits {
        db: &state.db,
        repository: repository.id,
    };

    let mut new_commits: Vec<GitCommit> = Vec::new();

    for branch in branches.iter().filter(|b| b.tracked) {
        // A failing branch must not abort the cycle for the others
        let found = match find_unknown_commits(
            local,
            &probe,
            branch.hash.clone(),
            state.cli.discovery_cap,
            state.cli.discovery_batch_size,
        )
        .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(branch = %branch.name, error = %e, "Commit discovery failed for branch");
                continue;
            }
        };

        if found.is_empty() {
            continue;
        }

        debug!(branch = %branch.name, commit_count = found.len(), "Discovered unknown commits");

        // Inserting per branch makes commits shared with later branches
        // show up as known there, deduplicating across branches
        insert_known_commits(&state, repository.id, &found).await?;
        new_commits.extend(found);
    }

    recompute_reachability(&state, repository.id, local, &tracked_tips).await?;

    new_commits.sort_by(|a, b| {
        a.authored_at
            .cmp(&b.authored_at)
            .then_with(|| a.hash.cmp(&b.hash))
    });

    Ok(new_commits)
}

/// Replaces the branch rows of a repository with the live ref list. The
/// tracked flag of a branch that still exists is preserved; branches first
/// seen here start out untracked.
async fn refresh_branches(
    state: Arc<ServerState>,
    repository: &MRepository,
    local: &LocalRepo,
) -> Result<Vec<MBranch>> {
    let live = local
        .branches()
        .await
        .context("Failed to list live branches")?;

    let previous = EBranch::find()
        .filter(CBranch::Repository.eq(repository.id))
        .all(&state.db)
        .await
        .context("Failed to query branches")?
        .into_iter()
        .map(|b| (b.name, b.tracked))
        .collect::<HashMap<String, bool>>();

    let rows: Vec<MBranch> = live
        .into_iter()
        .map(|(name, hash)| MBranch {
            id: Uuid::new_v4(),
            repository: repository.id,
            tracked: previous.get(&name).copied().unwrap_or(false),
            name,
            hash,
        })
        .collect();

    let txn = state
        .db
        .begin()
        .await
        .context("Failed to begin branch refresh transaction")?;

    EBranch::delete_many()
        .filter(CBranch::Repository.eq(repository.id))
        .exec(&txn)
        .await
        .context("Failed to clear branch table")?;

    if !rows.is_empty() {
        let active_rows = rows
            .iter()
            .map(|b| b.clone().into_active_model())
            .collect::<Vec<ABranch>>();

        EBranch::insert_many(active_rows)
            .exec(&txn)
            .await
            .context("Failed to insert branches")?;
    }

    txn.commit()
        .await
        .context("Failed to commit branch refresh")?;

    Ok(rows)
}

async fn insert_known_commits(
    state: &Arc<ServerState>,
    repository: Uuid,
    commits: &[GitCommit],
) -> Result<()> {
    let now = Utc::now().naive_utc();

    let rows = commits
        .iter()
        .map(|commit| {
            MKnownCommit {
                id: Uuid::new_v4(),
                repository,
                hash: commit.hash.clone(),
                status: BenchmarkStatus::Required,
                tracked: true,
                created_at: now,
                updated_at: now,
            }
            .into_active_model()
        })
        .collect::<Vec<AKnownCommit>>();

    for chunk in rows.chunks(INSERT_BATCH_SIZE) {
        EKnownCommit::insert_many(chunk.to_vec())
            .exec(&state.db)
            .await
            .context("Failed to insert known commits")?;
    }

    Ok(())
}

/// Recomputes the tracked flag of every known commit of a repository from
/// the set of commits reachable from the tracked branch tips. Commits that
/// fell off all tracked branches stay known, they are just untracked.
pub async fn recompute_reachability<R>(
    state: &Arc<ServerState>,
    repository: Uuid,
    reader: &R,
    tracked_tips: &[Vec<u8>],
) -> Result<()>
where
    R: CommitGraphReader + ?Sized,
{
    let reachable = reader
        .reachable_from(tracked_tips)
        .await
        .context("Failed to compute reachable commits")?;

    let known = EKnownCommit::find()
        .filter(CKnownCommit::Repository.eq(repository))
        .all(&state.db)
        .await
        .context("Failed to query known commits")?;

    let (track, untrack) = partition_tracked_updates(&known, &reachable);

    if !track.is_empty() {
        EKnownCommit::update_many()
            .col_expr(CKnownCommit::Tracked, Expr::value(true))
            .col_expr(CKnownCommit::UpdatedAt, Expr::value(Utc::now().naive_utc()))
            .filter(CKnownCommit::Id.is_in(track))
            .exec(&state.db)
            .await
            .context("Failed to mark commits tracked")?;
    }

    if !untrack.is_empty() {
        EKnownCommit::update_many()
            .col_expr(CKnownCommit::Tracked, Expr::value(false))
            .col_expr(CKnownCommit::UpdatedAt, Expr::value(Utc::now().naive_utc()))
            .filter(CKnownCommit::Id.is_in(untrack))
            .exec(&state.db)
            .await
            .context("Failed to mark commits untracked")?;
    }

    Ok(())
}

/// Splits known commits into those whose tracked flag must be raised and
/// those whose flag must be cleared, given the currently reachable set.
pub fn partition_tracked_updates(
    known: &[MKnownCommit],
    reachable: &HashSet<Vec<u8>>,
) -> (Vec<Uuid>, Vec<Uuid>) {
    let mut track = Vec::new();
    let mut untrack = Vec::new();

    for commit in known {
        let reachable_now = reachable.contains(&commit.hash);

        if reachable_now && !commit.tracked {
            track.push(commit.id);
        } else if !reachable_now && commit.tracked {
            untrack.push(commit.id);
        }
    }

    (track, untrack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::consts::NULL_TIME;

    fn hash(n: u8) -> Vec<u8> {
        vec![n; 20]
    }

    fn known_commit(n: u8, tracked: bool) -> MKnownCommit {
        MKnownCommit {
            id: Uuid::new_v4(),
            repository: Uuid::nil(),
            hash: hash(n),
            status: BenchmarkStatus::Required,
            tracked,
            created_at: *NULL_TIME,
            updated_at: *NULL_TIME,
        }
    }

    #[test]
    fn test_partition_flips_unreachable_to_untracked() {
        let known = vec![
            known_commit(1, true),
            known_commit(2, true),
            known_commit(3, true),
        ];
        // Force push moved the tip back: 3 is no longer reachable
        let reachable: HashSet<Vec<u8>> = [hash(1), hash(2)].into_iter().collect();

        let (track, untrack) = partition_tracked_updates(&known, &reachable);

        assert!(track.is_empty());
        assert_eq!(untrack, vec![known[2].id]);
    }

    #[test]
    fn test_partition_raises_newly_reachable() {
        let known = vec![known_commit(1, false), known_commit(2, true)];
        let reachable: HashSet<Vec<u8>> = [hash(1), hash(2)].into_iter().collect();

        let (track, untrack) = partition_tracked_updates(&known, &reachable);

        assert_eq!(track, vec![known[0].id]);
        assert!(untrack.is_empty());
    }

    #[test]
    fn test_partition_leaves_settled_flags_alone() {
        let known = vec![known_commit(1, true), known_commit(2, false)];
        let reachable: HashSet<Vec<u8>> = [hash(1)].into_iter().collect();

        let (track, untrack) = partition_tracked_updates(&known, &reachable);

        assert!(track.is_empty());
        assert!(untrack.is_empty());
    }

    #[test]
    fn test_oldest_authored_first_ordering() {
        use chrono::DateTime;
        use core::sources::GitCommit;

        let commit = |n: u8, authored_at: i64| GitCommit {
            hash: hash(n),
            parents: vec![],
            author_name: "author".to_string(),
            author_email: None,
            authored_at: DateTime::from_timestamp(authored_at, 0).unwrap().naive_utc(),
            committer_name: "author".to_string(),
            committer_email: None,
            committed_at: DateTime::from_timestamp(authored_at, 0).unwrap().naive_utc(),
            message: String::new(),
        };

        let mut commits = vec![commit(3, 300), commit(1, 100), commit(2, 200)];
        commits.sort_by(|a, b| {
            a.authored_at
                .cmp(&b.authored_at)
                .then_with(|| a.hash.cmp(&b.hash))
        });

        let hashes: Vec<Vec<u8>> = commits.iter().map(|c| c.hash.clone()).collect();
        assert_eq!(hashes, vec![hash(1), hash(2), hash(3)]);
    }
}
