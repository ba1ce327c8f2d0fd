/*
 * SPDX-FileCopyrightText: 2025 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use core::input::vec_to_hex;
use core::sources::{CommitGraphReader, GitCommit};
use core::types::*;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::{HashSet, VecDeque};
use tracing::warn;
use uuid::Uuid;

/// Batched membership test against the known-commit store.
#[async_trait]
pub trait KnownCommitProbe: Send + Sync {
    async fn known(&self, hashes: &[Vec<u8>]) -> Result<HashSet<Vec<u8>>>;
}

pub struct DbKnownCommits<'a> {
    pub db: &'a DatabaseConnection,
    pub repository: Uuid,
}

#[async_trait]
impl KnownCommitProbe for DbKnownCommits<'_> {
    async fn known(&self, hashes: &[Vec<u8>]) -> Result<HashSet<Vec<u8>>> {
        let rows = EKnownCommit::find()
            .filter(CKnownCommit::Repository.eq(self.repository))
            .filter(CKnownCommit::Hash.is_in(hashes.to_vec()))
            .all(self.db)
            .await
            .context("Failed to query known commits")?;

        Ok(rows.into_iter().map(|c| c.hash).collect())
    }
}

/// Walks the commit graph breadth-first from `tip` and returns every commit
/// not yet recorded as known, in discovery order, at most `cap` of them.
///
/// Membership checks are issued once per batch of `batch_size` frontier
/// entries instead of per commit, which bounds storage round trips by
/// commits/batch_size. Parents of known commits are never expanded:
/// ancestors of a known commit are known by the reachability invariant.
pub async fn find_unknown_commits<R, P>(
    reader: &R,
    probe: &P,
    tip: Vec<u8>,
    cap: usize,
    batch_size: usize,
) -> Result<Vec<GitCommit>>
where
    R: CommitGraphReader + ?Sized,
    P: KnownCommitProbe + ?Sized,
{
    let mut discovered: Vec<GitCommit> = Vec::new();
    let mut visited: HashSet<Vec<u8>> = HashSet::new();
    let mut frontier: VecDeque<Vec<u8>> = VecDeque::from([tip]);

    'walk: while !frontier.is_empty() {
        let mut batch: Vec<Vec<u8>> = Vec::new();
        while batch.len() < batch_size {
            let Some(hash) = frontier.pop_front() else {
                break;
            };

            // Duplicate ancestor paths of merges collapse here
            if !visited.insert(hash.clone()) {
                continue;
            }

            batch.push(hash);
        }

        if batch.is_empty() {
            break;
        }

        let known = probe.known(&batch).await?;

        for hash in batch {
            if known.contains(&hash) {
                continue;
            }

            let Some(commit) = reader.commit(&hash).await? else {
                warn!(hash = %vec_to_hex(&hash), "Commit not resolvable during discovery, skipping");
                continue;
            };

            frontier.extend(
                commit
                    .parents
                    .iter()
                    .filter(|p| !visited.contains(*p))
                    .cloned(),
            );
            discovered.push(commit);

            if discovered.len() >= cap {
                break 'walk;
            }
        }
    }

    Ok(discovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hash(n: u8) -> Vec<u8> {
        vec![n; 20]
    }

    fn commit(n: u8, parents: &[u8], authored_at: i64) -> GitCommit {
        GitCommit {
            hash: hash(n),
            parents: parents.iter().map(|p| hash(*p)).collect(),
            author_name: format!("author {}", n),
            author_email: Some(format!("author{}@example.com", n)),
            authored_at: DateTime::from_timestamp(authored_at, 0).unwrap().naive_utc(),
            committer_name: format!("author {}", n),
            committer_email: None,
            committed_at: DateTime::from_timestamp(authored_at, 0).unwrap().naive_utc(),
            message: format!("commit {}", n),
        }
    }

    pub struct FakeGraph {
        commits: HashMap<Vec<u8>, GitCommit>,
    }

    impl FakeGraph {
        pub fn new(commits: Vec<GitCommit>) -> Self {
            FakeGraph {
                commits: commits.into_iter().map(|c| (c.hash.clone(), c)).collect(),
            }
        }
    }

    #[async_trait]
    impl CommitGraphReader for FakeGraph {
        async fn commit(&self, hash: &[u8]) -> Result<Option<GitCommit>> {
            Ok(self.commits.get(hash).cloned())
        }
    }

    struct FakeProbe {
        known: HashSet<Vec<u8>>,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        fn new(known: Vec<Vec<u8>>) -> Self {
            FakeProbe {
                known: known.into_iter().collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl KnownCommitProbe for FakeProbe {
        async fn known(&self, hashes: &[Vec<u8>]) -> Result<HashSet<Vec<u8>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(hashes
                .iter()
                .filter(|h| self.known.contains(*h))
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn test_discovers_full_linear_history() {
        let graph = FakeGraph::new(vec![
            commit(1, &[], 100),
            commit(2, &[1], 200),
            commit(3, &[2], 300),
        ]);
        let probe = FakeProbe::new(vec![]);

        let found = find_unknown_commits(&graph, &probe, hash(3), 1000, 100)
            .await
            .unwrap();

        let hashes: Vec<Vec<u8>> = found.iter().map(|c| c.hash.clone()).collect();
        assert_eq!(hashes, vec![hash(3), hash(2), hash(1)]);
    }

    #[tokio::test]
    async fn test_merge_topology_deduplicates() {
        // 1 <- 2, 1 <- 3, (2, 3) <- 4
        let graph = FakeGraph::new(vec![
            commit(1, &[], 100),
            commit(2, &[1], 200),
            commit(3, &[1], 250),
            commit(4, &[2, 3], 300),
        ]);
        let probe = FakeProbe::new(vec![]);

        let found = find_unknown_commits(&graph, &probe, hash(4), 1000, 100)
            .await
            .unwrap();

        assert_eq!(found.len(), 4);
        let unique: HashSet<Vec<u8>> = found.iter().map(|c| c.hash.clone()).collect();
        assert_eq!(unique.len(), 4);
    }

    #[tokio::test]
    async fn test_stops_at_known_commits() {
        let graph = FakeGraph::new(vec![
            commit(1, &[], 100),
            commit(2, &[1], 200),
            commit(3, &[2], 300),
            commit(4, &[3], 400),
        ]);
        // 2 is known, so neither 2 nor its ancestor 1 may be returned
        let probe = FakeProbe::new(vec![hash(2)]);

        let found = find_unknown_commits(&graph, &probe, hash(4), 1000, 100)
            .await
            .unwrap();

        let hashes: Vec<Vec<u8>> = found.iter().map(|c| c.hash.clone()).collect();
        assert_eq!(hashes, vec![hash(4), hash(3)]);
    }

    #[tokio::test]
    async fn test_known_tip_yields_nothing() {
        let graph = FakeGraph::new(vec![commit(1, &[], 100), commit(2, &[1], 200)]);
        let probe = FakeProbe::new(vec![hash(1), hash(2)]);

        let found = find_unknown_commits(&graph, &probe, hash(2), 1000, 100)
            .await
            .unwrap();

        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_cap_bounds_result_exactly() {
        let mut commits = vec![commit(1, &[], 100)];
        for n in 2..=50u8 {
            commits.push(commit(n, &[n - 1], 100 * n as i64));
        }
        let graph = FakeGraph::new(commits);
        let probe = FakeProbe::new(vec![]);

        let found = find_unknown_commits(&graph, &probe, hash(50), 10, 4)
            .await
            .unwrap();

        assert_eq!(found.len(), 10);

        // BFS prefix: every returned commit except the tip has a child in
        // the result
        let returned: HashSet<Vec<u8>> = found.iter().map(|c| c.hash.clone()).collect();
        for commit in found.iter().skip(1) {
            let has_returned_child = found
                .iter()
                .any(|c| c.parents.contains(&commit.hash) && returned.contains(&c.hash));
            assert!(has_returned_child);
        }
    }

    #[tokio::test]
    async fn test_membership_checks_are_batched() {
        // A merge commit with 40 parents, all children of one root
        let mut commits = vec![commit(1, &[], 100)];
        for n in 2..=41u8 {
            commits.push(commit(n, &[1], 100 * n as i64));
        }
        let parents: Vec<u8> = (2..=41u8).collect();
        commits.push(commit(42, &parents, 5000));

        let graph = FakeGraph::new(commits);
        let probe = FakeProbe::new(vec![]);

        let found = find_unknown_commits(&graph, &probe, hash(42), 1000, 10)
            .await
            .unwrap();

        assert_eq!(found.len(), 42);
        // One check for the tip, four for the 40-wide parent layer, one for
        // the root: far fewer than one round trip per commit
        assert!(probe.calls.load(Ordering::SeqCst) <= 6);
    }

    #[tokio::test]
    async fn test_missing_commit_is_skipped() {
        // 3 references parent 2 which is gone from the object store
        let graph = FakeGraph::new(vec![commit(1, &[], 100), commit(3, &[2], 300)]);
        let probe = FakeProbe::new(vec![]);

        let found = find_unknown_commits(&graph, &probe, hash(3), 1000, 100)
            .await
            .unwrap();

        let hashes: Vec<Vec<u8>> = found.iter().map(|c| c.hash.clone()).collect();
        assert_eq!(hashes, vec![hash(3)]);
    }
}
