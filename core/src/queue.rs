/*
 * SPDX-FileCopyrightText: 2025 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use entity::known_commit::BenchmarkStatus;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, DbBackend, EntityTrait, IntoActiveModel, QueryFilter, Statement,
    TransactionTrait,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use super::consts::TASK_PRIORITY_MANUAL;
use super::types::*;

const INSERT_BATCH_SIZE: usize = 1000;

// Claim selection in one atomic statement: manual priority always wins, then
// the repository that went longest without a dispatch, then insertion order.
// SKIP LOCKED keeps concurrent claimers from ever seeing the same row.
const CLAIM_NEXT_SQL: &str = r#"
    DELETE FROM public.task
    WHERE id = (
        SELECT t.id FROM public.task t
        LEFT JOIN public.repository r ON t.repository = r.id
        ORDER BY t.priority DESC,
                 COALESCE(r.last_dispatch_at, TIMESTAMP 'epoch') ASC,
                 t.created_at ASC,
                 t.id ASC
        LIMIT 1
        FOR UPDATE OF t SKIP LOCKED
    )
    RETURNING *
"#;

/// Queue change notifications, consumed by caches that mirror queue
/// contents (pending counters, archive eviction on repository teardown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Inserted(Vec<Uuid>),
    Removed(Vec<Uuid>),
    RepositoryCleared(Uuid),
}

/// The durable benchmark work queue. All mutation goes through single
/// atomic statements or single transactions, so the synchronization loop
/// and request handlers can share it without an application-level lock.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    db: DatabaseConnection,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskQueue {
    pub fn new(db: DatabaseConnection) -> Self {
        let (events, _) = broadcast::channel(256);
        TaskQueue { db, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: TaskEvent) {
        // A send error just means nobody is subscribed right now
        let _ = self.events.send(event);
    }

    /// Appends one task per commit, skipping commits that already have a
    /// pending task for this repository. Returns the tasks actually
    /// inserted, in input order.
    pub async fn enqueue_commits(
        &self,
        author: &str,
        repository: Uuid,
        hashes: &[Vec<u8>],
        priority: i32,
    ) -> Result<Vec<MTask>> {
        if hashes.is_empty() {
            return Ok(vec![]);
        }

        let txn = self
            .db
            .begin()
            .await
            .context("Failed to begin enqueue transaction")?;

        let pending = ETask::find()
            .filter(CTask::Repository.eq(repository))
            .filter(CTask::CommitHash.is_in(hashes.to_vec()))
            .all(&txn)
            .await
            .context("Failed to query pending tasks")?
            .into_iter()
            .filter_map(|t| t.commit_hash)
            .collect::<HashSet<Vec<u8>>>();

        let now = Utc::now().naive_utc();
        let mut tasks: Vec<MTask> = vec![];

        for hash in hashes {
            if pending.contains(hash) {
                debug!(repository = %repository, "Skipping commit with pending task");
                continue;
            }

            // Spread creation times inside a burst so insertion order stays
            // total even within one call
            let created_at = now + Duration::microseconds(tasks.len() as i64);

            tasks.push(MTask {
                id: Uuid::new_v4(),
                author: author.to_string(),
                priority,
                repository: Some(repository),
                commit_hash: Some(hash.clone()),
                tarball: None,
                created_at,
                updated_at: created_at,
            });
        }

        if tasks.is_empty() {
            txn.commit()
                .await
                .context("Failed to commit enqueue transaction")?;
            return Ok(vec![]);
        }

        let active_tasks = tasks
            .iter()
            .map(|t| t.clone().into_active_model())
            .collect::<Vec<ATask>>();

        for chunk in active_tasks.chunks(INSERT_BATCH_SIZE) {
            ETask::insert_many(chunk.to_vec())
                .exec(&txn)
                .await
                .context("Failed to insert tasks")?;
        }

        txn.commit()
            .await
            .context("Failed to commit enqueue transaction")?;

        self.notify(TaskEvent::Inserted(tasks.iter().map(|t| t.id).collect()));
        Ok(tasks)
    }

    /// Appends a single task backed by an uploaded tarball.
    pub async fn enqueue_tarball(
        &self,
        author: &str,
        tarball: Uuid,
        repository: Option<Uuid>,
        priority: i32,
    ) -> Result<MTask> {
        let now = Utc::now().naive_utc();

        let atask = ATask {
            id: Set(Uuid::new_v4()),
            author: Set(author.to_string()),
            priority: Set(priority),
            repository: Set(repository),
            commit_hash: Set(None),
            tarball: Set(Some(tarball)),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let task = atask
            .insert(&self.db)
            .await
            .context("Failed to insert tarball task")?;

        self.notify(TaskEvent::Inserted(vec![task.id]));
        Ok(task)
    }

    /// Atomically removes and returns the next pending task, or `None` if
    /// the queue is empty. Never hands the same task to two callers.
    pub async fn claim_next(&self) -> Result<Option<MTask>> {
        let task = ETask::find()
            .from_raw_sql(Statement::from_string(
                DbBackend::Postgres,
                CLAIM_NEXT_SQL.to_string(),
            ))
            .one(&self.db)
            .await
            .context("Failed to claim next task")?;

        let Some(task) = task else {
            return Ok(None);
        };

        if let Some(repository) = task.repository {
            // Advance the round-robin pointer. Fairness bookkeeping only, a
            // failure here does not invalidate the claim itself.
            if let Err(e) = ERepository::update_many()
                .col_expr(
                    CRepository::LastDispatchAt,
                    Expr::value(Utc::now().naive_utc()),
                )
                .filter(CRepository::Id.eq(repository))
                .exec(&self.db)
                .await
            {
                warn!(error = %e, repository = %repository, "Failed to update dispatch time");
            }

            if let Some(hash) = &task.commit_hash {
                if let Err(e) = self
                    .mark_commit(repository, hash, BenchmarkStatus::InProgress)
                    .await
                {
                    warn!(error = %e, repository = %repository, "Failed to mark commit in progress");
                }
            }
        }

        debug!(task = %task.id, author = %task.author, "Claimed task");
        self.notify(TaskEvent::Removed(vec![task.id]));
        Ok(Some(task))
    }

    /// Promotes a task to manual priority so the next claim prefers it over
    /// every non-manual task.
    pub async fn escalate_priority(&self, task_id: Uuid) -> Result<Option<MTask>> {
        let Some(task) = ETask::find_by_id(task_id)
            .one(&self.db)
            .await
            .context("Failed to query task for escalation")?
        else {
            return Ok(None);
        };

        let mut atask: ATask = task.into();
        atask.priority = Set(TASK_PRIORITY_MANUAL);
        atask.updated_at = Set(Utc::now().naive_utc());

        let task = atask
            .update(&self.db)
            .await
            .context("Failed to escalate task priority")?;

        if let (Some(repository), Some(hash)) = (task.repository, &task.commit_hash) {
            if let Err(e) = self
                .mark_commit(repository, hash, BenchmarkStatus::RequiredManualPriority)
                .await
            {
                warn!(error = %e, repository = %repository, "Failed to mark commit as manual priority");
            }
        }

        Ok(Some(task))
    }

    pub async fn delete(&self, task_ids: &[Uuid]) -> Result<u64> {
        if task_ids.is_empty() {
            return Ok(0);
        }

        let result = ETask::delete_many()
            .filter(CTask::Id.is_in(task_ids.to_vec()))
            .exec(&self.db)
            .await
            .context("Failed to delete tasks")?;

        if result.rows_affected > 0 {
            self.notify(TaskEvent::Removed(task_ids.to_vec()));
        }

        Ok(result.rows_affected)
    }

    /// Drops every task of a repository, used on repository deletion.
    pub async fn delete_all_for_repository(&self, repository: Uuid) -> Result<u64> {
        let result = ETask::delete_many()
            .filter(CTask::Repository.eq(repository))
            .exec(&self.db)
            .await
            .context("Failed to delete repository tasks")?;

        self.notify(TaskEvent::RepositoryCleared(repository));
        Ok(result.rows_affected)
    }

    /// Pending task counts keyed by repository (`None` for tarball tasks
    /// without one), for the status surface.
    pub async fn pending_per_repository(&self) -> Result<HashMap<Option<Uuid>, u64>> {
        let rows = self
            .db
            .query_all(Statement::from_string(
                DbBackend::Postgres,
                "SELECT repository, COUNT(*) AS pending FROM public.task GROUP BY repository"
                    .to_string(),
            ))
            .await
            .context("Failed to query pending task counts")?;

        let mut counts = HashMap::new();
        for row in rows {
            let repository: Option<Uuid> = row
                .try_get("", "repository")
                .context("Failed to read repository column")?;
            let pending: i64 = row
                .try_get("", "pending")
                .context("Failed to read pending column")?;
            counts.insert(repository, pending as u64);
        }

        Ok(counts)
    }

    async fn mark_commit(
        &self,
        repository: Uuid,
        hash: &[u8],
        status: BenchmarkStatus,
    ) -> Result<()> {
        EKnownCommit::update_many()
            .col_expr(CKnownCommit::Status, Expr::value(status))
            .col_expr(
                CKnownCommit::UpdatedAt,
                Expr::value(Utc::now().naive_utc()),
            )
            .filter(
                Condition::all()
                    .add(CKnownCommit::Repository.eq(repository))
                    .add(CKnownCommit::Hash.eq(hash.to_vec()))
                    .add(
                        Condition::any()
                            .add(CKnownCommit::Status.eq(BenchmarkStatus::Required))
                            .add(CKnownCommit::Status.eq(BenchmarkStatus::RequiredManualPriority)),
                    ),
            )
            .exec(&self.db)
            .await
            .context("Failed to update known commit status")?;

        Ok(())
    }
}
