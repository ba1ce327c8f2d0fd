/*
 * SPDX-FileCopyrightText: 2025 Wavelens UG <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use chrono::Utc;
use entity::known_commit::BenchmarkStatus;
use migration::Migrator;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectOptions, ConnectionTrait, Database,
    DatabaseConnection, DbBackend, DbErr, EntityTrait, IntoActiveModel, QueryFilter, Statement,
};
use sea_orm_migration::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::log::LevelFilter;
use tracing::{debug, error};
use uuid::Uuid;

use super::types::*;

pub async fn connect_db(cli: &Cli) -> Result<DatabaseConnection> {
    let db_url = if let Some(file) = &cli.database_url_file {
        std::fs::read_to_string(file).context("Failed to read database url from file")?
    } else if let Some(url) = &cli.database_url {
        url.clone()
    } else {
        anyhow::bail!("No database url provided")
    };

    let mut opt = ConnectOptions::new(db_url.trim().to_string());

    // Only enable SQL logging at debug level
    if cli.log_level == "debug" {
        opt.sqlx_logging(true)
            .sqlx_logging_level(LevelFilter::Debug);
    } else {
        opt.sqlx_logging(false);
    }

    opt.max_connections(100)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(8))
        .max_lifetime(Duration::from_secs(8));

    let db = Database::connect(opt)
        .await
        .context("Failed to connect to database")?;
    Migrator::up(&db, None)
        .await
        .context("Failed to run database migrations")?;
    update_db(&db).await.context("Failed to update database")?;
    Ok(db)
}

// Claims do not survive a restart of the coordinating process. Commits that
// were handed to a dispatcher before the restart are put back into the
// benchmark-required pool so the next sync cycle re-enqueues them.
async fn update_db(db: &DatabaseConnection) -> Result<(), DbErr> {
    let commits = EKnownCommit::find()
        .filter(CKnownCommit::Status.eq(BenchmarkStatus::InProgress))
        .all(db)
        .await?;

    for commit in commits {
        let mut acommit: AKnownCommit = commit.into();
        acommit.status = Set(BenchmarkStatus::Required);
        acommit.updated_at = Set(Utc::now().naive_utc());
        acommit.update(db).await?;
    }

    Ok(())
}

pub async fn update_known_commit_status(
    state: Arc<ServerState>,
    commit: MKnownCommit,
    status: BenchmarkStatus,
) -> MKnownCommit {
    if status == commit.status {
        return commit;
    }

    debug!(commit = %commit.id, status = ?status, "Updating known commit status");

    let mut acommit: AKnownCommit = commit.clone().into_active_model();
    acommit.status = Set(status);
    acommit.updated_at = Set(Utc::now().naive_utc());

    match acommit.update(&state.db).await {
        Ok(updated_commit) => updated_commit,
        Err(e) => {
            error!(error = %e, commit = %commit.id, "Failed to update known commit status");
            commit
        }
    }
}

pub async fn get_repository_by_name(
    state: Arc<ServerState>,
    name: &str,
) -> Result<Option<MRepository>> {
    Ok(ERepository::find()
        .filter(CRepository::Name.eq(name))
        .one(&state.db)
        .await
        .context("Failed to query repository")?)
}

pub async fn get_known_commit(
    state: Arc<ServerState>,
    repository: Uuid,
    hash: &[u8],
) -> Result<Option<MKnownCommit>> {
    Ok(EKnownCommit::find()
        .filter(CKnownCommit::Repository.eq(repository))
        .filter(CKnownCommit::Hash.eq(hash.to_vec()))
        .one(&state.db)
        .await
        .context("Failed to query known commit")?)
}

/// Query-planner refresh, cheap enough to run every tick.
pub async fn run_analyze(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.execute(Statement::from_string(
        DbBackend::Postgres,
        "ANALYZE".to_string(),
    ))
    .await
    .map(|_| ())
}

/// Storage compaction, only run after the configured interval has elapsed.
pub async fn run_vacuum(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.execute(Statement::from_string(
        DbBackend::Postgres,
        "VACUUM".to_string(),
    ))
    .await
    .map(|_| ())
}
