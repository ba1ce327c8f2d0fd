/*
 * SPDX-FileCopyrightText: 2025 Wavelens UG <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use super::input::greater_than_zero;
use super::queue::TaskQueue;
use clap::Parser;
use entity::*;
use sea_orm::DatabaseConnection;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "Paceline", display_name = "Paceline", bin_name = "paceline-server", author = "Wavelens", version, about, long_about = None)]
pub struct Cli {
    #[arg(long, env = "PACELINE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
    #[arg(long, env = "PACELINE_DATABASE_URL")]
    pub database_url: Option<String>,
    #[arg(long, env = "PACELINE_DATABASE_URL_FILE")]
    pub database_url_file: Option<String>,
    #[arg(long, env = "PACELINE_BASE_PATH", default_value = ".")]
    pub base_path: String,
    #[arg(long, env = "PACELINE_BENCHMARK_REPO_URL")]
    pub benchmark_repo_url: String,
    #[arg(long, env = "PACELINE_POLL_INTERVAL", value_parser = greater_than_zero::<u64>, default_value = "60")]
    pub poll_interval: u64,
    #[arg(long, env = "PACELINE_COMPACTION_INTERVAL", value_parser = greater_than_zero::<i64>, default_value = "86400")]
    pub compaction_interval: i64,
    #[arg(long, env = "PACELINE_DISCOVERY_CAP", value_parser = greater_than_zero::<usize>, default_value = "1000")]
    pub discovery_cap: usize,
    #[arg(long, env = "PACELINE_DISCOVERY_BATCH_SIZE", value_parser = greater_than_zero::<usize>, default_value = "100")]
    pub discovery_batch_size: usize,
    #[arg(long, env = "PACELINE_ARCHIVE_CACHE_CAPACITY", value_parser = greater_than_zero::<usize>, default_value = "64")]
    pub archive_cache_capacity: usize,
    #[arg(long, env = "PACELINE_BINPATH_GIT", default_value = "git")]
    pub binpath_git: String,
    #[arg(long, env = "PACELINE_REPORT_ERRORS", default_value = "false")]
    pub report_errors: bool,
    #[arg(long, env = "PACELINE_SENTRY_DSN")]
    pub sentry_dsn: Option<String>,
    #[arg(long, env = "PACELINE_STATE_FILE")]
    pub state_file: Option<String>,
    #[arg(long, env = "PACELINE_DELETE_STATE", default_value = "true")]
    pub delete_state: bool,
}

/// Source-level events fired by the synchronization loop and the state
/// loader. The archive builder subscribes to these to drop caches that no
/// longer match the repository they were built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryEvent {
    RemoteChanged(Uuid),
    Deleted(Uuid),
    BenchmarkHeadChanged,
}

#[derive(Debug)]
pub struct ServerState {
    pub db: DatabaseConnection,
    pub cli: Cli,
    pub queue: TaskQueue,
    /// Serializes the whole per-tick body of the synchronization loop.
    pub sync_lock: Mutex<()>,
    /// Guards the benchmark-definition clone, which request handlers read
    /// outside the synchronization loop.
    pub benchmark_repo_lock: Mutex<()>,
    pub repo_events: broadcast::Sender<RepositoryEvent>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("task {task} has neither a commit nor a tarball source")]
pub struct InvalidTaskSource {
    pub task: Uuid,
}

/// What a task materializes from. Exactly one of the two variants holds for
/// every valid task row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSource {
    Commit {
        repository: Uuid,
        hash: Vec<u8>,
    },
    Tarball {
        tarball: Uuid,
        repository: Option<Uuid>,
    },
}

impl TryFrom<&MTask> for TaskSource {
    type Error = InvalidTaskSource;

    fn try_from(task: &MTask) -> Result<Self, Self::Error> {
        match (task.repository, &task.commit_hash, task.tarball) {
            (Some(repository), Some(hash), None) => Ok(TaskSource::Commit {
                repository,
                hash: hash.clone(),
            }),
            (repository, None, Some(tarball)) => Ok(TaskSource::Tarball {
                tarball,
                repository,
            }),
            _ => Err(InvalidTaskSource { task: task.id }),
        }
    }
}

pub type EBranch = branch::Entity;
pub type EKnownCommit = known_commit::Entity;
pub type ERepository = repository::Entity;
pub type ETask = task::Entity;

pub type MBranch = branch::Model;
pub type MKnownCommit = known_commit::Model;
pub type MRepository = repository::Model;
pub type MTask = task::Model;

pub type ABranch = branch::ActiveModel;
pub type AKnownCommit = known_commit::ActiveModel;
pub type ARepository = repository::ActiveModel;
pub type ATask = task::ActiveModel;

pub type CBranch = branch::Column;
pub type CKnownCommit = known_commit::Column;
pub type CRepository = repository::Column;
pub type CTask = task::Column;

pub type RBranch = branch::Relation;
pub type RKnownCommit = known_commit::Relation;
pub type RRepository = repository::Relation;
pub type RTask = task::Relation;
