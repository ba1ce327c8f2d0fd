/*
 * SPDX-FileCopyrightText: 2025 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::start_listener;
use core::consts::{TASK_PRIORITY_DEFAULT, TASK_PRIORITY_MANUAL};
use core::queue::TaskQueue;
use core::types::*;
use entity::repository;
use sea_orm::{DatabaseBackend, MockDatabase};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

fn create_mock_cli() -> Cli {
    Cli {
        log_level: "info".to_string(),
        database_url: Some("mock://test".to_string()),
        database_url_file: None,
        base_path: "/tmp/paceline_test".to_string(),
        benchmark_repo_url: "https://example.com/benchmarks.git".to_string(),
        poll_interval: 60,
        compaction_interval: 86400,
        discovery_cap: 1000,
        discovery_batch_size: 100,
        archive_cache_capacity: 64,
        binpath_git: "/usr/bin/echo".to_string(), // Use echo to mock git commands
        report_errors: false,
        sentry_dsn: None,
        state_file: None,
        delete_state: true,
    }
}

fn create_mock_state() -> Arc<ServerState> {
    let cli = create_mock_cli();
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([Vec::<repository::Model>::new()])
        .into_connection();
    let queue = TaskQueue::new(db.clone());
    let (repo_events, _) = broadcast::channel(64);

    Arc::new(ServerState {
        db,
        cli,
        queue,
        sync_lock: Mutex::new(()),
        benchmark_repo_lock: Mutex::new(()),
        repo_events,
    })
}

#[tokio::test]
async fn test_start_listener() {
    let state = create_mock_state();

    let handle = start_listener(state);
    assert!(!handle.is_finished());

    handle.abort();
}

#[test]
fn test_listener_configuration() {
    let cli = create_mock_cli();

    assert_eq!(cli.poll_interval, 60);
    assert_eq!(cli.discovery_cap, 1000);
    assert_eq!(cli.discovery_batch_size, 100);
    assert!(cli.discovery_batch_size <= cli.discovery_cap);
}

#[test]
fn test_priority_ordering() {
    assert!(TASK_PRIORITY_MANUAL > TASK_PRIORITY_DEFAULT);
}
