/*
 * SPDX-FileCopyrightText: 2025 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Tests for task queue behavior against a mocked database

extern crate core as paceline_core;
use entity::task;
use paceline_core::consts::NULL_TIME;
use paceline_core::queue::{TaskEvent, TaskQueue};
use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
use uuid::Uuid;

fn hash(n: u8) -> Vec<u8> {
    vec![n; 20]
}

fn pending_task(repository: Uuid, hash: Vec<u8>) -> task::Model {
    task::Model {
        id: Uuid::new_v4(),
        author: "Listener".to_string(),
        priority: 0,
        repository: Some(repository),
        commit_hash: Some(hash),
        tarball: None,
        created_at: *NULL_TIME,
        updated_at: *NULL_TIME,
    }
}

#[tokio::test]
async fn test_enqueue_commits_inserts_and_notifies() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([Vec::<task::Model>::new()])
        .append_exec_results([MockExecResult {
            last_insert_id: 0,
            rows_affected: 3,
        }])
        .into_connection();

    let queue = TaskQueue::new(db);
    let mut events = queue.subscribe();

    let repository = Uuid::new_v4();
    let tasks = queue
        .enqueue_commits("Listener", repository, &[hash(1), hash(2), hash(3)], 0)
        .await
        .unwrap();

    assert_eq!(tasks.len(), 3);
    assert!(tasks.iter().all(|t| t.author == "Listener"));
    assert!(tasks.iter().all(|t| t.repository == Some(repository)));

    // Insertion order stays total even within one burst
    assert!(tasks[0].created_at < tasks[1].created_at);
    assert!(tasks[1].created_at < tasks[2].created_at);

    let event = events.try_recv().unwrap();
    let expected: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
    assert_eq!(event, TaskEvent::Inserted(expected));
}

#[tokio::test]
async fn test_enqueue_skips_commits_with_pending_tasks() {
    let repository = Uuid::new_v4();

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![pending_task(repository, hash(1))]])
        .append_exec_results([MockExecResult {
            last_insert_id: 0,
            rows_affected: 2,
        }])
        .into_connection();

    let queue = TaskQueue::new(db);

    let tasks = queue
        .enqueue_commits("Listener", repository, &[hash(1), hash(2), hash(3)], 0)
        .await
        .unwrap();

    let hashes: Vec<Vec<u8>> = tasks.into_iter().filter_map(|t| t.commit_hash).collect();
    assert_eq!(hashes, vec![hash(2), hash(3)]);
}

#[tokio::test]
async fn test_enqueue_nothing_is_a_noop() {
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let queue = TaskQueue::new(db);
    let mut events = queue.subscribe();

    let tasks = queue
        .enqueue_commits("Listener", Uuid::new_v4(), &[], 0)
        .await
        .unwrap();

    assert!(tasks.is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_claim_empty_queue_returns_none() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([Vec::<task::Model>::new()])
        .into_connection();

    let queue = TaskQueue::new(db);
    let mut events = queue.subscribe();

    let claimed = queue.claim_next().await.unwrap();

    assert!(claimed.is_none());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_claim_advances_dispatch_state_and_notifies() {
    let repository = Uuid::new_v4();
    let task = pending_task(repository, hash(7));
    let task_id = task.id;

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![task]])
        .append_exec_results([
            // round-robin pointer update
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            },
            // known commit moves to in-progress
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            },
        ])
        .into_connection();

    let queue = TaskQueue::new(db);
    let mut events = queue.subscribe();

    let claimed = queue.claim_next().await.unwrap().unwrap();

    assert_eq!(claimed.id, task_id);
    assert_eq!(events.try_recv().unwrap(), TaskEvent::Removed(vec![task_id]));
}

#[tokio::test]
async fn test_delete_nothing_is_a_noop() {
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let queue = TaskQueue::new(db);
    let mut events = queue.subscribe();

    let deleted = queue.delete(&[]).await.unwrap();

    assert_eq!(deleted, 0);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_delete_notifies_subscribers() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_exec_results([MockExecResult {
            last_insert_id: 0,
            rows_affected: 2,
        }])
        .into_connection();

    let queue = TaskQueue::new(db);
    let mut events = queue.subscribe();

    let task_ids = vec![Uuid::new_v4(), Uuid::new_v4()];
    let deleted = queue.delete(&task_ids).await.unwrap();

    assert_eq!(deleted, 2);
    assert_eq!(events.try_recv().unwrap(), TaskEvent::Removed(task_ids));
}

#[tokio::test]
async fn test_delete_all_for_repository_fires_cleared_event() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_exec_results([MockExecResult {
            last_insert_id: 0,
            rows_affected: 5,
        }])
        .into_connection();

    let queue = TaskQueue::new(db);
    let mut events = queue.subscribe();

    let repository = Uuid::new_v4();
    let deleted = queue.delete_all_for_repository(repository).await.unwrap();

    assert_eq!(deleted, 5);
    assert_eq!(
        events.try_recv().unwrap(),
        TaskEvent::RepositoryCleared(repository)
    );
}
