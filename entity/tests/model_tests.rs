/*
 * SPDX-FileCopyrightText: 2025 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Tests for entity model construction

use chrono::DateTime;
use entity::known_commit::BenchmarkStatus;
use entity::{branch, known_commit, repository, task};
use uuid::Uuid;

fn null_time() -> chrono::NaiveDateTime {
    DateTime::from_timestamp(0, 0).unwrap().naive_utc()
}

#[test]
fn test_repository_model() {
    let repo = repository::Model {
        id: Uuid::new_v4(),
        name: "test-repo".to_string(),
        display_name: "Test Repo".to_string(),
        remote_url: "https://example.com/test/repo.git".to_string(),
        last_dispatch_at: null_time(),
        managed: false,
        created_at: null_time(),
    };

    assert_eq!(repo.name, "test-repo");
    assert!(!repo.managed);
}

#[test]
fn test_branch_model_holds_tip_hash() {
    let branch = branch::Model {
        id: Uuid::new_v4(),
        repository: Uuid::new_v4(),
        name: "main".to_string(),
        hash: vec![0xa1, 0xb2, 0xc3],
        tracked: true,
    };

    assert_eq!(branch.hash, vec![0xa1, 0xb2, 0xc3]);
    assert!(branch.tracked);
}

#[test]
fn test_known_commit_starts_required() {
    let commit = known_commit::Model {
        id: Uuid::new_v4(),
        repository: Uuid::new_v4(),
        hash: vec![0u8; 20],
        status: BenchmarkStatus::Required,
        tracked: true,
        created_at: null_time(),
        updated_at: null_time(),
    };

    assert_eq!(commit.status, BenchmarkStatus::Required);
    assert_eq!(commit.hash.len(), 20);
}

#[test]
fn test_task_commit_source_fields() {
    let repository = Uuid::new_v4();
    let task = task::Model {
        id: Uuid::new_v4(),
        author: "Listener".to_string(),
        priority: 0,
        repository: Some(repository),
        commit_hash: Some(vec![1, 2, 3]),
        tarball: None,
        created_at: null_time(),
        updated_at: null_time(),
    };

    assert_eq!(task.repository, Some(repository));
    assert!(task.tarball.is_none());
}

#[test]
fn test_task_tarball_source_fields() {
    let tarball = Uuid::new_v4();
    let task = task::Model {
        id: Uuid::new_v4(),
        author: "admin".to_string(),
        priority: 100,
        repository: None,
        commit_hash: None,
        tarball: Some(tarball),
        created_at: null_time(),
        updated_at: null_time(),
    };

    assert_eq!(task.tarball, Some(tarball));
    assert!(task.commit_hash.is_none());
}
