/*
 * SPDX-FileCopyrightText: 2025 Wavelens UG <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use chrono::{DateTime, NaiveDateTime};
use std::sync::LazyLock;

pub static NULL_TIME: LazyLock<NaiveDateTime> =
    LazyLock::new(|| DateTime::from_timestamp(0, 0).unwrap().naive_utc());

/// Author recorded on tasks enqueued by the synchronization loop.
pub const LISTENER_AUTHOR: &str = "Listener";

pub const REPOS_DIR: &str = "repos";
pub const BENCHMARK_REPO_DIR: &str = "benchmarks";
pub const CHECKOUTS_DIR: &str = "checkouts";
pub const ARCHIVES_DIR: &str = "archives";
pub const TARBALLS_DIR: &str = "tarballs";

pub const TASK_PRIORITY_DEFAULT: i32 = 0;
pub const TASK_PRIORITY_MANUAL: i32 = 100;
