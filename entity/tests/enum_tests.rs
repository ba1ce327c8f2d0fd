/*
 * SPDX-FileCopyrightText: 2025 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Tests for entity enums

use entity::known_commit::BenchmarkStatus;
use sea_orm::ActiveEnum;

#[test]
fn test_benchmark_status_values() {
    assert_eq!(BenchmarkStatus::Required.to_value(), 0);
    assert_eq!(BenchmarkStatus::RequiredManualPriority.to_value(), 1);
    assert_eq!(BenchmarkStatus::InProgress.to_value(), 2);
    assert_eq!(BenchmarkStatus::Benchmarked.to_value(), 3);
}

#[test]
fn test_benchmark_status_distinct() {
    let statuses = [
        BenchmarkStatus::Required,
        BenchmarkStatus::RequiredManualPriority,
        BenchmarkStatus::InProgress,
        BenchmarkStatus::Benchmarked,
    ];

    for (i, a) in statuses.iter().enumerate() {
        for b in statuses.iter().skip(i + 1) {
            assert_ne!(a, b);
        }
    }
}

#[test]
fn test_benchmark_status_serde_roundtrip() {
    let status = BenchmarkStatus::RequiredManualPriority;
    let json = serde_json::to_string(&status).unwrap();
    let parsed: BenchmarkStatus = serde_json::from_str(&json).unwrap();
    assert_eq!(status, parsed);
}
