/*
 * SPDX-FileCopyrightText: 2025 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod archiver;


use archiver::ArchiveBuilder;
use core::types::ServerState;
use std::sync::Arc;

/// Creates the archive builder and spawns the listener that drops caches
/// when a repository is deleted, its remote changes, or the benchmark
/// repository moves to a new head.
pub fn start_archiver(state: Arc<ServerState>) -> Arc<ArchiveBuilder> {
    let builder = Arc::new(ArchiveBuilder::new(Arc::clone(&state)));

    tokio::spawn(archiver::invalidation_loop(
        Arc::clone(&state),
        Arc::clone(&builder),
    ));

    builder
}
