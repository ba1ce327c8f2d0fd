/*
 * SPDX-FileCopyrightText: 2025 Wavelens UG <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod consts;
pub mod database;
pub mod input;
pub mod queue;
pub mod sources;
pub mod state;
pub mod types;

use anyhow::Result;
use clap::Parser;
use database::connect_db;
use queue::TaskQueue;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use types::*;

pub async fn init_state() -> Result<Arc<ServerState>> {
    let cli = Cli::parse();

    tracing::info!("Starting Paceline server");

    let db = connect_db(&cli).await?;
    let queue = TaskQueue::new(db.clone());
    let (repo_events, _) = broadcast::channel(64);

    let state = Arc::new(ServerState {
        db,
        cli,
        queue,
        sync_lock: Mutex::new(()),
        benchmark_repo_lock: Mutex::new(()),
        repo_events,
    });

    state::load_and_apply_state(Arc::clone(&state)).await?;

    Ok(state)
}
