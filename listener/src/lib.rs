/*
 * SPDX-FileCopyrightText: 2025 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod discovery;
pub mod scheduler;
pub mod synchronizer;

#[cfg(test)]
mod tests;

use core::types::ServerState;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub fn start_listener(state: Arc<ServerState>) -> JoinHandle<()> {
    tokio::spawn(scheduler::listen_loop(Arc::clone(&state)))
}
