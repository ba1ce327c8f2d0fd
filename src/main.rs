/*
 * SPDX-FileCopyrightText: 2025 Wavelens UG <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Context;
use core::init_state;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("PACELINE_LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let state = init_state().await?;

    let _guard = if state.cli.report_errors {
        state.cli.sentry_dsn.as_deref().map(sentry::init)
    } else {
        None
    };

    let _archiver = archive::start_archiver(Arc::clone(&state));
    let listener = listener::start_listener(Arc::clone(&state));

    listener
        .await
        .context("Repository synchronization loop terminated")?;

    Ok(())
}
