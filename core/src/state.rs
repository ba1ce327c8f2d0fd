/*
 * SPDX-FileCopyrightText: 2025 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use uuid::Uuid;

use super::consts::NULL_TIME;
use super::input::{check_index_name, check_repository_url};
use super::types::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRepository {
    pub name: String,
    pub display_name: String,
    pub remote_url: String,
    #[serde(default = "default_tracked_branches")]
    pub tracked_branches: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfiguration {
    #[serde(default)]
    pub repositories: Vec<StateRepository>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Validation error in field '{field}': {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub is_valid: bool,
}

fn default_tracked_branches() -> Vec<String> {
    vec!["main".to_string()]
}

impl StateConfiguration {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read state file")?;
        let config: StateConfiguration =
            serde_json::from_str(&content).context("Failed to parse state file")?;
        Ok(config)
    }

    pub fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();
        let mut seen_names = HashSet::new();

        for repository in &self.repositories {
            if !seen_names.insert(&repository.name) {
                errors.push(ValidationError {
                    field: format!("repositories.{}.name", repository.name),
                    message: "Duplicate repository name found".to_string(),
                });
            }

            if let Err(e) = check_index_name(&repository.name) {
                errors.push(ValidationError {
                    field: format!("repositories.{}.name", repository.name),
                    message: e,
                });
            }

            if let Err(e) = check_repository_url(&repository.remote_url) {
                errors.push(ValidationError {
                    field: format!("repositories.{}.remote_url", repository.name),
                    message: e,
                });
            }

            let mut seen_branches = HashSet::new();
            for branch in &repository.tracked_branches {
                if branch.trim().is_empty() {
                    errors.push(ValidationError {
                        field: format!("repositories.{}.tracked_branches", repository.name),
                        message: "Branch name cannot be empty".to_string(),
                    });
                }

                if !seen_branches.insert(branch) {
                    errors.push(ValidationError {
                        field: format!("repositories.{}.tracked_branches", repository.name),
                        message: format!("Duplicate branch name: {}", branch),
                    });
                }
            }
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

pub async fn load_and_apply_state(state: Arc<ServerState>) -> Result<()> {
    let Some(path) = state.cli.state_file.clone() else {
        tracing::info!("No state file configured, skipping state management");
        return Ok(());
    };

    tracing::info!("Loading state configuration from: {}", path);

    let config = StateConfiguration::from_file(&path)?;

    let validation = config.validate();
    if !validation.is_valid {
        let error_messages: Vec<String> = validation
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();

        anyhow::bail!(
            "State configuration validation failed:\n{}",
            error_messages.join("\n")
        );
    }

    apply_repositories(Arc::clone(&state), &config.repositories).await?;
    remove_unlisted_repositories(state, &config.repositories).await?;

    tracing::info!("State applied successfully");
    Ok(())
}

async fn apply_repositories(
    state: Arc<ServerState>,
    repositories: &[StateRepository],
) -> Result<()> {
    let existing = ERepository::find()
        .all(&state.db)
        .await
        .context("Failed to query repositories")?
        .into_iter()
        .map(|r| (r.name.clone(), r))
        .collect::<HashMap<String, MRepository>>();

    for state_repository in repositories {
        let now = Utc::now().naive_utc();

        let repository_id = if let Some(existing) = existing.get(&state_repository.name) {
            let repository_id = existing.id;
            let mut repository: ARepository = existing.clone().into();
            repository.display_name = Set(state_repository.display_name.clone());
            repository.remote_url = Set(state_repository.remote_url.clone());
            repository.managed = Set(true);
            repository
                .update(&state.db)
                .await
                .context("Failed to update repository")?;
            tracing::info!("Updated managed repository: {}", state_repository.name);
            repository_id
        } else {
            let repository_id = Uuid::new_v4();
            let repository = ARepository {
                id: Set(repository_id),
                name: Set(state_repository.name.clone()),
                display_name: Set(state_repository.display_name.clone()),
                remote_url: Set(state_repository.remote_url.clone()),
                last_dispatch_at: Set(*NULL_TIME),
                managed: Set(true),
                created_at: Set(now),
            };
            repository
                .insert(&state.db)
                .await
                .context("Failed to insert repository")?;
            tracing::info!("Created managed repository: {}", state_repository.name);
            repository_id
        };

        seed_tracked_branches(
            Arc::clone(&state),
            repository_id,
            &state_repository.tracked_branches,
        )
        .await?;
    }

    Ok(())
}

// Branch rows are otherwise created by the synchronization loop, which
// preserves the tracked flag of rows that already exist. Seeding a tracked
// row here is what makes a branch benchmarked from its first sync on.
async fn seed_tracked_branches(
    state: Arc<ServerState>,
    repository: Uuid,
    branches: &[String],
) -> Result<()> {
    for branch_name in branches {
        let existing = EBranch::find()
            .filter(CBranch::Repository.eq(repository))
            .filter(CBranch::Name.eq(branch_name))
            .one(&state.db)
            .await
            .context("Failed to query branch")?;

        if let Some(branch) = existing {
            if !branch.tracked {
                let mut abranch: ABranch = branch.into();
                abranch.tracked = Set(true);
                abranch
                    .update(&state.db)
                    .await
                    .context("Failed to update branch")?;
            }
        } else {
            let abranch = ABranch {
                id: Set(Uuid::new_v4()),
                repository: Set(repository),
                name: Set(branch_name.clone()),
                hash: Set(vec![]),
                tracked: Set(true),
            };
            abranch
                .insert(&state.db)
                .await
                .context("Failed to insert branch")?;
        }
    }

    Ok(())
}

async fn remove_unlisted_repositories(
    state: Arc<ServerState>,
    repositories: &[StateRepository],
) -> Result<()> {
    let state_names: HashSet<&String> = repositories.iter().map(|r| &r.name).collect();

    let managed = ERepository::find()
        .filter(CRepository::Managed.eq(true))
        .all(&state.db)
        .await
        .context("Failed to query managed repositories")?;

    for repository in managed {
        if state_names.contains(&repository.name) {
            continue;
        }

        let name = repository.name.clone();
        if state.cli.delete_state {
            state
                .queue
                .delete_all_for_repository(repository.id)
                .await
                .context("Failed to clear queue for deleted repository")?;

            ERepository::delete_by_id(repository.id)
                .exec(&state.db)
                .await
                .context("Failed to delete repository")?;

            let _ = state.repo_events.send(RepositoryEvent::Deleted(repository.id));
            tracing::info!("Deleted repository: {}", name);
        } else {
            let mut arepository: ARepository = repository.into();
            arepository.managed = Set(false);
            arepository
                .update(&state.db)
                .await
                .context("Failed to unmanage repository")?;
            tracing::info!("Unmanaged repository: {}", name);
        }
    }

    Ok(())
}
