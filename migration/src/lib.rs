/*
 * SPDX-FileCopyrightText: 2025 Wavelens UG <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub use sea_orm_migration::prelude::*;

mod m20250310_110000_create_table_repository;
mod m20250310_110010_create_table_branch;
mod m20250310_110020_create_table_known_commit;
mod m20250310_110030_create_table_task;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250310_110000_create_table_repository::Migration),
            Box::new(m20250310_110010_create_table_branch::Migration),
            Box::new(m20250310_110020_create_table_known_commit::Migration),
            Box::new(m20250310_110030_create_table_task::Migration),
        ]
    }
}
