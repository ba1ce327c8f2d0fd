/*
 * SPDX-FileCopyrightText: 2025 Wavelens UG <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Repository::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Repository::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Repository::Name)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Repository::DisplayName).string().not_null())
                    .col(ColumnDef::new(Repository::RemoteUrl).string().not_null())
                    .col(
                        ColumnDef::new(Repository::LastDispatchAt)
                            .date_time()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Repository::Managed).boolean().not_null())
                    .col(ColumnDef::new(Repository::CreatedAt).date_time().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Repository::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Repository {
    Table,
    Id,
    Name,
    DisplayName,
    RemoteUrl,
    LastDispatchAt,
    Managed,
    CreatedAt,
}
