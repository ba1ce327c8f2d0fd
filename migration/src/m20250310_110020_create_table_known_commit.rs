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
                    .table(KnownCommit::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(KnownCommit::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(KnownCommit::Repository).uuid().not_null())
                    .col(ColumnDef::new(KnownCommit::Hash).blob().not_null())
                    .col(ColumnDef::new(KnownCommit::Status).integer().not_null())
                    .col(ColumnDef::new(KnownCommit::Tracked).boolean().not_null())
                    .col(
                        ColumnDef::new(KnownCommit::CreatedAt)
                            .date_time()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(KnownCommit::UpdatedAt)
                            .date_time()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-known_commit-repository")
                            .from(KnownCommit::Table, KnownCommit::Repository)
                            .to(Repository::Table, Repository::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .index(
                        Index::create()
                            .name("idx-known_commit-repository-hash")
                            .col(KnownCommit::Repository)
                            .col(KnownCommit::Hash)
                            .unique(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(KnownCommit::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum KnownCommit {
    Table,
    Id,
    Repository,
    Hash,
    Status,
    Tracked,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Repository {
    Table,
    Id,
}
