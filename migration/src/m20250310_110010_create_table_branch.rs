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
                    .table(Branch::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Branch::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Branch::Repository).uuid().not_null())
                    .col(ColumnDef::new(Branch::Name).string().not_null())
                    .col(ColumnDef::new(Branch::Hash).blob().not_null())
                    .col(ColumnDef::new(Branch::Tracked).boolean().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-branch-repository")
                            .from(Branch::Table, Branch::Repository)
                            .to(Repository::Table, Repository::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .index(
                        Index::create()
                            .name("idx-branch-repository-name")
                            .col(Branch::Repository)
                            .col(Branch::Name)
                            .unique(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Branch::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Branch {
    Table,
    Id,
    Repository,
    Name,
    Hash,
    Tracked,
}

#[derive(DeriveIden)]
enum Repository {
    Table,
    Id,
}
