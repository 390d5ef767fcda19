use sea_orm_migration::prelude::*;

use crate::database::entity::asset::*;
use crate::database::entity::blob;
use crate::database::entity::version;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250601_000005_create_asset_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Entity)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Column::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Column::VersionId).big_integer())
                    .col(ColumnDef::new(Column::ViewId).big_integer())
                    .col(ColumnDef::new(Column::Path).string().not_null())
                    .col(ColumnDef::new(Column::Format).string_len(16).not_null())
                    .col(ColumnDef::new(Column::Kind).string_len(4).not_null())
                    .col(ColumnDef::new(Column::ContentType).string().not_null())
                    .col(ColumnDef::new(Column::BlobId).big_integer().not_null())
                    .col(ColumnDef::new(Column::CheckSum).string().not_null())
                    .col(ColumnDef::new(Column::Metadata).string().not_null())
                    .col(
                        ColumnDef::new(Column::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Column::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Column::DeletedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKeyCreateStatement::new()
                            .name("fk_asset_version")
                            .from_tbl(Entity)
                            .from_col(Column::VersionId)
                            .to_tbl(version::Entity)
                            .to_col(version::Column::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKeyCreateStatement::new()
                            .name("fk_asset_blob")
                            .from_tbl(Entity)
                            .from_col(Column::BlobId)
                            .to_tbl(blob::Entity)
                            .to_col(blob::Column::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-asset-version-path")
                    .table(Entity)
                    .col(Column::VersionId)
                    .col(Column::Path)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-asset-path-format")
                    .table(Entity)
                    .col(Column::Path)
                    .col(Column::Format)
                    .to_owned(),
            )
            .await
    }
}
