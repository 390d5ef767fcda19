use sea_orm_migration::prelude::*;

use crate::database::entity::blob::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250601_000004_create_blob_table"
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
                    .col(ColumnDef::new(Column::StorageId).string_len(64).not_null())
                    .col(ColumnDef::new(Column::BlobRef).string_len(64).not_null())
                    .col(ColumnDef::new(Column::Size).big_integer().not_null())
                    .col(ColumnDef::new(Column::Metadata).string().not_null())
                    .col(ColumnDef::new(Column::Creator).string().not_null())
                    .col(ColumnDef::new(Column::Version).integer().not_null())
                    .col(
                        ColumnDef::new(Column::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Column::DeletedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-blob-storage-ref")
                    .table(Entity)
                    .col(Column::StorageId)
                    .col(Column::BlobRef)
                    .unique()
                    .to_owned(),
            )
            .await
    }
}
