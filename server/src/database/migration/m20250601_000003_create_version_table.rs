use sea_orm_migration::prelude::*;

use crate::database::entity::package;
use crate::database::entity::version::*;
use crate::database::entity::view;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250601_000003_create_version_table"
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
                    .col(ColumnDef::new(Column::PackageId).big_integer().not_null())
                    .col(ColumnDef::new(Column::ViewId).big_integer().not_null())
                    .col(ColumnDef::new(Column::Version).string().not_null())
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
                            .name("fk_version_package")
                            .from_tbl(Entity)
                            .from_col(Column::PackageId)
                            .to_tbl(package::Entity)
                            .to_col(package::Column::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKeyCreateStatement::new()
                            .name("fk_version_view")
                            .from_tbl(Entity)
                            .from_col(Column::ViewId)
                            .to_tbl(view::Entity)
                            .to_col(view::Column::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-version-coordinates")
                    .table(Entity)
                    .col(Column::PackageId)
                    .col(Column::ViewId)
                    .col(Column::Version)
                    .unique()
                    .to_owned(),
            )
            .await
    }
}
