use sea_orm_migration::prelude::*;

use crate::database::entity::tree_node::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250601_000006_create_tree_node_table"
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
                    .col(ColumnDef::new(Column::Space).string().not_null())
                    .col(ColumnDef::new(Column::ParentId).big_integer())
                    .col(ColumnDef::new(Column::Path).string().not_null())
                    .col(ColumnDef::new(Column::Name).string().not_null())
                    .col(ColumnDef::new(Column::NodeType).string_len(16).not_null())
                    .col(ColumnDef::new(Column::Format).string_len(16).not_null())
                    .col(ColumnDef::new(Column::VersionId).big_integer())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-tree-node-space-format-path")
                    .table(Entity)
                    .col(Column::Space)
                    .col(Column::Format)
                    .col(Column::Path)
                    .unique()
                    .to_owned(),
            )
            .await
    }
}
