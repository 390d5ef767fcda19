//! Database migrations.

pub use sea_orm_migration::*;

mod m20250601_000001_create_view_table;
mod m20250601_000002_create_package_table;
mod m20250601_000003_create_version_table;
mod m20250601_000004_create_blob_table;
mod m20250601_000005_create_asset_table;
mod m20250601_000006_create_tree_node_table;
mod m20250601_000007_create_setting_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250601_000001_create_view_table::Migration),
            Box::new(m20250601_000002_create_package_table::Migration),
            Box::new(m20250601_000003_create_version_table::Migration),
            Box::new(m20250601_000004_create_blob_table::Migration),
            Box::new(m20250601_000005_create_asset_table::Migration),
            Box::new(m20250601_000006_create_tree_node_table::Migration),
            Box::new(m20250601_000007_create_setting_table::Migration),
        ]
    }
}
