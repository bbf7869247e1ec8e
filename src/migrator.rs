use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_asset_pools_table::Migration),
            Box::new(m20240301_000002_create_asset_instances_table::Migration),
            Box::new(m20240301_000003_create_asset_allocations_table::Migration),
            Box::new(m20240301_000004_create_asset_history_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240301_000001_create_asset_pools_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_asset_pools_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(AssetPools::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AssetPools::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(AssetPools::Code)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(AssetPools::Name).string().not_null())
                        .col(ColumnDef::new(AssetPools::AssetType).string_len(32).not_null())
                        .col(
                            ColumnDef::new(AssetPools::TotalQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(AssetPools::StockQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(AssetPools::AllocatedQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(AssetPools::UnitPrice)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(AssetPools::Ownership).string_len(32).not_null())
                        .col(ColumnDef::new(AssetPools::Status).string_len(32).not_null())
                        .col(ColumnDef::new(AssetPools::Location).string().null())
                        .col(ColumnDef::new(AssetPools::CurrentHolderId).big_integer().null())
                        .col(
                            ColumnDef::new(AssetPools::AllocationMode)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AssetPools::BedCapacity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(AssetPools::PhotoPath).string().null())
                        .col(ColumnDef::new(AssetPools::Notes).text().null())
                        .col(ColumnDef::new(AssetPools::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(AssetPools::UpdatedAt).timestamp().not_null())
                        .col(
                            ColumnDef::new(AssetPools::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_asset_pools_type_status")
                        .table(AssetPools::Table)
                        .col(AssetPools::AssetType)
                        .col(AssetPools::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AssetPools::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum AssetPools {
        Table,
        Id,
        Code,
        Name,
        AssetType,
        TotalQuantity,
        StockQuantity,
        AllocatedQuantity,
        UnitPrice,
        Ownership,
        Status,
        Location,
        CurrentHolderId,
        AllocationMode,
        BedCapacity,
        PhotoPath,
        Notes,
        CreatedAt,
        UpdatedAt,
        Version,
    }
}

mod m20240301_000002_create_asset_instances_table {

    use super::m20240301_000001_create_asset_pools_table::AssetPools;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_asset_instances_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(AssetInstances::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AssetInstances::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(AssetInstances::PoolId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AssetInstances::SerialNumber)
                                .string_len(128)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(AssetInstances::RoomId).big_integer().null())
                        .col(ColumnDef::new(AssetInstances::Location).string().null())
                        .col(ColumnDef::new(AssetInstances::HolderId).big_integer().null())
                        .col(
                            ColumnDef::new(AssetInstances::Condition)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AssetInstances::LastInspectedAt)
                                .timestamp()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(AssetInstances::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AssetInstances::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_asset_instances_pool")
                                .from(AssetInstances::Table, AssetInstances::PoolId)
                                .to(AssetPools::Table, AssetPools::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_asset_instances_pool_id")
                        .table(AssetInstances::Table)
                        .col(AssetInstances::PoolId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_asset_instances_room_id")
                        .table(AssetInstances::Table)
                        .col(AssetInstances::RoomId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AssetInstances::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum AssetInstances {
        Table,
        Id,
        PoolId,
        SerialNumber,
        RoomId,
        Location,
        HolderId,
        Condition,
        LastInspectedAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_asset_allocations_table {

    use super::m20240301_000001_create_asset_pools_table::AssetPools;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_asset_allocations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(AssetAllocations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AssetAllocations::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(AssetAllocations::PoolId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AssetAllocations::HolderId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AssetAllocations::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AssetAllocations::IssuedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AssetAllocations::ReturnedAt)
                                .timestamp()
                                .null(),
                        )
                        .col(ColumnDef::new(AssetAllocations::Note).text().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_asset_allocations_pool")
                                .from(AssetAllocations::Table, AssetAllocations::PoolId)
                                .to(AssetPools::Table, AssetPools::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Open-record lookups by (pool, holder)
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_asset_allocations_pool_holder")
                        .table(AssetAllocations::Table)
                        .col(AssetAllocations::PoolId)
                        .col(AssetAllocations::HolderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AssetAllocations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum AssetAllocations {
        Table,
        Id,
        PoolId,
        HolderId,
        Quantity,
        IssuedAt,
        ReturnedAt,
        Note,
    }
}

mod m20240301_000004_create_asset_history_table {

    use super::m20240301_000001_create_asset_pools_table::AssetPools;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_asset_history_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(AssetHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AssetHistory::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(AssetHistory::PoolId).big_integer().not_null())
                        .col(ColumnDef::new(AssetHistory::InstanceId).big_integer().null())
                        .col(ColumnDef::new(AssetHistory::Action).string_len(32).not_null())
                        .col(ColumnDef::new(AssetHistory::HolderId).big_integer().null())
                        .col(ColumnDef::new(AssetHistory::OperatorId).big_integer().null())
                        .col(
                            ColumnDef::new(AssetHistory::QuantityDelta)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(AssetHistory::Note).text().null())
                        .col(ColumnDef::new(AssetHistory::CreatedAt).timestamp().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_asset_history_pool")
                                .from(AssetHistory::Table, AssetHistory::PoolId)
                                .to(AssetPools::Table, AssetPools::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_asset_history_pool_created")
                        .table(AssetHistory::Table)
                        .col(AssetHistory::PoolId)
                        .col(AssetHistory::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AssetHistory::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum AssetHistory {
        Table,
        Id,
        PoolId,
        InstanceId,
        Action,
        HolderId,
        OperatorId,
        QuantityDelta,
        Note,
        CreatedAt,
    }
}

/// Standalone migration runner used by the `migrate` sub-command
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(1)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
