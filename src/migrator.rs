use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_units_table::Migration),
            Box::new(m20240101_000002_create_users_table::Migration),
            Box::new(m20240101_000003_create_item_types_table::Migration),
            Box::new(m20240101_000004_create_items_table::Migration),
            Box::new(m20240101_000005_create_movements_table::Migration),
            Box::new(m20240101_000006_create_transfers_table::Migration),
        ]
    }
}

mod m20240101_000001_create_units_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_units_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Units::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Units::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Units::Name).string().not_null())
                        .col(ColumnDef::new(Units::Code).string().null())
                        .col(ColumnDef::new(Units::Address).string().null())
                        .col(ColumnDef::new(Units::ParentId).uuid().null())
                        .col(
                            ColumnDef::new(Units::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Units::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_units_parent_id")
                                .from(Units::Table, Units::ParentId)
                                .to(Units::Table, Units::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            // Child lookups drive every hierarchy walk.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_units_parent_id")
                        .table(Units::Table)
                        .col(Units::ParentId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Units::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(crate) enum Units {
        Table,
        Id,
        Name,
        Code,
        Address,
        ParentId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_users_table {

    use super::m20240101_000001_create_units_table::Units;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_users_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Users::Registration)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Users::Name).string().not_null())
                        .col(ColumnDef::new(Users::Email).string().not_null().unique_key())
                        .col(ColumnDef::new(Users::PasswordHash).string().not_null())
                        .col(ColumnDef::new(Users::Role).string_len(16).not_null())
                        .col(ColumnDef::new(Users::UnitId).uuid().not_null())
                        .col(
                            ColumnDef::new(Users::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Users::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_users_unit_id")
                                .from(Users::Table, Users::UnitId)
                                .to(Units::Table, Units::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_users_unit_id")
                        .table(Users::Table)
                        .col(Users::UnitId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(crate) enum Users {
        Table,
        Id,
        Registration,
        Name,
        Email,
        PasswordHash,
        Role,
        UnitId,
        Active,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_item_types_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_item_types_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ItemTypes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ItemTypes::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ItemTypes::Name).string().not_null())
                        .col(
                            ColumnDef::new(ItemTypes::NormalizedName)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(ItemTypes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ItemTypes::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ItemTypes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(crate) enum ItemTypes {
        Table,
        Id,
        Name,
        NormalizedName,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_items_table {

    use super::m20240101_000001_create_units_table::Units;
    use super::m20240101_000003_create_item_types_table::ItemTypes;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Items::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Items::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Items::Code).string().not_null().unique_key())
                        .col(ColumnDef::new(Items::Description).text().not_null())
                        .col(ColumnDef::new(Items::TypeId).uuid().not_null())
                        .col(ColumnDef::new(Items::UnitId).uuid().not_null())
                        .col(
                            ColumnDef::new(Items::Status)
                                .string_len(16)
                                .not_null()
                                .default("AVAILABLE"),
                        )
                        .col(ColumnDef::new(Items::StatusNote).text().null())
                        .col(
                            ColumnDef::new(Items::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Items::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_items_unit_id")
                                .from(Items::Table, Items::UnitId)
                                .to(Units::Table, Units::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_items_type_id")
                                .from(Items::Table, Items::TypeId)
                                .to(ItemTypes::Table, ItemTypes::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_items_unit_status")
                        .table(Items::Table)
                        .col(Items::UnitId)
                        .col(Items::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_items_type_id")
                        .table(Items::Table)
                        .col(Items::TypeId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Items::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(crate) enum Items {
        Table,
        Id,
        Code,
        Description,
        TypeId,
        UnitId,
        Status,
        StatusNote,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000005_create_movements_table {

    use super::m20240101_000002_create_users_table::Users;
    use super::m20240101_000004_create_items_table::Items;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Movements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Movements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Movements::ItemId).uuid().not_null())
                        .col(ColumnDef::new(Movements::HolderId).uuid().not_null())
                        .col(ColumnDef::new(Movements::CheckoutBy).uuid().not_null())
                        .col(
                            ColumnDef::new(Movements::CheckoutAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Movements::CheckoutNote).text().null())
                        .col(ColumnDef::new(Movements::ReturnedBy).uuid().null())
                        .col(
                            ColumnDef::new(Movements::ReturnedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Movements::ReturnNote).text().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_movements_item_id")
                                .from(Movements::Table, Movements::ItemId)
                                .to(Items::Table, Items::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_movements_holder_id")
                                .from(Movements::Table, Movements::HolderId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_movements_checkout_by")
                                .from(Movements::Table, Movements::CheckoutBy)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_movements_returned_by")
                                .from(Movements::Table, Movements::ReturnedBy)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_movements_item_returned")
                        .table(Movements::Table)
                        .col(Movements::ItemId)
                        .col(Movements::ReturnedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_movements_holder_id")
                        .table(Movements::Table)
                        .col(Movements::HolderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Movements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Movements {
        Table,
        Id,
        ItemId,
        HolderId,
        CheckoutBy,
        CheckoutAt,
        CheckoutNote,
        ReturnedBy,
        ReturnedAt,
        ReturnNote,
    }
}

mod m20240101_000006_create_transfers_table {

    use super::m20240101_000001_create_units_table::Units;
    use super::m20240101_000002_create_users_table::Users;
    use super::m20240101_000004_create_items_table::Items;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_transfers_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Transfers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Transfers::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transfers::ItemId).uuid().not_null())
                        .col(ColumnDef::new(Transfers::OriginUnitId).uuid().not_null())
                        .col(
                            ColumnDef::new(Transfers::DestinationUnitId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transfers::TransferredBy).uuid().not_null())
                        .col(
                            ColumnDef::new(Transfers::TransferredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transfers::Note).text().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_transfers_item_id")
                                .from(Transfers::Table, Transfers::ItemId)
                                .to(Items::Table, Items::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_transfers_origin_unit_id")
                                .from(Transfers::Table, Transfers::OriginUnitId)
                                .to(Units::Table, Units::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_transfers_destination_unit_id")
                                .from(Transfers::Table, Transfers::DestinationUnitId)
                                .to(Units::Table, Units::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_transfers_transferred_by")
                                .from(Transfers::Table, Transfers::TransferredBy)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_transfers_item_id")
                        .table(Transfers::Table)
                        .col(Transfers::ItemId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Transfers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Transfers {
        Table,
        Id,
        ItemId,
        OriginUnitId,
        DestinationUnitId,
        TransferredBy,
        TransferredAt,
        Note,
    }
}
