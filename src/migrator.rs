use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_memorials_table::Migration),
            Box::new(m20240301_000002_create_contributions_table::Migration),
            Box::new(m20240301_000003_create_contribution_likes_table::Migration),
            Box::new(m20240301_000004_create_memorial_flags_table::Migration),
            Box::new(m20240301_000005_create_price_entries_table::Migration),
            Box::new(m20240301_000006_create_memorial_transactions_table::Migration),
            Box::new(m20240301_000007_create_notifications_table::Migration),
        ]
    }
}

mod m20240301_000001_create_memorials_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_memorials_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Memorials::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Memorials::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Memorials::OwnerId).uuid().not_null())
                        .col(
                            ColumnDef::new(Memorials::DefaultSlug)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Memorials::PremiumSlug)
                                .string()
                                .null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Memorials::Name).string().not_null())
                        .col(ColumnDef::new(Memorials::Status).string_len(20).not_null())
                        .col(
                            ColumnDef::new(Memorials::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_memorials_owner_id")
                        .table(Memorials::Table)
                        .col(Memorials::OwnerId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Memorials::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(crate) enum Memorials {
        Table,
        Id,
        OwnerId,
        DefaultSlug,
        PremiumSlug,
        Name,
        Status,
        CreatedAt,
    }
}

mod m20240301_000002_create_contributions_table {

    use super::m20240301_000001_create_memorials_table::Memorials;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_contributions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Contributions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Contributions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Contributions::Kind).string_len(20).not_null())
                        .col(ColumnDef::new(Contributions::MemorialId).uuid().not_null())
                        .col(ColumnDef::new(Contributions::OwnerId).uuid().not_null())
                        .col(
                            ColumnDef::new(Contributions::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Contributions::PayableOption).string().null())
                        .col(
                            ColumnDef::new(Contributions::DonationCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Contributions::ItemCount).integer().null())
                        .col(ColumnDef::new(Contributions::ValueMinor).big_integer().null())
                        .col(ColumnDef::new(Contributions::Content).text().null())
                        .col(ColumnDef::new(Contributions::ContributionDate).date().null())
                        .col(ColumnDef::new(Contributions::AssetPath).string().null())
                        .col(ColumnDef::new(Contributions::AssetType).string_len(20).null())
                        .col(
                            ColumnDef::new(Contributions::CheckoutSessionId)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Contributions::CheckoutSessionCreatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Contributions::LikeCount)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Contributions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Contributions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_contributions_memorial")
                                .from(Contributions::Table, Contributions::MemorialId)
                                .to(Memorials::Table, Memorials::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Keyset indexes for both feed orderings
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_contributions_feed_date")
                        .table(Contributions::Table)
                        .col(Contributions::MemorialId)
                        .col(Contributions::Kind)
                        .col(Contributions::Status)
                        .col(Contributions::CreatedAt)
                        .col(Contributions::Id)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_contributions_feed_likes")
                        .table(Contributions::Table)
                        .col(Contributions::MemorialId)
                        .col(Contributions::Kind)
                        .col(Contributions::Status)
                        .col(Contributions::LikeCount)
                        .col(Contributions::Id)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_contributions_owner_id")
                        .table(Contributions::Table)
                        .col(Contributions::OwnerId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Contributions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(crate) enum Contributions {
        Table,
        Id,
        Kind,
        MemorialId,
        OwnerId,
        Status,
        PayableOption,
        DonationCount,
        ItemCount,
        ValueMinor,
        Content,
        ContributionDate,
        AssetPath,
        AssetType,
        CheckoutSessionId,
        CheckoutSessionCreatedAt,
        LikeCount,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_contribution_likes_table {

    use super::m20240301_000002_create_contributions_table::Contributions;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_contribution_likes_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ContributionLikes::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(ContributionLikes::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(ContributionLikes::ContributionId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ContributionLikes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .col(ContributionLikes::UserId)
                                .col(ContributionLikes::ContributionId),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_contribution_likes_contribution")
                                .from(ContributionLikes::Table, ContributionLikes::ContributionId)
                                .to(Contributions::Table, Contributions::Id)
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
                        .name("idx_contribution_likes_contribution_id")
                        .table(ContributionLikes::Table)
                        .col(ContributionLikes::ContributionId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ContributionLikes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ContributionLikes {
        Table,
        UserId,
        ContributionId,
        CreatedAt,
    }
}

mod m20240301_000004_create_memorial_flags_table {

    use super::m20240301_000001_create_memorials_table::Memorials;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_memorial_flags_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(MemorialFlags::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MemorialFlags::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(MemorialFlags::MemorialId).uuid().not_null())
                        .col(
                            ColumnDef::new(MemorialFlags::FlagType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(MemorialFlags::ReferenceId).uuid().not_null())
                        .col(ColumnDef::new(MemorialFlags::ActorId).uuid().not_null())
                        .col(ColumnDef::new(MemorialFlags::UserId).uuid().null())
                        .col(
                            ColumnDef::new(MemorialFlags::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(MemorialFlags::Reason).string_len(32).null())
                        .col(
                            ColumnDef::new(MemorialFlags::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MemorialFlags::StatusUpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_memorial_flags_memorial")
                                .from(MemorialFlags::Table, MemorialFlags::MemorialId)
                                .to(Memorials::Table, Memorials::Id)
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
                        .name("idx_memorial_flags_reference_id")
                        .table(MemorialFlags::Table)
                        .col(MemorialFlags::ReferenceId)
                        .to_owned(),
                )
                .await?;

            // At most one open flag per (memorial, actor, type, reference).
            // Partial indexes are understood by both SQLite and Postgres.
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uq_memorial_flags_open \
                     ON memorial_flags (memorial_id, actor_id, flag_type, reference_id) \
                     WHERE status = 'open'",
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(MemorialFlags::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum MemorialFlags {
        Table,
        Id,
        MemorialId,
        FlagType,
        ReferenceId,
        ActorId,
        UserId,
        Status,
        Reason,
        CreatedAt,
        StatusUpdatedAt,
    }
}

mod m20240301_000005_create_price_entries_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_price_entries_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PriceEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PriceEntries::OptionKey)
                                .string_len(64)
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PriceEntries::PriceMinor).big_integer().null())
                        .col(
                            ColumnDef::new(PriceEntries::IsFree)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(PriceEntries::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PriceEntries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PriceEntries {
        Table,
        OptionKey,
        PriceMinor,
        IsFree,
        UpdatedAt,
    }
}

mod m20240301_000006_create_memorial_transactions_table {

    use super::m20240301_000001_create_memorials_table::Memorials;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000006_create_memorial_transactions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(MemorialTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MemorialTransactions::PaymentId)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MemorialTransactions::MemorialId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(MemorialTransactions::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(MemorialTransactions::ContributionId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MemorialTransactions::Kind)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MemorialTransactions::ValueMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MemorialTransactions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_memorial_transactions_memorial")
                                .from(MemorialTransactions::Table, MemorialTransactions::MemorialId)
                                .to(Memorials::Table, Memorials::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(MemorialTransactions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum MemorialTransactions {
        Table,
        PaymentId,
        MemorialId,
        UserId,
        ContributionId,
        Kind,
        ValueMinor,
        CreatedAt,
    }
}

mod m20240301_000007_create_notifications_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000007_create_notifications_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Notifications::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Notifications::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Notifications::UserId).uuid().not_null())
                        .col(ColumnDef::new(Notifications::ActorId).uuid().not_null())
                        .col(ColumnDef::new(Notifications::ReferenceId).uuid().not_null())
                        .col(ColumnDef::new(Notifications::Kind).string_len(32).not_null())
                        .col(ColumnDef::new(Notifications::RedirectUrl).string().null())
                        .col(
                            ColumnDef::new(Notifications::IsRead)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Notifications::ReadAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Notifications::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_notifications_user_created")
                        .table(Notifications::Table)
                        .col(Notifications::UserId)
                        .col(Notifications::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Notifications::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Notifications {
        Table,
        Id,
        UserId,
        ActorId,
        ReferenceId,
        Kind,
        RedirectUrl,
        IsRead,
        ReadAt,
        CreatedAt,
    }
}
