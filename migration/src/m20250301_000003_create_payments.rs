use sea_orm_migration::{prelude::*, schema::*, sea_orm::sea_query::extension::postgres::Type};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(PaymentStatus::Enum)
                    .values([
                        PaymentStatus::Unpaid,
                        PaymentStatus::Pending,
                        PaymentStatus::Paid,
                        PaymentStatus::Failed,
                        PaymentStatus::Refunded,
                    ])
                    .to_owned(),
            )
            .await?;

        // owner_id has no foreign key: payments outlive their owner
        manager
            .create_table(
                Table::create()
                    .table(Payment::Table)
                    .if_not_exists()
                    .col(uuid(Payment::Id).primary_key())
                    .col(uuid(Payment::OwnerId).not_null())
                    .col(
                        ColumnDef::new(Payment::Status)
                            .custom(PaymentStatus::Enum)
                            .not_null(),
                    )
                    .col(string_len_null(Payment::Type, 32))
                    .col(timestamp_with_time_zone_null(Payment::PayDate))
                    .col(json_binary(Payment::Metadata).not_null())
                    .col(
                        timestamp_with_time_zone(Payment::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Payment::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_payment_owner_created")
                    .table(Payment::Table)
                    .col(Payment::OwnerId)
                    .col(Payment::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Payment::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(PaymentStatus::Enum).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Payment {
    Table,
    Id,
    OwnerId,
    Status,
    Type,
    PayDate,
    Metadata,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum PaymentStatus {
    #[sea_orm(iden = "payment_status")]
    Enum,
    #[sea_orm(iden = "unpaid")]
    Unpaid,
    #[sea_orm(iden = "pending")]
    Pending,
    #[sea_orm(iden = "paid")]
    Paid,
    #[sea_orm(iden = "failed")]
    Failed,
    #[sea_orm(iden = "refunded")]
    Refunded,
}
