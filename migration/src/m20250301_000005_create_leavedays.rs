use sea_orm_migration::{prelude::*, schema::*, sea_orm::sea_query::extension::postgres::Type};

use super::m20250301_000001_create_users::User;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(StaffType::Enum)
                    .values([StaffType::Caretaker, StaffType::Doctor])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Leaveday::Table)
                    .if_not_exists()
                    .col(uuid(Leaveday::Id).primary_key())
                    .col(ColumnDef::new(Leaveday::StaffType).custom(StaffType::Enum).not_null())
                    .col(uuid(Leaveday::StaffId).not_null())
                    .col(date(Leaveday::Day).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_leaveday_staff")
                            .from(Leaveday::Table, Leaveday::StaffId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_leaveday_staff_day")
                    .table(Leaveday::Table)
                    .col(Leaveday::StaffType)
                    .col(Leaveday::StaffId)
                    .col(Leaveday::Day)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Leaveday::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(StaffType::Enum).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Leaveday {
    Table,
    Id,
    StaffType,
    StaffId,
    Day,
}

#[derive(DeriveIden)]
enum StaffType {
    #[sea_orm(iden = "staff_type")]
    Enum,
    #[sea_orm(iden = "caretaker")]
    Caretaker,
    #[sea_orm(iden = "doctor")]
    Doctor,
}
