use sea_orm_migration::{prelude::*, schema::*, sea_orm::sea_query::extension::postgres::Type};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(UserRole::Enum)
                    .values([
                        UserRole::Owner,
                        UserRole::Caretaker,
                        UserRole::Doctor,
                        UserRole::Admin,
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(User::Table)
                    .if_not_exists()
                    .col(uuid(User::Id).primary_key())
                    .col(string_len(User::Email, 255).not_null())
                    .col(string_len(User::PasswordHash, 255).not_null())
                    .col(ColumnDef::new(User::Role).custom(UserRole::Enum).not_null())
                    .col(string_len(User::Name, 100).not_null())
                    .col(date(User::BirthDate).not_null())
                    .col(string_len(User::Telephone, 32).not_null())
                    .col(text(User::Address).not_null())
                    .col(text_null(User::ProfileImageUrl))
                    .col(
                        timestamp_with_time_zone(User::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(User::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_user_email_role")
                    .table(User::Table)
                    .col(User::Email)
                    .col(User::Role)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Owner::Table)
                    .if_not_exists()
                    .col(uuid(Owner::UserId).primary_key())
                    .col(
                        decimal_len(Owner::TotalSpending, 12, 2)
                            .not_null()
                            .default(0),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_owner_user")
                            .from(Owner::Table, Owner::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Caretaker::Table)
                    .if_not_exists()
                    .col(uuid(Caretaker::UserId).primary_key())
                    .col(string_len(Caretaker::Specialization, 100).not_null())
                    .col(time(Caretaker::StartWorkTime).not_null())
                    .col(time(Caretaker::EndWorkTime).not_null())
                    .col(decimal_len(Caretaker::Rating, 3, 2).not_null().default(0))
                    .col(
                        timestamp_with_time_zone(Caretaker::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_caretaker_user")
                            .from(Caretaker::Table, Caretaker::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Doctor::Table)
                    .if_not_exists()
                    .col(uuid(Doctor::UserId).primary_key())
                    .col(string_len(Doctor::LicenseNumber, 64).not_null().unique_key())
                    .col(date(Doctor::StartDate).not_null())
                    .col(time(Doctor::StartWorkTime).not_null())
                    .col(time(Doctor::EndWorkTime).not_null())
                    .col(
                        timestamp_with_time_zone(Doctor::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_doctor_user")
                            .from(Doctor::Table, Doctor::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Admin::Table)
                    .if_not_exists()
                    .col(uuid(Admin::UserId).primary_key())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_admin_user")
                            .from(Admin::Table, Admin::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Admin::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Doctor::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Caretaker::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Owner::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(User::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(UserRole::Enum).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum User {
    Table,
    Id,
    Email,
    PasswordHash,
    Role,
    Name,
    BirthDate,
    Telephone,
    Address,
    ProfileImageUrl,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum UserRole {
    #[sea_orm(iden = "user_role")]
    Enum,
    #[sea_orm(iden = "owner")]
    Owner,
    #[sea_orm(iden = "caretaker")]
    Caretaker,
    #[sea_orm(iden = "doctor")]
    Doctor,
    #[sea_orm(iden = "admin")]
    Admin,
}

#[derive(DeriveIden)]
pub enum Owner {
    Table,
    UserId,
    TotalSpending,
}

#[derive(DeriveIden)]
pub enum Caretaker {
    Table,
    UserId,
    Specialization,
    StartWorkTime,
    EndWorkTime,
    Rating,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum Doctor {
    Table,
    UserId,
    LicenseNumber,
    StartDate,
    StartWorkTime,
    EndWorkTime,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Admin {
    Table,
    UserId,
}
