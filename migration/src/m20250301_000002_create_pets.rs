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
                    .as_enum(PetSex::Enum)
                    .values([PetSex::Male, PetSex::Female, PetSex::Unknown])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Pet::Table)
                    .if_not_exists()
                    .col(uuid(Pet::Id).primary_key())
                    .col(uuid(Pet::OwnerId).not_null())
                    .col(string_len(Pet::Kind, 50).not_null())
                    .col(string_len_null(Pet::Breed, 100))
                    .col(string_len_null(Pet::Name, 100))
                    .col(date(Pet::BirthDate).not_null())
                    .col(decimal_len(Pet::Weight, 6, 2).not_null())
                    .col(ColumnDef::new(Pet::Sex).custom(PetSex::Enum).not_null())
                    .col(
                        timestamp_with_time_zone(Pet::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pet_owner")
                            .from(Pet::Table, Pet::OwnerId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Pet::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(PetSex::Enum).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Pet {
    Table,
    Id,
    OwnerId,
    Kind,
    Breed,
    Name,
    BirthDate,
    Weight,
    Sex,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum PetSex {
    #[sea_orm(iden = "pet_sex")]
    Enum,
    #[sea_orm(iden = "male")]
    Male,
    #[sea_orm(iden = "female")]
    Female,
    #[sea_orm(iden = "unknown")]
    Unknown,
}
