use sea_orm_migration::{prelude::*, schema::*, sea_orm::sea_query::extension::postgres::Type};

use super::m20250301_000001_create_users::{Caretaker, Doctor, User};
use super::m20250301_000002_create_pets::Pet;
use super::m20250301_000003_create_payments::Payment;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(ServiceStatus::Enum)
                    .values([
                        ServiceStatus::Wait,
                        ServiceStatus::Ongoing,
                        ServiceStatus::Finish,
                        ServiceStatus::Cancelled,
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Service::Table)
                    .if_not_exists()
                    .col(uuid(Service::Id).primary_key())
                    .col(uuid(Service::OwnerId).not_null())
                    .col(uuid(Service::PetId).not_null())
                    .col(uuid(Service::PaymentId).not_null().unique_key())
                    .col(integer(Service::Price).not_null())
                    .col(
                        ColumnDef::new(Service::Status)
                            .custom(ServiceStatus::Enum)
                            .not_null(),
                    )
                    .col(timestamp_with_time_zone(Service::ReserveDateStart).not_null())
                    .col(timestamp_with_time_zone(Service::ReserveDateEnd).not_null())
                    .col(
                        timestamp_with_time_zone(Service::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Service::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .check(Expr::col(Service::ReserveDateStart).lte(Expr::col(Service::ReserveDateEnd)))
                    .check(Expr::col(Service::Price).gte(0))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_service_owner")
                            .from(Service::Table, Service::OwnerId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_service_pet")
                            .from(Service::Table, Service::PetId)
                            .to(Pet::Table, Pet::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_service_payment")
                            .from(Service::Table, Service::PaymentId)
                            .to(Payment::Table, Payment::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Used by advance() and the availability overlap query
        manager
            .create_index(
                Index::create()
                    .name("idx_service_status_start")
                    .table(Service::Table)
                    .col(Service::Status)
                    .col(Service::ReserveDateStart)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CaretakerService::Table)
                    .if_not_exists()
                    .col(uuid(CaretakerService::ServiceId).primary_key())
                    .col(uuid(CaretakerService::CaretakerId).not_null())
                    .col(integer(CaretakerService::Score).not_null().default(0))
                    .col(text_null(CaretakerService::Comment))
                    .check(Expr::col(CaretakerService::Score).between(0, 5))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_caretaker_service_service")
                            .from(CaretakerService::Table, CaretakerService::ServiceId)
                            .to(Service::Table, Service::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_caretaker_service_caretaker")
                            .from(CaretakerService::Table, CaretakerService::CaretakerId)
                            .to(Caretaker::Table, Caretaker::UserId)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_caretaker_service_caretaker")
                    .table(CaretakerService::Table)
                    .col(CaretakerService::CaretakerId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MedicalService::Table)
                    .if_not_exists()
                    .col(uuid(MedicalService::ServiceId).primary_key())
                    .col(uuid(MedicalService::DoctorId).not_null())
                    .col(text(MedicalService::Disease).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_medical_service_service")
                            .from(MedicalService::Table, MedicalService::ServiceId)
                            .to(Service::Table, Service::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_medical_service_doctor")
                            .from(MedicalService::Table, MedicalService::DoctorId)
                            .to(Doctor::Table, Doctor::UserId)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MedicalService::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CaretakerService::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Service::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(ServiceStatus::Enum).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Service {
    Table,
    Id,
    OwnerId,
    PetId,
    PaymentId,
    Price,
    Status,
    ReserveDateStart,
    ReserveDateEnd,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum ServiceStatus {
    #[sea_orm(iden = "service_status")]
    Enum,
    #[sea_orm(iden = "wait")]
    Wait,
    #[sea_orm(iden = "ongoing")]
    Ongoing,
    #[sea_orm(iden = "finish")]
    Finish,
    #[sea_orm(iden = "cancelled")]
    Cancelled,
}

#[derive(DeriveIden)]
enum CaretakerService {
    Table,
    ServiceId,
    CaretakerId,
    Score,
    Comment,
}

#[derive(DeriveIden)]
enum MedicalService {
    Table,
    ServiceId,
    DoctorId,
    Disease,
}
