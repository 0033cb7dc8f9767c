use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "service_status")]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    #[sea_orm(string_value = "wait")]
    Wait,
    #[sea_orm(string_value = "ongoing")]
    Ongoing,
    #[sea_orm(string_value = "finish")]
    Finish,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl BookingStatus {
    /// Statuses that hold a staff member's time.
    pub const BLOCKING: [BookingStatus; 2] = [BookingStatus::Wait, BookingStatus::Ongoing];
}

/// A booked service. The table keeps the `service` name used by the public API.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "service")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub owner_id: Uuid,
    pub pet_id: Uuid,
    #[sea_orm(unique)]
    pub payment_id: Uuid,
    pub price: i32,
    pub status: BookingStatus,
    pub reserve_date_start: DateTimeWithTimeZone,
    pub reserve_date_end: DateTimeWithTimeZone,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::OwnerId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Owner,
    #[sea_orm(
        belongs_to = "super::pet::Entity",
        from = "Column::PetId",
        to = "super::pet::Column::Id",
        on_delete = "Cascade"
    )]
    Pet,
    #[sea_orm(
        belongs_to = "super::payment::Entity",
        from = "Column::PaymentId",
        to = "super::payment::Column::Id",
        on_delete = "Restrict"
    )]
    Payment,
    #[sea_orm(has_one = "super::caretaker_service::Entity")]
    CaretakerService,
    #[sea_orm(has_one = "super::medical_service::Entity")]
    MedicalService,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Owner.def()
    }
}

impl Related<super::pet::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Pet.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl Related<super::caretaker_service::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CaretakerService.def()
    }
}

impl Related<super::medical_service::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MedicalService.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
