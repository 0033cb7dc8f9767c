use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "caretaker_service")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub service_id: Uuid,
    pub caretaker_id: Uuid,
    /// 0 until the owner reviews the booking, then 1..=5.
    pub score: i32,
    pub comment: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::booking::Entity",
        from = "Column::ServiceId",
        to = "super::booking::Column::Id",
        on_delete = "Cascade"
    )]
    Booking,
    #[sea_orm(
        belongs_to = "super::caretaker::Entity",
        from = "Column::CaretakerId",
        to = "super::caretaker::Column::UserId",
        on_delete = "Cascade"
    )]
    Caretaker,
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Booking.def()
    }
}

impl Related<super::caretaker::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Caretaker.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
