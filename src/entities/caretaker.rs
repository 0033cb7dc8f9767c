use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "caretaker")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,
    pub specialization: String,
    pub start_work_time: Time,
    pub end_work_time: Time,
    #[sea_orm(column_type = "Decimal(Some((3, 2)))")]
    pub rating: Decimal,
    /// Touched whenever the caretaker is bound to a booking, which turns two
    /// concurrent assignments into a serialization failure.
    #[serde(skip_serializing)]
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
    #[sea_orm(has_many = "super::caretaker_service::Entity")]
    CaretakerServices,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::caretaker_service::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CaretakerServices.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
