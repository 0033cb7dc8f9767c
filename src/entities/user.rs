use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "user_role")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[sea_orm(string_value = "owner")]
    Owner,
    #[sea_orm(string_value = "caretaker")]
    Caretaker,
    #[sea_orm(string_value = "doctor")]
    Doctor,
    #[sea_orm(string_value = "admin")]
    Admin,
}

impl UserRole {
    pub fn is_staff(self) -> bool {
        matches!(self, UserRole::Caretaker | UserRole::Doctor)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub name: String,
    pub birth_date: Date,
    pub telephone: String,
    pub address: String,
    pub profile_image_url: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::owner::Entity")]
    Owner,
    #[sea_orm(has_one = "super::caretaker::Entity")]
    Caretaker,
    #[sea_orm(has_one = "super::doctor::Entity")]
    Doctor,
    #[sea_orm(has_one = "super::admin::Entity")]
    Admin,
    #[sea_orm(has_many = "super::pet::Entity")]
    Pets,
}

impl Related<super::owner::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Owner.def()
    }
}

impl Related<super::caretaker::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Caretaker.def()
    }
}

impl Related<super::doctor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Doctor.def()
    }
}

impl Related<super::admin::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Admin.def()
    }
}

impl Related<super::pet::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Pets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
