//! SeaORM Entity for users table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Site-wide role. Hierarchy: user < moderator < admin.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "user_role")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[sea_orm(string_value = "admin")]
    Admin,
    #[sea_orm(string_value = "moderator")]
    Moderator,
    #[sea_orm(string_value = "user")]
    User,
}

impl Role {
    /// Numeric rank used by suspension authorization.
    pub fn rank(self) -> u8 {
        match self {
            Role::User => 1,
            Role::Moderator => 2,
            Role::Admin => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub username: String,
    /// Hashed upstream; this core never sees raw passwords.
    pub password_hash: String,
    pub role: Role,
    pub can_change_username: bool,
    pub last_username_change_at: Option<DateTime>,
    /// Points at the active row in suspensions. A pointee whose
    /// suspended_until is in the past means "not suspended"; staleness is
    /// resolved at read time, never eagerly cleared.
    pub current_suspension_id: Option<i32>,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::suspensions::Entity")]
    Suspensions,
    #[sea_orm(has_many = "super::user_interactions::Entity")]
    Interactions,
    #[sea_orm(has_many = "super::moderation_logs::Entity")]
    ModerationLogs,
}

impl Related<super::suspensions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Suspensions.def()
    }
}

impl Related<super::user_interactions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Interactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
