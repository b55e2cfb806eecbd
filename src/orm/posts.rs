//! SeaORM Entity for posts table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Role snapshot stored on content at creation time. Anonymous content
/// records `Anonymous` regardless of the author's true role so the role is
/// never leaked through the snapshot.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "author_role")]
#[serde(rename_all = "lowercase")]
pub enum AuthorRole {
    #[sea_orm(string_value = "admin")]
    Admin,
    #[sea_orm(string_value = "moderator")]
    Moderator,
    #[sea_orm(string_value = "user")]
    User,
    #[sea_orm(string_value = "anonymous")]
    Anonymous,
}

impl From<super::users::Role> for AuthorRole {
    fn from(role: super::users::Role) -> Self {
        match role {
            super::users::Role::Admin => AuthorRole::Admin,
            super::users::Role::Moderator => AuthorRole::Moderator,
            super::users::Role::User => AuthorRole::User,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "posts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Cleared by the anonymous-author expunge sweep; anonymous posts keep
    /// the link only while it is needed for moderation.
    pub author_id: Option<i32>,
    pub author_username: String,
    pub author_role: AuthorRole,
    pub anonymous: bool,
    #[sea_orm(column_type = "Text")]
    pub content: String,
    pub comments_count: i32,
    pub upvotes_count: i32,
    pub downvotes_count: i32,
    /// Json array of `{message_id, webhook_url}` pairs mirrored to Discord.
    pub webhook_messages: Json,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::comments::Entity")]
    Comments,
    #[sea_orm(has_many = "super::votes::Entity")]
    Votes,
}

impl Related<super::comments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Comments.def()
    }
}

impl Related<super::votes::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Votes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
