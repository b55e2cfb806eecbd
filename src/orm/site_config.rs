//! SeaORM Entity for site_config table
//!
//! Single-row table. List-valued settings live in Json columns; scalar
//! limits get real columns so they can be updated atomically.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "site_config")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Json array of `{id, timeframe_ms, max_interactions, kinds}`.
    pub interaction_limits: Json,
    pub posting_rules: Json,
    pub webhook_urls: Json,
    pub disallowed_username_patterns: Json,
    pub max_interactions_to_keep: i32,
    pub max_interaction_age_ms: i64,
    pub max_post_length: i32,
    pub max_comment_length: i32,
    pub max_post_age_to_delete_ms: i64,
    pub max_comment_age_to_delete_ms: i64,
    pub max_post_age_to_comment_ms: i64,
    pub min_username_change_wait_ms: i64,
    pub max_moderation_log_age_ms: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
