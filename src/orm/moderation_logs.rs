//! SeaORM Entity for moderation_logs table
//!
//! Append-only audit trail owned by the acting moderator. Rows are only
//! ever removed by the retention sweep.

use sea_orm::entity::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "moderation_action")]
pub enum ModerationAction {
    #[sea_orm(string_value = "suspend_user")]
    SuspendUser,
    #[sea_orm(string_value = "lift_suspension")]
    LiftSuspension,
    #[sea_orm(string_value = "delete_post")]
    DeletePost,
    #[sea_orm(string_value = "delete_comment")]
    DeleteComment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "moderated_content_type")]
pub enum ContentType {
    #[sea_orm(string_value = "post")]
    Post,
    #[sea_orm(string_value = "comment")]
    Comment,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "moderation_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub moderator_id: i32,
    pub action: ModerationAction,
    pub target_user_id: Option<i32>,
    #[sea_orm(column_type = "Text", nullable)]
    pub reason: Option<String>,
    /// Snapshot of the deleted content body, when the action removed content.
    #[sea_orm(column_type = "Text", nullable)]
    pub content: Option<String>,
    pub content_type: Option<ContentType>,
    /// None on permanent suspensions and on non-suspension actions.
    pub suspension_duration_ms: Option<i64>,
    pub suspension_applied: bool,
    /// True when a suspension was requested alongside a deletion, whether
    /// or not it ended up applied.
    pub attempted_suspension: bool,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::ModeratorId",
        to = "super::users::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Moderator,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Moderator.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
