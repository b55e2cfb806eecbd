//! Moderation ledger.
//!
//! Every staff action lands here as one append-only row, written inside
//! the same transaction as the action itself so the ledger can never
//! disagree with what actually happened. Rows leave the table only
//! through the retention sweep.

use chrono::{Duration, NaiveDateTime};
use sea_orm::entity::*;
use sea_orm::query::*;
use sea_orm::{ConnectionTrait, DbErr, PaginatorTrait, Set};
use thiserror::Error;

use crate::config::ConfigError;
use crate::orm::moderation_logs::{self, ContentType, ModerationAction};
use crate::Board;

/// Typed parameters for one ledger row.
#[derive(Clone, Debug)]
pub enum LedgerEntry<'a> {
    ContentDeletion {
        content_type: ContentType,
        /// None when the author was already expunged.
        target_user_id: Option<i32>,
        /// Snapshot of the removed body.
        content: &'a str,
        reason: Option<&'a str>,
        attempted_suspension: bool,
        suspension_applied: bool,
        suspension_duration: Option<Duration>,
    },
    Suspension {
        target_user_id: i32,
        reason: &'a str,
        duration: Option<Duration>,
    },
    SuspensionLift {
        target_user_id: i32,
        reason: Option<&'a str>,
    },
}

pub async fn append_entry<C: ConnectionTrait>(
    conn: &C,
    now: NaiveDateTime,
    moderator_id: i32,
    entry: LedgerEntry<'_>,
) -> Result<moderation_logs::Model, DbErr> {
    let row = match entry {
        LedgerEntry::ContentDeletion {
            content_type,
            target_user_id,
            content,
            reason,
            attempted_suspension,
            suspension_applied,
            suspension_duration,
        } => moderation_logs::ActiveModel {
            moderator_id: Set(moderator_id),
            action: Set(match content_type {
                ContentType::Post => ModerationAction::DeletePost,
                ContentType::Comment => ModerationAction::DeleteComment,
            }),
            target_user_id: Set(target_user_id),
            reason: Set(reason.map(str::to_string)),
            content: Set(Some(content.to_string())),
            content_type: Set(Some(content_type)),
            suspension_duration_ms: Set(suspension_duration.map(|d| d.num_milliseconds())),
            suspension_applied: Set(suspension_applied),
            attempted_suspension: Set(attempted_suspension),
            created_at: Set(now),
            ..Default::default()
        },
        LedgerEntry::Suspension {
            target_user_id,
            reason,
            duration,
        } => moderation_logs::ActiveModel {
            moderator_id: Set(moderator_id),
            action: Set(ModerationAction::SuspendUser),
            target_user_id: Set(Some(target_user_id)),
            reason: Set(Some(reason.to_string())),
            content: Set(None),
            content_type: Set(None),
            suspension_duration_ms: Set(duration.map(|d| d.num_milliseconds())),
            suspension_applied: Set(true),
            attempted_suspension: Set(true),
            created_at: Set(now),
            ..Default::default()
        },
        LedgerEntry::SuspensionLift {
            target_user_id,
            reason,
        } => moderation_logs::ActiveModel {
            moderator_id: Set(moderator_id),
            action: Set(ModerationAction::LiftSuspension),
            target_user_id: Set(Some(target_user_id)),
            reason: Set(reason.map(str::to_string)),
            content: Set(None),
            content_type: Set(None),
            suspension_duration_ms: Set(None),
            suspension_applied: Set(false),
            attempted_suspension: Set(false),
            created_at: Set(now),
            ..Default::default()
        },
    };
    row.insert(conn).await
}

#[derive(Debug, Error)]
pub enum LedgerSweepError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown_error")]
    Internal(#[from] DbErr),
}

impl Board {
    /// How many ledger rows the retention sweep would remove right now.
    pub async fn count_expired_ledger_entries(&self) -> Result<u64, LedgerSweepError> {
        let now = self.now();
        let snapshot = self.config.get(&self.db, now).await?;
        let cutoff = now - snapshot.max_moderation_log_age;
        let count = moderation_logs::Entity::find()
            .filter(moderation_logs::Column::CreatedAt.lt(cutoff))
            .count(&self.db)
            .await?;
        Ok(count)
    }

    /// Removes ledger rows past the retention age. Returns how many went.
    pub async fn delete_expired_ledger_entries(&self) -> Result<u64, LedgerSweepError> {
        let now = self.now();
        let snapshot = self.config.get(&self.db, now).await?;
        let cutoff = now - snapshot.max_moderation_log_age;
        let result = moderation_logs::Entity::delete_many()
            .filter(moderation_logs::Column::CreatedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
