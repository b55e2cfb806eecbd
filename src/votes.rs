//! Vote workflow.
//!
//! One row per (user, post); the post's vote counters are denormalized and
//! move in the same transaction as the row. Repeating the current vote is
//! a no-op, switching flips both counters, removing a vote that does not
//! exist is a no-op returning the current score.

use chrono::NaiveDateTime;
use sea_orm::entity::*;
use sea_orm::query::*;
use sea_orm::sea_query::Expr;
use sea_orm::{ConnectionTrait, DbErr, Set, TransactionTrait};
use thiserror::Error;

use crate::config::ConfigError;
use crate::orm::user_interactions::InteractionKind;
use crate::orm::users::{self, Role};
use crate::orm::votes::{self, VoteKind};
use crate::orm::posts;
use crate::rules::{evaluate_rate_limit, RateLimitDecision};
use crate::users::{active_suspension, recent_interactions, record_interaction};
use crate::Board;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteAction {
    Upvote,
    Downvote,
    Remove,
}

/// The caller-visible state after the workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteStatus {
    pub vote: Option<VoteKind>,
    /// upvotes minus downvotes.
    pub score: i64,
}

#[derive(Debug, Error)]
pub enum SetVoteError {
    #[error("user_not_found")]
    UserNotFound,
    #[error("post_not_found")]
    PostNotFound,
    #[error("user_suspended")]
    UserSuspended,
    #[error("vote_violates_limit_rules")]
    ViolatesLimitRules { retry_at: NaiveDateTime },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown_error")]
    Internal(#[from] DbErr),
}

fn counter_column(kind: VoteKind) -> posts::Column {
    match kind {
        VoteKind::Upvote => posts::Column::UpvotesCount,
        VoteKind::Downvote => posts::Column::DownvotesCount,
    }
}

async fn adjust_counter<C: ConnectionTrait>(
    conn: &C,
    post_id: i32,
    kind: VoteKind,
    delta: i32,
) -> Result<(), DbErr> {
    let column = counter_column(kind);
    let expr = if delta >= 0 {
        Expr::col(column).add(delta)
    } else {
        Expr::col(column).sub(-delta)
    };
    posts::Entity::update_many()
        .col_expr(column, expr)
        .filter(posts::Column::Id.eq(post_id))
        .exec(conn)
        .await?;
    Ok(())
}

impl Board {
    pub async fn set_vote(
        &self,
        post_id: i32,
        user_id: i32,
        action: VoteAction,
    ) -> Result<VoteStatus, SetVoteError> {
        let now = self.now();
        let snapshot = self.config.get(&self.db, now).await?;

        let txn = self.db.begin().await?;
        let user = users::Entity::find_by_id(user_id)
            .one(&txn)
            .await?
            .ok_or(SetVoteError::UserNotFound)?;
        let post = posts::Entity::find_by_id(post_id)
            .one(&txn)
            .await?
            .ok_or(SetVoteError::PostNotFound)?;
        if active_suspension(&txn, &user, now).await?.is_some() {
            return Err(SetVoteError::UserSuspended);
        }
        if user.role != Role::Admin {
            let recent = recent_interactions(&txn, user.id).await?;
            if let RateLimitDecision::Denied { retry_at } = evaluate_rate_limit(
                InteractionKind::Vote,
                &recent,
                &snapshot.interaction_limits,
                now,
            ) {
                return Err(SetVoteError::ViolatesLimitRules { retry_at });
            }
        }

        let existing = votes::Entity::find()
            .filter(votes::Column::PostId.eq(post.id))
            .filter(votes::Column::UserId.eq(user.id))
            .one(&txn)
            .await?;

        let (final_vote, changed) = match (action, existing) {
            (VoteAction::Remove, None) => (None, false),
            (VoteAction::Remove, Some(row)) => {
                let kind = row.vote;
                votes::Entity::delete_by_id(row.id).exec(&txn).await?;
                adjust_counter(&txn, post.id, kind, -1).await?;
                (None, true)
            }
            (VoteAction::Upvote, existing) => {
                set_vote_kind(&txn, &post, &user, existing, VoteKind::Upvote, now).await?
            }
            (VoteAction::Downvote, existing) => {
                set_vote_kind(&txn, &post, &user, existing, VoteKind::Downvote, now).await?
            }
        };

        if changed {
            record_interaction(&txn, &snapshot, now, user.id, InteractionKind::Vote).await?;
        }

        let refreshed = posts::Entity::find_by_id(post.id)
            .one(&txn)
            .await?
            .ok_or(SetVoteError::PostNotFound)?;
        txn.commit().await?;
        Ok(VoteStatus {
            vote: final_vote,
            score: i64::from(refreshed.upvotes_count) - i64::from(refreshed.downvotes_count),
        })
    }
}

async fn set_vote_kind<C: ConnectionTrait>(
    conn: &C,
    post: &posts::Model,
    user: &users::Model,
    existing: Option<votes::Model>,
    kind: VoteKind,
    now: NaiveDateTime,
) -> Result<(Option<VoteKind>, bool), DbErr> {
    match existing {
        Some(row) if row.vote == kind => Ok((Some(kind), false)),
        Some(row) => {
            let previous = row.vote;
            let mut active: votes::ActiveModel = row.into();
            active.vote = Set(kind);
            active.update(conn).await?;
            adjust_counter(conn, post.id, previous, -1).await?;
            adjust_counter(conn, post.id, kind, 1).await?;
            Ok((Some(kind), true))
        }
        None => {
            votes::ActiveModel {
                post_id: Set(post.id),
                user_id: Set(user.id),
                vote: Set(kind),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(conn)
            .await?;
            adjust_counter(conn, post.id, kind, 1).await?;
            Ok((Some(kind), true))
        }
    }
}
