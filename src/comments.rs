//! Comment workflows.
//!
//! Mirrors the post workflows with two extra gates: comments may only be
//! added to posts younger than the configured ceiling, and the parent
//! post's `comments_count` moves atomically with every insert or delete.

use chrono::NaiveDateTime;
use sea_orm::entity::*;
use sea_orm::query::*;
use sea_orm::sea_query::Expr;
use sea_orm::{DbErr, PaginatorTrait, Set, TransactionTrait};
use thiserror::Error;

use crate::config::ConfigError;
use crate::moderation::{self, LedgerEntry};
use crate::orm::moderation_logs::ContentType;
use crate::orm::posts::AuthorRole;
use crate::orm::user_interactions::InteractionKind;
use crate::orm::users::{self, Role};
use crate::orm::{comments, posts, suspensions};
use crate::posts::{AuthorSuspensionError, SuspensionParams, ANONYMOUS_NAME};
use crate::rules::{
    authorize_deletion, authorize_suspension, evaluate_rate_limit, new_suspension_is_longer,
    DeletionDecision, DeletionDenial, DeletionRequest, RateLimitDecision, SuspensionDecision,
};
use crate::users::{
    active_suspension, apply_suspension, content_suspension_request, recent_interactions,
    record_interaction, suspension_end, SuspensionOutcome,
};
use crate::Board;

#[derive(Clone, Debug)]
pub struct NewComment {
    pub post_id: i32,
    pub author_user_id: i32,
    pub content: String,
    pub anonymous: bool,
}

#[derive(Debug, Error)]
pub enum CreateCommentError {
    #[error("comment_too_long")]
    CommentTooLong,
    #[error("user_not_found")]
    UserNotFound,
    #[error("post_not_found")]
    PostNotFound,
    #[error("post_too_old_to_comment")]
    PostTooOldToComment,
    #[error("user_suspended")]
    UserSuspended,
    #[error("comment_violates_limit_rules")]
    ViolatesLimitRules { retry_at: NaiveDateTime },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown_error")]
    Internal(#[from] DbErr),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CommentDeletion {
    pub suspension: Option<SuspensionOutcome>,
}

#[derive(Debug, Error)]
pub enum DeleteCommentError {
    #[error("comment_not_found")]
    CommentNotFound,
    #[error("post_not_found")]
    PostNotFound,
    #[error("user_not_found")]
    UserNotFound,
    #[error("deletor_suspended")]
    DeletorSuspended,
    #[error("comment_too_old_to_delete")]
    TooOldToDelete,
    #[error("not_comment_owner")]
    NotCommentOwner,
    #[error("unauthorized_deletion")]
    UnauthorizedDeletion,
    #[error("unauthorized_suspension")]
    UnauthorizedSuspension,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown_error")]
    Internal(#[from] DbErr),
}

impl Board {
    pub async fn create_comment(
        &self,
        new_comment: NewComment,
    ) -> Result<comments::Model, CreateCommentError> {
        let now = self.now();
        let snapshot = self.config.get(&self.db, now).await?;
        if new_comment.content.chars().count() > snapshot.max_comment_length {
            return Err(CreateCommentError::CommentTooLong);
        }

        let txn = self.db.begin().await?;
        let author = users::Entity::find_by_id(new_comment.author_user_id)
            .one(&txn)
            .await?
            .ok_or(CreateCommentError::UserNotFound)?;
        let post = posts::Entity::find_by_id(new_comment.post_id)
            .one(&txn)
            .await?
            .ok_or(CreateCommentError::PostNotFound)?;
        if now - post.created_at > snapshot.max_post_age_to_comment {
            return Err(CreateCommentError::PostTooOldToComment);
        }
        if active_suspension(&txn, &author, now).await?.is_some() {
            return Err(CreateCommentError::UserSuspended);
        }
        if author.role != Role::Admin {
            let recent = recent_interactions(&txn, author.id).await?;
            if let RateLimitDecision::Denied { retry_at } = evaluate_rate_limit(
                InteractionKind::Comment,
                &recent,
                &snapshot.interaction_limits,
                now,
            ) {
                return Err(CreateCommentError::ViolatesLimitRules { retry_at });
            }
        }

        let (author_username, author_role) = if new_comment.anonymous {
            (ANONYMOUS_NAME.to_string(), AuthorRole::Anonymous)
        } else {
            (author.username.clone(), AuthorRole::from(author.role))
        };
        let comment = comments::ActiveModel {
            post_id: Set(post.id),
            author_id: Set(Some(author.id)),
            author_username: Set(author_username),
            author_role: Set(author_role),
            anonymous: Set(new_comment.anonymous),
            content: Set(new_comment.content),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        posts::Entity::update_many()
            .col_expr(
                posts::Column::CommentsCount,
                Expr::col(posts::Column::CommentsCount).add(1),
            )
            .filter(posts::Column::Id.eq(post.id))
            .exec(&txn)
            .await?;
        record_interaction(&txn, &snapshot, now, author.id, InteractionKind::Comment).await?;
        txn.commit().await?;
        Ok(comment)
    }

    pub async fn delete_comment(
        &self,
        comment_id: i32,
        deletor_user_id: i32,
        suspension: Option<SuspensionParams>,
    ) -> Result<CommentDeletion, DeleteCommentError> {
        let now = self.now();
        let snapshot = self.config.get(&self.db, now).await?;

        let txn = self.db.begin().await?;
        let comment = comments::Entity::find_by_id(comment_id)
            .one(&txn)
            .await?
            .ok_or(DeleteCommentError::CommentNotFound)?;
        let post = posts::Entity::find_by_id(comment.post_id)
            .one(&txn)
            .await?
            .ok_or(DeleteCommentError::PostNotFound)?;
        let deletor = users::Entity::find_by_id(deletor_user_id)
            .one(&txn)
            .await?
            .ok_or(DeleteCommentError::UserNotFound)?;
        if active_suspension(&txn, &deletor, now).await?.is_some() {
            return Err(DeleteCommentError::DeletorSuspended);
        }

        let author = match comment.author_id {
            Some(author_id) => users::Entity::find_by_id(author_id).one(&txn).await?,
            None => None,
        };
        let deletor_is_author = comment.author_id == Some(deletor.id);

        let decision = authorize_deletion(
            &DeletionRequest {
                deletor_role: deletor.role,
                deletor_is_author,
                author_role: author.as_ref().map(|a| a.role).unwrap_or(Role::User),
                content_is_anonymous: comment.anonymous,
                content_created_at: comment.created_at,
                max_age: snapshot.max_comment_age_to_delete,
            },
            now,
        );
        match decision {
            DeletionDecision::Allow => {}
            DeletionDecision::Deny(DeletionDenial::TooOldToDelete) => {
                return Err(DeleteCommentError::TooOldToDelete)
            }
            DeletionDecision::Deny(DeletionDenial::NotOwner) => {
                return Err(DeleteCommentError::NotCommentOwner)
            }
            DeletionDecision::Deny(DeletionDenial::UnauthorizedDeletion) => {
                return Err(DeleteCommentError::UnauthorizedDeletion)
            }
        }

        comments::Entity::delete_by_id(comment.id).exec(&txn).await?;
        posts::Entity::update_many()
            .col_expr(
                posts::Column::CommentsCount,
                Expr::col(posts::Column::CommentsCount).sub(1),
            )
            .filter(posts::Column::Id.eq(post.id))
            .exec(&txn)
            .await?;

        let mut outcome = None;
        let mut suspension_applied = false;
        if let Some(params) = &suspension {
            let author = author.as_ref().ok_or(DeleteCommentError::UserNotFound)?;
            match authorize_suspension(&content_suspension_request(
                &deletor,
                author,
                comment.anonymous,
            )) {
                SuspensionDecision::Disallow => {
                    return Err(DeleteCommentError::UnauthorizedSuspension);
                }
                SuspensionDecision::SilentlyIgnore => {}
                SuspensionDecision::Suspend => {
                    let current = active_suspension(&txn, author, now).await?;
                    if new_suspension_is_longer(
                        current.as_ref().map(suspension_end),
                        params.duration,
                        now,
                    ) {
                        let row = apply_suspension(
                            &txn,
                            now,
                            author,
                            deletor.id,
                            &params.reason,
                            params.duration,
                        )
                        .await?;
                        suspension_applied = true;
                        outcome = Some(SuspensionOutcome::Applied {
                            until: row.suspended_until,
                        });
                    } else {
                        outcome = Some(SuspensionOutcome::NotAppliedCurrentIsLonger);
                    }
                }
            }
        }

        if !deletor_is_author {
            moderation::append_entry(
                &txn,
                now,
                deletor.id,
                LedgerEntry::ContentDeletion {
                    content_type: ContentType::Comment,
                    target_user_id: comment.author_id,
                    content: &comment.content,
                    reason: suspension.as_ref().map(|p| p.reason.as_str()),
                    attempted_suspension: suspension.is_some(),
                    suspension_applied,
                    suspension_duration: suspension.as_ref().and_then(|p| p.duration),
                },
            )
            .await?;
        }
        txn.commit().await?;
        Ok(CommentDeletion {
            suspension: outcome,
        })
    }

    /// Latest suspension of a comment's author, for the moderation UI.
    pub async fn comment_author_suspension(
        &self,
        comment_id: i32,
    ) -> Result<Option<suspensions::Model>, AuthorSuspensionError> {
        let comment = comments::Entity::find_by_id(comment_id)
            .one(&self.db)
            .await?
            .ok_or(AuthorSuspensionError::CommentNotFound)?;
        let author_id = comment
            .author_id
            .ok_or(AuthorSuspensionError::AuthorExpunged)?;
        let latest = suspensions::Entity::find()
            .filter(suspensions::Column::UserId.eq(author_id))
            .order_by_desc(suspensions::Column::CreatedAt)
            .one(&self.db)
            .await?;
        Ok(latest)
    }

    pub async fn count_expungeable_comment_authors(
        &self,
        cutoff: NaiveDateTime,
    ) -> Result<u64, DbErr> {
        comments::Entity::find()
            .filter(comments::Column::Anonymous.eq(true))
            .filter(comments::Column::AuthorId.is_not_null())
            .filter(comments::Column::CreatedAt.lt(cutoff))
            .count(&self.db)
            .await
    }

    pub async fn expunge_comment_authors(&self, cutoff: NaiveDateTime) -> Result<u64, DbErr> {
        let result = comments::Entity::update_many()
            .col_expr(
                comments::Column::AuthorId,
                Expr::value(Option::<i32>::None),
            )
            .filter(comments::Column::Anonymous.eq(true))
            .filter(comments::Column::AuthorId.is_not_null())
            .filter(comments::Column::CreatedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
