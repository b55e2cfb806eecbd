//! Post workflows: creation, deletion, author-suspension lookup, and the
//! anonymous-author expunge sweep.
//!
//! Anonymous posts keep their `author_id` so moderation (rate limits,
//! suspensions, self-deletion) still works, but every read surface exposes
//! only the snapshotted "Anonymous" identity. The expunge sweep severs the
//! link once the post is old enough that moderation no longer needs it.

use chrono::{Duration, NaiveDateTime};
use sea_orm::entity::*;
use sea_orm::query::*;
use sea_orm::sea_query::Expr;
use sea_orm::{DbErr, PaginatorTrait, Set, TransactionTrait};
use thiserror::Error;

use crate::config::ConfigError;
use crate::moderation::{self, LedgerEntry};
use crate::orm::moderation_logs::ContentType;
use crate::orm::posts::{self, AuthorRole};
use crate::orm::user_interactions::InteractionKind;
use crate::orm::users::{self, Role};
use crate::orm::{comments, suspensions, votes};
use crate::rules::{
    authorize_deletion, authorize_suspension, evaluate_rate_limit, new_suspension_is_longer,
    DeletionDecision, DeletionDenial, DeletionRequest, RateLimitDecision, SuspensionDecision,
};
use crate::users::{
    active_suspension, apply_suspension, content_suspension_request, recent_interactions,
    record_interaction, suspension_end, SuspensionOutcome,
};
use crate::webhooks::{DeliveredMessage, PostAnnouncement};
use crate::Board;

/// Username snapshot written on anonymous content.
pub const ANONYMOUS_NAME: &str = "Anonymous";

#[derive(Clone, Debug)]
pub struct NewPost {
    pub author_user_id: i32,
    pub content: String,
    pub anonymous: bool,
}

#[derive(Debug, Error)]
pub enum CreatePostError {
    #[error("post_too_long")]
    PostTooLong,
    #[error("user_not_found")]
    UserNotFound,
    #[error("user_suspended")]
    UserSuspended,
    #[error("post_violates_limit_rules")]
    ViolatesLimitRules { retry_at: NaiveDateTime },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown_error")]
    Internal(#[from] DbErr),
}

/// Requested alongside a deletion to also suspend the content's author.
#[derive(Clone, Debug)]
pub struct SuspensionParams {
    pub reason: String,
    /// None means permanent.
    pub duration: Option<Duration>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PostDeletion {
    /// None when no suspension was requested, or when the request was
    /// silently ignored to protect an anonymous author.
    pub suspension: Option<SuspensionOutcome>,
}

#[derive(Debug, Error)]
pub enum DeletePostError {
    #[error("post_not_found")]
    PostNotFound,
    #[error("user_not_found")]
    UserNotFound,
    #[error("deletor_suspended")]
    DeletorSuspended,
    #[error("post_too_old_to_delete")]
    TooOldToDelete,
    #[error("not_post_owner")]
    NotPostOwner,
    #[error("unauthorized_deletion")]
    UnauthorizedDeletion,
    #[error("unauthorized_suspension")]
    UnauthorizedSuspension,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown_error")]
    Internal(#[from] DbErr),
}

#[derive(Debug, Error)]
pub enum AuthorSuspensionError {
    #[error("post_not_found")]
    PostNotFound,
    #[error("comment_not_found")]
    CommentNotFound,
    #[error("author_expunged")]
    AuthorExpunged,
    #[error("unknown_error")]
    Internal(#[from] DbErr),
}

impl Board {
    pub async fn create_post(&self, new_post: NewPost) -> Result<posts::Model, CreatePostError> {
        let now = self.now();
        let snapshot = self.config.get(&self.db, now).await?;
        if new_post.content.chars().count() > snapshot.max_post_length {
            return Err(CreatePostError::PostTooLong);
        }

        let txn = self.db.begin().await?;
        let author = users::Entity::find_by_id(new_post.author_user_id)
            .one(&txn)
            .await?
            .ok_or(CreatePostError::UserNotFound)?;
        if active_suspension(&txn, &author, now).await?.is_some() {
            return Err(CreatePostError::UserSuspended);
        }
        if author.role != Role::Admin {
            let recent = recent_interactions(&txn, author.id).await?;
            if let RateLimitDecision::Denied { retry_at } = evaluate_rate_limit(
                InteractionKind::Post,
                &recent,
                &snapshot.interaction_limits,
                now,
            ) {
                return Err(CreatePostError::ViolatesLimitRules { retry_at });
            }
        }

        let (author_username, author_role) = if new_post.anonymous {
            (ANONYMOUS_NAME.to_string(), AuthorRole::Anonymous)
        } else {
            (author.username.clone(), AuthorRole::from(author.role))
        };
        let post = posts::ActiveModel {
            author_id: Set(Some(author.id)),
            author_username: Set(author_username),
            author_role: Set(author_role),
            anonymous: Set(new_post.anonymous),
            content: Set(new_post.content),
            comments_count: Set(0),
            upvotes_count: Set(0),
            downvotes_count: Set(0),
            webhook_messages: Set(serde_json::json!([])),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        record_interaction(&txn, &snapshot, now, author.id, InteractionKind::Post).await?;
        txn.commit().await?;

        if !snapshot.webhook_urls.is_empty() {
            self.spawn_post_announcement(&post, snapshot.webhook_urls.clone());
        }
        Ok(post)
    }

    fn spawn_post_announcement(&self, post: &posts::Model, urls: Vec<String>) {
        let db = self.db.clone();
        let notifier = self.webhooks.clone();
        let announcement = PostAnnouncement {
            post_id: post.id,
            author_name: post.author_username.clone(),
            content: post.content.clone(),
        };
        let post_id = post.id;
        tokio::spawn(async move {
            let delivered = notifier.announce_post(&urls, &announcement).await;
            if delivered.is_empty() {
                return;
            }
            let value = match serde_json::to_value(&delivered) {
                Ok(value) => value,
                Err(err) => {
                    log::warn!("failed to serialize webhook receipts for post {post_id}: {err}");
                    return;
                }
            };
            let result = posts::Entity::update_many()
                .col_expr(posts::Column::WebhookMessages, Expr::value(value))
                .filter(posts::Column::Id.eq(post_id))
                .exec(&db)
                .await;
            if let Err(err) = result {
                log::warn!("failed to record webhook receipts for post {post_id}: {err}");
            }
        });
    }

    /// Deletes a post with its comments and votes, optionally suspending
    /// the author. On commit, mirrored webhook messages are retracted in
    /// the background.
    pub async fn delete_post(
        &self,
        post_id: i32,
        deletor_user_id: i32,
        suspension: Option<SuspensionParams>,
    ) -> Result<PostDeletion, DeletePostError> {
        let now = self.now();
        let snapshot = self.config.get(&self.db, now).await?;

        let txn = self.db.begin().await?;
        let post = posts::Entity::find_by_id(post_id)
            .one(&txn)
            .await?
            .ok_or(DeletePostError::PostNotFound)?;
        let deletor = users::Entity::find_by_id(deletor_user_id)
            .one(&txn)
            .await?
            .ok_or(DeletePostError::UserNotFound)?;
        if active_suspension(&txn, &deletor, now).await?.is_some() {
            return Err(DeletePostError::DeletorSuspended);
        }

        let author = match post.author_id {
            Some(author_id) => users::Entity::find_by_id(author_id).one(&txn).await?,
            None => None,
        };
        let deletor_is_author = post.author_id == Some(deletor.id);

        let decision = authorize_deletion(
            &DeletionRequest {
                deletor_role: deletor.role,
                deletor_is_author,
                author_role: author.as_ref().map(|a| a.role).unwrap_or(Role::User),
                content_is_anonymous: post.anonymous,
                content_created_at: post.created_at,
                max_age: snapshot.max_post_age_to_delete,
            },
            now,
        );
        match decision {
            DeletionDecision::Allow => {}
            DeletionDecision::Deny(DeletionDenial::TooOldToDelete) => {
                return Err(DeletePostError::TooOldToDelete)
            }
            DeletionDecision::Deny(DeletionDenial::NotOwner) => {
                return Err(DeletePostError::NotPostOwner)
            }
            DeletionDecision::Deny(DeletionDenial::UnauthorizedDeletion) => {
                return Err(DeletePostError::UnauthorizedDeletion)
            }
        }

        votes::Entity::delete_many()
            .filter(votes::Column::PostId.eq(post.id))
            .exec(&txn)
            .await?;
        comments::Entity::delete_many()
            .filter(comments::Column::PostId.eq(post.id))
            .exec(&txn)
            .await?;
        posts::Entity::delete_by_id(post.id).exec(&txn).await?;

        let mut outcome = None;
        let mut suspension_applied = false;
        if let Some(params) = &suspension {
            let author = author.as_ref().ok_or(DeletePostError::UserNotFound)?;
            match authorize_suspension(&content_suspension_request(
                &deletor,
                author,
                post.anonymous,
            )) {
                SuspensionDecision::Disallow => {
                    return Err(DeletePostError::UnauthorizedSuspension);
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
                    content_type: ContentType::Post,
                    target_user_id: post.author_id,
                    content: &post.content,
                    reason: suspension.as_ref().map(|p| p.reason.as_str()),
                    attempted_suspension: suspension.is_some(),
                    suspension_applied,
                    suspension_duration: suspension.as_ref().and_then(|p| p.duration),
                },
            )
            .await?;
        }
        txn.commit().await?;

        let mirrored: Vec<DeliveredMessage> =
            serde_json::from_value(post.webhook_messages.clone()).unwrap_or_default();
        if !mirrored.is_empty() {
            let notifier = self.webhooks.clone();
            tokio::spawn(async move {
                notifier.retract_messages(&mirrored).await;
            });
        }
        Ok(PostDeletion {
            suspension: outcome,
        })
    }

    /// Latest suspension (active or not) of a post's author, for the
    /// moderation UI. Distinguishes "author link already expunged" from
    /// "author was never suspended".
    pub async fn post_author_suspension(
        &self,
        post_id: i32,
    ) -> Result<Option<suspensions::Model>, AuthorSuspensionError> {
        let post = posts::Entity::find_by_id(post_id)
            .one(&self.db)
            .await?
            .ok_or(AuthorSuspensionError::PostNotFound)?;
        let author_id = post
            .author_id
            .ok_or(AuthorSuspensionError::AuthorExpunged)?;
        let latest = suspensions::Entity::find()
            .filter(suspensions::Column::UserId.eq(author_id))
            .order_by_desc(suspensions::Column::CreatedAt)
            .one(&self.db)
            .await?;
        Ok(latest)
    }

    /// How many anonymous posts older than `cutoff` still carry an author
    /// link.
    pub async fn count_expungeable_post_authors(
        &self,
        cutoff: NaiveDateTime,
    ) -> Result<u64, DbErr> {
        posts::Entity::find()
            .filter(posts::Column::Anonymous.eq(true))
            .filter(posts::Column::AuthorId.is_not_null())
            .filter(posts::Column::CreatedAt.lt(cutoff))
            .count(&self.db)
            .await
    }

    /// Severs the author link on anonymous posts older than `cutoff`.
    pub async fn expunge_post_authors(&self, cutoff: NaiveDateTime) -> Result<u64, DbErr> {
        let result = posts::Entity::update_many()
            .col_expr(posts::Column::AuthorId, Expr::value(Option::<i32>::None))
            .filter(posts::Column::Anonymous.eq(true))
            .filter(posts::Column::AuthorId.is_not_null())
            .filter(posts::Column::CreatedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
