//! User lifecycle and suspension workflows.
//!
//! Suspensions are append-only history rows; `users.current_suspension_id`
//! points at the active one. A pointee whose release time has passed means
//! "not suspended" and is resolved wherever the pointer is read, so no
//! background job is needed to un-suspend anyone.

use chrono::{Duration, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use sea_orm::entity::*;
use sea_orm::query::*;
use sea_orm::sea_query::Expr;
use sea_orm::{ConnectionTrait, DbErr, PaginatorTrait, Set, TransactionTrait};
use thiserror::Error;

use crate::config::{ConfigError, ConfigSnapshot};
use crate::moderation::{self, LedgerEntry};
use crate::orm::user_interactions::{self, InteractionKind};
use crate::orm::users::{self, Role};
use crate::orm::{comments, otcs, posts, suspension_lifts, suspensions};
use crate::rules::{
    authorize_suspension, new_suspension_is_longer, ContentContext, Interaction,
    SuspensionDecision, SuspensionEnd, SuspensionRequest,
};
use crate::Board;

static USERNAME_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{3,20}$").unwrap());

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsernameRejection {
    InvalidUsername,
    DisallowedUsername,
}

/// Checks the base shape, then the configurable disallowed patterns
/// (matched case-insensitively). Patterns that fail to compile are
/// skipped with a warning rather than locking registration up.
pub fn validate_username(
    username: &str,
    disallowed_patterns: &[String],
) -> Result<(), UsernameRejection> {
    if !USERNAME_SHAPE.is_match(username) {
        return Err(UsernameRejection::InvalidUsername);
    }
    for pattern in disallowed_patterns {
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => {
                if re.is_match(username) {
                    return Err(UsernameRejection::DisallowedUsername);
                }
            }
            Err(err) => {
                log::warn!("skipping unparseable username pattern {pattern:?}: {err}");
            }
        }
    }
    Ok(())
}

/// Resolves the user's suspension pointer. A missing pointee or a past
/// release time both read as "not suspended"; the stale pointer itself is
/// left in place.
pub(crate) async fn active_suspension<C: ConnectionTrait>(
    conn: &C,
    user: &users::Model,
    now: NaiveDateTime,
) -> Result<Option<suspensions::Model>, DbErr> {
    let Some(suspension_id) = user.current_suspension_id else {
        return Ok(None);
    };
    let Some(row) = suspensions::Entity::find_by_id(suspension_id).one(conn).await? else {
        return Ok(None);
    };
    match row.suspended_until {
        Some(until) if until <= now => Ok(None),
        _ => Ok(Some(row)),
    }
}

pub(crate) fn suspension_end(row: &suspensions::Model) -> SuspensionEnd {
    match row.suspended_until {
        None => SuspensionEnd::Permanent,
        Some(until) => SuspensionEnd::Until(until),
    }
}

/// Writes the suspension history row and repoints the user at it. The
/// caller owns authorization, merge policy, and ledger logging.
pub(crate) async fn apply_suspension<C: ConnectionTrait>(
    conn: &C,
    now: NaiveDateTime,
    suspendee: &users::Model,
    suspended_by: i32,
    reason: &str,
    duration: Option<Duration>,
) -> Result<suspensions::Model, DbErr> {
    let row = suspensions::ActiveModel {
        user_id: Set(suspendee.id),
        suspended_by: Set(Some(suspended_by)),
        reason: Set(reason.to_string()),
        suspended_until: Set(duration.map(|d| now + d)),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    let mut user: users::ActiveModel = suspendee.clone().into();
    user.current_suspension_id = Set(Some(row.id));
    user.update(conn).await?;
    Ok(row)
}

/// Loads the interaction ring for rate-limit evaluation.
pub(crate) async fn recent_interactions<C: ConnectionTrait>(
    conn: &C,
    user_id: i32,
) -> Result<Vec<Interaction>, DbErr> {
    let rows = user_interactions::Entity::find()
        .filter(user_interactions::Column::UserId.eq(user_id))
        .all(conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| Interaction {
            kind: row.kind,
            at: row.created_at,
        })
        .collect())
}

/// Appends an interaction and prunes the ring, oldest first: anything past
/// the age cutoff goes, then anything beyond the count cap. Runs in the
/// same transaction as the content mutation it records.
pub(crate) async fn record_interaction<C: ConnectionTrait>(
    conn: &C,
    snapshot: &ConfigSnapshot,
    now: NaiveDateTime,
    user_id: i32,
    kind: InteractionKind,
) -> Result<(), DbErr> {
    user_interactions::ActiveModel {
        user_id: Set(user_id),
        kind: Set(kind),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    let cutoff = now - snapshot.max_interaction_age;
    user_interactions::Entity::delete_many()
        .filter(user_interactions::Column::UserId.eq(user_id))
        .filter(user_interactions::Column::CreatedAt.lt(cutoff))
        .exec(conn)
        .await?;

    let count = user_interactions::Entity::find()
        .filter(user_interactions::Column::UserId.eq(user_id))
        .count(conn)
        .await?;
    if count > snapshot.max_interactions_to_keep {
        let excess = count - snapshot.max_interactions_to_keep;
        let stale: Vec<i32> = user_interactions::Entity::find()
            .filter(user_interactions::Column::UserId.eq(user_id))
            .order_by_asc(user_interactions::Column::CreatedAt)
            .limit(excess)
            .all(conn)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();
        user_interactions::Entity::delete_many()
            .filter(user_interactions::Column::Id.is_in(stale))
            .exec(conn)
            .await?;
    }
    Ok(())
}

/// Outcome of a suspension request that was authorized.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SuspensionOutcome {
    Applied { until: Option<NaiveDateTime> },
    /// The user already sits under an equal or longer suspension.
    NotAppliedCurrentIsLonger,
}

#[derive(Clone, Debug)]
pub struct SuspendUser {
    pub suspendee_id: i32,
    pub suspended_by: i32,
    pub reason: String,
    /// None means permanent.
    pub duration: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum SuspendUserError {
    #[error("user_not_found")]
    UserNotFound,
    #[error("unauthorized_suspension")]
    UnauthorizedSuspension,
    #[error("unknown_error")]
    Internal(#[from] DbErr),
}

#[derive(Debug, Error)]
pub enum LiftSuspensionError {
    #[error("user_not_found")]
    UserNotFound,
    #[error("no_active_suspension")]
    NoActiveSuspension,
    #[error("unauthorized_suspension")]
    UnauthorizedSuspension,
    #[error("unknown_error")]
    Internal(#[from] DbErr),
}

/// What a suspension check reports to callers.
#[derive(Clone, Debug, PartialEq)]
pub enum SuspensionState {
    NotSuspended,
    Suspended {
        reason: String,
        /// None means permanent.
        until: Option<NaiveDateTime>,
    },
}

#[derive(Debug, Error)]
pub enum UserLookupError {
    #[error("user_not_found")]
    UserNotFound,
    #[error("unknown_error")]
    Internal(#[from] DbErr),
}

#[derive(Clone, Debug)]
pub struct NewRegistration {
    pub username: String,
    /// Already hashed by the caller.
    pub password_hash: String,
    /// One-time registration code.
    pub code: String,
}

#[derive(Debug, Error)]
pub enum RegisterUserError {
    #[error("invalid_code")]
    InvalidCode,
    #[error("username_taken")]
    UsernameTaken,
    #[error("invalid_username")]
    InvalidUsername,
    #[error("disallowed_username")]
    DisallowedUsername,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown_error")]
    Internal(#[from] DbErr),
}

impl From<UsernameRejection> for RegisterUserError {
    fn from(rejection: UsernameRejection) -> Self {
        match rejection {
            UsernameRejection::InvalidUsername => RegisterUserError::InvalidUsername,
            UsernameRejection::DisallowedUsername => RegisterUserError::DisallowedUsername,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChangeUsernameError {
    #[error("user_not_found")]
    UserNotFound,
    #[error("username_taken")]
    UsernameTaken,
    #[error("invalid_username")]
    InvalidUsername,
    #[error("disallowed_username")]
    DisallowedUsername,
    #[error("username_change_not_allowed")]
    NotAllowed,
    #[error("username_changed_too_recently")]
    ChangedTooRecently { retry_at: NaiveDateTime },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown_error")]
    Internal(#[from] DbErr),
}

impl From<UsernameRejection> for ChangeUsernameError {
    fn from(rejection: UsernameRejection) -> Self {
        match rejection {
            UsernameRejection::InvalidUsername => ChangeUsernameError::InvalidUsername,
            UsernameRejection::DisallowedUsername => ChangeUsernameError::DisallowedUsername,
        }
    }
}

impl Board {
    /// Direct (content-free) suspension. Longest suspension wins: a
    /// shorter request against an already-suspended user succeeds without
    /// changing anything.
    pub async fn suspend_user(
        &self,
        req: SuspendUser,
    ) -> Result<SuspensionOutcome, SuspendUserError> {
        let now = self.now();
        let txn = self.db.begin().await?;

        let suspender = users::Entity::find_by_id(req.suspended_by)
            .one(&txn)
            .await?
            .ok_or(SuspendUserError::UserNotFound)?;
        let suspendee = users::Entity::find_by_id(req.suspendee_id)
            .one(&txn)
            .await?
            .ok_or(SuspendUserError::UserNotFound)?;

        let decision = authorize_suspension(&SuspensionRequest {
            suspender_role: suspender.role,
            suspendee_role: suspendee.role,
            content: None,
        });
        if decision != SuspensionDecision::Suspend {
            return Err(SuspendUserError::UnauthorizedSuspension);
        }

        let current = active_suspension(&txn, &suspendee, now).await?;
        if !new_suspension_is_longer(
            current.as_ref().map(suspension_end),
            req.duration,
            now,
        ) {
            txn.commit().await?;
            return Ok(SuspensionOutcome::NotAppliedCurrentIsLonger);
        }

        let row = apply_suspension(&txn, now, &suspendee, suspender.id, &req.reason, req.duration)
            .await?;
        moderation::append_entry(
            &txn,
            now,
            suspender.id,
            LedgerEntry::Suspension {
                target_user_id: suspendee.id,
                reason: &req.reason,
                duration: req.duration,
            },
        )
        .await?;
        txn.commit().await?;
        Ok(SuspensionOutcome::Applied {
            until: row.suspended_until,
        })
    }

    /// Clears a user's suspension pointer. Requires the lifter to outrank
    /// the suspendee, same as imposing one.
    pub async fn lift_suspension(
        &self,
        user_id: i32,
        lifted_by: i32,
        reason: Option<String>,
    ) -> Result<(), LiftSuspensionError> {
        let now = self.now();
        let txn = self.db.begin().await?;

        let lifter = users::Entity::find_by_id(lifted_by)
            .one(&txn)
            .await?
            .ok_or(LiftSuspensionError::UserNotFound)?;
        let suspendee = users::Entity::find_by_id(user_id)
            .one(&txn)
            .await?
            .ok_or(LiftSuspensionError::UserNotFound)?;

        let decision = authorize_suspension(&SuspensionRequest {
            suspender_role: lifter.role,
            suspendee_role: suspendee.role,
            content: None,
        });
        if decision != SuspensionDecision::Suspend {
            return Err(LiftSuspensionError::UnauthorizedSuspension);
        }
        if suspendee.current_suspension_id.is_none() {
            return Err(LiftSuspensionError::NoActiveSuspension);
        }

        let mut active: users::ActiveModel = suspendee.clone().into();
        active.current_suspension_id = Set(None);
        active.update(&txn).await?;

        suspension_lifts::ActiveModel {
            user_id: Set(suspendee.id),
            lifted_by: Set(Some(lifter.id)),
            reason: Set(reason.clone()),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        moderation::append_entry(
            &txn,
            now,
            lifter.id,
            LedgerEntry::SuspensionLift {
                target_user_id: suspendee.id,
                reason: reason.as_deref(),
            },
        )
        .await?;
        txn.commit().await?;
        Ok(())
    }

    /// Current suspension state, with staleness resolved.
    pub async fn user_suspension(&self, user_id: i32) -> Result<SuspensionState, UserLookupError> {
        let now = self.now();
        let user = users::Entity::find_by_id(user_id)
            .one(&self.db)
            .await?
            .ok_or(UserLookupError::UserNotFound)?;
        match active_suspension(&self.db, &user, now).await? {
            None => Ok(SuspensionState::NotSuspended),
            Some(row) => Ok(SuspensionState::Suspended {
                reason: row.reason,
                until: row.suspended_until,
            }),
        }
    }

    /// Self-service registration. Consumes a one-time code inside the
    /// same transaction that creates the account, so a failed attempt
    /// (taken username, for instance) rolls back and leaves the code
    /// usable.
    pub async fn register_user(
        &self,
        registration: NewRegistration,
    ) -> Result<users::Model, RegisterUserError> {
        let now = self.now();
        let snapshot = self.config.get(&self.db, now).await?;
        validate_username(
            &registration.username,
            &snapshot.disallowed_username_patterns,
        )?;

        let txn = self.db.begin().await?;
        let code = otcs::Entity::find()
            .filter(otcs::Column::Code.eq(registration.code.as_str()))
            .one(&txn)
            .await?
            .ok_or(RegisterUserError::InvalidCode)?;
        if code.expires_at <= now {
            return Err(RegisterUserError::InvalidCode);
        }
        otcs::Entity::delete_by_id(code.id).exec(&txn).await?;

        let taken = users::Entity::find()
            .filter(users::Column::Username.eq(registration.username.as_str()))
            .one(&txn)
            .await?
            .is_some();
        if taken {
            return Err(RegisterUserError::UsernameTaken);
        }

        let user = users::ActiveModel {
            username: Set(registration.username),
            password_hash: Set(registration.password_hash),
            role: Set(Role::User),
            can_change_username: Set(true),
            last_username_change_at: Set(None),
            current_suspension_id: Set(None),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;
        Ok(user)
    }

    /// Admin provisioning path (no registration code). Used to create
    /// moderators and admins, or plain users out of band.
    pub async fn create_user(
        &self,
        username: String,
        password_hash: String,
        role: Role,
    ) -> Result<users::Model, RegisterUserError> {
        let now = self.now();
        let snapshot = self.config.get(&self.db, now).await?;
        validate_username(&username, &snapshot.disallowed_username_patterns)?;

        let txn = self.db.begin().await?;
        let taken = users::Entity::find()
            .filter(users::Column::Username.eq(username.as_str()))
            .one(&txn)
            .await?
            .is_some();
        if taken {
            return Err(RegisterUserError::UsernameTaken);
        }
        let user = users::ActiveModel {
            username: Set(username),
            password_hash: Set(password_hash),
            role: Set(role),
            can_change_username: Set(true),
            last_username_change_at: Set(None),
            current_suspension_id: Set(None),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;
        Ok(user)
    }

    /// Renames a user and backfills the denormalized author snapshot on
    /// their non-anonymous posts and comments in the same transaction.
    /// Anonymous content keeps its "Anonymous" snapshot untouched.
    pub async fn change_username(
        &self,
        user_id: i32,
        new_username: String,
    ) -> Result<users::Model, ChangeUsernameError> {
        let now = self.now();
        let snapshot = self.config.get(&self.db, now).await?;

        let txn = self.db.begin().await?;
        let user = users::Entity::find_by_id(user_id)
            .one(&txn)
            .await?
            .ok_or(ChangeUsernameError::UserNotFound)?;
        if !user.can_change_username {
            return Err(ChangeUsernameError::NotAllowed);
        }
        if user.role != Role::Admin {
            if let Some(last) = user.last_username_change_at {
                let retry_at = last + snapshot.min_username_change_wait;
                if now < retry_at {
                    return Err(ChangeUsernameError::ChangedTooRecently { retry_at });
                }
            }
        }
        validate_username(&new_username, &snapshot.disallowed_username_patterns)?;

        let taken = users::Entity::find()
            .filter(users::Column::Username.eq(new_username.as_str()))
            .filter(users::Column::Id.ne(user_id))
            .one(&txn)
            .await?
            .is_some();
        if taken {
            return Err(ChangeUsernameError::UsernameTaken);
        }

        let mut active: users::ActiveModel = user.into();
        active.username = Set(new_username.clone());
        active.last_username_change_at = Set(Some(now));
        let updated = active.update(&txn).await?;

        posts::Entity::update_many()
            .col_expr(
                posts::Column::AuthorUsername,
                Expr::value(new_username.clone()),
            )
            .filter(posts::Column::AuthorId.eq(user_id))
            .filter(posts::Column::Anonymous.eq(false))
            .exec(&txn)
            .await?;
        comments::Entity::update_many()
            .col_expr(comments::Column::AuthorUsername, Expr::value(new_username))
            .filter(comments::Column::AuthorId.eq(user_id))
            .filter(comments::Column::Anonymous.eq(false))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(updated)
    }
}

/// Shared gate used by the content workflows: suspension context for a
/// content author being suspended as part of a deletion.
pub(crate) fn content_suspension_request(
    suspender: &users::Model,
    suspendee: &users::Model,
    content_is_anonymous: bool,
) -> SuspensionRequest {
    SuspensionRequest {
        suspender_role: suspender.role,
        suspendee_role: suspendee.role,
        content: Some(ContentContext {
            anonymous: content_is_anonymous,
        }),
    }
}
