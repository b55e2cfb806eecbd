//! Pure moderation decision rules.
//!
//! Everything in here is deterministic: callers pass the current time in
//! explicitly, nothing touches the database. The workflow modules gather
//! the rows and feed them through these functions.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orm::user_interactions::InteractionKind;
use crate::orm::users::Role;

/// One configured sliding-window limit. Stored as Json on site_config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InteractionLimit {
    pub id: Uuid,
    pub timeframe_ms: i64,
    pub max_interactions: u32,
    /// Which interaction kinds this window applies to. Each listed kind
    /// is gated separately against its own history.
    pub kinds: Vec<InteractionKind>,
}

/// A recent action from the user's interaction ring.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interaction {
    pub kind: InteractionKind,
    pub at: NaiveDateTime,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RateLimitDecision {
    Allowed,
    /// Earliest moment at which every violated limit has released.
    Denied { retry_at: NaiveDateTime },
}

/// Evaluates every limit covering `kind` against the recent interactions.
///
/// A limit is violated when the interactions of the requested kind inside
/// its window already number `max_interactions` or more; a limit listing
/// several kinds gates each of them independently. Each violated limit
/// releases when its oldest in-window interaction ages out; the denial
/// reports the latest of those release times.
pub fn evaluate_rate_limit(
    kind: InteractionKind,
    recent: &[Interaction],
    limits: &[InteractionLimit],
    now: NaiveDateTime,
) -> RateLimitDecision {
    let mut retry_at: Option<NaiveDateTime> = None;

    for limit in limits.iter().filter(|l| l.kinds.contains(&kind)) {
        let timeframe = Duration::milliseconds(limit.timeframe_ms);
        let cutoff = now - timeframe;
        let in_window: Vec<&Interaction> = recent
            .iter()
            .filter(|i| i.kind == kind && i.at >= cutoff)
            .collect();
        if (in_window.len() as u32) < limit.max_interactions {
            continue;
        }
        if let Some(oldest) = in_window.iter().map(|i| i.at).min() {
            let release = oldest + timeframe;
            retry_at = Some(match retry_at {
                Some(current) => current.max(release),
                None => release,
            });
        }
    }

    match retry_at {
        Some(retry_at) => RateLimitDecision::Denied { retry_at },
        None => RateLimitDecision::Allowed,
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeletionRequest {
    pub deletor_role: Role,
    pub deletor_is_author: bool,
    /// The author's live role. Orphaned content (author row gone or
    /// expunged) resolves to `Role::User`.
    pub author_role: Role,
    pub content_is_anonymous: bool,
    pub content_created_at: NaiveDateTime,
    /// Age ceiling from config for this content type.
    pub max_age: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeletionDecision {
    Allow,
    Deny(DeletionDenial),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeletionDenial {
    TooOldToDelete,
    NotOwner,
    UnauthorizedDeletion,
}

/// Deletion authorization. The age gate is absolute and checked before any
/// role logic, so even admins cannot delete content past the ceiling.
pub fn authorize_deletion(req: &DeletionRequest, now: NaiveDateTime) -> DeletionDecision {
    if now - req.content_created_at > req.max_age {
        return DeletionDecision::Deny(DeletionDenial::TooOldToDelete);
    }
    if req.deletor_role == Role::User {
        return if req.deletor_is_author {
            DeletionDecision::Allow
        } else {
            DeletionDecision::Deny(DeletionDenial::NotOwner)
        };
    }
    // Staff from here down. Anonymous content is fair game for any staff
    // member without consulting the author's (hidden) role.
    if req.content_is_anonymous {
        return DeletionDecision::Allow;
    }
    if req.deletor_role == Role::Moderator && req.author_role == Role::Admin {
        return DeletionDecision::Deny(DeletionDenial::UnauthorizedDeletion);
    }
    DeletionDecision::Allow
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SuspensionRequest {
    pub suspender_role: Role,
    pub suspendee_role: Role,
    /// None for direct suspensions not tied to a piece of content.
    pub content: Option<ContentContext>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContentContext {
    pub anonymous: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SuspensionDecision {
    Suspend,
    /// The request must look successful to the caller but apply nothing,
    /// so a moderator cannot probe who authored anonymous content.
    SilentlyIgnore,
    Disallow,
}

/// Suspension authorization. Plain users can never suspend. Outside of
/// anonymous content the hierarchy is strict: the suspender must outrank
/// the suspendee. Anonymous content downgrades would-be hierarchy
/// violations to `SilentlyIgnore` instead of `Disallow`, because a
/// distinguishable refusal would reveal the hidden author's rank.
pub fn authorize_suspension(req: &SuspensionRequest) -> SuspensionDecision {
    if req.suspender_role == Role::User {
        return SuspensionDecision::Disallow;
    }
    let outranks = req.suspender_role.rank() > req.suspendee_role.rank();
    match req.content {
        Some(ContentContext { anonymous: true }) => {
            if outranks {
                SuspensionDecision::Suspend
            } else {
                SuspensionDecision::SilentlyIgnore
            }
        }
        _ => {
            if outranks {
                SuspensionDecision::Suspend
            } else {
                SuspensionDecision::Disallow
            }
        }
    }
}

/// End of the currently pointed-at suspension.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SuspensionEnd {
    Permanent,
    Until(NaiveDateTime),
}

/// Longest-suspension-wins merge test. `current` is the end of the
/// suspension the user's pointer currently references (if any), `new` is
/// the proposed duration (None meaning permanent). Permanent never loses,
/// including against another permanent.
pub fn new_suspension_is_longer(
    current: Option<SuspensionEnd>,
    new: Option<Duration>,
    now: NaiveDateTime,
) -> bool {
    match current {
        None => true,
        Some(SuspensionEnd::Permanent) => false,
        Some(SuspensionEnd::Until(current_until)) => match new {
            None => true,
            Some(duration) => now + duration > current_until,
        },
    }
}
