//! Site configuration with a bounded-staleness snapshot cache.
//!
//! The config lives in a single `site_config` row. Readers get an
//! immutable [`ConfigSnapshot`] (one `ArcSwap` load, no locking); the
//! snapshot is refreshed from the database once it is older than the
//! configured cache age. Admin mutators write the row and then
//! invalidate-and-reload, so a successful mutation is visible to the next
//! reader immediately rather than after the TTL.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{Duration, NaiveDateTime};
use sea_orm::entity::*;
use sea_orm::query::*;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Set, TransactionTrait};
use thiserror::Error;
use uuid::Uuid;

use crate::orm::site_config;
use crate::rules::InteractionLimit;

/// Default snapshot lifetime (3 hours).
pub const DEFAULT_CACHE_AGE_MS: i64 = 3 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("site configuration row is missing")]
    NotSeeded,
    #[error("interaction limit not found")]
    LimitNotFound,
    #[error("malformed site configuration: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Db(#[from] DbErr),
}

/// Immutable view of the site configuration, plus the instant it was read.
#[derive(Clone, Debug)]
pub struct ConfigSnapshot {
    pub interaction_limits: Vec<InteractionLimit>,
    pub posting_rules: Vec<String>,
    pub webhook_urls: Vec<String>,
    pub disallowed_username_patterns: Vec<String>,
    pub max_interactions_to_keep: u64,
    pub max_interaction_age: Duration,
    pub max_post_length: usize,
    pub max_comment_length: usize,
    pub max_post_age_to_delete: Duration,
    pub max_comment_age_to_delete: Duration,
    pub max_post_age_to_comment: Duration,
    pub min_username_change_wait: Duration,
    pub max_moderation_log_age: Duration,
    pub fetched_at: NaiveDateTime,
}

impl ConfigSnapshot {
    fn from_row(row: site_config::Model, fetched_at: NaiveDateTime) -> Result<Self, ConfigError> {
        Ok(ConfigSnapshot {
            interaction_limits: serde_json::from_value(row.interaction_limits)?,
            posting_rules: serde_json::from_value(row.posting_rules)?,
            webhook_urls: serde_json::from_value(row.webhook_urls)?,
            disallowed_username_patterns: serde_json::from_value(
                row.disallowed_username_patterns,
            )?,
            max_interactions_to_keep: row.max_interactions_to_keep.max(0) as u64,
            max_interaction_age: Duration::milliseconds(row.max_interaction_age_ms),
            max_post_length: row.max_post_length.max(0) as usize,
            max_comment_length: row.max_comment_length.max(0) as usize,
            max_post_age_to_delete: Duration::milliseconds(row.max_post_age_to_delete_ms),
            max_comment_age_to_delete: Duration::milliseconds(row.max_comment_age_to_delete_ms),
            max_post_age_to_comment: Duration::milliseconds(row.max_post_age_to_comment_ms),
            min_username_change_wait: Duration::milliseconds(row.min_username_change_wait_ms),
            max_moderation_log_age: Duration::milliseconds(row.max_moderation_log_age_ms),
            fetched_at,
        })
    }
}

/// Scalar limits, updated wholesale by [`ConfigManager::set_limits`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LimitSettings {
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

impl Default for LimitSettings {
    fn default() -> Self {
        const DAY_MS: i64 = 24 * 60 * 60 * 1000;
        LimitSettings {
            max_interactions_to_keep: 100,
            max_interaction_age_ms: 2 * DAY_MS,
            max_post_length: 5000,
            max_comment_length: 1000,
            max_post_age_to_delete_ms: 7 * DAY_MS,
            max_comment_age_to_delete_ms: 7 * DAY_MS,
            max_post_age_to_comment_ms: 30 * DAY_MS,
            min_username_change_wait_ms: 7 * DAY_MS,
            max_moderation_log_age_ms: 90 * DAY_MS,
        }
    }
}

/// Which Json string-list column a list mutation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StringListSetting {
    PostingRules,
    WebhookUrls,
    DisallowedUsernamePatterns,
}

pub struct ConfigManager {
    cache: ArcSwapOption<ConfigSnapshot>,
    max_cache_age: Duration,
}

impl Default for ConfigManager {
    fn default() -> Self {
        ConfigManager::new(Duration::milliseconds(DEFAULT_CACHE_AGE_MS))
    }
}

impl ConfigManager {
    pub fn new(max_cache_age: Duration) -> Self {
        ConfigManager {
            cache: ArcSwapOption::const_empty(),
            max_cache_age,
        }
    }

    /// Returns the cached snapshot, refreshing it first if it is missing
    /// or older than the cache age.
    pub async fn get(
        &self,
        db: &DatabaseConnection,
        now: NaiveDateTime,
    ) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        if let Some(snapshot) = self.cached(now) {
            return Ok(snapshot);
        }
        self.refresh(db, now).await
    }

    /// Bypasses the cache entirely.
    pub async fn get_fresh(
        &self,
        db: &DatabaseConnection,
        now: NaiveDateTime,
    ) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        self.refresh(db, now).await
    }

    fn cached(&self, now: NaiveDateTime) -> Option<Arc<ConfigSnapshot>> {
        let snapshot = self.cache.load_full()?;
        if now - snapshot.fetched_at < self.max_cache_age {
            Some(snapshot)
        } else {
            None
        }
    }

    async fn refresh<C: ConnectionTrait>(
        &self,
        conn: &C,
        now: NaiveDateTime,
    ) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        let row = site_config::Entity::find()
            .one(conn)
            .await?
            .ok_or(ConfigError::NotSeeded)?;
        let snapshot = Arc::new(ConfigSnapshot::from_row(row, now)?);
        self.cache.store(Some(snapshot.clone()));
        Ok(snapshot)
    }

    fn invalidate(&self) {
        self.cache.store(None);
    }

    /// Inserts the default configuration row if none exists yet.
    pub async fn seed_defaults(
        &self,
        db: &DatabaseConnection,
        now: NaiveDateTime,
    ) -> Result<(), ConfigError> {
        let txn = db.begin().await?;
        if site_config::Entity::find().one(&txn).await?.is_none() {
            let limits = LimitSettings::default();
            site_config::ActiveModel {
                interaction_limits: Set(serde_json::json!([])),
                posting_rules: Set(serde_json::json!([])),
                webhook_urls: Set(serde_json::json!([])),
                disallowed_username_patterns: Set(serde_json::json!([])),
                max_interactions_to_keep: Set(limits.max_interactions_to_keep),
                max_interaction_age_ms: Set(limits.max_interaction_age_ms),
                max_post_length: Set(limits.max_post_length),
                max_comment_length: Set(limits.max_comment_length),
                max_post_age_to_delete_ms: Set(limits.max_post_age_to_delete_ms),
                max_comment_age_to_delete_ms: Set(limits.max_comment_age_to_delete_ms),
                max_post_age_to_comment_ms: Set(limits.max_post_age_to_comment_ms),
                min_username_change_wait_ms: Set(limits.min_username_change_wait_ms),
                max_moderation_log_age_ms: Set(limits.max_moderation_log_age_ms),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
        }
        txn.commit().await?;
        self.invalidate();
        self.refresh(db, now).await?;
        Ok(())
    }

    pub async fn add_interaction_limit(
        &self,
        db: &DatabaseConnection,
        now: NaiveDateTime,
        limit: InteractionLimit,
    ) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        self.mutate_limits(db, now, |limits| {
            limits.push(limit);
            Ok(())
        })
        .await
    }

    pub async fn update_interaction_limit(
        &self,
        db: &DatabaseConnection,
        now: NaiveDateTime,
        limit: InteractionLimit,
    ) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        self.mutate_limits(db, now, |limits| {
            let slot = limits
                .iter_mut()
                .find(|l| l.id == limit.id)
                .ok_or(ConfigError::LimitNotFound)?;
            *slot = limit;
            Ok(())
        })
        .await
    }

    pub async fn remove_interaction_limit(
        &self,
        db: &DatabaseConnection,
        now: NaiveDateTime,
        limit_id: Uuid,
    ) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        self.mutate_limits(db, now, |limits| {
            let before = limits.len();
            limits.retain(|l| l.id != limit_id);
            if limits.len() == before {
                return Err(ConfigError::LimitNotFound);
            }
            Ok(())
        })
        .await
    }

    async fn mutate_limits<F>(
        &self,
        db: &DatabaseConnection,
        now: NaiveDateTime,
        mutate: F,
    ) -> Result<Arc<ConfigSnapshot>, ConfigError>
    where
        F: FnOnce(&mut Vec<InteractionLimit>) -> Result<(), ConfigError>,
    {
        let txn = db.begin().await?;
        let row = site_config::Entity::find()
            .one(&txn)
            .await?
            .ok_or(ConfigError::NotSeeded)?;
        let mut limits: Vec<InteractionLimit> =
            serde_json::from_value(row.interaction_limits.clone())?;
        mutate(&mut limits)?;
        let mut active: site_config::ActiveModel = row.into();
        active.interaction_limits = Set(serde_json::to_value(&limits)?);
        active.update(&txn).await?;
        txn.commit().await?;
        self.invalidate();
        self.refresh(db, now).await
    }

    pub async fn push_string_setting(
        &self,
        db: &DatabaseConnection,
        now: NaiveDateTime,
        setting: StringListSetting,
        value: String,
    ) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        self.mutate_string_list(db, now, setting, |list| {
            if !list.contains(&value) {
                list.push(value);
            }
        })
        .await
    }

    pub async fn remove_string_setting(
        &self,
        db: &DatabaseConnection,
        now: NaiveDateTime,
        setting: StringListSetting,
        value: &str,
    ) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        self.mutate_string_list(db, now, setting, |list| {
            list.retain(|v| v != value);
        })
        .await
    }

    async fn mutate_string_list<F>(
        &self,
        db: &DatabaseConnection,
        now: NaiveDateTime,
        setting: StringListSetting,
        mutate: F,
    ) -> Result<Arc<ConfigSnapshot>, ConfigError>
    where
        F: FnOnce(&mut Vec<String>),
    {
        let txn = db.begin().await?;
        let row = site_config::Entity::find()
            .one(&txn)
            .await?
            .ok_or(ConfigError::NotSeeded)?;
        let current = match setting {
            StringListSetting::PostingRules => &row.posting_rules,
            StringListSetting::WebhookUrls => &row.webhook_urls,
            StringListSetting::DisallowedUsernamePatterns => &row.disallowed_username_patterns,
        };
        let mut list: Vec<String> = serde_json::from_value(current.clone())?;
        mutate(&mut list);
        let value = serde_json::to_value(&list)?;
        let mut active: site_config::ActiveModel = row.into();
        match setting {
            StringListSetting::PostingRules => active.posting_rules = Set(value),
            StringListSetting::WebhookUrls => active.webhook_urls = Set(value),
            StringListSetting::DisallowedUsernamePatterns => {
                active.disallowed_username_patterns = Set(value)
            }
        }
        active.update(&txn).await?;
        txn.commit().await?;
        self.invalidate();
        self.refresh(db, now).await
    }

    pub async fn set_limits(
        &self,
        db: &DatabaseConnection,
        now: NaiveDateTime,
        limits: LimitSettings,
    ) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        let txn = db.begin().await?;
        let row = site_config::Entity::find()
            .one(&txn)
            .await?
            .ok_or(ConfigError::NotSeeded)?;
        let mut active: site_config::ActiveModel = row.into();
        active.max_interactions_to_keep = Set(limits.max_interactions_to_keep);
        active.max_interaction_age_ms = Set(limits.max_interaction_age_ms);
        active.max_post_length = Set(limits.max_post_length);
        active.max_comment_length = Set(limits.max_comment_length);
        active.max_post_age_to_delete_ms = Set(limits.max_post_age_to_delete_ms);
        active.max_comment_age_to_delete_ms = Set(limits.max_comment_age_to_delete_ms);
        active.max_post_age_to_comment_ms = Set(limits.max_post_age_to_comment_ms);
        active.min_username_change_wait_ms = Set(limits.min_username_change_wait_ms);
        active.max_moderation_log_age_ms = Set(limits.max_moderation_log_age_ms);
        active.update(&txn).await?;
        txn.commit().await?;
        self.invalidate();
        self.refresh(db, now).await
    }
}
