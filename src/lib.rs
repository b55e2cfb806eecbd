//! Moderation and consistency core for an anonymous content board.
//!
//! Users post, comment, and vote, optionally anonymously; moderators and
//! admins delete content and suspend authors under a strict role
//! hierarchy that never leaks who wrote anonymous content. Every
//! multi-row workflow runs in a single database transaction; webhook
//! mirroring happens after commit and is best-effort.
//!
//! [`Board`] is the entry point: it owns the database handle, the config
//! snapshot cache, the clock, and the webhook client. Workflow methods
//! live in per-concern modules (`posts`, `comments`, `votes`, `users`,
//! `moderation`, `otc`).

pub mod clock;
pub mod comments;
pub mod config;
pub mod moderation;
pub mod orm;
pub mod otc;
pub mod posts;
pub mod rules;
pub mod users;
pub mod votes;
pub mod webhooks;

use std::sync::Arc;

use chrono::NaiveDateTime;
use sea_orm::DatabaseConnection;

use crate::clock::{Clock, SystemClock};
use crate::config::ConfigManager;
use crate::webhooks::WebhookNotifier;

pub struct Board {
    pub db: DatabaseConnection,
    pub config: ConfigManager,
    clock: Arc<dyn Clock>,
    webhooks: WebhookNotifier,
}

impl Board {
    pub fn new(db: DatabaseConnection) -> Self {
        Board {
            db,
            config: ConfigManager::default(),
            clock: Arc::new(SystemClock),
            webhooks: WebhookNotifier::new(),
        }
    }

    /// Swaps in a different time source (tests pin the clock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: ConfigManager) -> Self {
        self.config = config;
        self
    }

    pub fn with_webhooks(mut self, webhooks: WebhookNotifier) -> Self {
        self.webhooks = webhooks;
        self
    }

    pub(crate) fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }
}
