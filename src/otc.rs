//! One-time registration codes.
//!
//! Codes are random alphanumerics, unique at the database level. Issuing
//! generates then inserts, retrying on a unique-violation a bounded number
//! of times. Redemption happens inside the registration transaction (see
//! `users::register_user`), so a code can never be spent twice.

use chrono::Duration;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sea_orm::entity::*;
use sea_orm::query::*;
use sea_orm::{DbErr, Set, SqlErr};
use thiserror::Error;

use crate::orm::otcs;
use crate::Board;

const CODE_LENGTH: usize = 10;
const MAX_GENERATION_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum IssueCodeError {
    #[error("code generation kept colliding")]
    GenerationExhausted,
    #[error("unknown_error")]
    Internal(#[from] DbErr),
}

fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LENGTH)
        .map(char::from)
        .collect()
}

impl Board {
    /// Mints a fresh registration code valid for `ttl`.
    pub async fn issue_registration_code(
        &self,
        ttl: Duration,
    ) -> Result<otcs::Model, IssueCodeError> {
        let now = self.now();
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let attempt = otcs::ActiveModel {
                code: Set(generate_code()),
                expires_at: Set(now + ttl),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(&self.db)
            .await;
            match attempt {
                Ok(code) => return Ok(code),
                Err(err)
                    if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) =>
                {
                    continue
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(IssueCodeError::GenerationExhausted)
    }

    /// Deletes codes past their expiry. Returns how many were removed.
    pub async fn purge_expired_codes(&self) -> Result<u64, DbErr> {
        let now = self.now();
        let result = otcs::Entity::delete_many()
            .filter(otcs::Column::ExpiresAt.lte(now))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
