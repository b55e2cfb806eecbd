//! Shared fixtures for the integration suite.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use sea_orm::{entity::*, DatabaseConnection, DbErr, Set};

use pasquil::clock::FixedClock;
use pasquil::orm::posts::{self, AuthorRole};
use pasquil::orm::users::{self, Role};
use pasquil::Board;

/// Frozen instant every test board starts at.
pub fn test_now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

/// Board pinned to [`test_now`], with the default config row seeded.
pub async fn seeded_board(db: &DatabaseConnection) -> Board {
    let board = board_at(db, test_now());
    board
        .config
        .seed_defaults(&board.db, test_now())
        .await
        .expect("failed to seed site config");
    board
}

/// Board pinned to an arbitrary instant (for clock-advance tests).
pub fn board_at(db: &DatabaseConnection, now: NaiveDateTime) -> Board {
    Board::new(db.clone()).with_clock(Arc::new(FixedClock(now)))
}

pub async fn create_test_user(
    db: &DatabaseConnection,
    username: &str,
    role: Role,
) -> Result<users::Model, DbErr> {
    users::ActiveModel {
        username: Set(username.to_string()),
        password_hash: Set("test-hash".to_string()),
        role: Set(role),
        can_change_username: Set(true),
        last_username_change_at: Set(None),
        current_suspension_id: Set(None),
        created_at: Set(test_now()),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// Inserts a post row directly, bypassing the workflow. Used to backdate
/// content for age-gate and sweep tests.
pub async fn insert_post_at(
    db: &DatabaseConnection,
    author: &users::Model,
    anonymous: bool,
    content: &str,
    created_at: NaiveDateTime,
) -> Result<posts::Model, DbErr> {
    let (author_username, author_role) = if anonymous {
        ("Anonymous".to_string(), AuthorRole::Anonymous)
    } else {
        (author.username.clone(), AuthorRole::from(author.role))
    };
    posts::ActiveModel {
        author_id: Set(Some(author.id)),
        author_username: Set(author_username),
        author_role: Set(author_role),
        anonymous: Set(anonymous),
        content: Set(content.to_string()),
        comments_count: Set(0),
        upvotes_count: Set(0),
        downvotes_count: Set(0),
        webhook_messages: Set(serde_json::json!([])),
        created_at: Set(created_at),
        ..Default::default()
    }
    .insert(db)
    .await
}
