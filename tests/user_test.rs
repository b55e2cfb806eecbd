//! Integration tests for registration, one-time codes, and username
//! changes.
mod common;

use chrono::Duration;
use common::{database::*, fixtures::*};
use pasquil::config::StringListSetting;
use pasquil::orm::users::Role;
use pasquil::orm::{comments, otcs, posts};
use pasquil::posts::NewPost;
use pasquil::users::{ChangeUsernameError, NewRegistration, RegisterUserError};
use sea_orm::{entity::*, query::*, PaginatorTrait};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn registration_consumes_the_one_time_code() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;

    let code = board
        .issue_registration_code(Duration::hours(24))
        .await
        .unwrap();
    let user = board
        .register_user(NewRegistration {
            username: "newcomer".into(),
            password_hash: "hash".into(),
            code: code.code.clone(),
        })
        .await
        .unwrap();
    assert_eq!(user.role, Role::User);
    assert_eq!(otcs::Entity::find().count(&db).await.unwrap(), 0);

    // The spent code cannot be reused.
    let reuse = board
        .register_user(NewRegistration {
            username: "copycat".into(),
            password_hash: "hash".into(),
            code: code.code,
        })
        .await;
    assert!(matches!(reuse, Err(RegisterUserError::InvalidCode)));
}

#[tokio::test]
#[serial]
async fn expired_codes_are_rejected_and_purgeable() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;

    let code = board
        .issue_registration_code(Duration::hours(-1))
        .await
        .unwrap();
    let result = board
        .register_user(NewRegistration {
            username: "latecomer".into(),
            password_hash: "hash".into(),
            code: code.code,
        })
        .await;
    assert!(matches!(result, Err(RegisterUserError::InvalidCode)));
    assert_eq!(board.purge_expired_codes().await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn failed_registration_does_not_burn_the_code() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    create_test_user(&db, "taken", Role::User).await.unwrap();

    let code = board
        .issue_registration_code(Duration::hours(24))
        .await
        .unwrap();
    let clash = board
        .register_user(NewRegistration {
            username: "taken".into(),
            password_hash: "hash".into(),
            code: code.code.clone(),
        })
        .await;
    assert!(matches!(clash, Err(RegisterUserError::UsernameTaken)));

    // The transaction rolled back, so the same code still works.
    board
        .register_user(NewRegistration {
            username: "untaken".into(),
            password_hash: "hash".into(),
            code: code.code,
        })
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
async fn disallowed_username_patterns_block_registration() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    board
        .config
        .push_string_setting(
            &db,
            test_now(),
            StringListSetting::DisallowedUsernamePatterns,
            "^admin".into(),
        )
        .await
        .unwrap();

    let code = board
        .issue_registration_code(Duration::hours(24))
        .await
        .unwrap();
    let result = board
        .register_user(NewRegistration {
            username: "AdminPretender".into(),
            password_hash: "hash".into(),
            code: code.code,
        })
        .await;
    assert!(matches!(result, Err(RegisterUserError::DisallowedUsername)));
}

#[tokio::test]
#[serial]
async fn username_change_backfills_named_content_only() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    let user = create_test_user(&db, "old_name", Role::User).await.unwrap();

    let named = board
        .create_post(NewPost {
            author_user_id: user.id,
            content: "signed".into(),
            anonymous: false,
        })
        .await
        .unwrap();
    let anon = board
        .create_post(NewPost {
            author_user_id: user.id,
            content: "unsigned".into(),
            anonymous: true,
        })
        .await
        .unwrap();

    let renamed = board.change_username(user.id, "new_name".into()).await.unwrap();
    assert_eq!(renamed.username, "new_name");

    let named = posts::Entity::find_by_id(named.id).one(&db).await.unwrap().unwrap();
    assert_eq!(named.author_username, "new_name");
    let anon = posts::Entity::find_by_id(anon.id).one(&db).await.unwrap().unwrap();
    assert_eq!(anon.author_username, "Anonymous");

    // A second change inside the cooldown window is refused.
    let again = board.change_username(user.id, "newer_name".into()).await;
    match again {
        Err(ChangeUsernameError::ChangedTooRecently { retry_at }) => {
            assert_eq!(retry_at, test_now() + Duration::days(7));
        }
        other => panic!("expected cooldown refusal, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn admins_skip_the_username_change_cooldown() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    let admin = create_test_user(&db, "root", Role::Admin).await.unwrap();

    board.change_username(admin.id, "root_two".into()).await.unwrap();
    board.change_username(admin.id, "root_three".into()).await.unwrap();
}

#[tokio::test]
#[serial]
async fn comment_author_snapshot_is_backfilled_too() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    let op = create_test_user(&db, "op", Role::User).await.unwrap();
    let commenter = create_test_user(&db, "chatter", Role::User).await.unwrap();

    let post = board
        .create_post(NewPost {
            author_user_id: op.id,
            content: "topic".into(),
            anonymous: false,
        })
        .await
        .unwrap();
    let comment = board
        .create_comment(pasquil::comments::NewComment {
            post_id: post.id,
            author_user_id: commenter.id,
            content: "signed reply".into(),
            anonymous: false,
        })
        .await
        .unwrap();

    board
        .change_username(commenter.id, "renamed_chatter".into())
        .await
        .unwrap();
    let fetched = comments::Entity::find_by_id(comment.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.author_username, "renamed_chatter");
}
