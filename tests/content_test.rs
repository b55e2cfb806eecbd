//! Integration tests for post and comment creation gates.
mod common;

use chrono::Duration;
use common::{database::*, fixtures::*};
use pasquil::comments::{CreateCommentError, NewComment};
use pasquil::orm::posts::AuthorRole;
use pasquil::orm::users::Role;
use pasquil::orm::{posts, user_interactions};
use pasquil::posts::{CreatePostError, NewPost};
use pasquil::rules::InteractionLimit;
use sea_orm::{entity::*, query::*, PaginatorTrait};
use serial_test::serial;
use uuid::Uuid;

#[tokio::test]
#[serial]
async fn anonymous_post_hides_the_author_identity() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    let author = create_test_user(&db, "quiet_admin", Role::Admin).await.unwrap();

    let post = board
        .create_post(NewPost {
            author_user_id: author.id,
            content: "hello from nowhere".into(),
            anonymous: true,
        })
        .await
        .unwrap();

    assert_eq!(post.author_username, "Anonymous");
    assert_eq!(post.author_role, AuthorRole::Anonymous);
    // The link is kept for moderation until the expunge sweep.
    assert_eq!(post.author_id, Some(author.id));
}

#[tokio::test]
#[serial]
async fn named_post_snapshots_the_author() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    let author = create_test_user(&db, "visible", Role::Moderator).await.unwrap();

    let post = board
        .create_post(NewPost {
            author_user_id: author.id,
            content: "signed post".into(),
            anonymous: false,
        })
        .await
        .unwrap();

    assert_eq!(post.author_username, "visible");
    assert_eq!(post.author_role, AuthorRole::Moderator);
}

#[tokio::test]
#[serial]
async fn over_long_post_is_rejected_before_any_write() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    let author = create_test_user(&db, "rambler", Role::User).await.unwrap();

    let result = board
        .create_post(NewPost {
            author_user_id: author.id,
            content: "x".repeat(5001),
            anonymous: false,
        })
        .await;
    assert!(matches!(result, Err(CreatePostError::PostTooLong)));
    assert_eq!(posts::Entity::find().count(&db).await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn rate_limit_denies_with_the_window_release_time() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    let author = create_test_user(&db, "chatty", Role::User).await.unwrap();

    board
        .config
        .add_interaction_limit(
            &db,
            test_now(),
            InteractionLimit {
                id: Uuid::new_v4(),
                timeframe_ms: Duration::hours(1).num_milliseconds(),
                max_interactions: 2,
                kinds: vec![user_interactions::InteractionKind::Post],
            },
        )
        .await
        .unwrap();

    for n in 0..2 {
        board
            .create_post(NewPost {
                author_user_id: author.id,
                content: format!("post {n}"),
                anonymous: false,
            })
            .await
            .unwrap();
    }
    let third = board
        .create_post(NewPost {
            author_user_id: author.id,
            content: "one too many".into(),
            anonymous: false,
        })
        .await;
    match third {
        Err(CreatePostError::ViolatesLimitRules { retry_at }) => {
            // Both prior interactions sit at the frozen clock instant, so
            // the window releases exactly one timeframe later.
            assert_eq!(retry_at, test_now() + Duration::hours(1));
        }
        other => panic!("expected rate-limit denial, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn shared_limit_gates_each_kind_against_its_own_history() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    let author = create_test_user(&db, "balanced", Role::User).await.unwrap();

    board
        .config
        .add_interaction_limit(
            &db,
            test_now(),
            InteractionLimit {
                id: Uuid::new_v4(),
                timeframe_ms: Duration::hours(1).num_milliseconds(),
                max_interactions: 2,
                kinds: vec![
                    user_interactions::InteractionKind::Post,
                    user_interactions::InteractionKind::Comment,
                ],
            },
        )
        .await
        .unwrap();

    let post = board
        .create_post(NewPost {
            author_user_id: author.id,
            content: "opener".into(),
            anonymous: false,
        })
        .await
        .unwrap();
    board
        .create_comment(NewComment {
            post_id: post.id,
            author_user_id: author.id,
            content: "self reply".into(),
            anonymous: false,
        })
        .await
        .unwrap();

    // One post and one comment on the clock: the post gate only counts
    // the post, so a second post still fits under the cap.
    board
        .create_post(NewPost {
            author_user_id: author.id,
            content: "still fine".into(),
            anonymous: false,
        })
        .await
        .unwrap();

    // Two posts now fill the post gate.
    let third = board
        .create_post(NewPost {
            author_user_id: author.id,
            content: "one too many".into(),
            anonymous: false,
        })
        .await;
    assert!(matches!(
        third,
        Err(CreatePostError::ViolatesLimitRules { .. })
    ));
    // The comment gate has a single comment and stays open.
    board
        .create_comment(NewComment {
            post_id: post.id,
            author_user_id: author.id,
            content: "second reply".into(),
            anonymous: false,
        })
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
async fn admins_bypass_rate_limits() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    let admin = create_test_user(&db, "the_admin", Role::Admin).await.unwrap();

    board
        .config
        .add_interaction_limit(
            &db,
            test_now(),
            InteractionLimit {
                id: Uuid::new_v4(),
                timeframe_ms: Duration::hours(1).num_milliseconds(),
                max_interactions: 1,
                kinds: vec![user_interactions::InteractionKind::Post],
            },
        )
        .await
        .unwrap();

    for n in 0..3 {
        board
            .create_post(NewPost {
                author_user_id: admin.id,
                content: format!("announcement {n}"),
                anonymous: false,
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
#[serial]
async fn comments_move_the_denormalized_counter() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    let author = create_test_user(&db, "op", Role::User).await.unwrap();
    let commenter = create_test_user(&db, "replyguy", Role::User).await.unwrap();

    let post = board
        .create_post(NewPost {
            author_user_id: author.id,
            content: "discuss".into(),
            anonymous: false,
        })
        .await
        .unwrap();

    let comment = board
        .create_comment(NewComment {
            post_id: post.id,
            author_user_id: commenter.id,
            content: "first".into(),
            anonymous: false,
        })
        .await
        .unwrap();
    let fetched = posts::Entity::find_by_id(post.id).one(&db).await.unwrap().unwrap();
    assert_eq!(fetched.comments_count, 1);

    board
        .delete_comment(comment.id, commenter.id, None)
        .await
        .unwrap();
    let fetched = posts::Entity::find_by_id(post.id).one(&db).await.unwrap().unwrap();
    assert_eq!(fetched.comments_count, 0);
}

#[tokio::test]
#[serial]
async fn commenting_on_an_ancient_post_is_rejected() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    let author = create_test_user(&db, "archivist", Role::User).await.unwrap();
    let old_post = insert_post_at(
        &db,
        &author,
        false,
        "from another era",
        test_now() - Duration::days(31),
    )
    .await
    .unwrap();

    let result = board
        .create_comment(NewComment {
            post_id: old_post.id,
            author_user_id: author.id,
            content: "necro".into(),
            anonymous: false,
        })
        .await;
    assert!(matches!(
        result,
        Err(CreateCommentError::PostTooOldToComment)
    ));
}

#[tokio::test]
#[serial]
async fn interaction_ring_is_bounded_by_the_count_cap() {
    let Some(db) = try_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    let author = create_test_user(&db, "prolific", Role::User).await.unwrap();

    let mut limits = pasquil::config::LimitSettings::default();
    limits.max_interactions_to_keep = 3;
    board.config.set_limits(&db, test_now(), limits).await.unwrap();

    for n in 0..5 {
        board
            .create_post(NewPost {
                author_user_id: author.id,
                content: format!("post {n}"),
                anonymous: false,
            })
            .await
            .unwrap();
    }
    let kept = user_interactions::Entity::find()
        .filter(user_interactions::Column::UserId.eq(author.id))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(kept, 3);
}
