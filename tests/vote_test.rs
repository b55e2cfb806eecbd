//! Integration tests for the vote workflow: idempotence, switching, and
//! counter consistency.
mod common;

use common::{database::*, fixtures::*};
use pasquil::orm::posts;
use pasquil::orm::users::Role;
use pasquil::orm::votes::VoteKind;
use pasquil::posts::NewPost;
use pasquil::votes::VoteAction;
use sea_orm::entity::*;
use serial_test::serial;

async fn setup() -> Option<(sea_orm::DatabaseConnection, pasquil::Board, posts::Model, i32)> {
    let db = try_test_db().await?;
    cleanup_test_data(&db).await.unwrap();
    let board = seeded_board(&db).await;
    let author = create_test_user(&db, "author", Role::User).await.unwrap();
    let voter = create_test_user(&db, "voter", Role::User).await.unwrap();
    let post = board
        .create_post(NewPost {
            author_user_id: author.id,
            content: "vote on me".into(),
            anonymous: false,
        })
        .await
        .unwrap();
    Some((db, board, post, voter.id))
}

async fn counters(db: &sea_orm::DatabaseConnection, post_id: i32) -> (i32, i32) {
    let post = posts::Entity::find_by_id(post_id)
        .one(db)
        .await
        .unwrap()
        .unwrap();
    (post.upvotes_count, post.downvotes_count)
}

#[tokio::test]
#[serial]
async fn repeating_the_same_vote_is_idempotent() {
    let Some((db, board, post, voter)) = setup().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };

    let first = board.set_vote(post.id, voter, VoteAction::Upvote).await.unwrap();
    assert_eq!(first.vote, Some(VoteKind::Upvote));
    assert_eq!(first.score, 1);

    let second = board.set_vote(post.id, voter, VoteAction::Upvote).await.unwrap();
    assert_eq!(second.vote, Some(VoteKind::Upvote));
    assert_eq!(second.score, 1);
    assert_eq!(counters(&db, post.id).await, (1, 0));
}

#[tokio::test]
#[serial]
async fn switching_a_vote_flips_both_counters() {
    let Some((db, board, post, voter)) = setup().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };

    board.set_vote(post.id, voter, VoteAction::Upvote).await.unwrap();
    let status = board
        .set_vote(post.id, voter, VoteAction::Downvote)
        .await
        .unwrap();
    assert_eq!(status.vote, Some(VoteKind::Downvote));
    assert_eq!(status.score, -1);
    assert_eq!(counters(&db, post.id).await, (0, 1));
}

#[tokio::test]
#[serial]
async fn removing_a_missing_vote_is_a_noop() {
    let Some((db, board, post, voter)) = setup().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };

    let status = board
        .set_vote(post.id, voter, VoteAction::Remove)
        .await
        .unwrap();
    assert_eq!(status.vote, None);
    assert_eq!(status.score, 0);
    assert_eq!(counters(&db, post.id).await, (0, 0));
}

#[tokio::test]
#[serial]
async fn removing_an_existing_vote_restores_the_score() {
    let Some((db, board, post, voter)) = setup().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };

    board.set_vote(post.id, voter, VoteAction::Downvote).await.unwrap();
    let status = board
        .set_vote(post.id, voter, VoteAction::Remove)
        .await
        .unwrap();
    assert_eq!(status.vote, None);
    assert_eq!(status.score, 0);
    assert_eq!(counters(&db, post.id).await, (0, 0));
}

#[tokio::test]
#[serial]
async fn votes_from_two_users_accumulate() {
    let Some((db, board, post, voter)) = setup().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let other = create_test_user(&db, "second_voter", Role::Moderator)
        .await
        .unwrap();

    board.set_vote(post.id, voter, VoteAction::Upvote).await.unwrap();
    let status = board
        .set_vote(post.id, other.id, VoteAction::Upvote)
        .await
        .unwrap();
    assert_eq!(status.score, 2);
    assert_eq!(counters(&db, post.id).await, (2, 0));
}
