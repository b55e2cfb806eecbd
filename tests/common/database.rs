//! Test database setup and management
#![allow(dead_code)]

use std::env;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Schema, Statement};

use pasquil::orm::{
    comments, moderation_logs, otcs, posts, site_config, suspension_lifts, suspensions,
    user_interactions, users, votes,
};

/// Connects to TEST_DATABASE_URL and prepares the schema. Returns None
/// when the variable is unset so the suite can skip cleanly on machines
/// without a Postgres instance.
pub async fn try_test_db() -> Option<DatabaseConnection> {
    let url = env::var("TEST_DATABASE_URL").ok()?;
    let db = Database::connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");
    ensure_schema(&db).await.expect("failed to prepare schema");
    Some(db)
}

async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    // Postgres enum types. CREATE TYPE has no IF NOT EXISTS, so reruns
    // against an already-prepared database are expected to error here.
    let enum_statements = schema
        .create_enum_from_entity(users::Entity)
        .into_iter()
        .chain(schema.create_enum_from_entity(user_interactions::Entity))
        .chain(schema.create_enum_from_entity(posts::Entity))
        .chain(schema.create_enum_from_entity(votes::Entity))
        .chain(schema.create_enum_from_entity(moderation_logs::Entity));
    for statement in enum_statements {
        let _ = db.execute(backend.build(&statement)).await;
    }

    // Parents before children so foreign keys resolve.
    let mut table_statements = vec![
        schema.create_table_from_entity(users::Entity),
        schema.create_table_from_entity(posts::Entity),
        schema.create_table_from_entity(suspensions::Entity),
        schema.create_table_from_entity(suspension_lifts::Entity),
        schema.create_table_from_entity(moderation_logs::Entity),
        schema.create_table_from_entity(user_interactions::Entity),
        schema.create_table_from_entity(comments::Entity),
        schema.create_table_from_entity(votes::Entity),
        schema.create_table_from_entity(site_config::Entity),
        schema.create_table_from_entity(otcs::Entity),
    ];
    for statement in table_statements.iter_mut() {
        statement.if_not_exists();
        db.execute(backend.build(&*statement)).await?;
    }
    Ok(())
}

/// Truncates every table so each test starts from a blank board.
pub async fn cleanup_test_data(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "TRUNCATE TABLE
            votes,
            comments,
            posts,
            user_interactions,
            moderation_logs,
            suspension_lifts,
            suspensions,
            otcs,
            site_config,
            users
        RESTART IDENTITY CASCADE;"
            .to_string(),
    ))
    .await?;
    Ok(())
}
