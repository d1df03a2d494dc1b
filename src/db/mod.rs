//! Database module for SQLite persistence.
//!
//! SQLite is the source of truth for all application data. Every mutable row
//! carries a `version` column; writers use conditional updates against it,
//! so concurrent read-modify-writes surface as conflicts instead of lost
//! updates.

mod repository;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    // Run embedded migrations
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Create tables if they don't exist
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL DEFAULT '',
            device_token TEXT,
            total_likes INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS groups (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            room_code TEXT NOT NULL UNIQUE,
            visibility TEXT NOT NULL,
            admin_id TEXT NOT NULL,
            current_tag TEXT NOT NULL DEFAULT '',
            queued_tags TEXT NOT NULL DEFAULT '[]',
            past_tags TEXT NOT NULL DEFAULT '[]',
            next_tag_switch_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS group_members (
            group_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            joined_at TEXT NOT NULL,
            PRIMARY KEY (group_id, user_id)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ledger (
            user_id TEXT NOT NULL,
            group_id TEXT NOT NULL,
            streak INTEGER NOT NULL DEFAULT 0,
            points INTEGER NOT NULL DEFAULT 0,
            last_post_at TEXT,
            last_tag_week TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (user_id, group_id)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS posts (
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            author_id TEXT NOT NULL,
            tag TEXT NOT NULL,
            image_url TEXT NOT NULL,
            client_key TEXT,
            published_at TEXT NOT NULL,
            liked_by TEXT NOT NULL DEFAULT '[]',
            moderation_status TEXT NOT NULL DEFAULT 'pending',
            version INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS like_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_posts_client_key
            ON posts(group_id, author_id, client_key) WHERE client_key IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_posts_group_published ON posts(group_id, published_at);
        CREATE INDEX IF NOT EXISTS idx_groups_next_switch ON groups(next_tag_switch_at);
        CREATE INDEX IF NOT EXISTS idx_groups_visibility ON groups(visibility);
        CREATE INDEX IF NOT EXISTS idx_ledger_group ON ledger(group_id);
        CREATE INDEX IF NOT EXISTS idx_members_user ON group_members(user_id);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
