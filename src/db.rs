use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result as AnyResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};

/// Schema applied to a fresh database. Statements are idempotent so opening an
/// existing database is safe.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pantry_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        quantity INTEGER NOT NULL DEFAULT 0,
        image_uri TEXT,
        should_track INTEGER NOT NULL DEFAULT 1,
        add_to_shopping_list INTEGER NOT NULL DEFAULT 1,
        scan_code TEXT,
        category TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS recipes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        temp TEXT NOT NULL DEFAULT '',
        prep_time TEXT NOT NULL DEFAULT '',
        cook_time TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL DEFAULT '',
        instructions TEXT NOT NULL DEFAULT '',
        image_uri TEXT,
        color INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS recipe_pantry_refs (
        recipe_id INTEGER NOT NULL,
        pantry_item_id INTEGER NOT NULL,
        uuid TEXT NOT NULL UNIQUE,
        required INTEGER NOT NULL DEFAULT 0,
        amount_needed TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (recipe_id, pantry_item_id),
        FOREIGN KEY (recipe_id) REFERENCES recipes(id) ON DELETE CASCADE,
        FOREIGN KEY (pantry_item_id) REFERENCES pantry_items(id) ON DELETE RESTRICT
    )",
    "CREATE INDEX IF NOT EXISTS idx_recipe_pantry_refs_pantry_item
        ON recipe_pantry_refs(pantry_item_id)",
    "CREATE TABLE IF NOT EXISTS shopping_lists (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        created_at INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS shopping_list_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL UNIQUE,
        list_id INTEGER NOT NULL,
        pantry_item_id INTEGER,
        name TEXT NOT NULL,
        quantity TEXT NOT NULL DEFAULT '',
        unit TEXT,
        category TEXT NOT NULL DEFAULT '',
        is_checked INTEGER NOT NULL DEFAULT 0,
        is_generated INTEGER NOT NULL DEFAULT 0,
        manually_removed INTEGER NOT NULL DEFAULT 0,
        recipe_id INTEGER,
        FOREIGN KEY (list_id) REFERENCES shopping_lists(id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_shopping_list_items_list
        ON shopping_list_items(list_id)",
    "CREATE TABLE IF NOT EXISTS recipe_selections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL UNIQUE,
        list_id INTEGER NOT NULL,
        recipe_id INTEGER NOT NULL,
        count INTEGER NOT NULL DEFAULT 0,
        UNIQUE (list_id, recipe_id)
    )",
    "CREATE TABLE IF NOT EXISTS undo_actions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL UNIQUE,
        list_id INTEGER NOT NULL,
        action_type TEXT NOT NULL,
        payload TEXT NOT NULL DEFAULT '',
        timestamp INTEGER NOT NULL DEFAULT 0
    )",
];

/// Open (or create) the larder database at `db_path` with WAL journaling,
/// enforced foreign keys and a busy timeout on every connection.
pub async fn connect_sqlite_pool(db_path: &Path) -> AnyResult<Pool<Sqlite>> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create database directory {}", parent.display()))?;
    }

    let path_str = db_path
        .to_str()
        .context("database path is not valid UTF-8")?;
    let opts = SqliteConnectOptions::from_str(path_str)
        .context("parse sqlite connect options")?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys=ON;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await?;

    log_effective_pragmas(&pool).await;

    Ok(pool)
}

/// Apply the embedded schema. Safe to call on every open.
pub async fn apply_schema(pool: &Pool<Sqlite>) -> AnyResult<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| {
                let head: String = statement.chars().take(40).collect();
                format!("apply schema statement: {head}")
            })?;
    }
    Ok(())
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>) {
    use tracing::{info, warn};

    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    let busy: (i64,) = sqlx::query_as("PRAGMA busy_timeout;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "larder",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        foreign_keys = %fks.0,
        busy_timeout_ms = %busy.0
    );

    if !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target: "larder",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}
