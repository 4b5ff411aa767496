//! SQLite schema migrations.
//!
//! Migrations are listed in [`MIGRATIONS`] in version order. Opening a
//! database applies every migration above its recorded version inside one
//! transaction; a database written by a newer build is refused.

use rusqlite::{Connection, OptionalExtension};

use galleria_core::now_millis;

use crate::error::{Result, StoreError};

type Apply = fn(&Connection) -> Result<()>;

/// Every migration as (version, name, apply), in order.
const MIGRATIONS: &[(u32, &str, Apply)] = &[
    (1, "items_watermarks_owners", apply_v1),
    (2, "blobs", apply_v2),
];

/// Current schema version.
pub const CURRENT_VERSION: u32 = MIGRATIONS[MIGRATIONS.len() - 1].0;

/// Bring the schema up to [`CURRENT_VERSION`]. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current = schema_version(conn)?;
    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    let pending: Vec<_> = MIGRATIONS.iter().filter(|(v, _, _)| *v > current).collect();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (version, name, apply) in pending {
        tracing::debug!(version, name, "applying schema migration");
        apply(&tx)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![version, name, now_millis()],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Highest applied migration, 0 for a fresh database.
fn schema_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Archived items, one row per (id, collection)
        CREATE TABLE items (
            id TEXT NOT NULL,                  -- remote identifier
            collection TEXT NOT NULL,          -- gallery | scraps | favorites | journals
            owner TEXT NOT NULL,               -- account whose collection holds the item
            author TEXT NOT NULL,              -- account that posted the content
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            tags BLOB NOT NULL,                -- CBOR array of normalized tags
            file_url TEXT,
            revision_hash BLOB NOT NULL,       -- 32 bytes, Blake3 of tracked fields
            blob_id TEXT,
            thumbnail_blob_id TEXT,
            surrogate TEXT,                    -- last listing change marker
            target_id TEXT,                    -- favorite links: target submission
            posted_at INTEGER,
            first_seen_at INTEGER NOT NULL,
            last_updated_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            removal_candidate INTEGER NOT NULL DEFAULT 0,

            PRIMARY KEY (id, collection)
        );

        -- Per-collection synchronization checkpoints
        CREATE TABLE watermarks (
            owner TEXT NOT NULL,
            collection TEXT NOT NULL,
            last_synced_page INTEGER NOT NULL DEFAULT 0,
            last_synced_item_id TEXT,
            completed_full_pass INTEGER NOT NULL DEFAULT 0,
            last_sync_timestamp INTEGER,
            checkpoint BLOB,                   -- CBOR PassCheckpoint, NULL when idle
            PRIMARY KEY (owner, collection)
        );

        -- Registered remote accounts
        CREATE TABLE owners (
            handle TEXT PRIMARY KEY,
            collections TEXT NOT NULL,         -- comma separated collection names
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX idx_items_owner_collection ON items(owner, collection);
        CREATE INDEX idx_items_status ON items(status);
        "#,
    )?;

    Ok(())
}

/// Migration v2: Content-addressed blob table and candidate index.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE blobs (
            blob_id TEXT PRIMARY KEY,          -- hex Blake3 of data
            data BLOB NOT NULL,
            size INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX idx_items_candidates ON items(owner, collection, removal_candidate);
        "#,
    )?;

    Ok(())
}
