//! SQLite schema DDL for the local asset database.

use rusqlite::{Connection, OptionalExtension};

use crate::errors::{PlatecheckError, PlatecheckResult};

/// Layout version stamped into `schema_meta`. A database carrying a higher
/// stamp was written by a newer build and is refused.
pub const SCHEMA_VERSION: i32 = 1;

/// Core DDL statements: 7 CREATE TABLE + 5 CREATE INDEX.
///
/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (7) ──────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS schema_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS shots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project TEXT NOT NULL,
        code TEXT NOT NULL,
        sequence TEXT,
        shot_type TEXT,
        status TEXT,
        UNIQUE(project, code)
    );",
    "CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );",
    "CREATE TABLE IF NOT EXISTS versions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL,
        shot_id INTEGER NOT NULL REFERENCES shots(id),
        status TEXT,
        first_frame INTEGER,
        last_frame INTEGER,
        frame_count INTEGER,
        frame_range TEXT,
        first_frame_timecode INTEGER,
        last_frame_timecode INTEGER,
        frame_rate REAL,
        lab_roll TEXT,
        camera_roll TEXT,
        slope_red REAL,
        slope_green REAL,
        slope_blue REAL,
        offset_red REAL,
        offset_green REAL,
        offset_blue REAL,
        power_red REAL,
        power_green REAL,
        power_blue REAL,
        saturation REAL,
        path_to_frames TEXT,
        path_to_movie TEXT,
        path_to_vfx_movie TEXT,
        path_to_lut TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS version_tags (
        version_id INTEGER NOT NULL REFERENCES versions(id),
        tag_id INTEGER NOT NULL REFERENCES tags(id),
        PRIMARY KEY(version_id, tag_id)
    );",
    "CREATE TABLE IF NOT EXISTS published_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL,
        path TEXT NOT NULL,
        version_number INTEGER NOT NULL,
        file_type TEXT NOT NULL,
        version_id INTEGER NOT NULL REFERENCES versions(id),
        shot_id INTEGER NOT NULL REFERENCES shots(id),
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS uploads (
        version_id INTEGER PRIMARY KEY REFERENCES versions(id),
        file_name TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        payload BLOB NOT NULL,
        uploaded_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    // ── indexes (5) ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_shots_project_code ON shots(project, code);",
    "CREATE INDEX IF NOT EXISTS idx_versions_shot ON versions(shot_id, id);",
    "CREATE INDEX IF NOT EXISTS idx_version_tags_tag ON version_tags(tag_id);",
    "CREATE INDEX IF NOT EXISTS idx_published_files_version ON published_files(version_id);",
    "CREATE INDEX IF NOT EXISTS idx_published_files_version_code ON published_files(version_id, code);",
];

// ─── Version stamp ──────────────────────────────────────────────────────────

/// Create every table and index inside one transaction and stamp
/// [`SCHEMA_VERSION`].
pub fn apply_schema(conn: &Connection) -> PlatecheckResult<()> {
    let stored = stored_version(conn)?;
    if stored > SCHEMA_VERSION {
        return Err(PlatecheckError::Database(format!(
            "asset database has schema v{stored}, this build understands up to v{SCHEMA_VERSION}"
        )));
    }

    let tx = conn.unchecked_transaction()?;
    for stmt in SCHEMA_STATEMENTS {
        tx.execute_batch(stmt)?;
    }
    tx.execute(
        "INSERT INTO schema_meta(key, value) VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![SCHEMA_VERSION.to_string()],
    )?;
    tx.commit()?;
    Ok(())
}

/// Stamped schema version, or 0 for a database that was never initialised.
pub fn stored_version(conn: &Connection) -> PlatecheckResult<i32> {
    let has_meta: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_meta');",
        [],
        |row| row.get(0),
    )?;
    if !has_meta {
        return Ok(0);
    }
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'schema_version';",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match value {
        None => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|_| PlatecheckError::Database(format!("unreadable schema version {v:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_statement_counts() {
        // 7 tables + 5 indexes
        assert_eq!(SCHEMA_STATEMENTS.len(), 12);
    }

    #[test]
    fn fresh_database_is_stamped() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(stored_version(&conn).unwrap(), 0);
        apply_schema(&conn).unwrap();
        assert_eq!(stored_version(&conn).unwrap(), SCHEMA_VERSION);

        let indexed: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master \
                 WHERE type = 'index' AND name = 'idx_published_files_version_code');",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(indexed);
    }

    #[test]
    fn reapplying_keeps_rows() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO shots(project, code) VALUES('show', 'SH010');",
            [],
        )
        .unwrap();
        apply_schema(&conn).unwrap();

        let shots: i64 = conn
            .query_row("SELECT COUNT(*) FROM shots;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(shots, 1);
    }

    #[test]
    fn newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        conn.execute(
            "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version';",
            rusqlite::params![(SCHEMA_VERSION + 1).to_string()],
        )
        .unwrap();

        let err = apply_schema(&conn).unwrap_err();
        assert!(err.to_string().contains("understands up to"));
        assert_eq!(stored_version(&conn).unwrap(), SCHEMA_VERSION + 1);
    }

    #[test]
    fn unreadable_stamp_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        conn.execute(
            "UPDATE schema_meta SET value = 'two' WHERE key = 'schema_version';",
            [],
        )
        .unwrap();
        assert!(stored_version(&conn).is_err());
    }
}
