//! SQLite asset database.
//!
//! Each public method opens its own connection so that the caller never has
//! to manage connection lifetime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, Row};
use tracing::{debug, info};

use crate::errors::{PlatecheckError, PlatecheckResult, PublishError};
use crate::models::{
    DbPublishedFile, DbShot, DbTag, DbVersion, PublishRequest, ShotFilter, VersionDraft,
    VersionUpdate, PLATE_TAG, SHOT_TYPE_BIDDING, STATUS_OMITTED,
};
use crate::store::{schema, AssetDatabase};

/// How long a connection waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

const VERSION_COLUMNS: &str = "v.id, v.code, v.status, v.first_frame, v.last_frame, \
     v.frame_count, v.frame_range, v.first_frame_timecode, v.last_frame_timecode, \
     v.frame_rate, EXISTS(SELECT 1 FROM uploads u WHERE u.version_id = v.id)";

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<DbVersion> {
    Ok(DbVersion {
        id: row.get(0)?,
        code: row.get(1)?,
        status: row.get(2)?,
        first_frame: row.get(3)?,
        last_frame: row.get(4)?,
        frame_count: row.get(5)?,
        frame_range: row.get(6)?,
        first_frame_timecode: row.get(7)?,
        last_frame_timecode: row.get(8)?,
        frame_rate: row.get(9)?,
        has_uploaded_movie: row.get::<_, i64>(10)? != 0,
    })
}

fn shot_from_row(row: &Row<'_>) -> rusqlite::Result<DbShot> {
    Ok(DbShot {
        id: row.get(0)?,
        code: row.get(1)?,
        sequence: row.get(2)?,
        shot_type: row.get(3)?,
        status: row.get(4)?,
    })
}

/// Busy and locked databases are the transient class; everything else is a
/// rejection.
fn publish_error(err: PlatecheckError) -> PublishError {
    let transient = matches!(
        &err,
        PlatecheckError::Sqlite(e)
            if matches!(
                e.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            )
    );
    if transient {
        PublishError::ConnectionReset(err.to_string())
    } else {
        PublishError::Rejected(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// SqliteAssetDatabase
// ---------------------------------------------------------------------------

/// Local SQLite stand-in for a production asset tracker, scoped to one
/// project.
#[derive(Clone, Debug)]
pub struct SqliteAssetDatabase {
    db_path: PathBuf,
    project: String,
    busy_timeout: Duration,
}

impl SqliteAssetDatabase {
    /// The path is tilde-expanded and parent directories are created if they
    /// do not already exist.
    pub fn new(db_path: &Path, project: &str) -> PlatecheckResult<Self> {
        let expanded = expand_tilde(&db_path.to_string_lossy());
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            db_path: resolved,
            project: project.to_string(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn connect(&self) -> PlatecheckResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    // -----------------------------------------------------------------------
    // Schema / seeding
    // -----------------------------------------------------------------------

    /// Set WAL mode, then create all tables and indexes.
    pub fn init_schema(&self) -> PlatecheckResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        schema::apply_schema(&conn)?;
        info!(
            "Initialised asset database at {} (schema v{})",
            self.db_path.display(),
            schema::SCHEMA_VERSION
        );
        Ok(())
    }

    pub fn schema_version(&self) -> PlatecheckResult<i32> {
        let conn = self.connect()?;
        schema::stored_version(&conn)
    }

    /// Insert a shot, or refresh its sequence, type and status when the code
    /// already exists. Returns the shot id.
    pub fn insert_shot(
        &self,
        code: &str,
        sequence: Option<&str>,
        shot_type: Option<&str>,
        status: Option<&str>,
    ) -> PlatecheckResult<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO shots(project, code, sequence, shot_type, status) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(project, code) DO UPDATE SET \
                 sequence = excluded.sequence, \
                 shot_type = excluded.shot_type, \
                 status = excluded.status;",
            params![self.project, code, sequence, shot_type, status],
        )?;
        let id = conn.query_row(
            "SELECT id FROM shots WHERE project = ?1 AND code = ?2;",
            params![self.project, code],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn insert_published_file(&self, request: &PublishRequest) -> PlatecheckResult<DbPublishedFile> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO published_files(code, path, version_number, file_type, version_id, shot_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                request.name,
                request.path,
                request.version_number,
                request.file_type,
                request.version_id,
                request.shot_id,
            ],
        )?;
        Ok(DbPublishedFile {
            id: conn.last_insert_rowid(),
            code: request.name.clone(),
            path: request.path.clone(),
            version_number: request.version_number,
            file_type: request.file_type.clone(),
            version_id: request.version_id,
        })
    }
}

impl AssetDatabase for SqliteAssetDatabase {
    fn find_shots(&self, filter: &ShotFilter) -> PlatecheckResult<Vec<DbShot>> {
        let conn = self.connect()?;
        let shots = if filter.exclude_omitted {
            let mut stmt = conn.prepare(
                "SELECT id, code, sequence, shot_type, status FROM shots \
                 WHERE project = ?1 \
                   AND (shot_type IS NULL OR shot_type != ?2) \
                   AND (status IS NULL OR status != ?3) \
                 ORDER BY code ASC;",
            )?;
            let rows = stmt.query_map(
                params![self.project, SHOT_TYPE_BIDDING, STATUS_OMITTED],
                shot_from_row,
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, code, sequence, shot_type, status FROM shots \
                 WHERE project = ?1 \
                   AND (shot_type IS NULL OR shot_type != ?2) \
                 ORDER BY code ASC;",
            )?;
            let rows = stmt.query_map(params![self.project, SHOT_TYPE_BIDDING], shot_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        debug!("Found {} shots in project {}", shots.len(), self.project);
        Ok(shots)
    }

    fn find_plate_versions(&self, shot: &DbShot) -> PlatecheckResult<Vec<DbVersion>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM versions v \
             WHERE v.shot_id = ?1 \
               AND EXISTS ( \
                   SELECT 1 FROM version_tags vt JOIN tags t ON t.id = vt.tag_id \
                   WHERE vt.version_id = v.id AND t.name = ?2 \
               ) \
             ORDER BY v.id ASC;"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![shot.id, PLATE_TAG], version_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn find_published_files(&self, version_id: i64) -> PlatecheckResult<Vec<DbPublishedFile>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, code, path, version_number, file_type, version_id \
             FROM published_files WHERE version_id = ?1 ORDER BY id ASC;",
        )?;
        let rows = stmt.query_map(params![version_id], |row| {
            Ok(DbPublishedFile {
                id: row.get(0)?,
                code: row.get(1)?,
                path: row.get(2)?,
                version_number: row.get(3)?,
                file_type: row.get(4)?,
                version_id: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn ensure_tag(&self, name: &str) -> PlatecheckResult<DbTag> {
        let conn = self.connect()?;
        let created = conn.execute(
            "INSERT INTO tags(name) VALUES (?1) ON CONFLICT(name) DO NOTHING;",
            params![name],
        )?;
        if created > 0 {
            info!("Created tag {name}");
        }
        let id = conn.query_row(
            "SELECT id FROM tags WHERE name = ?1;",
            params![name],
            |row| row.get(0),
        )?;
        Ok(DbTag {
            id,
            name: name.to_string(),
        })
    }

    fn create_version(&self, draft: &VersionDraft) -> PlatecheckResult<DbVersion> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let md = &draft.metadata;
        let sop = md.cdl.sop();
        tx.execute(
            "INSERT INTO versions( \
                 code, shot_id, status, first_frame, last_frame, frame_count, frame_range, \
                 first_frame_timecode, last_frame_timecode, frame_rate, lab_roll, camera_roll, \
                 slope_red, slope_green, slope_blue, offset_red, offset_green, offset_blue, \
                 power_red, power_green, power_blue, saturation \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, \
                       ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22);",
            params![
                draft.code,
                draft.shot_id,
                draft.status,
                md.first_frame as i64,
                md.last_frame as i64,
                md.frame_count as i64,
                md.frame_range,
                md.first_frame_timecode,
                md.last_frame_timecode,
                md.frame_rate,
                md.lab_roll,
                md.camera_roll,
                sop[0],
                sop[1],
                sop[2],
                sop[3],
                sop[4],
                sop[5],
                sop[6],
                sop[7],
                sop[8],
                md.cdl.saturation,
            ],
        )?;
        let version_id = tx.last_insert_rowid();
        for tag_id in &draft.tag_ids {
            tx.execute(
                "INSERT OR IGNORE INTO version_tags(version_id, tag_id) VALUES (?1, ?2);",
                params![version_id, tag_id],
            )?;
        }
        let version = tx.query_row(
            &format!("SELECT {VERSION_COLUMNS} FROM versions v WHERE v.id = ?1;"),
            params![version_id],
            version_from_row,
        )?;
        tx.commit()?;
        debug!("Created version {} with id {version_id}", draft.code);
        Ok(version)
    }

    fn update_version(&self, version_id: i64, update: &VersionUpdate) -> PlatecheckResult<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE versions SET \
                 status = COALESCE(?2, status), \
                 first_frame = COALESCE(?3, first_frame), \
                 last_frame = COALESCE(?4, last_frame), \
                 frame_count = COALESCE(?5, frame_count), \
                 frame_range = COALESCE(?6, frame_range), \
                 first_frame_timecode = COALESCE(?7, first_frame_timecode), \
                 last_frame_timecode = COALESCE(?8, last_frame_timecode), \
                 path_to_frames = COALESCE(?9, path_to_frames), \
                 path_to_movie = COALESCE(?10, path_to_movie), \
                 path_to_vfx_movie = COALESCE(?11, path_to_vfx_movie), \
                 path_to_lut = COALESCE(?12, path_to_lut), \
                 updated_at = CURRENT_TIMESTAMP \
             WHERE id = ?1;",
            params![
                version_id,
                update.status,
                update.first_frame,
                update.last_frame,
                update.frame_count,
                update.frame_range,
                update.first_frame_timecode,
                update.last_frame_timecode,
                update.path_to_frames,
                update.path_to_movie,
                update.path_to_vfx_movie,
                update.path_to_lut,
            ],
        )?;
        if changed == 0 {
            return Err(PlatecheckError::Database(format!(
                "no version with id {version_id}"
            )));
        }
        Ok(())
    }

    fn upload_movie(&self, version_id: i64, path: &Path) -> PlatecheckResult<()> {
        let payload = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO uploads(version_id, file_name, size_bytes, payload) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(version_id) DO UPDATE SET \
                 file_name = excluded.file_name, \
                 size_bytes = excluded.size_bytes, \
                 payload = excluded.payload, \
                 uploaded_at = CURRENT_TIMESTAMP;",
            params![version_id, file_name, payload.len() as i64, payload],
        )?;
        debug!("Uploaded {} bytes to version {version_id}", payload.len());
        Ok(())
    }

    fn register_publish(&self, request: &PublishRequest) -> Result<DbPublishedFile, PublishError> {
        self.insert_published_file(request).map_err(publish_error)
    }
}
