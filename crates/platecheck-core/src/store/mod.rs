//! Asset database access.
//!
//! The reconciliation engine only sees [`AssetDatabase`]; the SQLite store in
//! [`database`] is the implementation shipped with the binary.

pub mod database;
pub mod schema;

use std::path::Path;

use crate::errors::{PlatecheckResult, PublishError};
use crate::models::{
    DbPublishedFile, DbShot, DbTag, DbVersion, PublishRequest, ShotFilter, VersionDraft,
    VersionUpdate,
};

pub use database::SqliteAssetDatabase;

/// The asset-tracking database the verifier reconciles against.
///
/// Every method is a single request; implementations must not retry on
/// their own.
pub trait AssetDatabase {
    /// Shots of the project, excluding bidding shots and, when asked,
    /// omitted ones. Ordered by code.
    fn find_shots(&self, filter: &ShotFilter) -> PlatecheckResult<Vec<DbShot>>;

    /// Versions linked to `shot` and tagged as plates.
    fn find_plate_versions(&self, shot: &DbShot) -> PlatecheckResult<Vec<DbVersion>>;

    fn find_published_files(&self, version_id: i64) -> PlatecheckResult<Vec<DbPublishedFile>>;

    /// Find a tag by name, creating it when missing.
    fn ensure_tag(&self, name: &str) -> PlatecheckResult<DbTag>;

    fn create_version(&self, draft: &VersionDraft) -> PlatecheckResult<DbVersion>;

    fn update_version(&self, version_id: i64, update: &VersionUpdate) -> PlatecheckResult<()>;

    /// Attach a movie file to a version as its uploaded media.
    fn upload_movie(&self, version_id: i64, path: &Path) -> PlatecheckResult<()>;

    fn register_publish(&self, request: &PublishRequest) -> Result<DbPublishedFile, PublishError>;
}
