//! Builds the per-shot plate model from the database and filesystem views.
//!
//! Both passes are pure with respect to the [`Shot`]: they return a state
//! value holding the plates they found and the faults they raised, and
//! `commit` folds that into the shot.

use std::cell::Cell;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::errors::PlatecheckResult;
use crate::models::{
    DbVersion, FaultKind, FaultLog, FilesystemAsset, PlateVersion, Shot, VerificationState,
};
use crate::reconcile::engine::VerifierSettings;
use crate::scanner::filesystem::{collect_plate_files, FramePattern};
use crate::scanner::integrity::{check_frames, FrameIssue};
use crate::scanner::metadata::{extract_sequence_metadata, HeaderAttributes, MetadataReader};
use crate::scanner::templates::{PlateTemplates, VERSION_KEY};

/// Directory under a shot root that holds its plates.
pub const PLATES_DIR: &str = "plates";

// ---------------------------------------------------------------------------
// Database pass
// ---------------------------------------------------------------------------

/// Plates known to the database for one shot.
#[derive(Debug, Default)]
pub struct DatabaseState {
    pub plates: IndexMap<String, PlateVersion>,
    pub faults: FaultLog,
}

impl DatabaseState {
    /// Attach database records to the shot's plates, creating plates as
    /// needed.
    pub fn commit(self, shot: &mut Shot, log: &mut FaultLog) {
        for (name, found) in self.plates {
            match shot.plates.get_mut(&name) {
                Some(plate) => {
                    plate.db_record = found.db_record;
                    plate.int_version = found.int_version.or(plate.int_version);
                    plate.state = found.state;
                }
                None => {
                    shot.plates.insert(name, found);
                }
            }
        }
        if shot.error_message.is_none() {
            shot.error_message = self.faults.shots.first().map(|f| f.message.clone());
        }
        log.extend(self.faults);
    }
}

/// Index `records` by canonical version name.
///
/// Records are taken in ascending id order, so when two records resolve to
/// the same name the lowest id is kept and the other becomes a duplicate
/// fault.
pub fn build_database_state(
    shot: &Shot,
    mut records: Vec<DbVersion>,
    templates: &PlateTemplates,
) -> DatabaseState {
    let mut state = DatabaseState::default();
    if records.is_empty() {
        warn!(shot = %shot.code, "Shot has no plates in the database");
        return state;
    }
    records.sort_by_key(|r| r.id);

    for record in records {
        debug!(shot = %shot.code, "Located plate {} ({})", record.code, record.id);
        let canonical = templates
            .version_fields(&record.code)
            .and_then(|fields| {
                let name = templates.version_name(&fields).ok()?;
                Some((name, fields.get_int(VERSION_KEY)))
            });
        let Some((name, int_version)) = canonical else {
            state.faults.record_version(
                &shot.code,
                &record.code,
                Some(record.id),
                FaultKind::Naming,
                format!(
                    "Plate {} in the database has a name that does not validate; skipping",
                    record.code
                ),
            );
            continue;
        };

        if let Some(original) = state.plates.get(&name).and_then(|p| p.db_record.as_ref()) {
            let message = format!(
                "In Shot {}, Plate {} with database ID {} is a duplicate of Plate {} with database ID {}",
                shot.code, record.code, record.id, original.code, original.id
            );
            state.faults.record_version(
                &shot.code,
                &record.code,
                Some(record.id),
                FaultKind::Duplicate,
                message,
            );
            continue;
        }

        let mut plate = PlateVersion::new(name.clone());
        plate.int_version = int_version;
        if record.is_confirmed() {
            info!(
                shot = %shot.code,
                plate = %name,
                "Plate is confirmed in the database; filesystem checks will be skipped"
            );
            plate.state = VerificationState::Confirmed;
        }
        plate.db_record = Some(record);
        state.plates.insert(name, plate);
    }
    state
}

// ---------------------------------------------------------------------------
// Filesystem pass
// ---------------------------------------------------------------------------

/// Plates found on the filesystem for one shot.
#[derive(Debug, Default)]
pub struct FilesystemState {
    pub plates: IndexMap<String, PlateVersion>,
    pub faults: FaultLog,
    /// Whether the plates directory was enumerated.
    pub walked: bool,
    pub files_classified: usize,
    pub headers_read: usize,
}

impl FilesystemState {
    /// Attach found assets and metadata to the shot's plates.
    ///
    /// Assets replace whatever a previous filesystem pass attached; a plate
    /// only found here keeps the version number parsed from its files.
    pub fn commit(self, shot: &mut Shot, log: &mut FaultLog) {
        for (name, found) in self.plates {
            match shot.plates.get_mut(&name) {
                Some(plate) => {
                    plate.assets = found.assets;
                    if found.metadata.is_some() {
                        plate.metadata = found.metadata;
                    }
                    if plate.int_version.is_none() {
                        plate.int_version = found.int_version;
                    }
                }
                None => {
                    shot.plates.insert(name, found);
                }
            }
        }
        if shot.error_message.is_none() {
            shot.error_message = self.faults.shots.first().map(|f| f.message.clone());
        }
        log.extend(self.faults);
    }
}

/// Counts header reads made through the wrapped reader.
struct CountingReader<'a, R: ?Sized> {
    inner: &'a R,
    reads: Cell<usize>,
}

impl<R: MetadataReader + ?Sized> MetadataReader for CountingReader<'_, R> {
    fn read_header(&self, path: &Path) -> PlatecheckResult<HeaderAttributes> {
        self.reads.set(self.reads.get() + 1);
        self.inner.read_header(path)
    }
}

/// Plates directory of a shot.
pub fn plates_dir(shot_root: &Path) -> PathBuf {
    shot_root.join(PLATES_DIR)
}

/// Walk a shot's plates directory, classify what is there and check it.
///
/// The walk is skipped entirely when the shot has plates and all of them are
/// already confirmed.
pub fn build_filesystem_state<R: MetadataReader + ?Sized>(
    shot: &Shot,
    templates: &PlateTemplates,
    reader: &R,
    settings: &VerifierSettings,
) -> FilesystemState {
    let mut state = FilesystemState::default();
    let Some(root) = shot.root.as_deref() else {
        state.faults.record_shot(
            &shot.code,
            FaultKind::Completeness,
            format!("Shot {} has no filesystem location", shot.code),
        );
        return state;
    };
    let plates_dir = plates_dir(root);
    if !plates_dir.is_dir() {
        state.faults.record_shot(
            &shot.code,
            FaultKind::Completeness,
            format!(
                "Shot plates directory {} does not exist on the filesystem",
                plates_dir.display()
            ),
        );
        return state;
    }
    if shot.all_plates_confirmed() {
        info!(shot = %shot.code, "All plates are confirmed; skipping filesystem checks");
        return state;
    }

    debug!(shot = %shot.code, "Walking {}", plates_dir.display());
    let scan = collect_plate_files(&plates_dir);
    state.walked = true;
    state.files_classified = scan.files_seen;

    for rejected in &scan.rejected {
        let name = rejected
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut asset = FilesystemAsset::new(name, rejected.clone(), false);
        state.faults.record_asset(
            &shot.code,
            &mut asset,
            FaultKind::Naming,
            None,
            format!("File {} has a name that cannot be classified", rejected.display()),
        );
    }
    if scan.assets.is_empty() {
        state.faults.record_shot(
            &shot.code,
            FaultKind::Completeness,
            format!(
                "In Shot {}, plates directory {} exists but contains nothing that can be classified as a plate",
                shot.code,
                plates_dir.display()
            ),
        );
        return state;
    }

    let reader = CountingReader {
        inner: reader,
        reads: Cell::new(0),
    };
    for asset in scan.assets {
        examine_asset(shot, asset, templates, &reader, settings, &mut state);
    }
    state.headers_read = reader.reads.get();
    state
}

fn examine_asset<R: MetadataReader + ?Sized>(
    shot: &Shot,
    mut asset: FilesystemAsset,
    templates: &PlateTemplates,
    reader: &R,
    settings: &VerifierSettings,
    state: &mut FilesystemState,
) {
    let Some(matched) = templates.match_asset(&asset.full_path) else {
        let message = format!(
            "File {} does not match any naming convention; it is likely in the wrong folder",
            asset.full_path.display()
        );
        state
            .faults
            .record_asset(&shot.code, &mut asset, FaultKind::Naming, None, message);
        return;
    };
    asset.kind = Some(matched.kind);
    asset.published_file_type = Some(matched.published_file_type.clone());

    let mut metadata = None;
    if asset.is_sequence {
        debug!(shot = %shot.code, "Extracting metadata for sequence {}", asset.name);
        match extract_sequence_metadata(reader, &asset, settings.default_frame_rate) {
            Ok(md) => {
                check_sequence(shot, &mut asset, md.first_frame, md.last_frame, settings, state);
                metadata = Some(md);
            }
            Err(e) => {
                state.faults.record_asset(
                    &shot.code,
                    &mut asset,
                    FaultKind::Metadata,
                    None,
                    e.to_string(),
                );
                return;
            }
        }
    }

    let name = matched.version_name;
    if !state.plates.contains_key(&name) && !shot.plates.contains_key(&name) {
        warn!(
            shot = %shot.code,
            plate = %name,
            "Plate is on the filesystem but not in the database"
        );
    }
    let plate = state.plates.entry(name.clone()).or_insert_with(|| {
        let mut plate = PlateVersion::new(name);
        plate.int_version = matched.int_version;
        plate
    });
    if metadata.is_some() {
        plate.metadata = metadata;
    }
    debug!(
        shot = %shot.code,
        plate = %plate.name,
        "Found {} matching {}",
        asset.name,
        matched.kind
    );
    plate.assets.push(asset);
}

fn check_sequence(
    shot: &Shot,
    asset: &mut FilesystemAsset,
    first: u64,
    last: u64,
    settings: &VerifierSettings,
    state: &mut FilesystemState,
) {
    let Some(pattern) = FramePattern::parse(&asset.name) else {
        return;
    };
    let directory = asset
        .full_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let report = check_frames(
        &directory,
        &pattern,
        first,
        last,
        asset.size,
        settings.size_tolerance,
    );
    for issue in report.issues {
        let (kind, message) = match &issue {
            FrameIssue::Missing { frame, path } => (
                FaultKind::Completeness,
                format!(
                    "Plate {} is missing frame {frame} at {}",
                    asset.name,
                    path.display()
                ),
            ),
            FrameIssue::DeviantSize {
                frame, path, size, ..
            } => (
                FaultKind::Anomaly,
                format!(
                    "Plate {} has frame {frame} with a deviant size of {size} bytes at {}",
                    asset.name,
                    path.display()
                ),
            ),
        };
        state
            .faults
            .record_asset(&shot.code, asset, kind, Some(issue.frame()), message);
    }
}
