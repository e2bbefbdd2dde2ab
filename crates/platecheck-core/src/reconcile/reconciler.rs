//! Writes the reconciled plate state back to the asset database.
//!
//! Per plate the path is: skip if confirmed, otherwise create or update the
//! version record, publish every asset not yet published, upload a movie
//! when the record has none, then mark the record confirmed.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::models::{
    DbTag, DbVersion, FaultKind, FaultLog, PlateVersion, PublishRequest, Shot, VerificationState,
    VersionDraft, VersionMetadata, VersionUpdate, STATUS_CONFIRMED, STATUS_PENDING,
};
use crate::reconcile::engine::RunStats;
use crate::reconcile::retry::RetryPolicy;
use crate::store::AssetDatabase;
use crate::timecode::Timecode;

/// Version number used when a plate has none.
const FALLBACK_VERSION_NUMBER: i64 = 1;

/// Compare the fields both sides can disagree on.
///
/// A field is only compared when both the record and the filesystem hold a
/// non-zero value. Time-codes are compared as frames at the plate's rate.
pub fn consistency_mismatches(record: &DbVersion, metadata: &VersionMetadata) -> Vec<String> {
    let mut mismatches = Vec::new();

    let fs_count = metadata.frame_count as i64;
    if let Some(db_count) = record.frame_count.filter(|c| *c != 0) {
        if fs_count != 0 && db_count != fs_count {
            mismatches.push(format!(
                "frame_count in database value of {db_count} does not match frame_count in filesystem value of {fs_count}"
            ));
        }
    }

    let rate = metadata.frame_rate;
    let timecodes = [
        (
            "first_frame_timecode",
            record.first_frame_timecode,
            metadata.first_frame_timecode,
        ),
        (
            "last_frame_timecode",
            record.last_frame_timecode,
            metadata.last_frame_timecode,
        ),
    ];
    for (field, db_value, fs_value) in timecodes {
        let Some(db_value) = db_value.filter(|v| *v != 0) else {
            continue;
        };
        if fs_value == 0 {
            continue;
        }
        let db_tc = Timecode::from_millis(rate, db_value);
        let fs_tc = Timecode::from_millis(rate, fs_value);
        if db_tc != fs_tc {
            mismatches.push(format!(
                "{field} in database value of {db_tc} does not match {field} in filesystem value of {fs_tc}"
            ));
        }
    }
    mismatches
}

/// Path to upload for a plate: the primary movie when it exists and is not
/// empty, otherwise the alternate movie under the same conditions.
pub fn choose_upload(primary: &Path, alternate: Option<&Path>) -> Option<PathBuf> {
    let usable = |path: &Path| {
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    };
    if usable(primary) {
        return Some(primary.to_path_buf());
    }
    alternate.filter(|p| usable(p)).map(Path::to_path_buf)
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Drives one shot's plates to `confirmed` through the database.
pub struct Reconciler<'a, D: AssetDatabase + ?Sized> {
    db: &'a D,
    plate_tag: &'a DbTag,
    retry: &'a RetryPolicy,
}

impl<'a, D: AssetDatabase + ?Sized> Reconciler<'a, D> {
    pub fn new(db: &'a D, plate_tag: &'a DbTag, retry: &'a RetryPolicy) -> Self {
        Self {
            db,
            plate_tag,
            retry,
        }
    }

    pub fn reconcile_shot(&self, shot: &mut Shot, log: &mut FaultLog, stats: &mut RunStats) {
        let Shot {
            code,
            db,
            plates,
            error_message,
            ..
        } = shot;
        if plates.is_empty() {
            let message = format!(
                "Shot {code} has no plates, either in the database or on the filesystem"
            );
            error_message.get_or_insert_with(|| message.clone());
            log.record_shot(code, FaultKind::Completeness, message);
            return;
        }

        for plate in plates.values_mut() {
            if plate.is_confirmed() {
                info!(shot = %code, plate = %plate.name, "Plate already verified; skipping");
                continue;
            }
            let Some(metadata) = plate.metadata.clone() else {
                let message = format!(
                    "For Shot {code}, Plate {} has no version metadata from an image sequence",
                    plate.name
                );
                error_message.get_or_insert_with(|| message.clone());
                log.record_shot(code, FaultKind::Completeness, message);
                continue;
            };
            if plate.assets.is_empty() {
                let message = format!(
                    "For Shot {code}, Plate {} has no verifiable files on the filesystem",
                    plate.name
                );
                error_message.get_or_insert_with(|| message.clone());
                log.record_shot(code, FaultKind::Completeness, message);
                continue;
            }
            self.reconcile_plate(code, db.id, plate, metadata, log, stats);
        }
    }

    fn reconcile_plate(
        &self,
        shot_code: &str,
        shot_id: i64,
        plate: &mut PlateVersion,
        metadata: VersionMetadata,
        log: &mut FaultLog,
        stats: &mut RunStats,
    ) {
        let is_new = plate.db_record.is_none();
        let mut update = VersionUpdate {
            status: Some(STATUS_CONFIRMED.to_string()),
            ..Default::default()
        };

        let record = match plate.db_record.clone() {
            None => {
                info!(shot = %shot_code, plate = %plate.name, "Creating plate in the database");
                let draft = VersionDraft {
                    code: plate.name.clone(),
                    shot_id,
                    status: STATUS_PENDING.to_string(),
                    tag_ids: vec![self.plate_tag.id],
                    metadata: metadata.clone(),
                };
                match self.db.create_version(&draft) {
                    Ok(created) => {
                        stats.versions_created += 1;
                        plate.db_record = Some(created.clone());
                        created
                    }
                    Err(e) => {
                        log.record_version(
                            shot_code,
                            &plate.name,
                            None,
                            FaultKind::Transport,
                            format!("Unable to create plate {}: {e}", plate.name),
                        );
                        return;
                    }
                }
            }
            Some(record) => {
                let mismatches = consistency_mismatches(&record, &metadata);
                if !mismatches.is_empty() {
                    log.record_version(
                        shot_code,
                        &plate.name,
                        Some(record.id),
                        FaultKind::Consistency,
                        mismatches.join("\n"),
                    );
                }
                debug!(
                    shot = %shot_code,
                    plate = %plate.name,
                    "Updating frame range from the filesystem"
                );
                update.frame_count = Some(metadata.frame_count as i64);
                update.first_frame_timecode = Some(metadata.first_frame_timecode);
                update.last_frame_timecode = Some(metadata.last_frame_timecode);
                update.first_frame = Some(metadata.first_frame as i64);
                update.last_frame = Some(metadata.last_frame as i64);
                update.frame_range = Some(metadata.frame_range.clone());

                match self.db.find_published_files(record.id) {
                    Ok(published) => {
                        for asset in plate.assets.iter_mut() {
                            if let Some(existing) = published.iter().find(|p| p.code == asset.name) {
                                info!(
                                    shot = %shot_code,
                                    plate = %plate.name,
                                    "{} is already published with ID {}; skipping",
                                    existing.code,
                                    existing.id
                                );
                                asset.already_published = true;
                            }
                        }
                    }
                    Err(e) => {
                        log.record_version(
                            shot_code,
                            &plate.name,
                            Some(record.id),
                            FaultKind::Transport,
                            format!("Unable to list published files: {e}"),
                        );
                        return;
                    }
                }
                record
            }
        };

        let all_published =
            self.publish_assets(shot_code, shot_id, &record, plate, &mut update, log, stats);
        self.upload_movie(shot_code, &record, plate, &update, log, stats);

        if !all_published {
            // Leave the status alone so the next run retries the publishes.
            update.status = None;
        }
        debug!(shot = %shot_code, plate = %plate.name, "Writing {update:?}");
        match self.db.update_version(record.id, &update) {
            Ok(()) => {
                if !is_new {
                    stats.versions_updated += 1;
                }
                if all_published {
                    plate.state = VerificationState::Confirmed;
                    if let Some(r) = plate.db_record.as_mut() {
                        r.status = Some(STATUS_CONFIRMED.to_string());
                    }
                }
            }
            Err(e) => log.record_version(
                shot_code,
                &plate.name,
                Some(record.id),
                FaultKind::Transport,
                format!("Unable to update plate {}: {e}", plate.name),
            ),
        }
    }

    /// Register every unpublished asset and record the asset paths on
    /// `update`. Returns false when any registration failed.
    #[allow(clippy::too_many_arguments)]
    fn publish_assets(
        &self,
        shot_code: &str,
        shot_id: i64,
        record: &DbVersion,
        plate: &mut PlateVersion,
        update: &mut VersionUpdate,
        log: &mut FaultLog,
        stats: &mut RunStats,
    ) -> bool {
        for asset in &plate.assets {
            if let Some(kind) = asset.kind {
                update.set_path(kind, path_string(&asset.full_path));
            }
        }
        if plate.assets.iter().all(|a| a.already_published) {
            return true;
        }

        let version_number = match plate.int_version {
            Some(v) if v > 0 => v,
            _ => {
                log.record_version(
                    shot_code,
                    &plate.name,
                    Some(record.id),
                    FaultKind::Naming,
                    format!(
                        "Plate {} has no positive version number; defaulting to {FALLBACK_VERSION_NUMBER}",
                        plate.name
                    ),
                );
                FALLBACK_VERSION_NUMBER
            }
        };

        let mut all_published = true;
        for asset in plate.assets.iter_mut().filter(|a| !a.already_published) {
            info!(shot = %shot_code, plate = %plate.name, "Publishing {}", asset.name);
            let request = PublishRequest {
                path: path_string(&asset.full_path),
                name: asset.name.clone(),
                version_number,
                file_type: asset.published_file_type.clone().unwrap_or_default(),
                version_id: record.id,
                shot_id,
            };
            let result = self.retry.run("register_publish", || {
                stats.publish_attempts += 1;
                self.db.register_publish(&request)
            });
            match result {
                Ok(published) => {
                    debug!(
                        shot = %shot_code,
                        "Published {} with database ID {}",
                        asset.name,
                        published.id
                    );
                    stats.publishes += 1;
                    asset.already_published = true;
                }
                Err(e) => {
                    all_published = false;
                    log.record_version(
                        shot_code,
                        &plate.name,
                        Some(record.id),
                        FaultKind::Transport,
                        format!("Unable to publish {}: {e}", asset.name),
                    );
                }
            }
        }
        all_published
    }

    fn upload_movie(
        &self,
        shot_code: &str,
        record: &DbVersion,
        plate: &PlateVersion,
        update: &VersionUpdate,
        log: &mut FaultLog,
        stats: &mut RunStats,
    ) {
        let Some(primary) = update.path_to_movie.as_deref() else {
            return;
        };
        if record.has_uploaded_movie {
            debug!(shot = %shot_code, plate = %plate.name, "Movie already uploaded; skipping");
            return;
        }
        let alternate = update.path_to_vfx_movie.as_deref().map(Path::new);
        let Some(movie) = choose_upload(Path::new(primary), alternate) else {
            log.record_version(
                shot_code,
                &plate.name,
                Some(record.id),
                FaultKind::Completeness,
                format!(
                    "Unable to upload a movie for plate {}: no non-empty movie file exists",
                    plate.name
                ),
            );
            return;
        };
        info!(shot = %shot_code, plate = %plate.name, "Uploading movie {}", movie.display());
        match self.db.upload_movie(record.id, &movie) {
            Ok(()) => stats.uploads += 1,
            Err(e) => log.record_version(
                shot_code,
                &plate.name,
                Some(record.id),
                FaultKind::Transport,
                format!("Unable to upload movie {}: {e}", movie.display()),
            ),
        }
    }
}
