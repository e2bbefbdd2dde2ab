//! Shared typed models used across scanning, storage, and reconciliation.

use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::error;

// ---------------------------------------------------------------------------
// Status codes stored on database records
// ---------------------------------------------------------------------------

/// Version status written when a plate is created from the filesystem.
pub const STATUS_PENDING: &str = "na";

/// Version status written once a plate has been reconciled.
pub const STATUS_CONFIRMED: &str = "cfrm";

/// Shot status excluded from processing when omitted shots are skipped.
pub const STATUS_OMITTED: &str = "omt";

/// Shot type that never takes part in verification.
pub const SHOT_TYPE_BIDDING: &str = "Bidding";

/// Tag attached to every plate version.
pub const PLATE_TAG: &str = "Plate";

// ---------------------------------------------------------------------------
// 1. TemplateKind
// ---------------------------------------------------------------------------

/// The naming template a filesystem asset matched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Frames,
    PrimaryMovie,
    AlternateMovie,
    Lut,
}

impl TemplateKind {
    /// Match priority: the first template to validate wins.
    pub const PRIORITY: [TemplateKind; 4] = [
        TemplateKind::Frames,
        TemplateKind::PrimaryMovie,
        TemplateKind::AlternateMovie,
        TemplateKind::Lut,
    ];

    /// Template name as it appears in the `[templates]` config table.
    pub fn template_name(self) -> &'static str {
        match self {
            TemplateKind::Frames => "shot_plate_frames",
            TemplateKind::PrimaryMovie => "shot_plate_avidmov",
            TemplateKind::AlternateMovie => "shot_plate_vfxmov",
            TemplateKind::Lut => "shot_plate_lut",
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template_name())
    }
}

// ---------------------------------------------------------------------------
// 2. Extracted metadata
// ---------------------------------------------------------------------------

/// Identity slope/offset/power, in slope[3] offset[3] power[3] order.
pub const IDENTITY_SOP: [f64; 9] = [1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0];

/// ASC colour decision list values baked into a sequence header.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cdl {
    pub slope: [f64; 3],
    pub offset: [f64; 3],
    pub power: [f64; 3],
    pub saturation: f64,
}

impl Cdl {
    pub fn from_sop(sop: [f64; 9], saturation: f64) -> Self {
        Self {
            slope: [sop[0], sop[1], sop[2]],
            offset: [sop[3], sop[4], sop[5]],
            power: [sop[6], sop[7], sop[8]],
            saturation,
        }
    }

    pub fn sop(&self) -> [f64; 9] {
        [
            self.slope[0],
            self.slope[1],
            self.slope[2],
            self.offset[0],
            self.offset[1],
            self.offset[2],
            self.power[0],
            self.power[1],
            self.power[2],
        ]
    }
}

impl Default for Cdl {
    fn default() -> Self {
        Self::from_sop(IDENTITY_SOP, 1.0)
    }
}

/// Metadata derived from the boundary frames of an image sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub first_frame: u64,
    pub last_frame: u64,
    pub frame_count: u64,
    pub frame_range: String,
    pub frame_rate: f64,
    /// First frame time-code as a millisecond offset.
    pub first_frame_timecode: i64,
    /// Last frame time-code as a millisecond offset.
    pub last_frame_timecode: i64,
    pub lab_roll: Option<String>,
    pub camera_roll: Option<String>,
    pub cdl: Cdl,
}

// ---------------------------------------------------------------------------
// 3. Database records
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DbShot {
    pub id: i64,
    pub code: String,
    pub sequence: Option<String>,
    pub shot_type: Option<String>,
    pub status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DbTag {
    pub id: i64,
    pub name: String,
}

/// A plate version as stored in the asset database.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DbVersion {
    pub id: i64,
    pub code: String,
    pub status: Option<String>,
    pub first_frame: Option<i64>,
    pub last_frame: Option<i64>,
    pub frame_count: Option<i64>,
    pub frame_range: Option<String>,
    pub first_frame_timecode: Option<i64>,
    pub last_frame_timecode: Option<i64>,
    pub frame_rate: Option<f64>,
    pub has_uploaded_movie: bool,
}

impl DbVersion {
    pub fn is_confirmed(&self) -> bool {
        self.status.as_deref() == Some(STATUS_CONFIRMED)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DbPublishedFile {
    pub id: i64,
    pub code: String,
    pub path: String,
    pub version_number: i64,
    pub file_type: String,
    pub version_id: i64,
}

/// Filter for the shot listing.
#[derive(Clone, Debug, Default)]
pub struct ShotFilter {
    pub exclude_omitted: bool,
}

/// Payload for creating a new plate version.
#[derive(Clone, Debug, PartialEq)]
pub struct VersionDraft {
    pub code: String,
    pub shot_id: i64,
    pub status: String,
    pub tag_ids: Vec<i64>,
    pub metadata: VersionMetadata,
}

/// Partial update of a plate version; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VersionUpdate {
    pub status: Option<String>,
    pub first_frame: Option<i64>,
    pub last_frame: Option<i64>,
    pub frame_count: Option<i64>,
    pub frame_range: Option<String>,
    pub first_frame_timecode: Option<i64>,
    pub last_frame_timecode: Option<i64>,
    pub path_to_frames: Option<String>,
    pub path_to_movie: Option<String>,
    pub path_to_vfx_movie: Option<String>,
    pub path_to_lut: Option<String>,
}

impl VersionUpdate {
    /// Record the resolved path for an asset of the given kind.
    pub fn set_path(&mut self, kind: TemplateKind, path: String) {
        let slot = match kind {
            TemplateKind::Frames => &mut self.path_to_frames,
            TemplateKind::PrimaryMovie => &mut self.path_to_movie,
            TemplateKind::AlternateMovie => &mut self.path_to_vfx_movie,
            TemplateKind::Lut => &mut self.path_to_lut,
        };
        *slot = Some(path);
    }
}

/// Registration of one filesystem asset against a plate version.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishRequest {
    pub path: String,
    pub name: String,
    pub version_number: i64,
    pub file_type: String,
    pub version_id: i64,
    pub shot_id: i64,
}

// ---------------------------------------------------------------------------
// 4. In-memory reconciliation model
// ---------------------------------------------------------------------------

/// One file, or one logical image sequence, found under a shot's plates.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilesystemAsset {
    /// File name, or `head.%0Nd.ext` for sequences.
    pub name: String,
    pub full_path: PathBuf,
    pub is_sequence: bool,
    pub size: u64,
    /// Member frame filenames in discovery order (sequences only).
    pub frames: Vec<String>,
    pub kind: Option<TemplateKind>,
    pub published_file_type: Option<String>,
    pub error_message: Option<String>,
    pub already_published: bool,
}

impl FilesystemAsset {
    pub fn new(name: String, full_path: PathBuf, is_sequence: bool) -> Self {
        Self {
            name,
            full_path,
            is_sequence,
            size: 0,
            frames: Vec::new(),
            kind: None,
            published_file_type: None,
            error_message: None,
            already_published: false,
        }
    }

    pub fn append_error(&mut self, message: &str) {
        match &mut self.error_message {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(message);
            }
            None => self.error_message = Some(message.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Unverified,
    Confirmed,
}

/// A named plate version of a shot, joined across database and filesystem.
#[derive(Clone, Debug, PartialEq)]
pub struct PlateVersion {
    pub name: String,
    pub int_version: Option<i64>,
    pub state: VerificationState,
    pub db_record: Option<DbVersion>,
    pub metadata: Option<VersionMetadata>,
    pub assets: Vec<FilesystemAsset>,
}

impl PlateVersion {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            int_version: None,
            state: VerificationState::Unverified,
            db_record: None,
            metadata: None,
            assets: Vec::new(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == VerificationState::Confirmed
    }
}

/// One production shot and everything gathered about its plates this run.
#[derive(Clone, Debug, PartialEq)]
pub struct Shot {
    pub code: String,
    pub root: Option<PathBuf>,
    pub db: DbShot,
    pub plates: IndexMap<String, PlateVersion>,
    pub error_message: Option<String>,
}

impl Shot {
    pub fn new(db: DbShot, root: Option<PathBuf>) -> Self {
        Self {
            code: db.code.clone(),
            root,
            db,
            plates: IndexMap::new(),
            error_message: None,
        }
    }

    pub fn status(&self) -> Option<&str> {
        self.db.status.as_deref()
    }

    /// True when there is at least one plate and every plate is confirmed.
    pub fn all_plates_confirmed(&self) -> bool {
        !self.plates.is_empty() && self.plates.values().all(PlateVersion::is_confirmed)
    }
}

// ---------------------------------------------------------------------------
// 5. Faults
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// A file or database name fails template validation.
    Naming,
    /// Two database records resolve to the same canonical name.
    Duplicate,
    /// Missing frames, metadata, files or directories.
    Completeness,
    /// Database and filesystem disagree.
    Consistency,
    /// A frame size deviates from the sequence average.
    Anomaly,
    /// A collaborator call failed.
    Transport,
    /// A header could not be read.
    Metadata,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FaultKind::Naming => "naming",
            FaultKind::Duplicate => "duplicate",
            FaultKind::Completeness => "completeness",
            FaultKind::Consistency => "consistency",
            FaultKind::Anomaly => "anomaly",
            FaultKind::Transport => "transport",
            FaultKind::Metadata => "metadata",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShotFault {
    pub shot: String,
    pub kind: FaultKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VersionFault {
    pub shot: String,
    pub version: String,
    pub db_id: Option<i64>,
    pub kind: FaultKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssetFault {
    pub shot: String,
    pub asset: String,
    pub path: PathBuf,
    pub kind: FaultKind,
    pub frame: Option<u64>,
    pub message: String,
}

/// Append-only collection of every fault found during a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FaultLog {
    pub shots: Vec<ShotFault>,
    pub versions: Vec<VersionFault>,
    pub assets: Vec<AssetFault>,
}

impl FaultLog {
    pub fn is_empty(&self) -> bool {
        self.shots.is_empty() && self.versions.is_empty() && self.assets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.shots.len() + self.versions.len() + self.assets.len()
    }

    pub fn extend(&mut self, other: FaultLog) {
        self.shots.extend(other.shots);
        self.versions.extend(other.versions);
        self.assets.extend(other.assets);
    }

    pub fn record_shot(&mut self, shot: &str, kind: FaultKind, message: impl Into<String>) {
        let message = message.into();
        error!(shot = %shot, kind = %kind, "{message}");
        self.shots.push(ShotFault {
            shot: shot.to_string(),
            kind,
            message,
        });
    }

    pub fn record_version(
        &mut self,
        shot: &str,
        version: &str,
        db_id: Option<i64>,
        kind: FaultKind,
        message: impl Into<String>,
    ) {
        let message = message.into();
        error!(shot = %shot, plate = %version, kind = %kind, "{message}");
        self.versions.push(VersionFault {
            shot: shot.to_string(),
            version: version.to_string(),
            db_id,
            kind,
            message,
        });
    }

    /// Record a fault against `asset` and append it to the asset's own
    /// error message.
    pub fn record_asset(
        &mut self,
        shot: &str,
        asset: &mut FilesystemAsset,
        kind: FaultKind,
        frame: Option<u64>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        error!(shot = %shot, asset = %asset.name, kind = %kind, "{message}");
        asset.append_error(&message);
        self.assets.push(AssetFault {
            shot: shot.to_string(),
            asset: asset.name.clone(),
            path: asset.full_path.clone(),
            kind,
            frame,
            message,
        });
    }
}
