//! Shared fixtures for unit tests: template sets, a scripted header reader
//! and an in-memory asset database that records every call.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::errors::{PlatecheckError, PlatecheckResult, PublishError};
use crate::models::{
    DbPublishedFile, DbShot, DbTag, DbVersion, PublishRequest, ShotFilter, TemplateKind,
    VersionDraft, VersionUpdate, SHOT_TYPE_BIDDING, STATUS_OMITTED,
};
use crate::scanner::metadata::{HeaderAttributes, MetadataReader};
use crate::scanner::templates::{AssetTemplate, KeyType, PlateTemplates, StrFilter, Template};
use crate::store::AssetDatabase;
use crate::timecode::Timecode;

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

pub(crate) fn sample_keys() -> IndexMap<String, KeyType> {
    let mut keys = IndexMap::new();
    keys.insert("Sequence".to_string(), KeyType::Str { filter: None });
    keys.insert("Shot".to_string(), KeyType::Str { filter: None });
    keys.insert(
        "plate_name".to_string(),
        KeyType::Str {
            filter: Some(StrFilter::Alphanumeric),
        },
    );
    keys.insert("version".to_string(), KeyType::Int { width: 3 });
    keys.insert("SEQ".to_string(), KeyType::Sequence { width: 4 });
    keys
}

fn build_templates(root: &Path, version_name: &str, assets: [(TemplateKind, &str, &str); 4]) -> PlateTemplates {
    let keys = sample_keys();
    let rooted = |name: &str, def: &str| {
        Template::parse(name, def, &keys, Some(root.to_path_buf())).unwrap()
    };
    PlateTemplates::new(
        rooted("shot_root", "sequences/{Sequence}/{Shot}"),
        Template::parse("plate_version_name", version_name, &keys, None).unwrap(),
        assets
            .into_iter()
            .map(|(kind, def, file_type)| AssetTemplate {
                kind,
                template: rooted(kind.template_name(), def),
                published_file_type: file_type.to_string(),
            })
            .collect(),
    )
    .unwrap()
}

/// Plates under `plates/{plate_name}/v{version}/`, named
/// `{Shot}_{plate_name}_v{version}`.
pub(crate) fn sample_templates(root: &Path) -> PlateTemplates {
    let dir = "sequences/{Sequence}/{Shot}/plates/{plate_name}/v{version}/{Shot}_{plate_name}_v{version}";
    build_templates(
        root,
        "{Shot}_{plate_name}_v{version}",
        [
            (TemplateKind::Frames, &format!("{dir}.{{SEQ}}.exr"), "Plate EXR Sequence"),
            (TemplateKind::PrimaryMovie, &format!("{dir}_avid.mov"), "Plate Avid Movie"),
            (TemplateKind::AlternateMovie, &format!("{dir}_vfx.mov"), "Plate VFX Movie"),
            (TemplateKind::Lut, &format!("{dir}.cube"), "Plate LUT"),
        ],
    )
}

/// Plates under `plates/v{version}/`, named `{Shot}.v{version}`.
pub(crate) fn dotted_templates(root: &Path) -> PlateTemplates {
    let dir = "sequences/{Sequence}/{Shot}/plates/v{version}/{Shot}.v{version}";
    build_templates(
        root,
        "{Shot}.v{version}",
        [
            (TemplateKind::Frames, &format!("{dir}.{{SEQ}}.exr"), "Plate EXR Sequence"),
            (TemplateKind::PrimaryMovie, &format!("{dir}_avid.mov"), "Plate Avid Movie"),
            (TemplateKind::AlternateMovie, &format!("{dir}_vfx.mov"), "Plate VFX Movie"),
            (TemplateKind::Lut, &format!("{dir}.cube"), "Plate LUT"),
        ],
    )
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// A 24 fps header whose time-code is the frame number itself.
pub(crate) fn plate_header(frame: u64) -> HeaderAttributes {
    let timecode = Timecode::from_seconds(24.0, frame as f64 / 24.0);
    HeaderAttributes {
        framerate_numerator: Some(24),
        framerate_denominator: Some(1),
        absolute_timecode: Some(timecode.to_string()),
        reel_id_full: Some("A001_C001_0101AB".to_string()),
        asc_sat: Some(1.0),
        asc_sop: Some("(1 1 1)(0 0 0)(1 1 1)".to_string()),
    }
}

/// Serves scripted headers by path and counts every read.
#[derive(Default)]
pub(crate) struct FakeReader {
    headers: RefCell<HashMap<String, HeaderAttributes>>,
    reads: Cell<usize>,
}

impl FakeReader {
    pub(crate) fn insert(&self, path: &str, header: HeaderAttributes) {
        self.headers.borrow_mut().insert(path.to_string(), header);
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl MetadataReader for FakeReader {
    fn read_header(&self, path: &Path) -> PlatecheckResult<HeaderAttributes> {
        self.reads.set(self.reads.get() + 1);
        self.headers
            .borrow()
            .get(path.to_string_lossy().as_ref())
            .cloned()
            .ok_or_else(|| PlatecheckError::Metadata(format!("cannot open {}", path.display())))
    }
}

/// Write `{head}.{frame:04}.exr` for every frame and script its header.
pub(crate) fn write_sequence(
    reader: &FakeReader,
    dir: &Path,
    head: &str,
    frames: impl IntoIterator<Item = u64>,
    size: usize,
) {
    std::fs::create_dir_all(dir).unwrap();
    for frame in frames {
        let path = dir.join(format!("{head}.{frame:04}.exr"));
        std::fs::write(&path, vec![0u8; size]).unwrap();
        reader.insert(&path.to_string_lossy(), plate_header(frame));
    }
}

// ---------------------------------------------------------------------------
// Asset database
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockState {
    next_id: i64,
    shots: Vec<DbShot>,
    tags: Vec<DbTag>,
    /// `(shot_id, version)` pairs.
    versions: Vec<(i64, DbVersion)>,
    drafts: Vec<VersionDraft>,
    published: Vec<DbPublishedFile>,
    uploads: Vec<(i64, PathBuf)>,
    /// Remaining injected publish failures.
    publish_failures: Vec<PublishError>,
}

impl MockState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`AssetDatabase`] with call counters and failure injection.
#[derive(Default)]
pub(crate) struct MockDatabase {
    state: RefCell<MockState>,
    publish_calls: Cell<usize>,
}

impl MockDatabase {
    pub(crate) fn add_shot(&self, code: &str, sequence: Option<&str>) -> i64 {
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.shots.push(DbShot {
            id,
            code: code.to_string(),
            sequence: sequence.map(str::to_string),
            shot_type: None,
            status: None,
        });
        id
    }

    /// Store `version` under a fresh id and return it.
    pub(crate) fn add_version(&self, shot_id: i64, mut version: DbVersion) -> i64 {
        let mut state = self.state.borrow_mut();
        version.id = state.next_id();
        let id = version.id;
        state.versions.push((shot_id, version));
        id
    }

    pub(crate) fn add_published(&self, version_id: i64, code: &str) {
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.published.push(DbPublishedFile {
            id,
            code: code.to_string(),
            path: String::new(),
            version_number: 1,
            file_type: String::new(),
            version_id,
        });
    }

    /// Fail the next `count` publish calls with `error`.
    pub(crate) fn fail_publishes(&self, count: usize, error: PublishError) {
        let mut state = self.state.borrow_mut();
        state
            .publish_failures
            .extend(std::iter::repeat(error).take(count));
    }

    pub(crate) fn versions(&self) -> Vec<DbVersion> {
        self.state
            .borrow()
            .versions
            .iter()
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub(crate) fn drafts(&self) -> Vec<VersionDraft> {
        self.state.borrow().drafts.clone()
    }

    pub(crate) fn published(&self) -> Vec<DbPublishedFile> {
        self.state.borrow().published.clone()
    }

    pub(crate) fn uploads(&self) -> Vec<PathBuf> {
        self.state
            .borrow()
            .uploads
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub(crate) fn publish_calls(&self) -> usize {
        self.publish_calls.get()
    }
}

impl AssetDatabase for MockDatabase {
    fn find_shots(&self, filter: &ShotFilter) -> PlatecheckResult<Vec<DbShot>> {
        let mut shots: Vec<DbShot> = self
            .state
            .borrow()
            .shots
            .iter()
            .filter(|s| s.shot_type.as_deref() != Some(SHOT_TYPE_BIDDING))
            .filter(|s| !filter.exclude_omitted || s.status.as_deref() != Some(STATUS_OMITTED))
            .cloned()
            .collect();
        shots.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(shots)
    }

    fn find_plate_versions(&self, shot: &DbShot) -> PlatecheckResult<Vec<DbVersion>> {
        Ok(self
            .state
            .borrow()
            .versions
            .iter()
            .filter(|(shot_id, _)| *shot_id == shot.id)
            .map(|(_, v)| v.clone())
            .collect())
    }

    fn find_published_files(&self, version_id: i64) -> PlatecheckResult<Vec<DbPublishedFile>> {
        Ok(self
            .state
            .borrow()
            .published
            .iter()
            .filter(|p| p.version_id == version_id)
            .cloned()
            .collect())
    }

    fn ensure_tag(&self, name: &str) -> PlatecheckResult<DbTag> {
        let mut state = self.state.borrow_mut();
        if let Some(tag) = state.tags.iter().find(|t| t.name == name) {
            return Ok(tag.clone());
        }
        let tag = DbTag {
            id: state.next_id(),
            name: name.to_string(),
        };
        state.tags.push(tag.clone());
        Ok(tag)
    }

    fn create_version(&self, draft: &VersionDraft) -> PlatecheckResult<DbVersion> {
        let md = &draft.metadata;
        let mut state = self.state.borrow_mut();
        let version = DbVersion {
            id: state.next_id(),
            code: draft.code.clone(),
            status: Some(draft.status.clone()),
            first_frame: Some(md.first_frame as i64),
            last_frame: Some(md.last_frame as i64),
            frame_count: Some(md.frame_count as i64),
            frame_range: Some(md.frame_range.clone()),
            first_frame_timecode: Some(md.first_frame_timecode),
            last_frame_timecode: Some(md.last_frame_timecode),
            frame_rate: Some(md.frame_rate),
            has_uploaded_movie: false,
        };
        state.drafts.push(draft.clone());
        state.versions.push((draft.shot_id, version.clone()));
        Ok(version)
    }

    fn update_version(&self, version_id: i64, update: &VersionUpdate) -> PlatecheckResult<()> {
        let mut state = self.state.borrow_mut();
        let (_, version) = state
            .versions
            .iter_mut()
            .find(|(_, v)| v.id == version_id)
            .ok_or_else(|| PlatecheckError::Database(format!("no version with id {version_id}")))?;
        if let Some(status) = &update.status {
            version.status = Some(status.clone());
        }
        version.first_frame = update.first_frame.or(version.first_frame);
        version.last_frame = update.last_frame.or(version.last_frame);
        version.frame_count = update.frame_count.or(version.frame_count);
        if let Some(range) = &update.frame_range {
            version.frame_range = Some(range.clone());
        }
        version.first_frame_timecode = update.first_frame_timecode.or(version.first_frame_timecode);
        version.last_frame_timecode = update.last_frame_timecode.or(version.last_frame_timecode);
        Ok(())
    }

    fn upload_movie(&self, version_id: i64, path: &Path) -> PlatecheckResult<()> {
        let mut state = self.state.borrow_mut();
        state.uploads.push((version_id, path.to_path_buf()));
        if let Some((_, version)) = state.versions.iter_mut().find(|(_, v)| v.id == version_id) {
            version.has_uploaded_movie = true;
        }
        Ok(())
    }

    fn register_publish(&self, request: &PublishRequest) -> Result<DbPublishedFile, PublishError> {
        self.publish_calls.set(self.publish_calls.get() + 1);
        let mut state = self.state.borrow_mut();
        if !state.publish_failures.is_empty() {
            return Err(state.publish_failures.remove(0));
        }
        let published = DbPublishedFile {
            id: state.next_id(),
            code: request.name.clone(),
            path: request.path.clone(),
            version_number: request.version_number,
            file_type: request.file_type.clone(),
            version_id: request.version_id,
        };
        state.published.push(published.clone());
        Ok(published)
    }
}
