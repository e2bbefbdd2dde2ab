//! Filename classification and plate directory scanning.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::models::FilesystemAsset;

// ---------------------------------------------------------------------------
// Regex patterns (compiled once via LazyLock)
// ---------------------------------------------------------------------------

// Anchored at the end: a trailing suffix such as `.exr.bak` or `.exr~` makes
// the name a naming fault instead of a sequence member or movie.
static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<head>[0-9a-zA-Z_-]+)(?:\.(?P<frame>[0-9]{4,}))?\.(?P<ext>[a-zA-Z0-9]{1,4})$")
        .unwrap()
});

static PATTERN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<head>[0-9a-zA-Z_-]+)\.%0(?P<width>[0-9]+)d\.(?P<ext>[a-zA-Z0-9]{1,4})$")
        .unwrap()
});

/// Entries skipped without being reported.
const IMPLICIT_IGNORED_NAMES: &[&str] = &[".DS_Store", "Thumbs.db"];

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// A frame group parsed out of a filename.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameNumber {
    pub value: u64,
    pub width: usize,
}

/// A filename split into head, optional frame group and extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifiedName {
    pub head: String,
    pub frame: Option<FrameNumber>,
    pub ext: String,
}

impl ClassifiedName {
    pub fn is_sequence(&self) -> bool {
        self.frame.is_some()
    }

    /// `head.%0Nd.ext` for sequence members, `head.ext` otherwise.
    pub fn pattern_name(&self) -> String {
        match self.frame {
            Some(frame) => FramePattern {
                head: self.head.clone(),
                width: frame.width,
                ext: self.ext.clone(),
            }
            .to_string(),
            None => format!("{}.{}", self.head, self.ext),
        }
    }
}

/// Split `name` against the plate naming pattern.
///
/// Returns `None` for names that cannot take part in verification.
pub fn classify_filename(name: &str) -> Option<ClassifiedName> {
    let caps = FILENAME_RE.captures(name)?;
    let frame = match caps.name("frame") {
        Some(m) => Some(FrameNumber {
            value: m.as_str().parse().ok()?,
            width: m.as_str().len(),
        }),
        None => None,
    };
    Some(ClassifiedName {
        head: caps["head"].to_string(),
        frame,
        ext: caps["ext"].to_string(),
    })
}

/// Frame number of a sequence member filename.
pub fn frame_number(name: &str) -> Option<u64> {
    classify_filename(name)?.frame.map(|f| f.value)
}

/// printf-style sequence pattern, e.g. `SH010_main_v001.%04d.exr`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramePattern {
    pub head: String,
    pub width: usize,
    pub ext: String,
}

impl FramePattern {
    pub fn parse(pattern: &str) -> Option<Self> {
        let caps = PATTERN_RE.captures(pattern)?;
        Some(Self {
            head: caps["head"].to_string(),
            width: caps["width"].parse().ok()?,
            ext: caps["ext"].to_string(),
        })
    }

    pub fn frame_filename(&self, frame: u64) -> String {
        format!(
            "{}.{:0width$}.{}",
            self.head,
            frame,
            self.ext,
            width = self.width
        )
    }
}

impl std::fmt::Display for FramePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.%0{}d.{}", self.head, self.width, self.ext)
    }
}

// ---------------------------------------------------------------------------
// Directory scanning
// ---------------------------------------------------------------------------

/// Everything found under one plates directory.
#[derive(Debug, Default)]
pub struct PlateScan {
    /// Classified assets in discovery order; sequences are folded into one entry.
    pub assets: Vec<FilesystemAsset>,
    /// Files whose names did not classify.
    pub rejected: Vec<PathBuf>,
    /// Number of files that classified.
    pub files_seen: usize,
}

/// Walk `plates_dir` recursively and fold its files into assets.
///
/// Sequence members sharing a directory and a `head.%0Nd.ext` pattern are
/// grouped into one asset whose size is the sum of its members.
pub fn collect_plate_files(plates_dir: &Path) -> PlateScan {
    let mut found: IndexMap<PathBuf, FilesystemAsset> = IndexMap::new();
    let mut scan = PlateScan::default();

    let walker = WalkDir::new(plates_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error accessing entry under {}: {e}", plates_dir.display());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_string();
        if IMPLICIT_IGNORED_NAMES.contains(&file_name.as_str()) {
            continue;
        }
        let Some(classified) = classify_filename(&file_name) else {
            warn!("Skipping file with bad name: {}", entry.path().display());
            scan.rejected.push(entry.path().to_path_buf());
            continue;
        };

        let directory = entry.path().parent().unwrap_or(plates_dir);
        let pattern_name = classified.pattern_name();
        let full_path = directory.join(&pattern_name);
        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                warn!("Unable to stat {}: {e}", entry.path().display());
                0
            }
        };

        let asset = found.entry(full_path.clone()).or_insert_with(|| {
            FilesystemAsset::new(pattern_name, full_path, classified.is_sequence())
        });
        if classified.is_sequence() {
            asset.frames.push(file_name);
        }
        asset.size += size;
        scan.files_seen += 1;
    }

    debug!(
        "Scanned {}: {} files into {} assets, {} rejected",
        plates_dir.display(),
        scan.files_seen,
        found.len(),
        scan.rejected.len()
    );
    scan.assets = found.into_values().collect();
    scan
}
