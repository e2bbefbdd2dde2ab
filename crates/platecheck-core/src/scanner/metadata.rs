//! Sequence metadata extraction from boundary frame headers.

use std::path::Path;

use tracing::{debug, warn};

use crate::errors::{PlatecheckError, PlatecheckResult};
use crate::models::{Cdl, FilesystemAsset, VersionMetadata, IDENTITY_SOP};
use crate::scanner::filesystem::frame_number;
use crate::timecode::Timecode;

/// Frame rate used when a header carries none.
pub const DEFAULT_FRAME_RATE: f64 = 24.0;

/// Header attributes the verifier understands, validated once when read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeaderAttributes {
    pub framerate_numerator: Option<i64>,
    pub framerate_denominator: Option<i64>,
    /// Absolute time-code, `HH:MM:SS:FF`.
    pub absolute_timecode: Option<String>,
    pub reel_id_full: Option<String>,
    pub asc_sat: Option<f64>,
    /// Slope/offset/power as `(s s s)(o o o)(p p p)`.
    pub asc_sop: Option<String>,
}

impl HeaderAttributes {
    pub fn frame_rate(&self) -> Option<f64> {
        match (self.framerate_numerator, self.framerate_denominator) {
            (Some(num), Some(den)) if num != 0 && den != 0 => Some(num as f64 / den as f64),
            _ => None,
        }
    }
}

/// Reads header attributes from a single media file.
pub trait MetadataReader {
    fn read_header(&self, path: &Path) -> PlatecheckResult<HeaderAttributes>;
}

/// Parse ASC slope/offset/power text into nine values.
///
/// Values past the ninth are ignored. Anything unparseable, or fewer than
/// nine values, yields the identity.
pub fn parse_asc_sop(text: &str) -> [f64; 9] {
    let cleaned = text.replace(")(", " ").replace(['(', ')'], " ");
    let mut values = IDENTITY_SOP;
    let mut count = 0;
    for token in cleaned.split_whitespace().take(values.len()) {
        match token.parse::<f64>() {
            Ok(v) if v.is_finite() => {
                values[count] = v;
                count += 1;
            }
            _ => return IDENTITY_SOP,
        }
    }
    if count < values.len() {
        return IDENTITY_SOP;
    }
    values
}

/// First and last member of a sequence by numeric frame number.
pub fn sequence_bounds(frames: &[String]) -> Option<((u64, &str), (u64, &str))> {
    let mut numbered: Vec<(u64, &str)> = frames
        .iter()
        .filter_map(|f| frame_number(f).map(|n| (n, f.as_str())))
        .collect();
    numbered.sort_unstable_by_key(|(n, _)| *n);
    Some((*numbered.first()?, *numbered.last()?))
}

fn timecode_millis(rate: f64, text: Option<&str>, path: &Path) -> i64 {
    let Some(text) = text else {
        return 0;
    };
    match Timecode::from_string(rate, text) {
        Ok(tc) => tc.to_millis(),
        Err(e) => {
            warn!("Ignoring time-code in {}: {e}", path.display());
            0
        }
    }
}

/// Derive plate metadata for a sequence asset from its first and last frames.
pub fn extract_sequence_metadata<R: MetadataReader + ?Sized>(
    reader: &R,
    asset: &FilesystemAsset,
    default_frame_rate: f64,
) -> PlatecheckResult<VersionMetadata> {
    let ((first_frame, first_name), (last_frame, last_name)) = sequence_bounds(&asset.frames)
        .ok_or_else(|| {
            PlatecheckError::Metadata(format!("sequence {} has no numbered frames", asset.name))
        })?;
    let directory = asset.full_path.parent().unwrap_or_else(|| Path::new(""));
    let first_path = directory.join(first_name);
    let last_path = directory.join(last_name);

    let first = reader.read_header(&first_path).map_err(|e| {
        PlatecheckError::Metadata(format!(
            "Unable to open first frame for sequence at {}: {e}",
            first_path.display()
        ))
    })?;
    let frame_rate = first.frame_rate().unwrap_or(default_frame_rate);
    let first_frame_timecode =
        timecode_millis(frame_rate, first.absolute_timecode.as_deref(), &first_path);
    let sop = first
        .asc_sop
        .as_deref()
        .map(parse_asc_sop)
        .unwrap_or(IDENTITY_SOP);
    let camera_roll = first
        .reel_id_full
        .as_deref()
        .and_then(|reel| reel.split('_').next())
        .map(str::to_string);

    let last = reader.read_header(&last_path).map_err(|e| {
        PlatecheckError::Metadata(format!(
            "Unable to open last frame for sequence at {}: {e}",
            last_path.display()
        ))
    })?;
    let last_frame_timecode =
        timecode_millis(frame_rate, last.absolute_timecode.as_deref(), &last_path);

    let metadata = VersionMetadata {
        first_frame,
        last_frame,
        frame_count: last_frame - first_frame + 1,
        frame_range: format!("{first_frame}-{last_frame}"),
        frame_rate,
        first_frame_timecode,
        last_frame_timecode,
        lab_roll: first.reel_id_full.clone(),
        camera_roll,
        cdl: Cdl::from_sop(sop, first.asc_sat.unwrap_or(1.0)),
    };
    debug!("Extracted version metadata for {}: {metadata:?}", asset.name);
    Ok(metadata)
}
