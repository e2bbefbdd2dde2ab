//! Frame completeness and size consistency checks for image sequences.

use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::scanner::filesystem::FramePattern;

/// Fraction a frame may deviate from the sequence average before it is flagged.
pub const DEFAULT_SIZE_TOLERANCE: f64 = 0.25;

#[derive(Clone, Debug, PartialEq)]
pub enum FrameIssue {
    Missing {
        frame: u64,
        path: PathBuf,
    },
    DeviantSize {
        frame: u64,
        path: PathBuf,
        size: u64,
        average: f64,
    },
}

impl FrameIssue {
    pub fn frame(&self) -> u64 {
        match self {
            FrameIssue::Missing { frame, .. } | FrameIssue::DeviantSize { frame, .. } => *frame,
        }
    }
}

/// Result of walking a sequence's frame range.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntegrityReport {
    pub frames_checked: u64,
    pub issues: Vec<FrameIssue>,
}

impl IntegrityReport {
    pub fn missing_frames(&self) -> Vec<u64> {
        self.issues
            .iter()
            .filter(|i| matches!(i, FrameIssue::Missing { .. }))
            .map(FrameIssue::frame)
            .collect()
    }

    pub fn deviant_frames(&self) -> Vec<u64> {
        self.issues
            .iter()
            .filter(|i| matches!(i, FrameIssue::DeviantSize { .. }))
            .map(FrameIssue::frame)
            .collect()
    }
}

/// Check every frame from `first` to `last` inclusive.
///
/// Missing frames never stop the scan. Existing frames whose size falls
/// outside `average * (1 ± tolerance)` are reported but stay in the sequence.
pub fn check_frames(
    directory: &Path,
    pattern: &FramePattern,
    first: u64,
    last: u64,
    total_size: u64,
    tolerance: f64,
) -> IntegrityReport {
    let mut report = IntegrityReport::default();
    if last < first {
        return report;
    }
    let average = total_size as f64 / (last - first + 1) as f64;
    let upper = average * (1.0 + tolerance);
    let lower = average * (1.0 - tolerance);
    debug!(
        "Checking {} frames {first}-{last} in {}",
        pattern,
        directory.display()
    );

    for frame in first..=last {
        report.frames_checked += 1;
        let path = directory.join(pattern.frame_filename(frame));
        let size = match std::fs::metadata(&path) {
            Ok(m) if m.is_file() => m.len(),
            _ => {
                error!("Plate {pattern} missing frame {frame} at path {}!", path.display());
                report.issues.push(FrameIssue::Missing { frame, path });
                continue;
            }
        };
        let size_f = size as f64;
        if size_f > upper || size_f < lower {
            error!(
                "Plate {pattern} has frame {frame} with deviant file size of {size} bytes at path {}.",
                path.display()
            );
            report.issues.push(FrameIssue::DeviantSize {
                frame,
                path,
                size,
                average,
            });
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_sequence(dir: &Path, frames: impl Iterator<Item = (u64, usize)>) -> u64 {
        let mut total = 0;
        for (frame, size) in frames {
            fs::write(dir.join(format!("plate.{frame:04}.exr")), vec![1u8; size]).unwrap();
            total += size as u64;
        }
        total
    }

    fn pattern() -> FramePattern {
        FramePattern::parse("plate.%04d.exr").unwrap()
    }

    #[test]
    fn uniform_sequence_is_clean() {
        let tmp = tempfile::tempdir().unwrap();
        let total = write_sequence(tmp.path(), (1001..=1010).map(|f| (f, 100 + (f % 3) as usize)));

        let report = check_frames(tmp.path(), &pattern(), 1001, 1010, total, DEFAULT_SIZE_TOLERANCE);
        assert_eq!(report.frames_checked, 10);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn one_outlier_raises_exactly_one_anomaly() {
        let tmp = tempfile::tempdir().unwrap();
        let total = write_sequence(
            tmp.path(),
            (1001..=1010).map(|f| (f, if f == 1005 { 200 } else { 100 })),
        );

        let report = check_frames(tmp.path(), &pattern(), 1001, 1010, total, DEFAULT_SIZE_TOLERANCE);
        assert_eq!(report.deviant_frames(), vec![1005]);
        assert!(report.missing_frames().is_empty());
    }

    #[test]
    fn missing_frame_is_reported_and_scan_continues() {
        let tmp = tempfile::tempdir().unwrap();
        let total = write_sequence(
            tmp.path(),
            (1001..=1020).filter(|f| *f != 1014).map(|f| (f, 100)),
        );

        let report = check_frames(tmp.path(), &pattern(), 1001, 1020, total, DEFAULT_SIZE_TOLERANCE);
        assert_eq!(report.missing_frames(), vec![1014]);
        assert_eq!(report.frames_checked, 20);
        // 19 frames of 100 bytes averaged over 20 stay within tolerance.
        assert!(report.deviant_frames().is_empty());
    }

    #[test]
    fn every_missing_frame_is_listed() {
        let tmp = tempfile::tempdir().unwrap();
        let total = write_sequence(tmp.path(), [(1001, 50), (1005, 50)].into_iter());

        let report = check_frames(tmp.path(), &pattern(), 1001, 1005, total, DEFAULT_SIZE_TOLERANCE);
        assert_eq!(report.missing_frames(), vec![1002, 1003, 1004]);
    }
}
