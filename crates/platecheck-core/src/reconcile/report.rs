//! End-of-run fault report.

use std::fmt;

use serde::Serialize;

use crate::models::{AssetFault, FaultLog, ShotFault, VersionFault};

const NONE_FOUND: &str = "none found";

/// The three fault sections, in the order they are reported.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FaultReport {
    pub shots: Vec<ShotFault>,
    pub versions: Vec<VersionFault>,
    pub files: Vec<AssetFault>,
}

impl FaultReport {
    pub fn from_log(log: &FaultLog) -> Self {
        Self {
            shots: log.shots.clone(),
            versions: log.versions.clone(),
            files: log.assets.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shots.is_empty() && self.versions.is_empty() && self.files.is_empty()
    }

    pub fn total(&self) -> usize {
        self.shots.len() + self.versions.len() + self.files.len()
    }
}

fn section<T>(
    f: &mut fmt::Formatter<'_>,
    title: &str,
    entries: &[T],
    line: impl Fn(&T) -> String,
) -> fmt::Result {
    writeln!(f, "{title}:")?;
    if entries.is_empty() {
        return writeln!(f, "  {NONE_FOUND}");
    }
    for entry in entries {
        for (i, text) in line(entry).lines().enumerate() {
            let indent = if i == 0 { "  - " } else { "    " };
            writeln!(f, "{indent}{text}")?;
        }
    }
    Ok(())
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        section(f, "Shots", &self.shots, |s| {
            format!("[{}] {}: {}", s.kind, s.shot, s.message)
        })?;
        section(f, "Versions/Plates", &self.versions, |v| {
            let id = v.db_id.map(|id| format!(" (id {id})")).unwrap_or_default();
            format!("[{}] {} / {}{id}: {}", v.kind, v.shot, v.version, v.message)
        })?;
        section(f, "Files", &self.files, |a| {
            format!("[{}] {} / {}: {}", a.kind, a.shot, a.asset, a.message)
        })
    }
}
