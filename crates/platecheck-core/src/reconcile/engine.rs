//! The plate verifier: shot selection and the three per-shot passes.
//!
//! A run is `retrieve_shots`, then the database pass, the filesystem pass and
//! the reconcile pass, each over the whole selected slice of shots.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::PlatecheckResult;
use crate::models::{DbTag, FaultKind, FaultLog, Shot, ShotFilter, PLATE_TAG};
use crate::reconcile::aggregator::{build_database_state, build_filesystem_state};
use crate::reconcile::reconciler::Reconciler;
use crate::reconcile::report::FaultReport;
use crate::reconcile::retry::RetryPolicy;
use crate::scanner::integrity::DEFAULT_SIZE_TOLERANCE;
use crate::scanner::metadata::{MetadataReader, DEFAULT_FRAME_RATE};
use crate::scanner::templates::PlateTemplates;
use crate::store::AssetDatabase;

/// Tunables for one verifier run.
#[derive(Clone, Debug)]
pub struct VerifierSettings {
    pub shot_filter: ShotFilter,
    /// Frame rate assumed for headers that carry none.
    pub default_frame_rate: f64,
    /// Allowed relative deviation of a frame size from the sequence mean.
    pub size_tolerance: f64,
    pub retry: RetryPolicy,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            shot_filter: ShotFilter::default(),
            default_frame_rate: DEFAULT_FRAME_RATE,
            size_tolerance: DEFAULT_SIZE_TOLERANCE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Counters collected over a run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub shots_selected: usize,
    pub shots_walked: usize,
    pub files_classified: usize,
    pub headers_read: usize,
    pub publish_attempts: usize,
    pub publishes: usize,
    pub uploads: usize,
    pub versions_created: usize,
    pub versions_updated: usize,
}

pub struct PlateVerifier<D: AssetDatabase, R: MetadataReader> {
    db: D,
    reader: R,
    templates: PlateTemplates,
    settings: VerifierSettings,
    plate_tag: DbTag,
    shots: IndexMap<String, Shot>,
    faults: FaultLog,
    stats: RunStats,
}

impl<D: AssetDatabase, R: MetadataReader> PlateVerifier<D, R> {
    /// Resolve the plate tag up front; a verifier cannot run without it.
    pub fn new(
        db: D,
        reader: R,
        templates: PlateTemplates,
        settings: VerifierSettings,
    ) -> PlatecheckResult<Self> {
        let plate_tag = db.ensure_tag(PLATE_TAG)?;
        Ok(Self {
            db,
            reader,
            templates,
            settings,
            plate_tag,
            shots: IndexMap::new(),
            faults: FaultLog::default(),
            stats: RunStats::default(),
        })
    }

    pub fn db(&self) -> &D {
        &self.db
    }

    pub fn shots(&self) -> &IndexMap<String, Shot> {
        &self.shots
    }

    pub fn faults(&self) -> &FaultLog {
        &self.faults
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn report(&self) -> FaultReport {
        FaultReport::from_log(&self.faults)
    }

    // -----------------------------------------------------------------------
    // Shot selection
    // -----------------------------------------------------------------------

    /// Load the project's shots, ordered by code, and resolve their roots.
    ///
    /// Shots already loaded keep their gathered state. Returns the number of
    /// shots known after the call.
    pub fn retrieve_shots(&mut self) -> PlatecheckResult<usize> {
        let mut found = self.db.find_shots(&self.settings.shot_filter)?;
        found.sort_by(|a, b| a.code.cmp(&b.code));
        info!("Retrieved {} shots from the database", found.len());

        for db_shot in found {
            if self.shots.contains_key(&db_shot.code) {
                continue;
            }
            let root = self.resolve_root(db_shot.sequence.as_deref(), &db_shot.code);
            let shot = Shot::new(db_shot, root);
            self.shots.insert(shot.code.clone(), shot);
        }
        self.shots.sort_keys();
        Ok(self.shots.len())
    }

    fn resolve_root(&self, sequence: Option<&str>, code: &str) -> Option<PathBuf> {
        let Some(sequence) = sequence else {
            warn!(shot = %code, "Shot has no sequence; its root cannot be resolved");
            return None;
        };
        match self.templates.shot_root(sequence, code) {
            Ok(root) => Some(root),
            Err(e) => {
                warn!(shot = %code, "Unable to resolve shot root: {e}");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Passes
    // -----------------------------------------------------------------------

    /// Attach the shot's plate versions from the database.
    pub fn collect_database_state(&mut self, code: &str) {
        let Some(shot) = self.shots.get_mut(code) else {
            warn!(shot = %code, "Unknown shot; skipping database pass");
            return;
        };
        let records = match self.db.find_plate_versions(&shot.db) {
            Ok(records) => records,
            Err(e) => {
                let message = format!("Unable to list plates for shot {code}: {e}");
                shot.error_message.get_or_insert_with(|| message.clone());
                self.faults.record_shot(code, FaultKind::Transport, message);
                return;
            }
        };
        let state = build_database_state(shot, records, &self.templates);
        state.commit(shot, &mut self.faults);
    }

    /// Walk the shot's plates directory and attach what is found.
    pub fn collect_filesystem_state(&mut self, code: &str) {
        let Some(shot) = self.shots.get_mut(code) else {
            warn!(shot = %code, "Unknown shot; skipping filesystem pass");
            return;
        };
        let state = build_filesystem_state(shot, &self.templates, &self.reader, &self.settings);
        if state.walked {
            self.stats.shots_walked += 1;
        }
        self.stats.files_classified += state.files_classified;
        self.stats.headers_read += state.headers_read;
        state.commit(shot, &mut self.faults);
    }

    /// Write the shot's verified plates back to the database.
    pub fn reconcile(&mut self, code: &str) {
        let Some(shot) = self.shots.get_mut(code) else {
            warn!(shot = %code, "Unknown shot; skipping reconcile");
            return;
        };
        let reconciler = Reconciler::new(&self.db, &self.plate_tag, &self.settings.retry);
        reconciler.reconcile_shot(shot, &mut self.faults, &mut self.stats);
    }

    /// Run every pass over the first `limit` shots (all shots when `None`).
    pub fn run(&mut self, limit: Option<usize>) -> PlatecheckResult<()> {
        self.retrieve_shots()?;
        let selected: Vec<String> = self
            .shots
            .keys()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        self.stats.shots_selected = selected.len();

        info!("Collecting plate data from the database");
        for code in &selected {
            self.collect_database_state(code);
        }
        info!("Collecting plate data from the filesystem");
        for code in &selected {
            self.collect_filesystem_state(code);
        }
        info!("Reconciling the filesystem with the database");
        for code in &selected {
            self.reconcile(code);
        }
        info!(
            shots = selected.len(),
            faults = self.faults.len(),
            "Verification finished"
        );
        Ok(())
    }
}
