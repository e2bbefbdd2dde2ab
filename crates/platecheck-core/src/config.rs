//! TOML configuration for the verifier.
//!
//! Only `[templates]` is required; every other value has a built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{PlatecheckError, PlatecheckResult};
use crate::models::{ShotFilter, TemplateKind};
use crate::reconcile::engine::VerifierSettings;
use crate::reconcile::retry::RetryPolicy;
use crate::scanner::integrity::DEFAULT_SIZE_TOLERANCE;
use crate::scanner::metadata::DEFAULT_FRAME_RATE;
use crate::scanner::templates::{
    AssetTemplate, KeyType, PlateTemplates, StrFilter, Template, SEQUENCE_KEY, SHOT_KEY,
    VERSION_KEY,
};
use crate::store::database::expand_tilde;

/// Template resolving a shot's filesystem root.
pub const SHOT_ROOT_TEMPLATE: &str = "shot_root";

/// Template naming plate versions in the database.
pub const VERSION_NAME_TEMPLATE: &str = "plate_version_name";

#[derive(Debug, Clone, Deserialize)]
pub struct PlatecheckConfig {
    #[serde(default = "default_project")]
    pub project: String,

    #[serde(default = "default_database")]
    pub database: String,

    /// Root every filesystem template is resolved against.
    #[serde(default = "default_project_root")]
    pub project_root: String,

    #[serde(default)]
    pub exclude_omitted: bool,

    #[serde(default = "default_frame_rate")]
    pub default_frame_rate: f64,

    /// Extra or overriding template keys; merged over the built-in set.
    #[serde(default)]
    pub keys: IndexMap<String, KeyType>,

    pub templates: IndexMap<String, String>,

    /// Published-file type per asset template name.
    #[serde(default)]
    pub published_file_types: IndexMap<String, String>,

    #[serde(default)]
    pub integrity: IntegrityConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegrityConfig {
    #[serde(default = "default_size_tolerance")]
    pub size_tolerance: f64,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            size_tolerance: DEFAULT_SIZE_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_project() -> String {
    "default".to_string()
}

fn default_database() -> String {
    "~/.platecheck/assets.db".to_string()
}

fn default_project_root() -> String {
    ".".to_string()
}

fn default_frame_rate() -> f64 {
    DEFAULT_FRAME_RATE
}

fn default_size_tolerance() -> f64 {
    DEFAULT_SIZE_TOLERANCE
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_initial_backoff_ms() -> u64 {
    RetryPolicy::default().initial_backoff.as_millis() as u64
}

fn default_max_backoff_ms() -> u64 {
    RetryPolicy::default().max_backoff.as_millis() as u64
}

fn default_published_file_type(kind: TemplateKind) -> &'static str {
    match kind {
        TemplateKind::Frames => "Plate EXR Sequence",
        TemplateKind::PrimaryMovie => "Plate Avid Movie",
        TemplateKind::AlternateMovie => "Plate VFX Movie",
        TemplateKind::Lut => "Plate LUT",
    }
}

/// Keys every template set can rely on.
fn builtin_keys() -> IndexMap<String, KeyType> {
    let mut keys = IndexMap::new();
    keys.insert(SEQUENCE_KEY.to_string(), KeyType::Str { filter: None });
    keys.insert(SHOT_KEY.to_string(), KeyType::Str { filter: None });
    keys.insert(
        "plate_name".to_string(),
        KeyType::Str {
            filter: Some(StrFilter::Alphanumeric),
        },
    );
    keys.insert(VERSION_KEY.to_string(), KeyType::Int { width: 3 });
    keys.insert("SEQ".to_string(), KeyType::Sequence { width: 4 });
    keys
}

impl PlatecheckConfig {
    pub fn load(path: &Path) -> PlatecheckResult<Self> {
        let path = expand_tilde(&path.to_string_lossy());
        let text = std::fs::read_to_string(&path).map_err(|e| {
            PlatecheckError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> PlatecheckResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> PlatecheckResult<()> {
        if self.project.trim().is_empty() {
            return Err(PlatecheckError::Config("project must not be empty".into()));
        }
        if !(self.default_frame_rate.is_finite() && self.default_frame_rate > 0.0) {
            return Err(PlatecheckError::Config(format!(
                "default_frame_rate must be positive, got {}",
                self.default_frame_rate
            )));
        }
        let tolerance = self.integrity.size_tolerance;
        if !(tolerance.is_finite() && tolerance >= 0.0) {
            return Err(PlatecheckError::Config(format!(
                "integrity.size_tolerance must not be negative, got {tolerance}"
            )));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(PlatecheckError::Config(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn project_root(&self) -> PathBuf {
        expand_tilde(&self.project_root)
    }

    pub fn database_path(&self) -> PathBuf {
        expand_tilde(&self.database)
    }

    fn template_definition(&self, name: &str) -> PlatecheckResult<&str> {
        self.templates
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| PlatecheckError::Config(format!("missing template {name:?}")))
    }

    /// Compile every template the verifier needs.
    ///
    /// The shot root and asset templates are resolved against
    /// `project_root`; the version name template is not.
    pub fn build_templates(&self) -> PlatecheckResult<PlateTemplates> {
        let mut keys = builtin_keys();
        keys.extend(self.keys.clone());
        let root = self.project_root();

        let shot_root = Template::parse(
            SHOT_ROOT_TEMPLATE,
            self.template_definition(SHOT_ROOT_TEMPLATE)?,
            &keys,
            Some(root.clone()),
        )?;
        let version_name = Template::parse(
            VERSION_NAME_TEMPLATE,
            self.template_definition(VERSION_NAME_TEMPLATE)?,
            &keys,
            None,
        )?;

        let mut assets = Vec::with_capacity(TemplateKind::PRIORITY.len());
        for kind in TemplateKind::PRIORITY {
            let name = kind.template_name();
            let template =
                Template::parse(name, self.template_definition(name)?, &keys, Some(root.clone()))?;
            let published_file_type = self
                .published_file_types
                .get(name)
                .cloned()
                .unwrap_or_else(|| default_published_file_type(kind).to_string());
            assets.push(AssetTemplate {
                kind,
                template,
                published_file_type,
            });
        }
        PlateTemplates::new(shot_root, version_name, assets)
    }

    pub fn settings(&self) -> VerifierSettings {
        VerifierSettings {
            shot_filter: ShotFilter {
                exclude_omitted: self.exclude_omitted,
            },
            default_frame_rate: self.default_frame_rate,
            size_tolerance: self.integrity.size_tolerance,
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATES: &str = r#"
[templates]
shot_root = "sequences/{Sequence}/{Shot}"
plate_version_name = "{Shot}_{plate_name}_v{version}"
shot_plate_frames = "sequences/{Sequence}/{Shot}/plates/{plate_name}/v{version}/{Shot}_{plate_name}_v{version}.{SEQ}.exr"
shot_plate_avidmov = "sequences/{Sequence}/{Shot}/plates/{plate_name}/v{version}/{Shot}_{plate_name}_v{version}_avid.mov"
shot_plate_vfxmov = "sequences/{Sequence}/{Shot}/plates/{plate_name}/v{version}/{Shot}_{plate_name}_v{version}_vfx.mov"
shot_plate_lut = "sequences/{Sequence}/{Shot}/plates/{plate_name}/v{version}/{Shot}_{plate_name}_v{version}.cube"
"#;

    /// Top-level keys and tables in `head` go before the templates.
    fn config_text(head: &str) -> String {
        format!("project_root = \"/show\"\n{head}\n{TEMPLATES}")
    }

    #[test]
    fn minimal_config_takes_defaults() {
        let config = PlatecheckConfig::from_toml_str(&config_text("")).unwrap();
        assert_eq!(config.project, "default");
        assert!(!config.exclude_omitted);
        assert_eq!(config.default_frame_rate, 24.0);

        let settings = config.settings();
        assert_eq!(settings.size_tolerance, 0.25);
        assert_eq!(settings.retry, RetryPolicy::default());
    }

    #[test]
    fn builds_templates_against_the_project_root() {
        let config = PlatecheckConfig::from_toml_str(&config_text("")).unwrap();
        let templates = config.build_templates().unwrap();
        assert_eq!(
            templates.shot_root("SQ010", "SH010").unwrap(),
            PathBuf::from("/show/sequences/SQ010/SH010")
        );
        let hit = templates
            .match_asset(Path::new(
                "/show/sequences/SQ010/SH010/plates/main/v002/SH010_main_v002_vfx.mov",
            ))
            .unwrap();
        assert_eq!(hit.kind, TemplateKind::AlternateMovie);
        assert_eq!(hit.published_file_type, "Plate VFX Movie");
        assert_eq!(hit.int_version, Some(2));
    }

    #[test]
    fn overrides_are_applied() {
        let text = config_text(
            r#"
project = "demo"
exclude_omitted = true

[keys.version]
type = "int"
width = 4

[published_file_types]
shot_plate_lut = "Show LUT"

[integrity]
size_tolerance = 0.1

[retry]
max_attempts = 2
initial_backoff_ms = 10
max_backoff_ms = 20
"#,
        );
        let config = PlatecheckConfig::from_toml_str(&text).unwrap();
        let settings = config.settings();
        assert!(settings.shot_filter.exclude_omitted);
        assert_eq!(settings.size_tolerance, 0.1);
        assert_eq!(settings.retry.max_attempts, 2);
        assert_eq!(settings.retry.max_backoff, Duration::from_millis(20));

        let templates = config.build_templates().unwrap();
        let lut = templates
            .match_asset(Path::new(
                "/show/sequences/SQ010/SH010/plates/main/v0002/SH010_main_v0002.cube",
            ))
            .unwrap();
        assert_eq!(lut.published_file_type, "Show LUT");
        assert!(templates.version_fields("SH010_main_v002").is_none());
    }

    #[test]
    fn templates_section_is_required() {
        assert!(PlatecheckConfig::from_toml_str("project = \"demo\"").is_err());
    }

    #[test]
    fn missing_template_fails_to_build() {
        let text = config_text("").replace("shot_plate_lut", "# shot_plate_lut");
        let config = PlatecheckConfig::from_toml_str(&text).unwrap();
        let err = config.build_templates().unwrap_err();
        assert!(err.to_string().contains("shot_plate_lut"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_rate = config_text("default_frame_rate = 0.0");
        assert!(PlatecheckConfig::from_toml_str(&bad_rate).is_err());
        let bad_backoff = config_text("[retry]\ninitial_backoff_ms = 500\nmax_backoff_ms = 100");
        assert!(PlatecheckConfig::from_toml_str(&bad_backoff).is_err());
    }

    #[test]
    fn example_config_parses() {
        let text = include_str!("../../../config/platecheck.example.toml");
        let config = PlatecheckConfig::from_toml_str(text).unwrap();
        assert_eq!(config.project, "demo");
        assert!(config.exclude_omitted);
        assert!(config.build_templates().is_ok());
    }

    #[test]
    fn load_reads_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("platecheck.toml");
        std::fs::write(&path, config_text("")).unwrap();
        assert_eq!(PlatecheckConfig::load(&path).unwrap().project_root, "/show");
        assert!(PlatecheckConfig::load(&tmp.path().join("missing.toml")).is_err());
    }
}
