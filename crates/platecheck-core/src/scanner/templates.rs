//! Naming templates for shot roots, plate version names and plate files.
//!
//! A template is a definition such as
//! `sequences/{Sequence}/{Shot}/plates/{Shot}_{plate_name}_v{version}.{SEQ}.exr`
//! where every `{Key}` refers to a typed key. Templates validate a path or
//! name into [`TemplateFields`] and render fields back into a string.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::{PlatecheckError, PlatecheckResult};
use crate::models::TemplateKind;

pub const SEQUENCE_KEY: &str = "Sequence";
pub const SHOT_KEY: &str = "Shot";
pub const VERSION_KEY: &str = "version";

// ---------------------------------------------------------------------------
// Keys and field values
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrFilter {
    Alphanumeric,
    Alpha,
}

/// Type of a template key, as declared under `[keys.<name>]`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KeyType {
    Str {
        #[serde(default)]
        filter: Option<StrFilter>,
    },
    Int {
        #[serde(default)]
        width: usize,
    },
    Sequence {
        #[serde(default = "default_sequence_width")]
        width: usize,
    },
}

fn default_sequence_width() -> usize {
    4
}

impl KeyType {
    fn pattern(&self) -> String {
        match self {
            KeyType::Str { filter: None } => r"[^/]+?".to_string(),
            KeyType::Str {
                filter: Some(StrFilter::Alphanumeric),
            } => r"[A-Za-z0-9]+?".to_string(),
            KeyType::Str {
                filter: Some(StrFilter::Alpha),
            } => r"[A-Za-z]+?".to_string(),
            KeyType::Int { width } => format!(r"[0-9]{{{},}}", (*width).max(1)),
            KeyType::Sequence { width } => {
                format!(r"%0{w}d|[0-9]{{{w},}}", w = (*width).max(1))
            }
        }
    }

    fn parse_value(&self, raw: &str) -> Option<FieldValue> {
        match self {
            KeyType::Str { .. } => Some(FieldValue::Str(raw.to_string())),
            KeyType::Int { .. } => raw.parse().ok().map(FieldValue::Int),
            KeyType::Sequence { .. } => {
                if raw.starts_with('%') {
                    Some(FieldValue::Frame(None))
                } else {
                    raw.parse().ok().map(|n| FieldValue::Frame(Some(n)))
                }
            }
        }
    }

    fn render(&self, key: &str, value: Option<&FieldValue>) -> PlatecheckResult<String> {
        match (self, value) {
            (KeyType::Str { .. }, Some(FieldValue::Str(s))) => Ok(s.clone()),
            (KeyType::Int { width }, Some(FieldValue::Int(n))) => {
                Ok(format!("{n:0width$}", width = *width))
            }
            (KeyType::Sequence { width }, None | Some(FieldValue::Frame(None))) => {
                Ok(format!("%0{width}d"))
            }
            (KeyType::Sequence { width }, Some(FieldValue::Frame(Some(n)))) => {
                Ok(format!("{n:0width$}", width = *width))
            }
            (_, None) => Err(PlatecheckError::Template(format!(
                "missing value for key {key:?}"
            ))),
            (_, Some(other)) => Err(PlatecheckError::Template(format!(
                "value {other:?} does not fit key {key:?}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    /// A sequence frame; `None` is the printf placeholder.
    Frame(Option<u64>),
}

/// Fields extracted by a successful validation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateFields(IndexMap<String, FieldValue>);

impl TemplateFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_str(mut self, key: &str, value: &str) -> Self {
        self.insert(key, FieldValue::Str(value.to_string()));
        self
    }

    pub fn with_int(mut self, key: &str, value: i64) -> Self {
        self.insert(key, FieldValue::Int(value));
        self
    }

    pub fn insert(&mut self, key: &str, value: FieldValue) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(FieldValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(FieldValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
enum Token {
    Literal(String),
    Key { name: String, key: KeyType },
}

/// A compiled naming template.
#[derive(Clone, Debug)]
pub struct Template {
    name: String,
    definition: String,
    root: Option<PathBuf>,
    tokens: Vec<Token>,
    regex: Regex,
    /// Key name for each capture group, in group order.
    group_keys: Vec<(String, KeyType)>,
}

impl Template {
    /// Compile `definition` against the declared `keys`.
    ///
    /// When `root` is set the template describes paths below it: validation
    /// strips the root first and rendering joins it back on.
    pub fn parse(
        name: &str,
        definition: &str,
        keys: &IndexMap<String, KeyType>,
        root: Option<PathBuf>,
    ) -> PlatecheckResult<Self> {
        let tokens = tokenize(name, definition, keys)?;

        let mut pattern = String::from("^");
        let mut group_keys = Vec::new();
        for token in &tokens {
            match token {
                Token::Literal(text) => pattern.push_str(&regex::escape(text)),
                Token::Key { name, key } => {
                    pattern.push_str(&format!("(?P<g{}>{})", group_keys.len(), key.pattern()));
                    group_keys.push((name.clone(), key.clone()));
                }
            }
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| {
            PlatecheckError::Template(format!("template {name:?} does not compile: {e}"))
        })?;

        Ok(Self {
            name: name.to_string(),
            definition: definition.to_string(),
            root,
            tokens,
            regex,
            group_keys,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Key names in the order they appear, without repeats.
    pub fn keys(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &self.group_keys {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }

    /// Validate `input` and extract its fields.
    ///
    /// A key used more than once must carry the same value everywhere.
    pub fn validate(&self, input: &str) -> Option<TemplateFields> {
        let relative = match &self.root {
            Some(root) => Path::new(input)
                .strip_prefix(root)
                .ok()?
                .to_string_lossy()
                .replace('\\', "/"),
            None => input.to_string(),
        };
        let caps = self.regex.captures(&relative)?;

        let mut fields = TemplateFields::new();
        for (idx, (name, key)) in self.group_keys.iter().enumerate() {
            let raw = caps.name(&format!("g{idx}"))?.as_str();
            let value = key.parse_value(raw)?;
            match fields.get(name) {
                Some(existing) if *existing != value => return None,
                Some(_) => {}
                None => fields.insert(name, value),
            }
        }
        Some(fields)
    }

    /// Validate a filesystem path.
    pub fn validate_path(&self, path: &Path) -> Option<TemplateFields> {
        self.validate(&path.to_string_lossy())
    }

    /// Render `fields` into a name, or a path below the root.
    pub fn apply_fields(&self, fields: &TemplateFields) -> PlatecheckResult<String> {
        let mut rendered = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => rendered.push_str(text),
                Token::Key { name, key } => rendered.push_str(&key.render(name, fields.get(name))?),
            }
        }
        Ok(match &self.root {
            Some(root) => root.join(rendered).to_string_lossy().into_owned(),
            None => rendered,
        })
    }
}

fn tokenize(
    name: &str,
    definition: &str,
    keys: &IndexMap<String, KeyType>,
) -> PlatecheckResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = definition;
    while !rest.is_empty() {
        match rest.find('{') {
            Some(0) => {
                let close = rest.find('}').ok_or_else(|| {
                    PlatecheckError::Template(format!("template {name:?} has an unclosed key"))
                })?;
                let key_name = &rest[1..close];
                let key = keys.get(key_name).ok_or_else(|| {
                    PlatecheckError::Template(format!(
                        "template {name:?} uses undeclared key {key_name:?}"
                    ))
                })?;
                tokens.push(Token::Key {
                    name: key_name.to_string(),
                    key: key.clone(),
                });
                rest = &rest[close + 1..];
            }
            Some(open) => {
                tokens.push(Token::Literal(rest[..open].to_string()));
                rest = &rest[open..];
            }
            None => {
                tokens.push(Token::Literal(rest.to_string()));
                rest = "";
            }
        }
    }
    if tokens.iter().any(|t| matches!(t, Token::Literal(s) if s.contains('}'))) {
        return Err(PlatecheckError::Template(format!(
            "template {name:?} has an unopened key"
        )));
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Plate template set
// ---------------------------------------------------------------------------

/// A plate file template together with the published-file type it implies.
#[derive(Clone, Debug)]
pub struct AssetTemplate {
    pub kind: TemplateKind,
    pub template: Template,
    pub published_file_type: String,
}

/// Outcome of matching an asset path.
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateMatch {
    pub kind: TemplateKind,
    pub published_file_type: String,
    /// Canonical plate version name, the join key against database records.
    pub version_name: String,
    pub int_version: Option<i64>,
    pub fields: TemplateFields,
}

/// Every template the verifier needs.
#[derive(Clone, Debug)]
pub struct PlateTemplates {
    shot_root: Template,
    version_name: Template,
    assets: Vec<AssetTemplate>,
}

impl PlateTemplates {
    /// Assets are kept in [`TemplateKind::PRIORITY`] order regardless of the
    /// order given.
    pub fn new(
        shot_root: Template,
        version_name: Template,
        mut assets: Vec<AssetTemplate>,
    ) -> PlatecheckResult<Self> {
        for kind in TemplateKind::PRIORITY {
            if !assets.iter().any(|a| a.kind == kind) {
                return Err(PlatecheckError::Template(format!(
                    "no template configured for {kind}"
                )));
            }
        }
        assets.sort_by_key(|a| {
            TemplateKind::PRIORITY
                .iter()
                .position(|k| *k == a.kind)
                .unwrap_or(usize::MAX)
        });
        Ok(Self {
            shot_root,
            version_name,
            assets,
        })
    }

    /// Filesystem root of a shot.
    pub fn shot_root(&self, sequence: &str, shot: &str) -> PlatecheckResult<PathBuf> {
        let fields = TemplateFields::new()
            .with_str(SEQUENCE_KEY, sequence)
            .with_str(SHOT_KEY, shot);
        self.shot_root.apply_fields(&fields).map(PathBuf::from)
    }

    /// Validate a plate version name from the database.
    pub fn version_fields(&self, name: &str) -> Option<TemplateFields> {
        self.version_name.validate(name)
    }

    /// Render the canonical version name for validated fields.
    pub fn version_name(&self, fields: &TemplateFields) -> PlatecheckResult<String> {
        self.version_name.apply_fields(fields)
    }

    /// First-match-wins classification of an asset path.
    pub fn match_asset(&self, path: &Path) -> Option<TemplateMatch> {
        for asset in &self.assets {
            let Some(fields) = asset.template.validate_path(path) else {
                continue;
            };
            match self.version_name.apply_fields(&fields) {
                Ok(version_name) => {
                    debug!(
                        "{} matched template {}",
                        path.display(),
                        asset.template.name()
                    );
                    return Some(TemplateMatch {
                        kind: asset.kind,
                        published_file_type: asset.published_file_type.clone(),
                        version_name,
                        int_version: fields.get_int(VERSION_KEY),
                        fields,
                    });
                }
                Err(e) => {
                    warn!(
                        "{} matched template {} but has no version name: {e}",
                        path.display(),
                        asset.template.name()
                    );
                }
            }
        }
        None
    }
}
