//! Control source loading.
//!
//! A source is a file, a directory of files, a built-in catalog or an inline
//! string. A document holds either a single control or `{controls: [...]}`.
//! Files are parsed by extension (`.json` as JSON, `.yaml`/`.yml` as YAML);
//! directories are walked recursively in sorted path order so that load
//! order, and with it `keep_last` resolution, is reproducible.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};
use crate::schema::{Control, ControlRecord};

/// Where a control definition came from.
///
/// Exposed on every registered control (and in reports) next to the declared
/// id, so ambiguous identities can be traced back to their files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ControlOrigin {
    /// File path, `builtin:<name>` or inline label.
    pub source: String,
    /// Position within a multi-control document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl ControlOrigin {
    pub fn new(source: impl Into<String>, index: Option<usize>) -> Self {
        Self {
            source: source.into(),
            index,
        }
    }
}

impl fmt::Display for ControlOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}#{}", self.source, index),
            None => f.write_str(&self.source),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Yaml,
    Json,
}

impl SourceFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Some(SourceFormat::Yaml),
            Some("json") => Some(SourceFormat::Json),
            _ => None,
        }
    }
}

/// A place to read controls from.
#[derive(Debug, Clone)]
pub enum ControlSource {
    /// File or directory on disk.
    Path(PathBuf),
    /// Catalog embedded at compile time.
    BuiltIn(&'static str),
    /// In-memory document.
    Inline {
        label: String,
        format: SourceFormat,
        content: String,
    },
}

impl fmt::Display for ControlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlSource::Path(path) => write!(f, "{}", path.display()),
            ControlSource::BuiltIn(name) => write!(f, "builtin:{}", name),
            ControlSource::Inline { label, .. } => write!(f, "inline:{}", label),
        }
    }
}

impl ControlSource {
    /// Resolve a reference: an existing path, or the name of a built-in catalog
    /// (optionally prefixed with `builtin:`).
    pub fn resolve(reference: &str) -> RegistryResult<Self> {
        let path = Path::new(reference);
        if path.exists() {
            return Ok(ControlSource::Path(path.to_path_buf()));
        }

        let name = reference.strip_prefix("builtin:").unwrap_or(reference);
        if let Some((builtin, _)) = crate::BUILTIN_CATALOGS.iter().find(|(n, _)| *n == name) {
            return Ok(ControlSource::BuiltIn(*builtin));
        }

        Err(RegistryError::NotFound {
            reference: reference.to_string(),
            suggestion: suggest_builtin(name),
        })
    }

    pub fn inline(label: impl Into<String>, format: SourceFormat, content: impl Into<String>) -> Self {
        ControlSource::Inline {
            label: label.into(),
            format,
            content: content.into(),
        }
    }

    pub fn yaml(label: impl Into<String>, content: impl Into<String>) -> Self {
        Self::inline(label, SourceFormat::Yaml, content)
    }

    /// Read and validate every control in this source, in document order.
    pub fn read(&self) -> RegistryResult<Vec<(Control, ControlOrigin)>> {
        match self {
            ControlSource::Path(path) if path.is_dir() => {
                let mut files = Vec::new();
                collect_files(path, &mut files)?;
                files.sort();

                let mut controls = Vec::new();
                for file in files {
                    controls.extend(read_file(&file)?);
                }
                Ok(controls)
            }
            ControlSource::Path(path) => read_file(path),
            ControlSource::BuiltIn(name) => {
                let content =
                    crate::get_builtin_catalog(name).ok_or_else(|| RegistryError::NotFound {
                        reference: name.to_string(),
                        suggestion: suggest_builtin(name),
                    })?;
                parse_document(content, SourceFormat::Yaml, &format!("builtin:{}", name))
            }
            ControlSource::Inline {
                label,
                format,
                content,
            } => parse_document(content, *format, label),
        }
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> RegistryResult<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| RegistryError::Read {
        path: dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| RegistryError::Read {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if SourceFormat::from_path(&path).is_some() {
            out.push(path);
        }
    }
    Ok(())
}

fn read_file(path: &Path) -> RegistryResult<Vec<(Control, ControlOrigin)>> {
    let format = SourceFormat::from_path(path).ok_or_else(|| RegistryError::Parse {
        origin: path.display().to_string(),
        message: "unsupported extension (expected .yaml, .yml or .json)".to_string(),
    })?;
    let content = std::fs::read_to_string(path).map_err(|e| RegistryError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_document(&content, format, &path.display().to_string())
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ControlsDocument {
    controls: Vec<ControlRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Document {
    Many(ControlsDocument),
    One(Box<ControlRecord>),
}

/// Parse a document holding one control or a `controls` list.
pub fn parse_document(
    content: &str,
    format: SourceFormat,
    label: &str,
) -> RegistryResult<Vec<(Control, ControlOrigin)>> {
    let document = match format {
        SourceFormat::Yaml => parse_yaml(content, label)?,
        SourceFormat::Json => parse_json(content, label)?,
    };

    match document {
        Document::One(record) => {
            let origin = ControlOrigin::new(label, None);
            let control = record.into_control(&origin)?;
            Ok(vec![(control, origin)])
        }
        Document::Many(doc) => doc
            .controls
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                let origin = ControlOrigin::new(label, Some(index));
                record.into_control(&origin).map(|c| (c, origin))
            })
            .collect(),
    }
}

fn parse_yaml(content: &str, label: &str) -> RegistryResult<Document> {
    // Parse to a value first so errors point at the actual record shape rather
    // than the untagged wrapper ("did not match any variant").
    let value: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| RegistryError::Parse {
            origin: label.to_string(),
            message: e.to_string(),
        })?;

    let parsed = if value.get("controls").is_some() {
        serde_yaml::from_value::<ControlsDocument>(value).map(Document::Many)
    } else {
        serde_yaml::from_value::<ControlRecord>(value).map(|r| Document::One(Box::new(r)))
    };

    parsed.map_err(|e| RegistryError::Parse {
        origin: label.to_string(),
        message: e.to_string(),
    })
}

fn parse_json(content: &str, label: &str) -> RegistryResult<Document> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| RegistryError::Parse {
            origin: label.to_string(),
            message: e.to_string(),
        })?;

    let parsed = if value.get("controls").is_some() {
        serde_json::from_value::<ControlsDocument>(value).map(Document::Many)
    } else {
        serde_json::from_value::<ControlRecord>(value).map(|r| Document::One(Box::new(r)))
    };

    parsed.map_err(|e| RegistryError::Parse {
        origin: label.to_string(),
        message: e.to_string(),
    })
}

fn suggest_builtin(name: &str) -> String {
    let names: Vec<&str> = crate::BUILTIN_CATALOGS.iter().map(|(n, _)| *n).collect();
    match names.iter().find(|n| n.contains(name) || name.contains(*n)) {
        Some(close) => format!("Did you mean 'builtin:{}'?", close),
        None => format!("Built-in catalogs: {}", names.join(", ")),
    }
}
