use crate::error::SquareError;
use crate::lexer::strip_comments;
use crate::utils::get_position;
use lazy_static::lazy_static;
use log::debug;
use miette::NamedSource;
use regex::Regex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// File name looked up when a directory is given instead of a manifest.
pub const MANIFEST_NAME: &str = "square.json";

lazy_static! {
    static ref MODULE_EXPORTS: Regex =
        Regex::new(r"^\s*module\.exports\s*=\s*").expect("module.exports pattern is valid");
}

/// Where a manifest comes from. Resolved once at the API boundary.
#[derive(Debug, Clone)]
pub enum ManifestSource {
    /// A `square.json` / `square.js` file, or a directory containing `square.json`.
    Path(PathBuf),
    /// An already parsed manifest. Relative paths resolve against `root`.
    Inline { manifest: Value, root: PathBuf },
}

impl From<PathBuf> for ManifestSource {
    fn from(path: PathBuf) -> Self {
        ManifestSource::Path(path)
    }
}

impl From<&Path> for ManifestSource {
    fn from(path: &Path) -> Self {
        ManifestSource::Path(path.to_path_buf())
    }
}

impl From<&str> for ManifestSource {
    fn from(path: &str) -> Self {
        ManifestSource::Path(PathBuf::from(path))
    }
}

/// The manifest as written, before any normalization.
#[derive(Debug, Clone)]
pub struct RawManifest {
    pub configuration: Value,
    pub bundle: Value,
    /// Directory of the manifest.
    pub path: PathBuf,
    pub location: Option<PathBuf>,
    pub source: String,
}

/// Loads a manifest. `configuration` and `bundle` are always present in the
/// result, defaulting to empty objects.
pub fn read(source: &ManifestSource) -> Result<RawManifest, SquareError> {
    match source {
        ManifestSource::Path(path) => read_file(path),
        ManifestSource::Inline { manifest, root } => {
            let text = serde_json::to_string_pretty(manifest)?;
            from_value(manifest.clone(), absolute(root), None, text)
        }
    }
}

fn read_file(path: &Path) -> Result<RawManifest, SquareError> {
    let mut location = absolute(path);
    if location.is_dir() {
        location = location.join(MANIFEST_NAME);
    }
    if !location.is_file() {
        return Err(SquareError::ManifestNotFound { path: location });
    }

    debug!("reading manifest {}", location.display());
    let text = std::fs::read_to_string(&location).map_err(|e| SquareError::io(&location, e))?;
    let value = parse_text(&text, &location)?;
    let directory = location
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    from_value(value, directory, Some(location), text)
}

/// Parses manifest text: comments are stripped, and `.js` manifests may be
/// written as `module.exports = { ... };`.
pub fn parse_text(text: &str, location: &Path) -> Result<Value, SquareError> {
    let mut json = strip_comments(text);

    if location.extension().is_some_and(|ext| ext == "js") {
        if let Some(found) = MODULE_EXPORTS.find(&json) {
            // keep the offsets stable for error reporting
            let padding = " ".repeat(found.end());
            json.replace_range(..found.end(), &padding);
        }
        let trimmed = json.trim_end().trim_end_matches(';').len();
        json.truncate(trimmed);
    }

    serde_json::from_str(&json).map_err(|e| {
        let offset = get_position(text, e.line(), e.column().max(1));
        SquareError::ManifestSyntax {
            message: e.to_string(),
            src: NamedSource::new(location.to_string_lossy(), text.to_string()),
            span: (offset.min(text.len()), 0).into(),
        }
    })
}

fn from_value(
    value: Value,
    path: PathBuf,
    location: Option<PathBuf>,
    source: String,
) -> Result<RawManifest, SquareError> {
    let Value::Object(mut root) = value else {
        return Err(SquareError::InvalidManifest {
            reason: "the manifest must be a JSON object".to_string(),
        });
    };

    let configuration = match root.remove("configuration") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::Object(map)) => Value::Object(map),
        Some(_) => {
            return Err(SquareError::InvalidManifest {
                reason: "`configuration` must be an object".to_string(),
            })
        }
    };
    let bundle = match root.remove("bundle") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(bundle @ (Value::Object(_) | Value::Array(_))) => bundle,
        Some(_) => {
            return Err(SquareError::InvalidManifest {
                reason: "`bundle` must be an object or an array of paths".to_string(),
            })
        }
    };

    Ok(RawManifest {
        configuration,
        bundle,
        path,
        location,
        source,
    })
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
