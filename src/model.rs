use crate::compiler::Compiler;
use crate::error::SquareError;
use crate::serialization::to_manifest;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// A named output variant. Every distribution gets its own destination
/// template in `configuration.dist`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    Min,
    Dev,
}

impl Distribution {
    pub const ALL: [Distribution; 2] = [Distribution::Min, Distribution::Dev];

    pub fn as_str(&self) -> &'static str {
        match self {
            Distribution::Min => "min",
            Distribution::Dev => "dev",
        }
    }
}

impl Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Distribution {
    type Err = SquareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min" => Ok(Distribution::Min),
            "dev" => Ok(Distribution::Dev),
            other => Err(SquareError::InvalidManifest {
                reason: format!("unknown distribution `{other}`, expected `min` or `dev`"),
            }),
        }
    }
}

/// The merged `configuration` section of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Destination template per distribution.
    #[serde(default)]
    pub dist: IndexMap<Distribution, String>,
    /// Plugin name to plugin options, in execution order.
    #[serde(default)]
    pub plugins: IndexMap<String, Value>,
    /// Absolute path of the license header, dropped when the file is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<PathBuf>,
    /// Other manifests whose bundles are merged into this one.
    #[serde(default)]
    pub import: Vec<String>,
    /// User declared tags, overlaid on the computed tag context.
    #[serde(default)]
    pub tags: Map<String, Value>,
    /// Everything square does not interpret itself (linter options etc).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The sortable weight of a bundle: the declared priority plus a position
/// tiebreaker counted down from the total number of bundles.
///
/// Rendered as a decimal (`1.07`) with the position zero-padded to two
/// digits. Ordering compares the parts numerically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Weight {
    pub priority: i64,
    pub position: usize,
}

impl Weight {
    pub fn as_f64(&self) -> f64 {
        self.to_string().parse().unwrap_or(self.priority as f64)
    }
}

impl Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.priority, self.position)
    }
}

/// Data derived for every bundle during normalization.
#[derive(Debug, Clone, Default)]
pub struct BundleMeta {
    pub key: String,
    pub filename: String,
    /// Source extension, e.g. `styl`.
    pub extension: String,
    /// Extension after the compiler ran, e.g. `css`.
    pub output: String,
    pub compiler: Option<Arc<dyn Compiler>>,
    pub location: PathBuf,
    pub weight: Weight,
    /// Resolved locations of `dependencies`, same order.
    pub dependencies: Vec<PathBuf>,
    /// Set when the bundle came from a manifest listed in `import`.
    pub imported: bool,
}

/// One source file declared in the manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared priority. Higher runs first; defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip)]
    pub meta: BundleMeta,
    #[serde(skip)]
    pub content: String,
}

/// Ordering and lookup tables computed once per parse.
#[derive(Debug, Clone, Default)]
pub struct PackageMeta {
    /// Bundle keys sorted by weight, highest first.
    pub tree: Vec<String>,
    pub files: Vec<PathBuf>,
    pub dependencies: Vec<PathBuf>,
    /// Output extension to the bundle keys producing it, in tree order.
    pub extensions: IndexMap<String, Vec<String>>,
}

/// A fully normalized manifest.
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub configuration: Configuration,
    pub bundle: IndexMap<String, BundleEntry>,
    /// Directory of the manifest, all relative paths resolve against it.
    pub path: PathBuf,
    /// Absolute manifest path, `None` for inline manifests.
    pub location: Option<PathBuf>,
    /// The original manifest text.
    pub source: String,
    pub meta: PackageMeta,
}

impl Package {
    /// Bundles in processing order.
    pub fn tree(&self) -> impl Iterator<Item = &BundleEntry> {
        self.meta.tree.iter().filter_map(|key| self.bundle.get(key))
    }

    /// Every output extension the manifest produces.
    pub fn output_extensions(&self) -> Vec<String> {
        self.meta.extensions.keys().cloned().collect()
    }

    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }

    /// The normalized manifest as JSON, suitable for feeding back into `parse`.
    #[must_use]
    pub fn to_manifest(&self) -> Value {
        to_manifest(self)
    }

    /// Serializes the normalized manifest into a pretty-printed JSON string.
    ///
    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self)
    }

    /// Serializes the normalized manifest into a YAML string.
    ///
    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self)
    }
}

impl Serialize for Package {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_manifest().serialize(serializer)
    }
}

/// The unit flowing through the middleware pipeline. Created fresh for every
/// (output extension, distribution) pair of a build.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub content: String,
    pub extension: String,
    pub platform: String,
    pub distribution: Distribution,
    /// Final destination, filled in by the orchestrator before storage.
    pub location: Option<PathBuf>,
}

impl Collection {
    pub fn new(
        content: impl Into<String>,
        extension: impl Into<String>,
        platform: impl Into<String>,
        distribution: Distribution,
    ) -> Self {
        Collection {
            content: content.into(),
            extension: extension.into(),
            platform: platform.into(),
            distribution,
            location: None,
        }
    }
}
