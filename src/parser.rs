//! Manifest normalization.
//!
//! Turns a raw manifest into a [`Package`]: configuration merged over the
//! defaults, shorthand forms expanded, imported manifests folded in, every
//! bundle located, read and weighted, and the processing tree computed.

use crate::compiler::Compilers;
use crate::error::SquareError;
use crate::manifest::{self, ManifestSource};
use crate::model::{BundleEntry, BundleMeta, Configuration, Distribution, Package, PackageMeta, Weight};
use indexmap::IndexMap;
use log::{debug, error, warn};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Configuration keys merged recursively instead of replaced.
const DEEP_MERGE_KEYS: &[&str] = &["jshint", "csslint", "tags"];

/// Depth limit for the recursive merge of [`DEEP_MERGE_KEYS`].
const MERGE_DEPTH: usize = 2;

/// Built-in configuration every manifest is merged over.
pub fn defaults() -> Value {
    json!({
        "dist": {
            "min": "dist/square.{type}.{ext}",
            "dev": "dist/square.{type}.{ext}"
        },
        "plugins": {},
        "import": [],
        "tags": {},
        "jshint": {
            "browser": true,
            "es3": true,
            "undef": true,
            "unused": true
        },
        "csslint": {
            "adjoining-classes": false,
            "box-model": false,
            "ids": false
        }
    })
}

/// Merges `source` into `target`. Objects present on both sides recurse
/// while `depth` allows it; everything else is replaced.
pub fn merge(target: &mut Value, source: &Value, depth: usize) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(key) {
                    Some(existing) if depth > 0 && existing.is_object() && value.is_object() => {
                        merge(existing, value, depth - 1);
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

/// The weight of the bundle visited `position` places from the end.
pub fn generate_weight(amount: i64, position: usize) -> Weight {
    Weight {
        priority: amount,
        position,
    }
}

/// Normalizes the manifest at `source` without touching any state.
pub fn parse(source: &ManifestSource, compilers: &Compilers) -> Result<Package, SquareError> {
    let mut visited = HashSet::new();
    Parser::new(compilers, &mut visited).parse(source)
}

struct Pending {
    key: String,
    entry: BundleEntry,
    base: PathBuf,
    imported: bool,
}

struct Parser<'a> {
    compilers: &'a Compilers,
    visited: &'a mut HashSet<PathBuf>,
}

impl<'a> Parser<'a> {
    fn new(compilers: &'a Compilers, visited: &'a mut HashSet<PathBuf>) -> Self {
        Parser { compilers, visited }
    }

    fn parse(&mut self, source: &ManifestSource) -> Result<Package, SquareError> {
        let raw = manifest::read(source)?;
        if let Some(location) = &raw.location {
            self.visited.insert(location.clone());
        }

        let mut configuration = defaults();
        self.merge_configuration(&mut configuration, &raw.configuration);

        let imports = self.normalize_imports(&mut configuration);
        let imported = self.parse_imports(&imports, &raw.path);
        self.normalize_license(&mut configuration, &raw.path);
        normalize_dist(&mut configuration)?;

        let configuration: Configuration =
            serde_json::from_value(configuration).map_err(|e| SquareError::InvalidManifest {
                reason: format!("configuration: {e}"),
            })?;

        let mut pending = Vec::new();
        for (key, value) in normalize_bundle(raw.bundle) {
            let entry = bundle_entry(&key, value)?;
            pending.push(Pending {
                key,
                entry,
                base: raw.path.clone(),
                imported: false,
            });
        }

        // An imported bundle never replaces one declared locally.
        for package in imported {
            for (key, entry) in package.bundle {
                if pending.iter().any(|p| p.key == key) {
                    debug!("import bundle {key} shadowed by local declaration");
                    continue;
                }
                pending.push(Pending {
                    key,
                    entry,
                    base: package.path.clone(),
                    imported: true,
                });
            }
        }

        let (bundle, meta) = self.process(pending)?;

        Ok(Package {
            configuration,
            bundle,
            path: raw.path,
            location: raw.location,
            source: raw.source,
            meta,
        })
    }

    fn merge_configuration(&self, target: &mut Value, source: &Value) {
        let Value::Object(source) = source else {
            return;
        };
        for (key, value) in source {
            let depth = if DEEP_MERGE_KEYS.contains(&key.as_str()) {
                MERGE_DEPTH
            } else {
                0
            };
            let mut single = Map::new();
            single.insert(key.clone(), value.clone());
            // depth counts from the configuration object itself
            merge(target, &Value::Object(single), depth);
        }
    }

    fn normalize_imports(&self, configuration: &mut Value) -> Vec<String> {
        let import = configuration.get("import").cloned().unwrap_or(Value::Null);
        let imports = match import {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(path) => Some(path),
                    other => {
                        warn!("ignoring import {other}, expected a path");
                        None
                    }
                })
                .collect::<Vec<_>>(),
            Value::Null => Vec::new(),
            other => {
                warn!("`import` should be an array of paths, got {other}");
                Vec::new()
            }
        };
        configuration["import"] = json!(imports);
        imports
    }

    fn parse_imports(&mut self, imports: &[String], root: &Path) -> Vec<Package> {
        let mut packages = Vec::new();
        for import in imports {
            let location = root.join(import);
            if self.visited.contains(&location) {
                warn!("skipping import {}, it was already imported", location.display());
                continue;
            }

            match Parser::new(self.compilers, self.visited).parse(&ManifestSource::Path(location)) {
                Ok(package) => packages.push(package),
                Err(e) => warn!("failed to import {import}, continuing without it: {e}"),
            }
        }
        packages
    }

    fn normalize_license(&self, configuration: &mut Value, root: &Path) {
        let Some(license) = configuration.get("license").cloned() else {
            return;
        };
        let Value::Object(map) = configuration else {
            return;
        };

        match license {
            Value::String(relative) => {
                let location = root.join(&relative);
                if location.is_file() {
                    map.insert("license".to_string(), json!(location));
                } else {
                    error!(
                        "license file {} does not exist, continuing without a license",
                        location.display()
                    );
                    map.remove("license");
                }
            }
            Value::Null => {
                map.remove("license");
            }
            other => {
                warn!("`license` should be a path, got {other}");
                map.remove("license");
            }
        }
    }

    fn process(
        &self,
        pending: Vec<Pending>,
    ) -> Result<(IndexMap<String, BundleEntry>, PackageMeta), SquareError> {
        let mut bundle = IndexMap::new();
        let mut meta = PackageMeta::default();
        let mut remaining = pending.len();

        for Pending {
            key,
            mut entry,
            base,
            imported,
        } in pending
        {
            let location = base.join(&key);
            if !location.is_file() {
                error!("bundle {key} does not exist at {}", location.display());
                return Err(SquareError::BundleNotFound {
                    key,
                    path: location,
                });
            }

            let extension = location
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            let compiler = self.compilers.get(&extension);
            let output = compiler
                .as_ref()
                .and_then(|c| c.extensions().first().cloned())
                .unwrap_or_else(|| extension.clone());

            let mut dependencies = Vec::new();
            for dependency in &entry.dependencies {
                let path = base.join(dependency);
                if !path.is_file() {
                    error!("dependency {dependency} of {key} does not exist");
                    return Err(SquareError::DependencyNotFound {
                        bundle: key,
                        dependency: dependency.clone(),
                        path,
                    });
                }
                if !meta.dependencies.contains(&path) {
                    meta.dependencies.push(path.clone());
                }
                dependencies.push(path);
            }

            entry.content = std::fs::read_to_string(&location)
                .map_err(|e| SquareError::io(&location, e))?;
            entry.meta = BundleMeta {
                key: key.clone(),
                filename: location
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default(),
                extension,
                output,
                compiler,
                location: location.clone(),
                weight: generate_weight(entry.weight.unwrap_or(1), remaining),
                dependencies,
                imported,
            };
            remaining -= 1;

            debug!("bundle {key} weighs {}", entry.meta.weight);
            meta.files.push(location);
            bundle.insert(key, entry);
        }

        let mut tree: Vec<&BundleEntry> = bundle.values().collect();
        tree.sort_by(|a, b| b.meta.weight.cmp(&a.meta.weight));
        meta.tree = tree.iter().map(|entry| entry.meta.key.clone()).collect();

        for entry in tree {
            meta.extensions
                .entry(entry.meta.output.clone())
                .or_default()
                .push(entry.meta.key.clone());
        }

        Ok((bundle, meta))
    }
}

/// Expands a `dist` string into one template per distribution and drops
/// unknown distribution names.
fn normalize_dist(configuration: &mut Value) -> Result<(), SquareError> {
    let dist = configuration.get("dist").cloned().unwrap_or(Value::Null);
    let normalized = match dist {
        Value::String(template) => Distribution::ALL
            .iter()
            .map(|d| (d.as_str().to_string(), json!(template)))
            .collect::<Map<_, _>>(),
        Value::Object(map) => map
            .into_iter()
            .filter(|(name, _)| {
                let known = name.parse::<Distribution>().is_ok();
                if !known {
                    warn!("ignoring unknown distribution `{name}`");
                }
                known
            })
            .collect(),
        other => {
            return Err(SquareError::InvalidManifest {
                reason: format!("`dist` should be a path template or a map of them, got {other}"),
            })
        }
    };
    configuration["dist"] = Value::Object(normalized);
    Ok(())
}

/// `bundle` may be declared as an array of paths; both forms end up as
/// `(key, entry)` pairs in declaration order.
fn normalize_bundle(bundle: Value) -> Vec<(String, Value)> {
    match bundle {
        Value::Object(map) => map.into_iter().collect(),
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(key) => Some((key, json!({}))),
                other => {
                    warn!("ignoring bundle {other}, expected a path");
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn bundle_entry(key: &str, value: Value) -> Result<BundleEntry, SquareError> {
    let mut value = match value {
        Value::Null => json!({}),
        value @ Value::Object(_) => value,
        other => {
            return Err(SquareError::InvalidManifest {
                reason: format!("bundle `{key}` should be an object, got {other}"),
            })
        }
    };

    if let Value::Object(map) = &mut value {
        match map.get("weight") {
            None | Some(Value::Null) => {}
            Some(Value::Number(n)) if n.is_i64() => {}
            Some(other) => {
                return Err(SquareError::InvalidManifest {
                    reason: format!("weight of bundle `{key}` must be a whole number, got {other}"),
                })
            }
        }
        match map.get("dependencies") {
            None | Some(Value::Array(_)) => {}
            Some(other) => {
                warn!("dependencies of {key} should be an array, got {other}; ignoring them");
                map.remove("dependencies");
            }
        }
    }

    serde_json::from_value(value).map_err(|e| SquareError::InvalidManifest {
        reason: format!("bundle `{key}`: {e}"),
    })
}
