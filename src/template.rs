//! `{placeholder}` substitution for output locations and license headers.
//!
//! Placeholders are dot paths into a JSON context (`{git.branch}`,
//! `{tags.0}`). The default context is the *tag* context: content hash, git
//! branch and sha, date, user, host, environment and whatever the manifest
//! declares under `configuration.tags`.
//!
//! Missing keys render as the empty string. Templates are filled on a
//! best-effort basis and never fail.

use crate::model::{Collection, Configuration};
use chrono::{Datelike, Local};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::{Captures, Regex};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([^{}\s]+)\}").expect("placeholder pattern is valid");
}

/// How long git metadata is reused before shelling out again.
pub const GIT_CACHE_TTL: Duration = Duration::from_secs(3 * 60);

/// Replaces every `{dot.path}` in `input` with the value found in `data`.
pub fn template(input: &str, data: &Value) -> String {
    PLACEHOLDER
        .replace_all(input, |caps: &Captures| {
            lookup(data, &caps[1]).map(render).unwrap_or_default()
        })
        .into_owned()
}

/// Walks `path` through `data`. Numeric segments index arrays.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// A single value that goes stale after `ttl`. Only caches while started;
/// stopping drops the value so the next build sees fresh data.
#[derive(Debug)]
pub struct ExpiringCache<T> {
    ttl: Duration,
    entry: Option<(Instant, T)>,
    running: bool,
}

impl<T: Clone> ExpiringCache<T> {
    pub fn new(ttl: Duration) -> Self {
        ExpiringCache {
            ttl,
            entry: None,
            running: false,
        }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.entry = None;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn get_or_refresh(&mut self, fetch: impl FnOnce() -> T) -> T {
        if let Some((stored, value)) = &self.entry {
            if stored.elapsed() < self.ttl {
                return value.clone();
            }
        }

        let value = fetch();
        if self.running {
            self.entry = Some((Instant::now(), value.clone()));
        }
        value
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitInfo {
    pub branch: String,
    pub sha: String,
}

impl GitInfo {
    /// Reads the current branch and commit of the repository containing
    /// `root`. Outside a repository both fields are empty.
    pub fn read(root: &Path) -> Self {
        let git = |args: &[&str]| -> String {
            Command::new("git")
                .args(args)
                .current_dir(root)
                .output()
                .ok()
                .filter(|output| output.status.success())
                .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
                .unwrap_or_default()
        };

        GitInfo {
            branch: git(&["rev-parse", "--abbrev-ref", "HEAD"]),
            sha: git(&["rev-parse", "HEAD"]),
        }
    }
}

/// Computes tag contexts for one package.
#[derive(Debug)]
pub struct Tagger {
    root: PathBuf,
    env: String,
    git: Mutex<ExpiringCache<GitInfo>>,
}

impl Tagger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Tagger {
            root: root.into(),
            env: std::env::var("SQUARE_ENV").unwrap_or_else(|_| "development".to_string()),
            git: Mutex::new(ExpiringCache::new(GIT_CACHE_TTL)),
        }
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    pub fn set_root(&mut self, root: impl Into<PathBuf>) {
        self.root = root.into();
        self.git().stop();
    }

    pub fn start(&self) {
        self.git().start();
    }

    pub fn stop(&self) {
        self.git().stop();
    }

    fn git(&self) -> MutexGuard<'_, ExpiringCache<GitInfo>> {
        // the cache holds no invariant a panic could break
        self.git.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The tag context for `collection`, overlaid with `configuration.tags`.
    pub fn tag(&self, collection: Option<&Collection>, configuration: &Configuration) -> Value {
        let root = self.root.clone();
        let git = self.git().get_or_refresh(|| {
            debug!("reading git metadata in {}", root.display());
            GitInfo::read(&root)
        });
        let now = Local::now();

        let mut context = Map::new();
        context.insert("branch".to_string(), json!(git.branch));
        context.insert("sha".to_string(), json!(git.sha));
        context.insert("date".to_string(), json!(now.format("%Y-%m-%d").to_string()));
        context.insert("year".to_string(), json!(now.year()));
        context.insert("user".to_string(), json!(whoami::username()));
        context.insert(
            "host".to_string(),
            json!(whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string())),
        );
        context.insert("env".to_string(), json!(self.env));

        for (key, value) in &configuration.tags {
            context.insert(key.clone(), value.clone());
        }

        // Output naming depends on these, so they always describe the collection.
        if let Some(collection) = collection {
            let digest = Sha256::digest(collection.content.as_bytes());
            let hash = format!("{digest:x}");
            let derived = [
                ("shorthash", json!(&hash[..8])),
                ("hash", json!(hash)),
                ("type", json!(collection.distribution.as_str())),
                ("ext", json!(collection.extension)),
                ("platform", json!(collection.platform)),
            ];
            for (key, value) in derived {
                if configuration.tags.contains_key(key) {
                    warn!("tag `{key}` is computed per output, ignoring the configured value");
                }
                context.insert(key.to_string(), value);
            }
        }

        Value::Object(context)
    }

    /// `template(input, tag(collection, configuration))`.
    pub fn render(
        &self,
        input: &str,
        collection: Option<&Collection>,
        configuration: &Configuration,
    ) -> String {
        let context = self.tag(collection, configuration);
        template(input, &context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Distribution;

    #[test]
    fn test_template_substitutes() {
        assert_eq!(template("hello {world}", &json!({"world": "foo"})), "hello foo");
    }

    #[test]
    fn test_template_missing_key_is_empty() {
        assert_eq!(template("hello {missing}", &json!({})), "hello ");
    }

    #[test]
    fn test_template_dot_paths_and_arrays() {
        let data = json!({"git": {"branch": "main"}, "list": ["a", "b"], "n": 3});
        assert_eq!(template("{git.branch}/{list.1}/{n}", &data), "main/b/3");
        assert_eq!(template("{list.9}{git.nope.deeper}", &data), "");
    }

    #[test]
    fn test_template_leaves_braces_with_spaces() {
        let data = json!({});
        assert_eq!(template("function () { return 1 }", &data), "function () { return 1 }");
    }

    #[test]
    fn test_expiring_cache_only_caches_while_running() {
        let mut cache = ExpiringCache::new(Duration::from_secs(60));
        assert_eq!(cache.get_or_refresh(|| 1), 1);
        assert_eq!(cache.get_or_refresh(|| 2), 2);

        cache.start();
        assert_eq!(cache.get_or_refresh(|| 3), 3);
        assert_eq!(cache.get_or_refresh(|| 4), 3);

        cache.stop();
        assert!(!cache.is_running());
        assert_eq!(cache.get_or_refresh(|| 5), 5);
    }

    #[test]
    fn test_expiring_cache_expires() {
        let mut cache = ExpiringCache::new(Duration::ZERO);
        cache.start();
        assert_eq!(cache.get_or_refresh(|| 1), 1);
        assert_eq!(cache.get_or_refresh(|| 2), 2);
    }

    #[test]
    fn test_tag_context_overlays_configuration_tags() {
        let mut configuration = Configuration::default();
        configuration.tags.insert("env".to_string(), json!("staging"));
        configuration.tags.insert("name".to_string(), json!("app"));

        let collection = Collection::new("var a;", "js", "web", Distribution::Min);
        let tagger = Tagger::new(std::env::temp_dir()).with_env("test");
        let context = tagger.tag(Some(&collection), &configuration);

        assert_eq!(context["env"], "staging");
        assert_eq!(context["name"], "app");
        assert_eq!(context["type"], "min");
        assert_eq!(context["ext"], "js");
        assert_eq!(context["hash"].as_str().unwrap().len(), 64);
        assert_eq!(
            tagger.render("{name}.{type}.{ext}", Some(&collection), &configuration),
            "app.min.js"
        );
    }

    #[test]
    fn test_configured_tags_never_shadow_output_keys() {
        let mut configuration = Configuration::default();
        configuration.tags.insert("type".to_string(), json!("release"));
        configuration.tags.insert("ext".to_string(), json!("txt"));

        let tagger = Tagger::new(std::env::temp_dir()).with_env("test");
        let min = Collection::new("a", "js", "web", Distribution::Min);
        let dev = Collection::new("a", "js", "web", Distribution::Dev);

        assert_eq!(
            tagger.render("{type}.{ext}", Some(&min), &configuration),
            "min.js"
        );
        assert_eq!(
            tagger.render("{type}.{ext}", Some(&dev), &configuration),
            "dev.js"
        );
        // without a collection the configured value is all there is
        assert_eq!(tagger.render("{type}", None, &configuration), "release");
    }
}
