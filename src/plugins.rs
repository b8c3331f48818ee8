//! Built-in middleware and the registry that instantiates middleware from
//! the `configuration.plugins` section of a manifest.
//!
//! Minifiers and linters live outside this crate; they plug in through the
//! same [`PluginRegistry`] as the built-ins below.

use crate::comments;
use crate::error::SquareError;
use crate::model::Collection;
use crate::pipeline::{BuildContext, Middleware};
use indexmap::IndexMap;
use log::debug;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

pub type PluginFactory = Box<dyn Fn(&Value) -> Result<Box<dyn Middleware>, SquareError> + Send + Sync>;

/// Plugin name to factory. The factory receives the plugin's options from
/// the manifest (`null` when none were given).
#[derive(Default)]
pub struct PluginRegistry {
    factories: IndexMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("license", |_| Ok(Box::new(License) as Box<dyn Middleware>));
        registry.register("wrap", |options| {
            Ok(Box::new(Wrap::from_options(options)?) as Box<dyn Middleware>)
        });
        registry.register("replace", |options| {
            Ok(Box::new(Replace::from_options(options)?) as Box<dyn Middleware>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Middleware>, SquareError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiates `name` with `options`. `None` when no such plugin exists.
    pub fn create(
        &self,
        name: &str,
        options: &Value,
    ) -> Option<Result<Box<dyn Middleware>, SquareError>> {
        let factory = self.factories.get(name)?;
        debug!("configuring plugin {name}");
        Some(factory(options))
    }
}

fn options<T>(name: &str, options: &Value) -> Result<T, SquareError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if options.is_null() || options.as_bool() == Some(true) {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone()).map_err(|e| SquareError::PluginOptions {
        name: name.to_string(),
        message: e.to_string(),
    })
}

/// Prepends `configuration.license`, rendered through the tag context and
/// wrapped in the comment style of the output.
#[derive(Debug, Default)]
pub struct License;

impl Middleware for License {
    fn name(&self) -> &str {
        "license"
    }

    fn process(
        &self,
        context: &BuildContext<'_>,
        collection: &Collection,
    ) -> Result<Option<Collection>, SquareError> {
        let configuration = &context.package.configuration;
        let Some(location) = &configuration.license else {
            return Ok(None);
        };

        let text = std::fs::read_to_string(location).map_err(|e| SquareError::io(location, e))?;
        let header = context
            .tagger
            .render(text.trim(), Some(collection), configuration);

        let mut next = collection.clone();
        next.content = format!(
            "{}\n{}",
            comments::wrap(&collection.extension, &header),
            collection.content
        );
        Ok(Some(next))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WrapOptions {
    pub leading: String,
    pub trailing: String,
}

impl Default for WrapOptions {
    fn default() -> Self {
        WrapOptions {
            leading: "(function () {".to_string(),
            trailing: "}());".to_string(),
        }
    }
}

/// Wraps JavaScript output in a closure so bundles don't leak globals.
#[derive(Debug, Default)]
pub struct Wrap {
    options: WrapOptions,
}

impl Wrap {
    pub fn from_options(value: &Value) -> Result<Self, SquareError> {
        Ok(Wrap {
            options: options("wrap", value)?,
        })
    }
}

impl Middleware for Wrap {
    fn name(&self) -> &str {
        "wrap"
    }

    fn fingerprint(&self) -> String {
        format!("wrap:{}:{}", self.options.leading, self.options.trailing)
    }

    fn accepts(&self, collection: &Collection) -> bool {
        collection.extension == "js"
    }

    fn process(
        &self,
        _context: &BuildContext<'_>,
        collection: &Collection,
    ) -> Result<Option<Collection>, SquareError> {
        let mut next = collection.clone();
        next.content = format!(
            "{}\n{}\n{}",
            self.options.leading, collection.content, self.options.trailing
        );
        Ok(Some(next))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReplaceOptions {
    /// Treat the keys of `variables` as regular expressions.
    pub regex: bool,
    /// Pattern to replacement. Replacements are templates over the tag context.
    pub variables: IndexMap<String, String>,
}

/// Variable replacement: swaps literal strings or regex matches for
/// templated values, in declaration order.
#[derive(Debug)]
pub struct Replace {
    fingerprint: String,
    rules: Vec<(Regex, String)>,
}

impl Replace {
    pub fn from_options(value: &Value) -> Result<Self, SquareError> {
        let parsed: ReplaceOptions = options("replace", value)?;

        let mut rules = Vec::with_capacity(parsed.variables.len());
        for (pattern, replacement) in &parsed.variables {
            let source = if parsed.regex {
                pattern.clone()
            } else {
                regex::escape(pattern)
            };
            let regex = Regex::new(&source).map_err(|e| SquareError::PluginOptions {
                name: "replace".to_string(),
                message: e.to_string(),
            })?;
            rules.push((regex, replacement.clone()));
        }

        Ok(Replace {
            fingerprint: format!("replace:{value}"),
            rules,
        })
    }
}

impl Middleware for Replace {
    fn name(&self) -> &str {
        "replace"
    }

    fn fingerprint(&self) -> String {
        self.fingerprint.clone()
    }

    fn process(
        &self,
        context: &BuildContext<'_>,
        collection: &Collection,
    ) -> Result<Option<Collection>, SquareError> {
        if self.rules.is_empty() {
            return Ok(None);
        }

        let tags = context
            .tagger
            .tag(Some(collection), &context.package.configuration);
        let mut content = collection.content.clone();
        for (pattern, replacement) in &self.rules {
            let value = crate::template::template(replacement, &tags);
            content = pattern
                .replace_all(&content, regex::NoExpand(&value))
                .into_owned();
        }

        let mut next = collection.clone();
        next.content = content;
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Distribution, Package};
    use crate::template::Tagger;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn process(middleware: &dyn Middleware, package: &Package, content: &str) -> Option<Collection> {
        let tagger = Tagger::new(".").with_env("test");
        let context = BuildContext {
            package,
            tagger: &tagger,
        };
        let collection = Collection::new(content, "js", "web", Distribution::Min);
        middleware.process(&context, &collection).unwrap()
    }

    #[test]
    fn test_registry_defaults() {
        let registry = PluginRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["license", "wrap", "replace"]);
        assert!(registry.create("uglify", &Value::Null).is_none());
        assert!(registry.create("wrap", &Value::Null).unwrap().is_ok());
    }

    #[test]
    fn test_invalid_options_are_reported() {
        let registry = PluginRegistry::with_defaults();
        let result = registry.create("wrap", &json!({"leading": 42})).unwrap();
        assert!(matches!(result, Err(SquareError::PluginOptions { .. })));

        let result = Replace::from_options(&json!({"regex": true, "variables": {"(": "x"}}));
        assert!(matches!(result, Err(SquareError::PluginOptions { .. })));
    }

    #[test]
    fn test_wrap() {
        let wrap = Wrap::from_options(&json!({"trailing": "})();"})).unwrap();
        let out = process(&wrap, &Package::default(), "var a;").unwrap();
        assert_eq!(out.content, "(function () {\nvar a;\n})();");
        assert!(!wrap.accepts(&Collection::new("", "css", "web", Distribution::Min)));
    }

    #[test]
    fn test_replace_literal_and_templated() {
        let mut package = Package::default();
        package.configuration.tags.insert("version".to_string(), json!("1.2.3"));

        let replace = Replace::from_options(&json!({
            "variables": {"__VERSION__": "{version}", "a.b": "c"}
        }))
        .unwrap();
        let out = process(&replace, &package, "v='__VERSION__'; axb; a.b").unwrap();
        assert_eq!(out.content, "v='1.2.3'; axb; c");
    }

    #[test]
    fn test_replace_regex() {
        let replace = Replace::from_options(&json!({
            "regex": true,
            "variables": {"console\\.log\\([^)]*\\);?": ""}
        }))
        .unwrap();
        let out = process(&replace, &Package::default(), "a();console.log(1);b();").unwrap();
        assert_eq!(out.content, "a();b();");
    }

    #[test]
    fn test_license_prepends_comment() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("LICENSE");
        fs::write(&location, "Copyright {name}\nMIT").unwrap();

        let mut package = Package::default();
        package.configuration.license = Some(location);
        package.configuration.tags.insert("name".to_string(), json!("square"));

        let out = process(&License, &package, "var a;").unwrap();
        assert_eq!(out.content, "/*!\n * Copyright square\n * MIT\n */\nvar a;");
    }

    #[test]
    fn test_license_without_configuration_is_noop() {
        assert!(process(&License, &Package::default(), "var a;").is_none());
    }
}
