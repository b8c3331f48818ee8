//! Pre-processors: the boundary between square and external compilers such
//! as Stylus, Less, Sass, CoffeeScript or Jade.
//!
//! Square never links these tools. A [`Compiler`] is an opaque "content in,
//! content or error out" transform, looked up by source extension in an
//! injected [`Compilers`] registry.

use crate::error::SquareError;
use crate::model::BundleEntry;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

lazy_static! {
    static ref IMPORT_STATEMENT: Regex =
        Regex::new(r#"(?m)^\s*@(?:import|require)\s+(?:url\()?['"]?([^'"\s;)]+)['"]?"#)
            .expect("import pattern is valid");
}

/// Position of a bundle among all bundles sharing its output extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Details {
    pub index: usize,
    pub count: usize,
    pub platform: String,
}

pub trait Compiler: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Extensions this compiler can produce. The first one is what a bundle
    /// compiled by it is registered under.
    fn extensions(&self) -> &[String];

    /// Transforms `content`. The bundle being compiled is available for
    /// metadata such as its key and location.
    fn compile(
        &self,
        bundle: &BundleEntry,
        content: &str,
        details: &Details,
    ) -> Result<String, SquareError>;

    /// Files `location` pulls in through the language's own import
    /// mechanism, recursively. Used to decide which files to watch.
    fn imports(&self, _location: &Path, _seen: &mut HashSet<PathBuf>) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Adapts any command line tool that reads source on stdin and writes the
/// compiled result to stdout.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    name: String,
    program: String,
    args: Vec<String>,
    source: String,
    extensions: Vec<String>,
}

impl CommandCompiler {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args: &[&str],
        source: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        CommandCompiler {
            name: name.into(),
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            source: source.into(),
            extensions: vec![output.into()],
        }
    }
}

impl Compiler for CommandCompiler {
    fn name(&self) -> &str {
        &self.name
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn compile(
        &self,
        bundle: &BundleEntry,
        content: &str,
        details: &Details,
    ) -> Result<String, SquareError> {
        let failure = |message: String| SquareError::Compiler {
            key: bundle.meta.key.clone(),
            message,
        };

        debug!(
            "compiling {} with {} ({}/{})",
            bundle.meta.key,
            self.program,
            details.index + 1,
            details.count
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(
                bundle
                    .meta
                    .location
                    .parent()
                    .unwrap_or_else(|| Path::new(".")),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| failure(format!("unable to start `{}`: {e}", self.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| failure("stdin of the compiler is not available".to_string()))?;
        let input = content.to_string();
        let writer = std::thread::spawn(move || stdin.write_all(input.as_bytes()));

        let output = child
            .wait_with_output()
            .map_err(|e| failure(e.to_string()))?;
        writer
            .join()
            .map_err(|_| failure("writer thread panicked".to_string()))?
            .map_err(|e| failure(e.to_string()))?;

        if !output.status.success() {
            return Err(failure(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        String::from_utf8(output.stdout).map_err(|e| failure(e.to_string()))
    }

    fn imports(&self, location: &Path, seen: &mut HashSet<PathBuf>) -> Vec<PathBuf> {
        scan_imports(location, &self.source, seen)
    }
}

/// Follows `@import` / `@require` statements starting at `location`. A
/// reference without an extension is tried with `extension` appended.
pub fn scan_imports(location: &Path, extension: &str, seen: &mut HashSet<PathBuf>) -> Vec<PathBuf> {
    let Ok(content) = std::fs::read_to_string(location) else {
        return Vec::new();
    };
    let directory = location.parent().unwrap_or_else(|| Path::new("."));

    let mut found = Vec::new();
    for capture in IMPORT_STATEMENT.captures_iter(&content) {
        let reference = &capture[1];
        let mut candidate = directory.join(reference);
        if candidate.extension().is_none() {
            candidate.set_extension(extension);
        }
        if !candidate.exists() || !seen.insert(candidate.clone()) {
            continue;
        }
        found.push(candidate.clone());
        found.extend(scan_imports(&candidate, extension, seen));
    }
    found
}

/// Source extension to compiler.
#[derive(Debug, Clone, Default)]
pub struct Compilers {
    by_extension: HashMap<String, Arc<dyn Compiler>>,
}

impl Compilers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with adapters for the usual command line
    /// tools. The tools are only spawned when a bundle needs them.
    pub fn with_defaults() -> Self {
        let mut compilers = Self::new();
        compilers.register(
            "styl",
            CommandCompiler::new("stylus", "stylus", &["--print"], "styl", "css"),
        );
        compilers.register(
            "less",
            CommandCompiler::new("less", "lessc", &["-"], "less", "css"),
        );
        compilers.register(
            "sass",
            CommandCompiler::new("sass", "sass", &["--stdin", "--indented"], "sass", "css"),
        );
        compilers.register(
            "scss",
            CommandCompiler::new("scss", "sass", &["--stdin"], "scss", "css"),
        );
        compilers.register(
            "coffee",
            CommandCompiler::new("coffee", "coffee", &["--stdio", "--print", "--compile"], "coffee", "js"),
        );
        compilers.register(
            "jade",
            CommandCompiler::new("jade", "jade", &["--client", "--no-debug"], "jade", "js"),
        );
        compilers
    }

    pub fn register(&mut self, extension: impl Into<String>, compiler: impl Compiler + 'static) {
        self.by_extension.insert(extension.into(), Arc::new(compiler));
    }

    pub fn get(&self, extension: &str) -> Option<Arc<dyn Compiler>> {
        self.by_extension.get(extension).cloned()
    }
}
