use crate::comments;
use crate::error::SquareError;
use crate::utils::get_line_and_column;
use lazy_static::lazy_static;
use log::{debug, error};
use miette::NamedSource;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

lazy_static! {
    // `// [square] @require "path"` or `/* [square] @import path */`
    static ref DIRECTIVE: Regex = Regex::new(
        r#"(?i)^\s*(?://|/\*)\s*\[square\]\s*@(?:require|import|include)\s+["']?([^"'\s]+?)["']?\s*(?:\*/)?\s*$"#
    )
    .expect("directive pattern is valid");
}

/// Expands `[square] @require|@import|@include` directives by inlining the
/// referenced files, recursively.
pub struct Resolver {
    // Directive paths resolve against this directory
    root: PathBuf,
    // Every file inlined during this expansion, to detect recursion
    seen: HashSet<PathBuf>,
}

impl Resolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Resolver {
            root: root.into(),
            seen: HashSet::new(),
        }
    }

    /// Starts with files already marked as included.
    pub fn with_seen(root: impl Into<PathBuf>, seen: HashSet<PathBuf>) -> Self {
        Resolver {
            root: root.into(),
            seen,
        }
    }

    /// Files inlined so far.
    pub fn seen(&self) -> &HashSet<PathBuf> {
        &self.seen
    }

    /// Resolves every directive in `content`. `extension` decides the banner
    /// comment style and whether missing semicolons are repaired.
    pub fn directive(&mut self, content: &str, extension: &str) -> Result<String, SquareError> {
        self.expand(content, extension, "<bundle>")
    }

    /// Like [`Resolver::directive`], naming `content` after `name` in diagnostics.
    pub fn directive_named(
        &mut self,
        content: &str,
        extension: &str,
        name: &str,
    ) -> Result<String, SquareError> {
        self.expand(content, extension, name)
    }

    fn expand(&mut self, content: &str, extension: &str, name: &str) -> Result<String, SquareError> {
        let mut output: Vec<String> = Vec::new();
        let mut offset = 0;

        for line in content.split('\n') {
            let line_start = offset;
            offset += line.len() + 1;

            let Some(captures) = DIRECTIVE.captures(line) else {
                output.push(line.to_string());
                continue;
            };

            let reference = &captures[1];
            let statement = line.trim().to_string();
            let location = self.root.join(reference);
            let span = (line_start, line.len()).into();

            if !location.is_file() {
                let (row, _) = get_line_and_column(content, line_start);
                error!("{name}:{row}: directive target {} does not exist", location.display());
                return Err(SquareError::DirectiveNotFound {
                    statement,
                    path: location,
                    src: NamedSource::new(name, content.to_string()),
                    span,
                });
            }

            if !self.seen.insert(location.clone()) {
                let (row, _) = get_line_and_column(content, line_start);
                error!("{name}:{row}: recursive directive {statement}");
                return Err(SquareError::RecursiveDirective {
                    statement,
                    src: NamedSource::new(name, content.to_string()),
                    span,
                });
            }

            debug!("inlining {} into {name}", location.display());
            let included = std::fs::read_to_string(&location)
                .map_err(|e| SquareError::io(&location, e))?;
            let included = self.expand(included.trim(), extension, &location.to_string_lossy())?;

            if extension == "js" && !included.starts_with(';') {
                terminate_previous_statement(&mut output);
            }

            output.push(comments::banner(
                extension,
                &format!("[square] directive: {reference}"),
            ));
            output.push(included);
        }

        Ok(output.join("\n").trim().to_string())
    }
}

/// Resolves directives in `content` with a fresh seen set, relative to `root`.
pub fn directive(root: &Path, content: &str, extension: &str) -> Result<String, SquareError> {
    Resolver::new(root).directive(content, extension)
}

/// Lines that hold nothing but a comment. Code followed by a trailing
/// comment is still code.
fn is_comment(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("//") || line.starts_with("/*") || line.starts_with('*')
}

/// Appends a `;` to the last line holding code, skipping blank and comment
/// lines, unless it already ends in one.
fn terminate_previous_statement(output: &mut [String]) {
    let previous = output
        .iter_mut()
        .rev()
        .find(|line| !line.trim().is_empty() && !is_comment(line));

    if let Some(line) = previous {
        let trimmed = line.trim_end().len();
        if !line[..trimmed].ends_with(';') {
            line.truncate(trimmed);
            line.push(';');
        }
    }
}
