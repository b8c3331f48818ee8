use miette::{Diagnostic, GraphicalReportHandler, GraphicalTheme, NamedSource, SourceSpan};
use std::path::PathBuf;
use thiserror::Error;

pub type SquareResult<T> = Result<T, SquareError>;

#[derive(Error, Debug, Diagnostic)]
pub enum SquareError {
    #[error("manifest not found: {}", .path.display())]
    #[diagnostic(
        code(square::manifest_not_found),
        help("Point square at an existing square.json (or square.js) file.")
    )]
    ManifestNotFound { path: PathBuf },

    #[error("manifest is not valid JSON: {message}")]
    #[diagnostic(code(square::manifest_syntax))]
    ManifestSyntax {
        message: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("{message}")]
        span: SourceSpan,
    },

    #[error("invalid manifest: {reason}")]
    #[diagnostic(code(square::invalid_manifest))]
    InvalidManifest { reason: String },

    #[error("bundle `{key}` does not exist at {}", .path.display())]
    #[diagnostic(
        code(square::bundle_not_found),
        help("Bundle keys are resolved relative to the directory of the manifest.")
    )]
    BundleNotFound { key: String, path: PathBuf },

    #[error("dependency `{dependency}` of bundle `{bundle}` does not exist at {}", .path.display())]
    #[diagnostic(code(square::dependency_not_found))]
    DependencyNotFound {
        bundle: String,
        dependency: String,
        path: PathBuf,
    },

    #[error("unable to resolve directive `{statement}`: {} does not exist", .path.display())]
    #[diagnostic(
        code(square::directive_not_found),
        help("Directive paths are resolved relative to the directory of the manifest.")
    )]
    DirectiveNotFound {
        statement: String,
        path: PathBuf,
        #[source_code]
        src: NamedSource<String>,
        #[label("included here")]
        span: SourceSpan,
    },

    #[error("recursive directive detected in `{statement}`")]
    #[diagnostic(
        code(square::recursive_directive),
        help("A file is included more than once in the same expansion. Remove one of the directives.")
    )]
    RecursiveDirective {
        statement: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("this file was already included")]
        span: SourceSpan,
    },

    #[error("no manifest has been parsed, call `parse` before building")]
    #[diagnostic(code(square::not_parsed))]
    NotParsed,

    #[error("failed to compile `{key}`: {message}")]
    #[diagnostic(code(square::compiler))]
    Compiler { key: String, message: String },

    #[error("middleware `{name}` failed: {message}")]
    #[diagnostic(code(square::middleware))]
    Middleware { name: String, message: String },

    #[error("invalid options for plugin `{name}`: {message}")]
    #[diagnostic(code(square::plugin_options))]
    PluginOptions { name: String, message: String },

    #[error("failed to store {}: {message}", .location.display())]
    #[diagnostic(code(square::storage))]
    Storage { location: PathBuf, message: String },

    #[error("I/O error on {}: {source}", .path.display())]
    #[diagnostic(code(square::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(square::json))]
    Json(#[from] serde_json::Error),
}

impl SquareError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SquareError::Io {
            path: path.into(),
            source,
        }
    }

    /// Critical errors abort the current operation entirely. Everything else
    /// is either recoverable or propagated to the caller of a single stage.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            SquareError::ManifestNotFound { .. }
                | SquareError::ManifestSyntax { .. }
                | SquareError::InvalidManifest { .. }
                | SquareError::BundleNotFound { .. }
                | SquareError::DependencyNotFound { .. }
                | SquareError::DirectiveNotFound { .. }
                | SquareError::RecursiveDirective { .. }
                | SquareError::NotParsed
        )
    }

    /// Renders the diagnostic block printed before a one-shot invocation
    /// exits on a critical error.
    pub fn report(&self) -> String {
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        let args = std::env::args().collect::<Vec<_>>().join(" ");

        let mut out = String::new();
        out.push_str(&format!(
            "square-core v{} encountered a critical error\n",
            env!("CARGO_PKG_VERSION")
        ));
        out.push_str(&format!(
            "  platform: {}-{}\n",
            std::env::consts::OS,
            std::env::consts::ARCH
        ));
        out.push_str(&format!("  command:  {args}\n"));
        out.push_str(&format!("  cwd:      {cwd}\n\n"));

        let mut rendered = String::new();
        if GraphicalReportHandler::new_themed(GraphicalTheme::unicode_nocolor())
            .render_report(&mut rendered, self)
            .is_err()
        {
            rendered = self.to_string();
        }
        out.push_str(&rendered);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_bundle_not_found() {
        let err = SquareError::BundleNotFound {
            key: "missing.js".to_string(),
            path: PathBuf::from("/project/missing.js"),
        };
        assert_eq!(
            err.to_string(),
            "bundle `missing.js` does not exist at /project/missing.js"
        );
        assert!(err.is_critical());
    }

    #[test]
    fn test_stage_errors_are_not_critical() {
        let err = SquareError::Middleware {
            name: "wrap".to_string(),
            message: "boom".to_string(),
        };
        assert!(!err.is_critical());
        assert_eq!(err.to_string(), "middleware `wrap` failed: boom");
    }

    #[test]
    fn test_report_contains_context() {
        let report = SquareError::NotParsed.report();
        assert!(report.contains(env!("CARGO_PKG_VERSION")));
        assert!(report.contains("platform:"));
        assert!(report.contains("cwd:"));
        assert!(report.contains("parse"));
    }
}
