use miette::Report;
use square_core::error::SquareError;
use square_core::resolver::{directive, Resolver};
use std::collections::HashSet;
use std::fs;
use tempfile::TempDir;

fn resolve_ok(dir: &TempDir, content: &str, extension: &str) -> String {
    match directive(dir.path(), content, extension) {
        Ok(resolved) => resolved,
        Err(err) => panic!("{:?}", Report::from(err)),
    }
}

fn resolve_err(dir: &TempDir, content: &str, extension: &str) -> SquareError {
    match directive(dir.path(), content, extension) {
        Ok(resolved) => panic!("expected an error, got {resolved:?}"),
        Err(err) => err,
    }
}

#[test]
fn test_plain_content_is_returned_trimmed() {
    let dir = TempDir::new().unwrap();
    let content = "\n\nfunction a() { return 1; }\n/* not a directive */\n";
    assert_eq!(resolve_ok(&dir, content, "js"), content.trim());
}

#[test]
fn test_transitive_cycle_is_detected() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.js"), "a();\n// [square] @import \"b.js\"").unwrap();
    fs::write(dir.path().join("b.js"), "b();\n// [square] @import \"a.js\"").unwrap();

    let err = resolve_err(&dir, "// [square] @import \"a.js\"", "js");
    assert!(err.is_critical());
    let message = err.to_string();
    assert!(message.contains("recursive"));
    assert!(message.contains("// [square] @import \"a.js\""));
}

#[test]
fn test_same_file_twice_is_reported() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("util.js"), "util();").unwrap();

    let content = "// [square] @require \"util.js\"\n// [square] @require \"util.js\"";
    let err = resolve_err(&dir, content, "js");
    assert!(matches!(err, SquareError::RecursiveDirective { .. }));
}

#[test]
fn test_resolver_reports_seen_files() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.css"), "a{}").unwrap();
    fs::write(dir.path().join("b.css"), "/* [square] @import a.css */\nb{}").unwrap();

    let mut resolver = Resolver::new(dir.path());
    let resolved = resolver
        .directive("/* [square] @import b.css */", "css")
        .unwrap();
    assert_eq!(
        resolved,
        "/*! [square] directive: b.css */\n/*! [square] directive: a.css */\na{}\nb{}"
    );

    let expected: HashSet<_> = [dir.path().join("a.css"), dir.path().join("b.css")].into();
    assert_eq!(resolver.seen(), &expected);
}

#[test]
fn test_seeded_resolver_refuses_known_files() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.js"), "a();").unwrap();

    let seen: HashSet<_> = [dir.path().join("a.js")].into();
    let mut resolver = Resolver::with_seen(dir.path(), seen);
    assert!(resolver
        .directive("// [square] @include 'a.js'", "js")
        .is_err());
}

#[test]
fn test_directive_error_renders_with_source() {
    let dir = TempDir::new().unwrap();
    let err = resolve_err(&dir, "one();\n// [square] @require \"two.js\"", "js");

    let rendered = err.report();
    assert!(rendered.contains("two.js"));
    assert!(rendered.contains("square::directive_not_found"));
}
