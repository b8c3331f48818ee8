use serde_json::json;
use square_core::compiler::Compilers;
use square_core::error::SquareError;
use square_core::manifest::ManifestSource;
use square_core::model::{Distribution, Package};
use square_core::parser::parse;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn parse_ok(dir: &Path) -> Package {
    match parse(&ManifestSource::Path(dir.to_path_buf()), &Compilers::new()) {
        Ok(package) => package,
        Err(err) => panic!("{:?}", miette::Report::from(err)),
    }
}

#[test]
fn test_explicit_weights_order_the_tree() {
    let dir = TempDir::new().unwrap();
    for name in ["light.js", "heavy.js", "plain.js"] {
        write(dir.path(), name, name);
    }
    write(
        dir.path(),
        "square.json",
        r#"{ "bundle": {
            "light.js": { "weight": 5 },
            "heavy.js": { "weight": 100 },
            "plain.js": {}
        } }"#,
    );

    let package = parse_ok(dir.path());
    assert_eq!(package.meta.tree, vec!["heavy.js", "light.js", "plain.js"]);
}

#[test]
fn test_unweighted_bundles_keep_declaration_order() {
    let dir = TempDir::new().unwrap();
    for name in ["c.js", "a.js", "b.js"] {
        write(dir.path(), name, "");
    }
    write(dir.path(), "square.json", r#"{ "bundle": ["c.js", "a.js", "b.js"] }"#);

    let package = parse_ok(dir.path());
    assert_eq!(package.meta.tree, vec!["c.js", "a.js", "b.js"]);
    assert_eq!(package.meta.extensions["js"], vec!["c.js", "a.js", "b.js"]);
}

#[test]
fn test_missing_bundle_fails_without_tree() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "square.json", r#"{ "bundle": { "missing.js": {} } }"#);

    let err = parse(&ManifestSource::Path(dir.path().to_path_buf()), &Compilers::new())
        .unwrap_err();
    assert!(err.is_critical());
    match err {
        SquareError::BundleNotFound { key, .. } => assert_eq!(key, "missing.js"),
        other => panic!("expected BundleNotFound, got {other:?}"),
    }
}

#[test]
fn test_missing_dependency_is_critical() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "main.js", "main();");
    write(
        dir.path(),
        "square.json",
        r#"{ "bundle": { "main.js": { "dependencies": ["vendor/gone.js"] } } }"#,
    );

    let err = parse(&ManifestSource::Path(dir.path().to_path_buf()), &Compilers::new())
        .unwrap_err();
    assert!(matches!(err, SquareError::DependencyNotFound { .. }));
}

#[test]
fn test_normalizing_twice_changes_nothing() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.js", "a();");
    write(dir.path(), "b.css", "b{}");
    write(
        dir.path(),
        "square.json",
        r#"{
            "configuration": { "dist": "out/{type}.{ext}", "tags": { "name": "demo" } },
            "bundle": ["a.js", "b.css"]
        }"#,
    );

    let first = parse_ok(dir.path());
    let manifest = first.to_manifest();
    assert_eq!(
        manifest["configuration"]["dist"],
        json!({"min": "out/{type}.{ext}", "dev": "out/{type}.{ext}"})
    );
    assert!(manifest["bundle"].is_object());

    let second = parse(
        &ManifestSource::Inline {
            manifest: manifest.clone(),
            root: dir.path().to_path_buf(),
        },
        &Compilers::new(),
    )
    .unwrap();
    assert_eq!(second.to_manifest(), manifest);
    assert_eq!(second.meta.tree, first.meta.tree);
}

#[test]
fn test_imports_append_and_never_override() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "shared/square.json", r#"{ "bundle": { "lib.js": { "weight": 1 }, "own.js": {} } }"#);
    write(dir.path(), "shared/lib.js", "shared lib");
    write(dir.path(), "shared/own.js", "shared own");
    write(dir.path(), "own.js", "local own");
    write(
        dir.path(),
        "square.json",
        r#"{
            "configuration": { "import": ["shared/square.json", "nowhere/square.json"] },
            "bundle": ["own.js"]
        }"#,
    );

    let package = parse_ok(dir.path());
    assert_eq!(package.bundle.keys().collect::<Vec<_>>(), vec!["own.js", "lib.js"]);
    assert_eq!(package.bundle["own.js"].content, "local own");
    assert!(package.bundle["lib.js"].meta.imported);

    // imported bundles stay out of the manifest written back
    let manifest = package.to_manifest();
    assert!(manifest["bundle"].get("lib.js").is_none());
}

#[test]
fn test_js_manifest() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.js", "");
    write(
        dir.path(),
        "square.js",
        "module.exports = {\n  // comment\n  \"configuration\": { \"dist\": { \"dev\": \"x.{ext}\" } },\n  \"bundle\": [\"a.js\"]\n};\n",
    );

    let package = parse(
        &ManifestSource::Path(dir.path().join("square.js")),
        &Compilers::new(),
    )
    .unwrap();
    assert_eq!(
        package.configuration.dist.keys().collect::<Vec<_>>(),
        vec![&Distribution::Dev]
    );
}

#[test]
fn test_to_yaml_and_json() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.js", "");
    write(dir.path(), "square.json", r#"{ "bundle": { "a.js": { "description": "entry" } } }"#);

    let package = parse_ok(dir.path());
    let yaml = package.to_yaml().unwrap();
    assert!(yaml.contains("description: entry"));

    let json: serde_json::Value = serde_json::from_str(&package.to_json().unwrap()).unwrap();
    assert_eq!(json["bundle"]["a.js"]["description"], "entry");
}
