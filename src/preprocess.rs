//! Turns the bundles of a package into one concatenated buffer per output
//! extension.
//!
//! Every bundle is expanded on its own (dependencies, directives, compiler)
//! and then folded into the buffer of its output extension. The fold always
//! follows tree order, so the bytes of a buffer never depend on anything but
//! the weights in the manifest.

use crate::comments;
use crate::compiler::Details;
use crate::error::SquareError;
use crate::model::{BundleEntry, Package};
use crate::resolver::Resolver;
use crate::utils::catch_panic;
use indexmap::IndexMap;
use log::debug;

/// Dependencies, then the bundle itself, each behind a banner; directives
/// resolved; compiler applied when the bundle has one.
pub fn preprocess(
    package: &Package,
    bundle: &BundleEntry,
    details: &Details,
) -> Result<String, SquareError> {
    let extension = &bundle.meta.extension;
    let mut parts = Vec::with_capacity(bundle.meta.dependencies.len() + 1);

    // Dependencies are read fresh, they are not watched like bundles are.
    for (name, location) in bundle.dependencies.iter().zip(&bundle.meta.dependencies) {
        let content =
            std::fs::read_to_string(location).map_err(|e| SquareError::io(location, e))?;
        parts.push(comments::banner(
            extension,
            &format!("[square] dependency: {name}"),
        ));
        parts.push(content);
    }

    parts.push(comments::banner(
        extension,
        &format!("[square] bundle: {}", bundle.meta.key),
    ));
    parts.push(bundle.content.clone());

    let combined = parts.join("\n");
    let resolved =
        Resolver::new(&package.path).directive_named(&combined, extension, &bundle.meta.key)?;

    match &bundle.meta.compiler {
        Some(compiler) => {
            debug!("running {} on {}", compiler.name(), bundle.meta.key);
            catch_panic(|| compiler.compile(bundle, &resolved, details)).unwrap_or_else(
                |message| {
                    Err(SquareError::Compiler {
                        key: bundle.meta.key.clone(),
                        message,
                    })
                },
            )
        }
        None => Ok(resolved),
    }
}

/// Appends `content` to `buffer`. JavaScript gets a `;` at the seam unless
/// one side already has it. The buffer is trimmed after every append.
pub fn fold(buffer: &mut String, content: &str, extension: &str) {
    if !buffer.is_empty() {
        if extension == "js" && !buffer.ends_with(';') && !content.starts_with(';') {
            buffer.push(';');
        }
        buffer.push('\n');
    }
    buffer.push_str(content);

    let trimmed = buffer.trim();
    if trimmed.len() != buffer.len() {
        *buffer = trimmed.to_string();
    }
}

/// Processes every bundle whose output extension is in `extensions` and
/// returns one buffer per extension. The first failing bundle aborts the
/// whole reduce.
pub fn reduce(
    package: &Package,
    platform: &str,
    extensions: &[String],
) -> Result<IndexMap<String, String>, SquareError> {
    let mut output: IndexMap<String, String> = IndexMap::new();
    for extension in extensions {
        if package.meta.extensions.contains_key(extension) {
            output.insert(extension.clone(), String::new());
        }
    }

    for bundle in package.tree() {
        let extension = &bundle.meta.output;
        let Some(buffer) = output.get_mut(extension) else {
            continue;
        };

        let siblings = &package.meta.extensions[extension];
        let details = Details {
            index: siblings
                .iter()
                .position(|key| key == &bundle.meta.key)
                .unwrap_or_default(),
            count: siblings.len(),
            platform: platform.to_string(),
        };

        debug!(
            "processing {} ({}/{} {extension})",
            bundle.meta.key,
            details.index + 1,
            details.count
        );
        let content = preprocess(package, bundle, &details)?;
        fold(buffer, &content, extension);
    }

    Ok(output)
}
