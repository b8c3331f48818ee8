use crate::model::Package;
use serde_json::{json, Map, Value};

/// Converts a normalized package back into the raw manifest shape:
/// `dist` as a map, `bundle` as an object, derived metadata left out.
pub(crate) fn to_manifest(package: &Package) -> Value {
    let configuration = serde_json::to_value(&package.configuration).unwrap_or(Value::Null);

    let mut bundle = Map::new();
    // imported bundles come back through `configuration.import`
    for (key, entry) in package.bundle.iter().filter(|(_, e)| !e.meta.imported) {
        // Bundle entries only hold strings, numbers and maps; this cannot fail.
        let value = serde_json::to_value(entry).unwrap_or_else(|_| json!({}));
        bundle.insert(key.clone(), value);
    }

    json!({
        "configuration": configuration,
        "bundle": Value::Object(bundle),
    })
}
