//! Settings translation: reshape an index bundle for a target version family.
//!
//! Pure, no I/O. The only structural change between families is the mapping
//! shape: 5.x/6.x nest everything under a named document type, 7.x+ put
//! `properties` at the top level.

#![forbid(unsafe_code)]

use esbridge_core::{Error, IndexBundle, Result, VersionFamily};
use serde_json::{Map, Value};

/// Settings keys injected by the server; they must not be sent back on create.
const READ_ONLY_SETTINGS: &[&str] =
    &["creation_date", "uuid", "provided_name", "version", "routing"];

/// Produce a bundle suitable for creating `bundle.index` on a cluster of the
/// given family. Settings are scrubbed of read-only fields, mappings are
/// reshaped when the families differ, aliases are copied verbatim.
pub fn translate(bundle: &IndexBundle, target: VersionFamily) -> Result<IndexBundle> {
    Ok(IndexBundle {
        index: bundle.index.clone(),
        settings: scrub_settings(&bundle.settings),
        mappings: translate_mappings(&bundle.mappings, target)?,
        aliases: bundle.aliases.clone(),
    })
}

/// Remove server-populated read-only fields from a `{"index": {...}}` settings
/// object. Anything else passes through untouched.
pub fn scrub_settings(settings: &Value) -> Value {
    let mut out = settings.clone();
    if let Some(index) = out.get_mut("index").and_then(Value::as_object_mut) {
        for key in READ_ONLY_SETTINGS {
            index.remove(*key);
        }
    }
    out
}

/// Reshape a mappings object for the target family. Same-family input passes
/// through unchanged, as does an empty mapping.
pub fn translate_mappings(mappings: &Value, target: VersionFamily) -> Result<Value> {
    let obj = match mappings {
        Value::Object(obj) => obj,
        Value::Null => return Ok(Value::Object(Map::new())),
        other => {
            return Err(Error::Translation(format!(
                "mappings must be an object, got {other}"
            )))
        }
    };
    if obj.is_empty() {
        return Ok(mappings.clone());
    }

    // The shape tells the source family: a top-level `properties` key means
    // typeless; otherwise the single top-level key names the document type.
    let typeless = obj.contains_key("properties");
    match (typeless, target) {
        (true, VersionFamily::Typeless) | (false, VersionFamily::Typed) => Ok(mappings.clone()),
        (false, VersionFamily::Typeless) => {
            let type_name = obj
                .keys()
                .find(|k| *k != "properties")
                .ok_or_else(|| Error::Translation("typed mapping has no type key".into()))?;
            match &obj[type_name] {
                Value::Object(per_type) => Ok(Value::Object(per_type.clone())),
                other => Err(Error::Translation(format!(
                    "mapping type {type_name} must be an object, got {other}"
                ))),
            }
        }
        (true, VersionFamily::Typed) => {
            let mut wrapped = Map::new();
            wrapped.insert("_doc".to_string(), mappings.clone());
            Ok(Value::Object(wrapped))
        }
    }
}
