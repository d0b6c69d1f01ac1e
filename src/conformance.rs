//! Payload validation directly against the source schemas.
//!
//! Cross-checks the type runtime: the definitions of all documents are merged
//! into one draft-04 schema and a payload is validated against one of them
//! with `jsonschema`.

use serde_json::{Map, Value};

use crate::error::{ConformanceError, Violation};
use crate::loader::Document;

/// Merge the definitions of all documents into `{"definitions": {...}}`.
///
/// Command documents contribute `<Command>_parameters` and
/// `<Command>_response`. References are rewritten to local
/// `#/definitions/<Name>` pointers, since all definitions share one
/// namespace.
pub fn merged_definitions(documents: &[Document]) -> Value {
    let mut definitions = Map::new();
    for document in documents {
        let Some(defs) = document.content.get("definitions").and_then(Value::as_object) else {
            continue;
        };
        for (name, schema) in defs {
            let name = match name.as_str() {
                "command_parameters" if document.is_command() => {
                    format!("{}_parameters", document.name)
                }
                "response_parameters" if document.is_command() => {
                    format!("{}_response", document.name)
                }
                _ => name.clone(),
            };
            definitions.insert(name, localize_refs(schema));
        }
    }
    let mut root = Map::new();
    root.insert("definitions".to_string(), Value::Object(definitions));
    Value::Object(root)
}

fn localize_refs(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = match (key.as_str(), value) {
                        ("$ref", Value::String(reference)) => {
                            let local = match reference.find("#/definitions/") {
                                Some(index) => &reference[index..],
                                None => reference.as_str(),
                            };
                            Value::String(local.to_string())
                        }
                        _ => localize_refs(value),
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(localize_refs).collect()),
        other => other.clone(),
    }
}

/// Validate `payload` against the definition `name` of the merged documents.
///
/// # Errors
///
/// Returns `ConformanceError::UnknownDefinition` if `name` is not defined,
/// `InvalidSchema` if the merged schema does not compile, or `Invalid` with
/// every violation found.
pub fn check_payload(
    documents: &[Document],
    name: &str,
    payload: &Value,
) -> Result<(), ConformanceError> {
    let mut root = merged_definitions(documents);
    let defined = root
        .get("definitions")
        .and_then(|d| d.get(name))
        .is_some();
    if !defined {
        return Err(ConformanceError::UnknownDefinition {
            name: name.to_string(),
        });
    }
    if let Value::Object(map) = &mut root {
        map.insert(
            "$ref".to_string(),
            Value::String(format!("#/definitions/{}", name)),
        );
    }

    let validator = jsonschema::options()
        .with_draft(jsonschema::Draft::Draft4)
        .build(&root)
        .map_err(|e| ConformanceError::InvalidSchema {
            message: e.to_string(),
        })?;

    let violations: Vec<Violation> = validator
        .iter_errors(payload)
        .map(|e| Violation {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        tracing::debug!(definition = name, count = violations.len(), "payload does not conform");
        Err(ConformanceError::Invalid { violations })
    }
}
