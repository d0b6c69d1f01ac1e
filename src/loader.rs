//! Schema document loading from files, strings and directories.

use std::path::Path;

use serde_json::Value;

use crate::error::SchemaError;

/// A named schema document.
///
/// The name is the file stem; for command documents it is the command name.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub name: String,
    pub content: Value,
}

impl Document {
    pub fn new(name: impl Into<String>, content: Value) -> Self {
        Self {
            name: name.into(),
            content,
        }
    }

    /// True for documents declaring `command_parameters` or
    /// `response_parameters` definitions.
    pub fn is_command(&self) -> bool {
        self.content
            .get("definitions")
            .map(|defs| {
                defs.get("command_parameters").is_some()
                    || defs.get("response_parameters").is_some()
            })
            .unwrap_or(false)
    }
}

/// Load a JSON document from a file path.
///
/// # Errors
///
/// Returns `SchemaError::FileNotFound` if the file doesn't exist,
/// or `SchemaError::InvalidJson` if the file isn't valid JSON.
pub fn load_json(path: &Path) -> Result<Value, SchemaError> {
    if !path.exists() {
        return Err(SchemaError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| SchemaError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    load_json_str(&content)
}

/// Load a JSON document from a string.
///
/// # Errors
///
/// Returns `SchemaError::InvalidJson` if the string isn't valid JSON.
pub fn load_json_str(content: &str) -> Result<Value, SchemaError> {
    serde_json::from_str(content).map_err(|source| SchemaError::InvalidJson { source })
}

/// Load a single schema document, naming it after the file stem.
pub fn load_document(path: &Path) -> Result<Document, SchemaError> {
    let content = load_json(path)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Document { name, content })
}

/// Load every `*.json` file of a directory, sorted by file name.
///
/// Subdirectories are not descended into.
pub fn load_documents(dir: &Path) -> Result<Vec<Document>, SchemaError> {
    if !dir.exists() {
        return Err(SchemaError::FileNotFound {
            path: dir.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|source| SchemaError::ReadError {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| SchemaError::ReadError {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().map(|e| e == "json").unwrap_or(false) {
            paths.push(path);
        }
    }
    paths.sort();

    tracing::debug!(dir = %dir.display(), count = paths.len(), "loading schema documents");
    paths.iter().map(|p| load_document(p)).collect()
}
