//! Error types for schema parsing, catalog building, the type runtime,
//! command calls, probing and version resolution.

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

/// Errors while loading or parsing schema documents.
#[derive(Debug, Error)]
pub enum SchemaError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("dangling $ref \"{reference}\" in {schema}")]
    DanglingRef { schema: String, reference: String },

    #[error("unknown type \"{type_name}\" in {schema}")]
    UnknownType { schema: String, type_name: String },

    #[error("malformed schema {schema}: {message}")]
    Malformed { schema: String, message: String },
}

impl SchemaError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            SchemaError::FileNotFound { .. } | SchemaError::ReadError { .. } => 3,
            _ => 2,
        }
    }
}

/// Errors while lowering parsed schemas into a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{owner}.{field} references unknown schema \"{target}\"")]
    UnknownReference {
        owner: String,
        field: String,
        target: String,
    },

    #[error("union {name} has no variants")]
    EmptyUnion { name: String },

    #[error("union {name} lists \"{variant}\" which is not an object schema")]
    InvalidVariant { name: String, variant: String },

    #[error("{owner}.{field}: invalid pattern \"{pattern}\": {message}")]
    InvalidPattern {
        owner: String,
        field: String,
        pattern: String,
        message: String,
    },

    #[error("{owner}.{field}: list items of \"{item}\" cannot be lowered")]
    UnsupportedItemType {
        owner: String,
        field: String,
        item: String,
    },
}

/// Errors while constructing or assigning instances of catalog classes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructionError {
    #[error("unknown class {class}")]
    UnknownClass { class: String },

    #[error("{class} has no field \"{field}\"")]
    UnknownField { class: String, field: String },

    #[error("{class}.{field} is required")]
    MissingField { class: String, field: String },

    #[error("{class}.{field} given both positionally and by name")]
    DuplicateArgument { class: String, field: String },

    #[error("{class} takes {expected} positional argument(s), got {actual}")]
    TooManyArguments {
        class: String,
        expected: usize,
        actual: usize,
    },

    #[error("{class}.{field}: expected {expected}, got {actual}")]
    WrongKind {
        class: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("{class}.{field}: value {value} rejected by {rule}")]
    Rejected {
        class: String,
        field: String,
        value: String,
        rule: String,
    },

    #[error("no variant of {union} accepts keys [{}]", keys.join(", "))]
    NoVariant { union: String, keys: Vec<String> },

    #[error("{class}: expected an object, got {actual}")]
    NotAnObject { class: String, actual: String },

    #[error("{class}: class rule \"{rule}\" failed")]
    ClassRule { class: String, rule: String },
}

/// Errors raised by a transport while posting a request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[cfg(feature = "remote")]
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("response is not valid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("response is not a JSON object: {actual}")]
    NotAnObject { actual: String },

    #[error("{message}")]
    Other { message: String },
}

/// Errors from a command call through the facade.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command {command}")]
    UnknownCommand { command: String },

    #[error("command {command} did not succeed: {response}")]
    Unsucceeded { command: String, response: Value },

    #[error("command {command}: {source}")]
    Transport {
        command: String,
        #[source]
        source: TransportError,
    },

    #[error("command {command}: invalid arguments: {source}")]
    Arguments {
        command: String,
        #[source]
        source: ConstructionError,
    },

    #[error("command {command}: malformed response: {source}")]
    MalformedResponse {
        command: String,
        #[source]
        source: ConstructionError,
    },
}

impl CommandError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Transport { .. } => 3,
            CommandError::UnknownCommand { .. } => 2,
            _ => 1,
        }
    }

    /// The full response mapping of an unsucceeded call.
    pub fn response(&self) -> Option<&Value> {
        match self {
            CommandError::Unsucceeded { response, .. } => Some(response),
            _ => None,
        }
    }
}

/// Errors while probing for a live endpoint.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("port {port} is outside the permitted range {first}-{last}")]
    PortOutOfRange { port: u16, first: u16, last: u16 },

    #[error("no live endpoint on ports {first}-{last}")]
    NoLivePort { first: u16, last: u16 },
}

/// Errors while resolving or loading a binding set.
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("invalid target {release}/{build}: release must be >= 24 and build >= 1")]
    InvalidTarget { release: u32, build: u32 },

    #[error("no binding release at or below {target} in {root}")]
    NoRelease { root: PathBuf, target: u32 },

    #[error("no binding build at or below {target} for release {release}")]
    NoBuild { release: u32, target: u32 },

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot load binding set from {path}: {message}")]
    Load { path: PathBuf, message: String },
}

impl VersionError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            VersionError::Io { .. } => 3,
            _ => 2,
        }
    }
}

/// A single payload violation reported by the schema conformance check.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Errors from checking a payload directly against the source schemas.
#[derive(Debug, Error)]
pub enum ConformanceError {
    #[error("unknown definition {name}")]
    UnknownDefinition { name: String },

    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    #[error("validation failed with {} error(s)", violations.len())]
    Invalid { violations: Vec<Violation> },
}

impl ConformanceError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConformanceError::Invalid { .. } => 1,
            _ => 2,
        }
    }
}

/// Any error of the binding pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Conformance(#[from] ConformanceError),
}

impl Error {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Schema(e) => e.exit_code(),
            Error::Catalog(_) => 2,
            Error::Construction(_) => 1,
            Error::Command(e) => e.exit_code(),
            Error::Connection(_) => 3,
            Error::Version(e) => e.exit_code(),
            Error::Conformance(e) => e.exit_code(),
        }
    }
}
