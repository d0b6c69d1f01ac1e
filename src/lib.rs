//! AC Bindings
//!
//! Schema-driven typed bindings for the JSON command interface of a CAD
//! application.
//!
//! A directory of JSON Schema documents is parsed into an intermediate model,
//! lowered into a catalog of classes and commands, and turned into runtime
//! bindings: validating constructors for every class and a command facade
//! that posts `{"command": "API.<Name>", "parameters": ...}` through a
//! transport and rehydrates the result.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ac_bindings::{
//!     build_catalog, parse_documents, Args, Bindings, CommandFacade, Document, FieldValue,
//!     Reply, TransportError,
//! };
//! use serde_json::{json, Value};
//!
//! let documents = vec![Document::new(
//!     "GetProductInfo",
//!     json!({
//!         "description": "Version information.",
//!         "definitions": {
//!             "command_parameters": { "type": "object", "properties": {} },
//!             "response_parameters": {
//!                 "type": "object",
//!                 "properties": {
//!                     "version": { "type": "integer" },
//!                     "buildNumber": { "type": "integer" },
//!                     "languageCode": { "type": "string" }
//!                 },
//!                 "required": ["version", "buildNumber", "languageCode"]
//!             }
//!         }
//!     }),
//! )];
//!
//! let catalog = build_catalog(&parse_documents(&documents).unwrap()).unwrap();
//! let bindings = Arc::new(Bindings::from_catalog(catalog).unwrap());
//!
//! // Any closure posting a JSON body is a transport.
//! let transport = |body: &str| -> Result<Value, TransportError> {
//!     assert_eq!(body, r#"{"command":"API.GetProductInfo"}"#);
//!     Ok(json!({
//!         "succeeded": true,
//!         "result": { "version": 27, "buildNumber": 3001, "languageCode": "INT" }
//!     }))
//! };
//!
//! let facade = CommandFacade::new(transport, bindings);
//! let reply = facade.call("GetProductInfo", Args::new()).unwrap();
//! assert_eq!(
//!     reply,
//!     Reply::Tuple(vec![
//!         FieldValue::Int(27),
//!         FieldValue::Int(3001),
//!         FieldValue::Str("INT".into()),
//!     ])
//! );
//! ```
//!
//! # Attribute Types
//!
//! | Schema | Catalog type | Runtime value |
//! |--------|--------------|---------------|
//! | `boolean` | `bool` | `FieldValue::Bool` |
//! | `integer` | `int` | `FieldValue::Int` |
//! | `number` | `float` | `FieldValue::Float` (integers accepted) |
//! | `string` | `str` | `FieldValue::Str` |
//! | `string` + `format: uuid` | `UUID` | `FieldValue::Str` |
//! | `array` | `List` + `itemType` | `FieldValue::List` |
//! | object / `oneOf` | class name | `FieldValue::Object` |
//!
//! # Binding Layout
//!
//! Generated binding sets are stored per version:
//! ```text
//! <root>/ac27/b3001types.json
//! <root>/ac27/b3001commands.json
//! <root>/ac27/b3001utilities.json
//! ```

mod bindings;
mod catalog;
mod conformance;
mod error;
mod loader;
mod probe;
mod runtime;
mod schema;
mod transport;
mod types;
mod utilities;
mod validators;
mod versions;

pub use bindings::{Bindings, CommandFacade, Reply};
pub use catalog::{
    build_catalog, merge_attributes, Attribute, Catalog, CatalogWarning, Class, ClassType,
    Command, Constraints,
};
pub use conformance::{check_payload, merged_definitions};
pub use error::{
    CatalogError, CommandError, ConformanceError, ConnectionError, ConstructionError, Error,
    SchemaError, TransportError, VersionError, Violation,
};
pub use loader::{load_document, load_documents, load_json, load_json_str, Document};
pub use probe::{connect_with, probe, Connection, Endpoint, ProbeOptions, PROBE_TIMEOUT};
pub use runtime::{
    Args, ClassInfo, ClassRule, FieldInfo, FieldType, FieldValue, Instance, TypeRegistry,
};
pub use schema::{
    parse_documents, Annotations, CommandSchema, Composition, CompositionKind, Facets,
    ListSchema, ObjectSchema, PrimitiveSchema, SchemaParser, SchemaRef, SchemaSet,
};
pub use transport::{decode_response, Transport};
pub use types::{
    json_type_name, semantic_eq, PrimitiveKind, BASE_PORT, COMMAND_NAMESPACE, DEFAULT_HOST,
    MAX_PORT_OFFSET, MIN_RELEASE,
};
pub use utilities::{ProductInfo, Utilities};
pub use validators::{Pattern, Validator};
pub use versions::{BindingKind, BindingManifest, BindingSet, ReleaseLayout, Version};

#[cfg(feature = "remote")]
pub use probe::connect;
#[cfg(feature = "remote")]
pub use transport::{HttpTransport, HTTP_TIMEOUT};
