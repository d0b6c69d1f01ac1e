//! Runtime bindings and the command facade.
//!
//! [`Bindings`] turns a [`Catalog`] into a [`TypeRegistry`]: one class-info per
//! class, with field types and facet validators derived from the attributes.
//! [`CommandFacade`] calls commands through a [`Transport`] and rehydrates
//! their results.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::catalog::{Attribute, Catalog, Class, Command, Constraints};
use crate::error::{CatalogError, CommandError, ConstructionError};
use crate::runtime::{Args, ClassInfo, FieldType, FieldValue, Instance, TypeRegistry};
use crate::transport::Transport;
use crate::types::{PrimitiveKind, COMMAND_NAMESPACE};
use crate::validators::Validator;

/// A catalog together with its runtime class-infos.
#[derive(Debug, Clone)]
pub struct Bindings {
    catalog: Catalog,
    registry: TypeRegistry,
    namespace: String,
}

impl Bindings {
    /// Build runtime class-infos for every class, including command
    /// parameter and response classes.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` when an attribute type does not resolve to a
    /// primitive token, a catalog class or a list of either, or when a
    /// pattern facet does not compile.
    pub fn from_catalog(catalog: Catalog) -> Result<Self, CatalogError> {
        let known: HashSet<&str> = catalog.all_classes().map(|c| c.name.as_str()).collect();

        let mut infos = Vec::new();
        let mut seen = HashSet::new();
        for class in catalog.all_classes() {
            // Command classes may be shared between commands.
            if !seen.insert(class.name.as_str()) {
                continue;
            }
            infos.push(class_info(class, &known)?);
        }
        tracing::debug!(classes = infos.len(), "built class registry");

        Ok(Self {
            registry: TypeRegistry::new(infos),
            catalog,
            namespace: COMMAND_NAMESPACE.to_string(),
        })
    }

    /// Use a different command namespace than `API`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn command(&self, name: &str) -> Option<&Command> {
        self.catalog.command(name)
    }

    /// Construct an instance of a catalog class by name.
    pub fn construct(&self, class: &str, args: Args) -> Result<Instance, ConstructionError> {
        self.registry.construct(class, args)
    }

    /// Rebuild an instance of a catalog class from its dictionary form.
    pub fn from_dict(&self, class: &str, dict: &Value) -> Result<Instance, ConstructionError> {
        self.registry.from_dict(class, dict)
    }
}

fn class_info(class: &Class, known: &HashSet<&str>) -> Result<ClassInfo, CatalogError> {
    if class.is_union() {
        if class.of_type_class_names.is_empty() {
            return Err(CatalogError::EmptyUnion {
                name: class.name.clone(),
            });
        }
        if let Some(variant) = class
            .of_type_class_names
            .iter()
            .find(|v| !known.contains(v.as_str()))
        {
            return Err(CatalogError::InvalidVariant {
                name: class.name.clone(),
                variant: variant.clone(),
            });
        }
        return Ok(ClassInfo::union(
            &class.name,
            class.of_type_class_names.iter().cloned(),
        ));
    }

    let mut info = ClassInfo::record(&class.name);
    for attribute in &class.attributes {
        let ty = field_type(&class.name, attribute, known)?;
        let ty = if attribute.required {
            ty
        } else {
            FieldType::optional(ty)
        };
        let validators = field_validators(&class.name, attribute)?;
        info = info.field(&attribute.name, ty, validators);
    }
    Ok(info)
}

fn field_type(
    owner: &str,
    attribute: &Attribute,
    known: &HashSet<&str>,
) -> Result<FieldType, CatalogError> {
    if attribute.is_list() {
        let item = attribute
            .item_type
            .as_deref()
            .ok_or_else(|| CatalogError::UnsupportedItemType {
                owner: owner.to_string(),
                field: attribute.name.clone(),
                item: String::new(),
            })?;
        return resolve(owner, &attribute.name, item, known).map(FieldType::list);
    }
    resolve(owner, &attribute.name, &attribute.type_name, known)
}

fn resolve(
    owner: &str,
    field: &str,
    name: &str,
    known: &HashSet<&str>,
) -> Result<FieldType, CatalogError> {
    if let Some(kind) = PrimitiveKind::from_token(name) {
        return Ok(FieldType::Primitive(kind));
    }
    if known.contains(name) {
        return Ok(FieldType::class(name));
    }
    Err(CatalogError::UnknownReference {
        owner: owner.to_string(),
        field: field.to_string(),
        target: name.to_string(),
    })
}

fn field_validators(owner: &str, attribute: &Attribute) -> Result<Vec<Validator>, CatalogError> {
    let mut validators = facet_validators(owner, &attribute.name, &attribute.constraints)?;
    if attribute.is_list() {
        let c = &attribute.constraints;
        if let Some(n) = c.min_items {
            validators.push(Validator::min_items(n));
        }
        if let Some(n) = c.max_items {
            validators.push(Validator::max_items(n));
        }
        if c.unique_items {
            validators.push(Validator::unique_items());
        }
        if let Some(items) = &attribute.item_constraints {
            let inner = facet_validators(owner, &attribute.name, items)?;
            if !inner.is_empty() {
                validators.push(Validator::list_items(inner));
            }
        }
    }
    Ok(validators)
}

/// Scalar facets in a fixed order: length, pattern, value set, numeric.
fn facet_validators(
    owner: &str,
    field: &str,
    c: &Constraints,
) -> Result<Vec<Validator>, CatalogError> {
    let mut validators = Vec::new();
    if let Some(n) = c.min_length {
        validators.push(Validator::min_length(n));
    }
    if let Some(n) = c.max_length {
        validators.push(Validator::max_length(n));
    }
    if let Some(pattern) = &c.pattern {
        let validator =
            Validator::matches(pattern).map_err(|e| CatalogError::InvalidPattern {
                owner: owner.to_string(),
                field: field.to_string(),
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
        validators.push(validator);
    }
    if let Some(values) = &c.enum_values {
        validators.push(Validator::value_set(values.iter().cloned()));
    }
    if let Some(m) = &c.multiple_of {
        validators.push(Validator::multiple_of(m.clone()));
    }
    if let Some(limit) = &c.minimum {
        validators.push(Validator::minimum(limit.clone(), c.exclusive_minimum));
    }
    if let Some(limit) = &c.maximum {
        validators.push(Validator::maximum(limit.clone(), c.exclusive_maximum));
    }
    Ok(validators)
}

/// The rehydrated result of a command call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The response class has no fields.
    Empty,
    /// The single field of a one-field response.
    Value(FieldValue),
    /// Field values in declaration order for multi-field responses.
    Tuple(Vec<FieldValue>),
    /// A union response, as an instance of the selected variant.
    Record(Instance),
}

impl Reply {
    /// Field values in declaration order, whatever the response shape.
    pub fn into_values(self) -> Vec<FieldValue> {
        match self {
            Reply::Empty => Vec::new(),
            Reply::Value(value) => vec![value],
            Reply::Tuple(values) => values,
            Reply::Record(instance) => instance.fields().map(|(_, v)| v.clone()).collect(),
        }
    }
}

/// Typed command surface over a transport.
///
/// Calls are synchronous: one transport round-trip per command, in issue
/// order.
#[derive(Debug)]
pub struct CommandFacade<T> {
    transport: T,
    bindings: Arc<Bindings>,
}

impl<T: Transport> CommandFacade<T> {
    pub fn new(transport: T, bindings: Arc<Bindings>) -> Self {
        Self {
            transport,
            bindings,
        }
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Build the JSON request body for `command` without sending it.
    ///
    /// `parameters` is omitted when the parameter class has no fields.
    pub fn request(&self, command: &str, args: Args) -> Result<String, CommandError> {
        let definition = self.lookup(command)?;
        let parameters = self
            .bindings
            .construct(&definition.parameters.name, args)
            .map_err(|source| CommandError::Arguments {
                command: command.to_string(),
                source,
            })?;

        let mut body = Map::new();
        body.insert(
            "command".to_string(),
            Value::String(format!("{}.{}", self.bindings.namespace, definition.name)),
        );
        if definition.parameters.is_union() || !definition.parameters.attributes.is_empty() {
            body.insert("parameters".to_string(), parameters.to_dict());
        }
        Ok(Value::Object(body).to_string())
    }

    /// Call `command` and rehydrate its result.
    ///
    /// # Errors
    ///
    /// Arguments that do not construct the parameter class fail before any
    /// transport call. Transport errors propagate unchanged; a response with
    /// `succeeded: false` yields [`CommandError::Unsucceeded`] carrying the
    /// whole response.
    pub fn call(&self, command: &str, args: Args) -> Result<Reply, CommandError> {
        let definition = self.lookup(command)?;
        let instance = self.call_instance(command, args)?;
        if definition.response.is_union() {
            return Ok(Reply::Record(instance));
        }
        let mut values: Vec<FieldValue> = instance.fields().map(|(_, v)| v.clone()).collect();
        Ok(match values.len() {
            0 => Reply::Empty,
            1 => Reply::Value(values.remove(0)),
            _ => Reply::Tuple(values),
        })
    }

    /// Call `command` and return its result as a response-class instance.
    pub fn call_instance(&self, command: &str, args: Args) -> Result<Instance, CommandError> {
        let definition = self.lookup(command)?;
        let result = self.call_raw(command, args)?;
        self.bindings
            .from_dict(&definition.response.name, &result)
            .map_err(|source| CommandError::MalformedResponse {
                command: command.to_string(),
                source,
            })
    }

    /// Call `command` and return the raw `result` mapping.
    ///
    /// A successful response without `result` yields an empty object.
    pub fn call_raw(&self, command: &str, args: Args) -> Result<Value, CommandError> {
        let body = self.request(command, args)?;
        tracing::debug!(command, "sending command");

        let mut response =
            self.transport
                .post(&body)
                .map_err(|source| CommandError::Transport {
                    command: command.to_string(),
                    source,
                })?;

        let succeeded = response
            .get("succeeded")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !succeeded {
            tracing::info!(command, "command did not succeed");
            return Err(CommandError::Unsucceeded {
                command: command.to_string(),
                response,
            });
        }

        Ok(response
            .as_object_mut()
            .and_then(|map| map.remove("result"))
            .unwrap_or_else(|| Value::Object(Map::new())))
    }

    fn lookup(&self, command: &str) -> Result<&Command, CommandError> {
        self.bindings
            .command(command)
            .ok_or_else(|| CommandError::UnknownCommand {
                command: command.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{build_catalog, ClassType};
    use crate::error::TransportError;
    use crate::loader::Document;
    use crate::schema::parse_documents;
    use serde_json::json;
    use std::cell::RefCell;

    fn bindings() -> Arc<Bindings> {
        let docs = vec![
            Document::new(
                "Types",
                json!({"definitions": {
                    "ElementId": {
                        "type": "object",
                        "properties": {"guid": {"type": "string", "format": "uuid"}},
                        "required": ["guid"]
                    },
                    "Elements": {
                        "type": "array",
                        "items": {"$ref": "#/definitions/ElementId"},
                        "uniqueItems": true
                    }
                }}),
            ),
            Document::new(
                "GetProductInfo",
                json!({
                    "description": "Product information.",
                    "definitions": {
                        "command_parameters": {"type": "object", "properties": {}},
                        "response_parameters": {
                            "type": "object",
                            "properties": {
                                "version": {"type": "integer"},
                                "buildNumber": {"type": "integer"},
                                "languageCode": {"type": "string"}
                            },
                            "required": ["version", "buildNumber", "languageCode"]
                        }
                    }
                }),
            ),
            Document::new(
                "GetElements",
                json!({
                    "description": "Selected elements.",
                    "definitions": {
                        "command_parameters": {
                            "type": "object",
                            "properties": {
                                "limit": {"type": "integer", "minimum": 1}
                            }
                        },
                        "response_parameters": {
                            "type": "object",
                            "properties": {"elements": {"$ref": "#/definitions/Elements"}},
                            "required": ["elements"]
                        }
                    }
                }),
            ),
        ];
        let catalog = build_catalog(&parse_documents(&docs).unwrap()).unwrap();
        Arc::new(Bindings::from_catalog(catalog).unwrap())
    }

    fn replying(response: Value) -> impl Fn(&str) -> Result<Value, TransportError> {
        move |_body: &str| Ok(response.clone())
    }

    #[test]
    fn empty_parameters_are_omitted() {
        let facade = CommandFacade::new(replying(json!({})), bindings());
        let body = facade.request("GetProductInfo", Args::new()).unwrap();
        assert_eq!(body, r#"{"command":"API.GetProductInfo"}"#);
    }

    #[test]
    fn parameters_are_serialized() {
        let facade = CommandFacade::new(replying(json!({})), bindings());
        let body = facade
            .request("GetElements", Args::new().named("limit", 3))
            .unwrap();
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            body,
            json!({"command": "API.GetElements", "parameters": {"limit": 3}})
        );
    }

    #[test]
    fn invalid_arguments_never_reach_the_transport() {
        let sent = RefCell::new(0);
        let transport = |_: &str| -> Result<Value, TransportError> {
            *sent.borrow_mut() += 1;
            Ok(json!({"succeeded": true}))
        };
        let facade = CommandFacade::new(transport, bindings());
        let err = facade
            .call("GetElements", Args::new().named("limit", 0))
            .unwrap_err();
        assert!(matches!(err, CommandError::Arguments { .. }));
        assert_eq!(*sent.borrow(), 0);
    }

    #[test]
    fn multi_field_response_is_a_tuple() {
        let facade = CommandFacade::new(
            replying(json!({"succeeded": true, "result": {
                "version": 24, "buildNumber": 2310, "languageCode": "INT"
            }})),
            bindings(),
        );
        let reply = facade.call("GetProductInfo", Args::new()).unwrap();
        assert_eq!(
            reply,
            Reply::Tuple(vec![
                FieldValue::Int(24),
                FieldValue::Int(2310),
                FieldValue::Str("INT".into())
            ])
        );
    }

    #[test]
    fn single_field_response_is_a_value() {
        let guid = "260D42E3-AA2E-4DAD-BFFA-F2B5021501CC";
        let facade = CommandFacade::new(
            replying(json!({"succeeded": true, "result": {"elements": [{"guid": guid}]}})),
            bindings(),
        );
        let reply = facade.call("GetElements", Args::new()).unwrap();
        let Reply::Value(FieldValue::List(elements)) = reply else {
            panic!("expected a list value");
        };
        let first = elements[0].as_instance().unwrap();
        assert_eq!(first.class_name(), "ElementId");
        assert_eq!(first.get("guid").and_then(FieldValue::as_str), Some(guid));
    }

    #[test]
    fn unsucceeded_carries_the_response() {
        let response = json!({"succeeded": false, "error": {"code": 7, "message": "busy"}});
        let facade = CommandFacade::new(replying(response.clone()), bindings());
        let err = facade.call("GetProductInfo", Args::new()).unwrap_err();
        assert_eq!(err.response(), Some(&response));
    }

    #[test]
    fn transport_errors_propagate() {
        let transport = |_: &str| -> Result<Value, TransportError> {
            Err(TransportError::Other {
                message: "connection reset".into(),
            })
        };
        let facade = CommandFacade::new(transport, bindings());
        let err = facade.call("GetProductInfo", Args::new()).unwrap_err();
        assert!(matches!(err, CommandError::Transport { .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn malformed_result_is_reported() {
        let facade = CommandFacade::new(
            replying(json!({"succeeded": true, "result": {"version": "24"}})),
            bindings(),
        );
        let err = facade.call("GetProductInfo", Args::new()).unwrap_err();
        assert!(matches!(err, CommandError::MalformedResponse { .. }));
    }

    #[test]
    fn unknown_command() {
        let facade = CommandFacade::new(replying(json!({})), bindings());
        assert!(matches!(
            facade.call("Nope", Args::new()),
            Err(CommandError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn custom_namespace() {
        let bindings = Arc::new((*bindings()).clone().with_namespace("TAPIR"));
        let facade = CommandFacade::new(replying(json!({})), bindings);
        let body = facade.request("GetProductInfo", Args::new()).unwrap();
        assert_eq!(body, r#"{"command":"TAPIR.GetProductInfo"}"#);
    }

    #[test]
    fn unresolved_attribute_type_is_rejected() {
        let catalog = Catalog {
            classes: vec![Class {
                name: "Holder".into(),
                description: None,
                title: None,
                default: None,
                additional_properties: false,
                class_type: ClassType::Normal,
                attributes: vec![Attribute {
                    name: "target".into(),
                    type_name: "Missing".into(),
                    description: None,
                    required: true,
                    constraints: Constraints::default(),
                    item_type: None,
                    item_constraints: None,
                }],
                of_type_class_names: vec![],
            }],
            ..Catalog::default()
        };
        let err = Bindings::from_catalog(catalog).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownReference { ref target, .. } if target == "Missing"));
    }
}
