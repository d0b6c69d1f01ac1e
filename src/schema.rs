//! Schema parsing.
//!
//! Normalizes a draft-04 flavoured JSON Schema dialect into an intermediate
//! model of primitive, list, object and command schemas. All `definitions` of
//! all documents share one namespace; `$ref` values are resolved by the
//! definition name alone.
//!
//! Inline objects get a synthetic `Object_<hex>` name at discovery time.
//! Inline primitives and lists are named after their position, e.g.
//! `Element/items` or `Element/guid`.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Number, Value};

use crate::error::SchemaError;
use crate::loader::Document;
use crate::types::PrimitiveKind;

const COMPOSITION_KEYS: [&str; 3] = ["oneOf", "anyOf", "allOf"];
const MAX_ALIAS_DEPTH: usize = 32;

/// Descriptive keywords shared by every schema kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    pub title: Option<String>,
    pub description: Option<String>,
    pub default: Option<Value>,
    pub examples: Option<Value>,
}

/// String and numeric facets of a primitive schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Facets {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub enum_values: Option<Vec<Value>>,
    pub multiple_of: Option<Number>,
    pub minimum: Option<Number>,
    pub exclusive_minimum: bool,
    pub maximum: Option<Number>,
    pub exclusive_maximum: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveSchema {
    pub name: String,
    pub kind: PrimitiveKind,
    pub facets: Facets,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListSchema {
    pub name: String,
    /// Name of the item schema.
    pub item_type: String,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub unique_items: bool,
    pub annotations: Annotations,
}

/// Which composition keyword an object schema used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionKind {
    OneOf,
    AnyOf,
    AllOf,
}

impl CompositionKind {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "oneOf" => Some(CompositionKind::OneOf),
            "anyOf" => Some(CompositionKind::AnyOf),
            "allOf" => Some(CompositionKind::AllOf),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub kind: CompositionKind,
    /// Names of the alternatives, in schema order.
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    pub name: String,
    /// `(field name, type reference)` in declaration order.
    pub fields: Vec<(String, String)>,
    pub required: Vec<String>,
    pub composition: Option<Composition>,
    pub additional_properties: bool,
    pub annotations: Annotations,
    /// The command owning this schema, for `<Command>_parameters` and
    /// `<Command>_response`.
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandSchema {
    pub name: String,
    pub description: String,
    pub parameters: String,
    pub response: String,
}

/// A resolved reference into one of the buckets of a [`SchemaSet`].
#[derive(Debug, Clone, Copy)]
pub enum SchemaRef<'a> {
    Primitive(&'a PrimitiveSchema),
    List(&'a ListSchema),
    Object(&'a ObjectSchema),
    Command(&'a CommandSchema),
}

/// The parser's output: one bucket per schema kind.
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    pub primitives: BTreeMap<String, PrimitiveSchema>,
    pub lists: BTreeMap<String, ListSchema>,
    pub objects: BTreeMap<String, ObjectSchema>,
    pub commands: BTreeMap<String, CommandSchema>,
    object_order: Vec<String>,
    command_order: Vec<String>,
}

impl SchemaSet {
    /// Look up a schema by name in whichever bucket owns it.
    pub fn ref_of(&self, name: &str) -> Option<SchemaRef<'_>> {
        if let Some(s) = self.primitives.get(name) {
            return Some(SchemaRef::Primitive(s));
        }
        if let Some(s) = self.lists.get(name) {
            return Some(SchemaRef::List(s));
        }
        if let Some(s) = self.objects.get(name) {
            return Some(SchemaRef::Object(s));
        }
        self.commands.get(name).map(SchemaRef::Command)
    }

    /// Object schemas in discovery order.
    pub fn objects_in_order(&self) -> impl Iterator<Item = &ObjectSchema> {
        self.object_order.iter().filter_map(|n| self.objects.get(n))
    }

    /// Command schemas in document order.
    pub fn commands_in_order(&self) -> impl Iterator<Item = &CommandSchema> {
        self.command_order.iter().filter_map(|n| self.commands.get(n))
    }

    pub fn len(&self) -> usize {
        self.primitives.len() + self.lists.len() + self.objects.len() + self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, name: &str) -> bool {
        self.primitives.contains_key(name)
            || self.lists.contains_key(name)
            || self.objects.contains_key(name)
    }
}

/// Parse a set of documents into a [`SchemaSet`].
///
/// # Errors
///
/// Returns `SchemaError` for dangling references, unknown `type` keywords
/// and malformed schemas.
pub fn parse_documents(documents: &[Document]) -> Result<SchemaSet, SchemaError> {
    let mut parser = SchemaParser::default();
    for document in documents {
        parser.add_document(document)?;
    }
    parser.finish()
}

/// Incremental parser; collect documents with [`SchemaParser::add_document`]
/// then call [`SchemaParser::finish`].
#[derive(Debug, Default)]
pub struct SchemaParser {
    definitions: Vec<(String, Value, Option<String>)>,
    index: HashMap<String, usize>,
    pending_commands: Vec<CommandSchema>,
    set: SchemaSet,
}

impl SchemaParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the definitions of one document.
    pub fn add_document(&mut self, document: &Document) -> Result<(), SchemaError> {
        let definitions = match document.content.get("definitions") {
            Some(Value::Object(defs)) => defs.clone(),
            Some(other) => {
                return Err(SchemaError::Malformed {
                    schema: document.name.clone(),
                    message: format!("definitions must be an object, got {}", other),
                })
            }
            None => Map::new(),
        };

        if document.is_command() {
            let command = document.name.clone();
            let parameters = format!("{}_parameters", command);
            let response = format!("{}_response", command);
            let empty = || Value::Object(Map::new());

            for (key, schema) in definitions {
                match key.as_str() {
                    "command_parameters" => {
                        self.define(parameters.clone(), schema, Some(command.clone()))?
                    }
                    "response_parameters" => {
                        self.define(response.clone(), schema, Some(command.clone()))?
                    }
                    _ => self.define(key, schema, None)?,
                }
            }
            if !self.index.contains_key(&parameters) {
                self.define(parameters.clone(), empty(), Some(command.clone()))?;
            }
            if !self.index.contains_key(&response) {
                self.define(response.clone(), empty(), Some(command.clone()))?;
            }

            let description = document
                .content
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            self.pending_commands.push(CommandSchema {
                name: command,
                description,
                parameters,
                response,
            });
        } else {
            for (key, schema) in definitions {
                self.define(key, schema, None)?;
            }
        }
        Ok(())
    }

    /// Parse every registered definition.
    pub fn finish(mut self) -> Result<SchemaSet, SchemaError> {
        let definitions = std::mem::take(&mut self.definitions);
        for (name, schema, command) in &definitions {
            self.parse_named(name, schema, command.clone(), &definitions, 0)?;
        }

        for command in std::mem::take(&mut self.pending_commands) {
            self.set.command_order.push(command.name.clone());
            self.set.commands.insert(command.name.clone(), command);
        }

        tracing::debug!(
            primitives = self.set.primitives.len(),
            lists = self.set.lists.len(),
            objects = self.set.objects.len(),
            commands = self.set.commands.len(),
            "parsed schema documents"
        );
        Ok(self.set)
    }

    fn define(
        &mut self,
        name: String,
        schema: Value,
        command: Option<String>,
    ) -> Result<(), SchemaError> {
        if let Some(&existing) = self.index.get(&name) {
            if self.definitions[existing].1 == schema {
                return Ok(());
            }
            return Err(SchemaError::Malformed {
                schema: name,
                message: "defined twice with different content".to_string(),
            });
        }
        self.index.insert(name.clone(), self.definitions.len());
        self.definitions.push((name, schema, command));
        Ok(())
    }

    /// Resolve a `$ref` to a definition name.
    fn resolve_ref(&self, owner: &str, reference: &str) -> Result<String, SchemaError> {
        let dangling = || SchemaError::DanglingRef {
            schema: owner.to_string(),
            reference: reference.to_string(),
        };
        let (_, fragment) = reference.split_once('#').ok_or_else(dangling)?;
        let name = fragment
            .strip_prefix("/definitions/")
            .filter(|n| !n.is_empty() && !n.contains('/'))
            .ok_or_else(dangling)?;
        let name = name.replace("~1", "/").replace("~0", "~");
        if self.index.contains_key(&name) {
            Ok(name)
        } else {
            Err(dangling())
        }
    }

    fn parse_named(
        &mut self,
        name: &str,
        schema: &Value,
        command: Option<String>,
        definitions: &[(String, Value, Option<String>)],
        depth: usize,
    ) -> Result<(), SchemaError> {
        if self.set.contains(name) {
            return Ok(());
        }
        let obj = schema.as_object().ok_or_else(|| SchemaError::Malformed {
            schema: name.to_string(),
            message: format!("expected a schema object, got {}", schema),
        })?;

        // A named alias takes the target's content under its own name.
        if let Some(reference) = obj.get("$ref") {
            if depth >= MAX_ALIAS_DEPTH {
                return Err(SchemaError::Malformed {
                    schema: name.to_string(),
                    message: "$ref alias chain too deep".to_string(),
                });
            }
            let reference = reference.as_str().ok_or_else(|| SchemaError::Malformed {
                schema: name.to_string(),
                message: "$ref must be a string".to_string(),
            })?;
            let target = self.resolve_ref(name, reference)?;
            let (_, content, _) = &definitions[self.index[&target]];
            return self.parse_named(name, content, command, definitions, depth + 1);
        }

        match schema_type(name, obj)? {
            SchemaType::Primitive(kind) => {
                let primitive = PrimitiveSchema {
                    name: name.to_string(),
                    kind,
                    facets: parse_facets(name, obj)?,
                    annotations: parse_annotations(obj),
                };
                self.set.primitives.insert(name.to_string(), primitive);
            }
            SchemaType::Array => {
                let items = obj.get("items").ok_or_else(|| SchemaError::Malformed {
                    schema: name.to_string(),
                    message: "array schema without items".to_string(),
                })?;
                let item_type =
                    self.parse_inline(name, &format!("{}/items", name), items, definitions)?;
                let list = ListSchema {
                    name: name.to_string(),
                    item_type,
                    min_items: get_count(name, obj, "minItems")?,
                    max_items: get_count(name, obj, "maxItems")?,
                    unique_items: obj
                        .get("uniqueItems")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    annotations: parse_annotations(obj),
                };
                self.set.lists.insert(name.to_string(), list);
            }
            SchemaType::Object => {
                // Registered before recursing so self references terminate.
                self.set.object_order.push(name.to_string());
                self.set.objects.insert(
                    name.to_string(),
                    ObjectSchema {
                        name: name.to_string(),
                        fields: Vec::new(),
                        required: Vec::new(),
                        composition: None,
                        additional_properties: true,
                        annotations: Annotations::default(),
                        command,
                    },
                );
                let (fields, required, composition) =
                    self.parse_object_body(name, obj, definitions)?;
                if let Some(object) = self.set.objects.get_mut(name) {
                    object.fields = fields;
                    object.required = required;
                    object.composition = composition;
                    object.additional_properties = obj
                        .get("additionalProperties")
                        .map(|v| v.as_bool().unwrap_or(true))
                        .unwrap_or(true);
                    object.annotations = parse_annotations(obj);
                }
            }
        }
        tracing::trace!(schema = name, "parsed definition");
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn parse_object_body(
        &mut self,
        name: &str,
        obj: &Map<String, Value>,
        definitions: &[(String, Value, Option<String>)],
    ) -> Result<(Vec<(String, String)>, Vec<String>, Option<Composition>), SchemaError> {
        let mut fields = Vec::new();
        match obj.get("properties") {
            Some(Value::Object(props)) => {
                for (field, prop) in props {
                    let label = format!("{}/{}", name, field);
                    let reference = self.parse_inline(name, &label, prop, definitions)?;
                    fields.push((field.clone(), reference));
                }
            }
            Some(other) => {
                return Err(SchemaError::Malformed {
                    schema: name.to_string(),
                    message: format!("properties must be an object, got {}", other),
                })
            }
            None => {}
        }

        let required = match obj.get("required") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str().map(String::from).ok_or_else(|| SchemaError::Malformed {
                        schema: name.to_string(),
                        message: "required must list strings".to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(SchemaError::Malformed {
                    schema: name.to_string(),
                    message: "required must be an array".to_string(),
                })
            }
            None => Vec::new(),
        };

        let mut composition = None;
        for key in COMPOSITION_KEYS {
            let Some(alternatives) = obj.get(key) else {
                continue;
            };
            let alternatives = alternatives.as_array().ok_or_else(|| SchemaError::Malformed {
                schema: name.to_string(),
                message: format!("{} must be an array", key),
            })?;
            let mut variants = Vec::with_capacity(alternatives.len());
            for (i, alternative) in alternatives.iter().enumerate() {
                let label = format!("{}/{}/{}", name, key, i);
                variants.push(self.parse_inline(name, &label, alternative, definitions)?);
            }
            composition = CompositionKind::from_key(key).map(|kind| Composition { kind, variants });
            break;
        }

        Ok((fields, required, composition))
    }

    /// Parse a nested schema and return the name it is stored under.
    fn parse_inline(
        &mut self,
        owner: &str,
        label: &str,
        schema: &Value,
        definitions: &[(String, Value, Option<String>)],
    ) -> Result<String, SchemaError> {
        if let Some(reference) = schema.get("$ref") {
            let reference = reference.as_str().ok_or_else(|| SchemaError::Malformed {
                schema: owner.to_string(),
                message: "$ref must be a string".to_string(),
            })?;
            return self.resolve_ref(owner, reference);
        }

        let obj = schema.as_object().ok_or_else(|| SchemaError::Malformed {
            schema: label.to_string(),
            message: format!("expected a schema object, got {}", schema),
        })?;
        let name = match schema_type(label, obj)? {
            SchemaType::Object => format!("Object_{}", uuid::Uuid::new_v4().simple()),
            _ => label.to_string(),
        };
        self.parse_named(&name, schema, None, definitions, 0)?;
        Ok(name)
    }
}

enum SchemaType {
    Primitive(PrimitiveKind),
    Array,
    Object,
}

fn schema_type(name: &str, obj: &Map<String, Value>) -> Result<SchemaType, SchemaError> {
    match obj.get("type") {
        Some(Value::String(t)) => match t.as_str() {
            "array" => Ok(SchemaType::Array),
            "object" => Ok(SchemaType::Object),
            other => {
                let format = obj.get("format").and_then(Value::as_str);
                PrimitiveKind::from_schema(other, format)
                    .map(SchemaType::Primitive)
                    .ok_or_else(|| SchemaError::UnknownType {
                        schema: name.to_string(),
                        type_name: other.to_string(),
                    })
            }
        },
        Some(other) => Err(SchemaError::UnknownType {
            schema: name.to_string(),
            type_name: other.to_string(),
        }),
        None => {
            if obj.contains_key("properties") || COMPOSITION_KEYS.iter().any(|k| obj.contains_key(*k))
            {
                return Ok(SchemaType::Object);
            }
            if let Some(Value::Array(values)) = obj.get("enum") {
                if let Some(kind) = infer_enum_kind(values) {
                    return Ok(SchemaType::Primitive(kind));
                }
            }
            if obj.is_empty() {
                return Ok(SchemaType::Object);
            }
            Err(SchemaError::UnknownType {
                schema: name.to_string(),
                type_name: "<missing>".to_string(),
            })
        }
    }
}

fn infer_enum_kind(values: &[Value]) -> Option<PrimitiveKind> {
    let first = values.first()?;
    let kind = match first {
        Value::String(_) => PrimitiveKind::String,
        Value::Bool(_) => PrimitiveKind::Boolean,
        Value::Number(_) if values.iter().all(|v| v.is_i64() || v.is_u64()) => {
            PrimitiveKind::Integer
        }
        Value::Number(_) => PrimitiveKind::Number,
        _ => return None,
    };
    let consistent = values.iter().all(|v| match kind {
        PrimitiveKind::String => v.is_string(),
        PrimitiveKind::Boolean => v.is_boolean(),
        _ => v.is_number(),
    });
    consistent.then_some(kind)
}

fn get_count(name: &str, obj: &Map<String, Value>, key: &str) -> Result<Option<usize>, SchemaError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| SchemaError::Malformed {
                schema: name.to_string(),
                message: format!("{} must be a non-negative integer", key),
            }),
    }
}

fn get_number(name: &str, obj: &Map<String, Value>, key: &str) -> Result<Option<Number>, SchemaError> {
    match obj.get(key) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(Some(n.clone())),
        Some(_) => Err(SchemaError::Malformed {
            schema: name.to_string(),
            message: format!("{} must be a number", key),
        }),
    }
}

/// Read an exclusive bound in either the boolean (draft-04) or the numeric
/// (draft-06) form.
fn exclusive_bound(
    name: &str,
    obj: &Map<String, Value>,
    key: &str,
    bound: &mut Option<Number>,
) -> Result<bool, SchemaError> {
    match obj.get(key) {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) => {
            *bound = Some(n.clone());
            Ok(true)
        }
        Some(_) => Err(SchemaError::Malformed {
            schema: name.to_string(),
            message: format!("{} must be a boolean or a number", key),
        }),
    }
}

fn parse_facets(name: &str, obj: &Map<String, Value>) -> Result<Facets, SchemaError> {
    let mut minimum = get_number(name, obj, "minimum")?;
    let mut maximum = get_number(name, obj, "maximum")?;
    let exclusive_minimum = exclusive_bound(name, obj, "exclusiveMinimum", &mut minimum)?;
    let exclusive_maximum = exclusive_bound(name, obj, "exclusiveMaximum", &mut maximum)?;

    let pattern = match obj.get("pattern") {
        None => None,
        Some(Value::String(p)) => Some(p.clone()),
        Some(_) => {
            return Err(SchemaError::Malformed {
                schema: name.to_string(),
                message: "pattern must be a string".to_string(),
            })
        }
    };

    let enum_values = match (obj.get("enum"), obj.get("const")) {
        (Some(Value::Array(values)), _) => Some(values.clone()),
        (Some(_), _) => {
            return Err(SchemaError::Malformed {
                schema: name.to_string(),
                message: "enum must be an array".to_string(),
            })
        }
        (None, Some(value)) => Some(vec![value.clone()]),
        (None, None) => None,
    };

    let multiple_of = get_number(name, obj, "multipleOf")?;
    if let Some(divisor) = &multiple_of {
        if divisor.as_f64().map_or(true, |d| d <= 0.0) {
            return Err(SchemaError::Malformed {
                schema: name.to_string(),
                message: format!("multipleOf must be greater than 0, got {}", divisor),
            });
        }
    }

    Ok(Facets {
        min_length: get_count(name, obj, "minLength")?,
        max_length: get_count(name, obj, "maxLength")?,
        pattern,
        enum_values,
        multiple_of,
        minimum,
        exclusive_minimum,
        maximum,
        exclusive_maximum,
    })
}

fn parse_annotations(obj: &Map<String, Value>) -> Annotations {
    Annotations {
        title: obj.get("title").and_then(Value::as_str).map(String::from),
        description: obj
            .get("description")
            .and_then(Value::as_str)
            .map(String::from),
        default: obj.get("default").cloned(),
        examples: obj.get("examples").cloned(),
    }
}
