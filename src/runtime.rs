//! The type runtime.
//!
//! Every class owns a [`ClassInfo`]: an ordered list of fields with their
//! declared type and validators. Instances are built against a
//! [`TypeRegistry`] that is read-only once created and cheap to clone.
//!
//! Assignment checks the value kind, coerces integers into float fields,
//! reconstructs nested classes from mappings, dispatches unions, and then
//! runs the field's validators in order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::ConstructionError;
use crate::types::{json_type_name, semantic_eq, summarize, PrimitiveKind};
use crate::validators::Validator;

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Primitive(PrimitiveKind),
    /// A record or union class, by name.
    Class(String),
    List(Box<FieldType>),
    /// Accepts null or an unset value in addition to the inner type.
    Optional(Box<FieldType>),
}

impl FieldType {
    pub fn list(inner: FieldType) -> Self {
        FieldType::List(Box::new(inner))
    }

    pub fn optional(inner: FieldType) -> Self {
        FieldType::Optional(Box::new(inner))
    }

    pub fn class(name: impl Into<String>) -> Self {
        FieldType::Class(name.into())
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, FieldType::Optional(_))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Primitive(kind) => f.write_str(kind.token()),
            FieldType::Class(name) => f.write_str(name),
            FieldType::List(inner) => write!(f, "List[{}]", inner),
            FieldType::Optional(inner) => write!(f, "Optional[{}]", inner),
        }
    }
}

/// One registered field.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub ty: FieldType,
    pub validators: Vec<Validator>,
}

impl FieldInfo {
    /// The only value this field admits, for single-valued enums.
    pub fn literal(&self) -> Option<&Value> {
        self.validators.iter().find_map(Validator::literal)
    }
}

/// A predicate over a whole instance.
pub type ClassRule = Arc<dyn Fn(&Instance) -> bool + Send + Sync>;

#[derive(Clone)]
enum Shape {
    Record(Vec<FieldInfo>),
    Union(Vec<String>),
}

/// Per-class field registry.
#[derive(Clone)]
pub struct ClassInfo {
    name: String,
    shape: Shape,
    rules: Vec<(String, ClassRule)>,
}

impl ClassInfo {
    /// A record class with no fields yet.
    pub fn record(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: Shape::Record(Vec::new()),
            rules: Vec::new(),
        }
    }

    /// A union class over the given variants, tried in order.
    pub fn union<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            shape: Shape::Union(variants.into_iter().map(Into::into).collect()),
            rules: Vec::new(),
        }
    }

    /// Append a field. Has no effect on unions.
    pub fn field(mut self, name: impl Into<String>, ty: FieldType, validators: Vec<Validator>) -> Self {
        if let Shape::Record(fields) = &mut self.shape {
            fields.push(FieldInfo {
                name: name.into(),
                ty,
                validators,
            });
        }
        self
    }

    /// Add a class-level rule checked after construction and assignment.
    pub fn rule<F>(mut self, name: impl Into<String>, rule: F) -> Self
    where
        F: Fn(&Instance) -> bool + Send + Sync + 'static,
    {
        self.rules.push((name.into(), Arc::new(rule)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_union(&self) -> bool {
        matches!(self.shape, Shape::Union(_))
    }

    /// Fields in declaration order; empty for unions.
    pub fn fields(&self) -> &[FieldInfo] {
        match &self.shape {
            Shape::Record(fields) => fields,
            Shape::Union(_) => &[],
        }
    }

    /// Variant class names; empty for records.
    pub fn variants(&self) -> &[String] {
        match &self.shape {
            Shape::Record(_) => &[],
            Shape::Union(variants) => variants,
        }
    }

    pub fn field_info(&self, name: &str) -> Option<&FieldInfo> {
        self.fields().iter().find(|f| f.name == name)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields().iter().position(|f| f.name == name)
    }
}

impl fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ClassInfo");
        s.field("name", &self.name);
        match &self.shape {
            Shape::Record(fields) => s.field("fields", fields),
            Shape::Union(variants) => s.field("variants", variants),
        };
        let rules: Vec<&str> = self.rules.iter().map(|(n, _)| n.as_str()).collect();
        s.field("rules", &rules).finish()
    }
}

/// Constructor arguments: positional values in field order plus named values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub positional: Vec<Value>,
    pub named: Map<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a named argument.
    pub fn named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    pub fn from_map(named: Map<String, Value>) -> Self {
        Self {
            positional: Vec::new(),
            named,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

/// A stored field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// An optional field that was not given.
    Absent,
    Bool(bool),
    Int(i64),
    /// Float fields also accept integers, so `{"x": 1}` comes back from
    /// [`Instance::to_dict`] as `{"x": 1.0}`. Compare with [`semantic_eq`]
    /// rather than `==` on `Value`s.
    Float(f64),
    /// Strings, including UUIDs in their original spelling.
    Str(String),
    List(Vec<FieldValue>),
    Object(Instance),
}

impl FieldValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Floats, and integers widened to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(n) => Some(*n),
            FieldValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            FieldValue::Object(instance) => Some(instance),
            _ => None,
        }
    }

    /// Dictionary form. `Absent` renders as null.
    pub fn to_value(&self) -> Value {
        match self {
            FieldValue::Absent => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(n) => Value::from(*n),
            FieldValue::Float(n) => Value::from(*n),
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::List(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            FieldValue::Object(instance) => instance.to_dict(),
        }
    }
}

/// Read-only table of class-infos shared by all instances built from it.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    classes: Arc<HashMap<String, Arc<ClassInfo>>>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.classes.keys().collect();
        names.sort();
        f.debug_struct("TypeRegistry").field("classes", &names).finish()
    }
}

impl TypeRegistry {
    pub fn new<I>(classes: I) -> Self
    where
        I: IntoIterator<Item = ClassInfo>,
    {
        let classes = classes
            .into_iter()
            .map(|info| (info.name.clone(), Arc::new(info)))
            .collect();
        Self {
            classes: Arc::new(classes),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ClassInfo>> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Whether both handles refer to the same table.
    fn same_table(&self, other: &TypeRegistry) -> bool {
        Arc::ptr_eq(&self.classes, &other.classes)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    fn lookup(&self, name: &str) -> Result<&Arc<ClassInfo>, ConstructionError> {
        self.get(name).ok_or_else(|| ConstructionError::UnknownClass {
            class: name.to_string(),
        })
    }

    /// Construct an instance of `class`.
    ///
    /// Records take positional arguments in field order and named arguments.
    /// Unions take named arguments only and return an instance of the
    /// selected variant.
    pub fn construct(&self, class: &str, args: Args) -> Result<Instance, ConstructionError> {
        let info = self.lookup(class)?.clone();
        if info.is_union() {
            if !args.positional.is_empty() {
                return Err(ConstructionError::TooManyArguments {
                    class: class.to_string(),
                    expected: 0,
                    actual: args.positional.len(),
                });
            }
            let variant = self.dispatch(&info, &args.named)?.to_string();
            return self.construct(&variant, args);
        }

        let fields = info.fields();
        if args.positional.len() > fields.len() {
            return Err(ConstructionError::TooManyArguments {
                class: class.to_string(),
                expected: fields.len(),
                actual: args.positional.len(),
            });
        }
        if let Some(unknown) = args.named.keys().find(|k| info.field_info(k).is_none()) {
            return Err(ConstructionError::UnknownField {
                class: class.to_string(),
                field: unknown.clone(),
            });
        }

        let Args {
            positional,
            mut named,
        } = args;
        let mut positional = positional.into_iter();
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            let given = match positional.next() {
                Some(value) => {
                    if named.contains_key(&field.name) {
                        return Err(ConstructionError::DuplicateArgument {
                            class: class.to_string(),
                            field: field.name.clone(),
                        });
                    }
                    Some(value)
                }
                None => named.remove(&field.name),
            };
            let value = match given {
                Some(value) => self.assign(&info, field, &value)?,
                None if field.ty.is_optional() => FieldValue::Absent,
                None => {
                    return Err(ConstructionError::MissingField {
                        class: class.to_string(),
                        field: field.name.clone(),
                    })
                }
            };
            values.push(value);
        }

        let instance = Instance {
            registry: self.clone(),
            class: info,
            values,
        };
        instance.check_rules()?;
        Ok(instance)
    }

    /// Rebuild an instance from its dictionary form. Unknown keys are
    /// rejected.
    pub fn from_dict(&self, class: &str, dict: &Value) -> Result<Instance, ConstructionError> {
        match dict {
            Value::Object(map) => self.construct(class, Args::from_map(map.clone())),
            other => Err(ConstructionError::NotAnObject {
                class: class.to_string(),
                actual: json_type_name(other).to_string(),
            }),
        }
    }

    /// Select the first variant accepting the given keys.
    fn dispatch<'i>(
        &self,
        union: &'i ClassInfo,
        named: &Map<String, Value>,
    ) -> Result<&'i str, ConstructionError> {
        for variant in union.variants() {
            if self.accepts(variant, named, 0) {
                tracing::trace!(union = %union.name, variant = %variant, "dispatched union");
                return Ok(variant.as_str());
            }
        }
        Err(ConstructionError::NoVariant {
            union: union.name.clone(),
            keys: named.keys().cloned().collect(),
        })
    }

    /// True if every key is a field of `class` and every given literal field
    /// carries its literal value.
    fn accepts(&self, class: &str, named: &Map<String, Value>, depth: usize) -> bool {
        const MAX_DEPTH: usize = 16;
        let Some(info) = self.get(class) else {
            return false;
        };
        if info.is_union() {
            return depth < MAX_DEPTH
                && info
                    .variants()
                    .iter()
                    .any(|v| self.accepts(v, named, depth + 1));
        }
        named.iter().all(|(key, value)| match info.field_info(key) {
            None => false,
            Some(field) => field
                .literal()
                .map(|literal| semantic_eq(literal, value))
                .unwrap_or(true),
        })
    }

    /// True if an instance of `actual` may be stored where `declared` is
    /// expected.
    fn conforms(&self, actual: &str, declared: &str) -> bool {
        if actual == declared {
            return true;
        }
        self.get(declared)
            .map(|info| info.variants().iter().any(|v| self.conforms(actual, v)))
            .unwrap_or(false)
    }

    /// Kind check, coercion and validation of one field value.
    fn assign(
        &self,
        owner: &ClassInfo,
        field: &FieldInfo,
        value: &Value,
    ) -> Result<FieldValue, ConstructionError> {
        let converted = self.convert(owner, field, &field.ty, value)?;
        if converted.is_absent() {
            return Ok(converted);
        }

        let checked = converted.to_value();
        if let Some(failed) = field.validators.iter().find(|v| !v.check(&checked)) {
            return Err(ConstructionError::Rejected {
                class: owner.name.clone(),
                field: field.name.clone(),
                value: summarize(value),
                rule: failed.to_string(),
            });
        }
        Ok(converted)
    }

    fn convert(
        &self,
        owner: &ClassInfo,
        field: &FieldInfo,
        ty: &FieldType,
        value: &Value,
    ) -> Result<FieldValue, ConstructionError> {
        let wrong_kind = || ConstructionError::WrongKind {
            class: owner.name.clone(),
            field: field.name.clone(),
            expected: ty.to_string(),
            actual: json_type_name(value).to_string(),
        };

        match ty {
            FieldType::Optional(inner) => {
                if value.is_null() {
                    Ok(FieldValue::Absent)
                } else {
                    self.convert(owner, field, inner, value)
                }
            }
            FieldType::Primitive(kind) => match (kind, value) {
                (PrimitiveKind::Boolean, Value::Bool(b)) => Ok(FieldValue::Bool(*b)),
                (PrimitiveKind::Integer, Value::Number(n)) => {
                    n.as_i64().map(FieldValue::Int).ok_or_else(wrong_kind)
                }
                // The only coercion: integers are accepted by float fields.
                (PrimitiveKind::Number, Value::Number(n)) => {
                    n.as_f64().map(FieldValue::Float).ok_or_else(wrong_kind)
                }
                (PrimitiveKind::String, Value::String(s)) => Ok(FieldValue::Str(s.clone())),
                (PrimitiveKind::Uuid, Value::String(s)) => {
                    if is_uuid(s) {
                        Ok(FieldValue::Str(s.clone()))
                    } else {
                        Err(ConstructionError::Rejected {
                            class: owner.name.clone(),
                            field: field.name.clone(),
                            value: summarize(value),
                            rule: "uuid".to_string(),
                        })
                    }
                }
                _ => Err(wrong_kind()),
            },
            FieldType::Class(name) => match value {
                Value::Object(_) => self.from_dict(name, value).map(FieldValue::Object),
                _ => Err(wrong_kind()),
            },
            FieldType::List(inner) => match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| self.convert(owner, field, inner, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(FieldValue::List),
                _ => Err(wrong_kind()),
            },
        }
    }
}

/// Hyphenated UUID text in either case.
fn is_uuid(text: &str) -> bool {
    text.len() == 36 && uuid::Uuid::parse_str(text).is_ok()
}

/// An instance of a record class.
///
/// Union construction yields an instance of the chosen variant, so
/// [`Instance::class_name`] is always a record class.
#[derive(Clone)]
pub struct Instance {
    registry: TypeRegistry,
    class: Arc<ClassInfo>,
    values: Vec<FieldValue>,
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.class.name == other.class.name && self.values == other.values
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.class.name, self.to_dict())
    }
}

impl Instance {
    pub fn class_name(&self) -> &str {
        &self.class.name
    }

    pub fn class_info(&self) -> &ClassInfo {
        &self.class
    }

    /// The value of a field, or `None` for names the class does not have.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.class.position(field).and_then(|i| self.values.get(i))
    }

    /// Follow nested object fields, e.g. `["example", "example", "name"]`.
    pub fn path(&self, fields: &[&str]) -> Option<&FieldValue> {
        let (last, parents) = fields.split_last()?;
        let mut current = self;
        for name in parents {
            current = current.get(name)?.as_instance()?;
        }
        current.get(last)
    }

    /// Fields with their values in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.class
            .fields()
            .iter()
            .map(|f| f.name.as_str())
            .zip(self.values.iter())
    }

    /// Assign a field from its dictionary form.
    ///
    /// On error the instance is left unchanged.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<(), ConstructionError> {
        let index = self.index_of(field)?;
        let class = Arc::clone(&self.class);
        let converted = self
            .registry
            .assign(&class, &class.fields()[index], &value.into())?;
        self.replace(index, converted)
    }

    /// Assign an already-built instance to a class-typed field.
    pub fn set_instance(&mut self, field: &str, value: Instance) -> Result<(), ConstructionError> {
        let index = self.index_of(field)?;
        let class = Arc::clone(&self.class);
        let info = &class.fields()[index];
        let declared = match &info.ty {
            FieldType::Class(name) => Some(name),
            FieldType::Optional(inner) => match inner.as_ref() {
                FieldType::Class(name) => Some(name),
                _ => None,
            },
            _ => None,
        };
        // Instances built by another registry never mix into this one.
        if !self.registry.same_table(&value.registry) {
            return Err(ConstructionError::WrongKind {
                class: self.class.name.clone(),
                field: field.to_string(),
                expected: info.ty.to_string(),
                actual: format!("{} from another binding set", value.class_name()),
            });
        }
        match declared {
            Some(name) if self.registry.conforms(value.class_name(), name) => {
                let checked = value.to_dict();
                if let Some(failed) = info.validators.iter().find(|v| !v.check(&checked)) {
                    return Err(ConstructionError::Rejected {
                        class: self.class.name.clone(),
                        field: field.to_string(),
                        value: summarize(&checked),
                        rule: failed.to_string(),
                    });
                }
                self.replace(index, FieldValue::Object(value))
            }
            _ => Err(ConstructionError::WrongKind {
                class: self.class.name.clone(),
                field: field.to_string(),
                expected: info.ty.to_string(),
                actual: value.class_name().to_string(),
            }),
        }
    }

    /// Dictionary form in field order; absent fields are omitted.
    pub fn to_dict(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in self.fields() {
            if !value.is_absent() {
                map.insert(name.to_string(), value.to_value());
            }
        }
        Value::Object(map)
    }

    fn index_of(&self, field: &str) -> Result<usize, ConstructionError> {
        self.class
            .position(field)
            .ok_or_else(|| ConstructionError::UnknownField {
                class: self.class.name.clone(),
                field: field.to_string(),
            })
    }

    fn replace(&mut self, index: usize, value: FieldValue) -> Result<(), ConstructionError> {
        let previous = std::mem::replace(&mut self.values[index], value);
        if let Err(e) = self.check_rules() {
            self.values[index] = previous;
            return Err(e);
        }
        Ok(())
    }

    fn check_rules(&self) -> Result<(), ConstructionError> {
        for (name, rule) in &self.class.rules {
            if !rule(self) {
                return Err(ConstructionError::ClassRule {
                    class: self.class.name.clone(),
                    rule: name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> TypeRegistry {
        let kinds = ["ViewMap", "ProjectMap", "LayoutBook", "PublisherSets"];
        TypeRegistry::new([
            ClassInfo::record("ElementId").field(
                "guid",
                FieldType::Primitive(PrimitiveKind::Uuid),
                vec![],
            ),
            ClassInfo::record("A")
                .field(
                    "type",
                    FieldType::Primitive(PrimitiveKind::String),
                    vec![Validator::value_set(kinds)],
                )
                .field("name", FieldType::Primitive(PrimitiveKind::String), vec![])
                .field("example", FieldType::optional(FieldType::class("A")), vec![]),
            ClassInfo::record("Point")
                .field("x", FieldType::Primitive(PrimitiveKind::Number), vec![])
                .field("y", FieldType::Primitive(PrimitiveKind::Number), vec![])
                .field(
                    "count",
                    FieldType::optional(FieldType::Primitive(PrimitiveKind::Integer)),
                    vec![Validator::minimum(0, false)],
                ),
            ClassInfo::record("Tags").field(
                "tags",
                FieldType::list(FieldType::Primitive(PrimitiveKind::String)),
                vec![
                    Validator::unique_items(),
                    Validator::list_items(vec![Validator::min_length(1)]),
                ],
            ),
            ClassInfo::record("UserDefinedPropertyUserId")
                .field(
                    "type",
                    FieldType::Primitive(PrimitiveKind::String),
                    vec![Validator::value_set(["UserDefined"])],
                )
                .field(
                    "localizedName",
                    FieldType::list(FieldType::Primitive(PrimitiveKind::String)),
                    vec![Validator::min_items(2), Validator::max_items(2)],
                ),
            ClassInfo::record("BuiltInPropertyUserId")
                .field(
                    "type",
                    FieldType::Primitive(PrimitiveKind::String),
                    vec![Validator::value_set(["BuiltIn"])],
                )
                .field(
                    "nonLocalizedName",
                    FieldType::Primitive(PrimitiveKind::String),
                    vec![],
                ),
            ClassInfo::union(
                "PropertyUserId",
                ["UserDefinedPropertyUserId", "BuiltInPropertyUserId"],
            ),
            ClassInfo::record("PropertyHolder").field(
                "propertyUserId",
                FieldType::class("PropertyUserId"),
                vec![],
            ),
            ClassInfo::record("Range")
                .field("low", FieldType::Primitive(PrimitiveKind::Integer), vec![])
                .field("high", FieldType::Primitive(PrimitiveKind::Integer), vec![])
                .rule("low <= high", |r| {
                    let low = r.get("low").and_then(FieldValue::as_i64);
                    let high = r.get("high").and_then(FieldValue::as_i64);
                    matches!((low, high), (Some(l), Some(h)) if l <= h)
                }),
        ])
    }

    #[test]
    fn uuid_field_round_trip() {
        let reg = registry();
        let dict = json!({"guid": "260D42E3-AA2E-4DAD-BFFA-F2B5021501CC"});
        let id = reg.from_dict("ElementId", &dict).unwrap();
        assert_eq!(id.to_dict(), dict);

        let err = reg
            .from_dict("ElementId", &json!({"guid": "260D42E3-AA2E-4DAD-BFFA"}))
            .unwrap_err();
        assert!(matches!(err, ConstructionError::Rejected { ref rule, .. } if rule == "uuid"));
    }

    #[test]
    fn nested_optional_self_reference() {
        let reg = registry();
        let dict = json!({"name": "L1", "type": "LayoutBook", "example": {
            "name": "L2", "type": "LayoutBook", "example": {"name": "L3", "type": "ProjectMap"}
        }});
        let mut a = reg.from_dict("A", &dict).unwrap();
        assert_eq!(
            a.path(&["example", "example", "name"]).and_then(FieldValue::as_str),
            Some("L3")
        );
        assert!(a.path(&["example", "example", "example"]).unwrap().is_absent());

        let err = a.set("type", "Invalid").unwrap_err();
        assert!(matches!(err, ConstructionError::Rejected { ref field, .. } if field == "type"));
        assert_eq!(a.get("type").and_then(FieldValue::as_str), Some("LayoutBook"));
    }

    #[test]
    fn to_dict_uses_declaration_order() {
        let reg = registry();
        let a = reg
            .from_dict("A", &json!({"name": "L1", "type": "ViewMap"}))
            .unwrap();
        let keys: Vec<String> = a.to_dict().as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["type", "name"]);
    }

    #[test]
    fn positional_equals_named() {
        let reg = registry();
        let positional = reg
            .construct("Point", Args::new().arg(1.5).arg(2.5).arg(3))
            .unwrap();
        let named = reg
            .construct(
                "Point",
                Args::new().named("x", 1.5).named("y", 2.5).named("count", 3),
            )
            .unwrap();
        assert_eq!(positional, named);
    }

    #[test]
    fn mixed_positional_and_named() {
        let reg = registry();
        let point = reg
            .construct("Point", Args::new().arg(1.0).named("y", 2.0))
            .unwrap();
        assert_eq!(point.get("y").and_then(FieldValue::as_f64), Some(2.0));

        let err = reg
            .construct("Point", Args::new().arg(1.0).named("x", 2.0).named("y", 0.0))
            .unwrap_err();
        assert!(matches!(err, ConstructionError::DuplicateArgument { .. }));
    }

    #[test]
    fn int_coerces_into_float_but_not_back() {
        let reg = registry();
        let mut point = reg.from_dict("Point", &json!({"x": 1, "y": 2})).unwrap();
        assert_eq!(point.get("x"), Some(&FieldValue::Float(1.0)));
        assert_ne!(point.to_dict(), json!({"x": 1, "y": 2}));
        assert_eq!(point.to_dict(), json!({"x": 1.0, "y": 2.0}));
        assert!(crate::types::semantic_eq(
            &point.to_dict(),
            &json!({"x": 1, "y": 2})
        ));

        let err = point.set("count", 2.0).unwrap_err();
        assert!(matches!(err, ConstructionError::WrongKind { .. }));
        point.set("count", 2).unwrap();
        assert_eq!(point.get("count"), Some(&FieldValue::Int(2)));
    }

    #[test]
    fn missing_and_unknown_fields() {
        let reg = registry();
        let err = reg.from_dict("Point", &json!({"x": 1.0})).unwrap_err();
        assert_eq!(
            err,
            ConstructionError::MissingField {
                class: "Point".into(),
                field: "y".into()
            }
        );

        let err = reg
            .from_dict("Point", &json!({"x": 1.0, "y": 1.0, "z": 1.0}))
            .unwrap_err();
        assert!(matches!(err, ConstructionError::UnknownField { ref field, .. } if field == "z"));

        let mut point = reg.from_dict("Point", &json!({"x": 1.0, "y": 1.0})).unwrap();
        assert!(point.set("z", 1.0).is_err());
    }

    #[test]
    fn too_many_positional_arguments() {
        let reg = registry();
        let err = reg
            .construct("ElementId", Args::new().arg("a").arg("b"))
            .unwrap_err();
        assert!(matches!(
            err,
            ConstructionError::TooManyArguments { expected: 1, actual: 2, .. }
        ));
    }

    #[test]
    fn optional_accepts_null_and_validators_skip_it() {
        let reg = registry();
        let point = reg
            .from_dict("Point", &json!({"x": 1.0, "y": 1.0, "count": null}))
            .unwrap();
        assert!(point.get("count").unwrap().is_absent());
        assert_eq!(point.to_dict(), json!({"x": 1.0, "y": 1.0}));

        let err = reg
            .from_dict("Point", &json!({"x": 1.0, "y": 1.0, "count": -1}))
            .unwrap_err();
        assert!(matches!(err, ConstructionError::Rejected { .. }));
    }

    #[test]
    fn list_validators_and_item_kinds() {
        let reg = registry();
        assert!(reg.from_dict("Tags", &json!({"tags": ["a", "b"]})).is_ok());
        assert!(reg.from_dict("Tags", &json!({"tags": ["a", "a"]})).is_err());
        assert!(reg.from_dict("Tags", &json!({"tags": ["a", ""]})).is_err());
        let err = reg.from_dict("Tags", &json!({"tags": ["a", 1]})).unwrap_err();
        assert!(matches!(err, ConstructionError::WrongKind { .. }));
        assert!(reg.from_dict("Tags", &json!({"tags": "a"})).is_err());
    }

    #[test]
    fn union_dispatch_selects_variant() {
        let reg = registry();
        let builtin = reg
            .construct(
                "PropertyUserId",
                Args::new()
                    .named("type", "BuiltIn")
                    .named("nonLocalizedName", "X"),
            )
            .unwrap();
        assert_eq!(builtin.class_name(), "BuiltInPropertyUserId");

        let user = reg
            .construct(
                "PropertyUserId",
                Args::new()
                    .named("type", "UserDefined")
                    .named("localizedName", json!(["G", "P"])),
            )
            .unwrap();
        assert_eq!(user.class_name(), "UserDefinedPropertyUserId");
        assert_eq!(
            user.to_dict(),
            json!({"type": "UserDefined", "localizedName": ["G", "P"]})
        );
    }

    #[test]
    fn union_dispatch_rejects_inconsistent_keys() {
        let reg = registry();
        let err = reg
            .construct(
                "PropertyUserId",
                Args::new()
                    .named("type", "BuiltIn")
                    .named("localizedName", json!(["G", "P"]))
                    .named("nonLocalizedName", "X"),
            )
            .unwrap_err();
        assert!(matches!(err, ConstructionError::NoVariant { .. }));

        let err = reg
            .construct(
                "PropertyUserId",
                Args::new().named("type", "BuiltIn").named("localizedName", json!(["G", "P"])),
            )
            .unwrap_err();
        assert!(matches!(err, ConstructionError::NoVariant { .. }));
    }

    #[test]
    fn union_typed_field_embeds_variant() {
        let reg = registry();
        let dict = json!({"propertyUserId": {"type": "BuiltIn", "nonLocalizedName": "Home"}});
        let holder = reg.from_dict("PropertyHolder", &dict).unwrap();
        let inner = holder.get("propertyUserId").and_then(FieldValue::as_instance).unwrap();
        assert_eq!(inner.class_name(), "BuiltInPropertyUserId");
        assert_eq!(holder.to_dict(), dict);
    }

    #[test]
    fn set_instance_checks_class() {
        let reg = registry();
        let mut holder = reg
            .from_dict(
                "PropertyHolder",
                &json!({"propertyUserId": {"type": "BuiltIn", "nonLocalizedName": "A"}}),
            )
            .unwrap();
        let user = reg
            .from_dict(
                "UserDefinedPropertyUserId",
                &json!({"type": "UserDefined", "localizedName": ["G", "P"]}),
            )
            .unwrap();
        holder.set_instance("propertyUserId", user).unwrap();

        let point = reg.from_dict("Point", &json!({"x": 0, "y": 0})).unwrap();
        assert!(holder.set_instance("propertyUserId", point).is_err());

        // Same class name, different registry.
        let foreign = registry()
            .from_dict(
                "UserDefinedPropertyUserId",
                &json!({"type": "UserDefined", "localizedName": ["G", "P"]}),
            )
            .unwrap();
        let err = holder.set_instance("propertyUserId", foreign).unwrap_err();
        assert!(matches!(err, ConstructionError::WrongKind { ref actual, .. } if actual.contains("another binding set")));
    }

    #[test]
    fn class_rules_guard_construction_and_assignment() {
        let reg = registry();
        let mut range = reg.from_dict("Range", &json!({"low": 1, "high": 2})).unwrap();
        assert!(reg.from_dict("Range", &json!({"low": 3, "high": 2})).is_err());

        let err = range.set("low", 5).unwrap_err();
        assert!(matches!(err, ConstructionError::ClassRule { .. }));
        assert_eq!(range.get("low"), Some(&FieldValue::Int(1)));
    }

    #[test]
    fn equal_dicts_give_independent_instances() {
        let reg = registry();
        let dict = json!({"x": 1.0, "y": 2.0});
        let mut a = reg.from_dict("Point", &dict).unwrap();
        let b = reg.from_dict("Point", &dict).unwrap();
        a.set("x", 5.0).unwrap();
        assert_eq!(b.get("x"), Some(&FieldValue::Float(1.0)));
    }

    #[test]
    fn unknown_class_and_non_object_input() {
        let reg = registry();
        assert!(matches!(
            reg.construct("Nope", Args::new()),
            Err(ConstructionError::UnknownClass { .. })
        ));
        assert!(matches!(
            reg.from_dict("Point", &json!([1, 2])),
            Err(ConstructionError::NotAnObject { .. })
        ));
    }
}
