//! Catalog building.
//!
//! Lowers a parsed [`SchemaSet`] into named classes and commands. The catalog
//! is plain data: it serializes to JSON and is what binding-set files contain.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::CatalogError;
use crate::schema::{Facets, ObjectSchema, SchemaRef, SchemaSet};

/// Whether a class is a record or a union over variant classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClassType {
    Normal,
    Oneof,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Facets carried by an attribute or by its list items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Constraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<Number>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Number>,
    #[serde(skip_serializing_if = "is_false")]
    pub exclusive_minimum: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Number>,
    #[serde(skip_serializing_if = "is_false")]
    pub exclusive_maximum: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(skip_serializing_if = "is_false")]
    pub unique_items: bool,
}

impl Constraints {
    fn from_facets(facets: &Facets) -> Self {
        Self {
            min_length: facets.min_length,
            max_length: facets.max_length,
            pattern: facets.pattern.clone(),
            enum_values: facets.enum_values.clone(),
            multiple_of: facets.multiple_of.clone(),
            minimum: facets.minimum.clone(),
            exclusive_minimum: facets.exclusive_minimum,
            maximum: facets.maximum.clone(),
            exclusive_maximum: facets.exclusive_maximum,
            ..Self::default()
        }
    }

    /// The single allowed value of a one-element enum.
    pub fn literal(&self) -> Option<&Value> {
        match self.enum_values.as_deref() {
            Some([value]) => Some(value),
            _ => None,
        }
    }
}

/// A field of a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub name: String,
    /// Primitive token, class name, or `List`. Merged union attributes may
    /// hold several `;`-separated types.
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    #[serde(flatten)]
    pub constraints: Constraints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(rename = "itemtype", default, skip_serializing_if = "Option::is_none")]
    pub item_constraints: Option<Constraints>,
}

impl Attribute {
    pub fn is_list(&self) -> bool {
        self.type_name == "List"
    }
}

/// A named record or union type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub additional_properties: bool,
    pub class_type: ClassType,
    pub attributes: Vec<Attribute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub of_type_class_names: Vec<String>,
}

impl Class {
    pub fn is_union(&self) -> bool {
        self.class_type == ClassType::Oneof
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// A remote command with its parameter and response classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub name: String,
    pub description: String,
    pub parameters: Class,
    pub response: Class,
}

/// A non-fatal finding about a catalog class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogWarning {
    pub class: String,
    pub message: String,
}

impl fmt::Display for CatalogWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

/// Classes and commands lowered from a schema set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub classes: Vec<Class>,
    pub commands: Vec<Command>,
    #[serde(skip)]
    pub warnings: Vec<CatalogWarning>,
}

impl Catalog {
    pub fn class(&self, name: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn command(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Every class including command parameter and response classes.
    pub fn all_classes(&self) -> impl Iterator<Item = &Class> {
        self.classes
            .iter()
            .chain(self.commands.iter().flat_map(|c| [&c.parameters, &c.response]))
    }
}

/// Lower a schema set into a catalog.
///
/// # Errors
///
/// Returns `CatalogError` when a reference cannot be lowered or a union is
/// empty or lists a non-object variant.
pub fn build_catalog(set: &SchemaSet) -> Result<Catalog, CatalogError> {
    let mut converter = Converter {
        set,
        converted: HashMap::new(),
        in_progress: HashSet::new(),
    };

    let mut catalog = Catalog::default();
    for object in set.objects_in_order() {
        if object.command.is_some() {
            continue;
        }
        let class = converter.convert(object)?;
        tracing::debug!(class = %class.name, kind = ?class.class_type, "emitted class");
        catalog.classes.push(class);
    }

    for command in set.commands_in_order() {
        let parameters = converter.convert_named(&command.name, &command.parameters)?;
        let response = converter.convert_named(&command.name, &command.response)?;
        catalog.commands.push(Command {
            name: command.name.clone(),
            description: command.description.clone(),
            parameters,
            response,
        });
    }

    let warnings: Vec<CatalogWarning> = catalog
        .all_classes()
        .filter(|c| c.is_union())
        .filter_map(|c| converter.ambiguity(c))
        .collect();
    for warning in &warnings {
        tracing::warn!(class = %warning.class, "{}", warning.message);
    }
    catalog.warnings = warnings;

    Ok(catalog)
}

struct Converter<'a> {
    set: &'a SchemaSet,
    converted: HashMap<String, Class>,
    in_progress: HashSet<String>,
}

impl<'a> Converter<'a> {
    fn convert_named(&mut self, owner: &str, name: &str) -> Result<Class, CatalogError> {
        let set = self.set;
        match set.ref_of(name) {
            Some(SchemaRef::Object(object)) => self.convert(object),
            _ => Err(CatalogError::UnknownReference {
                owner: owner.to_string(),
                field: String::new(),
                target: name.to_string(),
            }),
        }
    }

    fn convert(&mut self, object: &ObjectSchema) -> Result<Class, CatalogError> {
        if let Some(class) = self.converted.get(&object.name) {
            return Ok(class.clone());
        }
        // A union nested in itself merges nothing from the inner occurrence.
        if !self.in_progress.insert(object.name.clone()) {
            return Ok(self.empty_class(object));
        }

        let result = self.lower(object);
        self.in_progress.remove(&object.name);
        let class = result?;
        self.converted.insert(object.name.clone(), class.clone());
        Ok(class)
    }

    fn empty_class(&self, object: &ObjectSchema) -> Class {
        Class {
            name: object.name.clone(),
            description: object.annotations.description.clone(),
            title: object.annotations.title.clone(),
            default: object.annotations.default.clone(),
            additional_properties: object.additional_properties,
            class_type: ClassType::Normal,
            attributes: Vec::new(),
            of_type_class_names: Vec::new(),
        }
    }

    fn lower(&mut self, object: &ObjectSchema) -> Result<Class, CatalogError> {
        let set = self.set;
        let mut class = self.empty_class(object);

        if let Some(composition) = &object.composition {
            if composition.variants.is_empty() {
                return Err(CatalogError::EmptyUnion {
                    name: object.name.clone(),
                });
            }
            let mut variants = Vec::with_capacity(composition.variants.len());
            for variant in &composition.variants {
                let schema = match set.ref_of(variant) {
                    Some(SchemaRef::Object(schema)) => schema,
                    _ => {
                        return Err(CatalogError::InvalidVariant {
                            name: object.name.clone(),
                            variant: variant.clone(),
                        })
                    }
                };
                variants.push(self.convert(schema)?);
            }
            class.class_type = ClassType::Oneof;
            class.of_type_class_names = composition.variants.clone();
            class.attributes = merge_attributes(&variants);
            return Ok(class);
        }

        for (field, reference) in &object.fields {
            let required = object.required.iter().any(|r| r == field);
            class
                .attributes
                .push(self.attribute(&object.name, field, reference, required)?);
        }
        Ok(class)
    }

    fn attribute(
        &self,
        owner: &str,
        field: &str,
        reference: &str,
        required: bool,
    ) -> Result<Attribute, CatalogError> {
        let unknown = |target: &str| CatalogError::UnknownReference {
            owner: owner.to_string(),
            field: field.to_string(),
            target: target.to_string(),
        };
        let mut attribute = Attribute {
            name: field.to_string(),
            type_name: String::new(),
            description: None,
            required,
            constraints: Constraints::default(),
            item_type: None,
            item_constraints: None,
        };

        match self.set.ref_of(reference).ok_or_else(|| unknown(reference))? {
            SchemaRef::Primitive(primitive) => {
                attribute.type_name = primitive.kind.token().to_string();
                attribute.description = primitive.annotations.description.clone();
                attribute.constraints = Constraints::from_facets(&primitive.facets);
            }
            SchemaRef::List(list) => {
                attribute.type_name = "List".to_string();
                attribute.description = list.annotations.description.clone();
                attribute.constraints.min_items = list.min_items;
                attribute.constraints.max_items = list.max_items;
                attribute.constraints.unique_items = list.unique_items;
                match self
                    .set
                    .ref_of(&list.item_type)
                    .ok_or_else(|| unknown(&list.item_type))?
                {
                    SchemaRef::Primitive(item) => {
                        attribute.item_type = Some(item.kind.token().to_string());
                        attribute.item_constraints = Some(Constraints::from_facets(&item.facets));
                    }
                    SchemaRef::Object(item) => {
                        attribute.item_type = Some(item.name.clone());
                    }
                    SchemaRef::List(_) | SchemaRef::Command(_) => {
                        return Err(CatalogError::UnsupportedItemType {
                            owner: owner.to_string(),
                            field: field.to_string(),
                            item: list.item_type.clone(),
                        })
                    }
                }
            }
            SchemaRef::Object(target) => {
                attribute.type_name = target.name.clone();
                attribute.description = target.annotations.description.clone();
            }
            SchemaRef::Command(_) => return Err(unknown(reference)),
        }
        Ok(attribute)
    }

    /// Flags unions where some input matches more than one variant.
    fn ambiguity(&self, union: &Class) -> Option<CatalogWarning> {
        let variants: Vec<&Class> = union
            .of_type_class_names
            .iter()
            .filter_map(|n| self.converted.get(n))
            .collect();

        for (i, a) in variants.iter().enumerate() {
            for b in &variants[i + 1..] {
                let shared: Vec<&Attribute> = a
                    .attributes
                    .iter()
                    .filter(|attr| b.attribute(&attr.name).is_some())
                    .collect();
                if shared.is_empty() {
                    continue;
                }
                let discriminated = shared.iter().any(|attr| {
                    let other = b.attribute(&attr.name).and_then(|o| o.constraints.literal());
                    matches!((attr.constraints.literal(), other), (Some(x), Some(y)) if x != y)
                });
                if !discriminated {
                    return Some(CatalogWarning {
                        class: union.name.clone(),
                        message: format!(
                            "variants {} and {} overlap without a literal discriminator; \
                             the first matching variant wins",
                            a.name, b.name
                        ),
                    });
                }
            }
        }
        None
    }
}

/// Merge variant attributes by name.
///
/// A merged attribute is required only if every variant requires it.
/// Differing types and descriptions are joined with `;`.
pub fn merge_attributes(variants: &[Class]) -> Vec<Attribute> {
    let mut order: Vec<String> = Vec::new();
    let mut seen: HashMap<String, Vec<&Attribute>> = HashMap::new();
    for variant in variants {
        for attribute in &variant.attributes {
            let entry = seen.entry(attribute.name.clone()).or_default();
            if entry.is_empty() {
                order.push(attribute.name.clone());
            }
            entry.push(attribute);
        }
    }

    order
        .into_iter()
        .filter_map(|name| {
            let occurrences = seen.remove(&name)?;
            let first = occurrences.first()?;
            let mut merged = (*first).clone();
            merged.required = occurrences.len() == variants.len()
                && occurrences.iter().all(|a| a.required);
            merged.type_name = join_distinct(occurrences.iter().map(|a| a.type_name.as_str()));
            let description =
                join_distinct(occurrences.iter().filter_map(|a| a.description.as_deref()));
            merged.description = (!description.is_empty()).then_some(description);
            Some(merged)
        })
        .collect()
}

fn join_distinct<'s>(items: impl Iterator<Item = &'s str>) -> String {
    let mut distinct: Vec<&str> = Vec::new();
    for item in items {
        if !distinct.contains(&item) {
            distinct.push(item);
        }
    }
    distinct.join(";")
}
