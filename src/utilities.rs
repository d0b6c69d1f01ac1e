//! Typed helpers over the command facade.

use serde_json::{json, Value};

use crate::bindings::CommandFacade;
use crate::error::{CommandError, ConstructionError};
use crate::runtime::{Args, FieldValue, Instance};
use crate::transport::Transport;
use crate::types::json_type_name;

/// Version information reported by `GetProductInfo`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub version: u32,
    pub build_number: u32,
    pub language_code: String,
}

impl ProductInfo {
    /// Read the `result` mapping of a `GetProductInfo` response.
    ///
    /// Used before any binding set is loaded, so it does not go through the
    /// type runtime.
    pub fn from_result(result: &Value) -> Result<Self, ConstructionError> {
        const CLASS: &str = "GetProductInfo_response";
        let field = |name: &str| {
            result.get(name).ok_or_else(|| ConstructionError::MissingField {
                class: CLASS.to_string(),
                field: name.to_string(),
            })
        };
        let wrong = |name: &str, expected: &str, value: &Value| ConstructionError::WrongKind {
            class: CLASS.to_string(),
            field: name.to_string(),
            expected: expected.to_string(),
            actual: json_type_name(value).to_string(),
        };
        let number = |name: &str| -> Result<u32, ConstructionError> {
            let value = field(name)?;
            value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| wrong(name, "int", value))
        };

        let language = field("languageCode")?;
        Ok(Self {
            version: number("version")?,
            build_number: number("buildNumber")?,
            language_code: language
                .as_str()
                .ok_or_else(|| wrong("languageCode", "str", language))?
                .to_string(),
        })
    }
}

/// Convenience calls that every binding set supports.
pub struct Utilities<'a, T> {
    facade: &'a CommandFacade<T>,
}

impl<'a, T: Transport> Utilities<'a, T> {
    pub fn new(facade: &'a CommandFacade<T>) -> Self {
        Self { facade }
    }

    /// Version, build number and language of the remote application.
    pub fn product_info(&self) -> Result<ProductInfo, CommandError> {
        const COMMAND: &str = "GetProductInfo";
        let instance = self.facade.call_instance(COMMAND, Args::new())?;
        ProductInfo::from_result(&instance.to_dict()).map_err(|source| {
            CommandError::MalformedResponse {
                command: COMMAND.to_string(),
                source,
            }
        })
    }

    /// True if the remote application answers `IsAlive` positively.
    pub fn is_alive(&self) -> Result<bool, CommandError> {
        const COMMAND: &str = "IsAlive";
        let instance = self.facade.call_instance(COMMAND, Args::new())?;
        instance
            .get("isAlive")
            .and_then(FieldValue::as_bool)
            .ok_or_else(|| CommandError::MalformedResponse {
                command: COMMAND.to_string(),
                source: ConstructionError::MissingField {
                    class: instance.class_name().to_string(),
                    field: "isAlive".to_string(),
                },
            })
    }

    /// A `PropertyUserId` naming a built-in property, e.g.
    /// `General_ElementID`.
    pub fn builtin_property_user_id(
        &self,
        non_localized_name: &str,
    ) -> Result<Instance, ConstructionError> {
        self.facade.bindings().construct(
            "PropertyUserId",
            Args::new()
                .named("type", "BuiltIn")
                .named("nonLocalizedName", non_localized_name),
        )
    }

    /// A `PropertyUserId` naming a user-defined property by group and name.
    pub fn user_defined_property_user_id(
        &self,
        group: &str,
        name: &str,
    ) -> Result<Instance, ConstructionError> {
        self.facade.bindings().construct(
            "PropertyUserId",
            Args::new()
                .named("type", "UserDefined")
                .named("localizedName", json!([group, name])),
        )
    }
}
