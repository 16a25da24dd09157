//! Typed input schemas and argument validation.
//!
//! Tools declare their inputs as a small subset of JSON Schema: an object
//! with typed properties, a required set, optional enumerations and
//! defaults. [`InputSchema::validate`] checks a call's arguments against
//! that declaration before any backend adapter sees them.
//!
//! Unknown extra properties are passed through untouched so that newer
//! clients can talk to older servers.

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Validated call arguments.
pub type Arguments = Map<String, Value>;

/// Primitive kind of a schema property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// JSON string.
    String,
    /// JSON number without a fractional part.
    Integer,
    /// Any JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
}

impl PropertyKind {
    /// Returns the JSON Schema type keyword.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Parses a JSON Schema type keyword.
    #[must_use]
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            _ => None,
        }
    }

    /// Returns `true` if `value` is an instance of this kind.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
            }
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// Names the JSON kind of an arbitrary value, for error messages.
fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Declaration of a single property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    /// Expected kind.
    pub kind: PropertyKind,
    /// Human-readable description.
    pub description: Option<String>,
    /// Allowed values, if constrained.
    pub enum_values: Option<Vec<Value>>,
    /// Value filled in when the property is absent.
    pub default: Option<Value>,
}

impl PropertySchema {
    /// Creates a property of the given kind.
    #[must_use]
    pub const fn new(kind: PropertyKind) -> Self {
        Self {
            kind,
            description: None,
            enum_values: None,
            default: None,
        }
    }

    /// Shorthand for a string property.
    #[must_use]
    pub const fn string() -> Self {
        Self::new(PropertyKind::String)
    }

    /// Shorthand for an integer property.
    #[must_use]
    pub const fn integer() -> Self {
        Self::new(PropertyKind::Integer)
    }

    /// Shorthand for a number property.
    #[must_use]
    pub const fn number() -> Self {
        Self::new(PropertyKind::Number)
    }

    /// Shorthand for a boolean property.
    #[must_use]
    pub const fn boolean() -> Self {
        Self::new(PropertyKind::Boolean)
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Restricts the property to the listed values.
    #[must_use]
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".to_string(), json!(self.kind.as_str()));
        if let Some(description) = &self.description {
            obj.insert("description".to_string(), json!(description));
        }
        if let Some(values) = &self.enum_values {
            obj.insert("enum".to_string(), Value::Array(values.clone()));
        }
        if let Some(default) = &self.default {
            obj.insert("default".to_string(), default.clone());
        }
        Value::Object(obj)
    }

    fn check(&self, field: &str, value: &Value) -> Result<(), ValidationError> {
        if !self.kind.matches(value) {
            return Err(ValidationError::new(
                field,
                format!("expected {}, got {}", self.kind.as_str(), describe(value)),
            ));
        }
        if let Some(values) = &self.enum_values {
            if !values.contains(value) {
                let allowed = values
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(ValidationError::new(
                    field,
                    format!("value {value} is not one of: {allowed}"),
                ));
            }
        }
        Ok(())
    }
}

/// A rejected argument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field '{field}': {reason}")]
pub struct ValidationError {
    /// Offending property name (`arguments` for the mapping itself).
    pub field: String,
    /// What is wrong with it.
    pub reason: String,
}

impl ValidationError {
    /// Creates a validation error.
    #[must_use]
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A declared schema document that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The document is not an object schema.
    #[error("input schema must be an object schema")]
    NotAnObject,

    /// A property declaration is unusable.
    #[error("property '{property}': {reason}")]
    InvalidProperty {
        /// Property name.
        property: String,
        /// What is wrong with it.
        reason: String,
    },

    /// `required` is not an array of property names.
    #[error("required must be an array of property names")]
    InvalidRequired,

    /// `required` names a property that is not declared.
    #[error("required property '{0}' is not declared")]
    UndeclaredRequired(String),
}

/// Input schema of a tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSchema {
    properties: IndexMap<String, PropertySchema>,
    required: Vec<String>,
}

impl InputSchema {
    /// Creates an empty object schema.
    #[must_use]
    pub fn object() -> Self {
        Self::default()
    }

    /// Adds an optional property.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Adds a required property.
    #[must_use]
    pub fn required_property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, schema);
        self
    }

    /// Returns the declared properties in declaration order.
    #[must_use]
    pub const fn properties(&self) -> &IndexMap<String, PropertySchema> {
        &self.properties
    }

    /// Returns the names of the required properties.
    #[must_use]
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Renders the schema as a JSON Schema document.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, prop)| (name.clone(), prop.to_json()))
            .collect();

        let mut obj = Map::new();
        obj.insert("type".to_string(), json!("object"));
        obj.insert("properties".to_string(), Value::Object(properties));
        if !self.required.is_empty() {
            obj.insert("required".to_string(), json!(self.required));
        }
        Value::Object(obj)
    }

    /// Parses a declared JSON Schema document.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if the document is not an object schema, a
    /// property has an unsupported type, an enum or default does not match
    /// its property's type, or `required` names an undeclared property.
    pub fn from_json(document: &Value) -> Result<Self, SchemaError> {
        let obj = document.as_object().ok_or(SchemaError::NotAnObject)?;
        if obj.get("type").and_then(Value::as_str) != Some("object") {
            return Err(SchemaError::NotAnObject);
        }

        let mut schema = Self::object();

        if let Some(properties) = obj.get("properties") {
            let properties = properties.as_object().ok_or(SchemaError::NotAnObject)?;
            for (name, decl) in properties {
                schema
                    .properties
                    .insert(name.clone(), parse_property(name, decl)?);
            }
        }

        if let Some(required) = obj.get("required") {
            let required = required.as_array().ok_or(SchemaError::InvalidRequired)?;
            for entry in required {
                let name = entry.as_str().ok_or(SchemaError::InvalidRequired)?;
                if !schema.properties.contains_key(name) {
                    return Err(SchemaError::UndeclaredRequired(name.to_string()));
                }
                schema.required.push(name.to_string());
            }
        }

        Ok(schema)
    }

    /// Validates call arguments against this schema.
    ///
    /// Absent or `null` arguments are treated as an empty mapping. Missing
    /// optional properties are filled from their default when one is
    /// declared; an explicit `null` for an optional property counts as
    /// missing. Unknown properties are kept as-is.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the first offending field.
    pub fn validate(&self, arguments: &Value) -> Result<Arguments, ValidationError> {
        let mut args = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(ValidationError::new(
                    "arguments",
                    format!("expected object, got {}", describe(other)),
                ))
            }
        };

        for name in &self.required {
            match args.get(name) {
                None | Some(Value::Null) => {
                    return Err(ValidationError::new(name, "required property is missing"));
                }
                Some(_) => {}
            }
        }

        for (name, prop) in &self.properties {
            match args.get(name) {
                Some(Value::Null) | None => {
                    args.remove(name);
                    if let Some(default) = &prop.default {
                        args.insert(name.clone(), default.clone());
                    }
                }
                Some(value) => prop.check(name, value)?,
            }
        }

        Ok(args)
    }
}

fn parse_property(name: &str, decl: &Value) -> Result<PropertySchema, SchemaError> {
    let invalid = |reason: String| SchemaError::InvalidProperty {
        property: name.to_string(),
        reason,
    };

    let decl = decl
        .as_object()
        .ok_or_else(|| invalid("declaration must be an object".to_string()))?;

    let keyword = decl
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing type".to_string()))?;
    let kind = PropertyKind::parse(keyword)
        .ok_or_else(|| invalid(format!("unsupported type '{keyword}'")))?;

    let mut prop = PropertySchema::new(kind);
    prop.description = decl
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(values) = decl.get("enum") {
        let values = values
            .as_array()
            .ok_or_else(|| invalid("enum must be an array".to_string()))?;
        if let Some(bad) = values.iter().find(|v| !kind.matches(v)) {
            return Err(invalid(format!("enum value {bad} is not a {keyword}")));
        }
        prop.enum_values = Some(values.clone());
    }

    if let Some(default) = decl.get("default") {
        if !kind.matches(default) {
            return Err(invalid(format!("default {default} is not a {keyword}")));
        }
        prop.default = Some(default.clone());
    }

    Ok(prop)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent_schema() -> InputSchema {
        InputSchema::object()
            .required_property("torrent_hash", PropertySchema::string().describe("Torrent hash"))
            .property(
                "delete_files",
                PropertySchema::boolean().with_default(false),
            )
            .property(
                "filter",
                PropertySchema::string().one_of(["downloading", "seeding", "all"]),
            )
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let err = torrent_schema().validate(&json!({})).unwrap_err();
        assert_eq!(err.field, "torrent_hash");
        assert!(err.reason.contains("missing"));
    }

    #[test]
    fn null_required_field_is_rejected() {
        let err = torrent_schema()
            .validate(&json!({"torrent_hash": null}))
            .unwrap_err();
        assert_eq!(err.field, "torrent_hash");
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let err = torrent_schema()
            .validate(&json!({"torrent_hash": 12}))
            .unwrap_err();
        assert_eq!(err.field, "torrent_hash");
        assert_eq!(err.reason, "expected string, got integer");
    }

    #[test]
    fn enum_mismatch_is_rejected() {
        let err = torrent_schema()
            .validate(&json!({"torrent_hash": "abc", "filter": "paused"}))
            .unwrap_err();
        assert_eq!(err.field, "filter");
        assert!(err.reason.contains("\"seeding\""));
    }

    #[test]
    fn defaults_are_filled_and_extras_kept() {
        let args = torrent_schema()
            .validate(&json!({"torrent_hash": "abc", "client_hint": [1, 2]}))
            .unwrap();
        assert_eq!(args["delete_files"], json!(false));
        assert_eq!(args["client_hint"], json!([1, 2]));
        assert!(!args.contains_key("filter"));
    }

    #[test]
    fn null_optional_counts_as_missing() {
        let args = torrent_schema()
            .validate(&json!({"torrent_hash": "abc", "delete_files": null, "filter": null}))
            .unwrap();
        assert_eq!(args["delete_files"], json!(false));
        assert!(!args.contains_key("filter"));
    }

    #[test]
    fn absent_arguments_mean_empty_mapping() {
        let schema = InputSchema::object().property("limit", PropertySchema::integer());
        assert!(schema.validate(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let err = InputSchema::object().validate(&json!("hi")).unwrap_err();
        assert_eq!(err.field, "arguments");
    }

    #[test]
    fn integer_accepts_whole_floats_only() {
        let schema = InputSchema::object().required_property("vmid", PropertySchema::integer());
        assert!(schema.validate(&json!({"vmid": 100})).is_ok());
        assert!(schema.validate(&json!({"vmid": 100.0})).is_ok());
        assert!(schema.validate(&json!({"vmid": 100.5})).is_err());
        assert!(schema.validate(&json!({"vmid": "100"})).is_err());
    }

    #[test]
    fn number_accepts_integers() {
        let schema = InputSchema::object().required_property("temperature", PropertySchema::number());
        assert!(schema.validate(&json!({"temperature": 21})).is_ok());
        assert!(schema.validate(&json!({"temperature": 21.5})).is_ok());
        assert!(schema.validate(&json!({"temperature": true})).is_err());
    }

    #[test]
    fn parses_declared_document() {
        let document = json!({
            "type": "object",
            "properties": {
                "container_id": {"type": "string", "description": "Container ID or name"},
                "tail": {"type": "integer", "default": 100},
                "all": {"type": "boolean"}
            },
            "required": ["container_id"]
        });

        let schema = InputSchema::from_json(&document).unwrap();
        assert_eq!(schema.required(), ["container_id".to_string()]);
        let names: Vec<_> = schema.properties().keys().cloned().collect();
        assert_eq!(names, ["container_id", "tail", "all"]);
        assert_eq!(schema.properties()["tail"].default, Some(json!(100)));
    }

    #[test]
    fn rejects_unsupported_documents() {
        assert_eq!(
            InputSchema::from_json(&json!({"type": "string"})),
            Err(SchemaError::NotAnObject)
        );
        assert!(matches!(
            InputSchema::from_json(&json!({
                "type": "object",
                "properties": {"when": {"type": "date"}}
            })),
            Err(SchemaError::InvalidProperty { .. })
        ));
        assert!(matches!(
            InputSchema::from_json(&json!({
                "type": "object",
                "properties": {"tail": {"type": "integer", "default": "ten"}}
            })),
            Err(SchemaError::InvalidProperty { .. })
        ));
        assert_eq!(
            InputSchema::from_json(&json!({"type": "object", "required": ["ghost"]})),
            Err(SchemaError::UndeclaredRequired("ghost".to_string()))
        );
    }

    #[test]
    fn builder_renders_json_schema() {
        let rendered = torrent_schema().to_json();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["required"], json!(["torrent_hash"]));
        assert_eq!(rendered["properties"]["delete_files"]["default"], json!(false));
        assert_eq!(
            InputSchema::from_json(&rendered).unwrap(),
            torrent_schema()
        );
    }

    #[test]
    fn properties_keep_declaration_order() {
        let built = InputSchema::object()
            .property("zeta", PropertySchema::string())
            .required_property("alpha", PropertySchema::integer());
        assert_eq!(
            built.to_json().to_string(),
            r#"{"type":"object","properties":{"zeta":{"type":"string"},"alpha":{"type":"integer"}},"required":["alpha"]}"#
        );

        let parsed = InputSchema::from_json(&built.to_json()).unwrap();
        let names: Vec<_> = parsed.properties().keys().cloned().collect();
        assert_eq!(names, ["zeta", "alpha"]);
    }
}
