//! Tool descriptors and input schemas.
//!
//! Provider schemas arrive as raw JSON Schema. They are parsed once, at
//! registration, into an [`InputSchema`] so per-call validation never has to
//! re-inspect the raw document.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};

use super::errors::CatalogError;

// ─── Origin ──────────────────────────────────────────────────────────────────

/// Where a tool lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "provider", rename_all = "snake_case")]
pub enum ToolOrigin {
    /// An in-process function.
    Local,
    /// A tool exposed by the named provider process.
    Provider(String),
}

impl ToolOrigin {
    /// Shorthand for `ToolOrigin::Provider(name.to_string())`.
    pub fn provider(name: &str) -> Self {
        Self::Provider(name.to_string())
    }

    /// Whether this is an in-process tool.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    /// The owning provider name, if remote.
    pub fn provider_name(&self) -> Option<&str> {
        match self {
            Self::Local => None,
            Self::Provider(name) => Some(name),
        }
    }
}

impl fmt::Display for ToolOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Provider(name) => write!(f, "provider '{name}'"),
        }
    }
}

// ─── Parameter Kinds ─────────────────────────────────────────────────────────

/// JSON type accepted by a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Null,
    /// No type constraint (schema omitted `type` or used one we don't model).
    Any,
}

impl ParamKind {
    /// Map a JSON Schema `type` keyword to a kind.
    pub fn from_json_type(ty: &str) -> Self {
        match ty {
            "string" => Self::String,
            "integer" => Self::Integer,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "array" => Self::Array,
            "object" => Self::Object,
            "null" => Self::Null,
            _ => Self::Any,
        }
    }

    /// The JSON Schema `type` keyword for this kind (`None` for `Any`).
    pub fn as_json_type(self) -> Option<&'static str> {
        match self {
            Self::String => Some("string"),
            Self::Integer => Some("integer"),
            Self::Number => Some("number"),
            Self::Boolean => Some("boolean"),
            Self::Array => Some("array"),
            Self::Object => Some("object"),
            Self::Null => Some("null"),
            Self::Any => None,
        }
    }

    /// Whether `value` is acceptable for this kind.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Null => value.is_null(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_json_type().unwrap_or("any"))
    }
}

/// One named parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ─── InputSchema ─────────────────────────────────────────────────────────────

/// Parsed parameter list plus the raw JSON Schema it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSchema {
    params: Vec<ParamSpec>,
    raw: Value,
}

impl InputSchema {
    /// A schema that accepts any argument object.
    pub fn empty() -> Self {
        Self {
            params: Vec::new(),
            raw: json!({ "type": "object", "properties": {} }),
        }
    }

    /// Start declaring a schema by hand (local tools).
    pub fn builder() -> InputSchemaBuilder {
        InputSchemaBuilder::default()
    }

    /// Parse a provider-advertised JSON Schema.
    ///
    /// A missing (`null`) schema means "no parameters". Only the top level is
    /// modelled: nested schemas are kept verbatim in the raw document.
    pub fn from_json_schema(tool: &str, raw: &Value) -> Result<Self, CatalogError> {
        let invalid = |reason: String| CatalogError::InvalidSchema {
            tool: tool.to_string(),
            reason,
        };

        let obj = match raw {
            Value::Null => return Ok(Self::empty()),
            Value::Object(obj) => obj,
            other => return Err(invalid(format!("expected an object, got {}", type_name(other)))),
        };

        if let Some(ty) = obj.get("type") {
            if ty.as_str() != Some("object") {
                return Err(invalid(format!("top-level type must be \"object\", got {ty}")));
            }
        }

        let required: Vec<String> = match obj.get("required") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid(format!("non-string entry in \"required\": {item}")))
                })
                .collect::<Result<_, _>>()?,
            Some(other) => return Err(invalid(format!("\"required\" must be an array, got {other}"))),
        };

        let mut params = Vec::new();
        match obj.get("properties") {
            None | Some(Value::Null) => {}
            Some(Value::Object(props)) => {
                for (name, prop) in props {
                    params.push(ParamSpec {
                        name: name.clone(),
                        kind: property_kind(prop),
                        required: required.contains(name),
                        description: prop
                            .get("description")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    });
                }
            }
            Some(other) => {
                return Err(invalid(format!("\"properties\" must be an object, got {}", type_name(other))))
            }
        }

        // Required names without a property entry still have to be present.
        for name in &required {
            if !params.iter().any(|p| &p.name == name) {
                params.push(ParamSpec {
                    name: name.clone(),
                    kind: ParamKind::Any,
                    required: true,
                    description: None,
                });
            }
        }

        Ok(Self {
            params,
            raw: raw.clone(),
        })
    }

    /// All parameters, in declaration order.
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Look up one parameter.
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Names of required parameters.
    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }

    /// The JSON Schema document, as advertised or as built.
    pub fn as_json(&self) -> &Value {
        &self.raw
    }

    /// Structural check of call arguments.
    ///
    /// Arguments must be an object; required parameters must be present and
    /// non-null; declared parameters must match their kind. Unknown extra
    /// keys are passed through to the tool.
    pub fn validate(&self, tool: &str, arguments: &Value) -> Result<(), CatalogError> {
        let invalid = |reason: String| CatalogError::InvalidArguments {
            tool: tool.to_string(),
            reason,
        };

        let empty = Map::new();
        let args = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(invalid(format!(
                    "arguments must be a JSON object, got {}",
                    type_name(other)
                )))
            }
        };

        for param in &self.params {
            match args.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(invalid(format!("missing required field: '{}'", param.name)));
                }
                None | Some(Value::Null) => {}
                Some(value) if !param.kind.accepts(value) => {
                    return Err(invalid(format!(
                        "field '{}' expects {}, got {}",
                        param.name,
                        param.kind,
                        type_name(value)
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

impl Default for InputSchema {
    fn default() -> Self {
        Self::empty()
    }
}

impl Serialize for InputSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

/// Builder for hand-declared schemas.
#[derive(Debug, Default)]
pub struct InputSchemaBuilder {
    params: Vec<ParamSpec>,
}

impl InputSchemaBuilder {
    /// Add a required parameter.
    pub fn required(self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.param(name, kind, true, description)
    }

    /// Add an optional parameter.
    pub fn optional(self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.param(name, kind, false, description)
    }

    fn param(mut self, name: &str, kind: ParamKind, required: bool, description: &str) -> Self {
        self.params.retain(|p| p.name != name);
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required,
            description: (!description.is_empty()).then(|| description.to_string()),
        });
        self
    }

    /// Finish and render the matching JSON Schema document.
    pub fn build(self) -> InputSchema {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.params {
            let mut prop = Map::new();
            if let Some(ty) = param.kind.as_json_type() {
                prop.insert("type".into(), Value::String(ty.into()));
            }
            if let Some(desc) = &param.description {
                prop.insert("description".into(), Value::String(desc.clone()));
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        InputSchema {
            params: self.params,
            raw: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

fn property_kind(prop: &Value) -> ParamKind {
    match prop.get("type") {
        Some(Value::String(ty)) => ParamKind::from_json_type(ty),
        // `["string", "null"]` style unions: take the first non-null member.
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|ty| *ty != "null")
            .map_or(ParamKind::Any, ParamKind::from_json_type),
        _ => ParamKind::Any,
    }
}

fn type_name(value: &Value) -> &'static str {
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

// ─── ToolDescriptor ──────────────────────────────────────────────────────────

/// Identity, origin, and schema of a single tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub origin: ToolOrigin,
    pub description: String,
    pub input_schema: InputSchema,
}

impl ToolDescriptor {
    /// Describe an in-process tool.
    pub fn local(name: &str, description: &str, input_schema: InputSchema) -> Self {
        Self {
            name: name.to_string(),
            origin: ToolOrigin::Local,
            description: description.to_string(),
            input_schema,
        }
    }

    /// Describe a tool owned by `provider`.
    pub fn remote(provider: &str, name: &str, description: &str, input_schema: InputSchema) -> Self {
        Self {
            name: name.to_string(),
            origin: ToolOrigin::provider(provider),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// Introspection row returned by `list_all`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub origin: ToolOrigin,
    pub description: String,
    pub schema: Value,
}

impl From<&ToolDescriptor> for ToolSummary {
    fn from(d: &ToolDescriptor) -> Self {
        Self {
            name: d.name.clone(),
            origin: d.origin.clone(),
            description: d.description.clone(),
            schema: d.input_schema.as_json().clone(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn add_schema() -> InputSchema {
        InputSchema::builder()
            .required("a", ParamKind::Integer, "first addend")
            .required("b", ParamKind::Integer, "second addend")
            .build()
    }

    #[test]
    fn test_builder_renders_json_schema() {
        let schema = add_schema();
        let raw = schema.as_json();
        assert_eq!(raw["type"], "object");
        assert_eq!(raw["properties"]["a"]["type"], "integer");
        assert_eq!(raw["required"], json!(["a", "b"]));
        assert_eq!(schema.required().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_builder_redeclaring_param_replaces_it() {
        let schema = InputSchema::builder()
            .required("q", ParamKind::String, "")
            .optional("q", ParamKind::Integer, "")
            .build();
        assert_eq!(schema.params().len(), 1);
        assert!(!schema.params()[0].required);
    }

    #[test]
    fn test_parse_provider_schema() {
        let raw = json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "what to look for"},
                "limit": {"type": ["integer", "null"]},
                "filters": {}
            },
            "required": ["query"]
        });
        let schema = InputSchema::from_json_schema("search", &raw).unwrap();
        assert_eq!(schema.param("query").unwrap().kind, ParamKind::String);
        assert!(schema.param("query").unwrap().required);
        assert_eq!(schema.param("limit").unwrap().kind, ParamKind::Integer);
        assert_eq!(schema.param("filters").unwrap().kind, ParamKind::Any);
        assert_eq!(schema.as_json(), &raw);
    }

    #[test]
    fn test_parse_null_schema_is_empty() {
        let schema = InputSchema::from_json_schema("noop", &Value::Null).unwrap();
        assert!(schema.params().is_empty());
        assert!(schema.validate("noop", &json!({"anything": 1})).is_ok());
    }

    #[test]
    fn test_parse_rejects_non_object_schema() {
        let err = InputSchema::from_json_schema("bad", &json!("string")).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidSchema { .. }));

        let err = InputSchema::from_json_schema("bad", &json!({"type": "array"})).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidSchema { .. }));

        let err =
            InputSchema::from_json_schema("bad", &json!({"required": [1, 2]})).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidSchema { .. }));
    }

    #[test]
    fn test_required_without_property_is_tracked() {
        let raw = json!({"type": "object", "required": ["path"]});
        let schema = InputSchema::from_json_schema("read", &raw).unwrap();
        let err = schema.validate("read", &json!({})).unwrap_err();
        assert!(err.to_string().contains("'path'"));
    }

    #[test]
    fn test_validate_accepts_matching_args() {
        assert!(add_schema().validate("add", &json!({"a": 2, "b": 3})).is_ok());
    }

    #[test]
    fn test_validate_missing_required() {
        let err = add_schema().validate("add", &json!({"a": 2})).unwrap_err();
        match err {
            CatalogError::InvalidArguments { tool, reason } => {
                assert_eq!(tool, "add");
                assert!(reason.contains("'b'"));
            }
            other => panic!("expected InvalidArguments, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_wrong_kind() {
        let err = add_schema()
            .validate("add", &json!({"a": "two", "b": 3}))
            .unwrap_err();
        assert!(err.to_string().contains("expects integer, got string"));
    }

    #[test]
    fn test_validate_rejects_non_object_arguments() {
        let err = add_schema().validate("add", &json!([2, 3])).unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));
    }

    #[test]
    fn test_integer_accepts_whole_floats_only() {
        assert!(ParamKind::Integer.accepts(&json!(4.0)));
        assert!(!ParamKind::Integer.accepts(&json!(4.5)));
        assert!(ParamKind::Number.accepts(&json!(4.5)));
    }

    #[test]
    fn test_origin_display_and_serde() {
        assert_eq!(ToolOrigin::Local.to_string(), "local");
        assert_eq!(ToolOrigin::provider("calc").to_string(), "provider 'calc'");
        let json = serde_json::to_value(ToolOrigin::provider("calc")).unwrap();
        assert_eq!(json, json!({"kind": "provider", "provider": "calc"}));
    }
}
