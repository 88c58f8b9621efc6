//! Tool input contracts
//!
//! A [`Contract`] lists the fields a tool accepts. [`validate`] checks raw
//! arguments against it, reporting every violation at once, and returns the
//! arguments with defaults filled in. The same contract renders the JSON
//! Schema advertised to callers.

use regex::Regex;
use serde_json::{json, Map, Value};

/// Type and constraints of one field
#[derive(Debug, Clone)]
pub enum FieldType {
    String {
        min_len: Option<usize>,
        max_len: Option<usize>,
        pattern: Option<Regex>,
    },
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Boolean,
    Enum(&'static [&'static str]),
    Object(Vec<FieldSpec>),
    /// Any JSON value
    Any,
}

/// One field of a contract
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
}

impl FieldSpec {
    fn new(name: &'static str, description: &'static str, field_type: FieldType) -> Self {
        FieldSpec {
            name,
            description,
            field_type,
            required: false,
            default: None,
        }
    }

    pub fn string(name: &'static str, description: &'static str) -> Self {
        Self::new(
            name,
            description,
            FieldType::String {
                min_len: None,
                max_len: None,
                pattern: None,
            },
        )
    }

    pub fn integer(name: &'static str, description: &'static str) -> Self {
        Self::new(name, description, FieldType::Integer { min: None, max: None })
    }

    pub fn boolean(name: &'static str, description: &'static str) -> Self {
        Self::new(name, description, FieldType::Boolean)
    }

    pub fn one_of(name: &'static str, description: &'static str, options: &'static [&'static str]) -> Self {
        Self::new(name, description, FieldType::Enum(options))
    }

    pub fn object(name: &'static str, description: &'static str, fields: Vec<FieldSpec>) -> Self {
        Self::new(name, description, FieldType::Object(fields))
    }

    pub fn any(name: &'static str, description: &'static str) -> Self {
        Self::new(name, description, FieldType::Any)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Inclusive bounds for an integer field
    pub fn range(mut self, lo: i64, hi: i64) -> Self {
        if let FieldType::Integer { ref mut min, ref mut max } = self.field_type {
            *min = Some(lo);
            *max = Some(hi);
        }
        self
    }

    pub fn minimum(mut self, lo: i64) -> Self {
        if let FieldType::Integer { ref mut min, .. } = self.field_type {
            *min = Some(lo);
        }
        self
    }

    /// Inclusive length bounds for a string field, in characters
    pub fn length(mut self, lo: usize, hi: usize) -> Self {
        if let FieldType::String { ref mut min_len, ref mut max_len, .. } = self.field_type {
            *min_len = Some(lo);
            *max_len = Some(hi);
        }
        self
    }

    pub fn pattern(mut self, regex: &Regex) -> Self {
        if let FieldType::String { ref mut pattern, .. } = self.field_type {
            *pattern = Some(regex.clone());
        }
        self
    }
}

/// Input contract of one tool
#[derive(Debug, Clone, Default)]
pub struct Contract {
    pub fields: Vec<FieldSpec>,
}

impl Contract {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Contract { fields }
    }

    pub fn empty() -> Self {
        Contract::default()
    }

    /// JSON Schema for this contract
    pub fn json_schema(&self) -> Value {
        object_schema(&self.fields)
    }
}

/// A single violated constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path to the field; empty for the arguments as a whole
    pub path: String,
    pub message: String,
}

/// Every constraint violated by one set of arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub errors: Vec<FieldError>,
}

impl ValidationFailure {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationFailure {
            errors: vec![FieldError {
                path: path.into(),
                message: message.into(),
            }],
        }
    }

    /// Whether a field at `path` was reported
    pub fn has_field(&self, path: &str) -> bool {
        self.errors.iter().any(|e| e.path == path)
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| {
                if e.path.is_empty() {
                    e.message.clone()
                } else {
                    format!("{}: {}", e.path, e.message)
                }
            })
            .collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ValidationFailure {}

/// Check `args` against `contract`.
///
/// `null` is treated as no arguments. Unknown fields are rejected. Optional
/// fields given as `null` count as absent.
pub fn validate(contract: &Contract, args: &Value) -> Result<Map<String, Value>, ValidationFailure> {
    let empty = Map::new();
    let object = match args {
        Value::Null => &empty,
        Value::Object(map) => map,
        _ => return Err(ValidationFailure::single("", "arguments must be an object")),
    };

    let mut errors = Vec::new();
    let normalized = validate_object(&contract.fields, object, "", &mut errors);

    if errors.is_empty() {
        Ok(normalized)
    } else {
        Err(ValidationFailure { errors })
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn validate_object(
    fields: &[FieldSpec],
    object: &Map<String, Value>,
    prefix: &str,
    errors: &mut Vec<FieldError>,
) -> Map<String, Value> {
    let mut normalized = Map::new();

    for key in object.keys() {
        if !fields.iter().any(|f| f.name == key.as_str()) {
            errors.push(FieldError {
                path: join_path(prefix, key),
                message: "unknown field".to_string(),
            });
        }
    }

    for field in fields {
        let path = join_path(prefix, field.name);
        match object.get(field.name).filter(|v| !v.is_null()) {
            None if field.required => errors.push(FieldError {
                path,
                message: "is required".to_string(),
            }),
            None => {
                if let Some(ref default) = field.default {
                    normalized.insert(field.name.to_string(), default.clone());
                }
            }
            Some(value) => {
                if let Some(value) = check_value(&field.field_type, value, &path, errors) {
                    normalized.insert(field.name.to_string(), value);
                }
            }
        }
    }

    normalized
}

fn check_value(
    field_type: &FieldType,
    value: &Value,
    path: &str,
    errors: &mut Vec<FieldError>,
) -> Option<Value> {
    match field_type {
        FieldType::String { min_len, max_len, pattern } => {
            let Some(s) = value.as_str() else {
                return reject(errors, path, "must be a string".to_string());
            };
            let len = s.chars().count();
            if let Some(min) = min_len {
                if len < *min {
                    return reject(errors, path, format!("must be at least {} characters", min));
                }
            }
            if let Some(max) = max_len {
                if len > *max {
                    return reject(errors, path, format!("must be at most {} characters", max));
                }
            }
            if let Some(re) = pattern {
                if !re.is_match(s) {
                    return reject(errors, path, format!("must match pattern {}", re.as_str()));
                }
            }
            Some(value.clone())
        }
        FieldType::Integer { min, max } => {
            let n = match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15).map(|f| f as i64)),
                _ => None,
            };
            let Some(n) = n else {
                return reject(errors, path, "must be an integer".to_string());
            };
            if let Some(min) = min {
                if n < *min {
                    return reject(errors, path, format!("must be >= {}", min));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return reject(errors, path, format!("must be <= {}", max));
                }
            }
            Some(json!(n))
        }
        FieldType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            _ => reject(errors, path, "must be a boolean".to_string()),
        },
        FieldType::Enum(options) => match value.as_str() {
            Some(s) if options.iter().any(|o| *o == s) => Some(value.clone()),
            _ => reject(errors, path, format!("must be one of: {}", options.join(", "))),
        },
        FieldType::Object(fields) => match value.as_object() {
            Some(map) => {
                let before = errors.len();
                let nested = validate_object(fields, map, path, errors);
                (errors.len() == before).then_some(Value::Object(nested))
            }
            None => reject(errors, path, "must be an object".to_string()),
        },
        FieldType::Any => Some(value.clone()),
    }
}

fn reject(errors: &mut Vec<FieldError>, path: &str, message: String) -> Option<Value> {
    errors.push(FieldError {
        path: path.to_string(),
        message,
    });
    None
}

fn object_schema(fields: &[FieldSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for field in fields {
        properties.insert(field.name.to_string(), field_schema(field));
        if field.required {
            required.push(Value::String(field.name.to_string()));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn field_schema(field: &FieldSpec) -> Value {
    let mut schema = match &field.field_type {
        FieldType::String { min_len, max_len, pattern } => {
            let mut s = json!({"type": "string"});
            if let Some(min) = min_len {
                s["minLength"] = json!(min);
            }
            if let Some(max) = max_len {
                s["maxLength"] = json!(max);
            }
            if let Some(re) = pattern {
                s["pattern"] = json!(re.as_str());
            }
            s
        }
        FieldType::Integer { min, max } => {
            let mut s = json!({"type": "integer"});
            if let Some(min) = min {
                s["minimum"] = json!(min);
            }
            if let Some(max) = max {
                s["maximum"] = json!(max);
            }
            s
        }
        FieldType::Boolean => json!({"type": "boolean"}),
        FieldType::Enum(options) => json!({"type": "string", "enum": options}),
        FieldType::Object(fields) => object_schema(fields),
        FieldType::Any => json!({}),
    };

    schema["description"] = json!(field.description);
    if let Some(ref default) = field.default {
        schema["default"] = default.clone();
    }
    schema
}
