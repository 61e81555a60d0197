// JSON schema helpers and the input validator run before every handler.
//
// Only the subset of JSON Schema that tool definitions actually use is
// enforced: type, properties, required, additionalProperties: false, enum,
// numeric and length bounds, items, and the "email" format.

use crate::error::{ToolError, ToolResult};
use serde_json::{json, Map, Value};

pub fn json_schema_object(properties: Value, required: Vec<&str>) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

pub fn json_schema_string(description: &str) -> Value {
    json!({
        "type": "string",
        "description": description
    })
}

pub fn json_schema_number(description: &str) -> Value {
    json!({
        "type": "number",
        "description": description
    })
}

pub fn json_schema_integer(description: &str, minimum: Option<i64>, maximum: Option<i64>) -> Value {
    let mut schema = json!({
        "type": "integer",
        "description": description
    });
    if let Some(min) = minimum {
        schema["minimum"] = json!(min);
    }
    if let Some(max) = maximum {
        schema["maximum"] = json!(max);
    }
    schema
}

pub fn json_schema_boolean(description: &str) -> Value {
    json!({
        "type": "boolean",
        "description": description
    })
}

pub fn json_schema_array(items: Value, description: &str) -> Value {
    json!({
        "type": "array",
        "items": items,
        "description": description
    })
}

pub fn json_schema_enum(values: &[&str], description: &str) -> Value {
    json!({
        "type": "string",
        "enum": values,
        "description": description
    })
}

/// An object schema with no properties, for tools that take no arguments.
pub fn json_schema_empty() -> Value {
    json_schema_object(json!({}), vec![])
}

/// True when `schema` describes a JSON object, which every tool input must be.
pub fn is_object_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("object")
        && schema
            .get("properties")
            .map(Value::is_object)
            .unwrap_or(true)
}

/// Validate `instance` against `schema`, reporting every violated field.
pub fn validate(schema: &Value, instance: &Value) -> ToolResult<()> {
    let mut violations = Vec::new();
    check(schema, instance, "", &mut violations);

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ToolError::Validation(violations.join("; ")))
    }
}

fn check(schema: &Value, instance: &Value, path: &str, out: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type") {
        let types: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !types.is_empty() && !types.iter().any(|t| matches_type(t, instance)) {
            out.push(format!(
                "{}: expected {}, got {}",
                label(path),
                types.join(" or "),
                type_name(instance)
            ));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(instance) {
            let choices: Vec<String> = allowed.iter().map(Value::to_string).collect();
            out.push(format!(
                "{}: must be one of {}",
                label(path),
                choices.join(", ")
            ));
        }
    }

    match instance {
        Value::Object(fields) => check_object(schema, fields, path, out),
        Value::String(s) => check_string(schema, s, path, out),
        Value::Number(n) => {
            if let Some(value) = n.as_f64() {
                if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
                    if value < min {
                        out.push(format!("{}: must be >= {}", label(path), min));
                    }
                }
                if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
                    if value > max {
                        out.push(format!("{}: must be <= {}", label(path), max));
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
                if (items.len() as u64) < min {
                    out.push(format!("{}: must contain at least {} item(s)", label(path), min));
                }
            }
            if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
                if (items.len() as u64) > max {
                    out.push(format!("{}: must contain at most {} item(s)", label(path), max));
                }
            }
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    check(item_schema, item, &format!("{}[{}]", path, i), out);
                }
            }
        }
        _ => {}
    }
}

fn check_object(
    schema: &Map<String, Value>,
    fields: &Map<String, Value>,
    path: &str,
    out: &mut Vec<String>,
) {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(name) {
                out.push(format!("{}: required field is missing", label(&child(path, name))));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    if let Some(properties) = properties {
        for (name, property_schema) in properties {
            if let Some(value) = fields.get(name) {
                check(property_schema, value, &child(path, name), out);
            }
        }
    }

    if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
        for name in fields.keys() {
            let known = properties.map(|p| p.contains_key(name)).unwrap_or(false);
            if !known {
                out.push(format!("{}: unexpected field", label(&child(path, name))));
            }
        }
    }
}

fn check_string(schema: &Map<String, Value>, s: &str, path: &str, out: &mut Vec<String>) {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if len < min {
            out.push(format!("{}: must be at least {} character(s)", label(path), min));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if len > max {
            out.push(format!("{}: must be at most {} character(s)", label(path), max));
        }
    }
    if schema.get("format").and_then(Value::as_str) == Some("email") && !looks_like_email(s) {
        out.push(format!("{}: must be a valid email address", label(path)));
    }
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && domain.contains('.')
                && !s.contains(char::is_whitespace)
        }
        None => false,
    }
}

fn matches_type(expected: &str, instance: &Value) -> bool {
    match expected {
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "boolean" => instance.is_boolean(),
        "null" => instance.is_null(),
        "number" => instance.is_number(),
        "integer" => match instance {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            _ => false,
        },
        _ => true,
    }
}

fn type_name(instance: &Value) -> &'static str {
    match instance {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn child(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn label(path: &str) -> String {
    if path.is_empty() {
        "arguments".to_string()
    } else {
        format!("`{}`", path)
    }
}
