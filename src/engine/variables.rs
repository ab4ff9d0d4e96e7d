/// Variable binding and coercion
use serde_json::{Map, Number, Value};

use crate::error::{kinds, ErrorPayload};
use crate::resource::{MetadataObject, VariableType};

/// Parse a raw command-line value: int, float, bool, JSON, or plain string
pub fn parse_cli_value(raw: &str) -> Value {
    if let Ok(int) = raw.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = raw.parse::<f64>() {
        if let Some(number) = Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if raw.starts_with('{') || raw.starts_with('[') || raw.starts_with('"') {
        if let Ok(value) = serde_json::from_str(raw) {
            return value;
        }
    }
    Value::String(raw.to_string())
}

/// Parse `key=value` pairs from the command line
pub fn parse_cli_bindings(pairs: &[String]) -> Result<Map<String, Value>, String> {
    let mut bindings = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("Invalid variable '{}', expected key=value", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Invalid variable '{}', empty key", pair));
        }
        bindings.insert(key.to_string(), parse_cli_value(value));
    }
    Ok(bindings)
}

/// Resolve the variables a resource is invoked with
///
/// Declared variables take the caller's value, else their default, and are
/// coerced to their declared type. Undeclared caller values pass through.
pub fn resolve_bindings(
    resource: &MetadataObject,
    provided: &Map<String, Value>,
) -> Result<Map<String, Value>, ErrorPayload> {
    let mut bindings = Map::new();

    for (name, spec) in &resource.variables {
        let value = match provided.get(name).or(spec.default.as_ref()) {
            Some(value) => value.clone(),
            None if spec.required => {
                return Err(ErrorPayload::new(
                    kinds::REQUEST_ERROR,
                    format!(
                        "Resource '{}' requires variable '{}', which was not provided",
                        resource.name, name
                    ),
                ));
            }
            None => continue,
        };

        let value = match spec.var_type {
            Some(var_type) => coerce(value, var_type).map_err(|message| {
                ErrorPayload::new(
                    kinds::REQUEST_ERROR,
                    format!("Variable '{}' of '{}': {}", name, resource.name, message),
                )
            })?,
            None => value,
        };
        bindings.insert(name.clone(), value);
    }

    for (name, value) in provided {
        if !bindings.contains_key(name) {
            bindings.insert(name.clone(), value.clone());
        }
    }

    Ok(bindings)
}

/// Coerce a value to a declared variable type
pub fn coerce(value: Value, var_type: VariableType) -> Result<Value, String> {
    match (var_type, value) {
        (VariableType::Str, Value::String(s)) => Ok(Value::String(s)),
        (VariableType::Str, Value::Null) => Err("expected str, got null".to_string()),
        (VariableType::Str, other) => Ok(Value::String(other.to_string())),

        (VariableType::Int, Value::Number(n)) => {
            if let Some(int) = n.as_i64() {
                Ok(Value::from(int))
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Ok(Value::from(f as i64))
                    }
                    _ => Err(format!("expected int, got {}", n)),
                }
            }
        }
        (VariableType::Int, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("expected int, got '{}'", s)),

        (VariableType::Float, Value::Number(n)) => n
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("expected float, got {}", n)),
        (VariableType::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("expected float, got '{}'", s)),

        (VariableType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (VariableType::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err(format!("expected bool, got '{}'", s)),
        },
        (VariableType::Bool, Value::Number(n)) => match n.as_i64() {
            Some(0) => Ok(Value::Bool(false)),
            Some(1) => Ok(Value::Bool(true)),
            _ => Err(format!("expected bool, got {}", n)),
        },

        (VariableType::Dict, Value::Object(map)) => Ok(Value::Object(map)),
        (VariableType::List, Value::Array(items)) => Ok(Value::Array(items)),
        (VariableType::Dict | VariableType::List, Value::String(s)) => {
            let parsed: Value =
                serde_json::from_str(&s).map_err(|e| format!("invalid JSON '{}': {}", s, e))?;
            coerce_structured(parsed, var_type)
        }

        (var_type, other) => Err(format!("expected {}, got {}", type_name(var_type), other)),
    }
}

fn coerce_structured(value: Value, var_type: VariableType) -> Result<Value, String> {
    match (var_type, value) {
        (VariableType::Dict, Value::Object(map)) => Ok(Value::Object(map)),
        (VariableType::List, Value::Array(items)) => Ok(Value::Array(items)),
        (var_type, other) => Err(format!("expected {}, got {}", type_name(var_type), other)),
    }
}

fn type_name(var_type: VariableType) -> &'static str {
    match var_type {
        VariableType::Str => "str",
        VariableType::Bool => "bool",
        VariableType::Int => "int",
        VariableType::Float => "float",
        VariableType::Dict => "dict",
        VariableType::List => "list",
    }
}
