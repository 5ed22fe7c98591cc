//! Built-in template pipe functions

// Layer 2: Third-party crate imports
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

pub(super) type PipeFunction = fn(Value) -> Result<Value, String>;

/// Look up a pipe function by name
pub(super) fn lookup(name: &str) -> Option<(&'static str, PipeFunction)> {
    match name {
        "urlenc" => Some(("urlenc", urlenc)),
        "b64enc" => Some(("b64enc", b64enc)),
        "b64dec" => Some(("b64dec", b64dec)),
        "json" => Some(("json", json)),
        "upper" => Some(("upper", upper)),
        "lower" => Some(("lower", lower)),
        "trim" => Some(("trim", trim)),
        _ => None,
    }
}

fn as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn urlenc(value: Value) -> Result<Value, String> {
    Ok(Value::String(
        urlencoding::encode(&as_string(&value)).into_owned(),
    ))
}

fn b64enc(value: Value) -> Result<Value, String> {
    Ok(Value::String(STANDARD.encode(as_string(&value))))
}

fn b64dec(value: Value) -> Result<Value, String> {
    let decoded = STANDARD
        .decode(as_string(&value))
        .map_err(|e| format!("invalid base64: {e}"))?;
    String::from_utf8(decoded)
        .map(Value::String)
        .map_err(|e| format!("decoded value is not valid UTF-8: {e}"))
}

fn json(value: Value) -> Result<Value, String> {
    serde_json::to_string(&value)
        .map(Value::String)
        .map_err(|e| format!("serialization failed: {e}"))
}

fn upper(value: Value) -> Result<Value, String> {
    Ok(Value::String(as_string(&value).to_uppercase()))
}

fn lower(value: Value) -> Result<Value, String> {
    Ok(Value::String(as_string(&value).to_lowercase()))
}

fn trim(value: Value) -> Result<Value, String> {
    Ok(Value::String(as_string(&value).trim().to_string()))
}
