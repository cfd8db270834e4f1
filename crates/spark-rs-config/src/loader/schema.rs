//! Schema validation helpers for spark JSON5 configuration.

use crate::ConfigError;
use serde_json::{Map, Value};

/// Validate a single config layer against the schema.
pub(super) fn validate_layer_schema(value: &Value, layer: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, "")?;
    let allowed = [
        "$schema",
        "batch",
        "similarity",
        "lock",
        "topics",
        "provider",
        "store",
        "cache",
        "milestones",
    ];
    ensure_allowed_keys(map, &allowed, layer, "")?;

    if let Some(value) = map.get("$schema") {
        expect_string(value, layer, "$schema")?;
    }
    if let Some(value) = map.get("batch") {
        validate_batch(value, layer, "batch")?;
    }
    if let Some(value) = map.get("similarity") {
        validate_similarity(value, layer, "similarity")?;
    }
    if let Some(value) = map.get("lock") {
        validate_lock(value, layer, "lock")?;
    }
    if let Some(value) = map.get("topics") {
        validate_topics(value, layer, "topics")?;
    }
    if let Some(value) = map.get("provider") {
        validate_provider(value, layer, "provider")?;
    }
    if let Some(value) = map.get("store") {
        validate_path_section(value, layer, "store")?;
    }
    if let Some(value) = map.get("cache") {
        validate_path_section(value, layer, "cache")?;
    }
    if let Some(value) = map.get("milestones") {
        validate_milestones(value, layer, "milestones")?;
    }

    Ok(())
}

/// Validate the "batch" block.
fn validate_batch(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["size", "max_attempts_per_slot"], layer, path)?;
    if let Some(value) = map.get("size") {
        expect_u64(value, layer, &join_path(path, "size"))?;
    }
    if let Some(value) = map.get("max_attempts_per_slot") {
        expect_u64(value, layer, &join_path(path, "max_attempts_per_slot"))?;
    }
    Ok(())
}

/// Validate the "similarity" block.
fn validate_similarity(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["threshold"], layer, path)?;
    if let Some(value) = map.get("threshold") {
        expect_f64(value, layer, &join_path(path, "threshold"))?;
    }
    Ok(())
}

/// Validate the "lock" block.
fn validate_lock(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["stale_after_secs"], layer, path)?;
    if let Some(value) = map.get("stale_after_secs") {
        expect_u64(value, layer, &join_path(path, "stale_after_secs"))?;
    }
    Ok(())
}

/// Validate the "topics" block.
fn validate_topics(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &["vocabulary", "exploration_rate", "max_exploration_topics"],
        layer,
        path,
    )?;
    if let Some(value) = map.get("vocabulary") {
        validate_string_array(value, layer, &join_path(path, "vocabulary"))?;
    }
    if let Some(value) = map.get("exploration_rate") {
        expect_f64(value, layer, &join_path(path, "exploration_rate"))?;
    }
    if let Some(value) = map.get("max_exploration_topics") {
        expect_u64(value, layer, &join_path(path, "max_exploration_topics"))?;
    }
    Ok(())
}

/// Validate the "provider" block.
fn validate_provider(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    let strings = [
        "base_url",
        "api_key_env",
        "chat_model",
        "embedding_model",
    ];
    let integers = [
        "embedding_dimensions",
        "request_timeout_secs",
        "max_retries",
        "base_backoff_ms",
        "max_backoff_ms",
    ];
    let allowed: Vec<&str> = strings
        .iter()
        .chain(integers.iter())
        .copied()
        .chain(std::iter::once("temperature"))
        .collect();
    ensure_allowed_keys(map, &allowed, layer, path)?;

    for key in strings {
        if let Some(value) = map.get(key) {
            expect_string(value, layer, &join_path(path, key))?;
        }
    }
    for key in integers {
        if let Some(value) = map.get(key) {
            expect_u64(value, layer, &join_path(path, key))?;
        }
    }
    if let Some(value) = map.get("temperature") {
        expect_f64(value, layer, &join_path(path, "temperature"))?;
    }
    Ok(())
}

/// Validate a block holding only an optional path ("store", "cache").
fn validate_path_section(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["path"], layer, path)?;
    if let Some(value) = map.get("path").filter(|value| !value.is_null()) {
        expect_string(value, layer, &join_path(path, "path"))?;
    }
    Ok(())
}

/// Validate the "milestones" block.
fn validate_milestones(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["positive_reaction_thresholds"], layer, path)?;
    if let Some(value) = map.get("positive_reaction_thresholds") {
        let key_path = join_path(path, "positive_reaction_thresholds");
        let arr = expect_array(value, layer, &key_path)?;
        for (idx, entry) in arr.iter().enumerate() {
            expect_u64(entry, layer, &format!("{key_path}[{idx}]"))?;
        }
    }
    Ok(())
}

/// Expect a JSON object or return a typed error.
fn expect_object<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(invalid_field(layer, path, "expected object")),
    }
}

/// Expect a JSON array or return a typed error.
fn expect_array<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Vec<Value>, ConfigError> {
    match value {
        Value::Array(arr) => Ok(arr),
        _ => Err(invalid_field(layer, path, "expected array")),
    }
}

/// Expect a JSON string or return a typed error.
fn expect_string(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.as_str().is_some() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected string"))
    }
}

/// Expect a JSON integer or return a typed error.
fn expect_u64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_u64() || value.is_i64() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected integer"))
    }
}

/// Expect a JSON number or return a typed error.
fn expect_f64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_f64() || value.is_u64() || value.is_i64() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected number"))
    }
}

/// Validate that a value is an array of strings.
fn validate_string_array(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let arr = expect_array(value, layer, path)?;
    for (idx, entry) in arr.iter().enumerate() {
        if entry.as_str().is_none() {
            return Err(invalid_field(
                layer,
                &format!("{path}[{idx}]"),
                "expected string",
            ));
        }
    }
    Ok(())
}

/// Ensure an object contains only allowed keys.
fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(invalid_field(layer, &join_path(path, key), "unknown key"));
        }
    }
    Ok(())
}

/// Join nested paths for better error messages.
fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Build a structured invalid-field error.
fn invalid_field(layer: &str, path: &str, message: &str) -> ConfigError {
    let normalized_path = if path.is_empty() { "root" } else { path };
    ConfigError::InvalidField {
        path: format!("{layer}:{normalized_path}"),
        message: message.to_string(),
    }
}
