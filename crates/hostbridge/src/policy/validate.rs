//! Policy patch merging and validation
//!
//! A patch is a partial policy document. It is checked for shape against the
//! active snapshot first (unknown fields, wrong types), then merged and
//! checked against business rules. Every problem is reported per field.

use chrono::Duration;
use serde_json::{Map, Value};

use crate::error::{BridgeError, FieldError, Result};
use crate::path_policy::{PathFlavor, PathPolicy};
use crate::policy::PolicyConfig;
use crate::redact::Redactor;

/// Smallest timeout the process runner honours
pub const MIN_TIMEOUT_MS: u64 = 100;

/// Longest lifetime for pair codes, pending writes and confirmations
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Longest bearer token lifetime
pub const MAX_TOKEN_TTL_DAYS: u64 = 3650;

/// A configured lifetime in seconds as a duration
pub fn ttl_secs(field: &str, secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .filter(|_| secs <= MAX_TTL_SECS)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| BridgeError::InvalidInput(format!("{} is out of range: {}", field, secs)))
}

/// A configured lifetime in days as a duration
pub fn ttl_days(field: &str, days: u64) -> Result<Duration> {
    i64::try_from(days)
        .ok()
        .filter(|_| days <= MAX_TOKEN_TTL_DAYS)
        .and_then(Duration::try_days)
        .ok_or_else(|| BridgeError::InvalidInput(format!("{} is out of range: {}", field, days)))
}

/// Merge `patch` into `current`, producing a validated new snapshot
pub fn merge_patch(current: &PolicyConfig, patch: &Value) -> Result<PolicyConfig> {
    let base = serde_json::to_value(current)
        .map_err(|e| BridgeError::Internal(format!("policy serialization: {}", e)))?;

    if !patch.is_object() {
        return Err(BridgeError::InvalidPolicy(vec![FieldError::new(
            "",
            "patch must be an object",
        )]));
    }

    let mut errors = Vec::new();
    check_shape(&base, patch, "", &mut errors);
    if !errors.is_empty() {
        return Err(BridgeError::InvalidPolicy(errors));
    }

    let mut merged = base;
    merge_values(&mut merged, patch);

    let next: PolicyConfig = serde_json::from_value(merged)
        .map_err(|e| BridgeError::InvalidPolicy(vec![FieldError::new("", e.to_string())]))?;

    validate(&next)?;
    Ok(next)
}

/// Business rules every active policy must satisfy
pub fn validate(policy: &PolicyConfig) -> Result<()> {
    let mut errors = Vec::new();

    let probe = PolicyConfig {
        roots: Vec::new(),
        ..policy.clone()
    };
    if let Ok(paths) = PathPolicy::with_flavor(&probe, PathFlavor::native()) {
        for (i, root) in policy.roots.iter().enumerate() {
            if let Err(e) = paths.normalize_input_path(root) {
                errors.push(FieldError::new(format!("roots[{}]", i), e.to_string()));
            }
        }
    }

    for (i, pattern) in policy.deny.iter().enumerate() {
        if let Err(e) = glob::Pattern::new(pattern) {
            errors.push(FieldError::new(format!("deny[{}]", i), e.to_string()));
        }
    }

    for (i, site) in policy.sites.iter().enumerate() {
        if site.trim().is_empty() {
            errors.push(FieldError::new(format!("sites[{}]", i), "site must not be empty"));
        }
    }

    if policy.limits.max_file_bytes == 0 {
        errors.push(FieldError::new("limits.max_file_bytes", "must be greater than zero"));
    }
    if policy.limits.max_injected_tokens == 0 {
        errors.push(FieldError::new(
            "limits.max_injected_tokens",
            "must be greater than zero",
        ));
    }
    if policy.limits.max_search_matches == 0 {
        errors.push(FieldError::new(
            "limits.max_search_matches",
            "must be greater than zero",
        ));
    }

    check_range(
        &mut errors,
        "write.pending_ttl_secs",
        policy.write.pending_ttl_secs,
        MAX_TTL_SECS,
    );
    check_range(
        &mut errors,
        "confirmation.ttl_secs",
        policy.confirmation.ttl_secs,
        MAX_TTL_SECS,
    );

    let process = &policy.process;
    if process.max_timeout_ms < MIN_TIMEOUT_MS {
        errors.push(FieldError::new(
            "process.max_timeout_ms",
            format!("must be at least {}", MIN_TIMEOUT_MS),
        ));
    }
    if process.default_timeout_ms < MIN_TIMEOUT_MS
        || process.default_timeout_ms > process.max_timeout_ms
    {
        errors.push(FieldError::new(
            "process.default_timeout_ms",
            format!("must be between {} and process.max_timeout_ms", MIN_TIMEOUT_MS),
        ));
    }
    if process.max_output_bytes == 0 {
        errors.push(FieldError::new("process.max_output_bytes", "must be greater than zero"));
    }
    for (i, command) in process.allowed_commands.iter().enumerate() {
        if command.trim().is_empty() || command.contains(['/', '\\']) {
            errors.push(FieldError::new(
                format!("process.allowed_commands[{}]", i),
                "must be a bare executable name",
            ));
        }
    }
    for (i, name) in process.allowed_env.iter().enumerate() {
        if !is_env_name(name) {
            errors.push(FieldError::new(
                format!("process.allowed_env[{}]", i),
                "not a valid environment variable name",
            ));
        }
    }

    for (i, rule) in policy.redaction.iter().enumerate() {
        if let Err(e) = Redactor::check_rule(rule) {
            errors.push(FieldError::new(format!("redaction[{}].pattern", i), e));
        }
    }

    check_range(
        &mut errors,
        "auth.pair_code_ttl_secs",
        policy.auth.pair_code_ttl_secs,
        MAX_TTL_SECS,
    );
    check_range(
        &mut errors,
        "auth.token_ttl_days",
        policy.auth.token_ttl_days,
        MAX_TOKEN_TTL_DAYS,
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(BridgeError::InvalidPolicy(errors))
    }
}

fn check_range(errors: &mut Vec<FieldError>, field: &str, value: u64, max: u64) {
    if value == 0 || value > max {
        errors.push(FieldError::new(field, format!("must be between 1 and {}", max)));
    }
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn join_field(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Compare the patch against the current document's structure
fn check_shape(base: &Value, patch: &Value, prefix: &str, errors: &mut Vec<FieldError>) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                let field = join_field(prefix, key);
                match base.get(key) {
                    Some(existing) => check_shape(existing, value, &field, errors),
                    None => errors.push(FieldError::new(field, "unknown field")),
                }
            }
        }
        (Value::Null, _) => {}
        (base, patch) if kind(base) != kind(patch) => {
            errors.push(FieldError::new(
                prefix,
                format!("expected {}, got {}", kind(base), kind(patch)),
            ));
        }
        _ => {}
    }
}

fn merge_values(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => merge_objects(base, patch),
        (base, patch) => *base = patch.clone(),
    }
}

fn merge_objects(base: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match base.get_mut(key) {
            Some(existing) => merge_values(existing, value),
            None => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}
