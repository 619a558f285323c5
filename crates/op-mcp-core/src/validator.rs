//! Argument Validator (component G): compiles each tool's input schema
//! once on first use and reports every offending path with enough detail
//! for an AI client to self-correct.

use crate::error::ValidationIssue;
use jsonschema::Validator;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Caches compiled [`Validator`]s keyed by schema hash so repeated calls
/// to the same tool don't recompile its schema every time.
#[derive(Default)]
pub struct SchemaValidatorCache {
    compiled: RwLock<HashMap<String, Validator>>,
}

impl SchemaValidatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `args` against `schema` (keyed by `schema_hash` for
    /// caching), returning structured issues on failure.
    pub async fn validate(
        &self,
        schema_hash: &str,
        schema: &Value,
        args: &Value,
    ) -> Result<(), Vec<ValidationIssue>> {
        {
            let guard = self.compiled.read().await;
            if let Some(validator) = guard.get(schema_hash) {
                return collect_issues(validator, args);
            }
        }

        let validator = jsonschema::validator_for(schema).unwrap_or_else(|e| {
            tracing::warn!("schema for hash {schema_hash} failed to compile, treating as permissive: {e}");
            jsonschema::validator_for(&serde_json::json!({})).expect("empty schema always compiles")
        });

        let issues = collect_issues(&validator, args);
        self.compiled.write().await.insert(schema_hash.to_string(), validator);
        issues
    }
}

fn collect_issues(validator: &Validator, args: &Value) -> Result<(), Vec<ValidationIssue>> {
    let errors: Vec<ValidationIssue> = validator.iter_errors(args).map(issue_from_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Build a structured [`ValidationIssue`] from a jsonschema error using
/// only its stable `Display` output and JSON pointer, rather than
/// destructuring the error-kind enum, since the latter's shape has
/// shifted across `jsonschema` releases.
fn issue_from_error(error: jsonschema::ValidationError<'_>) -> ValidationIssue {
    let message = error.to_string();
    let path = error.instance_path.to_string();

    let missing_property = extract_quoted_before(&message, "is a required property");
    let expected_type = if message.contains("is not of type") {
        extract_quoted_after(&message, "is not of type")
    } else {
        None
    };
    let allowed_values = if message.contains("is not one of") {
        message
            .split("is not one of")
            .nth(1)
            .and_then(|rest| serde_json::from_str::<Value>(rest.trim()).ok())
            .and_then(|v| v.as_array().cloned())
    } else {
        None
    };

    let keyword = if missing_property.is_some() {
        "required"
    } else if expected_type.is_some() {
        "type"
    } else if allowed_values.is_some() {
        "enum"
    } else {
        "validation"
    }
    .to_string();

    ValidationIssue {
        path: if path.is_empty() { "/".to_string() } else { path },
        keyword,
        message,
        missing_property,
        expected_type,
        allowed_values,
    }
}

fn extract_quoted_before<'a>(haystack: &'a str, marker: &str) -> Option<String> {
    let idx = haystack.find(marker)?;
    let prefix = &haystack[..idx];
    let start = prefix.rfind('"')?;
    let inner = &prefix[..start];
    let end = inner.rfind('"')?;
    Some(prefix[end + 1..start].to_string())
}

fn extract_quoted_after(haystack: &str, marker: &str) -> Option<String> {
    let idx = haystack.find(marker)? + marker.len();
    let rest = &haystack[idx..];
    let start = rest.find('"')?;
    let after = &rest[start + 1..];
    let end = after.find('"')?;
    Some(after[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn valid_args_pass() {
        let cache = SchemaValidatorCache::new();
        let schema = json!({"type": "object", "properties": {"message": {"type": "string"}}, "required": ["message"]});
        let result = cache.validate("h1", &schema, &json!({"message": "hi"})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn missing_required_property_is_reported() {
        let cache = SchemaValidatorCache::new();
        let schema = json!({"type": "object", "properties": {"message": {"type": "string"}}, "required": ["message"]});
        let result = cache.validate("h2", &schema, &json!({})).await;
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].missing_property.as_deref(), Some("message"));
    }

    #[tokio::test]
    async fn compiled_validator_is_reused_across_calls() {
        let cache = SchemaValidatorCache::new();
        let schema = json!({"type": "object"});
        cache.validate("h3", &schema, &json!({})).await.unwrap();
        assert_eq!(cache.compiled.read().await.len(), 1);
        cache.validate("h3", &schema, &json!({})).await.unwrap();
        assert_eq!(cache.compiled.read().await.len(), 1);
    }
}
