//! `get_help` content (component H, out-of-scope per spec §1 beyond the
//! dispatch and one worked topic). The full topic corpus is intentionally
//! not built out here; this is the ambient runnable surface SPEC_FULL.md
//! calls for.

use serde_json::{json, Value};

const TOPICS: &[(&str, &str)] = &[
    (
        "overview",
        "This gateway aggregates upstream MCP servers behind seven meta-tools: \
         list_tool_packages, list_tools, use_tool, multi_use_tool, authenticate, \
         health_check_all, and get_help. Start with list_tool_packages to see what's \
         configured, then list_tools(package_id) to see what a package can do.",
    ),
    (
        "error_handling",
        "Errors carry a numeric `code` (JSON-RPC compatible) and a human `message`. \
         PACKAGE_NOT_FOUND and TOOL_NOT_FOUND mean the id is wrong or stale — re-run \
         list_tool_packages/list_tools. AUTH_REQUIRED means the package needs \
         authenticate() first. DOWNSTREAM_ERROR wraps whatever the upstream tool itself \
         returned.",
    ),
    (
        "authentication",
        "Packages with oauth:true require authenticate(package_id) once per machine. \
         The call opens a browser for sign-in and returns once the authorization code \
         has been exchanged for tokens, which are then cached on disk.",
    ),
    (
        "multi_use_tool",
        "multi_use_tool runs several tool calls in parallel and returns results in the \
         same order as the input requests, regardless of completion order. Each request \
         can succeed or fail independently; a batch-level timeout_ms bounds total wait.",
    ),
];

/// Render help content for `topic`, or the topic index if absent/unknown.
pub fn get_help(topic: Option<&str>) -> Value {
    match topic.and_then(|t| TOPICS.iter().find(|(name, _)| *name == t)) {
        Some((name, body)) => json!({"topic": name, "content": body}),
        None => json!({
            "topics": TOPICS.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            "content": "Specify a topic, e.g. get_help(topic: \"error_handling\")."
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_topic_returns_its_content() {
        let result = get_help(Some("error_handling"));
        assert_eq!(result["topic"], "error_handling");
    }

    #[test]
    fn unknown_topic_returns_index() {
        let result = get_help(Some("not-a-topic"));
        assert!(result["topics"].is_array());
    }

    #[test]
    fn no_topic_returns_index() {
        let result = get_help(None);
        assert!(result["topics"].is_array());
    }
}
