//! Hook response rendering.

use crate::engine::EngineResponse;
use crate::{Error, Result};
use serde_json::json;

/// Renders an engine response as hook output JSON.
///
/// # Errors
///
/// Returns an error if the decision cannot be serialized.
pub fn render_response(hook_event_name: &str, response: &EngineResponse) -> Result<String> {
    let (Some(text), Some(decision)) = (&response.text, &response.decision) else {
        return Ok("{}".to_string());
    };
    let entries: Vec<_> = decision
        .entries
        .iter()
        .map(|entry| {
            json!({
                "tier": entry.tier,
                "advice_id": entry.advice_id,
                "source": entry.source,
            })
        })
        .collect();
    let output = json!({
        "hookSpecificOutput": {
            "hookEventName": hook_event_name,
            "additionalContext": text,
        },
        "decision": {
            "id": decision.id,
            "cache": decision.cache,
            "refined": decision.refined,
            "entries": entries,
        },
    });
    serde_json::to_string(&output).map_err(|e| Error::failed("render_hook_response", e))
}
