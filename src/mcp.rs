use serde_json::Value;

// Prune meta fields before wrapping:
// - When has_more is false/missing: drop has_more and next_cursor.
// - Drop a null rate.
// - Drop meta entirely if it becomes empty.
fn prune_meta(structured: &mut Value) {
    let Some(obj) = structured.as_object_mut() else {
        return;
    };
    let Some(meta_obj) = obj.get_mut("meta").and_then(|m| m.as_object_mut()) else {
        return;
    };

    let has_more = meta_obj
        .get("has_more")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !has_more {
        meta_obj.remove("has_more");
        meta_obj.remove("next_cursor");
    }
    if meta_obj.get("rate").map(Value::is_null).unwrap_or(false) {
        meta_obj.remove("rate");
    }
    if meta_obj.is_empty() {
        obj.remove("meta");
    }
}

/// Build an MCP-compliant result envelope for tools/call outputs.
/// - content: always a single text block so clients can render something.
/// - structuredContent: the full structured JSON shape.
/// - isError: included only when true to keep payloads small.
pub fn mcp_wrap(mut structured: Value, text_opt: Option<String>, is_error: bool) -> Value {
    prune_meta(&mut structured);
    let text = match text_opt {
        Some(s) => s,
        None => serde_json::to_string(&structured).unwrap_or_else(|_| "{}".to_string()),
    };
    let mut obj = serde_json::json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": structured,
    });
    if is_error {
        if let Some(map) = obj.as_object_mut() {
            map.insert("isError".to_string(), Value::Bool(true));
        }
    }
    obj
}

/// Tool-level error result: a textual message plus a structured error shape.
/// `extra` fields are merged alongside `error` (e.g. a resume token).
pub fn mcp_error(code: &str, message: &str, extra: Option<Value>) -> Value {
    let mut structured = serde_json::json!({
        "error": { "code": code, "message": message }
    });
    if let (Some(Value::Object(more)), Some(map)) = (extra, structured.as_object_mut()) {
        for (k, v) in more {
            map.insert(k, v);
        }
    }
    mcp_wrap(structured, Some(message.to_string()), true)
}
