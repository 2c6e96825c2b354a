use super::*;

/// One model-requested call before it is resolved against the tool set.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct ToolCall {
    pub(super) id: Option<String>,
    pub(super) name: String,
    pub(super) arguments: Value,
}

impl ToolCall {
    /// Assistant-message shape replayed to the model on the next step.
    pub(super) fn to_payload(&self, id: &str) -> Value {
        json!({
            "id": id,
            "type": "function",
            "function": {
                "name": self.name,
                "arguments": self.arguments.to_string(),
            }
        })
    }
}

fn tool_call_block_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        compile_regex(
            r"(?is)<tool_call\b[^>]*>(?P<payload>.*?)</tool_call\s*>",
            "tool_call_block",
        )
    })
    .as_ref()
}

fn tool_tag_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| compile_regex(r"(?is)</?tool_call\b[^>]*>", "tool_call_tag"))
        .as_ref()
}

fn find_json_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    for (index, &ch) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escape {
                escape = false;
            } else if ch == b'\\' {
                escape = true;
            } else if ch == b'"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(ch),
            b'}' | b']' => {
                let opening = stack.pop()?;
                if (opening == b'{') != (ch == b'}') {
                    return None;
                }
                if stack.is_empty() {
                    return Some(index + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_json_values(payload: &str) -> Vec<Value> {
    let bytes = payload.as_bytes();
    let mut values = Vec::new();
    let mut index = 0usize;
    while index < bytes.len() {
        if bytes[index] != b'{' && bytes[index] != b'[' {
            index += 1;
            continue;
        }
        let parsed = find_json_end(payload, index).and_then(|end| {
            payload
                .get(index..end)
                .and_then(|candidate| serde_json::from_str::<Value>(candidate).ok())
                .map(|value| (end, value))
        });
        match parsed {
            Some((end, value)) => {
                values.push(value);
                index = end;
            }
            None => index += 1,
        }
    }
    values
}

fn extract_tool_call_id(map: &Map<String, Value>) -> Option<String> {
    for key in ["id", "tool_call_id", "toolCallId", "call_id"] {
        let text = match map.get(key) {
            Some(Value::String(text)) => text.trim().to_string(),
            Some(Value::Number(num)) => num.to_string(),
            _ => continue,
        };
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

fn normalize_tool_call_with_id(
    map: &Map<String, Value>,
    id_override: Option<String>,
) -> Option<ToolCall> {
    let has_args = ["arguments", "args", "parameters", "input"]
        .iter()
        .any(|key| map.contains_key(*key));
    if !has_args {
        return None;
    }
    let name = map
        .get("name")
        .or_else(|| map.get("tool"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())?
        .to_string();
    let args_value = map
        .get("arguments")
        .or_else(|| map.get("args"))
        .or_else(|| map.get("parameters"))
        .or_else(|| map.get("input"))
        .cloned()
        .unwrap_or(Value::Null);
    let arguments = match args_value {
        Value::Null => json!({}),
        Value::String(text) if text.trim().is_empty() => json!({}),
        Value::String(text) => {
            serde_json::from_str::<Value>(&text).unwrap_or_else(|_| json!({ "raw": text }))
        }
        other => other,
    };
    Some(ToolCall {
        id: id_override.or_else(|| extract_tool_call_id(map)),
        name,
        arguments,
    })
}

fn collect_tool_calls_from_value(value: &Value, calls: &mut Vec<ToolCall>) {
    match value {
        Value::Object(map) => {
            if let Some(call) = normalize_tool_call_with_id(map, None) {
                calls.push(call);
            } else if let Some(function) = map.get("function").and_then(Value::as_object) {
                if let Some(call) = normalize_tool_call_with_id(function, extract_tool_call_id(map))
                {
                    calls.push(call);
                }
            }
            for key in ["tool_calls", "toolCalls", "function_call"] {
                if let Some(inner) = map.get(key) {
                    collect_tool_calls_from_value(inner, calls);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_tool_calls_from_value(item, calls);
            }
        }
        _ => {}
    }
}

/// Parses `<tool_call>{...}</tool_call>` blocks. Bare JSON in prose is ignored,
/// since generated file content routinely contains JSON.
fn parse_tool_calls_from_text(content: &str) -> Vec<ToolCall> {
    let Some(regex) = tool_call_block_regex() else {
        return Vec::new();
    };
    let mut calls = Vec::new();
    for captures in regex.captures_iter(content) {
        let payload = captures.name("payload").map(|m| m.as_str()).unwrap_or("");
        for value in extract_json_values(payload) {
            collect_tool_calls_from_value(&value, &mut calls);
        }
    }
    calls
}

/// A stream can repeat a native call under the same id; that call runs once.
/// Calls without an id are kept as issued, identical or not.
fn dedupe_native_ids(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .filter(|call| match call.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => seen.insert(id.to_string()),
            None => true,
        })
        .collect()
}

/// Native tool-call payloads win; tagged text is the fallback for models
/// that write calls inline.
pub(super) fn collect_tool_calls_from_output(
    content: &str,
    tool_calls_payload: Option<&Value>,
) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    if let Some(payload) = tool_calls_payload {
        collect_tool_calls_from_value(payload, &mut calls);
    }
    if calls.is_empty() {
        return parse_tool_calls_from_text(content);
    }
    dedupe_native_ids(calls)
}

pub(super) fn strip_tool_calls(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }
    let mut stripped = content.to_string();
    if let Some(regex) = tool_call_block_regex() {
        stripped = regex.replace_all(&stripped, "").to_string();
    }
    if let Some(regex) = tool_tag_regex() {
        stripped = regex.replace_all(&stripped, "").to_string();
    }
    stripped.trim().to_string()
}

pub(super) fn compile_regex(pattern: &str, label: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(err) => {
            error!("invalid orchestrator regex {label}: {err}");
            None
        }
    }
}
