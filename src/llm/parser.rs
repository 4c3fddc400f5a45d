//! Parser for the text-based action grammar the reasoning loop imposes on the
//! model's output:
//!
//! ```text
//! Thought: [reasoning]
//! Action: [skill name]
//! Arguments: [JSON object]
//! ```
//!
//! Small local models routinely emit malformed structured output, so every
//! parse path degrades instead of failing: missing or broken `Arguments:`
//! becomes an empty object and an unusable directive falls through to
//! final-answer handling.

use serde_json::{Map, Value};

pub const FINAL_ANSWER_MARKER: &str = "Final Answer:";

#[derive(Clone, Debug, PartialEq)]
pub struct Directive {
    pub action: String,
    pub arguments: Map<String, Value>,
}

/// Whether the output asks for a skill call at all. Case-insensitive, matching
/// the marker anywhere in the text.
pub fn contains_action(output: &str) -> bool {
    output.to_lowercase().contains("action:")
}

/// Extract the action directive from a model output. Scans lines for
/// `action:` and `arguments:` markers and takes everything after the first
/// colon on each. Returns `None` when no usable action name is present.
pub fn parse_directive(output: &str) -> Option<Directive> {
    let mut action = String::new();
    let mut args_str = "{}".to_string();

    for line in output.lines() {
        let lower = line.to_lowercase();
        if let Some(pos) = lower.find("action:") {
            action = line[pos + "action:".len()..].trim().to_string();
        }
        if let Some(pos) = lower.find("arguments:") {
            args_str = line[pos + "arguments:".len()..].trim().to_string();
        }
    }

    if action.is_empty() {
        return None;
    }

    let arguments = match serde_json::from_str::<Value>(&args_str) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };

    Some(Directive { action, arguments })
}

/// Extract the final answer from a model output: everything after the last
/// `Final Answer:` marker, or the whole trimmed text when no marker exists.
pub fn extract_final_answer(output: &str) -> String {
    match output.rfind(FINAL_ANSWER_MARKER) {
        Some(pos) => output[pos + FINAL_ANSWER_MARKER.len()..].trim().to_string(),
        None => output.trim().to_string(),
    }
}
