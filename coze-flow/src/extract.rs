//! Locating the generated prompt inside Coze responses.
//!
//! The workflow service does not return one stable shape: the trigger call,
//! the status call and partial failures each put the text somewhere else,
//! sometimes as a JSON document serialized into a string. Extraction tries a
//! fixed sequence of strategies and the first hit wins. Nothing in here
//! performs I/O or panics on odd input.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use crate::types::{ExecutionHandle, ExtractedPrompt, is_truthy, non_empty_str};

/// Nesting limit for the recursive key search.
pub const MAX_SEARCH_DEPTH: usize = 32;

static OUTPUT_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""output":"([^"]+)""#).expect("Invalid regex"));

static NESTED_OUTPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""output"\s*:\s*"([^"]*(?:\\.[^"]*)*)""#).expect("Invalid regex")
});

/// Which keys the recursive search accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// First look at a trigger response: `output`, `msg`, `result`, `detail`.
    Trigger,
    /// Status responses: `output` only.
    Poll,
}

impl ExtractMode {
    fn accepts(self, key: &str) -> bool {
        match self {
            ExtractMode::Trigger => matches!(key, "output" | "msg" | "result" | "detail"),
            ExtractMode::Poll => key == "output",
        }
    }
}

/// The shape a payload presents to the extractor.
enum Payload<'a> {
    /// `payload.data` is a string, possibly serialized JSON.
    DataText(&'a str),
    /// `payload.data` is present and not a string.
    DataValue(&'a Value),
    /// The payload itself is a string.
    Text(&'a str),
    /// Anything else: walk the object graph.
    Graph(&'a Value),
}

impl<'a> Payload<'a> {
    fn of(payload: &'a Value) -> Self {
        if let Some(data) = payload.get("data").filter(|d| is_truthy(d)) {
            return match data {
                Value::String(text) => Payload::DataText(text),
                other => Payload::DataValue(other),
            };
        }
        match payload {
            Value::String(text) => Payload::Text(text),
            other => Payload::Graph(other),
        }
    }
}

/// Run the extraction strategies and normalize the hit.
pub fn extract_output(payload: &Value, mode: ExtractMode) -> Option<ExtractedPrompt> {
    locate(payload, mode, 0).and_then(|raw| normalize(&raw))
}

fn locate(payload: &Value, mode: ExtractMode, depth: usize) -> Option<String> {
    if depth > MAX_SEARCH_DEPTH {
        return None;
    }

    match Payload::of(payload) {
        Payload::DataText(text) => {
            let direct = match serde_json::from_str::<Value>(text) {
                Ok(parsed) => output_field(&parsed),
                Err(_) => regex_output(text),
            };
            direct.or_else(|| search_graph(payload, mode, depth))
        }
        Payload::DataValue(data) => {
            output_field(data).or_else(|| search_graph(payload, mode, depth))
        }
        Payload::Text(text) => match serde_json::from_str::<Value>(text) {
            Ok(parsed) => locate(&parsed, mode, depth + 1),
            Err(_) => regex_output(text).or_else(|| {
                (text.trim().chars().count() > 10).then(|| text.to_string())
            }),
        },
        Payload::Graph(value) => search_graph(value, mode, depth),
    }
}

fn output_field(value: &Value) -> Option<String> {
    non_empty_str(&value["output"]).map(str::to_string)
}

fn regex_output(text: &str) -> Option<String> {
    OUTPUT_FIELD
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Pre-order depth-first search in key order for an accepted key holding a
/// non-blank string.
fn search_graph(value: &Value, mode: ExtractMode, depth: usize) -> Option<String> {
    if depth > MAX_SEARCH_DEPTH {
        return None;
    }

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if mode.accepts(key) {
                    if let Some(text) = child.as_str().filter(|s| !s.trim().is_empty()) {
                        return Some(text.to_string());
                    }
                }
                if child.is_object() || child.is_array() {
                    if let Some(found) = search_graph(child, mode, depth + 1) {
                        return Some(found);
                    }
                }
            }
            None
        }
        Value::Array(items) => items
            .iter()
            .filter(|child| child.is_object() || child.is_array())
            .find_map(|child| search_graph(child, mode, depth + 1)),
        _ => None,
    }
}

/// Unwrap a leftover `"output": "..."` fragment, unescape and trim.
pub fn normalize(raw: &str) -> Option<ExtractedPrompt> {
    let inner = NESTED_OUTPUT
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map_or(raw, |m| m.as_str());

    ExtractedPrompt::new(unescape(inner))
}

/// Replace literal `\n`, `\t`, `\"` and `\\`, in that order.
pub fn unescape(text: &str) -> String {
    text.replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
}

/// How one status response reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollReading {
    Prompt(ExtractedPrompt),
    /// Reported success but carried no usable text.
    EmptySuccess,
    Running,
    /// `status == "failed"`, with the upstream `error_message` if any.
    Failed(Option<String>),
    /// Some other status; the run is abandoned.
    Unrecognized(Option<String>),
}

/// Interpret a status response body.
pub fn read_poll_response(payload: &Value) -> PollReading {
    let (mut workflow_data, mut extracted) = match payload {
        Value::String(text) => {
            let found = match serde_json::from_str::<Value>(text) {
                Ok(parsed) => output_field(&parsed),
                Err(_) => regex_output(text),
            };
            match found {
                Some(found) => (json!({ "status": "success", "data": found }), Some(found)),
                None => (payload.clone(), None),
            }
        }
        Value::Array(items) => {
            let first = items.first().cloned().unwrap_or(Value::Null);
            let found = output_field(&first);
            (first, found)
        }
        other => {
            let found = output_field(other).or_else(|| output_field(&other["data"]));
            (other.clone(), found)
        }
    };

    if extracted.is_none() {
        if let Some(found) = search_graph(payload, ExtractMode::Poll, 0) {
            workflow_data = json!({ "status": "success", "data": found });
            extracted = Some(found);
        }
    }

    let status = workflow_data["status"].as_str();
    if status == Some("success") || extracted.is_some() {
        let raw = extracted.or_else(|| workflow_data["data"].as_str().map(str::to_string));
        return match raw.as_deref().and_then(normalize) {
            Some(prompt) => PollReading::Prompt(prompt),
            None => PollReading::EmptySuccess,
        };
    }

    let error_message = non_empty_str(&workflow_data["error_message"]).map(str::to_string);
    match status {
        Some("running") => PollReading::Running,
        Some("failed") => PollReading::Failed(error_message),
        _ => PollReading::Unrecognized(error_message),
    }
}

/// Candidate locations of the execution id in a trigger result, in order.
const EXECUTE_ID_PATHS: &[&[&str]] = &[
    &["executeId"],
    &["execute_id"],
    &["id"],
    &["data", "executeId"],
    &["data", "execute_id"],
    &["data", "id"],
    &["data", "data", "executeId"],
    &["data", "data", "execute_id"],
    &["data", "data", "id"],
    &["result", "executeId"],
    &["result", "execute_id"],
    &["result", "id"],
    &["response", "executeId"],
    &["response", "execute_id"],
    &["response", "id"],
    &["success", "data", "executeId"],
    &["success", "data", "execute_id"],
    &["success", "data", "id"],
];

/// Derive the execution handle from a serialized trigger result.
pub fn find_execute_id(trigger: &Value) -> Option<ExecutionHandle> {
    let direct = EXECUTE_ID_PATHS.iter().find_map(|path| {
        path.iter()
            .try_fold(trigger, |node, key| node.get(*key))
            .and_then(non_empty_str)
    });
    if let Some(id) = direct {
        return Some(ExecutionHandle::new(id));
    }

    let text = trigger.get("data")?.as_str()?;
    let parsed: Value = serde_json::from_str(text).ok()?;
    ["executeId", "execute_id", "id"]
        .iter()
        .find_map(|key| non_empty_str(&parsed[*key]))
        .map(ExecutionHandle::new)
}
