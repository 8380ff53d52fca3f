//! Per-vendor interpretation of JSON output records.
//!
//! Every CLI speaks its own event vocabulary. A [`Dialect`] maps one
//! decoded JSON object onto the small normalized [`Record`] set the
//! [`StreamParser`](super::StreamParser) understands.

use serde_json::Value;
use tracing::debug;

use crate::types::TokenUsage;

/// Output format of a provider process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `claude -p --output-format stream-json` (or `json`).
    Claude,
    /// `codex exec --json`.
    Codex,
    /// `gemini --output-format stream-json` (or `json`).
    Gemini,
    /// Terminal transcript captured from a pseudo-terminal.
    RawText,
}

/// The authoritative end-of-run record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRecord {
    /// Final text. `None` when the vendor only streams text in progress
    /// records and closes with a bare summary.
    pub text: Option<String>,
    pub is_error: bool,
    pub cost: Option<f64>,
    pub duration_ms: u64,
    pub session_id: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Side-channel state carried by non-terminal records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub session_id: Option<String>,
    pub text: Option<String>,
    /// `text` is a delta to append rather than a full replacement.
    pub append: bool,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Result(ResultRecord),
    Progress(Progress),
    Ignored,
}

impl Dialect {
    /// Classify one decoded JSON object.
    pub fn classify(self, v: &Value) -> Record {
        match self {
            Dialect::Claude => classify_claude(v),
            Dialect::Codex => classify_codex(v),
            Dialect::Gemini => classify_gemini(v),
            Dialect::RawText => Record::Ignored,
        }
    }
}

// ---------------------------------------------------------------------------
// Claude
// ---------------------------------------------------------------------------

fn classify_claude(v: &Value) -> Record {
    let event_type = v.get("type").and_then(Value::as_str).unwrap_or("");

    match event_type {
        "result" => {
            let subtype = v.get("subtype").and_then(Value::as_str).unwrap_or("");
            let is_error = v.get("is_error").and_then(Value::as_bool).unwrap_or(false)
                || subtype.starts_with("error");
            Record::Result(ResultRecord {
                text: str_field(v, "result"),
                is_error,
                cost: Some(number_field(v, &["total_cost_usd", "cost_usd", "cost"])),
                duration_ms: number_field(v, &["duration_ms"]) as u64,
                session_id: str_field(v, "session_id"),
                usage: v.get("usage").and_then(usage_from),
            })
        }

        "assistant" => {
            let message = v.get("message");
            let text = message
                .and_then(|m| m.get("content"))
                .and_then(Value::as_array)
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                        .filter_map(|b| b.get("text").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join("")
                })
                .filter(|t| !t.is_empty());
            Record::Progress(Progress {
                session_id: str_field(v, "session_id"),
                text,
                append: false,
                usage: message.and_then(|m| m.get("usage")).and_then(usage_from),
            })
        }

        // "system" (init) and tool events still carry the session id.
        _ => match str_field(v, "session_id") {
            Some(session_id) => Record::Progress(Progress {
                session_id: Some(session_id),
                ..Progress::default()
            }),
            None => {
                debug!(event_type, "ignoring claude event");
                Record::Ignored
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Codex
// ---------------------------------------------------------------------------

fn classify_codex(v: &Value) -> Record {
    let event_type = v.get("type").and_then(Value::as_str).unwrap_or("");

    match event_type {
        "thread.started" => Record::Progress(Progress {
            session_id: str_field(v, "thread_id"),
            ..Progress::default()
        }),

        "item.completed" => {
            let item = v.get("item");
            let item_type = item
                .and_then(|i| i.get("type").or_else(|| i.get("item_type")))
                .and_then(Value::as_str)
                .unwrap_or("");
            if item_type == "agent_message" || item_type == "assistant_message" {
                Record::Progress(Progress {
                    text: item.and_then(|i| str_field(i, "text")),
                    ..Progress::default()
                })
            } else {
                Record::Ignored
            }
        }

        "turn.completed" => Record::Result(ResultRecord {
            usage: v.get("usage").and_then(usage_from),
            ..ResultRecord::default()
        }),

        "turn.failed" => Record::Result(ResultRecord {
            text: v
                .get("error")
                .and_then(|e| str_field(e, "message"))
                .or_else(|| Some("turn failed".to_string())),
            is_error: true,
            ..ResultRecord::default()
        }),

        // Stream-level failure, e.g. a dropped connection.
        "error" => Record::Result(ResultRecord {
            text: str_field(v, "message").or_else(|| Some("codex reported an error".to_string())),
            is_error: true,
            ..ResultRecord::default()
        }),

        other => {
            debug!(event_type = other, "ignoring codex event");
            Record::Ignored
        }
    }
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

fn classify_gemini(v: &Value) -> Record {
    let event_type = v.get("type").and_then(Value::as_str);

    match event_type {
        Some("init") => Record::Progress(Progress {
            session_id: str_field(v, "session_id"),
            ..Progress::default()
        }),

        Some("message") => {
            if v.get("role").and_then(Value::as_str) != Some("assistant") {
                return Record::Ignored;
            }
            Record::Progress(Progress {
                text: str_field(v, "content"),
                append: v.get("delta").and_then(Value::as_bool).unwrap_or(false),
                ..Progress::default()
            })
        }

        Some("result") => {
            let stats = v.get("stats");
            let status = v.get("status").and_then(Value::as_str).unwrap_or("success");
            let error = v.get("error").filter(|e| !e.is_null());
            Record::Result(ResultRecord {
                text: error
                    .and_then(|e| str_field(e, "message"))
                    .or_else(|| str_field(v, "response")),
                is_error: status != "success" || error.is_some(),
                duration_ms: stats.map(|s| number_field(s, &["duration_ms"]) as u64).unwrap_or(0),
                session_id: str_field(v, "session_id"),
                usage: stats.and_then(usage_from),
                ..ResultRecord::default()
            })
        }

        // `--output-format json` prints one object with no `type` field.
        None if v.get("response").is_some() || v.get("error").is_some() => {
            let error = v.get("error").filter(|e| !e.is_null());
            Record::Result(ResultRecord {
                text: error
                    .and_then(|e| str_field(e, "message"))
                    .or_else(|| str_field(v, "response")),
                is_error: error.is_some(),
                session_id: str_field(v, "session_id"),
                usage: v.get("stats").and_then(usage_from),
                ..ResultRecord::default()
            })
        }

        other => {
            debug!(event_type = ?other, "ignoring gemini event");
            Record::Ignored
        }
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

/// First present key, as a number. Missing or non-numeric values are zero:
/// bad metadata must never mask a good result.
fn number_field(v: &Value, keys: &[&str]) -> f64 {
    keys.iter()
        .find_map(|k| v.get(*k))
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .unwrap_or(0.0)
}

fn usage_from(v: &Value) -> Option<TokenUsage> {
    let get = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| v.get(*k))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    let input_tokens = get(&["input_tokens", "prompt_tokens"]);
    let output_tokens = get(&["output_tokens", "candidates_tokens", "completion_tokens"]);
    (input_tokens > 0 || output_tokens > 0).then_some(TokenUsage {
        input_tokens,
        output_tokens,
    })
}
