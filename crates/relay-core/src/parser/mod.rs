//! Turns raw provider output into an [`AgentResult`].
//!
//! Output arrives as arbitrary byte chunks. [`StreamParser`] buffers the
//! trailing partial line between chunks, so the result never depends on
//! where the pipe happened to split the stream.
//!
//! Rules, in order of precedence at end of stream:
//!
//! 1. A non-zero exit is [`ErrorKind::NonZeroExit`](crate::ErrorKind), even
//!    if a result record was printed.
//! 2. The first `Result` record wins; progress records never override it.
//! 3. No parsable record at all (neither line-by-line nor as one blob) is
//!    [`ErrorKind::ParseFailure`](crate::ErrorKind).
//! 4. Otherwise a best-effort success built from the latest assistant text,
//!    or the raw text of the last non-empty line.

pub mod dialect;

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::ProviderError;
use crate::process::try_parse_json;
use crate::types::{AgentResult, TokenUsage};

pub use dialect::{Dialect, Progress, Record, ResultRecord};

/// CSI / OSC / two-byte escape sequences emitted by terminal UIs.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("valid ANSI escape pattern")
});

/// "Session ID: abc123", "session_id=abc123", "session: abc123" ...
static SESSION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bsession(?:[ _-]?id)?\s*[:=]\s*([A-Za-z0-9][A-Za-z0-9_-]{5,})")
        .expect("valid session marker pattern")
});

/// Incremental parser for one invocation's stdout.
#[derive(Debug)]
pub struct StreamParser {
    dialect: Dialect,
    label: String,
    /// Bytes after the last newline seen so far.
    pending: Vec<u8>,
    /// Everything pushed, for blob fallback and partial-output reporting.
    captured: Vec<u8>,
    records: usize,
    last_line: Option<String>,
    result: Option<ResultRecord>,
    session_id: Option<String>,
    text: String,
    usage: Option<TokenUsage>,
}

impl StreamParser {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            label: "agent".to_string(),
            pending: Vec::new(),
            captured: Vec::new(),
            records: 0,
            last_line: None,
            result: None,
            session_id: None,
            text: String::new(),
            usage: None,
        }
    }

    /// Name used in error messages (usually the provider).
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Feed one chunk. Complete lines are consumed immediately; the
    /// remainder waits for the next chunk or [`finish`](Self::finish).
    pub fn push(&mut self, chunk: &[u8]) {
        self.captured.extend_from_slice(chunk);
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.consume_line(&String::from_utf8_lossy(&line));
        }
    }

    /// Records consumed so far.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Latest session id seen in any record.
    pub fn session_id(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.session_id.as_deref())
            .or(self.session_id.as_deref())
    }

    /// Everything received so far, lossily decoded.
    pub fn captured(&self) -> String {
        String::from_utf8_lossy(&self.captured).into_owned()
    }

    fn consume_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        if self.dialect == Dialect::RawText {
            let clean = strip_ansi(trimmed);
            let clean = clean.trim();
            if clean.is_empty() {
                return;
            }
            self.records += 1;
            if self.session_id.is_none() {
                self.session_id = find_session_marker(clean);
            }
            if !self.text.is_empty() {
                self.text.push('\n');
            }
            self.text.push_str(clean);
            self.last_line = Some(clean.to_string());
            return;
        }

        self.last_line = Some(trimmed.to_string());
        match try_parse_json(trimmed) {
            Some(v) if v.is_object() => {
                self.records += 1;
                let record = self.dialect.classify(&v);
                self.apply(record);
            }
            _ => debug!(label = %self.label, line = trimmed, "skipping unparsable output line"),
        }
    }

    fn apply(&mut self, record: Record) {
        match record {
            Record::Result(r) => {
                if let Some(ref s) = r.session_id {
                    self.session_id = Some(s.clone());
                }
                if let Some(usage) = r.usage {
                    self.usage = Some(usage);
                }
                if self.result.is_none() {
                    self.result = Some(r);
                } else {
                    debug!(label = %self.label, "ignoring additional result record");
                }
            }
            Record::Progress(p) => {
                if let Some(s) = p.session_id {
                    self.session_id = Some(s);
                }
                if let Some(text) = p.text {
                    if p.append {
                        self.text.push_str(&text);
                    } else {
                        self.text = text;
                    }
                }
                if p.usage.is_some() {
                    self.usage = p.usage;
                }
            }
            Record::Ignored => {}
        }
    }

    /// Close the stream and produce the outcome for the given exit code
    /// (`None` = terminated by a signal).
    pub fn finish(mut self, exit_code: Option<i32>) -> Result<AgentResult, ProviderError> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.consume_line(&String::from_utf8_lossy(&rest));
        }

        // A pretty-printed `--output-format json` object spans many lines,
        // none of which parse alone.
        if self.records == 0 && self.dialect != Dialect::RawText {
            let whole = String::from_utf8_lossy(&self.captured).into_owned();
            if let Some(v) = try_parse_json(whole.trim()).filter(|v| v.is_object()) {
                self.records = 1;
                let record = self.dialect.classify(&v);
                self.apply(record);
            }
        }

        if exit_code != Some(0) {
            return Err(ProviderError::non_zero_exit(&self.label, exit_code)
                .with_output(self.captured(), String::new()));
        }

        if let Some(r) = self.result.take() {
            let session_id = r.session_id.or(self.session_id);
            let result = match r.text {
                Some(text) => text,
                None => self.text,
            };
            return Ok(AgentResult {
                success: !r.is_error,
                result,
                cost: r.cost,
                duration_ms: r.duration_ms,
                session_id,
                records: self.records,
                exit_code,
                usage: r.usage.or(self.usage),
            });
        }

        if self.records == 0 {
            let detail = if self.captured.iter().all(u8::is_ascii_whitespace) {
                "no output".to_string()
            } else {
                format!("none of {} output bytes were valid records", self.captured.len())
            };
            return Err(ProviderError::parse_failure(&self.label, &detail)
                .with_output(self.captured(), String::new()));
        }

        debug!(
            label = %self.label,
            records = self.records,
            "no result record, synthesizing best-effort result"
        );
        let result = if self.text.trim().is_empty() {
            self.last_line.unwrap_or_default()
        } else {
            self.text
        };
        Ok(AgentResult {
            success: true,
            result,
            cost: None,
            duration_ms: 0,
            session_id: self.session_id,
            records: self.records,
            exit_code,
            usage: self.usage,
        })
    }
}

/// One-shot form of [`StreamParser`]: feed every chunk, then finish.
pub fn parse_stream<I, C>(
    chunks: I,
    dialect: Dialect,
    exit_code: Option<i32>,
) -> Result<AgentResult, ProviderError>
where
    I: IntoIterator<Item = C>,
    C: AsRef<[u8]>,
{
    let mut parser = StreamParser::new(dialect);
    for chunk in chunks {
        parser.push(chunk.as_ref());
    }
    parser.finish(exit_code)
}

/// Remove terminal escape sequences and stray carriage returns.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").replace('\r', "")
}

/// Find a session identifier announced in terminal output.
pub fn find_session_marker(text: &str) -> Option<String> {
    SESSION_MARKER
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
