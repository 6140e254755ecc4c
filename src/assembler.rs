//! Reassembles JSON records from raw lines that may arrive in pieces.
//!
//! Producers write one JSON object per line, but a line can be read before it
//! is fully written. A line is taken as the end of a record when it ends in a
//! closing brace (optionally followed by `\r`); anything else is held as a
//! fragment and prepended to the next line. Whitespace is trimmed from a fragment only
//! at physical line boundaries, never where a read cut a line in two, so a
//! split inside a string value keeps its spaces. This framing is an approximation:
//! a partial read that happens to end in `}` closes the record early and the
//! record is reported as malformed.

use crate::error::Error;
use crate::pipeline::Entry;
use crate::reader::RawLine;
use serde_json::Value;

/// Per-file reading progress, the part of a tail the assembler mutates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadProgress {
    /// Bytes fully processed, terminators included.
    pub bytes_consumed: u64,
    /// Text of a record that has not been closed yet.
    pub fragment: String,
    /// The last line pushed had no terminator; the next one continues it.
    pub line_open: bool,
}

impl ReadProgress {
    pub fn starting_at(offset: u64) -> Self {
        Self {
            bytes_consumed: offset,
            fragment: String::new(),
            line_open: false,
        }
    }
}

/// Turns the lines of one file into [`Entry`] values.
#[derive(Debug, Clone)]
pub struct RecordAssembler {
    file_id: String,
    max_fragment_bytes: usize,
}

impl RecordAssembler {
    pub fn new(file_id: impl Into<String>, max_fragment_bytes: usize) -> Self {
        Self {
            file_id: file_id.into(),
            max_fragment_bytes,
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// Feeds one line, advancing `progress.bytes_consumed` by exactly the bytes
    /// the line took in the file.
    ///
    /// Returns `None` while a record is still incomplete, the entry once one
    /// closes, or [`Error::MalformedRecord`] when the closed record does not
    /// parse or an open one outgrows the fragment limit. The offending bytes
    /// count as consumed either way.
    pub fn push(&self, progress: &mut ReadProgress, line: &RawLine) -> Option<Result<Entry, Error>> {
        progress.bytes_consumed += line.consumed_bytes();
        let continues_line = std::mem::replace(&mut progress.line_open, !line.terminated);

        if is_complete(&line.text) {
            let mut raw = std::mem::take(&mut progress.fragment);
            raw.push_str(&line.text);
            return Some(self.parse(&raw));
        }

        let mut piece = line.text.as_str();
        if !continues_line {
            piece = piece.trim_start();
        }
        if line.terminated {
            piece = piece.trim_end();
        }
        progress.fragment.push_str(piece);
        if progress.fragment.len() > self.max_fragment_bytes {
            let dropped = std::mem::take(&mut progress.fragment).len();
            return Some(Err(self.malformed(format!(
                "unterminated record of {dropped} bytes exceeds the {} byte limit",
                self.max_fragment_bytes
            ))));
        }

        None
    }

    fn parse(&self, raw: &str) -> Result<Entry, Error> {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(payload)) => Ok(Entry::new(self.file_id.clone(), payload)),
            Ok(other) => Err(self.malformed(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
            Err(e) => Err(self.malformed(e.to_string())),
        }
    }

    fn malformed(&self, message: String) -> Error {
        Error::MalformedRecord {
            file_id: self.file_id.clone(),
            message,
        }
    }
}

/// Whether `line` closes a record: it ends in `}`, optionally followed by `\r` and/or `\n`.
pub fn is_complete(line: &str) -> bool {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);
    line.ends_with('}')
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
