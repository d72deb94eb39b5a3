// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! JSON lines format: one object per record.
//!
//! ```json
//! {"severity":"INFO","msg":"start","count":3,"outer":{"inner":1}}
//! ```
//!
//! Errors are encoded as their message. Values that cannot be encoded are
//! replaced by a `"LOG ERROR: <reason>"` string, so one bad value never costs
//! the rest of the record.

use std::fmt::Write as _;
use std::io;

use serde::Serialize;
use tracing::debug;

use crate::backend::{Formatter, Preformat, StreamWriter};
use crate::config::PipelineConfig;
use crate::entry::{Entry, EntrySource, Preformatted, Value};
use crate::pipeline::{Logger, Pipeline};
use crate::record::Submission;

pub const SEVERITY_KEY: &str = "severity";
pub const MESSAGE_KEY: &str = "msg";

const ERROR_PREFIX: &str = "LOG ERROR: ";

/// Cached object members of a block, each followed by a comma.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonFragment {
    members: Vec<u8>,
}

#[derive(Default)]
struct JsonBuffer {
    data: Vec<u8>,
    scratch: String,
}

impl JsonBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            scratch: String::new(),
        }
    }

    fn start(&mut self) {
        self.data.push(b'{');
    }

    // members end in a comma, which becomes the closing brace
    fn end(&mut self) {
        match self.data.last() {
            Some(b',') => {
                let n = self.data.len() - 1;
                self.data[n] = b'}';
            }
            _ => self.data.push(b'}'),
        }
    }

    fn append_source(&mut self, source: &dyn EntrySource) {
        if let Some(fragment) = source
            .preformatted()
            .and_then(Preformatted::fragment::<JsonFragment>)
        {
            self.data.extend_from_slice(&fragment.members);
            return;
        }

        for entry in &source.entries() {
            self.append_entry(entry);
        }
    }

    fn append_member(&mut self, key: &str, value: &Value) {
        self.encode(key);
        self.data.push(b':');

        match value {
            Value::Block(sub) => {
                self.start();
                self.append_source(sub.as_ref());
                self.end();
            }
            Value::Null => self.data.extend_from_slice(b"null"),
            Value::Bool(v) => self.encode(v),
            Value::I64(v) => self.encode(v),
            Value::U64(v) => self.encode(v),
            Value::F64(v) if v.is_finite() => self.encode(v),
            Value::F64(v) => self.placeholder(&format!("unsupported value: {v}")),
            Value::Str(v) => self.encode(v.as_ref()),
            Value::Error(err) => {
                self.scratch.clear();
                if write!(self.scratch, "{err}").is_ok() {
                    let text = std::mem::take(&mut self.scratch);
                    self.encode(text.as_str());
                    self.scratch = text;
                } else {
                    self.placeholder("error message formatting failed");
                }
            }
            Value::Structured(v) => match v.to_json() {
                Ok(json) => self.encode(&json),
                Err(e) => self.placeholder(&e.to_string()),
            },
        }

        self.data.push(b',');
    }

    fn append_entry(&mut self, entry: &Entry) {
        self.append_member(&entry.key, &entry.value);
    }

    fn encode<T: Serialize + ?Sized>(&mut self, value: &T) {
        let start = self.data.len();
        if let Err(e) = serde_json::to_writer(&mut self.data, value) {
            self.data.truncate(start);
            self.placeholder(&e.to_string());
        }
    }

    fn placeholder(&mut self, reason: &str) {
        debug!("Replacing unencodable log value: {reason}");
        let text = format!("{ERROR_PREFIX}{reason}");
        // a plain string always encodes
        if serde_json::to_writer(&mut self.data, &text).is_err() {
            self.data.extend_from_slice(b"\"LOG ERROR\"");
        }
    }
}

/// Formatter producing JSON lines as raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl JsonFormatter {
    /// Renders a single block as a JSON object, without severity or message.
    #[must_use]
    pub fn render_block(&self, source: &dyn EntrySource) -> Vec<u8> {
        let mut buf = JsonBuffer::default();
        buf.start();
        buf.append_source(source);
        buf.end();
        buf.data
    }
}

impl Preformat for JsonFormatter {
    fn preformat(&self, source: &dyn EntrySource) -> Option<Preformatted> {
        if let Some(pre) = source.preformatted() {
            if pre.fragment::<JsonFragment>().is_some() {
                return Some(pre.clone());
            }
        }

        let entries = source.entries();
        let mut buf = JsonBuffer::default();
        for entry in &entries {
            buf.append_entry(entry);
        }

        Some(Preformatted::new(
            entries,
            JsonFragment { members: buf.data },
        ))
    }
}

impl Formatter for JsonFormatter {
    type Raw = Vec<u8>;

    fn format(&self, submission: &Submission) -> Vec<u8> {
        let mut buf = JsonBuffer::with_capacity(1024);

        buf.start();
        buf.append_member(SEVERITY_KEY, &Value::from(submission.level.as_str()));
        buf.append_member(MESSAGE_KEY, &Value::from(submission.message.clone()));
        for tree in &submission.trees {
            buf.append_source(tree);
        }
        buf.end();
        buf.data.push(b'\n');

        buf.data
    }
}

/// Spawns a pipeline writing JSON lines to `writer`.
#[must_use]
pub fn spawn<W>(writer: StreamWriter<W>, config: &PipelineConfig) -> Logger
where
    W: io::Write + Send + 'static,
{
    Pipeline::spawn(JsonFormatter, writer, config)
}
