// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Human readable line format, for stdout and local files.
//!
//! ```text
//! LEVEL  msg
//! key0 - value0
//! key1 - value1
//! key2
//!   subkey0 - subvalue0
//!   subkey1 - subvalue1
//!
//! ```
//!
//! Every record ends with a blank line.

use std::fmt::Write as _;
use std::io;

use crate::backend::{Formatter, Preformat, StreamWriter};
use crate::config::PipelineConfig;
use crate::entry::{Entry, EntrySource, Preformatted};
use crate::pipeline::{Logger, Pipeline};
use crate::record::Submission;

const INDENT: &[u8] = b"  ";
const SEPARATOR: &[u8] = b" - ";
const HEADER_SEPARATOR: &[u8] = b"  ";

/// Placeholder written when a value fails to format.
const FORMAT_ERROR: &[u8] = b"LOG ERROR: value formatting failed";

/// Cached rendering of a block at depth zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineFragment {
    data: Vec<u8>,
    // line end offsets; a spliced block needs every line re-indented
    ends: Vec<usize>,
}

impl LineFragment {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.ends.len()
    }
}

struct LineBuffer {
    data: Vec<u8>,
    ends: Vec<usize>,
    // current indentation
    space: Vec<u8>,
    // scalar rendering, reset per value
    scratch: String,
}

impl LineBuffer {
    /// Sized for most records.
    fn new() -> Self {
        Self {
            data: Vec::with_capacity(1024),
            ends: Vec::with_capacity(16),
            space: Vec::with_capacity(8),
            scratch: String::new(),
        }
    }

    fn append_source(&mut self, source: &dyn EntrySource) {
        if let Some(fragment) = source
            .preformatted()
            .and_then(Preformatted::fragment::<LineFragment>)
        {
            self.append_fragment(fragment);
            return;
        }

        for entry in &source.entries() {
            self.append_entry(entry);
        }
    }

    fn append_fragment(&mut self, fragment: &LineFragment) {
        let mut start = 0;
        for &end in &fragment.ends {
            self.data.extend_from_slice(&self.space);
            self.data.extend_from_slice(&fragment.data[start..end]);
            self.ends.push(self.data.len());
            start = end;
        }
    }

    fn append_entry(&mut self, entry: &Entry) {
        self.data.extend_from_slice(&self.space);
        self.data.extend_from_slice(entry.key.as_bytes());

        match entry.value.as_block() {
            Some(sub) => {
                self.end_line();
                self.space.extend_from_slice(INDENT);
                self.append_source(sub);
                self.space.truncate(self.space.len() - INDENT.len());
            }
            None => {
                self.data.extend_from_slice(SEPARATOR);
                self.scratch.clear();
                if write!(self.scratch, "{}", entry.value).is_ok() {
                    self.data.extend_from_slice(self.scratch.as_bytes());
                } else {
                    self.data.extend_from_slice(FORMAT_ERROR);
                }
                self.end_line();
            }
        }
    }

    fn end_line(&mut self) {
        self.data.push(b'\n');
        self.ends.push(self.data.len());
    }

    fn into_fragment(self) -> LineFragment {
        LineFragment {
            data: self.data,
            ends: self.ends,
        }
    }
}

/// Formatter producing the line format as raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormatter;

impl LineFormatter {
    /// Renders a single block, without header or trailing blank line.
    #[must_use]
    pub fn render_block(&self, source: &dyn EntrySource) -> Vec<u8> {
        let mut buf = LineBuffer::new();
        buf.append_source(source);
        buf.data
    }
}

impl Preformat for LineFormatter {
    fn preformat(&self, source: &dyn EntrySource) -> Option<Preformatted> {
        if let Some(pre) = source.preformatted() {
            if pre.fragment::<LineFragment>().is_some() {
                return Some(pre.clone());
            }
        }

        let entries = source.entries();
        let mut buf = LineBuffer::new();
        for entry in &entries {
            buf.append_entry(entry);
        }

        Some(Preformatted::new(entries, buf.into_fragment()))
    }
}

impl Formatter for LineFormatter {
    type Raw = Vec<u8>;

    fn format(&self, submission: &Submission) -> Vec<u8> {
        let mut buf = LineBuffer::new();

        buf.data.extend_from_slice(submission.level.as_str().as_bytes());
        buf.data.extend_from_slice(HEADER_SEPARATOR);
        buf.data.extend_from_slice(submission.message.as_bytes());
        buf.end_line();

        for tree in &submission.trees {
            buf.append_source(tree);
        }
        buf.data.push(b'\n');

        buf.data
    }
}

/// Spawns a pipeline writing the line format to `writer`.
#[must_use]
pub fn spawn<W>(writer: StreamWriter<W>, config: &PipelineConfig) -> Logger
where
    W: io::Write + Send + 'static,
{
    Pipeline::spawn(LineFormatter, writer, config)
}
