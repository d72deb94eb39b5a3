// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The contract between the pipeline and a concrete log destination.
//!
//! A backend comes in two halves:
//!
//! - a [`Formatter`], shared by every formatting task, turning a
//!   [`Submission`] into the backend's raw record type;
//! - a [`Writer`], owned exclusively by the write task, committing raw records
//!   in submission order and closing the destination once.
//!
//! Both halves must handle recoverable errors themselves. An error returned by
//! [`Writer::write`] stops the pipeline.

use std::io;

use tracing::debug;

use crate::entry::{EntrySource, Preformatted};
use crate::error::{BackendError, PipelineError};
use crate::pipeline::Logger;
use crate::record::{EntryTree, Submission};

/// Optional preprocessing of entry sources reused across many log calls.
pub trait Preformat: Send + Sync + 'static {
    /// Renders `source` ahead of time. `None` means the backend has no
    /// cached form and the source should be used as is.
    fn preformat(&self, source: &dyn EntrySource) -> Option<Preformatted> {
        let _ = source;
        None
    }
}

/// Formatting half of a backend.
///
/// Called concurrently from many tasks, one per in-flight submission.
pub trait Formatter: Preformat {
    type Raw: Send + 'static;

    fn format(&self, submission: &Submission) -> Self::Raw;
}

/// Writing half of a backend.
pub trait Writer<Raw>: Send + 'static {
    /// Commits one record. Calls never overlap and arrive in submission order.
    fn write(&mut self, raw: Raw) -> Result<(), BackendError>;

    /// Called exactly once, after the last write, including after a write
    /// returned an error.
    ///
    /// Not called when `write` panics: the writer is lost with the write task
    /// and shutdown reports `PipelineError::WriterPanicked`.
    fn close(&mut self) -> Result<(), BackendError>;
}

type CloseFn<W> = Box<dyn FnOnce(W) -> io::Result<()> + Send>;

/// Writes byte records to an [`io::Write`] sink.
///
/// On close the sink is flushed, then handed to the close callback if one was
/// given, or dropped otherwise (which closes files and sockets).
pub struct StreamWriter<W> {
    sink: Option<W>,
    on_close: Option<CloseFn<W>>,
}

impl<W: io::Write + Send + 'static> StreamWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Some(sink),
            on_close: None,
        }
    }

    /// Replaces the default close behavior. Useful for sinks that must stay
    /// open, such as stdout.
    pub fn with_on_close<F>(sink: W, on_close: F) -> Self
    where
        F: FnOnce(W) -> io::Result<()> + Send + 'static,
    {
        Self {
            sink: Some(sink),
            on_close: Some(Box::new(on_close)),
        }
    }
}

impl<W, R> Writer<R> for StreamWriter<W>
where
    W: io::Write + Send + 'static,
    R: AsRef<[u8]> + Send + 'static,
{
    fn write(&mut self, raw: R) -> Result<(), BackendError> {
        let sink = self.sink.as_mut().ok_or(BackendError::Closed)?;
        sink.write_all(raw.as_ref())?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        let mut sink = self.sink.take().ok_or(BackendError::Closed)?;
        sink.flush()?;
        match self.on_close.take() {
            Some(on_close) => on_close(sink).map_err(|e| BackendError::Close(e.to_string())),
            None => {
                drop(sink);
                Ok(())
            }
        }
    }
}

/// Formatter that keeps submissions as they are, for writers that relay
/// them elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Preformat for Passthrough {}

impl Formatter for Passthrough {
    type Raw = Submission;

    fn format(&self, submission: &Submission) -> Submission {
        submission.clone()
    }
}

/// Re-submits records to another [`Logger`], merging all entry trees of a
/// record into a single block.
///
/// Closing does not shut the target down; its owner does that.
pub struct ForwardWriter {
    target: Option<Logger>,
}

impl ForwardWriter {
    #[must_use]
    pub fn new(target: Logger) -> Self {
        Self {
            target: Some(target),
        }
    }
}

impl Writer<Submission> for ForwardWriter {
    fn write(&mut self, raw: Submission) -> Result<(), BackendError> {
        let target = self.target.as_ref().ok_or(BackendError::Closed)?;
        let merged = Submission {
            level: raw.level,
            trees: vec![EntryTree::Entries(raw.flattened())],
            message: raw.message,
        };
        target.submit(merged).map_err(|e| match e {
            PipelineError::Closed => BackendError::Closed,
            other => BackendError::Close(other.to_string()),
        })
    }

    fn close(&mut self) -> Result<(), BackendError> {
        if self.target.take().is_none() {
            return Err(BackendError::Closed);
        }
        debug!("Forward writer released its target");
        Ok(())
    }
}
