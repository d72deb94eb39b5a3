// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured logging around nested key-value blocks.
//!
//! A log call is a [`Level`], a message and any number of [`EntrySource`]s.
//! Calls go through an ordered asynchronous [`Pipeline`]: entries are
//! collected synchronously, formatting runs concurrently on the tokio runtime,
//! and the backend sees writes in exactly the order the calls were made.
//!
//! ```rust,ignore
//! use blocklog::{entries, line, Entry, Level, PipelineConfig, StreamWriter};
//!
//! let logger = line::spawn(StreamWriter::new(std::io::stderr()), &PipelineConfig::default());
//!
//! // static context, rendered once
//! let ctx = logger.preformat(&entries!["service" => "api", "version" => "1.2.0"]);
//!
//! logger.log(Level::Info, "start", &[&ctx, &Entry::new("count", 3)])?;
//! logger.shutdown().await?;
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod backend;
pub mod config;
pub mod entry;
pub mod error;
pub mod json;
pub mod level;
pub mod line;
pub mod pipeline;
pub mod record;

pub use backend::{ForwardWriter, Formatter, Passthrough, Preformat, StreamWriter, Writer};
pub use config::PipelineConfig;
pub use entry::{Entries, Entry, EntrySource, Preformatted, Structured, Value};
pub use error::{BackendError, ConfigError, PipelineError};
pub use level::Level;
pub use pipeline::{Logger, Pipeline};
pub use record::{err_entry, EntryTree, Submission, ERROR_KEY};
