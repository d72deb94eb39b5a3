// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock sinks and formatters for pipeline tests

use blocklog::{line::LineFormatter, Formatter, Preformat, Submission};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory byte sink that can be inspected while a pipeline owns a clone.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

#[allow(dead_code)]
impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().expect("lock poisoned").clone()).expect("utf8 output")
    }

    pub fn len(&self) -> usize {
        self.0.lock().expect("lock poisoned").len()
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("lock poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Line formatter that sleeps before formatting, a different amount for
/// each message, so formatting tasks finish out of order.
#[allow(dead_code)]
pub struct JitteryLineFormatter;

impl Preformat for JitteryLineFormatter {}

impl Formatter for JitteryLineFormatter {
    type Raw = Vec<u8>;

    fn format(&self, submission: &Submission) -> Vec<u8> {
        let jitter = submission
            .message
            .bytes()
            .fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)))
            % 7;
        std::thread::sleep(Duration::from_millis(jitter));
        LineFormatter.format(submission)
    }
}
