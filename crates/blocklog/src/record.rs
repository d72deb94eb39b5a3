// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Snapshots of log calls, as they travel through the pipeline.

use crate::entry::{Entries, Entry, EntrySource, Preformatted, Value};
use crate::level::Level;

/// Key under which [`crate::Logger::err`] attaches the logged error.
pub const ERROR_KEY: &str = "err";

/// The entry appended by error logging calls.
pub fn err_entry(err: impl std::error::Error + Send + Sync + 'static) -> Entry {
    Entry::new(ERROR_KEY, Value::error(err))
}

/// Immutable snapshot of one caller supplied entry source.
///
/// A preformatted source is kept whole so backends can reuse its cached
/// rendering.
#[derive(Clone, Debug)]
pub enum EntryTree {
    Entries(Entries),
    Preformatted(Preformatted),
}

impl EntryTree {
    /// Collects the entries of `source` now.
    pub fn capture(source: &dyn EntrySource) -> Self {
        match source.preformatted() {
            Some(pre) => EntryTree::Preformatted(pre.clone()),
            None => EntryTree::Entries(source.entries()),
        }
    }
}

impl EntrySource for EntryTree {
    fn entries(&self) -> Entries {
        match self {
            EntryTree::Entries(entries) => entries.clone(),
            EntryTree::Preformatted(pre) => pre.entries(),
        }
    }

    fn preformatted(&self) -> Option<&Preformatted> {
        match self {
            EntryTree::Entries(_) => None,
            EntryTree::Preformatted(pre) => Some(pre),
        }
    }
}

impl From<EntryTree> for Value {
    fn from(tree: EntryTree) -> Self {
        match tree {
            EntryTree::Entries(entries) => entries.into(),
            EntryTree::Preformatted(pre) => pre.into(),
        }
    }
}

/// A single log call: level, message and one tree per entry source.
#[derive(Clone, Debug)]
pub struct Submission {
    pub level: Level,
    pub message: String,
    pub trees: Vec<EntryTree>,
}

impl Submission {
    /// Snapshots `sources` in the order given.
    pub fn capture(level: Level, message: impl Into<String>, sources: &[&dyn EntrySource]) -> Self {
        Self {
            level,
            message: message.into(),
            trees: sources.iter().map(|source| EntryTree::capture(*source)).collect(),
        }
    }

    /// All entries of all trees, concatenated in order.
    #[must_use]
    pub fn flattened(&self) -> Entries {
        self.trees
            .iter()
            .flat_map(|tree| tree.entries().iter().cloned().collect::<Vec<_>>())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries;
    use std::sync::{Arc, Mutex};

    /// Source whose entries change every time they are collected.
    struct Counter(Mutex<u64>);

    impl EntrySource for Counter {
        fn entries(&self) -> Entries {
            let mut n = self.0.lock().expect("lock poisoned");
            *n += 1;
            entries!["calls" => *n]
        }
    }

    #[test]
    fn test_capture_snapshots_sources_in_order() {
        let first = Entry::new("a", 1);
        let second = entries!["b" => 2, "c" => 3];
        let sub = Submission::capture(Level::Info, "msg", &[&first, &second]);

        assert_eq!(sub.trees.len(), 2);
        let keys: Vec<String> = sub
            .flattened()
            .iter()
            .map(|entry| entry.key.to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_capture_is_independent_of_later_source_changes() {
        let counter = Counter(Mutex::new(0));
        let sub = Submission::capture(Level::Debug, "msg", &[&counter]);
        let _ = counter.entries();

        let entries = sub.trees[0].entries();
        assert_eq!(entries[0].value.to_string(), "1");
    }

    #[test]
    fn test_capture_keeps_preformatted_sources() {
        let pre = Arc::new(Preformatted::new(entries!["k" => 1], ()));
        let tree = EntryTree::capture(&pre);
        assert!(matches!(tree, EntryTree::Preformatted(_)));
        assert!(tree.preformatted().is_some());
    }

    #[test]
    fn test_err_entry_uses_reserved_key() {
        let entry = err_entry(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(entry.key, ERROR_KEY);
        assert_eq!(entry.value.to_string(), "boom");
    }
}
