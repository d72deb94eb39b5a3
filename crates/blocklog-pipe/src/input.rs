// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of JSON input lines into submissions.
//!
//! An input line is a JSON object. `level` (a name or an ordinal) and `msg`
//! (or `message`) become the record header; every other member becomes an
//! entry. Nested objects become nested blocks, arrays become blocks keyed by
//! index. Lines that are not JSON objects are logged verbatim as the message.

use blocklog::{Entries, Entry, EntryTree, Level, Submission, Value};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

const LEVEL_KEYS: [&str; 2] = ["level", "severity"];
const MESSAGE_KEYS: [&str; 2] = ["msg", "message"];

/// Builds a submission from one input line, `None` for blank lines.
pub fn parse_line(line: &str) -> Option<Submission> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<JsonValue>(line) {
        Ok(JsonValue::Object(members)) => Some(from_object(members)),
        Ok(_) => Some(verbatim(line)),
        Err(e) => {
            debug!("Input line is not JSON, logging it verbatim: {e}");
            Some(verbatim(line))
        }
    }
}

fn verbatim(line: &str) -> Submission {
    Submission::capture(Level::Default, line, &[])
}

fn from_object(mut members: Map<String, JsonValue>) -> Submission {
    let level = take_level(&mut members);
    let message = MESSAGE_KEYS
        .iter()
        .find_map(|key| members.remove(*key))
        .map(|msg| match msg {
            JsonValue::String(s) => s,
            other => other.to_string(),
        })
        .unwrap_or_default();

    Submission {
        level,
        message,
        trees: vec![EntryTree::Entries(object_entries(members))],
    }
}

// an unrecognized level stays in the record as an ordinary entry
fn take_level(members: &mut Map<String, JsonValue>) -> Level {
    for key in LEVEL_KEYS {
        let parsed = match members.get(key) {
            Some(JsonValue::String(name)) => name.parse::<Level>().ok(),
            Some(JsonValue::Number(n)) => n
                .as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .and_then(|n| Level::try_from(n).ok()),
            _ => None,
        };
        if let Some(level) = parsed {
            members.remove(key);
            return level;
        }
    }
    Level::Default
}

fn object_entries(members: Map<String, JsonValue>) -> Entries {
    members
        .into_iter()
        .map(|(key, value)| Entry::new(key, to_value(value)))
        .collect()
}

fn to_value(value: JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(v) => Value::Bool(v),
        JsonValue::Number(n) => {
            if let Some(v) = n.as_i64() {
                Value::I64(v)
            } else if let Some(v) = n.as_u64() {
                Value::U64(v)
            } else {
                Value::F64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(s) => Value::from(s),
        JsonValue::Array(items) => Value::from(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| Entry::new(i.to_string(), to_value(item)))
                .collect::<Entries>(),
        ),
        JsonValue::Object(members) => Value::from(object_entries(members)),
    }
}
