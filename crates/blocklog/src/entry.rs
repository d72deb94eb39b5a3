// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Key-value entries and the sources that produce them.
//!
//! A log call carries any number of entry sources. Each source hands over an
//! ordered sequence of [`Entry`] values, and an entry value may itself be a
//! source, which makes blocks nest to arbitrary depth:
//!
//! ```text
//! Entries
//! ├── Entry { "count", 3 }
//! └── Entry { "outer", Block }
//!                       └── Entries
//!                           └── Entry { "inner", 1 }
//! ```
//!
//! Nesting is detected by capability ([`Value::Block`] wraps any
//! [`EntrySource`]), not by the concrete type of the value. Cycles are not
//! detected: a source that (transitively) contains itself recurses until the
//! stack is exhausted.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::Serialize;

/// Anything that can hand over an ordered sequence of entries.
///
/// Returned entries must be immutable: the pipeline reads them from other
/// tasks after the log call returns.
pub trait EntrySource: Send + Sync {
    fn entries(&self) -> Entries;

    /// A backend specific rendering of this source, when one was computed.
    fn preformatted(&self) -> Option<&Preformatted> {
        None
    }
}

/// A single key-value pair.
#[derive(Clone, Debug)]
pub struct Entry {
    pub key: Cow<'static, str>,
    pub value: Value,
}

impl Entry {
    pub fn new(key: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl EntrySource for Entry {
    fn entries(&self) -> Entries {
        Entries::from(vec![self.clone()])
    }
}

/// Values that are neither scalars nor blocks.
///
/// Implemented for every `Serialize + Debug` type. The text renderer uses the
/// debug representation, structured renderers use the serde encoding, which
/// is allowed to fail.
pub trait Structured: Send + Sync {
    fn fmt_text(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;

    fn to_json(&self) -> serde_json::Result<serde_json::Value>;
}

impl<T> Structured for T
where
    T: Serialize + fmt::Debug + Send + Sync,
{
    fn fmt_text(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }

    fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// The value half of an [`Entry`].
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(Cow<'static, str>),
    Error(Arc<dyn std::error::Error + Send + Sync>),
    Structured(Arc<dyn Structured>),
    /// A nested block.
    Block(Arc<dyn EntrySource>),
}

impl Value {
    pub fn block(source: impl EntrySource + 'static) -> Self {
        Value::Block(Arc::new(source))
    }

    pub fn error(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Value::Error(Arc::new(err))
    }

    pub fn structured(value: impl Structured + 'static) -> Self {
        Value::Structured(Arc::new(value))
    }

    /// The nested source, if this value is a block.
    #[must_use]
    pub fn as_block(&self) -> Option<&dyn EntrySource> {
        match self {
            Value::Block(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Default "print a value" convention, used by the text renderer.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("<nil>"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
            Value::Error(err) => write!(f, "{err}"),
            Value::Structured(v) => v.fmt_text(f),
            Value::Block(source) => write!(f, "{:?}", source.entries()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Value::I64(v) => f.debug_tuple("I64").field(v).finish(),
            Value::U64(v) => f.debug_tuple("U64").field(v).finish(),
            Value::F64(v) => f.debug_tuple("F64").field(v).finish(),
            Value::Str(v) => f.debug_tuple("Str").field(v).finish(),
            Value::Error(err) => f.debug_tuple("Error").field(&format_args!("{err}")).finish(),
            Value::Structured(_) => f.write_str("Structured(..)"),
            Value::Block(source) => f.debug_tuple("Block").field(&source.entries()).finish(),
        }
    }
}

macro_rules! impl_from_int {
    ($variant:ident, $target:ty, $($t:ty),+) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(<$target>::from(v))
                }
            }
        )+
    };
}

impl_from_int!(I64, i64, i8, i16, i32, i64);
impl_from_int!(U64, u64, u8, u16, u32, u64);
impl_from_int!(F64, f64, f32, f64);

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::U64(v as u64)
    }
}

impl From<isize> for Value {
    fn from(v: isize) -> Self {
        Value::I64(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

impl From<&'static str> for Value {
    fn from(v: &'static str) -> Self {
        Value::Str(Cow::Borrowed(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Cow::Owned(v))
    }
}

impl From<Cow<'static, str>> for Value {
    fn from(v: Cow<'static, str>) -> Self {
        Value::Str(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<Entry> for Value {
    fn from(v: Entry) -> Self {
        Value::block(v)
    }
}

impl From<Entries> for Value {
    fn from(v: Entries) -> Self {
        Value::block(v)
    }
}

impl From<Vec<Entry>> for Value {
    fn from(v: Vec<Entry>) -> Self {
        Value::block(Entries::from(v))
    }
}

impl From<Preformatted> for Value {
    fn from(v: Preformatted) -> Self {
        Value::block(v)
    }
}

impl From<Arc<dyn EntrySource>> for Value {
    fn from(v: Arc<dyn EntrySource>) -> Self {
        Value::Block(v)
    }
}

/// An immutable, insertion ordered sequence of entries.
///
/// Cloning is cheap; every clone shares the same allocation.
#[derive(Clone)]
pub struct Entries(Arc<[Entry]>);

impl Default for Entries {
    fn default() -> Self {
        Self(Arc::from(Vec::new()))
    }
}

impl Entries {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deref for Entries {
    type Target = [Entry];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for Entries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl From<Vec<Entry>> for Entries {
    fn from(v: Vec<Entry>) -> Self {
        Self(Arc::from(v))
    }
}

impl FromIterator<Entry> for Entries {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Entries {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl EntrySource for Entries {
    fn entries(&self) -> Entries {
        self.clone()
    }
}

impl EntrySource for Vec<Entry> {
    fn entries(&self) -> Entries {
        Entries::from(self.clone())
    }
}

impl<T: EntrySource + ?Sized> EntrySource for Arc<T> {
    fn entries(&self) -> Entries {
        (**self).entries()
    }

    fn preformatted(&self) -> Option<&Preformatted> {
        (**self).preformatted()
    }
}

/// A cached, backend specific rendering of an entry source.
///
/// Still behaves as an entry source, so backends that don't recognize the
/// fragment fall back to walking the original entries.
#[derive(Clone)]
pub struct Preformatted {
    entries: Entries,
    fragment: Arc<dyn Any + Send + Sync>,
}

impl Preformatted {
    pub fn new<F: Any + Send + Sync>(entries: Entries, fragment: F) -> Self {
        Self {
            entries,
            fragment: Arc::new(fragment),
        }
    }

    /// The cached rendering, if it was produced by the backend owning `F`.
    #[must_use]
    pub fn fragment<F: Any>(&self) -> Option<&F> {
        self.fragment.downcast_ref::<F>()
    }
}

impl fmt::Debug for Preformatted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preformatted")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl EntrySource for Preformatted {
    fn entries(&self) -> Entries {
        self.entries.clone()
    }

    fn preformatted(&self) -> Option<&Preformatted> {
        Some(self)
    }
}

/// Builds [`Entries`] from `key => value` pairs.
///
/// ```
/// use blocklog::entries;
///
/// let e = entries!["count" => 3, "outer" => entries!["inner" => 1]];
/// assert_eq!(e.len(), 2);
/// ```
#[macro_export]
macro_rules! entries {
    () => {
        $crate::Entries::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        $crate::Entries::from(vec![$($crate::Entry::new($key, $value)),+])
    };
}
