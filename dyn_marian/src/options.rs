//! Heterogeneous option dictionary.
//!
//! Values carry their kind; typed reads check the kind at the call site.
//! Lists are stored as a list of kind-tagged elements and unwrapped one
//! element at a time.

use std::borrow::Cow;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::inits::Initializer;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Init(Initializer),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Init(_) => "initializer",
        }
    }

    /// Kind including the element kind of a uniform list.
    pub fn describe(&self) -> Cow<'static, str> {
        let Value::List(items) = self else {
            return Cow::Borrowed(self.kind());
        };
        match items.split_first() {
            None => Cow::Borrowed("empty list"),
            Some((first, rest)) => {
                let inner = first.describe();
                if rest.iter().all(|v| v.describe() == inner) {
                    Cow::Owned(format!("list of {inner}"))
                } else {
                    Cow::Borrowed("mixed list")
                }
            }
        }
    }
}

/// Types readable from a [`Value`].
pub trait FromValue: Sized {
    /// Kind name used in error messages.
    fn expected() -> Cow<'static, str>;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for bool {
    fn expected() -> Cow<'static, str> {
        Cow::Borrowed("bool")
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

macro_rules! int_from_value {
    ($($t:ty),*) => {
        $(impl FromValue for $t {
            fn expected() -> Cow<'static, str> {
                Cow::Borrowed("int")
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::Int(i) => <$t>::try_from(*i).ok(),
                    _ => None,
                }
            }
        })*
    };
}

int_from_value!(i32, i64, u32, u64, usize);

// Floats also accept ints; an int never widens from a float.
impl FromValue for f64 {
    fn expected() -> Cow<'static, str> {
        Cow::Borrowed("float")
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromValue for f32 {
    fn expected() -> Cow<'static, str> {
        Cow::Borrowed("float")
    }

    fn from_value(value: &Value) -> Option<Self> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FromValue for String {
    fn expected() -> Cow<'static, str> {
        Cow::Borrowed("string")
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for Initializer {
    fn expected() -> Cow<'static, str> {
        Cow::Borrowed("initializer")
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Init(init) => Some(init.clone()),
            _ => None,
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn expected() -> Cow<'static, str> {
        Cow::Owned(format!("list of {}", T::expected()))
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

macro_rules! int_into_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(v as i64)
            }
        })*
    };
}

int_into_value!(i32, i64, u32, usize);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Initializer> for Value {
    fn from(v: Initializer) -> Self {
        Value::Init(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

/// Ordered string-keyed option dictionary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    values: IndexMap<String, Value>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Options::set`].
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Insert or overwrite.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Typed read; fails if the key is absent or holds another kind.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T> {
        let value = self.values.get(key).ok_or_else(|| Error::MissingKey {
            key: key.to_string(),
        })?;
        Self::convert(key, value)
    }

    /// Typed read with a default used only when the key is absent.
    pub fn get_or<T: FromValue>(&self, key: &str, default: T) -> Result<T> {
        match self.values.get(key) {
            Some(value) => Self::convert(key, value),
            None => Ok(default),
        }
    }

    fn convert<T: FromValue>(key: &str, value: &Value) -> Result<T> {
        T::from_value(value).ok_or_else(|| Error::WrongKind {
            key: key.to_string(),
            expected: T::expected(),
            found: value.describe(),
        })
    }

    /// Copy every key of `other` that is not already present here.
    pub fn merge(&mut self, other: &Options) -> &mut Self {
        for (key, value) in &other.values {
            if !self.values.contains_key(key) {
                self.values.insert(key.clone(), value.clone());
            }
        }
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Text serialization is not supported.
    pub fn str(&self) -> Result<String> {
        Err(Error::SerializationUnsupported)
    }
}
