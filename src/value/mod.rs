//! Value tree - the universal payload model
//!
//! A [`Value`] carries an optional scalar (string, integers, double, bool or
//! raw bytes) and, independently, a map from field names to
//! [`ValueVector`]s of child values. Every codec in this crate maps its wire
//! representation to and from this tree.

mod vector;

pub use vector::ValueVector;

use bytes::Bytes;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of scalar stored in a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Undefined,
    String,
    Int32,
    Int64,
    Double,
    Bool,
    ByteArray,
}

/// Immutable byte sequence compared by content
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteArray(Bytes);

impl ByteArray {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decode the content as UTF-8, replacing invalid sequences
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl From<Vec<u8>> for ByteArray {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&[u8]> for ByteArray {
    fn from(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }
}

impl From<Bytes> for ByteArray {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

/// Scalar payload of a [`Value`]
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Scalar {
    #[default]
    Undefined,
    String(String),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Bool(bool),
    ByteArray(ByteArray),
}

impl Scalar {
    pub fn kind(&self) -> ValueKind {
        match self {
            Scalar::Undefined => ValueKind::Undefined,
            Scalar::String(_) => ValueKind::String,
            Scalar::Int32(_) => ValueKind::Int32,
            Scalar::Int64(_) => ValueKind::Int64,
            Scalar::Double(_) => ValueKind::Double,
            Scalar::Bool(_) => ValueKind::Bool,
            Scalar::ByteArray(_) => ValueKind::ByteArray,
        }
    }
}

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Scalar {
                fn from(v: $ty) -> Self {
                    Scalar::$variant(v.into())
                }
            }

            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::with_scalar(Scalar::from(v))
                }
            }
        )*
    };
}

scalar_from! {
    String => String,
    &str => String,
    i32 => Int32,
    i64 => Int64,
    f64 => Double,
    bool => Bool,
    ByteArray => ByteArray,
    Vec<u8> => ByteArray,
}

/// A node of the value tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Value {
    scalar: Scalar,
    children: BTreeMap<String, ValueVector>,
}

impl Value {
    /// Create an undefined value without children
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scalar(scalar: Scalar) -> Self {
        Self {
            scalar,
            children: BTreeMap::new(),
        }
    }

    pub fn scalar(&self) -> &Scalar {
        &self.scalar
    }

    /// Replace the scalar, keeping the children
    pub fn set_value(&mut self, scalar: impl Into<Scalar>) {
        self.scalar = scalar.into();
    }

    /// Drop the scalar, keeping the children
    pub fn clear_value(&mut self) {
        self.scalar = Scalar::Undefined;
    }

    pub fn kind(&self) -> ValueKind {
        self.scalar.kind()
    }

    /// Whether a scalar is set
    pub fn is_defined(&self) -> bool {
        !matches!(self.scalar, Scalar::Undefined)
    }

    /// Undefined and childless
    pub fn is_empty(&self) -> bool {
        !self.is_defined() && self.children.is_empty()
    }

    pub fn str_value(&self) -> Cow<'_, str> {
        match &self.scalar {
            Scalar::Undefined => Cow::Borrowed(""),
            Scalar::String(s) => Cow::Borrowed(s.as_str()),
            Scalar::Int32(i) => Cow::Owned(i.to_string()),
            Scalar::Int64(l) => Cow::Owned(l.to_string()),
            Scalar::Double(d) => Cow::Owned(d.to_string()),
            Scalar::Bool(b) => Cow::Owned(b.to_string()),
            Scalar::ByteArray(b) => b.to_string_lossy(),
        }
    }

    pub fn int_value(&self) -> i32 {
        match &self.scalar {
            Scalar::Undefined => 0,
            Scalar::String(s) => s.trim().parse().unwrap_or(0),
            Scalar::Int32(i) => *i,
            Scalar::Int64(l) => *l as i32,
            Scalar::Double(d) => *d as i32,
            Scalar::Bool(b) => i32::from(*b),
            Scalar::ByteArray(b) => b
                .as_bytes()
                .get(..4)
                .and_then(|s| s.try_into().ok())
                .map(i32::from_be_bytes)
                .unwrap_or(0),
        }
    }

    pub fn long_value(&self) -> i64 {
        match &self.scalar {
            Scalar::Undefined => 0,
            Scalar::String(s) => s.trim().parse().unwrap_or(0),
            Scalar::Int32(i) => i64::from(*i),
            Scalar::Int64(l) => *l,
            Scalar::Double(d) => *d as i64,
            Scalar::Bool(b) => i64::from(*b),
            Scalar::ByteArray(b) => b
                .as_bytes()
                .get(..8)
                .and_then(|s| s.try_into().ok())
                .map(i64::from_be_bytes)
                .unwrap_or(0),
        }
    }

    pub fn double_value(&self) -> f64 {
        match &self.scalar {
            Scalar::Undefined => 0.0,
            Scalar::String(s) => s.trim().parse().unwrap_or(0.0),
            Scalar::Int32(i) => f64::from(*i),
            Scalar::Int64(l) => *l as f64,
            Scalar::Double(d) => *d,
            Scalar::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Scalar::ByteArray(b) => b
                .as_bytes()
                .get(..8)
                .and_then(|s| s.try_into().ok())
                .map(f64::from_be_bytes)
                .unwrap_or(0.0),
        }
    }

    pub fn bool_value(&self) -> bool {
        match &self.scalar {
            Scalar::Undefined => false,
            Scalar::String(s) => s.trim().eq_ignore_ascii_case("true"),
            Scalar::Int32(i) => *i > 0,
            Scalar::Int64(l) => *l > 0,
            Scalar::Double(d) => *d as i64 > 0,
            Scalar::Bool(b) => *b,
            Scalar::ByteArray(b) => b.as_bytes().first().is_some_and(|&byte| byte != 0),
        }
    }

    pub fn byte_array_value(&self) -> ByteArray {
        match &self.scalar {
            Scalar::Undefined => ByteArray::default(),
            Scalar::String(s) => ByteArray::from(s.as_bytes()),
            Scalar::Int32(i) => ByteArray::from(&i.to_be_bytes()[..]),
            Scalar::Int64(l) => ByteArray::from(&l.to_be_bytes()[..]),
            Scalar::Double(d) => ByteArray::from(&d.to_be_bytes()[..]),
            Scalar::Bool(b) => ByteArray::from(vec![u8::from(*b)]),
            Scalar::ByteArray(b) => b.clone(),
        }
    }

    /// All child vectors, ordered by field name
    pub fn children(&self) -> &BTreeMap<String, ValueVector> {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut BTreeMap<String, ValueVector> {
        &mut self.children
    }

    /// Child vector for `name`, registering an empty one if absent.
    ///
    /// This is a read with a side effect: after the call `name` is always a
    /// key of the child map, even if nothing is ever stored in the vector.
    pub fn get_or_create_children(&mut self, name: &str) -> &mut ValueVector {
        self.children.entry(name.to_string()).or_default()
    }

    /// Child vector for `name` without creating it
    pub fn children_of(&self, name: &str) -> Option<&ValueVector> {
        self.children.get(name)
    }

    /// Whether `name` has at least one child value
    pub fn has_children(&self, name: &str) -> bool {
        self.children.get(name).is_some_and(|v| !v.is_empty())
    }

    pub fn has_any_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// First child under `name`, creating the vector and its first element
    /// if needed
    pub fn first_child_mut(&mut self, name: &str) -> &mut Value {
        self.get_or_create_children(name).get_mut(0)
    }

    /// First child under `name` without creating anything
    pub fn first_child(&self, name: &str) -> Option<&Value> {
        self.children.get(name).and_then(ValueVector::first)
    }

    /// Shorthand for `first_child_mut(name).set_value(scalar)`
    pub fn set_first_child(&mut self, name: &str, scalar: impl Into<Scalar>) {
        self.first_child_mut(name).set_value(scalar);
    }

    /// Remove the vector stored under `name`
    pub fn erase_children(&mut self, name: &str) -> Option<ValueVector> {
        self.children.remove(name)
    }

    /// Copy `source` into this value.
    ///
    /// The scalar is replaced and, for every child vector of `source`, the
    /// elements at indices `0..n` are overwritten with copies of the source
    /// elements. Elements past `n` and fields only present here are kept. The
    /// result shares nothing with `source`.
    pub fn deep_copy(&mut self, source: &Value) {
        self.scalar = source.scalar.clone();
        for (name, vector) in &source.children {
            let target = self.get_or_create_children(name);
            for (i, child) in vector.iter().enumerate() {
                target.set(i, child.clone());
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_node(f: &mut fmt::Formatter<'_>, value: &Value, depth: usize) -> fmt::Result {
            match value.kind() {
                ValueKind::Undefined => writeln!(f)?,
                ValueKind::String => writeln!(f, " = {:?}", value.str_value())?,
                kind => writeln!(f, " = {} : {:?}", value.str_value(), kind)?,
            }
            for (name, vector) in value.children() {
                for (i, child) in vector.iter().enumerate() {
                    write!(f, "{:indent$}.{}[{}]", "", name, i, indent = depth * 2)?;
                    write_node(f, child, depth + 1)?;
                }
            }
            Ok(())
        }

        write!(f, "root")?;
        write_node(f, self, 1)
    }
}
