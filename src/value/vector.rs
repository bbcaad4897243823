//! Ordered, auto-extending collection of values stored under one field name.

use super::Value;

/// An ordered sequence of [`Value`]s.
///
/// `get`, `get_mut` and `set` past the end grow the vector with undefined
/// values up to and including the requested index, so trees can be filled in
/// any order. `peek` is the read that never grows it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueVector {
    values: Vec<Value>,
}

impl ValueVector {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Number of values currently held
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `index`, growing the vector to at least `index + 1` elements
    pub fn get(&mut self, index: usize) -> &Value {
        self.ensure_len(index + 1);
        &self.values[index]
    }

    /// Read position `index` without growing the vector
    pub fn peek(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Mutable access to position `index`, growing the vector if needed
    pub fn get_mut(&mut self, index: usize) -> &mut Value {
        self.ensure_len(index + 1);
        &mut self.values[index]
    }

    /// Install `value` at exactly position `index`.
    ///
    /// Other positions are left untouched; gaps below `index` are filled with
    /// undefined values.
    pub fn set(&mut self, index: usize, value: Value) {
        self.ensure_len(index + 1);
        self.values[index] = value;
    }

    /// Append a value at the end
    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    /// First element, if any
    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Value> {
        self.values.iter_mut()
    }

    fn ensure_len(&mut self, len: usize) {
        if self.values.len() < len {
            self.values.resize_with(len, Value::default);
        }
    }
}

impl From<Vec<Value>> for ValueVector {
    fn from(values: Vec<Value>) -> Self {
        Self { values }
    }
}

impl FromIterator<Value> for ValueVector {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ValueVector {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a ValueVector {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
