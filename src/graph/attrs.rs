//! Typed attribute bag
//!
//! Attributes keep insertion order so that printed graphs and fused-op
//! attribute lists are stable across runs.

use indexmap::IndexMap;

/// A single attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Integer
    Int(i64),
    /// Float
    Float(f32),
    /// Boolean
    Bool(bool),
    /// String
    Str(String),
    /// Integer list
    Ints(Vec<i64>),
    /// Float list
    Floats(Vec<f32>),
    /// String list
    Strs(Vec<String>),
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f32> for AttrValue {
    fn from(v: f32) -> Self {
        AttrValue::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(v: Vec<i64>) -> Self {
        AttrValue::Ints(v)
    }
}

impl From<Vec<f32>> for AttrValue {
    fn from(v: Vec<f32>) -> Self {
        AttrValue::Floats(v)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(v: Vec<String>) -> Self {
        AttrValue::Strs(v)
    }
}

/// Insertion-ordered attribute map of an op
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    entries: IndexMap<String, AttrValue>,
}

impl Attributes {
    /// Create an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace an attribute
    pub fn set(&mut self, name: &str, value: impl Into<AttrValue>) {
        self.entries.insert(name.to_string(), value.into());
    }

    /// Builder-style [`Attributes::set`]
    pub fn with(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Raw lookup
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries.get(name)
    }

    /// Get attribute value as i64
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.entries.get(name)? {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get attribute value as f32
    pub fn get_float(&self, name: &str) -> Option<f32> {
        match self.entries.get(name)? {
            AttrValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Get attribute value as bool
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.entries.get(name)? {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get attribute value as string
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.entries.get(name)? {
            AttrValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Get attribute value as i64 list
    pub fn get_ints(&self, name: &str) -> Option<&[i64]> {
        match self.entries.get(name)? {
            AttrValue::Ints(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Get attribute value as f32 list
    pub fn get_floats(&self, name: &str) -> Option<&[f32]> {
        match self.entries.get(name)? {
            AttrValue::Floats(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Get attribute value as string list
    pub fn get_strs(&self, name: &str) -> Option<&[String]> {
        match self.entries.get(name)? {
            AttrValue::Strs(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Check if the attribute exists
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Remove an attribute by name
    pub fn remove(&mut self, name: &str) -> Option<AttrValue> {
        self.entries.shift_remove(name)
    }

    /// Copy every attribute of `other` that is not already set here
    pub fn merge_missing(&mut self, other: &Attributes) {
        for (name, value) in &other.entries {
            if !self.entries.contains_key(name) {
                self.entries.insert(name.clone(), value.clone());
            }
        }
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No attributes
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters() {
        let attrs = Attributes::new()
            .with("axis", 1i64)
            .with("scales", vec![0.5f32, 0.25])
            .with("backend", "dnnl")
            .with("with_bias", true);

        assert_eq!(attrs.get_int("axis"), Some(1));
        assert_eq!(attrs.get_floats("scales"), Some(&[0.5f32, 0.25][..]));
        assert_eq!(attrs.get_str("backend"), Some("dnnl"));
        assert_eq!(attrs.get_bool("with_bias"), Some(true));
        // Wrong type is a miss, not a conversion
        assert_eq!(attrs.get_float("axis"), None);
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut attrs = Attributes::new().with("a", 1i64).with("b", 2i64);
        attrs.set("a", 3i64);

        let names: Vec<&str> = attrs.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(attrs.get_int("a"), Some(3));
    }

    #[test]
    fn test_merge_missing_keeps_existing() {
        let mut fused = Attributes::new().with("backend", "custom");
        let source = Attributes::new()
            .with("backend", "dnnl")
            .with("zps", vec![0i64]);
        fused.merge_missing(&source);

        assert_eq!(fused.get_str("backend"), Some("custom"));
        assert_eq!(fused.get_ints("zps"), Some(&[0i64][..]));
    }

    #[test]
    fn test_remove() {
        let mut attrs = Attributes::new().with("qtype", "per_tensor");
        assert!(attrs.remove("qtype").is_some());
        assert!(attrs.is_empty());
    }
}
