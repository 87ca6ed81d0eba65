//! The generated test suite: accepted inputs and the coverage they reached.

use core::fmt;
use std::{fs, path::Path};

use hashbrown::HashMap;
use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::Error;

/// Insertion-ordered map from input key to the cumulative coverage reached
/// when the input was accepted.
///
/// Serializes to a JSON object keeping that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestSuite {
    entries: Vec<(String, f64)>,
    index: HashMap<String, usize>,
}

impl TestSuite {
    /// An empty test suite
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, returns `false` if the key is already present
    pub fn insert<S: Into<String>>(&mut self, key: S, coverage: f64) -> bool {
        let key = key.into();
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, coverage));
        true
    }

    /// The coverage recorded for `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<f64> {
        self.index.get(key).map(|idx| self.entries[*idx].1)
    }

    /// Whether `key` is part of the suite
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing was accepted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(key, cov)| (key.as_str(), *cov))
    }

    /// Writes the suite as pretty JSON
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reads a suite written by [`TestSuite::to_file`]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }
}

impl Serialize for TestSuite {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, cov) in &self.entries {
            map.serialize_entry(key, cov)?;
        }
        map.end()
    }
}

struct TestSuiteVisitor;

impl<'de> Visitor<'de> for TestSuiteVisitor {
    type Value = TestSuite;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map from input keys to coverage")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut suite = TestSuite::new();
        while let Some((key, cov)) = access.next_entry::<String, f64>()? {
            suite.insert(key, cov);
        }
        Ok(suite)
    }
}

impl<'de> Deserialize<'de> for TestSuite {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(TestSuiteVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::TestSuite;

    #[test]
    fn test_insertion_order() {
        let mut suite = TestSuite::new();
        assert!(suite.insert("ff000000", 50.0));
        assert!(suite.insert("00000100", 75.0));
        assert!(!suite.insert("ff000000", 80.0));

        assert_eq!(suite.len(), 2);
        assert_eq!(suite.get("ff000000"), Some(50.0));
        let keys: Vec<_> = suite.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["ff000000", "00000100"]);
    }

    #[test]
    fn test_json() {
        let mut suite = TestSuite::new();
        suite.insert("0a", 50.0);
        suite.insert("00", 62.5);
        let json = serde_json::to_string(&suite).unwrap();
        assert_eq!(json, r#"{"0a":50.0,"00":62.5}"#);

        let back: TestSuite = serde_json::from_str(&json).unwrap();
        assert_eq!(back, suite);
    }
}
