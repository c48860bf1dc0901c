//! Flat property set backing every configuration lookup.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

/// Ordered multimap of `key=value` pairs.
///
/// Insertion order is preserved and a key may occur more than once
/// (`<chain>.filter` is repeatable). Single-valued lookups return the last
/// occurrence so later lines override earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the line-oriented text format. Blank lines and lines starting
    /// with `#` are ignored; everything else must contain `=`.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut props = Self::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::MalformedLine {
                    line: idx + 1,
                    text: line.to_string(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::MalformedLine {
                    line: idx + 1,
                    text: line.to_string(),
                });
            }
            props.add(key, value.trim());
        }
        Ok(props)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Append a value, keeping earlier values for the same key.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Replace every value of `key` with a single one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Every value recorded for `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Comma-separated list value. Empty items are dropped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Parse an unsigned numeric property; `Ok(None)` when absent.
    pub fn get_number<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.get(key)
            .map(|value| {
                value
                    .parse::<T>()
                    .map_err(|_| ConfigError::InvalidNumber {
                        key: key.to_string(),
                        value: value.to_string(),
                    })
            })
            .transpose()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(|value| {
            matches!(
                value.to_ascii_lowercase().as_str(),
                "true" | "on" | "yes" | "1"
            )
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Self::new();
        for (key, value) in iter {
            props.add(key, value);
        }
        props
    }
}
