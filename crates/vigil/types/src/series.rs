//! Series identity.
//!
//! A series is identified by its metric name and a sorted tag set, so two
//! records with the same tags in a different order land on the same series.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identity of one metric or log stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<String, String>,
}

impl SeriesKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in tags {
            self.tags.insert(k.into(), v.into());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.tags.is_empty() {
            write!(f, "{{")?;
            for (i, (k, v)) in self.tags.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}={}", k, v)?;
            }
            write!(f, "}}")?;
        }
        Ok(())
    }
}

/// Errors parsing a series key from its display form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeriesKeyError {
    #[error("series name is empty")]
    EmptyName,

    #[error("unterminated tag set in '{0}'")]
    UnterminatedTags(String),

    #[error("malformed tag '{0}', expected key=value")]
    MalformedTag(String),
}

impl FromStr for SeriesKey {
    type Err = SeriesKeyError;

    /// Parses `name` or `name{k=v,k2=v2}`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, rest) = match s.find('{') {
            Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
            None => (s, None),
        };

        if name.is_empty() {
            return Err(SeriesKeyError::EmptyName);
        }

        let mut key = SeriesKey::new(name);
        if let Some(rest) = rest {
            let body = rest
                .strip_suffix('}')
                .ok_or_else(|| SeriesKeyError::UnterminatedTags(s.to_string()))?;
            for pair in body.split(',').filter(|p| !p.is_empty()) {
                let (k, v) = pair
                    .split_once('=')
                    .ok_or_else(|| SeriesKeyError::MalformedTag(pair.to_string()))?;
                if k.is_empty() {
                    return Err(SeriesKeyError::MalformedTag(pair.to_string()));
                }
                key = key.with_tag(k, v);
            }
        }

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_order_does_not_matter() {
        let a = SeriesKey::new("cpu.load")
            .with_tag("host", "a")
            .with_tag("region", "eu");
        let b = SeriesKey::new("cpu.load")
            .with_tag("region", "eu")
            .with_tag("host", "a");
        assert_eq!(a, b);
    }

    #[test]
    fn test_display_and_parse() {
        let key = SeriesKey::new("cpu.load").with_tags([("host", "a"), ("dc", "x")]);
        let text = key.to_string();
        assert_eq!(text, "cpu.load{dc=x,host=a}");
        assert_eq!(text.parse::<SeriesKey>().unwrap(), key);

        let bare: SeriesKey = "mem.used".parse().unwrap();
        assert_eq!(bare.name(), "mem.used");
        assert!(bare.tags().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<SeriesKey>(), Err(SeriesKeyError::EmptyName));
        assert!(matches!(
            "cpu{host=a".parse::<SeriesKey>(),
            Err(SeriesKeyError::UnterminatedTags(_))
        ));
        assert!(matches!(
            "cpu{host}".parse::<SeriesKey>(),
            Err(SeriesKeyError::MalformedTag(_))
        ));
    }
}
