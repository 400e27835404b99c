//! Selector paths over JSON responses, e.g. `$.AdminAccounts[0].AdminAccountId`.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

/// A selector that could not be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid selector '{selector}': {reason}")]
pub struct SelectorError {
    /// The offending selector text.
    pub selector: String,
    /// What is wrong with it.
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed selector path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    raw: String,
    segments: Vec<Segment>,
}

#[allow(clippy::expect_used)]
static SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_\-]*)((?:\[\d+\])*)$").expect("segment pattern is valid")
});

impl Selector {
    /// Parses `$.Key[0].Other` style paths. `$` alone selects the whole document.
    ///
    /// # Errors
    ///
    /// Returns an error for paths that do not start with `$` or contain empty
    /// or malformed segments.
    pub fn parse(text: &str) -> Result<Self, SelectorError> {
        let fail = |reason: &str| SelectorError {
            selector: text.to_string(),
            reason: reason.to_string(),
        };

        let rest = text.trim().strip_prefix('$').ok_or_else(|| fail("must start with '$'"))?;
        let mut segments = Vec::new();
        if rest.is_empty() {
            return Ok(Self {
                raw: text.trim().to_string(),
                segments,
            });
        }
        let rest = rest.strip_prefix('.').ok_or_else(|| fail("expected '.' after '$'"))?;

        for part in rest.split('.') {
            let caps = SEGMENT
                .captures(part)
                .ok_or_else(|| fail(&format!("malformed segment '{part}'")))?;
            segments.push(Segment::Key(caps[1].to_string()));
            let indexes = &caps[2];
            for index in indexes
                .split(['[', ']'])
                .filter(|s| !s.is_empty())
            {
                let i = index
                    .parse::<usize>()
                    .map_err(|_| fail(&format!("bad index '{index}'")))?;
                segments.push(Segment::Index(i));
            }
        }

        Ok(Self {
            raw: text.trim().to_string(),
            segments,
        })
    }

    /// Selects a value. Missing keys and out-of-range indexes yield `None`.
    #[must_use]
    pub fn select<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(document, |current, segment| match segment {
                Segment::Key(key) => current.get(key.as_str()),
                Segment::Index(i) => current.get(*i),
            })
            .filter(|v| !v.is_null())
    }

    /// Returns the selector text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_nested_index() {
        let doc = json!({"AdminAccounts": [{"AdminAccountId": "111", "Status": "ENABLED"}]});
        let selector = Selector::parse("$.AdminAccounts[0].AdminAccountId").unwrap();
        assert_eq!(selector.select(&doc), Some(&json!("111")));
    }

    #[test]
    fn test_select_missing_yields_none() {
        let doc = json!({"AdminAccounts": []});
        let selector = Selector::parse("$.AdminAccounts[0].AdminAccountId").unwrap();
        assert_eq!(selector.select(&doc), None);

        let selector = Selector::parse("$.Nope").unwrap();
        assert_eq!(selector.select(&doc), None);
    }

    #[test]
    fn test_select_null_is_absent() {
        let doc = json!({"DetectorIds": [null]});
        let selector = Selector::parse("$.DetectorIds[0]").unwrap();
        assert_eq!(selector.select(&doc), None);
    }

    #[test]
    fn test_root_selector() {
        let doc = json!({"A": 1});
        assert_eq!(Selector::parse("$").unwrap().select(&doc), Some(&doc));
    }

    #[test]
    fn test_multiple_indexes() {
        let doc = json!({"Grid": [[1, 2], [3, 4]]});
        let selector = Selector::parse("$.Grid[1][0]").unwrap();
        assert_eq!(selector.select(&doc), Some(&json!(3)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Selector::parse("AdminAccounts").is_err());
        assert!(Selector::parse("$.").is_err());
        assert!(Selector::parse("$.A..B").is_err());
        assert!(Selector::parse("$.A[x]").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let selector: Selector = serde_json::from_value(json!("$.Account.Email")).unwrap();
        assert_eq!(selector.as_str(), "$.Account.Email");
        assert_eq!(serde_json::to_value(&selector).unwrap(), json!("$.Account.Email"));
    }
}
