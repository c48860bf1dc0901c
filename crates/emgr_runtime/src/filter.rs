//! `<chain>.filter` entries.
//!
//! ```text
//! +                      accept everything
//! -java/lang/String.     reject methods whose qualified name starts so
//! +100-200               accept compile requests 100 through 200
//! ```
//!
//! Filters are checked in declaration order and the first match decides.
//! A chain whose filters all miss accepts the method.

use std::fmt;
use std::ops::RangeInclusive;

use thiserror::Error;

use crate::method::MethodDesc;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed filter `{text}`: {reason}")]
pub struct FilterError {
    pub text: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    Any,
    Requests(RangeInclusive<u64>),
    Prefix(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodFilter {
    accept: bool,
    matcher: Matcher,
}

impl MethodFilter {
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        let malformed = |reason| FilterError {
            text: text.to_string(),
            reason,
        };

        let trimmed = text.trim();
        let (accept, body) = if let Some(rest) = trimmed.strip_prefix('+') {
            (true, rest)
        } else if let Some(rest) = trimmed.strip_prefix('-') {
            (false, rest)
        } else {
            (true, trimmed)
        };

        if body.chars().any(char::is_whitespace) {
            return Err(malformed("whitespace inside pattern"));
        }

        let matcher = if body.is_empty() {
            Matcher::Any
        } else if let Some((low, high)) = body
            .split_once('-')
            .filter(|(low, _)| !low.is_empty() && low.bytes().all(|b| b.is_ascii_digit()))
        {
            let low: u64 = low.parse().map_err(|_| malformed("range start out of bounds"))?;
            let high: u64 = high.parse().map_err(|_| malformed("range end is not a number"))?;
            if low > high {
                return Err(malformed("empty range"));
            }
            Matcher::Requests(low..=high)
        } else {
            Matcher::Prefix(body.to_string())
        };

        Ok(Self { accept, matcher })
    }

    pub const fn accepts(&self) -> bool {
        self.accept
    }

    /// Whether this filter applies to the `request`-th compile request for
    /// `method`.
    pub fn matches(&self, method: &MethodDesc, request: u64) -> bool {
        match &self.matcher {
            Matcher::Any => true,
            Matcher::Requests(range) => range.contains(&request),
            Matcher::Prefix(prefix) => method.qualified_name().starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.accept { "+" } else { "-" })?;
        match &self.matcher {
            Matcher::Any => Ok(()),
            Matcher::Requests(range) => write!(f, "{}-{}", range.start(), range.end()),
            Matcher::Prefix(prefix) => f.write_str(prefix),
        }
    }
}

/// First matching filter decides; no match accepts.
pub fn accepts(filters: &[MethodFilter], method: &MethodDesc, request: u64) -> bool {
    filters
        .iter()
        .find(|filter| filter.matches(method, request))
        .is_none_or(MethodFilter::accepts)
}

#[cfg(test)]
mod tests {
    use emgr_jit::MethodHandle;

    use super::*;

    fn desc(class: &str, name: &str) -> MethodDesc {
        MethodDesc::new(MethodHandle::from_raw(1).unwrap(), class, name, "()V")
    }

    fn filters(texts: &[&str]) -> Vec<MethodFilter> {
        texts.iter().map(|t| MethodFilter::parse(t).unwrap()).collect()
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(MethodFilter::parse("+").unwrap().to_string(), "+");
        assert_eq!(MethodFilter::parse("-10-20").unwrap().to_string(), "-10-20");
        assert_eq!(MethodFilter::parse("java/util.").unwrap().to_string(), "+java/util.");
        assert!(!MethodFilter::parse("-Foo.bar").unwrap().accepts());
    }

    #[test]
    fn test_malformed_filters() {
        assert_eq!(MethodFilter::parse("+20-10").unwrap_err().reason, "empty range");
        assert!(MethodFilter::parse("+10-x").is_err());
        assert!(MethodFilter::parse("+Foo bar").is_err());
    }

    #[test]
    fn test_first_match_decides() {
        let chain = filters(&["-java/lang/String.", "+java/lang/"]);
        assert!(!accepts(&chain, &desc("java/lang/String", "length"), 1));
        assert!(accepts(&chain, &desc("java/lang/Object", "hashCode"), 1));
        assert!(accepts(&chain, &desc("app/Main", "main"), 1));
    }

    #[test]
    fn test_request_range() {
        let chain = filters(&["+2-3", "-"]);
        let method = desc("A", "f");
        let accepted: Vec<bool> = (1..=4).map(|n| accepts(&chain, &method, n)).collect();
        assert_eq!(accepted, vec![false, true, true, false]);
    }

    #[test]
    fn test_dash_inside_pattern_is_a_prefix() {
        let chain = filters(&["-app/my-lib."]);
        assert!(!accepts(&chain, &desc("app/my-lib", "run"), 1));
        assert!(accepts(&chain, &desc("app/other", "run"), 1));
    }
}
