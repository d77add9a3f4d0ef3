//! Bracketed resource paths, e.g. `dataContext[Mammals].collection[Cases].case`.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSegment {
    pub kind: String,
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePath {
    segments: Vec<ResourceSegment>,
}

impl ResourcePath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `kind[selector]`.
    pub fn at(mut self, kind: impl Into<String>, selector: impl Into<String>) -> Self {
        self.segments.push(ResourceSegment {
            kind: kind.into(),
            selector: Some(selector.into()),
        });
        self
    }

    /// Append a bare `kind` segment.
    pub fn then(mut self, kind: impl Into<String>) -> Self {
        self.segments.push(ResourceSegment {
            kind: kind.into(),
            selector: None,
        });
        self
    }

    pub fn data_context(name: impl Into<String>) -> Self {
        Self::new().at("dataContext", name)
    }

    pub fn segments(&self) -> &[ResourceSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Pattern match where a `*` kind or selector matches anything, and a
    /// pattern consisting of just `*` matches every path.
    pub fn matches(&self, pattern: &ResourcePath) -> bool {
        if pattern.segments.len() == 1 && pattern.segments[0].kind == "*" {
            return true;
        }
        if pattern.segments.len() != self.segments.len() {
            return false;
        }
        self.segments.iter().zip(&pattern.segments).all(|(s, p)| {
            (p.kind == "*" || p.kind == s.kind)
                && match (&p.selector, &s.selector) {
                    (None, None) => true,
                    (Some(ps), _) if ps == "*" => true,
                    (Some(ps), Some(ss)) => ps == ss,
                    _ => false,
                }
        })
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(&seg.kind)?;
            if let Some(sel) = &seg.selector {
                write!(f, "[{}]", sel)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid resource path '{path}': {reason}")]
pub struct ResourcePathError {
    pub path: String,
    pub reason: &'static str,
}

impl FromStr for ResourcePath {
    type Err = ResourcePathError;

    /// Selectors may contain dots (`dataContext[my.data]`); brackets do not nest.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ResourcePathError {
            path: s.to_string(),
            reason,
        };
        let mut segments = Vec::new();
        let mut rest = s.trim();
        if rest.is_empty() {
            return Err(err("empty path"));
        }
        loop {
            let end = rest.find(|c| c == '[' || c == '.').unwrap_or(rest.len());
            let kind = &rest[..end];
            if kind.is_empty() {
                return Err(err("empty segment"));
            }
            rest = &rest[end..];
            let selector = if let Some(after) = rest.strip_prefix('[') {
                let close = after.find(']').ok_or_else(|| err("unclosed '['"))?;
                let sel = &after[..close];
                rest = &after[close + 1..];
                Some(sel.to_string())
            } else {
                None
            };
            segments.push(ResourceSegment {
                kind: kind.to_string(),
                selector,
            });
            if rest.is_empty() {
                break;
            }
            rest = rest.strip_prefix('.').ok_or_else(|| err("expected '.' between segments"))?;
        }
        Ok(Self { segments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_bracketed_paths() {
        let p = ResourcePath::data_context("Mammals")
            .at("collection", "Cases")
            .then("case");
        assert_eq!(p.to_string(), "dataContext[Mammals].collection[Cases].case");
    }

    #[test]
    fn parses_round_trip_with_dotted_selector() {
        let p: ResourcePath = "dataContext[my.data].collection[c].caseByID[12]".parse().unwrap();
        assert_eq!(p.segments().len(), 3);
        assert_eq!(p.segments()[0].selector.as_deref(), Some("my.data"));
        assert_eq!(p.to_string(), "dataContext[my.data].collection[c].caseByID[12]");
    }

    #[test]
    fn rejects_bad_paths() {
        assert!("".parse::<ResourcePath>().is_err());
        assert!("dataContext[x".parse::<ResourcePath>().is_err());
        assert!("a..b".parse::<ResourcePath>().is_err());
        assert!("a[x]b".parse::<ResourcePath>().is_err());
    }

    #[test]
    fn wildcard_matching() {
        let path: ResourcePath = "dataContextChangeNotice[Mammals]".parse().unwrap();
        assert!(path.matches(&"*".parse().unwrap()));
        assert!(path.matches(&"dataContextChangeNotice[*]".parse().unwrap()));
        assert!(path.matches(&"dataContextChangeNotice[Mammals]".parse().unwrap()));
        assert!(!path.matches(&"dataContextChangeNotice[Other]".parse().unwrap()));
        assert!(!path.matches(&"component[*]".parse().unwrap()));
    }
}
