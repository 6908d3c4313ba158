//! Data shape tags declared by activities and transforms.
//!
//! A shape is an opaque name for the structure of a payload (`documents`,
//! `chunks+collection`, `search_results`, ...). Activities declare the shape
//! of each parameter and of their return value; transforms declare which
//! shapes they accept and which they produce.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a data shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeTag(String);

impl ShapeTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShapeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShapeTag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ShapeTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Set of shapes a transform accepts or produces.
///
/// Serialized as `"any"`, a single tag string, or a list of tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPattern", into = "RawPattern")]
pub enum ShapePattern {
    /// Matches every shape.
    Any,
    /// Matches exactly one shape.
    One(ShapeTag),
    /// Matches any member of the set.
    OneOf(BTreeSet<ShapeTag>),
}

impl ShapePattern {
    /// Build a set pattern from tag names.
    pub fn one_of<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ShapeTag>,
    {
        Self::OneOf(tags.into_iter().map(Into::into).collect())
    }

    /// Whether `tag` is accepted by this pattern.
    pub fn matches(&self, tag: &ShapeTag) -> bool {
        match self {
            ShapePattern::Any => true,
            ShapePattern::One(t) => t == tag,
            ShapePattern::OneOf(set) => set.contains(tag),
        }
    }

    /// Whether this pattern names exactly `tag` (not as a set member).
    pub fn is_exactly(&self, tag: &ShapeTag) -> bool {
        matches!(self, ShapePattern::One(t) if t == tag)
    }
}

impl fmt::Display for ShapePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapePattern::Any => f.write_str("any"),
            ShapePattern::One(t) => write!(f, "{t}"),
            ShapePattern::OneOf(set) => {
                let tags: Vec<&str> = set.iter().map(ShapeTag::as_str).collect();
                write!(f, "{{{}}}", tags.join(" | "))
            }
        }
    }
}

impl From<ShapeTag> for ShapePattern {
    fn from(tag: ShapeTag) -> Self {
        ShapePattern::One(tag)
    }
}

impl From<&str> for ShapePattern {
    fn from(s: &str) -> Self {
        RawPattern::Single(s.to_string()).into()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawPattern {
    Single(String),
    Many(Vec<String>),
}

impl From<RawPattern> for ShapePattern {
    fn from(raw: RawPattern) -> Self {
        match raw {
            RawPattern::Single(s) if s == "any" => ShapePattern::Any,
            RawPattern::Single(s) => ShapePattern::One(ShapeTag(s)),
            RawPattern::Many(tags) => ShapePattern::one_of(tags),
        }
    }
}

impl From<ShapePattern> for RawPattern {
    fn from(pattern: ShapePattern) -> Self {
        match pattern {
            ShapePattern::Any => RawPattern::Single("any".into()),
            ShapePattern::One(t) => RawPattern::Single(t.0),
            ShapePattern::OneOf(set) => RawPattern::Many(set.into_iter().map(|t| t.0).collect()),
        }
    }
}
