// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{errors::TagExprParseError, parsing};
use smol_str::SmolStr;
use std::{collections::BTreeSet, fmt};

/// The set of selection tags attached to a single test.
///
/// Tests without a `parallel` marker have an empty tag set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TagSet {
    tags: BTreeSet<SmolStr>,
}

impl TagSet {
    /// The tag attached to every test carrying a `parallel` marker.
    pub const PARALLEL: &'static str = "parallel";

    /// Creates an empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tag set for a parallel test that could not be resolved to a worker count.
    pub fn parallel_family() -> Self {
        let mut tags = Self::new();
        tags.insert(Self::PARALLEL);
        tags
    }

    /// Returns the tag set for a parallel test variant running with `nprocs` worker processes:
    /// `parallel` and `parallel[<nprocs>]`.
    pub fn for_nprocs(nprocs: usize) -> Self {
        let mut tags = Self::parallel_family();
        tags.insert(Self::nprocs_tag(nprocs));
        tags
    }

    /// Returns the count-specific tag for `nprocs`, e.g. `parallel[3]`.
    pub fn nprocs_tag(nprocs: usize) -> SmolStr {
        smol_str::format_smolstr!("{}[{}]", Self::PARALLEL, nprocs)
    }

    /// Adds a tag.
    pub fn insert(&mut self, tag: impl Into<SmolStr>) -> bool {
        self.tags.insert(tag.into())
    }

    /// Returns true if the tag is present.
    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Returns true if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterates over the tags in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.tags.iter().map(SmolStr::as_str)
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for tag in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            f.write_str(tag)?;
            first = false;
        }
        Ok(())
    }
}

impl<T: Into<SmolStr>> FromIterator<T> for TagSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// A parsed tag selection expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TagExpr {
    /// Matches tests carrying this tag.
    Tag(SmolStr),
    /// Matches tests not matched by the inner expression.
    Not(Box<TagExpr>),
    /// Matches tests matched by both expressions.
    And(Box<TagExpr>, Box<TagExpr>),
    /// Matches tests matched by either expression.
    Or(Box<TagExpr>, Box<TagExpr>),
    /// A parenthesized expression.
    Parens(Box<TagExpr>),
}

impl TagExpr {
    /// Parses a tag expression.
    pub fn parse(input: &str) -> Result<Self, TagExprParseError> {
        parsing::parse(input)
    }

    /// Returns true if a test with the given tags is selected by this expression.
    pub fn matches(&self, tags: &TagSet) -> bool {
        match self {
            Self::Tag(tag) => tags.contains(tag),
            Self::Not(expr) => !expr.matches(tags),
            Self::And(expr_1, expr_2) => expr_1.matches(tags) && expr_2.matches(tags),
            Self::Or(expr_1, expr_2) => expr_1.matches(tags) || expr_2.matches(tags),
            Self::Parens(expr) => expr.matches(tags),
        }
    }
}

impl fmt::Display for TagExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tag) => f.write_str(tag),
            Self::Not(expr) => write!(f, "not {expr}"),
            Self::And(expr_1, expr_2) => write!(f, "{expr_1} and {expr_2}"),
            Self::Or(expr_1, expr_2) => write!(f, "{expr_1} or {expr_2}"),
            Self::Parens(expr) => write!(f, "({expr})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nprocs_tags() {
        let tags = TagSet::for_nprocs(3);
        assert_eq!(tags.iter().collect::<Vec<_>>(), vec!["parallel", "parallel[3]"]);
        assert_eq!(tags.to_string(), "parallel, parallel[3]");
        assert!(TagSet::new().is_empty());
    }

    #[test]
    fn test_display_preserves_structure() {
        let input = "parallel and not (parallel[4] or parallel[8])";
        let expr = TagExpr::parse(input).unwrap();
        assert_eq!(expr.to_string(), input);
    }
}
