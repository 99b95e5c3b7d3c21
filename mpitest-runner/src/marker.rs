// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `parallel` marker: its raw arguments and their normalization into worker counts.
//!
//! A marker is written as one of:
//!
//! ```text
//! parallel
//! parallel()
//! parallel(4)
//! parallel([1, 2, 4])
//! parallel(nprocs=(2, 4))
//! ```
//!
//! Values may be integers, floats, quoted strings, or `[...]`/`(...)` sequences. Only positive
//! integers and non-empty sequences of them are accepted as worker counts; everything else
//! parses but fails to resolve, so the error names the offending value.

use crate::errors::{MarkerConfigError, MarkerConfigErrorKind, MarkerSyntaxError};
use itertools::Itertools;
use std::{collections::BTreeMap, fmt, num::NonZeroUsize};
use winnow::{
    ModalResult, Parser,
    ascii::{digit0, digit1, multispace0},
    combinator::{alt, cut_err, delimited, eof, fail, opt, preceded, separated, terminated, trace},
    error::{StrContext, StrContextValue},
    stream::Stream,
    token::{one_of, take_till, take_while},
};

/// The marker name.
pub const MARKER_NAME: &str = "parallel";

/// The keyword argument naming the worker counts.
pub const NPROCS_KEYWORD: &str = "nprocs";

/// A single marker argument value, as written.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MarkerValue {
    /// An integer.
    Int(i64),
    /// A floating-point number, kept as written.
    Float(String),
    /// A quoted string.
    Str(String),
    /// A list or tuple of values.
    Seq(Vec<MarkerValue>),
}

impl MarkerValue {
    /// Returns a sequence of integers.
    pub fn ints(values: impl IntoIterator<Item = i64>) -> Self {
        Self::Seq(values.into_iter().map(Self::Int).collect())
    }
}

impl fmt::Display for MarkerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(text) => f.write_str(text),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Seq(values) => write!(f, "[{}]", values.iter().join(", ")),
        }
    }
}

/// The raw, unnormalized arguments of a `parallel` marker.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MarkerSpec {
    args: Vec<MarkerValue>,
    kwargs: BTreeMap<String, MarkerValue>,
}

impl MarkerSpec {
    /// A marker with no arguments, requesting the default worker count.
    pub fn bare() -> Self {
        Self::default()
    }

    /// A marker with a single positional argument.
    pub fn positional(value: MarkerValue) -> Self {
        Self::bare().with_arg(value)
    }

    /// A marker with a single keyword argument.
    pub fn keyword(name: impl Into<String>, value: MarkerValue) -> Self {
        Self::bare().with_kwarg(name, value)
    }

    /// Appends a positional argument.
    pub fn with_arg(mut self, value: MarkerValue) -> Self {
        self.args.push(value);
        self
    }

    /// Sets a keyword argument, replacing any earlier value for the same keyword.
    pub fn with_kwarg(mut self, name: impl Into<String>, value: MarkerValue) -> Self {
        self.kwargs.insert(name.into(), value);
        self
    }

    /// Parses marker text such as `parallel(nprocs=[1, 2])`.
    pub fn parse(input: &str) -> Result<Self, MarkerSyntaxError> {
        parse_marker(input)
    }

    /// The positional arguments, in order.
    pub fn args(&self) -> &[MarkerValue] {
        &self.args
    }

    /// The keyword arguments.
    pub fn kwargs(&self) -> impl Iterator<Item = (&str, &MarkerValue)> + '_ {
        self.kwargs.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Resolves the marker into the worker counts it requests.
    ///
    /// `test_name` is used for error reporting only.
    pub fn worker_counts(&self, test_name: &str) -> Result<WorkerCountSet, MarkerConfigError> {
        self.resolve()
            .map_err(|kind| MarkerConfigError::new(test_name, kind))
    }

    fn resolve(&self) -> Result<WorkerCountSet, MarkerConfigErrorKind> {
        if let Some(keyword) = self.kwargs.keys().find(|k| *k != NPROCS_KEYWORD) {
            return Err(MarkerConfigErrorKind::UnknownKeyword {
                keyword: keyword.clone(),
            });
        }
        if self.args.len() > 1 {
            return Err(MarkerConfigErrorKind::TooManyArguments {
                count: self.args.len(),
            });
        }

        let value = match (self.args.first(), self.kwargs.get(NPROCS_KEYWORD)) {
            (Some(_), Some(_)) => return Err(MarkerConfigErrorKind::PositionalAndKeyword),
            (Some(value), None) | (None, Some(value)) => value,
            (None, None) => return Ok(WorkerCountSet::default()),
        };

        match value {
            MarkerValue::Seq(values) => {
                if values.is_empty() {
                    return Err(MarkerConfigErrorKind::EmptySequence);
                }
                let counts = values.iter().map(to_count).collect::<Result<Vec<_>, _>>()?;
                Ok(WorkerCountSet { counts })
            }
            other => Ok(WorkerCountSet::single(to_count(other)?)),
        }
    }
}

fn to_count(value: &MarkerValue) -> Result<NonZeroUsize, MarkerConfigErrorKind> {
    match value {
        MarkerValue::Int(n) => usize::try_from(*n)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or(MarkerConfigErrorKind::NonPositiveCount { value: *n }),
        other => Err(MarkerConfigErrorKind::NonIntegerValue {
            value: other.to_string(),
        }),
    }
}

/// A non-empty, ordered sequence of worker counts requested by one marker.
///
/// Order is preserved and duplicates are permitted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkerCountSet {
    counts: Vec<NonZeroUsize>,
}

impl WorkerCountSet {
    /// The worker count used by a marker without arguments.
    pub const DEFAULT_NPROCS: NonZeroUsize = NonZeroUsize::new(3).unwrap();

    /// A set containing a single count.
    pub fn single(nprocs: NonZeroUsize) -> Self {
        Self {
            counts: vec![nprocs],
        }
    }

    /// Creates a set from a sequence of counts, or returns `None` if the sequence is empty.
    pub fn new(counts: impl IntoIterator<Item = NonZeroUsize>) -> Option<Self> {
        let counts: Vec<_> = counts.into_iter().collect();
        (!counts.is_empty()).then_some(Self { counts })
    }

    /// The number of counts, including duplicates.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Always false: a set holds at least one count.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Iterates over the counts in order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = NonZeroUsize> + '_ {
        self.counts.iter().copied()
    }
}

impl Default for WorkerCountSet {
    fn default() -> Self {
        Self::single(Self::DEFAULT_NPROCS)
    }
}

// ---
// Marker text parsing
// ---

fn parse_marker(input: &str) -> Result<MarkerSpec, MarkerSyntaxError> {
    (
        preceded(multispace0, parse_marker_name),
        opt(preceded(multispace0, parse_arg_list)),
        multispace0,
        eof,
    )
        .map(|(_, spec, _, _)| spec.unwrap_or_default())
        .parse(input)
        .map_err(|error| {
            let message = error.inner().to_string();
            let message = if message.is_empty() {
                "unexpected input".to_owned()
            } else {
                message.replace('\n', "; ")
            };
            let offset = error.offset();
            let len = input[offset..]
                .split(|c: char| c.is_whitespace() || c == ',')
                .next()
                .map_or(0, str::len);
            MarkerSyntaxError::new(input, (offset, len), message)
        })
}

fn parse_ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

fn parse_marker_name<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    trace(
        "parse_marker_name",
        cut_err(parse_ident.verify(|name: &str| name == MARKER_NAME))
            .context(StrContext::Expected(StrContextValue::StringLiteral(MARKER_NAME))),
    )
    .parse_next(input)
}

fn parse_arg_list(input: &mut &str) -> ModalResult<MarkerSpec> {
    trace("parse_arg_list", |input: &mut &str| -> ModalResult<MarkerSpec> {
        '('.parse_next(input)?;
        let mut spec = MarkerSpec::bare();
        loop {
            multispace0.parse_next(input)?;
            if input.starts_with(')') {
                break;
            }

            let checkpoint = input.checkpoint();
            let (keyword, value) = cut_err(parse_arg).parse_next(input)?;
            match keyword {
                Some(keyword) => {
                    if spec.kwargs.contains_key(keyword) {
                        input.reset(&checkpoint);
                        return cut_err(fail)
                            .context(StrContext::Label("repeated keyword argument"))
                            .parse_next(input);
                    }
                    spec.kwargs.insert(keyword.to_owned(), value);
                }
                None => {
                    if !spec.kwargs.is_empty() {
                        input.reset(&checkpoint);
                        return cut_err(fail)
                            .context(StrContext::Label(
                                "positional argument after keyword argument",
                            ))
                            .parse_next(input);
                    }
                    spec.args.push(value);
                }
            }

            multispace0.parse_next(input)?;
            if opt(',').parse_next(input)?.is_none() {
                break;
            }
        }
        cut_err((multispace0, ')'))
            .context(StrContext::Expected(StrContextValue::CharLiteral(')')))
            .parse_next(input)?;
        Ok(spec)
    })
    .parse_next(input)
}

fn parse_arg<'i>(input: &mut &'i str) -> ModalResult<(Option<&'i str>, MarkerValue)> {
    alt((
        (
            terminated(parse_ident, (multispace0, '=', multispace0)),
            cut_err(parse_value),
        )
            .map(|(keyword, value)| (Some(keyword), value)),
        parse_value.map(|value| (None, value)),
    ))
    .parse_next(input)
}

fn parse_value(input: &mut &str) -> ModalResult<MarkerValue> {
    trace(
        "parse_value",
        alt((parse_list, parse_tuple, parse_string, parse_number)),
    )
    .context(StrContext::Expected(StrContextValue::Description("a value")))
    .parse_next(input)
}

fn parse_number(input: &mut &str) -> ModalResult<MarkerValue> {
    trace(
        "parse_number",
        (
            opt(one_of(['-', '+'])),
            digit1,
            opt(('.', digit0)),
            opt((one_of(['e', 'E']), opt(one_of(['-', '+'])), cut_err(digit1))),
        )
            .take()
            .try_map(|text: &str| {
                if text.contains(['.', 'e', 'E']) {
                    Ok(MarkerValue::Float(text.to_owned()))
                } else {
                    text.parse::<i64>().map(MarkerValue::Int)
                }
            }),
    )
    .parse_next(input)
}

fn parse_string(input: &mut &str) -> ModalResult<MarkerValue> {
    trace(
        "parse_string",
        alt((
            delimited('"', take_till(0.., '"'), cut_err('"')),
            delimited('\'', take_till(0.., '\''), cut_err('\'')),
        ))
        .map(|s: &str| MarkerValue::Str(s.to_owned())),
    )
    .parse_next(input)
}

fn parse_list(input: &mut &str) -> ModalResult<MarkerValue> {
    trace(
        "parse_list",
        delimited(
            ('[', multispace0),
            parse_elements,
            cut_err((multispace0, ']'))
                .context(StrContext::Expected(StrContextValue::CharLiteral(']'))),
        )
        .map(|(values, _)| MarkerValue::Seq(values)),
    )
    .parse_next(input)
}

fn parse_tuple(input: &mut &str) -> ModalResult<MarkerValue> {
    trace(
        "parse_tuple",
        delimited(
            ('(', multispace0),
            parse_elements,
            cut_err((multispace0, ')'))
                .context(StrContext::Expected(StrContextValue::CharLiteral(')'))),
        )
        .map(|(mut values, trailing_comma)| {
            // A parenthesized single value without a trailing comma is just that value.
            if values.len() == 1 && !trailing_comma {
                values.remove(0)
            } else {
                MarkerValue::Seq(values)
            }
        }),
    )
    .parse_next(input)
}

/// Comma-separated values with an optional trailing comma. Returns whether the trailing comma
/// was present.
fn parse_elements(input: &mut &str) -> ModalResult<(Vec<MarkerValue>, bool)> {
    let values: Vec<MarkerValue> =
        separated(0.., parse_value, (multispace0, ',', multispace0)).parse_next(input)?;
    let trailing_comma = if values.is_empty() {
        false
    } else {
        opt((multispace0, ',')).parse_next(input)?.is_some()
    };
    Ok((values, trailing_comma))
}
