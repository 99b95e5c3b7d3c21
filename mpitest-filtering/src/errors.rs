// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced while parsing tag expressions.

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// An error that occurred while parsing a tag expression.
///
/// Render it with [`miette::Report`] to get the input with the failing location underlined.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
#[error("failed to parse tag expression `{input}`")]
#[non_exhaustive]
pub struct TagExprParseError {
    /// The input string.
    #[source_code]
    pub input: String,

    /// The location of the failure within `input`.
    #[label("{}", message)]
    pub span: SourceSpan,

    /// A description of what was expected at `span`.
    pub message: String,
}

impl TagExprParseError {
    pub(crate) fn new(input: impl Into<String>, offset: usize, message: impl Into<String>) -> Self {
        let input = input.into();
        // Underline the token at the failure offset, or a zero-width caret at the end of input.
        let len = input[offset..]
            .split(char::is_whitespace)
            .next()
            .map_or(0, str::len);
        Self {
            input,
            span: (offset, len).into(),
            message: message.into(),
        }
    }

    /// Returns the byte offset where parsing failed.
    pub fn offset(&self) -> usize {
        self.span.offset()
    }
}
