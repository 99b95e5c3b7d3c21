// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing for tag expressions.
//!
//! Operators are words, so a tag is any maximal run of tag characters that isn't one of the
//! keywords. `parallel[3]` is therefore a single tag, and `not(parallel)` is `not (parallel)`.

use crate::{errors::TagExprParseError, expression::TagExpr};
use smol_str::SmolStr;
use winnow::{
    ModalParser, ModalResult, Parser,
    ascii::multispace0,
    combinator::{alt, cut_err, delimited, eof, preceded, repeat, terminated, trace},
    error::{ContextError, StrContext, StrContextValue},
    token::take_while,
};

const KEYWORDS: &[&str] = &["and", "or", "not"];

pub(crate) fn is_tag_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | ':' | '+' | '-' | '.' | '[' | ']' | '\\' | '/')
}

pub(crate) fn parse(input: &str) -> Result<TagExpr, TagExprParseError> {
    terminated(parse_or_expr, (multispace0, eof))
        .parse(input)
        .map_err(|error| {
            let message = error.inner().to_string();
            let message = if message.is_empty() {
                "unexpected input".to_owned()
            } else {
                message.replace('\n', "; ")
            };
            TagExprParseError::new(input, error.offset(), message)
        })
}

fn word<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    preceded(multispace0, take_while(1.., is_tag_char)).parse_next(input)
}

fn keyword<'i>(kw: &'static str) -> impl ModalParser<&'i str, &'i str, ContextError> {
    word.verify(move |w: &str| w == kw)
}

fn parse_tag(input: &mut &str) -> ModalResult<TagExpr> {
    trace(
        "parse_tag",
        word.verify(|w: &str| !KEYWORDS.contains(&w))
            .map(|w: &str| TagExpr::Tag(SmolStr::new(w))),
    )
    .context(StrContext::Label("tag"))
    .parse_next(input)
}

fn parse_parens_expr(input: &mut &str) -> ModalResult<TagExpr> {
    trace(
        "parse_parens_expr",
        delimited(
            (multispace0, '('),
            cut_err(parse_or_expr),
            cut_err((multispace0, ')'))
                .context(StrContext::Expected(StrContextValue::CharLiteral(')'))),
        )
        .map(|expr| TagExpr::Parens(Box::new(expr))),
    )
    .parse_next(input)
}

fn parse_not_expr(input: &mut &str) -> ModalResult<TagExpr> {
    trace(
        "parse_not_expr",
        alt((
            preceded(
                keyword("not"),
                cut_err(parse_not_expr)
                    .context(StrContext::Expected(StrContextValue::Description(
                        "expression after `not`",
                    ))),
            )
            .map(|expr| TagExpr::Not(Box::new(expr))),
            parse_parens_expr,
            parse_tag,
        )),
    )
    .parse_next(input)
}

fn parse_and_expr(input: &mut &str) -> ModalResult<TagExpr> {
    trace("parse_and_expr", |input: &mut &str| -> ModalResult<TagExpr> {
        let first = parse_not_expr.parse_next(input)?;
        let rest: Vec<TagExpr> = repeat(
            0..,
            preceded(
                keyword("and"),
                cut_err(parse_not_expr).context(StrContext::Expected(
                    StrContextValue::Description("expression after `and`"),
                )),
            ),
        )
        .parse_next(input)?;
        Ok(rest.into_iter().fold(first, |expr_1, expr_2| {
            TagExpr::And(Box::new(expr_1), Box::new(expr_2))
        }))
    })
    .parse_next(input)
}

fn parse_or_expr(input: &mut &str) -> ModalResult<TagExpr> {
    // "or" binds less tightly than "and", so parse and within or.
    trace("parse_or_expr", |input: &mut &str| -> ModalResult<TagExpr> {
        let first = parse_and_expr.parse_next(input)?;
        let rest: Vec<TagExpr> = repeat(
            0..,
            preceded(
                keyword("or"),
                cut_err(parse_and_expr).context(StrContext::Expected(
                    StrContextValue::Description("expression after `or`"),
                )),
            ),
        )
        .parse_next(input)?;
        Ok(rest.into_iter().fold(first, |expr_1, expr_2| {
            TagExpr::Or(Box::new(expr_1), Box::new(expr_2))
        }))
    })
    .parse_next(input)
}
