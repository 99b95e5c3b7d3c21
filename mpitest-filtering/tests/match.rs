// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use mpitest_filtering::{TagExpr, TagSet};
use proptest::prelude::*;
use test_case::test_case;
use test_strategy::proptest;

fn serial() -> TagSet {
    TagSet::new()
}

#[test_case("parallel[3]", serial(), false ; "count tag does not select serial")]
#[test_case("parallel[3]", TagSet::for_nprocs(3), true ; "count tag selects same count")]
#[test_case("parallel[3]", TagSet::for_nprocs(2), false ; "count tag rejects other count")]
#[test_case("parallel", TagSet::for_nprocs(1), true ; "family tag selects single worker")]
#[test_case("parallel", TagSet::parallel_family(), true ; "family tag selects unresolved marker")]
#[test_case("not parallel or parallel[1]", serial(), true ; "serial equivalent selects unmarked")]
#[test_case("not parallel or parallel[1]", TagSet::for_nprocs(1), true ; "serial equivalent selects one worker")]
#[test_case("not parallel or parallel[1]", TagSet::for_nprocs(2), false ; "serial equivalent rejects two workers")]
#[test_case("parallel and not parallel[2]", TagSet::for_nprocs(4), true ; "difference keeps other counts")]
#[test_case("parallel and not parallel[2]", TagSet::for_nprocs(2), false ; "difference drops excluded count")]
fn test_matches(input: &str, tags: TagSet, expected: bool) {
    let expr = TagExpr::parse(input).expect("expression is valid");
    assert_eq!(
        expr.matches(&tags),
        expected,
        "expression `{input}` against tags [{tags}]"
    );
}

#[test]
fn test_custom_tags() {
    let tags: TagSet = ["slow", "parallel", "parallel[4]"].into_iter().collect();
    let expr = TagExpr::parse("slow and (parallel[4] or parallel[8])").unwrap();
    assert!(expr.matches(&tags));
    let expr = TagExpr::parse("slow and not parallel").unwrap();
    assert!(!expr.matches(&tags));
}

#[test]
fn test_parse_error_renders() {
    let error = TagExpr::parse("parallel and").unwrap_err();
    let rendered = format!("{error}");
    assert_eq!(rendered, "failed to parse tag expression `parallel and`");
    assert!(!error.message.is_empty());
}

#[proptest(cases = 64)]
fn family_tag_partitions_variants(#[strategy(1usize..64)] nprocs: usize) {
    let tags = TagSet::for_nprocs(nprocs);
    let count_tag = TagSet::nprocs_tag(nprocs);

    let by_count = TagExpr::parse(&count_tag).unwrap();
    prop_assert!(by_count.matches(&tags));
    prop_assert!(!by_count.matches(&serial()));

    let serial_equivalent = TagExpr::parse("not parallel or parallel[1]").unwrap();
    prop_assert_eq!(serial_equivalent.matches(&tags), nprocs == 1);
}
