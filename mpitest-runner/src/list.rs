// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Declaring tests and expanding them into a list of runnable entries.

use crate::{
    config::ProcessLimit,
    errors::{CollectionError, MarkerConfigError, MarkerConfigErrorKind},
    marker::{MarkerSpec, WorkerCountSet},
};
use debug_ignore::DebugIgnore;
use itertools::Itertools;
use libtest_mimic::Failed;
use mpitest_filtering::{TagExpr, TagSet};
use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};
use tracing::debug;

/// A test body. Returning `Err` or panicking fails the test.
pub type TestBody = Arc<dyn Fn(&WorkerContext) -> Result<(), Failed> + Send + Sync>;

/// Information passed to a running test body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WorkerContext {
    nprocs: NonZeroUsize,
    rank: Option<usize>,
}

impl WorkerContext {
    /// Creates a new context.
    pub fn new(nprocs: NonZeroUsize, rank: Option<usize>) -> Self {
        Self { nprocs, rank }
    }

    /// The number of worker processes running this test. Serial tests run with one.
    pub fn nprocs(&self) -> NonZeroUsize {
        self.nprocs
    }

    /// This process's rank within the worker group, if known.
    pub fn rank(&self) -> Option<usize> {
        self.rank
    }
}

#[derive(Clone, Debug)]
enum MarkerSource {
    Spec(MarkerSpec),
    Text(String),
}

/// A test as declared by the test author, before expansion.
#[derive(Clone, Debug)]
pub struct MpiTest {
    name: String,
    body: DebugIgnore<TestBody>,
    marker: Option<MarkerSource>,
    ignored: bool,
}

impl MpiTest {
    /// Declares a serial test.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&WorkerContext) -> Result<(), Failed> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: DebugIgnore(Arc::new(body)),
            marker: None,
            ignored: false,
        }
    }

    /// Attaches a `parallel` marker.
    pub fn with_marker(mut self, marker: MarkerSpec) -> Self {
        self.marker = Some(MarkerSource::Spec(marker));
        self
    }

    /// Attaches a `parallel` marker written as text, e.g. `parallel(nprocs=[1, 2])`.
    ///
    /// The text is parsed when the test list is built; a syntax error makes the test invalid.
    pub fn with_marker_text(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(MarkerSource::Text(marker.into()));
        self
    }

    /// Marks the test as ignored. Ignored tests only run with `--ignored` or `--include-ignored`.
    pub fn with_ignored_flag(mut self, ignored: bool) -> Self {
        self.ignored = ignored;
        self
    }

    /// The test name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn worker_counts(&self) -> Option<Result<WorkerCountSet, MarkerConfigError>> {
        let counts = match self.marker.as_ref()? {
            MarkerSource::Spec(spec) => spec.worker_counts(&self.name),
            MarkerSource::Text(text) => MarkerSpec::parse(text)
                .map_err(|error| {
                    MarkerConfigError::new(&self.name, MarkerConfigErrorKind::Syntax(error))
                })
                .and_then(|spec| spec.worker_counts(&self.name)),
        };
        Some(counts)
    }
}

/// An unmarked test, run once in this process.
#[derive(Clone, Debug)]
pub struct SerialTest {
    name: String,
    body: DebugIgnore<TestBody>,
    tags: TagSet,
    ignored: bool,
}

impl SerialTest {
    /// The test body.
    pub fn body(&self) -> &TestBody {
        &self.body
    }
}

/// One worker count of a test carrying a `parallel` marker.
#[derive(Clone, Debug)]
pub struct TestVariant {
    name: String,
    test_name: String,
    nprocs: NonZeroUsize,
    body: DebugIgnore<TestBody>,
    tags: TagSet,
    ignored: bool,
}

impl TestVariant {
    /// The variant name, e.g. `test_sum[nprocs=2]`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of the declared test this variant belongs to.
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// The number of worker processes.
    pub fn nprocs(&self) -> NonZeroUsize {
        self.nprocs
    }

    /// The test body.
    pub fn body(&self) -> &TestBody {
        &self.body
    }
}

/// A test that could not be collected. It is reported as an error when run.
#[derive(Clone, Debug)]
pub struct InvalidTest {
    name: String,
    tags: TagSet,
    error: CollectionError,
    ignored: bool,
}

impl InvalidTest {
    /// The reason the test is invalid.
    pub fn error(&self) -> &CollectionError {
        &self.error
    }
}

/// An entry in the expanded test list.
#[derive(Clone, Debug)]
pub enum TestListEntry {
    /// A test without a `parallel` marker.
    Serial(SerialTest),
    /// One worker count of a parallel test.
    Parallel(TestVariant),
    /// A test that failed to collect.
    Invalid(InvalidTest),
}

impl TestListEntry {
    /// The name reported to the test harness.
    pub fn name(&self) -> &str {
        match self {
            Self::Serial(test) => &test.name,
            Self::Parallel(variant) => &variant.name,
            Self::Invalid(invalid) => &invalid.name,
        }
    }

    /// The selection tags.
    pub fn tags(&self) -> &TagSet {
        match self {
            Self::Serial(test) => &test.tags,
            Self::Parallel(variant) => &variant.tags,
            Self::Invalid(invalid) => &invalid.tags,
        }
    }

    /// Whether the test is ignored by default.
    pub fn is_ignored(&self) -> bool {
        match self {
            Self::Serial(test) => test.ignored,
            Self::Parallel(variant) => variant.ignored,
            Self::Invalid(invalid) => invalid.ignored,
        }
    }

    /// Returns true if the test's marker could not be resolved to worker counts.
    pub fn has_marker_error(&self) -> bool {
        matches!(
            self,
            Self::Invalid(InvalidTest {
                error: CollectionError::Marker(_),
                ..
            })
        )
    }

    /// Returns true if this entry came from a test carrying a `parallel` marker.
    pub fn is_parallel(&self) -> bool {
        !matches!(self, Self::Serial(_))
    }
}

/// The expanded list of tests.
#[derive(Clone, Debug, Default)]
pub struct TestList {
    entries: Vec<TestListEntry>,
}

impl TestList {
    /// Expands declared tests: one entry per requested worker count, named and tagged, with
    /// counts above `limit` turned into invalid entries.
    pub fn new(tests: impl IntoIterator<Item = MpiTest>, limit: ProcessLimit) -> Self {
        let mut entries = Vec::new();
        for test in tests {
            expand_test(test, limit, &mut entries);
        }
        Self { entries }
    }

    /// The entries, in declaration order.
    pub fn entries(&self) -> &[TestListEntry] {
        &self.entries
    }

    /// Consumes the list, returning its entries.
    pub fn into_entries(self) -> Vec<TestListEntry> {
        self.entries
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keeps only entries whose tags match `expr`.
    ///
    /// Tests with a malformed marker are always kept, so that they are reported whatever the
    /// selection.
    pub fn retain_matching(&mut self, expr: &TagExpr) {
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.has_marker_error() || expr.matches(entry.tags()));
        debug!(
            "tag expression `{expr}` selected {} of {before} tests",
            self.entries.len()
        );
    }

    /// Returns true if any entry came from a parallel test.
    pub fn has_parallel(&self) -> bool {
        self.entries.iter().any(TestListEntry::is_parallel)
    }
}

fn expand_test(test: MpiTest, limit: ProcessLimit, entries: &mut Vec<TestListEntry>) {
    let counts = match test.worker_counts() {
        None => {
            entries.push(TestListEntry::Serial(SerialTest {
                name: test.name,
                body: test.body,
                tags: TagSet::new(),
                ignored: test.ignored,
            }));
            return;
        }
        Some(Ok(counts)) => counts,
        Some(Err(error)) => {
            debug!("{error}");
            entries.push(TestListEntry::Invalid(InvalidTest {
                name: test.name,
                tags: TagSet::parallel_family(),
                error: error.into(),
                ignored: test.ignored,
            }));
            return;
        }
    };

    for (name, nprocs) in variant_names(&test.name, &counts).into_iter().zip(counts.iter()) {
        let tags = TagSet::for_nprocs(nprocs.get());
        let entry = match limit.check(&name, nprocs) {
            Ok(()) => TestListEntry::Parallel(TestVariant {
                name,
                test_name: test.name.clone(),
                nprocs,
                body: test.body.clone(),
                tags,
                ignored: test.ignored,
            }),
            Err(error) => {
                debug!("{error}");
                TestListEntry::Invalid(InvalidTest {
                    name,
                    tags,
                    error: error.into(),
                    ignored: test.ignored,
                })
            }
        };
        entries.push(entry);
    }
}

/// Returns the display name of each variant, in order.
///
/// A single count keeps the test name. Otherwise names are suffixed with `[nprocs=<count>]`, and
/// repeated counts additionally with `-<k>`, `k` being the occurrence index among equal counts.
fn variant_names(test_name: &str, counts: &WorkerCountSet) -> Vec<String> {
    if counts.len() == 1 {
        return vec![test_name.to_owned()];
    }

    let totals = counts.iter().counts();
    let mut seen: HashMap<NonZeroUsize, usize> = HashMap::new();
    counts
        .iter()
        .map(|nprocs| {
            if totals.get(&nprocs).copied().unwrap_or(0) > 1 {
                let k = seen.entry(nprocs).or_default();
                let name = format!("{test_name}[nprocs={nprocs}-{k}]");
                *k += 1;
                name
            } else {
                format!("{test_name}[nprocs={nprocs}]")
            }
        })
        .collect()
}
