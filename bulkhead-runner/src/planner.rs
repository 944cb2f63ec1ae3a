//! Test Planner
//!
//! Decides which compiled tests a run selects.
//!
//! Filtering options:
//! - Regex pattern matching on the slash-joined full name
//! - Required attributes (all must be present)
//! - Excluded attributes (none may be present)
//!
//! Selection never reorders: tests run in declaration order.

use bulkhead_core::{CompiledSuite, TestInfo};
use regex::Regex;

/// Test selection criteria
#[derive(Debug, Clone, Default)]
pub struct TestFilter {
    pattern: Option<Regex>,
    require: Vec<String>,
    exclude: Vec<String>,
}

impl TestFilter {
    /// Select every test
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a filter from CLI-style options
    pub fn new(
        pattern: Option<&str>,
        require: Vec<String>,
        exclude: Vec<String>,
    ) -> Result<Self, regex::Error> {
        let pattern = pattern.map(Regex::new).transpose()?;
        Ok(Self {
            pattern,
            require,
            exclude,
        })
    }

    /// Restrict to tests whose full name matches `pattern`
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Require an attribute
    pub fn require_attr(mut self, label: impl Into<String>) -> Self {
        self.require.push(label.into());
        self
    }

    /// Exclude tests carrying an attribute
    pub fn exclude_attr(mut self, label: impl Into<String>) -> Self {
        self.exclude.push(label.into());
        self
    }

    /// Whether any criterion is set; an inactive filter selects everything
    pub fn is_active(&self) -> bool {
        self.pattern.is_some() || !self.require.is_empty() || !self.exclude.is_empty()
    }

    /// Whether `suite` should be left out entirely: an active filter selects
    /// nothing in it. Without a filter every suite is entered, empty or not.
    pub fn prunes<B>(&self, parents: &[String], suite: &CompiledSuite<B>) -> bool {
        self.is_active() && self.selected_in(parents, suite) == 0
    }

    /// Whether a test with this path and merged attributes is selected
    pub fn matches<B>(&self, suites: &[String], test: &TestInfo<B>) -> bool {
        if let Some(re) = &self.pattern {
            if !re.is_match(&test.test_name(suites).full_name()) {
                return false;
            }
        }

        if !self.require.iter().all(|label| test.attrs.contains(label)) {
            return false;
        }

        if self.exclude.iter().any(|label| test.attrs.contains(label)) {
            return false;
        }

        true
    }

    /// Number of selected tests in `suite` and below. `parents` is the path
    /// of suites enclosing `suite`.
    pub fn selected_in<B>(&self, parents: &[String], suite: &CompiledSuite<B>) -> usize {
        let mut path = parents.to_vec();
        path.push(suite.name().to_string());
        let own = suite
            .tests()
            .iter()
            .filter(|test| self.matches(&path, test))
            .count();
        own + suite
            .subsuites()
            .iter()
            .map(|sub| self.selected_in(&path, sub))
            .sum::<usize>()
    }
}
