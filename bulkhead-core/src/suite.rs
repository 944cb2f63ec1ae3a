//! Suite Tree Compiler
//!
//! Turns a [`SuiteBuilder`] description into an immutable [`CompiledSuite`]
//! tree. Compilation merges inherited attributes once per node and stamps
//! every test with an id drawn from a process-wide counter.
//!
//! ## Id lifecycle
//!
//! The counter starts at zero when the process starts. Each compilation
//! reserves one contiguous block sized to the number of tests it is about to
//! create, then hands ids out in declaration order: a suite's own tests
//! first, then its subsuites, depth-first. Two processes that compile the
//! same declarations in the same order therefore agree on every id, which is
//! what lets a child process locate the test its parent asked for.
//! [`reset_test_ids`] exists for tests that need to compare independent
//! compilations and must not be used while other threads compile.

use crate::attributes::Attributes;
use bulkhead_ipc::{SuitePath, TestName};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Compile-time test identity
pub type TestId = u64;

static NEXT_TEST_ID: AtomicU64 = AtomicU64::new(0);

/// Reserve `count` consecutive ids, returning the first.
fn reserve_test_ids(count: usize) -> TestId {
    NEXT_TEST_ID.fetch_add(count as u64, Ordering::Relaxed)
}

/// Restart id assignment from zero.
#[doc(hidden)]
pub fn reset_test_ids() {
    NEXT_TEST_ID.store(0, Ordering::Relaxed);
}

/// One declared test inside a builder
struct TestDecl<B> {
    name: String,
    attrs: Attributes,
    body: B,
}

/// Mutable description of a suite: tests, subsuites, attributes and hooks.
///
/// `B` is the raw body type; see [`crate::Suite`] for the fixture-based
/// alias most code uses.
pub struct SuiteBuilder<B> {
    name: String,
    attrs: Attributes,
    tests: Vec<TestDecl<B>>,
    subsuites: Vec<SuiteBuilder<B>>,
    setup: Option<B>,
    teardown: Option<B>,
}

/// What a compile transform sees for one test: its body plus the setup and
/// teardown hooks of every enclosing suite, outermost first.
pub struct TestBody<'a, B> {
    /// The test body
    pub body: &'a B,
    /// Setup hooks, outermost suite first
    pub setup: &'a [&'a B],
    /// Teardown hooks, outermost suite first; run them in reverse
    pub teardown: &'a [&'a B],
}

impl<B> SuiteBuilder<B> {
    /// Start describing a suite
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_attrs(name, Attributes::new())
    }

    /// Start describing a suite whose tests all inherit `attrs`
    pub fn with_attrs(name: impl Into<String>, attrs: Attributes) -> Self {
        let name = name.into();
        debug_assert!(!name.is_empty(), "suite names must not be empty");
        Self {
            name,
            attrs,
            tests: Vec::new(),
            subsuites: Vec::new(),
            setup: None,
            teardown: None,
        }
    }

    /// Suite name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attributes declared on this suite (not yet merged)
    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    /// Declare a test with a raw body
    pub fn add_test(&mut self, name: impl Into<String>, attrs: Attributes, body: B) -> &mut Self {
        let name = name.into();
        debug_assert!(!name.is_empty(), "test names must not be empty");
        self.tests.push(TestDecl { name, attrs, body });
        self
    }

    /// Attach an already-built subsuite
    pub fn add_subsuite(&mut self, suite: SuiteBuilder<B>) -> &mut Self {
        self.subsuites.push(suite);
        self
    }

    /// Declare a nested suite
    pub fn subsuite(
        &mut self,
        name: impl Into<String>,
        build: impl FnOnce(&mut SuiteBuilder<B>),
    ) -> &mut Self {
        self.subsuite_with(name, Attributes::new(), build)
    }

    /// Declare a nested suite with attributes
    pub fn subsuite_with(
        &mut self,
        name: impl Into<String>,
        attrs: Attributes,
        build: impl FnOnce(&mut SuiteBuilder<B>),
    ) -> &mut Self {
        let mut suite = SuiteBuilder::with_attrs(name, attrs);
        build(&mut suite);
        self.add_subsuite(suite)
    }

    /// Set the hook run before each test in this suite and its subsuites
    pub fn set_setup(&mut self, hook: B) -> &mut Self {
        self.setup = Some(hook);
        self
    }

    /// Set the hook run after each test in this suite and its subsuites
    pub fn set_teardown(&mut self, hook: B) -> &mut Self {
        self.teardown = Some(hook);
        self
    }

    /// Number of tests declared here and in every subsuite
    pub fn declared_tests(&self) -> usize {
        self.tests.len()
            + self
                .subsuites
                .iter()
                .map(SuiteBuilder::declared_tests)
                .sum::<usize>()
    }

    /// Compile into an immutable tree.
    ///
    /// `inherited` is united beneath this suite's own attributes, and
    /// `transform` turns each test body (with its hooks) into the runnable
    /// form stored in the tree.
    pub fn compile<B2, F>(&self, inherited: &Attributes, transform: F) -> CompiledSuite<B2>
    where
        F: Fn(&TestBody<'_, B>) -> B2,
    {
        let mut next = reserve_test_ids(self.declared_tests());
        let mut setup = Vec::new();
        let mut teardown = Vec::new();
        self.compile_node(inherited, &transform, &mut next, &mut setup, &mut teardown)
    }

    fn compile_node<'a, B2, F>(
        &'a self,
        inherited: &Attributes,
        transform: &F,
        next: &mut TestId,
        setup: &mut Vec<&'a B>,
        teardown: &mut Vec<&'a B>,
    ) -> CompiledSuite<B2>
    where
        F: Fn(&TestBody<'_, B>) -> B2,
    {
        let attrs = self.attrs.unite(inherited);

        if let Some(hook) = &self.setup {
            setup.push(hook);
        }
        if let Some(hook) = &self.teardown {
            teardown.push(hook);
        }

        let mut tests = Vec::with_capacity(self.tests.len());
        for decl in &self.tests {
            let id = *next;
            *next += 1;
            let function = transform(&TestBody {
                body: &decl.body,
                setup: setup.as_slice(),
                teardown: teardown.as_slice(),
            });
            tests.push(TestInfo {
                name: decl.name.clone(),
                function,
                attrs: decl.attrs.unite(&attrs),
                id,
            });
        }

        let mut subsuites = Vec::with_capacity(self.subsuites.len());
        for suite in &self.subsuites {
            subsuites.push(suite.compile_node(&attrs, transform, next, setup, teardown));
        }

        if self.setup.is_some() {
            setup.pop();
        }
        if self.teardown.is_some() {
            teardown.pop();
        }

        CompiledSuite {
            name: self.name.clone(),
            attrs,
            tests,
            subsuites,
        }
    }
}

/// A compiled test: name, runnable function, merged attributes, id.
pub struct TestInfo<B> {
    /// Test name
    pub name: String,
    /// Runnable function
    pub function: B,
    /// Merged attributes (own plus every ancestor's)
    pub attrs: Attributes,
    /// Compile-time id
    pub id: TestId,
}

impl<B> TestInfo<B> {
    /// Full identity of this test given its enclosing suite path
    pub fn test_name(&self, suites: &[String]) -> TestName {
        TestName::new(suites.to_vec(), self.name.clone(), self.id)
    }
}

impl<B> fmt::Debug for TestInfo<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestInfo")
            .field("name", &self.name)
            .field("attrs", &self.attrs)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Immutable suite tree node
pub struct CompiledSuite<B> {
    name: String,
    attrs: Attributes,
    tests: Vec<TestInfo<B>>,
    subsuites: Vec<CompiledSuite<B>>,
}

/// A test located by id, with the path of suites leading to it
#[derive(Debug)]
pub struct FoundTest<'a, B> {
    /// Enclosing suites, root first
    pub suites: SuitePath,
    /// The test
    pub info: &'a TestInfo<B>,
}

impl<B> CompiledSuite<B> {
    /// Suite name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Merged attributes of this suite
    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    /// This suite's own tests, in declaration order
    pub fn tests(&self) -> &[TestInfo<B>] {
        &self.tests
    }

    /// Nested suites, in declaration order
    pub fn subsuites(&self) -> &[CompiledSuite<B>] {
        &self.subsuites
    }

    /// Number of tests here and in every subsuite
    pub fn test_count(&self) -> usize {
        self.tests.len()
            + self
                .subsuites
                .iter()
                .map(CompiledSuite::test_count)
                .sum::<usize>()
    }

    /// Visit every test in declaration order with its suite path
    pub fn for_each_test<'a>(&'a self, visit: &mut dyn FnMut(&[String], &'a TestInfo<B>)) {
        let mut path = Vec::new();
        self.walk(&mut path, visit);
    }

    fn walk<'a>(
        &'a self,
        path: &mut Vec<String>,
        visit: &mut dyn FnMut(&[String], &'a TestInfo<B>),
    ) {
        path.push(self.name.clone());
        for test in &self.tests {
            visit(path.as_slice(), test);
        }
        for suite in &self.subsuites {
            suite.walk(path, visit);
        }
        path.pop();
    }

    /// Locate a test by id
    pub fn find(&self, id: TestId) -> Option<FoundTest<'_, B>> {
        let mut found = None;
        self.for_each_test(&mut |suites, info| {
            if found.is_none() && info.id == id {
                found = Some(FoundTest {
                    suites: suites.to_vec(),
                    info,
                });
            }
        });
        found
    }

    /// Build a new tree mirroring this one.
    ///
    /// Structure and names are preserved; `attrs` is united beneath each
    /// node's existing attributes; every test gets a fresh id and the
    /// function produced by `transform`.
    pub fn recompile<B2, F>(&self, attrs: &Attributes, transform: F) -> CompiledSuite<B2>
    where
        F: Fn(&B) -> B2,
    {
        let mut next = reserve_test_ids(self.test_count());
        self.recompile_node(attrs, &transform, &mut next)
    }

    fn recompile_node<B2, F>(
        &self,
        attrs: &Attributes,
        transform: &F,
        next: &mut TestId,
    ) -> CompiledSuite<B2>
    where
        F: Fn(&B) -> B2,
    {
        let mut tests = Vec::with_capacity(self.tests.len());
        for test in &self.tests {
            let id = *next;
            *next += 1;
            tests.push(TestInfo {
                name: test.name.clone(),
                function: transform(&test.function),
                attrs: test.attrs.unite(attrs),
                id,
            });
        }

        let subsuites = self
            .subsuites
            .iter()
            .map(|suite| suite.recompile_node(attrs, transform, next))
            .collect();

        CompiledSuite {
            name: self.name.clone(),
            attrs: self.attrs.unite(attrs),
            tests,
            subsuites,
        }
    }
}

impl<B> fmt::Debug for CompiledSuite<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSuite")
            .field("name", &self.name)
            .field("attrs", &self.attrs)
            .field("tests", &self.tests)
            .field("subsuites", &self.subsuites)
            .finish()
    }
}
