//! Isolated Runner
//!
//! Walks compiled suites in declaration order and runs each selected test
//! according to the [`IsolationPolicy`].
//!
//! The walk is split in two: [`plan`] flattens the tree into [`Step`]s
//! (suite entry/exit and tests), then the steps are executed. Serial runs
//! execute steps straight into the logger. Parallel runs execute every test
//! step on a rayon pool into a private [`EventLog`] and then replay the logs
//! in step order, so loggers see the same sequence either way.

use crate::config::IsolationPolicy;
use crate::planner::TestFilter;
use crate::supervisor::{ChildHandle, ChildOptions};
use bulkhead_core::{RunnableFn, RunnableSuite, TestInfo, invoke};
use bulkhead_ipc::{EventLog, Logger, TestName, TestOutput};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use std::time::Duration;
use tracing::{debug, warn};

/// Runner settings
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Where test bodies run
    pub isolation: IsolationPolicy,
    /// Per-test budget for isolated tests; `None` disables
    pub timeout: Option<Duration>,
    /// Number of children running at once
    pub jobs: usize,
    /// Capture stdout/stderr of each test
    pub capture: bool,
    /// Which tests run
    pub filter: TestFilter,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationPolicy::default(),
            timeout: Some(Duration::from_secs(60)),
            jobs: 1,
            capture: true,
            filter: TestFilter::all(),
        }
    }
}

/// Outcome counts of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Tests that passed
    pub passed: usize,
    /// Tests that failed, crashed or timed out
    pub failed: usize,
    /// Tests skipped by attribute
    pub skipped: usize,
}

impl RunSummary {
    /// Whether no test failed
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Tests that reached a terminal event
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }
}

/// Counts terminal events on their way to the real logger.
struct Tally<'a> {
    inner: &'a mut dyn Logger,
    summary: RunSummary,
}

impl Logger for Tally<'_> {
    fn start_run(&mut self) {
        self.inner.start_run();
    }

    fn end_run(&mut self) {
        self.inner.end_run();
    }

    fn start_suite(&mut self, suites: &[String]) {
        self.inner.start_suite(suites);
    }

    fn end_suite(&mut self, suites: &[String]) {
        self.inner.end_suite(suites);
    }

    fn start_test(&mut self, test: &TestName) {
        self.inner.start_test(test);
    }

    fn passed_test(&mut self, test: &TestName, output: &TestOutput) {
        self.summary.passed += 1;
        self.inner.passed_test(test, output);
    }

    fn failed_test(&mut self, test: &TestName, message: &str, output: &TestOutput) {
        self.summary.failed += 1;
        self.inner.failed_test(test, message, output);
    }

    fn skipped_test(&mut self, test: &TestName) {
        self.summary.skipped += 1;
        self.inner.skipped_test(test);
    }
}

/// One unit of a planned run
pub enum Step<'a> {
    /// Enter a suite
    StartSuite(Vec<String>),
    /// Leave a suite
    EndSuite(Vec<String>),
    /// Run a test
    Run(TestName, &'a TestInfo<RunnableFn>),
    /// Report a test skipped without running it
    Skip(TestName),
}

/// Flatten suites into steps: each suite's own tests, then its subsuites.
/// Suites without a selected test anywhere beneath them are left out.
pub fn plan<'a>(suites: &'a [RunnableSuite], filter: &TestFilter) -> Vec<Step<'a>> {
    let mut steps = Vec::new();
    let mut path = Vec::new();
    for suite in suites {
        plan_suite(suite, filter, &mut path, &mut steps);
    }
    steps
}

fn plan_suite<'a>(
    suite: &'a RunnableSuite,
    filter: &TestFilter,
    path: &mut Vec<String>,
    steps: &mut Vec<Step<'a>>,
) {
    if filter.prunes(path.as_slice(), suite) {
        return;
    }

    path.push(suite.name().to_string());
    steps.push(Step::StartSuite(path.clone()));

    for test in suite.tests() {
        if !filter.matches(path.as_slice(), test) {
            continue;
        }
        let name = test.test_name(path.as_slice());
        if test.attrs.is_skipped() {
            steps.push(Step::Skip(name));
        } else {
            steps.push(Step::Run(name, test));
        }
    }

    for sub in suite.subsuites() {
        plan_suite(sub, filter, path, steps);
    }

    steps.push(Step::EndSuite(path.clone()));
    path.pop();
}

/// Runs compiled suites
pub struct Runner {
    config: RunnerConfig,
}

impl Runner {
    /// Create a runner
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Runner settings
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn child_options(&self) -> ChildOptions {
        ChildOptions {
            timeout: self.config.timeout,
            capture: self.config.capture,
        }
    }

    /// Run every selected test, reporting to `logger`.
    ///
    /// `start_run` and `end_run` are delivered exactly once. Every selected
    /// test gets exactly one terminal event.
    pub fn run(&self, suites: &[RunnableSuite], logger: &mut dyn Logger) -> RunSummary {
        let steps = plan(suites, &self.config.filter);
        let tests = steps
            .iter()
            .filter(|step| matches!(step, Step::Run(..)))
            .count();

        let mut jobs = self.config.jobs.max(1);
        if jobs > 1 && !self.config.isolation.is_isolated() {
            warn!("--jobs needs an isolating policy; running in-process tests serially");
            jobs = 1;
        }
        debug!(
            isolation = %self.config.isolation,
            jobs,
            tests,
            "starting run"
        );

        let mut tally = Tally {
            inner: logger,
            summary: RunSummary::default(),
        };
        tally.start_run();

        if jobs > 1 && tests > 1 {
            let jobs = jobs.min(tests);
            match self.run_parallel(&steps, jobs) {
                Some(logs) => replay(&steps, logs, &mut tally),
                None => self.run_serial(&steps, &mut tally),
            }
        } else {
            self.run_serial(&steps, &mut tally);
        }

        tally.end_run();
        tally.summary
    }

    fn run_serial(&self, steps: &[Step<'_>], logger: &mut dyn Logger) {
        let mut child: Option<ChildHandle> = None;

        for step in steps {
            match step {
                Step::StartSuite(path) => logger.start_suite(path),
                Step::EndSuite(path) => logger.end_suite(path),
                Step::Skip(name) => logger.skipped_test(name),
                Step::Run(name, test) => match self.config.isolation {
                    IsolationPolicy::InProcess => {
                        logger.start_test(name);
                        invoke(test, self.config.capture).report(name, logger);
                    }
                    IsolationPolicy::PerTest => self.run_in_fresh_child(name, logger),
                    IsolationPolicy::PerRun => self.run_in_reused_child(&mut child, name, logger),
                },
            }
        }

        if let Some(child) = child {
            let _ = child.shutdown();
        }
    }

    /// Per-test isolation: spawn, run, shut down
    fn run_in_fresh_child(&self, name: &TestName, logger: &mut dyn Logger) {
        match ChildHandle::spawn(&self.child_options()) {
            Ok(mut child) => {
                if child.run_test(name, logger).is_ok() {
                    let _ = child.shutdown();
                }
            }
            Err(e) => report_spawn_failure(name, &e.to_string(), logger),
        }
    }

    /// Per-run isolation: keep one child until it faults
    fn run_in_reused_child(
        &self,
        slot: &mut Option<ChildHandle>,
        name: &TestName,
        logger: &mut dyn Logger,
    ) {
        if slot.is_none() {
            match ChildHandle::spawn(&self.child_options()) {
                Ok(child) => *slot = Some(child),
                Err(e) => {
                    report_spawn_failure(name, &e.to_string(), logger);
                    return;
                }
            }
        }

        let faulted = match slot.as_mut() {
            Some(child) => child.run_test(name, logger).is_err(),
            None => false,
        };
        if faulted {
            // Dropping the handle kills and reaps it; the next test respawns.
            if let Some(child) = slot.take() {
                debug!(pid = child.pid(), "discarding faulted child");
            }
        }
    }

    /// Run every test step on a pool, returning one event log per step index.
    /// `None` if the pool cannot be built.
    fn run_parallel(&self, steps: &[Step<'_>], jobs: usize) -> Option<Vec<Option<EventLog>>> {
        let pool = match ThreadPoolBuilder::new().num_threads(jobs).build() {
            Ok(pool) => pool,
            Err(e) => {
                warn!("failed to build job pool, running serially: {}", e);
                return None;
            }
        };

        let work: Vec<(usize, &TestName)> = steps
            .iter()
            .enumerate()
            .filter_map(|(index, step)| match step {
                Step::Run(name, _) => Some((index, name)),
                _ => None,
            })
            .collect();

        let finished: Vec<(usize, EventLog)> = match self.config.isolation {
            IsolationPolicy::PerRun => {
                // Round-robin shards, one long-lived child each.
                let mut shards: Vec<Vec<(usize, &TestName)>> = vec![Vec::new(); jobs];
                for (position, entry) in work.into_iter().enumerate() {
                    shards[position % jobs].push(entry);
                }
                let shard_logs: Vec<Vec<(usize, EventLog)>> = pool.install(|| {
                    shards
                        .into_par_iter()
                        .map(|shard| self.run_shard(&shard))
                        .collect()
                });
                shard_logs.into_iter().flatten().collect()
            }
            _ => pool.install(|| {
                work.into_par_iter()
                    .map(|(index, name)| {
                        let mut log = EventLog::new();
                        self.run_in_fresh_child(name, &mut log);
                        (index, log)
                    })
                    .collect()
            }),
        };

        let mut logs: Vec<Option<EventLog>> = (0..steps.len()).map(|_| None).collect();
        for (index, log) in finished {
            logs[index] = Some(log);
        }
        Some(logs)
    }

    fn run_shard(&self, shard: &[(usize, &TestName)]) -> Vec<(usize, EventLog)> {
        let mut child = None;
        let mut logs = Vec::with_capacity(shard.len());
        for &(index, name) in shard {
            let mut log = EventLog::new();
            self.run_in_reused_child(&mut child, name, &mut log);
            logs.push((index, log));
        }
        if let Some(child) = child {
            let _ = child.shutdown();
        }
        logs
    }
}

/// Deliver planned suite events and recorded test events in step order
fn replay(steps: &[Step<'_>], mut logs: Vec<Option<EventLog>>, logger: &mut dyn Logger) {
    for (index, step) in steps.iter().enumerate() {
        match step {
            Step::StartSuite(path) => logger.start_suite(path),
            Step::EndSuite(path) => logger.end_suite(path),
            Step::Skip(name) => logger.skipped_test(name),
            Step::Run(name, _) => match logs.get_mut(index).and_then(Option::take) {
                Some(log) => log.replay(logger),
                None => report_spawn_failure(name, "test was never scheduled", logger),
            },
        }
    }
}

/// Report a test that never reached a child
fn report_spawn_failure(name: &TestName, message: &str, logger: &mut dyn Logger) {
    warn!(test = %name, "{}", message);
    logger.start_test(name);
    logger.failed_test(name, message, &TestOutput::default());
}
