//! Result recording and the suite driver.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use stagecheck_exec::Termination;
use thiserror::Error;

use crate::adapter::{ROOT_TARGET, SuiteBuilder};
use crate::cases::{CaseRegistry, Category};
use crate::config::HarnessConfig;
use crate::error::UnitError;
use crate::graph::{GraphError, LocalGraph};
use crate::matrix::{MatrixPlanner, OptimizeMode};
use crate::report::{VerificationResult, VerificationSummary};
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};

/// Identity and progress position of one verification chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub label: String,
    pub category: Category,
    pub case_name: String,
    pub target: String,
    pub entry: String,
    pub mode: OptimizeMode,
    pub ordinal: usize,
    pub total: usize,
}

/// Successful end of a chain. A pass carries the termination of the process
/// it verified, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass(Option<Termination>),
    Skip(String),
}

/// Collects one result per chain; optionally mirrors them to a JSONL log and
/// to human progress lines. Shared by every unit of a run.
#[derive(Default)]
pub struct RunRecorder {
    results: Mutex<Vec<VerificationResult>>,
    log: Option<Mutex<LogEmitter>>,
    progress: Option<Mutex<Box<dyn Write + Send>>>,
}

impl std::fmt::Debug for RunRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRecorder")
            .field("results", &self.results.lock().len())
            .field("log", &self.log.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl RunRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_log(mut self, emitter: LogEmitter) -> Self {
        self.log = Some(Mutex::new(emitter));
        self
    }

    /// Write `Test i/N <label>...` lines to `sink`.
    #[must_use]
    pub fn with_progress(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.progress = Some(Mutex::new(sink));
        self
    }

    pub fn record(&self, unit: &UnitInfo, verdict: Result<Verdict, &UnitError>, elapsed: Duration) {
        let (outcome, tier, message, invocation, termination) = match verdict {
            Ok(Verdict::Pass(termination)) => (Outcome::Pass, None, None, None, termination),
            Ok(Verdict::Skip(reason)) => (Outcome::Skip, None, Some(reason), None, None),
            Err(err) => (
                Outcome::Fail,
                Some(err.tier()),
                Some(err.to_string()),
                err.invocation().map(str::to_string),
                err.termination(),
            ),
        };
        let result = VerificationResult {
            label: unit.label.clone(),
            category: unit.category,
            case_name: unit.case_name.clone(),
            entry: unit.entry.clone(),
            mode: unit.mode,
            ordinal: unit.ordinal,
            total: unit.total,
            outcome,
            tier,
            message,
            invocation,
            exit_code: termination.and_then(Termination::code),
            signal: termination.and_then(Termination::signal),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        };
        self.print_progress(&result);
        self.log_result(unit, &result);
        self.results.lock().push(result);
    }

    fn print_progress(&self, result: &VerificationResult) {
        let Some(progress) = &self.progress else {
            return;
        };
        let status = match (result.outcome, result.tier) {
            (Outcome::Pass, _) => "OK".to_string(),
            (Outcome::Skip, _) => format!(
                "SKIP ({})",
                result.message.as_deref().unwrap_or("not applicable")
            ),
            (Outcome::Fail, Some(tier)) => format!("FAIL [{tier}]"),
            (Outcome::Fail, None) => "FAIL".to_string(),
        };
        let mut sink = progress.lock();
        // Progress output is best effort.
        let _ = writeln!(
            sink,
            "Test {}/{} {}...{status}",
            result.ordinal, result.total, result.label
        );
        if result.outcome == Outcome::Fail
            && let Some(message) = &result.message
        {
            let _ = writeln!(sink, "{message}");
        }
    }

    fn log_result(&self, unit: &UnitInfo, result: &VerificationResult) {
        let Some(log) = &self.log else {
            return;
        };
        let level = match result.outcome {
            Outcome::Fail => LogLevel::Error,
            Outcome::Skip => LogLevel::Warn,
            Outcome::Pass => LogLevel::Info,
        };
        let mut entry = LogEntry::new("", level, "unit_result")
            .with_label(&result.label)
            .with_case(unit.category, &unit.case_name)
            .with_entry(&unit.target, unit.mode)
            .with_progress(unit.ordinal, unit.total)
            .with_outcome(result.outcome)
            .with_duration_ms(result.duration_ms);
        if let Some(tier) = result.tier {
            entry = entry.with_tier(tier);
        }
        if let Some(code) = result.exit_code {
            entry = entry.with_exit_code(code);
        }
        if let Some(signal) = result.signal {
            entry = entry.with_signal(signal);
        }
        if let Some(invocation) = &result.invocation {
            entry = entry.with_invocation(invocation);
        }
        if let Some(message) = &result.message {
            entry = entry.with_details(serde_json::json!({ "message": message }));
        }
        let _ = log.lock().emit_entry(entry);
    }

    /// Emit a suite-level event (start, end) to the log, if any.
    pub fn log_event(&self, level: LogLevel, event: &str, details: serde_json::Value) {
        if let Some(log) = &self.log {
            let entry = LogEntry::new("", level, event).with_details(details);
            let _ = log.lock().emit_entry(entry);
        }
    }

    pub fn flush(&self) -> std::io::Result<()> {
        if let Some(log) = &self.log {
            log.lock().flush()?;
        }
        if let Some(progress) = &self.progress {
            progress.lock().flush()?;
        }
        Ok(())
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn results(&self) -> Vec<VerificationResult> {
        self.results.lock().clone()
    }

    #[must_use]
    pub fn summary(&self) -> VerificationSummary {
        VerificationSummary::from_results(self.results())
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("no units selected: the filter and matrix left nothing to run")]
    NothingSelected,
}

/// Plan, register and execute every case on the bundled [`LocalGraph`].
pub fn run_suite(
    config: Arc<HarnessConfig>,
    planner: Arc<MatrixPlanner>,
    registry: &CaseRegistry,
    recorder: Arc<RunRecorder>,
) -> Result<VerificationSummary, RunError> {
    let started = Instant::now();
    let builder = SuiteBuilder::new(config, planner, Arc::clone(&recorder));
    let mut graph = LocalGraph::new();
    let registered = builder.register(&mut graph, registry)?;
    if registered.is_empty() {
        return Err(RunError::NothingSelected);
    }
    recorder.log_event(
        LogLevel::Info,
        "suite_start",
        serde_json::json!({ "cases": registry.len(), "units": registered.len() }),
    );

    graph.run(ROOT_TARGET)?;

    let summary = recorder.summary();
    recorder.log_event(
        if summary.all_passed() { LogLevel::Info } else { LogLevel::Error },
        "suite_end",
        serde_json::json!({
            "total": summary.total,
            "passed": summary.passed,
            "failed": summary.failed,
            "skipped": summary.skipped,
            "duration_ms": u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }),
    );
    let _ = recorder.flush();
    Ok(summary)
}
