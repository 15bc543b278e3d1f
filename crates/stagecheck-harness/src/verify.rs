//! Verification strategies, one per test category.
//!
//! [`verify`] is a pure function of the expected outcome, the captured process
//! result and a small context. It never spawns anything itself.

use serde::{Deserialize, Serialize};
use stagecheck_exec::{CaptureResult, Termination};
use thiserror::Error;

use crate::cases::{DiagnosticExpectation, ExpectedOutcome, StackTraceExpectation};
use crate::diff::{render_full, render_list};
use crate::error::FailureTier;
use crate::matrix::OptimizeMode;

/// Exit code a program reports when a runtime safety check fires.
pub const SAFETY_EXIT_CODE: i32 = 126;
/// Exit code of a program that panicked and printed its stack trace.
pub const STACK_TRACE_EXIT_CODE: i32 = 1;
/// Replaces the run-dependent address in a normalized trace frame.
pub const ADDRESS_PLACEHOLDER: &str = "[address]";

/// Per-unit facts a strategy needs beyond the capture.
#[derive(Debug, Clone, Copy)]
pub struct VerifyContext<'a> {
    pub mode: OptimizeMode,
    /// Conventional root file name; exact diagnostics are lines mentioning it.
    pub root_file: &'a str,
}

/// Why a captured result does not satisfy its expectation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "failure", rename_all = "snake_case")]
pub enum VerifyFailure {
    #[error("expected {expected}, but the process {actual}{}", stderr_tail(.stderr))]
    UnexpectedExit {
        expected: String,
        #[serde(with = "termination_serde")]
        actual: Termination,
        stderr: String,
    },
    #[error("CompilationIncorrectlySucceeded: the compiler accepted a program that must be rejected")]
    CompilationIncorrectlySucceeded,
    #[error("safety check did not fire: program exited with code 0 instead of {}", SAFETY_EXIT_CODE)]
    SafetyCheckDidNotFire,
    #[error("compiler produced unexpected stdout:\n{stdout}")]
    UnexpectedStdout { stdout: String },
    #[error("stdout mismatch{}", render_full(.expected, .actual))]
    OutputMismatch { expected: String, actual: String },
    #[error("missing diagnostic '{missing}'{}", render_list("Expected these compile errors", .expected, .stderr))]
    MissingDiagnostic {
        missing: String,
        expected: Vec<String>,
        stderr: String,
    },
    #[error("diagnostic lines do not match{}", render_lines(.expected, .actual))]
    DiagnosticLinesMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[error("translation emitted warnings:\n{stderr}")]
    UnexpectedWarnings { stderr: String },
    #[error("missing translation '{missing}'{}", render_list("Expected this output", .expected, .stdout))]
    MissingTranslation {
        missing: String,
        expected: Vec<String>,
        stdout: String,
    },
    #[error("{mode} stack trace mismatch{}", render_full(.expected, .actual))]
    StackTraceMismatch {
        mode: OptimizeMode,
        expected: String,
        actual: String,
    },
}

impl VerifyFailure {
    #[must_use]
    pub const fn tier(&self) -> FailureTier {
        match self {
            Self::CompilationIncorrectlySucceeded | Self::SafetyCheckDidNotFire => {
                FailureTier::UnexpectedSuccess
            }
            Self::UnexpectedStdout { .. } => FailureTier::Harness,
            _ => FailureTier::Mismatch,
        }
    }
}

fn stderr_tail(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\nstderr:\n{stderr}")
    }
}

fn render_lines(expected: &[String], actual: &[String]) -> String {
    render_list("Expected these compile errors", expected, &actual.join("\n"))
}

mod termination_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use stagecheck_exec::Termination;

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    enum Repr {
        Exited(i32),
        Signaled(i32),
        Other,
    }

    pub fn serialize<S: Serializer>(t: &Termination, s: S) -> Result<S::Ok, S::Error> {
        match *t {
            Termination::Exited(c) => Repr::Exited(c),
            Termination::Signaled(c) => Repr::Signaled(c),
            Termination::Other => Repr::Other,
        }
        .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Termination, D::Error> {
        Ok(match Repr::deserialize(d)? {
            Repr::Exited(c) => Termination::Exited(c),
            Repr::Signaled(c) => Termination::Signaled(c),
            Repr::Other => Termination::Other,
        })
    }
}

/// Check a capture against the outcome a case declares.
pub fn verify(
    expected: &ExpectedOutcome,
    capture: &CaptureResult,
    ctx: &VerifyContext<'_>,
) -> Result<(), VerifyFailure> {
    match expected {
        ExpectedOutcome::ExactOutput { stdout } => verify_exact_output(stdout, capture),
        ExpectedOutcome::RuntimeSafety => verify_runtime_safety(capture),
        ExpectedOutcome::CompileError { diagnostics, .. } => {
            verify_compile_error(diagnostics, capture, ctx.root_file)
        }
        ExpectedOutcome::Translate {
            expected,
            allow_warnings,
        } => verify_translate(expected, *allow_warnings, capture),
        ExpectedOutcome::StackTrace(traces) => verify_stack_trace(traces, capture, ctx.mode),
    }
}

fn unexpected_exit(expected: impl Into<String>, capture: &CaptureResult) -> VerifyFailure {
    VerifyFailure::UnexpectedExit {
        expected: expected.into(),
        actual: capture.termination,
        stderr: capture.stderr_lossy().into_owned(),
    }
}

pub fn verify_exact_output(expected: &str, capture: &CaptureResult) -> Result<(), VerifyFailure> {
    if capture.termination != Termination::Exited(0) {
        return Err(unexpected_exit("exit code 0", capture));
    }
    if capture.stdout != expected.as_bytes() {
        return Err(VerifyFailure::OutputMismatch {
            expected: expected.to_string(),
            actual: capture.stdout_lossy().into_owned(),
        });
    }
    Ok(())
}

/// Output is ignored; only the exit status counts.
pub fn verify_runtime_safety(capture: &CaptureResult) -> Result<(), VerifyFailure> {
    match capture.termination {
        Termination::Exited(SAFETY_EXIT_CODE) => Ok(()),
        Termination::Exited(0) => Err(VerifyFailure::SafetyCheckDidNotFire),
        _ => Err(unexpected_exit(
            format!("exit code {SAFETY_EXIT_CODE}"),
            capture,
        )),
    }
}

pub fn verify_compile_error(
    diagnostics: &DiagnosticExpectation,
    capture: &CaptureResult,
    root_file: &str,
) -> Result<(), VerifyFailure> {
    match capture.termination {
        Termination::Exited(0) => return Err(VerifyFailure::CompilationIncorrectlySucceeded),
        Termination::Exited(_) => {}
        Termination::Signaled(_) | Termination::Other => {
            return Err(unexpected_exit("a non-zero exit code", capture));
        }
    }
    if !capture.stdout.is_empty() {
        return Err(VerifyFailure::UnexpectedStdout {
            stdout: capture.stdout_lossy().into_owned(),
        });
    }

    let stderr = capture.stderr_lossy();
    match diagnostics {
        DiagnosticExpectation::Subset(expected) => {
            if let Some(missing) = expected.iter().find(|e| !stderr.contains(e.as_str())) {
                return Err(VerifyFailure::MissingDiagnostic {
                    missing: missing.clone(),
                    expected: expected.clone(),
                    stderr: stderr.into_owned(),
                });
            }
        }
        DiagnosticExpectation::ExactLines(expected) => {
            let actual: Vec<&str> = stderr.lines().filter(|l| l.contains(root_file)).collect();
            let matches = actual.len() == expected.len()
                && actual
                    .iter()
                    .zip(expected)
                    .all(|(line, want)| line.contains(want.as_str()));
            if !matches {
                return Err(VerifyFailure::DiagnosticLinesMismatch {
                    expected: expected.clone(),
                    actual: actual.into_iter().map(str::to_string).collect(),
                });
            }
        }
    }
    Ok(())
}

pub fn verify_translate(
    expected: &[String],
    allow_warnings: bool,
    capture: &CaptureResult,
) -> Result<(), VerifyFailure> {
    if capture.termination != Termination::Exited(0) {
        return Err(unexpected_exit("exit code 0", capture));
    }
    if !allow_warnings && !capture.stderr.is_empty() {
        return Err(VerifyFailure::UnexpectedWarnings {
            stderr: capture.stderr_lossy().into_owned(),
        });
    }
    let stdout = capture.stdout_lossy();
    if let Some(missing) = expected.iter().find(|e| !stdout.contains(e.as_str())) {
        return Err(VerifyFailure::MissingTranslation {
            missing: missing.clone(),
            expected: expected.to_vec(),
            stdout: stdout.into_owned(),
        });
    }
    Ok(())
}

pub fn verify_stack_trace(
    traces: &StackTraceExpectation,
    capture: &CaptureResult,
    mode: OptimizeMode,
) -> Result<(), VerifyFailure> {
    if capture.termination != Termination::Exited(STACK_TRACE_EXIT_CODE) {
        return Err(unexpected_exit(
            format!("exit code {STACK_TRACE_EXIT_CODE}"),
            capture,
        ));
    }
    let actual = normalize_stack_trace(&capture.stderr_lossy());
    let expected = traces.for_mode(mode);
    if actual != expected {
        return Err(VerifyFailure::StackTraceMismatch {
            mode,
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Mask run-dependent parts of a stack trace.
///
/// Empty lines are dropped. A frame line
/// `<path>:<line>:<col>: <address> in <frame>` becomes
/// `<basename>:<line>:<col>: [address] in <frame>`; every other line is kept
/// verbatim. Each output line ends with `\n`. Applying this twice is the same
/// as applying it once.
#[must_use]
pub fn normalize_stack_trace(stderr: &str) -> String {
    let mut out = String::with_capacity(stderr.len());
    for line in stderr.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        match normalize_frame(line) {
            Some(frame) => out.push_str(&frame),
            None => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

fn normalize_frame(line: &str) -> Option<String> {
    let start = drive_prefix_len(line);
    let c0 = start + line[start..].find(':')?;
    let c1 = c0 + 1 + line[c0 + 1..].find(':')?;
    let c2 = c1 + 1 + line[c1 + 1..].find(':')?;
    let frame = c2 + 1 + line[c2 + 1..].find(" in ")?;

    let (row, col) = (&line[c0 + 1..c1], &line[c1 + 1..c2]);
    if !is_number(row) || !is_number(col) {
        return None;
    }
    // Already-normalized lines carry a bare file name.
    let sep = line[..c0].rfind(['/', '\\'])?;
    let base = &line[sep + 1..c0];
    Some(format!(
        "{base}:{row}:{col}: {ADDRESS_PLACEHOLDER}{}",
        &line[frame..]
    ))
}

/// `C:\` or `C:/` at the start of a Windows path.
fn drive_prefix_len(line: &str) -> usize {
    match line.as_bytes() {
        [drive, b':', b'\\' | b'/', ..] if drive.is_ascii_alphabetic() => 2,
        _ => 0,
    }
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
