//! Compiler conformance harness.
//!
//! This crate provides:
//! - Case registry: declarative cases loaded from JSON or built in code
//! - Matrix planning: which (target, mode, libc, threading) entries a case runs under
//! - Verification: one strategy per category over captured process output
//! - Graph adapter: materialize/compile/run chains behind a minimal build-graph trait
//! - Reporting: structured JSONL logs, markdown and JSON suite reports

#![forbid(unsafe_code)]

pub mod adapter;
pub mod cases;
pub mod config;
pub mod diff;
pub mod error;
pub mod graph;
pub mod invocation;
pub mod materialize;
pub mod matrix;
pub mod report;
pub mod runner;
pub mod structured_log;
pub mod target;
pub mod verify;

pub use adapter::{ROOT_TARGET, SuiteBuilder};
pub use cases::{
    BuildKind, CaseRegistry, CaseSet, Category, DiagnosticExpectation, ExpectedOutcome,
    SourceFile, StackTraceExpectation, TestCase,
};
pub use config::HarnessConfig;
pub use error::{FailureTier, UnitError};
pub use graph::{LocalGraph, StepGraph};
pub use matrix::{MatrixEntry, MatrixFilter, MatrixPlanner, OptimizeMode, ThreadingFilter};
pub use report::{SuiteReport, VerificationResult, VerificationSummary};
pub use runner::{RunRecorder, run_suite};
pub use target::{Host, Target};
pub use verify::{VerifyContext, VerifyFailure, normalize_stack_trace, verify};
