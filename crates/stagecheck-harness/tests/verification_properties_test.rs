//! Integration test: verification strategy properties.
//!
//! Drives [`verify`] with synthetic captures for every category and checks
//! the pass/fail boundary and the failure tier reported on each side of it.
//!
//! Run: cargo test -p stagecheck-harness --test verification_properties_test

use stagecheck_exec::{CaptureResult, Termination};
use stagecheck_harness::{
    Category, DiagnosticExpectation, ExpectedOutcome, FailureTier, OptimizeMode,
    StackTraceExpectation, VerifyContext, VerifyFailure, normalize_stack_trace, verify,
};

fn exited(code: i32, stdout: &str, stderr: &str) -> CaptureResult {
    CaptureResult::new(stdout, stderr, Termination::Exited(code))
}

fn ctx(category: Category) -> VerifyContext<'static> {
    VerifyContext {
        mode: OptimizeMode::Debug,
        root_file: category.root_file_name(),
    }
}

fn tier_of(result: Result<(), VerifyFailure>) -> FailureTier {
    result.expect_err("verification should fail").tier()
}

#[test]
fn exact_output_is_byte_exact() {
    let expected = ExpectedOutcome::ExactOutput {
        stdout: "Hello, World!\n".into(),
    };
    let c = ctx(Category::ExactOutput);
    assert!(verify(&expected, &exited(0, "Hello, World!\n", ""), &c).is_ok());
    // Stderr is not part of the contract.
    assert!(verify(&expected, &exited(0, "Hello, World!\n", "debug noise"), &c).is_ok());

    for wrong in ["Hello, World!", "Hello, World!\n\n", "Hello, World!\r\n", ""] {
        let err = verify(&expected, &exited(0, wrong, ""), &c).unwrap_err();
        assert!(matches!(err, VerifyFailure::OutputMismatch { .. }), "{wrong:?}");
        assert_eq!(err.tier(), FailureTier::Mismatch);
    }

    let crashed = verify(&expected, &exited(3, "Hello, World!\n", "oops"), &c).unwrap_err();
    assert!(matches!(crashed, VerifyFailure::UnexpectedExit { .. }));
    assert!(crashed.to_string().contains("oops"));
}

#[test]
fn output_mismatch_message_shows_both_sides() {
    let expected = ExpectedOutcome::ExactOutput {
        stdout: "abc\n".into(),
    };
    let err = verify(&expected, &exited(0, "abd\n", ""), &ctx(Category::ExactOutput)).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("Expected this output"));
    assert!(text.contains("abc"));
    assert!(text.contains("abd"));
}

#[test]
fn runtime_safety_requires_the_safety_exit_code() {
    let c = ctx(Category::RuntimeSafety);
    let expected = ExpectedOutcome::RuntimeSafety;
    assert!(verify(&expected, &exited(126, "", "panic: index out of bounds"), &c).is_ok());
    assert_eq!(
        tier_of(verify(&expected, &exited(0, "", ""), &c)),
        FailureTier::UnexpectedSuccess
    );
    for code in [1, 2, 125, 127, 134] {
        assert_eq!(
            tier_of(verify(&expected, &exited(code, "", ""), &c)),
            FailureTier::Mismatch,
            "exit code {code}"
        );
    }
    let signaled = CaptureResult::new("", "", Termination::Signaled(6));
    assert_eq!(tier_of(verify(&expected, &signaled, &c)), FailureTier::Mismatch);
}

#[test]
fn subset_diagnostics_ignore_order_and_extra_lines() {
    let expected = ExpectedOutcome::CompileError {
        build: Default::default(),
        diagnostics: DiagnosticExpectation::Subset(vec![
            "tmp.zig:1:1: error: first".into(),
            "tmp.zig:5:3: error: second".into(),
        ]),
    };
    let c = ctx(Category::CompileError);
    let stderr = "note: unrelated\n/abs/tmp.zig:5:3: error: second\n/abs/tmp.zig:1:1: error: first\n";
    assert!(verify(&expected, &exited(1, "", stderr), &c).is_ok());

    let partial = "/abs/tmp.zig:1:1: error: first\n";
    let err = verify(&expected, &exited(1, "", partial), &c).unwrap_err();
    assert!(matches!(
        &err,
        VerifyFailure::MissingDiagnostic { missing, .. } if missing == "tmp.zig:5:3: error: second"
    ));
}

#[test]
fn exact_lines_match_in_order_and_one_to_one() {
    let expected = ExpectedOutcome::CompileError {
        build: Default::default(),
        diagnostics: DiagnosticExpectation::ExactLines(vec![
            "tmp.zig:1:1: error: first".into(),
            "tmp.zig:2:1: error: second".into(),
        ]),
    };
    let c = ctx(Category::CompileError);

    let exact = "/w/tmp.zig:1:1: error: first\n    context\n/w/tmp.zig:2:1: error: second\n";
    assert!(verify(&expected, &exited(1, "", exact), &c).is_ok());

    let reversed = "/w/tmp.zig:2:1: error: second\n/w/tmp.zig:1:1: error: first\n";
    assert!(matches!(
        verify(&expected, &exited(1, "", reversed), &c),
        Err(VerifyFailure::DiagnosticLinesMismatch { .. })
    ));

    let short = "/w/tmp.zig:1:1: error: first\n";
    assert!(matches!(
        verify(&expected, &exited(1, "", short), &c),
        Err(VerifyFailure::DiagnosticLinesMismatch { .. })
    ));

    let extra = "/w/tmp.zig:1:1: error: first\n/w/tmp.zig:2:1: error: second\n/w/tmp.zig:3:1: error: third\n";
    assert!(matches!(
        verify(&expected, &exited(1, "", extra), &c),
        Err(VerifyFailure::DiagnosticLinesMismatch { .. })
    ));
}

#[test]
fn compile_error_success_is_unexpected() {
    let expected = ExpectedOutcome::CompileError {
        build: Default::default(),
        diagnostics: DiagnosticExpectation::Subset(vec!["error".into()]),
    };
    let err = verify(&expected, &exited(0, "", ""), &ctx(Category::CompileError)).unwrap_err();
    assert_eq!(err, VerifyFailure::CompilationIncorrectlySucceeded);
    assert_eq!(err.tier(), FailureTier::UnexpectedSuccess);
}

#[test]
fn translate_warnings_depend_on_the_flag() {
    let strict = ExpectedOutcome::Translate {
        expected: vec!["pub const FOO = 1;".into()],
        allow_warnings: false,
    };
    let lenient = ExpectedOutcome::Translate {
        expected: vec!["pub const FOO = 1;".into()],
        allow_warnings: true,
    };
    let c = ctx(Category::Translate);
    let noisy = exited(0, "pub const FOO = 1;\n", "warning: macro dropped\n");

    assert!(matches!(
        verify(&strict, &noisy, &c),
        Err(VerifyFailure::UnexpectedWarnings { .. })
    ));
    assert!(verify(&lenient, &noisy, &c).is_ok());
    assert!(verify(&strict, &exited(0, "pub const FOO = 1;\n", ""), &c).is_ok());
}

#[test]
fn stack_trace_is_compared_after_normalization() {
    let want = "error: TheSkyIsFalling\nsource.zig:3:5: [address] in main (test)\n    return error.TheSkyIsFalling;\n    ^\n";
    let traces = StackTraceExpectation {
        debug: want.into(),
        release_safe: want.into(),
        release_fast: "error: TheSkyIsFalling\n".into(),
        release_small: "error: TheSkyIsFalling\n".into(),
    };
    let expected = ExpectedOutcome::StackTrace(traces);
    let raw = "error: TheSkyIsFalling\n/home/ci/zig-cache/o/0f3a/source.zig:3:5: 0x22a4f1 in main (test)\n    return error.TheSkyIsFalling;\n    ^\n\n";

    for mode in [OptimizeMode::Debug, OptimizeMode::ReleaseSafe] {
        let c = VerifyContext {
            mode,
            root_file: "source.zig",
        };
        assert!(verify(&expected, &exited(1, "", raw), &c).is_ok(), "{mode}");
    }

    let fast = VerifyContext {
        mode: OptimizeMode::ReleaseFast,
        root_file: "source.zig",
    };
    assert!(matches!(
        verify(&expected, &exited(1, "", raw), &fast),
        Err(VerifyFailure::StackTraceMismatch { mode: OptimizeMode::ReleaseFast, .. })
    ));
    assert!(verify(&expected, &exited(1, "", "error: TheSkyIsFalling\n"), &fast).is_ok());

    let debug = VerifyContext {
        mode: OptimizeMode::Debug,
        root_file: "source.zig",
    };
    assert!(matches!(
        verify(&expected, &exited(0, "", raw), &debug),
        Err(VerifyFailure::UnexpectedExit { .. })
    ));
}

#[test]
fn normalization_is_idempotent_over_assorted_traces() {
    let traces = [
        "",
        "\n\n",
        "error: Boom\n",
        "/a/b/source.zig:1:2: 0x1 in f (test)\n",
        "C:\\a\\source.zig:1:2: 0x1 in f (test.exe)\r\n",
        "source.zig:1:2: [address] in f (test)\n",
        "weird: line: with: colons in it\n",
        "/x/source.zig:12:9: ??? in ??? (???)\n    foo();\n        ^\n",
    ];
    for raw in traces {
        let once = normalize_stack_trace(raw);
        assert_eq!(normalize_stack_trace(&once), once, "{raw:?}");
        assert!(!once.contains("\n\n"));
        assert!(!once.contains('\r'));
    }
}

#[test]
fn failures_round_trip_through_json() {
    let failure = VerifyFailure::UnexpectedExit {
        expected: "exit code 126".into(),
        actual: Termination::Signaled(11),
        stderr: "segfault".into(),
    };
    let json = serde_json::to_string(&failure).unwrap();
    assert!(json.contains("\"failure\":\"unexpected_exit\""));
    let back: VerifyFailure = serde_json::from_str(&json).unwrap();
    assert_eq!(back, failure);
}
