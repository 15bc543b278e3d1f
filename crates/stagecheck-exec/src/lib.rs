//! Process execution adapter shared by harness tooling.
//!
//! Runs exactly one child process to completion and hands back everything the
//! verification layer needs: raw stdout, raw stderr and how the process ended.
//!
//! - stdin is closed (`/dev/null`) before the child starts.
//! - stdout and stderr are drained by two reader threads, so a child that fills
//!   one pipe while the other is quiet never deadlocks against the harness.
//! - each stream has an independent byte ceiling. Overflowing it is reported as
//!   [`CaptureError::StreamTooLong`] after the child has exited; the reader
//!   keeps draining past the ceiling so the child is never blocked on a full pipe.
//! - on timeout the child is killed and [`CaptureError::TimedOut`] is returned
//!   at once, even if a grandchild still holds the pipes open.
//! - a spawn failure ([`CaptureError::Spawn`]) is an infrastructure fault and is
//!   kept apart from a failing exit status, which is ordinary captured data.

#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::ffi::OsString;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Default per-stream capture ceiling (1 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

const READ_CHUNK: usize = 8192;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How a captured process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Termination {
    /// Normal exit with a status code.
    Exited(i32),
    /// Killed by a signal (unix only).
    Signaled(i32),
    /// Neither a code nor a signal could be recovered.
    Other,
}

impl Termination {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt as _;
            if let Some(signal) = status.signal() {
                return Self::Signaled(signal);
            }
        }
        Self::Other
    }

    /// True only for `Exited(0)`.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Exit code, if the process exited normally.
    #[must_use]
    pub const fn code(self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(code),
            Self::Signaled(_) | Self::Other => None,
        }
    }

    /// Terminating signal, if the process was killed by one.
    #[must_use]
    pub const fn signal(self) -> Option<i32> {
        match self {
            Self::Signaled(signal) => Some(signal),
            Self::Exited(_) | Self::Other => None,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(signal) => write!(f, "terminated by signal {signal}"),
            Self::Other => f.write_str("terminated abnormally"),
        }
    }
}

/// Which output stream of the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// Everything observed from one process run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub termination: Termination,
    /// Wall-clock time from spawn to exit.
    pub duration: Duration,
}

impl CaptureResult {
    /// Build a result directly (used by verification tests and replay tooling).
    #[must_use]
    pub fn new(
        stdout: impl Into<Vec<u8>>,
        stderr: impl Into<Vec<u8>>,
        termination: Termination,
    ) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            termination,
            duration: Duration::ZERO,
        }
    }

    /// Stdout decoded as UTF-8, with invalid sequences replaced.
    #[must_use]
    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Stderr decoded as UTF-8, with invalid sequences replaced.
    #[must_use]
    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// A single process invocation to capture.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    argv: Vec<OsString>,
    cwd: Option<PathBuf>,
    max_output_bytes: usize,
    timeout: Option<Duration>,
}

impl CaptureRequest {
    /// Start a request for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            argv: vec![program.into()],
            cwd: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            timeout: None,
        }
    }

    /// Build a request from a full argv vector (program first).
    #[must_use]
    pub fn from_argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            timeout: None,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.argv.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the child in `dir`.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Per-stream byte ceiling.
    #[must_use]
    pub fn max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    /// Kill the child after `timeout`. `None` waits indefinitely.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn argv(&self) -> &[OsString] {
        &self.argv
    }

    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Shell-like rendering of the full invocation, for reproduction notes.
    #[must_use]
    pub fn display_invocation(&self) -> String {
        render_argv(self.argv.iter().map(|a| a.to_string_lossy()))
    }
}

/// Render an argv vector the way a user would paste it into a shell.
#[must_use]
pub fn render_argv<I, S>(argv: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, arg) in argv.into_iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let arg = arg.as_ref();
        let plain = !arg.is_empty()
            && arg
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_./=:+,@%".contains(c));
        if plain {
            out.push_str(arg);
        } else {
            out.push('\'');
            out.push_str(&arg.replace('\'', r"'\''"));
            out.push('\'');
        }
    }
    out
}

/// Capture failures that are not an observed exit status.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("empty argv: no program to run")]
    EmptyArgv,
    #[error("unable to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{stream} of {program} exceeded the {limit}-byte capture ceiling")]
    StreamTooLong {
        program: String,
        stream: Stream,
        limit: usize,
    },
    #[error("{program} did not finish within {}s and was killed", .timeout.as_secs_f64())]
    TimedOut { program: String, timeout: Duration },
    #[error("i/o error while capturing {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run the request to completion and capture its output.
pub fn capture(request: &CaptureRequest) -> Result<CaptureResult, CaptureError> {
    let (program, args) = request.argv.split_first().ok_or(CaptureError::EmptyArgv)?;
    let program_name = program.to_string_lossy().into_owned();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &request.cwd {
        cmd.current_dir(dir);
    }

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| CaptureError::Spawn {
        program: program_name.clone(),
        source,
    })?;

    let limit = request.max_output_bytes;
    let stdout_reader = child
        .stdout
        .take()
        .map(|pipe| thread::spawn(move || read_to_end_capped(pipe, limit)));
    let stderr_reader = child
        .stderr
        .take()
        .map(|pipe| thread::spawn(move || read_to_end_capped(pipe, limit)));

    let waited = wait_child(&mut child, request.timeout);
    let duration = start.elapsed();

    let io_err = |source| CaptureError::Io {
        program: program_name.clone(),
        source,
    };
    // Grandchildren may still hold the pipes open. On timeout or a failed
    // wait the readers are detached instead of joined.
    let (status, timed_out) = waited.map_err(io_err)?;
    if timed_out {
        return Err(CaptureError::TimedOut {
            program: program_name,
            timeout: request.timeout.unwrap_or_default(),
        });
    }
    let stdout = join_reader(stdout_reader).map_err(io_err)?;
    let stderr = join_reader(stderr_reader).map_err(io_err)?;
    for (stream, captured) in [(Stream::Stdout, &stdout), (Stream::Stderr, &stderr)] {
        if captured.overflowed {
            return Err(CaptureError::StreamTooLong {
                program: program_name,
                stream,
                limit,
            });
        }
    }

    Ok(CaptureResult {
        stdout: stdout.bytes,
        stderr: stderr.bytes,
        termination: Termination::from_status(status),
        duration,
    })
}

fn wait_child(child: &mut Child, timeout: Option<Duration>) -> std::io::Result<(ExitStatus, bool)> {
    let Some(limit) = timeout else {
        return child.wait().map(|status| (status, false));
    };
    let deadline = Instant::now().checked_add(limit);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            // The child may have exited between try_wait and kill.
            let _ = child.kill();
            let status = child.wait()?;
            return Ok((status, true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Bytes read from one pipe, plus whether the ceiling was crossed.
#[derive(Debug, Default)]
pub struct CappedRead {
    pub bytes: Vec<u8>,
    pub overflowed: bool,
}

/// Read `reader` to EOF, keeping at most `cap` bytes.
///
/// Everything past the ceiling is drained and discarded.
pub fn read_to_end_capped<R: Read>(mut reader: R, cap: usize) -> std::io::Result<CappedRead> {
    let mut out = CappedRead::default();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if out.overflowed {
            continue;
        }
        let remaining = cap.saturating_sub(out.bytes.len());
        if n <= remaining {
            out.bytes.extend_from_slice(&chunk[..n]);
        } else {
            out.bytes.extend_from_slice(&chunk[..remaining]);
            out.overflowed = true;
        }
    }
    Ok(out)
}

fn join_reader(
    handle: Option<JoinHandle<std::io::Result<CappedRead>>>,
) -> std::io::Result<CappedRead> {
    match handle {
        None => Ok(CappedRead::default()),
        Some(handle) => handle
            .join()
            .unwrap_or_else(|_| Err(std::io::Error::other("output reader thread panicked"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_reader_keeps_prefix_and_flags_overflow() {
        let data = vec![7u8; 20_000];
        let read = read_to_end_capped(&data[..], 100).unwrap();
        assert_eq!(read.bytes.len(), 100);
        assert!(read.overflowed);

        let read = read_to_end_capped(&data[..], 20_000).unwrap();
        assert_eq!(read.bytes.len(), 20_000);
        assert!(!read.overflowed);
    }

    #[test]
    fn empty_argv_is_rejected() {
        let request = CaptureRequest::from_argv(Vec::<String>::new());
        assert!(matches!(capture(&request), Err(CaptureError::EmptyArgv)));
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let request = CaptureRequest::new("/nonexistent/stagecheck/compiler-binary");
        let err = capture(&request).unwrap_err();
        assert!(matches!(err, CaptureError::Spawn { .. }), "got {err:?}");
    }

    #[test]
    fn render_argv_quotes_only_when_needed() {
        assert_eq!(
            render_argv(["zig", "build-exe", "/tmp/a b/source.zig", "--name", "test"]),
            "zig build-exe '/tmp/a b/source.zig' --name test"
        );
        assert_eq!(render_argv(["echo", "it's"]), r"echo 'it'\''s'");
        assert_eq!(render_argv(["x", ""]), "x ''");
    }

    #[test]
    fn termination_display_and_helpers() {
        assert_eq!(Termination::Exited(3).to_string(), "exited with code 3");
        assert_eq!(Termination::Signaled(6).to_string(), "terminated by signal 6");
        assert!(Termination::Exited(0).is_success());
        assert!(!Termination::Signaled(0).is_success());
        assert_eq!(Termination::Exited(126).code(), Some(126));
        assert_eq!(Termination::Other.code(), None);
        assert_eq!(Termination::Signaled(9).signal(), Some(9));
        assert_eq!(Termination::Exited(1).signal(), None);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;

        fn sh(script: &str) -> CaptureRequest {
            CaptureRequest::new("sh").arg("-c").arg(script)
        }

        #[test]
        fn captures_both_streams_and_exit_code() {
            let result = capture(&sh("printf hello; printf oops >&2; exit 3")).unwrap();
            assert_eq!(result.stdout, b"hello");
            assert_eq!(result.stderr, b"oops");
            assert_eq!(result.termination, Termination::Exited(3));
        }

        #[test]
        fn stdin_is_closed() {
            let result = capture(&sh("cat; printf done")).unwrap();
            assert_eq!(result.stdout, b"done");
            assert!(result.termination.is_success());
        }

        #[test]
        fn large_stderr_does_not_deadlock() {
            let result = capture(&sh("head -c 262144 /dev/zero >&2; printf ok")).unwrap();
            assert_eq!(result.stdout, b"ok");
            assert_eq!(result.stderr.len(), 262_144);
        }

        #[test]
        fn overflow_is_a_defined_failure() {
            let request = sh("head -c 5000 /dev/zero").max_output_bytes(1000);
            match capture(&request) {
                Err(CaptureError::StreamTooLong { stream, limit, .. }) => {
                    assert_eq!(stream, Stream::Stdout);
                    assert_eq!(limit, 1000);
                }
                other => panic!("expected StreamTooLong, got {other:?}"),
            }
        }

        #[test]
        fn signal_termination_is_reported() {
            let result = capture(&sh("kill -9 $$")).unwrap();
            assert_eq!(result.termination, Termination::Signaled(9));
        }

        #[test]
        fn timeout_kills_the_child() {
            let request = CaptureRequest::new("sleep")
                .arg("5")
                .timeout(Some(Duration::from_millis(100)));
            let err = capture(&request).unwrap_err();
            assert!(matches!(err, CaptureError::TimedOut { .. }), "got {err:?}");
        }

        #[test]
        fn timeout_does_not_wait_for_grandchildren() {
            // `sh` forks `sleep`, which inherits both output pipes.
            let request = sh("sleep 5; true").timeout(Some(Duration::from_millis(100)));
            let started = Instant::now();
            let err = capture(&request).unwrap_err();
            assert!(matches!(err, CaptureError::TimedOut { .. }), "got {err:?}");
            assert!(
                started.elapsed() < Duration::from_secs(2),
                "capture blocked for {:?}",
                started.elapsed()
            );
        }

        #[test]
        fn runs_in_requested_directory() {
            let dir = std::env::temp_dir().canonicalize().unwrap();
            let result = capture(&CaptureRequest::new("pwd").current_dir(&dir)).unwrap();
            let printed = String::from_utf8(result.stdout).unwrap();
            assert_eq!(Path::new(printed.trim_end()), dir);
        }
    }
}
