//! Test case declarations and the in-memory registry.
//!
//! Cases arrive either as JSON case sets (the shape of a fixture file) or through
//! the [`CaseSet`] builder methods. The category of a case is never stored; it
//! is derived from its [`ExpectedOutcome`] variant.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matrix::{CaseConstraints, OptimizeMode};
use crate::target::Target;

/// One file handed to the compiler. The first file of a case is the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub filename: String,
    pub contents: String,
}

impl SourceFile {
    #[must_use]
    pub fn new(filename: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            contents: contents.into(),
        }
    }
}

/// Which compiler subcommand produces the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildKind {
    #[default]
    Obj,
    Exe,
    Test,
}

impl BuildKind {
    #[must_use]
    pub const fn subcommand(self) -> &'static str {
        match self {
            Self::Obj => "build-obj",
            Self::Exe => "build-exe",
            Self::Test => "test",
        }
    }
}

/// How compile diagnostics are matched against stderr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticExpectation {
    /// Every entry must appear somewhere in stderr, in any order.
    Subset(Vec<String>),
    /// Stderr lines mentioning the root file, matched one-to-one and in order.
    ExactLines(Vec<String>),
}

/// Normalized trace text expected for each optimization mode.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StackTraceExpectation {
    pub debug: String,
    pub release_safe: String,
    pub release_fast: String,
    pub release_small: String,
}

impl StackTraceExpectation {
    #[must_use]
    pub fn for_mode(&self, mode: OptimizeMode) -> &str {
        match mode {
            OptimizeMode::Debug => &self.debug,
            OptimizeMode::ReleaseSafe => &self.release_safe,
            OptimizeMode::ReleaseFast => &self.release_fast,
            OptimizeMode::ReleaseSmall => &self.release_small,
        }
    }
}

/// What a case must observe. One variant per test category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpectedOutcome {
    ExactOutput {
        stdout: String,
    },
    RuntimeSafety,
    CompileError {
        #[serde(default)]
        build: BuildKind,
        diagnostics: DiagnosticExpectation,
    },
    Translate {
        expected: Vec<String>,
        #[serde(default)]
        allow_warnings: bool,
    },
    StackTrace(StackTraceExpectation),
}

impl ExpectedOutcome {
    #[must_use]
    pub const fn category(&self) -> Category {
        match self {
            Self::ExactOutput { .. } => Category::ExactOutput,
            Self::RuntimeSafety => Category::RuntimeSafety,
            Self::CompileError { .. } => Category::CompileError,
            Self::Translate { .. } => Category::Translate,
            Self::StackTrace(_) => Category::StackTrace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ExactOutput,
    RuntimeSafety,
    CompileError,
    Translate,
    StackTrace,
}

impl Category {
    pub const ALL: [Self; 5] = [
        Self::ExactOutput,
        Self::RuntimeSafety,
        Self::CompileError,
        Self::Translate,
        Self::StackTrace,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExactOutput => "exact_output",
            Self::RuntimeSafety => "runtime_safety",
            Self::CompileError => "compile_error",
            Self::Translate => "translate",
            Self::StackTrace => "stack_trace",
        }
    }

    /// Prefix used in unit labels.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ExactOutput => "compare-output",
            Self::RuntimeSafety => "safety",
            Self::CompileError => "compile-error",
            Self::Translate => "translate-c",
            Self::StackTrace => "stack-trace",
        }
    }

    /// Conventional name of the root source file. Diagnostics are matched
    /// against this name, so it never varies within a category.
    #[must_use]
    pub const fn root_file_name(self) -> &'static str {
        match self {
            Self::ExactOutput | Self::RuntimeSafety | Self::StackTrace => "source.zig",
            Self::CompileError => "tmp.zig",
            Self::Translate => "source.h",
        }
    }

    /// Optimization modes the category is exercised under.
    #[must_use]
    pub const fn modes(self) -> &'static [OptimizeMode] {
        match self {
            Self::ExactOutput | Self::StackTrace => &OptimizeMode::ALL,
            Self::RuntimeSafety | Self::CompileError | Self::Translate => &[OptimizeMode::Debug],
        }
    }

    /// Categories whose compile step yields an artifact that is then run.
    #[must_use]
    pub const fn is_runnable(self) -> bool {
        matches!(self, Self::ExactOutput | Self::RuntimeSafety | Self::StackTrace)
    }

    #[must_use]
    pub fn from_str_loose(raw: &str) -> Option<Self> {
        let norm = raw.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == norm || c.label().replace('-', "_") == norm)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single declared case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub sources: Vec<SourceFile>,
    pub expected: ExpectedOutcome,
    #[serde(default)]
    pub link_libc: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_override: Option<Target>,
    /// Arguments passed to the produced artifact.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cli_args: Vec<String>,
}

impl TestCase {
    /// A case whose root file carries the category's conventional name.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        root_source: impl Into<String>,
        expected: ExpectedOutcome,
    ) -> Self {
        let root = SourceFile::new(expected.category().root_file_name(), root_source);
        Self {
            name: name.into(),
            sources: vec![root],
            expected,
            link_libc: false,
            target_override: None,
            cli_args: Vec::new(),
        }
    }

    #[must_use]
    pub const fn category(&self) -> Category {
        self.expected.category()
    }

    /// Compilation root, if the case has any sources at all.
    #[must_use]
    pub fn root(&self) -> Option<&SourceFile> {
        self.sources.first()
    }

    /// Compiler subcommand for the case; `None` for translation cases.
    #[must_use]
    pub const fn build_kind(&self) -> Option<BuildKind> {
        match &self.expected {
            ExpectedOutcome::CompileError { build, .. } => Some(*build),
            ExpectedOutcome::Translate { .. } => None,
            _ => Some(BuildKind::Exe),
        }
    }

    #[must_use]
    pub fn constraints(&self) -> CaseConstraints<'_> {
        CaseConstraints {
            target_override: self.target_override.as_ref(),
            link_libc: self.link_libc,
            modes: self.category().modes(),
        }
    }

    pub fn with_source(
        &mut self,
        filename: impl Into<String>,
        contents: impl Into<String>,
    ) -> &mut Self {
        self.sources.push(SourceFile::new(filename, contents));
        self
    }

    pub fn with_cli_args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cli_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_target(&mut self, target: Target) -> &mut Self {
        self.target_override = Some(target);
        self
    }

    pub fn with_libc(&mut self) -> &mut Self {
        self.link_libc = true;
        self
    }

    /// Only compile-error cases choose their build kind; other cases are unchanged.
    pub fn with_build_kind(&mut self, kind: BuildKind) -> &mut Self {
        if let ExpectedOutcome::CompileError { build, .. } = &mut self.expected {
            *build = kind;
        }
        self
    }

    /// Check the structural invariants of a single case.
    pub fn validate(&self) -> Result<(), CaseError> {
        if self.name.trim().is_empty() {
            return Err(CaseError::EmptyName {
                category: self.category(),
            });
        }
        let Some(root) = self.root() else {
            return Err(CaseError::NoSources {
                case: self.name.clone(),
            });
        };
        let expected_root = self.category().root_file_name();
        if root.filename != expected_root {
            return Err(CaseError::WrongRootName {
                case: self.name.clone(),
                expected: expected_root,
                found: root.filename.clone(),
            });
        }

        let mut seen = BTreeSet::new();
        for file in &self.sources {
            if !is_relative_file_name(&file.filename) {
                return Err(CaseError::InvalidFileName {
                    case: self.name.clone(),
                    filename: file.filename.clone(),
                });
            }
            if !seen.insert(file.filename.as_str()) {
                return Err(CaseError::DuplicateFile {
                    case: self.name.clone(),
                    filename: file.filename.clone(),
                });
            }
        }
        Ok(())
    }
}

fn is_relative_file_name(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty()
        && !name.contains('\\')
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

#[derive(Debug, Error)]
pub enum CaseError {
    #[error("{category} case has an empty name")]
    EmptyName { category: Category },
    #[error("case '{case}' declares no source files")]
    NoSources { case: String },
    #[error("case '{case}': root file must be named '{expected}', found '{found}'")]
    WrongRootName {
        case: String,
        expected: &'static str,
        found: String,
    },
    #[error("case '{case}': file name '{filename}' must be a relative path without '..'")]
    InvalidFileName { case: String, filename: String },
    #[error("case '{case}': file '{filename}' declared twice")]
    DuplicateFile { case: String, filename: String },
    #[error("duplicate {category} case '{name}'")]
    DuplicateCase { category: Category, name: String },
    #[error("failed to read case set {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed case set: {0}")]
    Json(#[from] serde_json::Error),
}

/// A collection of cases as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseSet {
    /// Schema version.
    pub version: String,
    /// Suite name used in trace ids and reports.
    pub suite: String,
    pub cases: Vec<TestCase>,
}

impl CaseSet {
    #[must_use]
    pub fn new(suite: impl Into<String>) -> Self {
        Self {
            version: "v1".to_string(),
            suite: suite.into(),
            cases: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_file(path: &Path) -> Result<Self, CaseError> {
        let content = std::fs::read_to_string(path).map_err(|source| CaseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_json(&content)?)
    }

    fn push(&mut self, case: TestCase) -> &mut TestCase {
        self.cases.push(case);
        let last = self.cases.len() - 1;
        &mut self.cases[last]
    }

    pub fn add_exact_output(
        &mut self,
        name: &str,
        source: &str,
        expected_stdout: &str,
    ) -> &mut TestCase {
        self.push(TestCase::new(
            name,
            source,
            ExpectedOutcome::ExactOutput {
                stdout: expected_stdout.to_string(),
            },
        ))
    }

    pub fn add_exact_output_libc(
        &mut self,
        name: &str,
        source: &str,
        expected_stdout: &str,
    ) -> &mut TestCase {
        self.add_exact_output(name, source, expected_stdout).with_libc()
    }

    pub fn add_runtime_safety(&mut self, name: &str, source: &str) -> &mut TestCase {
        self.push(TestCase::new(name, source, ExpectedOutcome::RuntimeSafety))
    }

    pub fn add_compile_error(
        &mut self,
        name: &str,
        source: &str,
        expected: &[&str],
    ) -> &mut TestCase {
        self.push(TestCase::new(
            name,
            source,
            ExpectedOutcome::CompileError {
                build: BuildKind::Obj,
                diagnostics: DiagnosticExpectation::Subset(owned(expected)),
            },
        ))
    }

    pub fn add_compile_error_exact(
        &mut self,
        name: &str,
        source: &str,
        expected: &[&str],
    ) -> &mut TestCase {
        self.push(TestCase::new(
            name,
            source,
            ExpectedOutcome::CompileError {
                build: BuildKind::Obj,
                diagnostics: DiagnosticExpectation::ExactLines(owned(expected)),
            },
        ))
    }

    pub fn add_translate(&mut self, name: &str, source: &str, expected: &[&str]) -> &mut TestCase {
        self.push(TestCase::new(
            name,
            source,
            ExpectedOutcome::Translate {
                expected: owned(expected),
                allow_warnings: false,
            },
        ))
    }

    pub fn add_translate_allow_warnings(
        &mut self,
        name: &str,
        source: &str,
        expected: &[&str],
    ) -> &mut TestCase {
        self.push(TestCase::new(
            name,
            source,
            ExpectedOutcome::Translate {
                expected: owned(expected),
                allow_warnings: true,
            },
        ))
    }

    pub fn add_stack_trace(
        &mut self,
        name: &str,
        source: &str,
        expected: StackTraceExpectation,
    ) -> &mut TestCase {
        self.push(TestCase::new(name, source, ExpectedOutcome::StackTrace(expected)))
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Validated, read-only view of every case in a run.
#[derive(Debug, Clone, Default)]
pub struct CaseRegistry {
    cases: Vec<Arc<TestCase>>,
    keys: BTreeSet<(Category, String)>,
}

impl CaseRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate every case of a set and register it, in declaration order.
    pub fn from_case_set(set: CaseSet) -> Result<Self, CaseError> {
        let mut registry = Self::new();
        for case in set.cases {
            registry.insert(case)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, case: TestCase) -> Result<(), CaseError> {
        case.validate()?;
        let key = (case.category(), case.name.clone());
        if self.keys.contains(&key) {
            return Err(CaseError::DuplicateCase {
                category: key.0,
                name: key.1,
            });
        }
        self.keys.insert(key);
        self.cases.push(Arc::new(case));
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TestCase>> {
        self.cases.iter()
    }
}
