//! Wiring cases into a build graph.
//!
//! Every (case, matrix entry) pair becomes one chain:
//!
//! ```text
//! materialize -> compile [-> run]
//! ```
//!
//! Compile-error and translate cases are verified by their compile unit. The
//! other categories produce an artifact that a run unit executes and verifies.
//! Units capture only `Arc`s and owned data, so any scheduler may run
//! independent chains in parallel.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use stagecheck_exec::{CaptureRequest, CaptureResult, Termination, capture};

use crate::cases::{BuildKind, CaseRegistry, Category, TestCase};
use crate::config::HarnessConfig;
use crate::error::UnitError;
use crate::graph::{GraphError, StepGraph, UnitAction, UnitId};
use crate::invocation::{artifact_path, compile_request, translate_request};
use crate::materialize::{WorkDir, materialize};
use crate::matrix::{MatrixEntry, MatrixPlanner};
use crate::runner::{RunRecorder, UnitInfo, Verdict};
use crate::target::Host;
use crate::verify::{VerifyContext, VerifyFailure, verify};

/// Top-level target every verification unit is registered under.
pub const ROOT_TARGET: &str = "test";

/// `<category> <case name> (<entry description>)`
#[must_use]
pub fn unit_label(case: &TestCase, entry: &MatrixEntry, host: &Host) -> String {
    format!(
        "{} {} ({})",
        case.category().label(),
        case.name,
        entry.describe(host)
    )
}

/// One selected (case, entry) pair with its progress position.
#[derive(Debug, Clone)]
pub struct PlannedUnit {
    pub case: Arc<TestCase>,
    pub entry: MatrixEntry,
    pub info: UnitInfo,
}

#[derive(Debug, Clone)]
pub struct SuiteBuilder {
    config: Arc<HarnessConfig>,
    /// Absolute, so compiler and artifact paths survive a changed cwd.
    cache_root: PathBuf,
    planner: Arc<MatrixPlanner>,
    recorder: Arc<RunRecorder>,
}

impl SuiteBuilder {
    #[must_use]
    pub fn new(
        config: Arc<HarnessConfig>,
        planner: Arc<MatrixPlanner>,
        recorder: Arc<RunRecorder>,
    ) -> Self {
        let cache_root = std::path::absolute(&config.cache_root)
            .unwrap_or_else(|_| config.cache_root.clone());
        Self {
            config,
            cache_root,
            planner,
            recorder,
        }
    }

    /// Every selected pair, in case order then matrix order. Labels failing
    /// the configured filter are dropped here, before ordinals are assigned.
    #[must_use]
    pub fn plan(&self, registry: &CaseRegistry) -> Vec<PlannedUnit> {
        let host = self.planner.host();
        let selected: Vec<(Arc<TestCase>, MatrixEntry, String)> = registry
            .iter()
            .flat_map(|case| {
                self.planner
                    .plan(&case.constraints())
                    .into_iter()
                    .map(move |entry| (Arc::clone(case), entry))
            })
            .filter_map(|(case, entry)| {
                let label = unit_label(&case, &entry, host);
                self.config
                    .label_selected(&label)
                    .then_some((case, entry, label))
            })
            .collect();

        let total = selected.len();
        selected
            .into_iter()
            .enumerate()
            .map(|(idx, (case, entry, label))| {
                let info = UnitInfo {
                    label,
                    category: case.category(),
                    case_name: case.name.clone(),
                    target: entry.target.to_string(),
                    entry: entry.describe(host),
                    mode: entry.mode,
                    ordinal: idx + 1,
                    total,
                };
                PlannedUnit { case, entry, info }
            })
            .collect()
    }

    /// Register every planned chain with `graph`. Returns the verification
    /// unit of each chain, in progress order.
    pub fn register<G: StepGraph>(
        &self,
        graph: &mut G,
        registry: &CaseRegistry,
    ) -> Result<Vec<UnitId>, GraphError> {
        self.plan(registry)
            .into_iter()
            .map(|unit| self.register_unit(graph, unit))
            .collect()
    }

    fn register_unit<G: StepGraph>(
        &self,
        graph: &mut G,
        unit: PlannedUnit,
    ) -> Result<UnitId, GraphError> {
        let chain = Arc::new(Chain {
            work: WorkDir::new(
                &self.cache_root,
                &unit.case,
                &unit.entry,
                self.planner.host(),
            ),
            host: *self.planner.host(),
            config: Arc::clone(&self.config),
            recorder: Arc::clone(&self.recorder),
            case: unit.case,
            entry: unit.entry,
            info: unit.info,
        });
        let label = chain.info.label.clone();
        let category = chain.case.category();

        let materialize_id = graph.add_unit(
            format!("materialize {label}"),
            step(&chain, false, |c| {
                materialize(&c.work, &c.case.sources).map(|_| Verdict::Pass(None))
            }),
        );

        let verify_id = if category.is_runnable() {
            let compile_id =
                graph.add_unit(format!("compile {label}"), step(&chain, false, Chain::build));
            graph.depend_on(compile_id, materialize_id)?;
            let run_id = graph.add_unit(label, step(&chain, true, Chain::run_artifact));
            graph.depend_on(run_id, compile_id)?;
            run_id
        } else {
            let compile_id = graph.add_unit(label, step(&chain, true, Chain::compile_and_verify));
            graph.depend_on(compile_id, materialize_id)?;
            compile_id
        };
        graph.register_root(ROOT_TARGET, verify_id)?;
        Ok(verify_id)
    }
}

/// Everything one chain's units need, shared between them.
struct Chain {
    config: Arc<HarnessConfig>,
    recorder: Arc<RunRecorder>,
    case: Arc<TestCase>,
    entry: MatrixEntry,
    info: UnitInfo,
    work: WorkDir,
    host: Host,
}

/// Wrap a chain step as a unit action. Failures are recorded by whichever
/// step fails; the final step also records success or skip, so every chain
/// contributes exactly one result.
fn step<F>(chain: &Arc<Chain>, is_final: bool, body: F) -> UnitAction
where
    F: FnOnce(&Chain) -> Result<Verdict, UnitError> + Send + 'static,
{
    let chain = Arc::clone(chain);
    Box::new(move || {
        let started = Instant::now();
        let result = body(&chain);
        match &result {
            Ok(verdict) if is_final => {
                chain
                    .recorder
                    .record(&chain.info, Ok(verdict.clone()), started.elapsed());
            }
            Ok(_) => {}
            Err(err) => chain.recorder.record(&chain.info, Err(err), started.elapsed()),
        }
        result.map(|_| ())
    })
}

impl Chain {
    fn root_path(&self) -> PathBuf {
        self.case
            .root()
            .map_or_else(|| self.work.dir.clone(), |root| self.work.source_path(root))
    }

    fn capture(request: &CaptureRequest) -> Result<CaptureResult, UnitError> {
        capture(request).map_err(|source| UnitError::Capture {
            source,
            invocation: request.display_invocation(),
        })
    }

    /// Build the executable for a runnable case. Requires a clean exit with
    /// empty stdout.
    fn build(&self) -> Result<Verdict, UnitError> {
        let kind = self.case.build_kind().unwrap_or(BuildKind::Exe);
        let request = compile_request(
            &self.config,
            kind,
            &self.root_path(),
            &self.work.out_dir,
            &self.entry,
            &self.host,
        )
        .current_dir(&self.work.dir);
        let result = Self::capture(&request)?;
        if result.termination != Termination::Exited(0) {
            return Err(UnitError::BuildFailed {
                termination: result.termination,
                stderr: result.stderr_lossy().into_owned(),
                invocation: request.display_invocation(),
            });
        }
        if !result.stdout.is_empty() {
            return Err(UnitError::Verify {
                failure: VerifyFailure::UnexpectedStdout {
                    stdout: result.stdout_lossy().into_owned(),
                },
                termination: result.termination,
                invocation: request.display_invocation(),
            });
        }
        Ok(Verdict::Pass(Some(result.termination)))
    }

    fn run_artifact(&self) -> Result<Verdict, UnitError> {
        if !self.entry.target.can_exec_on(&self.host) {
            return Ok(Verdict::Skip(format!(
                "{} artifacts cannot run on a {} host",
                self.entry.target, self.host
            )));
        }
        let artifact = artifact_path(&self.work.out_dir, &self.entry, &self.host);
        let request = CaptureRequest::new(artifact)
            .args(self.case.cli_args.iter())
            .current_dir(&self.work.dir)
            .max_output_bytes(self.config.max_output_bytes)
            .timeout(self.config.timeouts.run());
        let result = Self::capture(&request)?;
        self.check(&result, &request)
    }

    /// For categories whose compiler invocation is the observed process.
    fn compile_and_verify(&self) -> Result<Verdict, UnitError> {
        let root = self.root_path();
        let request = match self.case.category() {
            Category::Translate => translate_request(&self.config, &root, &self.entry),
            _ => compile_request(
                &self.config,
                self.case.build_kind().unwrap_or(BuildKind::Obj),
                &root,
                &self.work.out_dir,
                &self.entry,
                &self.host,
            ),
        }
        .current_dir(&self.work.dir);
        let result = Self::capture(&request)?;
        self.check(&result, &request)
    }

    fn check(
        &self,
        result: &CaptureResult,
        request: &CaptureRequest,
    ) -> Result<Verdict, UnitError> {
        let ctx = VerifyContext {
            mode: self.entry.mode,
            root_file: self.case.category().root_file_name(),
        };
        verify(&self.case.expected, result, &ctx)
            .map(|()| Verdict::Pass(Some(result.termination)))
            .map_err(|failure| UnitError::Verify {
                failure,
                termination: result.termination,
                invocation: request.display_invocation(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::CaseSet;
    use crate::graph::LocalGraph;
    use crate::target::{Arch, Os};

    const HOST: Host = Host::new(Os::Linux, Arch::X86_64);

    fn builder(config: HarnessConfig) -> SuiteBuilder {
        let planner = MatrixPlanner::with_default_candidates(HOST, config.matrix_filter())
            .expect("valid matrix");
        SuiteBuilder::new(
            Arc::new(config),
            Arc::new(planner),
            Arc::new(RunRecorder::new()),
        )
    }

    fn registry() -> CaseRegistry {
        let mut set = CaseSet::new("smoke");
        set.add_exact_output("hello", "src", "Hello, World!\n");
        set.add_compile_error("bad", "src", &["error"]);
        set.add_translate("hdr", "int a;", &["pub var a"]);
        CaseRegistry::from_case_set(set).expect("valid cases")
    }

    #[test]
    fn ordinals_are_dense_and_labels_unique() {
        let units = builder(HarnessConfig::default()).plan(&registry());
        assert!(!units.is_empty());
        let total = units.len();
        let mut labels = std::collections::BTreeSet::new();
        for (i, unit) in units.iter().enumerate() {
            assert_eq!(unit.info.ordinal, i + 1);
            assert_eq!(unit.info.total, total);
            assert!(labels.insert(unit.info.label.clone()), "duplicate {}", unit.info.label);
        }
        assert!(labels.contains("compare-output hello (native-Debug-bare-multi)"));
        assert!(labels.contains("compile-error bad (native-Debug-bare-multi)"));
        assert!(labels.contains("translate-c hdr (native-Debug-bare-multi)"));
    }

    #[test]
    fn filter_applies_before_numbering() {
        let config = HarnessConfig {
            filter: Some("compile-error".into()),
            ..HarnessConfig::default()
        };
        let units = builder(config).plan(&registry());
        assert!(!units.is_empty());
        assert!(units.iter().all(|u| u.info.category == Category::CompileError));
        assert_eq!(units.last().map(|u| u.info.total), Some(units.len()));
    }

    #[test]
    fn runnable_chains_have_three_units() {
        let config = HarnessConfig {
            modes: vec![crate::matrix::OptimizeMode::Debug],
            skip_non_native: true,
            skip_libc: true,
            threading: crate::matrix::ThreadingFilter::Multi,
            ..HarnessConfig::default()
        };
        let b = builder(config);
        let mut graph = LocalGraph::new();
        let roots = b.register(&mut graph, &registry()).expect("register");
        // one native entry per case; exact output gets materialize/compile/run
        assert_eq!(roots.len(), 3);
        assert_eq!(graph.len(), 3 + 2 + 2);
        let run = roots[0];
        let compile = graph.dependencies(run)[0];
        assert!(graph.name(compile).is_some_and(|n| n.starts_with("compile ")));
        let materialize = graph.dependencies(compile)[0];
        assert!(graph.name(materialize).is_some_and(|n| n.starts_with("materialize ")));
        assert_eq!(graph.roots(ROOT_TARGET), roots.as_slice());
    }
}
