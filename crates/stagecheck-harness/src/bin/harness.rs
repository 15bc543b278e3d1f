//! CLI entrypoint for the stagecheck compiler conformance harness.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use stagecheck_harness::matrix::{MatrixPlanner, OptimizeMode, ThreadingFilter};
use stagecheck_harness::structured_log::{ArtifactIndex, LogEmitter, now_utc};
use stagecheck_harness::{
    CaseRegistry, CaseSet, HarnessConfig, Host, RunRecorder, SuiteBuilder, SuiteReport,
    normalize_stack_trace, run_suite,
};

/// Conformance tooling for compiler test suites.
#[derive(Debug, Parser)]
#[command(name = "harness")]
#[command(about = "Build and verify compiler test cases across a target matrix")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile, run and verify every selected case.
    Run {
        #[command(flatten)]
        selection: Selection,
        /// Structured JSONL log output path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Output report path (markdown); a `.json` twin is written next to it.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Artifact index JSON path listing the log and report with digests.
        #[arg(long)]
        artifact_index: Option<PathBuf>,
        /// Optional fixed timestamp string for deterministic report generation.
        #[arg(long)]
        timestamp: Option<String>,
        /// Suppress `Test i/N` progress lines.
        #[arg(long)]
        quiet: bool,
    },
    /// List the units a run would register, without executing anything.
    Plan {
        #[command(flatten)]
        selection: Selection,
    },
    /// Normalize a captured stack trace (stdin or file) the way verification does.
    NormalizeTrace {
        /// Input file; reads stdin when omitted.
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct Selection {
    /// Case set JSON file or directory of case set files.
    #[arg(long, required = true)]
    cases: Vec<PathBuf>,
    /// Harness config JSON.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Compiler under test.
    #[arg(long)]
    compiler: Option<PathBuf>,
    /// Root of the per-case work directories.
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Only register units whose label contains this string.
    #[arg(long)]
    filter: Option<String>,
    /// Optimization modes to run (repeatable): debug, release-safe, release-fast, release-small.
    #[arg(long = "mode", value_parser = parse_mode)]
    modes: Vec<OptimizeMode>,
    /// Skip every target that is not the host.
    #[arg(long)]
    skip_non_native: bool,
    /// Skip every entry that links libc.
    #[arg(long)]
    skip_libc: bool,
    /// Threading filter: any, single or multi.
    #[arg(long, value_parser = parse_threading)]
    threading: Option<ThreadingFilter>,
    /// Per-stream capture ceiling in bytes.
    #[arg(long)]
    max_output_bytes: Option<usize>,
    /// Compiler timeout in seconds (0 disables).
    #[arg(long)]
    compile_timeout: Option<u64>,
    /// Artifact timeout in seconds (0 disables).
    #[arg(long)]
    run_timeout: Option<u64>,
}

fn parse_mode(raw: &str) -> Result<OptimizeMode, String> {
    OptimizeMode::from_str_loose(raw).ok_or_else(|| format!("unknown optimization mode '{raw}'"))
}

fn parse_threading(raw: &str) -> Result<ThreadingFilter, String> {
    ThreadingFilter::from_str_loose(raw).ok_or_else(|| format!("unknown threading filter '{raw}'"))
}

impl Selection {
    /// Defaults, then config file, then environment, then flags.
    fn config(&self) -> Result<HarnessConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_file(path)?,
            None => HarnessConfig::default(),
        };
        config.apply_env()?;
        if let Some(compiler) = &self.compiler {
            config.compiler.clone_from(compiler);
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_root.clone_from(dir);
        }
        if self.filter.is_some() {
            config.filter.clone_from(&self.filter);
        }
        if !self.modes.is_empty() {
            config.modes.clone_from(&self.modes);
        }
        config.skip_non_native |= self.skip_non_native;
        config.skip_libc |= self.skip_libc;
        if let Some(threading) = self.threading {
            config.threading = threading;
        }
        if let Some(limit) = self.max_output_bytes {
            config.max_output_bytes = limit;
        }
        if let Some(secs) = self.compile_timeout {
            config.timeouts.compile_secs = secs;
        }
        if let Some(secs) = self.run_timeout {
            config.timeouts.run_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load every case set, in path order. Returns the suite name and registry.
    fn registry(&self) -> Result<(String, CaseRegistry), Box<dyn std::error::Error>> {
        let mut paths = Vec::new();
        for path in &self.cases {
            if path.is_dir() {
                let mut found: Vec<PathBuf> = std::fs::read_dir(path)?
                    .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                    .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
                    .collect();
                found.sort();
                paths.extend(found);
            } else {
                paths.push(path.clone());
            }
        }
        if paths.is_empty() {
            return Err("no case set JSON files found".into());
        }

        let mut suite = None;
        let mut registry = CaseRegistry::new();
        for path in paths {
            let set = CaseSet::from_file(&path)?;
            eprintln!("Loaded {} cases from {}", set.cases.len(), path.display());
            suite.get_or_insert_with(|| set.suite.clone());
            for case in set.cases {
                registry.insert(case)?;
            }
        }
        Ok((suite.unwrap_or_else(|| "stagecheck".to_string()), registry))
    }
}

fn planner(config: &HarnessConfig) -> Result<MatrixPlanner, Box<dyn std::error::Error>> {
    Ok(MatrixPlanner::with_default_candidates(
        Host::detect()?,
        config.matrix_filter(),
    )?)
}

fn sha256_of(path: &Path, index: &mut ArtifactIndex, kind: &str) {
    if let Err(err) = index.add_file(path, kind) {
        eprintln!("Skipping artifact {}: {err}", path.display());
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            selection,
            log,
            report,
            artifact_index,
            timestamp,
            quiet,
        } => {
            let mut config = selection.config()?;
            if quiet {
                config.progress = false;
            }
            let (suite, registry) = selection.registry()?;
            let planner = planner(&config)?;
            let host = planner.host().to_string();
            let run_id = format!(
                "run-{}-{}",
                std::process::id(),
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs()
            );

            let mut recorder = RunRecorder::new();
            if let Some(path) = &log {
                recorder = recorder.with_log(LogEmitter::to_file(path, &suite, &run_id)?);
            }
            if config.progress {
                recorder = recorder.with_progress(Box::new(std::io::stderr()));
            }
            let recorder = Arc::new(recorder);
            let compiler = config.compiler.display().to_string();

            let summary = run_suite(
                Arc::new(config),
                Arc::new(planner),
                &registry,
                Arc::clone(&recorder),
            )?;

            let report_doc = SuiteReport {
                title: String::from("Compiler Conformance Report"),
                suite: suite.clone(),
                host,
                compiler,
                timestamp: timestamp.unwrap_or_else(now_utc),
                summary,
            };
            eprintln!(
                "Verification complete: total={}, passed={}, failed={}, skipped={}",
                report_doc.summary.total,
                report_doc.summary.passed,
                report_doc.summary.failed,
                report_doc.summary.skipped
            );

            let mut index = ArtifactIndex::new(&run_id, &suite);
            if let Some(path) = &log {
                sha256_of(path, &mut index, "log");
            }
            if let Some(report_path) = &report {
                eprintln!("Writing report to {}", report_path.display());
                std::fs::write(report_path, report_doc.to_markdown())?;
                let json_path = report_path.with_extension("json");
                std::fs::write(&json_path, report_doc.to_json())?;
                sha256_of(report_path, &mut index, "report_markdown");
                sha256_of(&json_path, &mut index, "report_json");
            }
            if let Some(index_path) = &artifact_index {
                std::fs::write(index_path, index.to_json()?)?;
                eprintln!("Wrote artifact index to {}", index_path.display());
            }

            if !report_doc.summary.all_passed() {
                let failed = report_doc.summary.failed;
                return Err(format!("{failed} conformance unit(s) failed").into());
            }
        }
        Command::Plan { selection } => {
            let config = Arc::new(selection.config()?);
            let (_, registry) = selection.registry()?;
            let planner = Arc::new(planner(&config)?);
            let builder = SuiteBuilder::new(config, planner, Arc::new(RunRecorder::new()));
            let units = builder.plan(&registry);
            for unit in &units {
                println!("{}/{} {}", unit.info.ordinal, unit.info.total, unit.info.label);
            }
            eprintln!("{} units from {} cases", units.len(), registry.len());
        }
        Command::NormalizeTrace { input } => {
            let raw = match input {
                Some(path) => std::fs::read_to_string(&path)?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            print!("{}", normalize_stack_trace(&raw));
        }
    }

    Ok(())
}
