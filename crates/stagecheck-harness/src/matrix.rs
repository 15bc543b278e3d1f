//! Target/mode matrix planning.
//!
//! A case is compiled once per applicable [`MatrixEntry`]. The candidate list is
//! hand-authored and ordered: every target row for `Debug` comes first, the
//! optimized modes last, so cheap builds surface common failures early.
//!
//! Planning is a pure filter over that list. The host is passed in explicitly,
//! so identical inputs always produce the identical, order-preserving plan.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::target::{Abi, Arch, Host, Os, Target};

/// Compiler optimization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizeMode {
    Debug,
    ReleaseSafe,
    ReleaseFast,
    ReleaseSmall,
}

impl OptimizeMode {
    pub const ALL: [Self; 4] = [
        Self::Debug,
        Self::ReleaseSafe,
        Self::ReleaseFast,
        Self::ReleaseSmall,
    ];

    /// Label used in unit names (`Debug`, `ReleaseSafe`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::ReleaseSafe => "ReleaseSafe",
            Self::ReleaseFast => "ReleaseFast",
            Self::ReleaseSmall => "ReleaseSmall",
        }
    }

    /// Parse mode with loose casing and separators.
    #[must_use]
    pub fn from_str_loose(raw: &str) -> Option<Self> {
        let norm: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        match norm.as_str() {
            "debug" => Some(Self::Debug),
            "releasesafe" => Some(Self::ReleaseSafe),
            "releasefast" => Some(Self::ReleaseFast),
            "releasesmall" => Some(Self::ReleaseSmall),
            _ => None,
        }
    }

    /// Compiler flag selecting this mode; `Debug` is the compiler default.
    #[must_use]
    pub const fn compiler_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::ReleaseSafe => Some("--release-safe"),
            Self::ReleaseFast => Some("--release-fast"),
            Self::ReleaseSmall => Some("--release-small"),
        }
    }
}

impl fmt::Display for OptimizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete (target, mode, libc, threading) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatrixEntry {
    pub target: Target,
    pub mode: OptimizeMode,
    #[serde(default)]
    pub link_libc: bool,
    #[serde(default)]
    pub single_threaded: bool,
    /// Skip this entry when its (os, arch family) equals the host's; the native
    /// entries already cover that configuration.
    #[serde(default)]
    pub disable_on_native_host_match: bool,
}

impl MatrixEntry {
    #[must_use]
    pub const fn new(target: Target, mode: OptimizeMode) -> Self {
        Self {
            target,
            mode,
            link_libc: false,
            single_threaded: false,
            disable_on_native_host_match: false,
        }
    }

    #[must_use]
    pub const fn with_libc(mut self) -> Self {
        self.link_libc = true;
        self
    }

    #[must_use]
    pub const fn single_threaded(mut self) -> Self {
        self.single_threaded = true;
        self
    }

    #[must_use]
    pub const fn disable_native(mut self) -> Self {
        self.disable_on_native_host_match = true;
        self
    }

    /// Whether the build links libc: declared, or forced by the target OS.
    #[must_use]
    pub fn effective_link_libc(&self, host: &Host) -> bool {
        self.link_libc || self.target.requires_libc(host)
    }

    /// `<target>-<mode>-<c|bare>-<single|multi>`; unique per distinct entry.
    #[must_use]
    pub fn describe(&self, host: &Host) -> String {
        format!(
            "{}-{}-{}-{}",
            self.target,
            self.mode,
            if self.effective_link_libc(host) { "c" } else { "bare" },
            if self.single_threaded { "single" } else { "multi" }
        )
    }

    fn identity(&self, host: &Host) -> (Target, OptimizeMode, bool, bool) {
        (
            self.target.clone(),
            self.mode,
            self.effective_link_libc(host),
            self.single_threaded,
        )
    }
}

/// Global threading selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadingFilter {
    #[default]
    Any,
    /// Only single-threaded entries.
    Single,
    /// Only multi-threaded entries.
    Multi,
}

impl ThreadingFilter {
    #[must_use]
    pub fn from_str_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "any" | "all" => Some(Self::Any),
            "single" | "single-threaded" => Some(Self::Single),
            "multi" | "multi-threaded" => Some(Self::Multi),
            _ => None,
        }
    }

    #[must_use]
    pub const fn admits(self, single_threaded: bool) -> bool {
        match self {
            Self::Any => true,
            Self::Single => single_threaded,
            Self::Multi => !single_threaded,
        }
    }
}

/// Operator-level switches applied to every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixFilter {
    pub skip_non_native: bool,
    pub skip_libc: bool,
    pub threading: ThreadingFilter,
    /// Optimization modes selected for this run.
    pub modes: Vec<OptimizeMode>,
}

impl Default for MatrixFilter {
    fn default() -> Self {
        Self {
            skip_non_native: false,
            skip_libc: false,
            threading: ThreadingFilter::Any,
            modes: OptimizeMode::ALL.to_vec(),
        }
    }
}

/// What a single case asks of the planner.
#[derive(Debug, Clone, Copy)]
pub struct CaseConstraints<'a> {
    /// Pin the case to this one target instead of the matrix.
    pub target_override: Option<&'a Target>,
    /// The case needs libc linked.
    pub link_libc: bool,
    /// Modes the case's category runs under, in matrix order.
    pub modes: &'a [OptimizeMode],
}

impl CaseConstraints<'_> {
    /// No override, no libc, every mode.
    #[must_use]
    pub const fn unconstrained() -> CaseConstraints<'static> {
        CaseConstraints {
            target_override: None,
            link_libc: false,
            modes: &OptimizeMode::ALL,
        }
    }
}

/// Why an entry was left out of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NonNative,
    LibcDisabled,
    ModeNotSelected,
    ModeNotApplicable,
    RedundantLibc,
    CaseNeedsLibc,
    Threading,
    NativeHostDuplicate,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NonNative => "non-native targets are skipped",
            Self::LibcDisabled => "libc targets are skipped",
            Self::ModeNotSelected => "optimization mode not selected",
            Self::ModeNotApplicable => "mode not used by this test category",
            Self::RedundantLibc => "OS already mandates libc",
            Self::CaseNeedsLibc => "case requires libc",
            Self::Threading => "threading filter",
            Self::NativeHostDuplicate => "duplicates the native host entry",
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("matrix candidate #{second} ({description}) duplicates candidate #{first}")]
    DuplicateEntry {
        description: String,
        first: usize,
        second: usize,
    },
}

/// Filters the candidate list for each case.
#[derive(Debug, Clone)]
pub struct MatrixPlanner {
    candidates: Vec<MatrixEntry>,
    host: Host,
    filter: MatrixFilter,
}

impl MatrixPlanner {
    /// Build a planner. Two candidates that describe the same effective
    /// configuration are rejected rather than silently merged.
    pub fn new(
        candidates: Vec<MatrixEntry>,
        host: Host,
        filter: MatrixFilter,
    ) -> Result<Self, PlanError> {
        let mut seen = BTreeMap::new();
        for (idx, entry) in candidates.iter().enumerate() {
            if let Some(first) = seen.insert(entry.identity(&host), idx) {
                return Err(PlanError::DuplicateEntry {
                    description: entry.describe(&host),
                    first,
                    second: idx,
                });
            }
        }
        Ok(Self {
            candidates,
            host,
            filter,
        })
    }

    /// Planner over [`default_candidates`].
    pub fn with_default_candidates(host: Host, filter: MatrixFilter) -> Result<Self, PlanError> {
        Self::new(default_candidates(), host, filter)
    }

    #[must_use]
    pub fn candidates(&self) -> &[MatrixEntry] {
        &self.candidates
    }

    #[must_use]
    pub const fn host(&self) -> &Host {
        &self.host
    }

    #[must_use]
    pub const fn filter(&self) -> &MatrixFilter {
        &self.filter
    }

    /// Ordered list of entries the case runs under.
    #[must_use]
    pub fn plan(&self, case: &CaseConstraints<'_>) -> Vec<MatrixEntry> {
        match case.target_override {
            Some(target) => {
                let entry = self.override_entry(target, case);
                if self.admits(&entry, case).is_ok() {
                    vec![entry]
                } else {
                    Vec::new()
                }
            }
            None => self
                .candidates
                .iter()
                .filter(|entry| self.admits(entry, case).is_ok())
                .cloned()
                .collect(),
        }
    }

    /// Apply the exclusion rules in their fixed order; the first rule that
    /// rejects the entry names the reason.
    pub fn admits(
        &self,
        entry: &MatrixEntry,
        case: &CaseConstraints<'_>,
    ) -> Result<(), SkipReason> {
        let host = &self.host;
        let filter = &self.filter;

        // 1. global switches
        if filter.skip_non_native && !entry.target.matches_host(host) {
            return Err(SkipReason::NonNative);
        }
        if filter.skip_libc && (entry.link_libc || case.link_libc) {
            return Err(SkipReason::LibcDisabled);
        }
        if !filter.modes.contains(&entry.mode) {
            return Err(SkipReason::ModeNotSelected);
        }
        if !case.modes.contains(&entry.mode) {
            return Err(SkipReason::ModeNotApplicable);
        }

        // 2. libc redundancy
        if entry.link_libc && entry.target.requires_libc(host) {
            return Err(SkipReason::RedundantLibc);
        }
        if case.link_libc && !entry.effective_link_libc(host) {
            return Err(SkipReason::CaseNeedsLibc);
        }

        // 3. threading
        if !filter.threading.admits(entry.single_threaded) {
            return Err(SkipReason::Threading);
        }

        // 4. native host duplicate
        if entry.disable_on_native_host_match && entry.target.matches_host(host) {
            return Err(SkipReason::NativeHostDuplicate);
        }

        Ok(())
    }

    fn override_entry(&self, target: &Target, case: &CaseConstraints<'_>) -> MatrixEntry {
        let mode = case.modes.first().copied().unwrap_or(OptimizeMode::Debug);
        let mut entry = MatrixEntry::new(target.clone(), mode);
        entry.link_libc = case.link_libc && !target.requires_libc(&self.host);
        entry
    }
}

/// The standard matrix: native variants first, then cross targets, repeated for
/// each mode from `Debug` to `ReleaseSmall`.
#[must_use]
pub fn default_candidates() -> Vec<MatrixEntry> {
    let rows: [fn(OptimizeMode) -> MatrixEntry; 16] = [
        |m| MatrixEntry::new(Target::Native, m),
        |m| MatrixEntry::new(Target::Native, m).with_libc(),
        |m| MatrixEntry::new(Target::Native, m).single_threaded(),
        |m| MatrixEntry::new(Target::cross(Arch::X86_64, Os::Linux, Abi::None), m).disable_native(),
        |m| {
            MatrixEntry::new(Target::cross(Arch::X86_64, Os::Linux, Abi::Gnu), m)
                .with_libc()
                .disable_native()
        },
        |m| {
            MatrixEntry::new(Target::cross(Arch::X86_64, Os::Linux, Abi::Musl), m)
                .with_libc()
                .disable_native()
        },
        |m| MatrixEntry::new(Target::cross(Arch::I386, Os::Linux, Abi::None), m).disable_native(),
        |m| {
            MatrixEntry::new(Target::cross(Arch::I386, Os::Linux, Abi::Musl), m)
                .with_libc()
                .disable_native()
        },
        |m| {
            MatrixEntry::new(Target::cross(Arch::Aarch64, Os::Linux, Abi::None), m).disable_native()
        },
        |m| {
            MatrixEntry::new(Target::cross(Arch::Aarch64, Os::Linux, Abi::Musl), m)
                .with_libc()
                .disable_native()
        },
        |m| {
            let arm = crate::target::CrossTarget::new(Arch::Arm, Os::Linux, Abi::None)
                .with_sub_arch("v8_5a");
            MatrixEntry::new(Target::Cross(arm), m).disable_native()
        },
        |m| MatrixEntry::new(Target::cross(Arch::Mipsel, Os::Linux, Abi::None), m).disable_native(),
        |m| {
            MatrixEntry::new(Target::cross(Arch::Riscv64, Os::Linux, Abi::None), m).disable_native()
        },
        |m| MatrixEntry::new(Target::cross(Arch::X86_64, Os::Macos, Abi::Gnu), m).disable_native(),
        |m| {
            MatrixEntry::new(Target::cross(Arch::X86_64, Os::Windows, Abi::Gnu), m).disable_native()
        },
        |m| {
            MatrixEntry::new(Target::cross(Arch::X86_64, Os::Windows, Abi::Gnu), m)
                .with_libc()
                .disable_native()
        },
    ];

    OptimizeMode::ALL
        .iter()
        .flat_map(|&mode| rows.iter().map(move |row| row(mode)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_X64: Host = Host::new(Os::Linux, Arch::X86_64);

    fn planner(filter: MatrixFilter) -> MatrixPlanner {
        MatrixPlanner::with_default_candidates(LINUX_X64, filter).expect("default matrix is valid")
    }

    #[test]
    fn default_candidates_are_debug_first() {
        let all = default_candidates();
        let first_release = all
            .iter()
            .position(|e| e.mode != OptimizeMode::Debug)
            .unwrap();
        assert!(all[..first_release].iter().all(|e| e.mode == OptimizeMode::Debug));
        assert_eq!(all.last().unwrap().mode, OptimizeMode::ReleaseSmall);
    }

    #[test]
    fn native_duplicates_are_dropped_on_matching_host() {
        let plan = planner(MatrixFilter::default()).plan(&CaseConstraints::unconstrained());
        assert!(
            plan.iter()
                .all(|e| !(e.disable_on_native_host_match && e.target.matches_host(&LINUX_X64)))
        );
        // i386 is a different arch family, so it stays.
        assert!(
            plan.iter()
                .any(|e| e.target == Target::cross(Arch::I386, Os::Linux, Abi::None))
        );
    }

    #[test]
    fn explicit_libc_on_libc_mandating_os_is_redundant() {
        let p = planner(MatrixFilter::default());
        let macos = Target::cross(Arch::X86_64, Os::Macos, Abi::Gnu);
        let entry = MatrixEntry::new(macos.clone(), OptimizeMode::Debug).with_libc();
        assert_eq!(
            p.admits(&entry, &CaseConstraints::unconstrained()),
            Err(SkipReason::RedundantLibc)
        );
        let bare = MatrixEntry::new(macos, OptimizeMode::Debug);
        assert!(bare.effective_link_libc(&LINUX_X64));
        assert!(p.admits(&bare, &CaseConstraints::unconstrained()).is_ok());
    }

    #[test]
    fn case_requesting_libc_keeps_only_libc_entries() {
        let p = planner(MatrixFilter::default());
        let case = CaseConstraints {
            target_override: None,
            link_libc: true,
            modes: &[OptimizeMode::Debug],
        };
        let plan = p.plan(&case);
        assert!(!plan.is_empty());
        assert!(plan.iter().all(|e| e.effective_link_libc(&LINUX_X64)));
    }

    #[test]
    fn override_is_a_single_debug_entry() {
        let p = planner(MatrixFilter::default());
        let target = Target::cross(Arch::Aarch64, Os::Linux, Abi::Gnu);
        let case = CaseConstraints {
            target_override: Some(&target),
            link_libc: false,
            modes: &[OptimizeMode::Debug],
        };
        let plan = p.plan(&case);
        assert_eq!(plan, vec![MatrixEntry::new(target.clone(), OptimizeMode::Debug)]);

        let skip_cross = planner(MatrixFilter {
            skip_non_native: true,
            ..MatrixFilter::default()
        });
        assert!(skip_cross.plan(&case).is_empty());
    }

    #[test]
    fn threading_filter_is_exact() {
        let single = planner(MatrixFilter {
            threading: ThreadingFilter::Single,
            ..MatrixFilter::default()
        })
        .plan(&CaseConstraints::unconstrained());
        assert!(!single.is_empty());
        assert!(single.iter().all(|e| e.single_threaded));

        let multi = planner(MatrixFilter {
            threading: ThreadingFilter::Multi,
            ..MatrixFilter::default()
        })
        .plan(&CaseConstraints::unconstrained());
        assert!(multi.iter().all(|e| !e.single_threaded));
    }

    #[test]
    fn duplicate_candidates_are_rejected() {
        let e = MatrixEntry::new(Target::Native, OptimizeMode::Debug);
        let err = MatrixPlanner::new(vec![e.clone(), e], LINUX_X64, MatrixFilter::default())
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::DuplicateEntry {
                description: "native-Debug-bare-multi".into(),
                first: 0,
                second: 1
            }
        );
    }

    #[test]
    fn mode_parsing_and_flags() {
        assert_eq!(OptimizeMode::from_str_loose("release-fast"), Some(OptimizeMode::ReleaseFast));
        assert_eq!(OptimizeMode::from_str_loose("ReleaseSmall"), Some(OptimizeMode::ReleaseSmall));
        assert_eq!(OptimizeMode::from_str_loose("release_safe"), Some(OptimizeMode::ReleaseSafe));
        assert_eq!(OptimizeMode::from_str_loose("fast"), None);
        assert_eq!(OptimizeMode::Debug.compiler_flag(), None);
        assert_eq!(OptimizeMode::ReleaseSafe.compiler_flag(), Some("--release-safe"));
    }
}
