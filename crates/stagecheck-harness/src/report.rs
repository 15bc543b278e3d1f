//! Verification results and suite reports.

use serde::{Deserialize, Serialize};

use crate::cases::Category;
use crate::error::FailureTier;
use crate::matrix::OptimizeMode;
use crate::structured_log::Outcome;

/// Result of one verification unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub label: String,
    pub category: Category,
    pub case_name: String,
    /// Matrix entry description.
    pub entry: String,
    pub mode: OptimizeMode,
    pub ordinal: usize,
    pub total: usize,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<FailureTier>,
    /// Failure text with expected and actual content, or the skip reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation: Option<String>,
    /// Exit code of the verified process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    pub duration_ms: u64,
}

impl VerificationResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub harness_failures: usize,
    pub unexpected_successes: usize,
    pub mismatches: usize,
    /// Results in progress order.
    pub results: Vec<VerificationResult>,
}

impl VerificationSummary {
    #[must_use]
    pub fn from_results(mut results: Vec<VerificationResult>) -> Self {
        results.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.label.cmp(&b.label)));
        let count = |outcome: Outcome| results.iter().filter(|r| r.outcome == outcome).count();
        let tier = |tier: FailureTier| results.iter().filter(|r| r.tier == Some(tier)).count();
        Self {
            total: results.len(),
            passed: count(Outcome::Pass),
            failed: count(Outcome::Fail),
            skipped: count(Outcome::Skip),
            harness_failures: tier(FailureTier::Harness),
            unexpected_successes: tier(FailureTier::UnexpectedSuccess),
            mismatches: tier(FailureTier::Mismatch),
            results,
        }
    }

    /// Skips do not count as failures.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|r| r.outcome == Outcome::Fail)
    }
}

/// Human and machine readable report of one suite run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub title: String,
    pub suite: String,
    pub host: String,
    pub compiler: String,
    /// Timestamp (UTC).
    pub timestamp: String,
    pub summary: VerificationSummary,
}

impl SuiteReport {
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();
        out.push_str(&format!("# {}\n\n", self.title));
        out.push_str(&format!("- Suite: {}\n", self.suite));
        out.push_str(&format!("- Host: {}\n", self.host));
        out.push_str(&format!("- Compiler: {}\n", self.compiler));
        out.push_str(&format!("- Timestamp: {}\n", self.timestamp));
        out.push_str(&format!("- Total: {}\n", s.total));
        out.push_str(&format!("- Passed: {}\n", s.passed));
        out.push_str(&format!("- Failed: {}\n", s.failed));
        out.push_str(&format!("- Skipped: {}\n", s.skipped));
        out.push_str(&format!(
            "- Failure tiers: harness={}, unexpected_success={}, mismatch={}\n\n",
            s.harness_failures, s.unexpected_successes, s.mismatches
        ));

        out.push_str("| # | Unit | Status | Tier |\n");
        out.push_str("|---|------|--------|------|\n");
        for r in &s.results {
            let status = match r.outcome {
                Outcome::Pass => "PASS",
                Outcome::Fail => "FAIL",
                Outcome::Skip => "SKIP",
            };
            let tier = r.tier.map_or("", FailureTier::as_str);
            out.push_str(&format!(
                "| {}/{} | {} | {} | {} |\n",
                r.ordinal,
                r.total,
                r.label.replace('|', "\\|"),
                status,
                tier
            ));
        }

        let failures: Vec<_> = s.failures().collect();
        if !failures.is_empty() {
            out.push_str("\n## Failures\n");
            for r in failures {
                out.push_str(&format!("\n### {}\n\n```\n", r.label));
                out.push_str(r.message.as_deref().unwrap_or("(no message)"));
                out.push_str("\n```\n");
            }
        }
        out
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}
