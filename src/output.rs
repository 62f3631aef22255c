//! Verdict Output and Reporting
//!
//! This module renders the outcome of one mediation for the CLI host.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::fault::fault_reason;
use crate::mediator::Mediation;
use crate::message::MessageContext;
use crate::resolver::ResolverStats;
use crate::validator::ValidationProblem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Continue,
    Stop,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Continue => f.write_str("CONTINUE"),
            Verdict::Stop => f.write_str("STOP"),
        }
    }
}

/// Everything worth reporting about one mediation
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub api_id: String,
    pub envelope: PathBuf,
    pub verdict: Verdict,
    /// Fault reason sent back, when stopped
    pub reason: Option<String>,
    pub problems: Vec<ValidationProblem>,
    /// Fault envelope sent back, when stopped
    pub fault: Option<String>,
    pub duration_ms: u64,
    pub stats: ResolverStats,
}

impl ValidationReport {
    pub fn new(
        api_id: &str,
        envelope: &Path,
        mediation: &Mediation,
        ctx: &MessageContext,
        duration: Duration,
        stats: ResolverStats,
    ) -> Self {
        let (verdict, reason, problems) = match mediation {
            Mediation::Continue => (Verdict::Continue, None, Vec::new()),
            Mediation::Stop(error) => (
                Verdict::Stop,
                Some(fault_reason(error)),
                error.problems().to_vec(),
            ),
        };

        Self {
            api_id: api_id.to_string(),
            envelope: envelope.to_path_buf(),
            verdict,
            reason,
            problems,
            fault: ctx.is_sent_back().then(|| ctx.envelope().to_string()),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            stats,
        }
    }
}

/// Output formatter for validation verdicts
pub struct Output {
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_report(
        &self,
        report: &ValidationReport,
        format: OutputFormat,
    ) -> Result<String, serde_json::Error> {
        match format {
            OutputFormat::Json => serde_json::to_string_pretty(report),
            OutputFormat::Human => Ok(self.format_human(report)),
        }
    }

    fn format_human(&self, report: &ValidationReport) -> String {
        let mut output = self.format_verdict_line(report);
        output.push('\n');

        if self.verbosity == VerbosityLevel::Quiet {
            return output;
        }

        for problem in &report.problems {
            output.push_str(&format!("    {}\n", problem));
        }

        if let Some(fault) = &report.fault {
            output.push_str("\nFault sent back:\n");
            output.push_str(fault);
            output.push('\n');
        }

        if self.verbosity >= VerbosityLevel::Verbose {
            output.push_str(&format_stats(&report.stats));
        }

        output
    }

    fn format_verdict_line(&self, report: &ValidationReport) -> String {
        let duration = format_duration(Duration::from_millis(report.duration_ms));
        match report.verdict {
            Verdict::Continue => format!(
                "{}  {} [{}] ({})",
                self.colorize("✓ CONTINUE", "32"),
                report.envelope.display(),
                report.api_id,
                duration
            ),
            Verdict::Stop => format!(
                "{}  {} [{}] ({}) - {}",
                self.colorize("✗ STOP", "31"),
                report.envelope.display(),
                report.api_id,
                duration,
                report.reason.as_deref().unwrap_or_default()
            ),
        }
    }
}

fn format_stats(stats: &ResolverStats) -> String {
    let mut output = String::new();
    output.push_str("\nResolver Statistics:\n");
    output.push_str(&format!(
        "  Service models built: {}\n",
        stats.service_model_builds
    ));
    output.push_str(&format!(
        "  Schemas compiled: {}\n",
        stats.schema_compilations
    ));
    output.push_str(&format!(
        "  Cached: {} service model(s), {} schema(s)\n",
        stats.cached_service_models, stats.cached_schemas
    ));
    output
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
