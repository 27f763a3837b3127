//! Simple Output and Reporting
//!
//! This module provides output formatting for batch results.

use std::time::Duration;

use crate::cli::VerbosityLevel;
use crate::runner::{BatchResult, FileOutcome, OutcomeStatus};

/// Simple output formatter for human-readable results
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

    /// Formatter that never emits colour codes
    pub fn plain(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            show_colors: false,
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_results(&self, results: &BatchResult) -> String {
        let mut output = String::new();

        match self.verbosity {
            VerbosityLevel::Quiet => {
                if !results.is_success() {
                    output.push_str(&format!(
                        "Failed: {} Errors: {}\n",
                        results.failed(),
                        results.errors()
                    ));
                }
            }
            VerbosityLevel::Normal | VerbosityLevel::Verbose => {
                output.push_str(&self.format_summary(results));

                let shown = results
                    .outcomes
                    .iter()
                    .filter(|o| self.verbosity == VerbosityLevel::Verbose || !o.is_pass());
                for outcome in shown {
                    output.push('\n');
                    output.push_str(&self.format_file_result(outcome));
                }
                if !results.outcomes.is_empty() {
                    output.push('\n');
                }
            }
        }

        output
    }

    pub fn format_file_result(&self, outcome: &FileOutcome) -> String {
        let path_display = outcome.path.display();
        let duration_str = format_duration(outcome.duration);
        let expectation = if outcome.expected_success {
            "expected valid"
        } else {
            "expected invalid"
        };

        match outcome.status {
            OutcomeStatus::Pass => format!(
                "{}  {} ({}, {}) - {} error{}, {} warning{}",
                self.colorize("✓ PASS", "32"),
                path_display,
                expectation,
                duration_str,
                outcome.error_count,
                plural(outcome.error_count),
                outcome.warning_count,
                plural(outcome.warning_count)
            ),
            OutcomeStatus::Fail => format!(
                "{}  {} ({}, {}) - {}",
                self.colorize("✗ FAIL", "31"),
                path_display,
                expectation,
                duration_str,
                outcome.message
            ),
            OutcomeStatus::Error => format!(
                "{}  {} ({}) - {}",
                self.colorize("⚠ ERROR", "33"),
                path_display,
                duration_str,
                outcome.message
            ),
        }
    }

    fn format_summary(&self, results: &BatchResult) -> String {
        let mut output = String::new();
        output.push_str("Validation Summary:\n");
        output.push_str(&format!("  Total files: {}\n", results.total()));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Passed:", "32"),
            results.passed()
        ));

        if results.failed() > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Failed:", "31"),
                results.failed()
            ));
        }
        if results.errors() > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Errors:", "33"),
                results.errors()
            ));
        }

        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(results.duration)
        ));

        if self.verbosity == VerbosityLevel::Verbose {
            let findings: usize = results
                .outcomes
                .iter()
                .map(|o| o.error_count + o.warning_count)
                .sum();
            output.push_str(&format!("  Findings: {}\n", findings));
        }

        output
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

pub fn format_duration(duration: Duration) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn outcome(name: &str, status: OutcomeStatus, errors: usize) -> FileOutcome {
        FileOutcome {
            path: PathBuf::from(name),
            relative: PathBuf::from(name),
            expected_success: true,
            error_count: errors,
            warning_count: 0,
            status,
            message: format!("{} Schematron errors for XML file '{}'", errors, name),
            duration: Duration::from_millis(5),
            svrl_path: None,
        }
    }

    fn create_test_results() -> BatchResult {
        BatchResult {
            outcomes: vec![
                outcome("a.xml", OutcomeStatus::Pass, 0),
                outcome("b.xml", OutcomeStatus::Fail, 2),
            ],
            duration: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_output_summary() {
        let output = Output::plain(VerbosityLevel::Normal);
        let formatted = output.format_results(&create_test_results());
        assert!(formatted.contains("Validation Summary:"));
        assert!(formatted.contains("Total files: 2"));
        assert!(formatted.contains("Failed: 1"));
        assert!(formatted.contains("✗ FAIL  b.xml"));
        assert!(!formatted.contains("a.xml"));
    }

    #[test]
    fn test_verbose_lists_every_file() {
        let output = Output::plain(VerbosityLevel::Verbose);
        let formatted = output.format_results(&create_test_results());
        assert!(formatted.contains("✓ PASS  a.xml"));
        assert!(formatted.contains("Findings: 2"));
    }

    #[test]
    fn test_quiet_output() {
        let output = Output::plain(VerbosityLevel::Quiet);
        assert_eq!(
            output.format_results(&create_test_results()),
            "Failed: 1 Errors: 0\n"
        );
        assert!(output.format_results(&BatchResult::default()).is_empty());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30.0s");
    }
}
