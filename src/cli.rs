use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum VerbosityLevel {
    /// Only show errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show stage progress and cache activity
    Verbose,
}

impl VerbosityLevel {
    /// Default log level when `RUST_LOG` is not set
    pub fn log_level(self) -> log::LevelFilter {
        match self {
            VerbosityLevel::Quiet => log::LevelFilter::Error,
            VerbosityLevel::Normal => log::LevelFilter::Info,
            VerbosityLevel::Verbose => log::LevelFilter::Debug,
        }
    }
}

/// Validate XML files against Schematron rules
#[derive(Parser, Debug, Clone)]
#[command(name = "validate-sch")]
#[command(about = "Validate XML files against Schematron rules and check the expected outcome")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        global = true,
        help = "Quiet mode",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Validate XML files against a Schematron file
    Validate(ValidateArgs),
    /// Reduce a Schematron file to the minimal syntax
    Preprocess(PreprocessArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Schematron file; without it the configured tasks run
    #[arg(long = "schematron")]
    pub schematron: Option<PathBuf>,

    /// Processing engine: pure, schematron or xslt
    #[arg(long = "mode")]
    pub mode: Option<String>,

    /// Phase to validate
    #[arg(long = "phase")]
    pub phase: Option<String>,

    /// Directory receiving one SVRL report per input
    #[arg(long = "svrl-dir")]
    pub svrl_dir: Option<PathBuf>,

    /// Whether the inputs are expected to be valid
    #[arg(long = "expect-success", action = clap::ArgAction::Set)]
    pub expect_success: Option<bool>,

    /// Abort on the first failure instead of logging it
    #[arg(long = "fail-on-error", action = clap::ArgAction::Set)]
    pub fail_on_error: Option<bool>,

    /// Custom parameter passed to the validator (name=value)
    #[arg(long = "param", value_parser = parse_key_value, action = clap::ArgAction::Append)]
    pub params: Vec<(String, String)>,

    /// Catalog entry mapping a system id to a local file (id=path)
    #[arg(long = "catalog", value_parser = parse_key_value, action = clap::ArgAction::Append)]
    pub catalog: Vec<(String, String)>,

    /// Save the intermediate compilation results into this directory
    #[arg(long = "debug-dir")]
    pub debug_dir: Option<PathBuf>,

    /// Input files, directories or glob patterns
    pub inputs: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PreprocessArgs {
    /// Source Schematron file
    #[arg(long = "src")]
    pub src: Option<PathBuf>,

    /// Destination file
    #[arg(long = "dst")]
    pub dst: Option<PathBuf>,

    #[arg(long = "keep-titles")]
    pub keep_titles: bool,

    #[arg(long = "keep-diagnostics")]
    pub keep_diagnostics: bool,

    /// Keep reports instead of turning them into negated asserts
    #[arg(long = "keep-reports")]
    pub keep_reports: bool,

    #[arg(long = "keep-empty-patterns", action = clap::ArgAction::Set, default_value_t = true)]
    pub keep_empty_patterns: bool,

    #[arg(long = "fail-on-error", action = clap::ArgAction::Set, default_value_t = true)]
    pub fail_on_error: bool,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Expected name=value, got '{}'", s)),
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    /// Arguments of the validate command, if that is the command given
    pub fn validate_args(&self) -> Option<&ValidateArgs> {
        match &self.command {
            Command::Validate(args) => Some(args),
            Command::Preprocess(_) => None,
        }
    }
}
