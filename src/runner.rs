//! Batch Validation
//!
//! [`ValidationRunner`] runs one executable validator over every resolved input file, in order.
//! Each run yields a [`DiagnosticReport`] that is persisted (when an SVRL directory is
//! configured) before [`OutcomePolicy`] compares its error count against the expectation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::fs;

use crate::engine::Parameters;
use crate::error::{Result, SchematronError};
use crate::executable::ExecutableValidator;
use crate::input::InputDocument;
use crate::resolver::EntityResolver;
use crate::resources::ResolvedFile;
use crate::svrl::{DiagnosticReport, Finding, svrl_path};

/// Terminal status of one validated file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Pass,
    Fail,
    /// The file could not be validated at all
    Error,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Pass => write!(f, "PASS"),
            OutcomeStatus::Fail => write!(f, "FAIL"),
            OutcomeStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Status plus the message explaining it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub status: OutcomeStatus,
    pub message: String,
}

fn count_phrase(count: usize, what: &str) -> String {
    format!(
        "{} Schematron {}{}",
        count,
        what,
        if count == 1 { "" } else { "s" }
    )
}

/// Expectation and fail-fast settings of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomePolicy {
    pub expect_success: bool,
    pub fail_on_error: bool,
}

impl Default for OutcomePolicy {
    fn default() -> Self {
        Self {
            expect_success: true,
            fail_on_error: true,
        }
    }
}

impl OutcomePolicy {
    pub fn new(expect_success: bool, fail_on_error: bool) -> Self {
        Self {
            expect_success,
            fail_on_error,
        }
    }

    /// Compare the counts of one report against the expectation
    pub fn decide(&self, file: &Path, schematron: &str, errors: usize, warnings: usize) -> Decision {
        let file = file.display();
        let error_text = count_phrase(errors, "error");
        let warning_text = count_phrase(warnings, "warning");

        match (self.expect_success, errors) {
            (true, 0) => {
                let mut message = format!(
                    "XML file '{}' was validated against Schematron '{}' and matches the rules",
                    file, schematron
                );
                if warnings > 0 {
                    message.push_str(&format!(" - only {} are contained", warning_text));
                }
                Decision {
                    status: OutcomeStatus::Pass,
                    message,
                }
            }
            (true, _) => {
                let mut message = error_text;
                if warnings > 0 {
                    message.push_str(&format!(" and {}", warning_text));
                }
                message.push_str(&format!(" for XML file '{}'", file));
                Decision {
                    status: OutcomeStatus::Fail,
                    message,
                }
            }
            (false, 0) => {
                let mut message = format!("No Schematron errors for erroneous XML file '{}'", file);
                if warnings > 0 {
                    message.push_str(&format!(" - only {} are contained", warning_text));
                }
                Decision {
                    status: OutcomeStatus::Fail,
                    message,
                }
            }
            (false, _) => {
                let mut message = format!(
                    "XML file '{}' was validated against Schematron '{}' {}",
                    file, schematron, error_text
                );
                if warnings > 0 {
                    message.push_str(&format!(" and {}", warning_text));
                }
                message.push_str(" were found (as expected)");
                Decision {
                    status: OutcomeStatus::Pass,
                    message,
                }
            }
        }
    }

    /// Raise `message` as a build failure, or log it when the batch may continue
    pub fn route(&self, message: &str) -> Result<()> {
        if self.fail_on_error {
            return Err(SchematronError::BuildFailed(message.to_string()));
        }
        log::warn!("{}", message);
        Ok(())
    }
}

/// Result for one input file
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub relative: PathBuf,
    pub expected_success: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub status: OutcomeStatus,
    pub message: String,
    pub duration: Duration,
    pub svrl_path: Option<PathBuf>,
}

impl FileOutcome {
    pub fn is_pass(&self) -> bool {
        self.status == OutcomeStatus::Pass
    }
}

/// Results of a whole batch
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub outcomes: Vec<FileOutcome>,
    pub duration: Duration,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn passed(&self) -> usize {
        self.count(OutcomeStatus::Pass)
    }

    pub fn failed(&self) -> usize {
        self.count(OutcomeStatus::Fail)
    }

    pub fn errors(&self) -> usize {
        self.count(OutcomeStatus::Error)
    }

    fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// True when every file passed
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(FileOutcome::is_pass)
    }

    pub fn merge(&mut self, other: BatchResult) {
        self.outcomes.extend(other.outcomes);
        self.duration += other.duration;
    }
}

fn describe_finding(finding: &Finding) -> String {
    let mut text = format!("[{}] {}", finding.severity, finding.location);
    if let Some(id) = &finding.id {
        text.push_str(&format!(" ({})", id));
    }
    text.push_str(&format!(": test '{}'", finding.test));
    if let Some(message) = &finding.text {
        text.push_str(&format!(" - {}", message));
    }
    text
}

/// Runs a validator over resolved files
pub struct ValidationRunner {
    validator: Arc<ExecutableValidator>,
    schematron: String,
    resolver: Arc<dyn EntityResolver>,
    policy: OutcomePolicy,
    parameters: Parameters,
    svrl_dir: Option<PathBuf>,
}

impl ValidationRunner {
    pub fn new(
        validator: Arc<ExecutableValidator>,
        schematron: impl Into<String>,
        resolver: Arc<dyn EntityResolver>,
        policy: OutcomePolicy,
    ) -> Self {
        Self {
            validator,
            schematron: schematron.into(),
            resolver,
            policy,
            parameters: Parameters::new(),
            svrl_dir: None,
        }
    }

    /// Runtime parameters passed to every run
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Persist one SVRL report per file below `dir`
    pub fn with_svrl_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.svrl_dir = dir;
        self
    }

    pub fn policy(&self) -> OutcomePolicy {
        self.policy
    }

    /// Validate every file in order. Under fail-on-error the first FAIL or ERROR aborts with
    /// [`SchematronError::BuildFailed`]; otherwise every file is visited.
    pub async fn run(&self, files: &[ResolvedFile]) -> Result<BatchResult> {
        let start = Instant::now();
        let mut batch = BatchResult::default();

        for file in files {
            let outcome = self.validate_file(file).await;
            if !outcome.is_pass() {
                self.policy.route(&outcome.message)?;
            }
            batch.outcomes.push(outcome);
        }

        batch.duration = start.elapsed();
        Ok(batch)
    }

    /// Validate one file and decide its outcome without routing failures
    pub async fn validate_file(&self, file: &ResolvedFile) -> FileOutcome {
        let start = Instant::now();
        log::info!(
            "Validating XML file '{}' against Schematron rules from '{}' expecting {}",
            file.path.display(),
            self.schematron,
            if self.policy.expect_success {
                "success"
            } else {
                "failure"
            }
        );

        let report = match fs::read_to_string(&file.path).await {
            Ok(text) => self.execute(&text, &file.path),
            Err(e) => Err(SchematronError::Io(e)),
        };
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                let message = format!(
                    "Exception validating XML '{}' against Schematron rules from '{}'. Technical details: {}",
                    file.path.display(),
                    self.schematron,
                    e
                );
                return self.outcome(file, 0, 0, OutcomeStatus::Error, message, start, None);
            }
        };

        let svrl_path = self.persist(&report, file).await;

        let errors = report.error_count();
        let warnings = report.warning_count();
        let decision = self
            .policy
            .decide(&file.path, &self.schematron, errors, warnings);

        match decision.status {
            OutcomeStatus::Pass => log::info!("{}", decision.message),
            _ => {
                log::error!("{}", decision.message);
                for finding in report.findings() {
                    if finding.severity.is_error() {
                        log::error!("{}", describe_finding(finding));
                    } else {
                        log::warn!("{}", describe_finding(finding));
                    }
                }
            }
        }

        self.outcome(
            file,
            errors,
            warnings,
            decision.status,
            decision.message,
            start,
            svrl_path,
        )
    }

    /// Parse and run synchronously; the sxd document never crosses an await point
    fn execute(&self, text: &str, path: &Path) -> Result<DiagnosticReport> {
        let input = InputDocument::parse(text, path, self.resolver.as_ref()).map_err(|e| {
            SchematronError::Runtime {
                file: path.to_path_buf(),
                details: e.to_string(),
            }
        })?;
        self.validator
            .run(&input, &self.parameters)
            .map_err(|e| SchematronError::Runtime {
                file: path.to_path_buf(),
                details: e.to_string(),
            })
    }

    async fn persist(&self, report: &DiagnosticReport, file: &ResolvedFile) -> Option<PathBuf> {
        let dir = self.svrl_dir.as_ref()?;
        let path = svrl_path(dir, &file.relative);
        match report.write_svrl(&path).await {
            Ok(()) => {
                log::info!("Successfully saved SVRL file '{}'", path.display());
                Some(path)
            }
            Err(e) => {
                log::error!("Error saving SVRL file '{}': {}", path.display(), e);
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn outcome(
        &self,
        file: &ResolvedFile,
        error_count: usize,
        warning_count: usize,
        status: OutcomeStatus,
        message: String,
        start: Instant,
        svrl_path: Option<PathBuf>,
    ) -> FileOutcome {
        FileOutcome {
            path: file.path.clone(),
            relative: file.relative.clone(),
            expected_success: self.policy.expect_success,
            error_count,
            warning_count,
            status,
            message,
            duration: start.elapsed(),
            svrl_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CompileOptions;
    use crate::engine::synthesis::bind_schema;
    use crate::resolver::DefaultEntityResolver;
    use crate::tree::XmlDocument;
    use tempfile::TempDir;

    const RULES: &str = r#"<sch:schema xmlns:sch="http://purl.oclc.org/dsdl/schematron">
      <sch:pattern id="items">
        <sch:rule context="item">
          <sch:assert test="@id">Item without id</sch:assert>
          <sch:report test="@legacy" role="warning">Legacy item</sch:report>
        </sch:rule>
      </sch:pattern>
    </sch:schema>"#;

    fn validator() -> Arc<ExecutableValidator> {
        let schema = bind_schema(&XmlDocument::parse_str(RULES).unwrap(), None).unwrap();
        Arc::new(ExecutableValidator::new(schema, &CompileOptions::default()).unwrap())
    }

    fn runner(policy: OutcomePolicy) -> ValidationRunner {
        ValidationRunner::new(
            validator(),
            "rules.sch",
            Arc::new(DefaultEntityResolver::new()),
            policy,
        )
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> ResolvedFile {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        ResolvedFile {
            path,
            relative: PathBuf::from(name),
        }
    }

    #[test]
    fn test_outcome_table() {
        let file = Path::new("doc.xml");
        let expect_valid = OutcomePolicy::new(true, true);
        let expect_invalid = OutcomePolicy::new(false, true);

        assert_eq!(expect_valid.decide(file, "r.sch", 0, 0).status, OutcomeStatus::Pass);

        let fail = expect_valid.decide(file, "r.sch", 2, 0);
        assert_eq!(fail.status, OutcomeStatus::Fail);
        assert_eq!(fail.message, "2 Schematron errors for XML file 'doc.xml'");

        let fail = expect_invalid.decide(file, "r.sch", 0, 1);
        assert_eq!(fail.status, OutcomeStatus::Fail);
        assert_eq!(
            fail.message,
            "No Schematron errors for erroneous XML file 'doc.xml' - only 1 Schematron warning are contained"
        );

        let pass = expect_invalid.decide(file, "r.sch", 1, 0);
        assert_eq!(pass.status, OutcomeStatus::Pass);
        assert!(pass.message.ends_with("1 Schematron error were found (as expected)"));
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let decision = OutcomePolicy::default().decide(Path::new("a.xml"), "r.sch", 0, 3);
        assert_eq!(decision.status, OutcomeStatus::Pass);
        assert!(decision.message.contains("only 3 Schematron warnings"));

        let decision = OutcomePolicy::default().decide(Path::new("a.xml"), "r.sch", 1, 2);
        assert_eq!(
            decision.message,
            "1 Schematron error and 2 Schematron warnings for XML file 'a.xml'"
        );
    }

    #[test]
    fn test_route() {
        assert!(matches!(
            OutcomePolicy::new(true, true).route("boom"),
            Err(SchematronError::BuildFailed(m)) if m == "boom"
        ));
        assert!(OutcomePolicy::new(true, false).route("boom").is_ok());
    }

    #[tokio::test]
    async fn test_counts_errors_and_warnings() {
        let temp_dir = TempDir::new().unwrap();
        let file = write(
            &temp_dir,
            "doc.xml",
            r#"<items><item/><item id="1" legacy="yes"/><item id="2"/></items>"#,
        );

        let outcome = runner(OutcomePolicy::new(true, false)).validate_file(&file).await;
        assert_eq!(outcome.error_count, 1);
        assert_eq!(outcome.warning_count, 1);
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert!(outcome.expected_success);
    }

    #[tokio::test]
    async fn test_svrl_is_written_for_failures() {
        let temp_dir = TempDir::new().unwrap();
        let svrl_dir = temp_dir.path().join("svrl");
        let file = write(&temp_dir, "bad.xml", "<items><item/></items>");

        let outcome = runner(OutcomePolicy::new(true, false))
            .with_svrl_dir(Some(svrl_dir.clone()))
            .validate_file(&file)
            .await;

        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert_eq!(outcome.svrl_path, Some(svrl_dir.join("bad.xml.svrl")));
        let svrl = std::fs::read_to_string(svrl_dir.join("bad.xml.svrl")).unwrap();
        assert!(svrl.contains("failed-assert"));
    }

    #[tokio::test]
    async fn test_fail_fast_stops_the_batch() {
        let temp_dir = TempDir::new().unwrap();
        let files = vec![
            write(&temp_dir, "a.xml", "<items><item/></items>"),
            write(&temp_dir, "b.xml", "<items><item id=\"1\"/></items>"),
        ];

        let result = runner(OutcomePolicy::new(true, true)).run(&files).await;
        assert!(matches!(result, Err(SchematronError::BuildFailed(_))));
    }

    #[tokio::test]
    async fn test_continue_visits_every_file() {
        let temp_dir = TempDir::new().unwrap();
        let files = vec![
            write(&temp_dir, "a.xml", "<items><item/></items>"),
            write(&temp_dir, "b.xml", "<items><unclosed></items>"),
            write(&temp_dir, "c.xml", "<items><item id=\"1\"/></items>"),
        ];

        let batch = runner(OutcomePolicy::new(true, false)).run(&files).await.unwrap();
        assert_eq!(batch.total(), 3);
        assert_eq!(batch.failed(), 1);
        assert_eq!(batch.errors(), 1);
        assert_eq!(batch.passed(), 1);
        assert!(!batch.is_success());
        assert!(batch.outcomes[1].message.starts_with("Exception validating XML"));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error_outcome() {
        let temp_dir = TempDir::new().unwrap();
        let file = ResolvedFile {
            path: temp_dir.path().join("gone.xml"),
            relative: PathBuf::from("gone.xml"),
        };
        let outcome = runner(OutcomePolicy::default()).validate_file(&file).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.svrl_path.is_none());
    }
}
