//! Diagnostic Reports
//!
//! A [`DiagnosticReport`] is the ordered event stream produced by one validator run: active
//! patterns, fired rules and findings. Reports serialize to SVRL, one `.svrl` file per
//! validated input.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::TreeError;
use crate::tree::{QualifiedName, XmlDocument, XmlElement};

/// SVRL namespace
pub const SVRL_NS: &str = "http://purl.oclc.org/dsdl/svrl";

/// File extension of persisted reports
pub const SVRL_EXTENSION: &str = "svrl";

/// Severity of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    /// Severity from the declared flag, falling back to the declared role.
    ///
    /// `warning`, `warn`, `info` and `information` (any case) are warnings; every other
    /// value, and no value at all, is an error.
    pub fn from_declaration(flag: Option<&str>, role: Option<&str>) -> Self {
        match flag.or(role).map(str::trim) {
            Some(value)
                if ["warning", "warn", "info", "information"]
                    .iter()
                    .any(|w| value.eq_ignore_ascii_case(w)) =>
            {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }

    pub fn is_error(self) -> bool {
        self == Severity::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Which rule construct produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingKind {
    /// An `assert` whose test evaluated to false
    FailedAssert,
    /// A `report` whose test evaluated to true
    SuccessfulReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticReference {
    pub id: String,
    pub text: String,
}

/// One reported assertion failure or fired report
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub id: Option<String>,
    pub test: String,
    pub location: String,
    pub role: Option<String>,
    pub flag: Option<String>,
    pub text: Option<String>,
    pub diagnostics: Vec<DiagnosticReference>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    ActivePattern {
        id: Option<String>,
        name: Option<String>,
        document: Option<String>,
    },
    FiredRule {
        id: Option<String>,
        context: String,
        role: Option<String>,
        flag: Option<String>,
    },
    Finding(Finding),
}

/// Result of running a validator against one input document
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiagnosticReport {
    pub title: Option<String>,
    pub phase: Option<String>,
    pub schema_version: Option<String>,
    pub namespaces: Vec<(String, String)>,
    pub events: Vec<ReportEvent>,
}

impl DiagnosticReport {
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.events.iter().filter_map(|event| match event {
            ReportEvent::Finding(finding) => Some(finding),
            _ => None,
        })
    }

    pub fn error_count(&self) -> usize {
        self.findings().filter(|f| f.severity.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.findings().filter(|f| !f.severity.is_error()).count()
    }

    /// The SVRL document for this report
    pub fn to_document(&self) -> XmlDocument {
        let mut root = XmlElement::new(svrl("schematron-output"));
        root.namespaces
            .push((Some("svrl".to_string()), SVRL_NS.to_string()));
        set_optional(&mut root, "title", &self.title);
        set_optional(&mut root, "phase", &self.phase);
        set_optional(&mut root, "schemaVersion", &self.schema_version);

        for (prefix, uri) in &self.namespaces {
            root.push_element(
                XmlElement::new(svrl("ns-prefix-in-attribute-values"))
                    .with_attribute("prefix", prefix.clone())
                    .with_attribute("uri", uri.clone()),
            );
        }

        for event in &self.events {
            let element = match event {
                ReportEvent::ActivePattern { id, name, document } => {
                    let mut element = XmlElement::new(svrl("active-pattern"));
                    set_optional(&mut element, "id", id);
                    set_optional(&mut element, "name", name);
                    set_optional(&mut element, "document", document);
                    element
                }
                ReportEvent::FiredRule {
                    id,
                    context,
                    role,
                    flag,
                } => {
                    let mut element =
                        XmlElement::new(svrl("fired-rule")).with_attribute("context", context.clone());
                    set_optional(&mut element, "id", id);
                    set_optional(&mut element, "role", role);
                    set_optional(&mut element, "flag", flag);
                    element
                }
                ReportEvent::Finding(finding) => finding_element(finding),
            };
            root.push_element(element);
        }

        XmlDocument::new(root)
    }

    /// Write the SVRL document to `path`, creating parent directories
    pub async fn write_svrl(&self, path: &Path) -> Result<(), TreeError> {
        let text = self.to_document().to_xml_string(true)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TreeError::Io(format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(path, text)
            .await
            .map_err(|e| TreeError::Io(format!("{}: {}", path.display(), e)))
    }
}

/// `<dir>/<relative>.svrl`
pub fn svrl_path(svrl_dir: &Path, relative: &Path) -> PathBuf {
    let mut name = relative.as_os_str().to_os_string();
    name.push(".");
    name.push(SVRL_EXTENSION);
    svrl_dir.join(PathBuf::from(name))
}

fn svrl(local: &str) -> QualifiedName {
    QualifiedName::namespaced(SVRL_NS, Some("svrl"), local)
}

fn set_optional(element: &mut XmlElement, name: &str, value: &Option<String>) {
    if let Some(value) = value {
        element.set_attribute(name, value.clone());
    }
}

fn text_element(text: &str) -> XmlElement {
    let mut element = XmlElement::new(svrl("text"));
    element.push_text(text.to_string());
    element
}

fn finding_element(finding: &Finding) -> XmlElement {
    let local = match finding.kind {
        FindingKind::FailedAssert => "failed-assert",
        FindingKind::SuccessfulReport => "successful-report",
    };
    let mut element = XmlElement::new(svrl(local))
        .with_attribute("test", finding.test.clone())
        .with_attribute("location", finding.location.clone());
    set_optional(&mut element, "id", &finding.id);
    set_optional(&mut element, "role", &finding.role);
    set_optional(&mut element, "flag", &finding.flag);

    for diagnostic in &finding.diagnostics {
        let mut reference = XmlElement::new(svrl("diagnostic-reference"))
            .with_attribute("diagnostic", diagnostic.id.clone());
        reference.push_element(text_element(&diagnostic.text));
        element.push_element(reference);
    }
    if let Some(text) = &finding.text {
        element.push_element(text_element(text));
    }
    element
}
