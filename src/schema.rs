//! Rule Document Model
//!
//! Reading and writing Schematron rule documents, plus the structural checks run on a freshly
//! read document before it is handed to the compilation pipeline.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use crate::engine::QueryBinding;
use crate::error::{Result, SchematronError};
use crate::tree::{XmlDocument, XmlElement};

/// ISO Schematron namespace
pub const SCHEMATRON_NS: &str = "http://purl.oclc.org/dsdl/schematron";

/// Prefix used when writing Schematron elements
pub const SCHEMATRON_PREFIX: &str = "sch";

/// Read and parse a rule document
pub fn read_rule_document(path: &Path) -> Result<XmlDocument> {
    XmlDocument::read_file(path).map_err(|e| SchematronError::Read {
        path: path.to_path_buf(),
        details: e.to_string(),
    })
}

/// Serialize a rule document to `path`
pub fn write_rule_document(document: &XmlDocument, path: &Path) -> Result<()> {
    document
        .write_file(path, true)
        .map_err(|e| SchematronError::Io(std::io::Error::other(e.to_string())))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssueLevel {
    Warning,
    Error,
}

/// One problem found in a rule document
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaIssue {
    pub level: IssueLevel,
    pub message: String,
}

impl SchemaIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == IssueLevel::Error
    }
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            IssueLevel::Warning => "warning",
            IssueLevel::Error => "error",
        };
        write!(f, "[{}] {}", level, self.message)
    }
}

fn is_sch(element: &XmlElement, local: &str) -> bool {
    element.name.is(SCHEMATRON_NS, local)
}

/// Structural checks on a rule document as written (before inclusion expansion)
pub fn check_rule_document(document: &XmlDocument) -> Vec<SchemaIssue> {
    let mut issues = Vec::new();
    let root = &document.root;

    if !is_sch(root, "schema") {
        issues.push(SchemaIssue::error(format!(
            "Root element must be <schema> in namespace {}, found <{}>",
            SCHEMATRON_NS, root.name.local
        )));
        return issues;
    }

    if let Err(e) = QueryBinding::from_attribute(root.attribute("queryBinding")) {
        issues.push(SchemaIssue::error(e.to_string()));
    }

    let patterns: Vec<&XmlElement> = root.children_named(SCHEMATRON_NS, "pattern").collect();
    let phases: Vec<&XmlElement> = root.children_named(SCHEMATRON_NS, "phase").collect();
    let diagnostics: HashSet<&str> = root
        .children_named(SCHEMATRON_NS, "diagnostics")
        .flat_map(|d| d.children_named(SCHEMATRON_NS, "diagnostic"))
        .filter_map(|d| d.attribute("id"))
        .collect();

    let pattern_ids: HashSet<&str> = patterns.iter().filter_map(|p| p.attribute("id")).collect();
    let phase_ids: HashSet<&str> = phases.iter().filter_map(|p| p.attribute("id")).collect();

    if let Some(default_phase) = root.attribute("defaultPhase")
        && default_phase != "#ALL"
        && !phase_ids.contains(default_phase)
    {
        issues.push(SchemaIssue::error(format!(
            "defaultPhase '{}' does not name a phase",
            default_phase
        )));
    }

    for phase in &phases {
        let id = phase.attribute("id").unwrap_or("");
        if id.is_empty() {
            issues.push(SchemaIssue::error("Phase without an id"));
        }
        for active in phase.children_named(SCHEMATRON_NS, "active") {
            match active.attribute("pattern") {
                Some(pattern) if pattern_ids.contains(pattern) => {}
                Some(pattern) => issues.push(SchemaIssue::error(format!(
                    "Phase '{}' activates unknown pattern '{}'",
                    id, pattern
                ))),
                None => issues.push(SchemaIssue::error(format!(
                    "Phase '{}' has an <active> element without a pattern",
                    id
                ))),
            }
        }
    }

    let mut seen: HashMap<&str, usize> = HashMap::new();
    collect_ids(root, &mut seen);
    let mut duplicates: Vec<&str> = seen
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(id, _)| id)
        .collect();
    duplicates.sort_unstable();
    for id in duplicates {
        issues.push(SchemaIssue::error(format!("Duplicate id '{}'", id)));
    }

    for pattern in &patterns {
        check_pattern(pattern, &diagnostics, &mut issues);
    }

    issues
}

fn collect_ids<'a>(element: &'a XmlElement, seen: &mut HashMap<&'a str, usize>) {
    if element.name.namespace.as_deref() == Some(SCHEMATRON_NS)
        && let Some(id) = element.attribute("id")
    {
        *seen.entry(id).or_insert(0) += 1;
    }
    for child in element.child_elements() {
        collect_ids(child, seen);
    }
}

fn check_pattern(pattern: &XmlElement, diagnostics: &HashSet<&str>, issues: &mut Vec<SchemaIssue>) {
    let label = pattern.attribute("id").unwrap_or("(anonymous)");
    let instantiates = pattern.attribute("is-a").is_some();
    let has_content = pattern
        .child_elements()
        .any(|c| is_sch(c, "rule") || is_sch(c, "include"));

    if !instantiates && !has_content {
        issues.push(SchemaIssue::warning(format!(
            "Pattern '{}' contains no rules",
            label
        )));
    }

    for rule in pattern.children_named(SCHEMATRON_NS, "rule") {
        let is_abstract = rule.attribute("abstract") == Some("true");
        if !is_abstract && rule.attribute("context").is_none_or(|c| c.trim().is_empty()) {
            issues.push(SchemaIssue::error(format!(
                "Rule in pattern '{}' has no context",
                label
            )));
        }
        for check in rule
            .child_elements()
            .filter(|c| is_sch(c, "assert") || is_sch(c, "report"))
        {
            if check.attribute("test").is_none_or(|t| t.trim().is_empty()) {
                issues.push(SchemaIssue::error(format!(
                    "<{}> in pattern '{}' has no test",
                    check.name.local, label
                )));
            }
            for reference in check.attribute("diagnostics").unwrap_or("").split_whitespace() {
                if !diagnostics.contains(reference) {
                    issues.push(SchemaIssue::error(format!(
                        "<{}> in pattern '{}' references unknown diagnostic '{}'",
                        check.name.local, label, reference
                    )));
                }
            }
        }
    }
}
