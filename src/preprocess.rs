//! Rule Document Preprocessing
//!
//! Reduces a rule document to the minimal syntax: inclusions and abstract patterns are expanded
//! and optional constructs are dropped.

use std::path::PathBuf;

use crate::engine::abstract_expand::expand_abstracts;
use crate::engine::include::expand_includes;
use crate::error::{EngineError, Result, SchematronError};
use crate::resolver::EntityResolver;
use crate::schema::{SCHEMATRON_NS, read_rule_document, write_rule_document};
use crate::tree::{XmlDocument, XmlElement, XmlNode};

/// What survives preprocessing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessOptions {
    pub keep_titles: bool,
    pub keep_diagnostics: bool,
    /// When false, `report test="X"` becomes `assert test="not(X)"`
    pub keep_reports: bool,
    pub keep_empty_patterns: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            keep_titles: false,
            keep_diagnostics: false,
            keep_reports: false,
            keep_empty_patterns: true,
        }
    }
}

/// Expand and reduce `document`
pub fn preprocess(
    document: &XmlDocument,
    resolver: &dyn EntityResolver,
    options: &PreprocessOptions,
) -> std::result::Result<XmlDocument, EngineError> {
    let included = expand_includes(document, resolver)?;
    let mut expanded = expand_abstracts(&included)?;
    reduce(&mut expanded.root, options);
    Ok(expanded)
}

fn is_sch(element: &XmlElement, local: &str) -> bool {
    element.name.is(SCHEMATRON_NS, local)
}

fn reduce(element: &mut XmlElement, options: &PreprocessOptions) {
    element.children.retain(|node| match node {
        XmlNode::Element(child) => {
            (options.keep_titles || !is_sch(child, "title"))
                && (options.keep_diagnostics || !is_sch(child, "diagnostics"))
                && (options.keep_empty_patterns
                    || !is_sch(child, "pattern")
                    || child.first_child_named(SCHEMATRON_NS, "rule").is_some())
        }
        _ => true,
    });

    for child in element.child_elements_mut() {
        if is_sch(child, "assert") || is_sch(child, "report") {
            if !options.keep_diagnostics {
                child.remove_attribute("diagnostics");
            }
            if !options.keep_reports && is_sch(child, "report") {
                child.name.local = "assert".to_string();
                let test = child.attribute("test").unwrap_or_default().to_string();
                child.set_attribute("test", format!("not({})", test));
            }
        } else {
            reduce(child, options);
        }
    }
}

/// Preprocess one file into another
#[derive(Debug, Clone)]
pub struct PreprocessTask {
    pub src: Option<PathBuf>,
    pub dst: Option<PathBuf>,
    pub options: PreprocessOptions,
    pub fail_on_error: bool,
}

impl PreprocessTask {
    pub async fn execute(&self, resolver: &dyn EntityResolver) -> Result<()> {
        let Some((src, dst)) = self.check_preconditions().await? else {
            return Ok(());
        };

        let result = read_rule_document(src).and_then(|document| {
            let reduced = preprocess(&document, resolver, &self.options).map_err(|e| {
                SchematronError::Read {
                    path: src.to_path_buf(),
                    details: e.to_string(),
                }
            })?;
            write_rule_document(&reduced, dst)
        });

        match result {
            Ok(()) => {
                log::info!(
                    "Successfully pre-processed Schematron {} to {}",
                    src.display(),
                    dst.display()
                );
                Ok(())
            }
            Err(e) => {
                let absolute = std::path::absolute(src).unwrap_or_else(|_| src.to_path_buf());
                self.error(&format!(
                    "Error processing Schematron {}: {}",
                    absolute.display(),
                    e
                ))
            }
        }
    }

    async fn check_preconditions(&self) -> Result<Option<(&PathBuf, &PathBuf)>> {
        let Some(src) = &self.src else {
            self.error("No source Schematron file specified!")?;
            return Ok(None);
        };
        if let Ok(metadata) = tokio::fs::metadata(src).await
            && !metadata.is_file()
        {
            self.error(&format!(
                "The specified source Schematron file {} is not a file!",
                src.display()
            ))?;
            return Ok(None);
        }
        let Some(dst) = &self.dst else {
            self.error("No destination Schematron file specified!")?;
            return Ok(None);
        };
        if let Ok(metadata) = tokio::fs::metadata(dst).await
            && !metadata.is_file()
        {
            self.error(&format!(
                "The specified destination Schematron file {} is not a file!",
                dst.display()
            ))?;
            return Ok(None);
        }
        Ok(Some((src, dst)))
    }

    fn error(&self, message: &str) -> Result<()> {
        if self.fail_on_error {
            return Err(SchematronError::BuildFailed(message.to_string()));
        }
        log::error!("{}", message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::DefaultEntityResolver;
    use tempfile::TempDir;

    const RULES: &str = r#"<sch:schema xmlns:sch="http://purl.oclc.org/dsdl/schematron">
      <sch:title>Orders</sch:title>
      <sch:pattern id="p">
        <sch:title>Lines</sch:title>
        <sch:rule context="line">
          <sch:assert test="@qty" diagnostics="d1">Quantity missing</sch:assert>
          <sch:report test="@qty = 0">Zero quantity</sch:report>
        </sch:rule>
      </sch:pattern>
      <sch:pattern id="empty"/>
      <sch:diagnostics><sch:diagnostic id="d1">Line has no qty</sch:diagnostic></sch:diagnostics>
    </sch:schema>"#;

    fn run(options: PreprocessOptions) -> XmlDocument {
        let document = XmlDocument::parse_str(RULES).unwrap();
        preprocess(&document, &DefaultEntityResolver::new(), &options).unwrap()
    }

    fn rule(document: &XmlDocument) -> &XmlElement {
        document
            .root
            .first_child_named(SCHEMATRON_NS, "pattern")
            .and_then(|p| p.first_child_named(SCHEMATRON_NS, "rule"))
            .unwrap()
    }

    #[test]
    fn test_minimal_syntax() {
        let reduced = run(PreprocessOptions::default());

        assert!(reduced.root.first_child_named(SCHEMATRON_NS, "title").is_none());
        assert!(reduced.root.first_child_named(SCHEMATRON_NS, "diagnostics").is_none());
        assert_eq!(reduced.root.children_named(SCHEMATRON_NS, "pattern").count(), 2);

        let checks: Vec<&XmlElement> = rule(&reduced).child_elements().collect();
        assert!(checks.iter().all(|c| c.name.local == "assert"));
        assert_eq!(checks[0].attribute("diagnostics"), None);
        assert_eq!(checks[1].attribute("test"), Some("not(@qty = 0)"));
    }

    #[test]
    fn test_keep_everything() {
        let reduced = run(PreprocessOptions {
            keep_titles: true,
            keep_diagnostics: true,
            keep_reports: true,
            keep_empty_patterns: false,
        });

        assert!(reduced.root.first_child_named(SCHEMATRON_NS, "title").is_some());
        assert!(reduced.root.first_child_named(SCHEMATRON_NS, "diagnostics").is_some());
        assert_eq!(reduced.root.children_named(SCHEMATRON_NS, "pattern").count(), 1);
        let checks: Vec<&XmlElement> = rule(&reduced).child_elements().collect();
        assert_eq!(checks[0].attribute("diagnostics"), Some("d1"));
        assert_eq!(checks[1].name.local, "report");
    }

    #[tokio::test]
    async fn test_task_writes_destination() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("rules.sch");
        let dst = temp_dir.path().join("out/minimal.sch");
        std::fs::write(&src, RULES).unwrap();

        let task = PreprocessTask {
            src: Some(src),
            dst: Some(dst.clone()),
            options: PreprocessOptions::default(),
            fail_on_error: true,
        };
        task.execute(&DefaultEntityResolver::new()).await.unwrap();

        let written = XmlDocument::read_file(&dst).unwrap();
        assert!(written.root.first_child_named(SCHEMATRON_NS, "title").is_none());
    }

    #[tokio::test]
    async fn test_task_preconditions() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("rules.sch");
        std::fs::write(&src, RULES).unwrap();

        let task = PreprocessTask {
            src: Some(src.clone()),
            dst: Some(temp_dir.path().to_path_buf()),
            options: PreprocessOptions::default(),
            fail_on_error: true,
        };
        let error = task.execute(&DefaultEntityResolver::new()).await.unwrap_err();
        assert!(error.to_string().contains("destination Schematron file"));

        let lenient = PreprocessTask {
            src: None,
            fail_on_error: false,
            ..task
        };
        assert!(lenient.execute(&DefaultEntityResolver::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_task_reports_broken_source() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("rules.sch");
        std::fs::write(&src, "<not-closed").unwrap();

        let task = PreprocessTask {
            src: Some(src),
            dst: Some(temp_dir.path().join("out.sch")),
            options: PreprocessOptions::default(),
            fail_on_error: true,
        };
        let error = task.execute(&DefaultEntityResolver::new()).await.unwrap_err();
        assert!(error.to_string().starts_with("Error processing Schematron"));
    }
}
