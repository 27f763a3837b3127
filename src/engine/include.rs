//! Step 1: inclusion expansion
//!
//! Replaces every `sch:include` with the element it references and every
//! `sch:extends[@href]` with the children of the element it references. References resolve
//! through the transform's entity resolver, relative to the document that contains them; a
//! `#id` fragment selects an element by id instead of the referenced document's root.

use std::path::{Path, PathBuf};

use crate::engine::{StageProgram, TransformContext};
use crate::error::EngineError;
use crate::resolver::EntityResolver;
use crate::schema::SCHEMATRON_NS;
use crate::tree::{XmlDocument, XmlElement, XmlNode};

/// Stage program for inclusion expansion
pub struct IncludeProgram;

impl StageProgram for IncludeProgram {
    fn apply(
        &self,
        input: &XmlDocument,
        context: &TransformContext<'_>,
    ) -> Result<XmlDocument, EngineError> {
        expand_includes(input, context.resolver)
    }
}

/// Expand all inclusions of `document`, recursively
pub fn expand_includes(
    document: &XmlDocument,
    resolver: &dyn EntityResolver,
) -> Result<XmlDocument, EngineError> {
    let mut stack = Vec::new();
    if let Some(location) = &document.location {
        stack.push(reference_key(location, None));
    }

    let root = expand_element(&document.root, document.base_directory(), resolver, &mut stack)?;
    Ok(XmlDocument {
        root,
        location: document.location.clone(),
    })
}

fn reference_key(location: &Path, fragment: Option<&str>) -> String {
    let canonical = std::fs::canonicalize(location).unwrap_or_else(|_| location.to_path_buf());
    format!("{}#{}", canonical.display(), fragment.unwrap_or(""))
}

fn is_href_extends(element: &XmlElement) -> bool {
    element.name.is(SCHEMATRON_NS, "extends") && element.attribute("href").is_some()
}

fn expand_element(
    element: &XmlElement,
    base: Option<&Path>,
    resolver: &dyn EntityResolver,
    stack: &mut Vec<String>,
) -> Result<XmlElement, EngineError> {
    let mut expanded = XmlElement {
        name: element.name.clone(),
        attributes: element.attributes.clone(),
        namespaces: element.namespaces.clone(),
        children: Vec::with_capacity(element.children.len()),
    };

    for child in &element.children {
        match child {
            XmlNode::Element(inner) if inner.name.is(SCHEMATRON_NS, "include") => {
                let included = load_reference(inner, base, resolver, stack)?;
                expanded.push_element(included);
            }
            XmlNode::Element(inner) if is_href_extends(inner) => {
                let extended = load_reference(inner, base, resolver, stack)?;
                expanded.children.extend(extended.children);
            }
            XmlNode::Element(inner) => {
                expanded.push_element(expand_element(inner, base, resolver, stack)?);
            }
            other => expanded.children.push(other.clone()),
        }
    }

    Ok(expanded)
}

fn load_reference(
    reference: &XmlElement,
    base: Option<&Path>,
    resolver: &dyn EntityResolver,
    stack: &mut Vec<String>,
) -> Result<XmlElement, EngineError> {
    let href = reference
        .attribute("href")
        .map(str::trim)
        .unwrap_or_default();
    if href.is_empty() {
        return Err(EngineError::Include {
            href: String::new(),
            details: format!("<{}> without an href attribute", reference.name.local),
        });
    }

    let (target, fragment) = match href.split_once('#') {
        Some((target, fragment)) => (target, Some(fragment).filter(|f| !f.is_empty())),
        None => (href, None),
    };
    if target.is_empty() {
        return Err(EngineError::Include {
            href: href.to_string(),
            details: "same-document references are not supported".to_string(),
        });
    }

    let entity = resolver
        .resolve(target, base)
        .map_err(|e| EngineError::Include {
            href: href.to_string(),
            details: e.to_string(),
        })?;

    let key = reference_key(&entity.location, fragment);
    if stack.contains(&key) {
        return Err(EngineError::IncludeCycle(href.to_string()));
    }

    let document = XmlDocument::parse_str(&entity.content).map_err(|e| EngineError::Include {
        href: href.to_string(),
        details: e.to_string(),
    })?;

    let selected = match fragment {
        Some(id) => document
            .root
            .find_by_id(id)
            .cloned()
            .ok_or_else(|| EngineError::Include {
                href: href.to_string(),
                details: format!("no element with id '{}'", id),
            })?,
        None => document.root,
    };

    let nested_base: Option<PathBuf> = entity.location.parent().map(Path::to_path_buf);
    log::debug!("Including {} from {}", href, entity.location.display());

    stack.push(key);
    let expanded = expand_element(&selected, nested_base.as_deref(), resolver, stack);
    stack.pop();
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::DefaultEntityResolver;
    use tempfile::TempDir;

    const SCH_OPEN: &str = r#"<sch:schema xmlns:sch="http://purl.oclc.org/dsdl/schematron">"#;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_include_replaces_element() {
        let temp_dir = TempDir::new().unwrap();
        write(
            temp_dir.path(),
            "pattern.sch",
            r#"<sch:pattern xmlns:sch="http://purl.oclc.org/dsdl/schematron" id="included">
                 <sch:rule context="a"><sch:assert test="b">b</sch:assert></sch:rule>
               </sch:pattern>"#,
        );
        let main = write(
            temp_dir.path(),
            "main.sch",
            &format!(r#"{}<sch:include href="pattern.sch"/></sch:schema>"#, SCH_OPEN),
        );

        let document = XmlDocument::read_file(&main).unwrap();
        let expanded = expand_includes(&document, &DefaultEntityResolver::new()).unwrap();

        let pattern = expanded
            .root
            .first_child_named(SCHEMATRON_NS, "pattern")
            .unwrap();
        assert_eq!(pattern.attribute("id"), Some("included"));
        assert!(expanded.root.first_child_named(SCHEMATRON_NS, "include").is_none());
        assert_eq!(expanded.location.as_deref(), Some(main.as_path()));
    }

    #[test]
    fn test_include_fragment_and_nested_directories() {
        let temp_dir = TempDir::new().unwrap();
        let lib = temp_dir.path().join("lib");
        std::fs::create_dir(&lib).unwrap();
        write(
            &lib,
            "rules.sch",
            r#"<sch:schema xmlns:sch="http://purl.oclc.org/dsdl/schematron">
                 <sch:pattern id="first"><sch:include href="shared-rule.sch"/></sch:pattern>
                 <sch:pattern id="second"/>
               </sch:schema>"#,
        );
        write(
            &lib,
            "shared-rule.sch",
            r#"<sch:rule xmlns:sch="http://purl.oclc.org/dsdl/schematron" context="x">
                 <sch:report test="y">y</sch:report>
               </sch:rule>"#,
        );
        let main = write(
            temp_dir.path(),
            "main.sch",
            &format!(r#"{}<sch:include href="lib/rules.sch#first"/></sch:schema>"#, SCH_OPEN),
        );

        let document = XmlDocument::read_file(&main).unwrap();
        let expanded = expand_includes(&document, &DefaultEntityResolver::new()).unwrap();

        let pattern = expanded
            .root
            .first_child_named(SCHEMATRON_NS, "pattern")
            .unwrap();
        assert_eq!(pattern.attribute("id"), Some("first"));
        let rule = pattern.first_child_named(SCHEMATRON_NS, "rule").unwrap();
        assert_eq!(rule.attribute("context"), Some("x"));
    }

    #[test]
    fn test_extends_href_inlines_children() {
        let temp_dir = TempDir::new().unwrap();
        write(
            temp_dir.path(),
            "checks.sch",
            r#"<sch:rule xmlns:sch="http://purl.oclc.org/dsdl/schematron">
                 <sch:assert test="@id">id</sch:assert>
                 <sch:assert test="@name">name</sch:assert>
               </sch:rule>"#,
        );
        let main = write(
            temp_dir.path(),
            "main.sch",
            &format!(
                r#"{}<sch:pattern><sch:rule context="item"><sch:extends href="checks.sch"/></sch:rule></sch:pattern></sch:schema>"#,
                SCH_OPEN
            ),
        );

        let document = XmlDocument::read_file(&main).unwrap();
        let expanded = expand_includes(&document, &DefaultEntityResolver::new()).unwrap();
        let rule = expanded
            .root
            .first_child_named(SCHEMATRON_NS, "pattern")
            .and_then(|p| p.first_child_named(SCHEMATRON_NS, "rule"))
            .unwrap();
        assert_eq!(rule.children_named(SCHEMATRON_NS, "assert").count(), 2);
        assert!(rule.first_child_named(SCHEMATRON_NS, "extends").is_none());
    }

    #[test]
    fn test_inclusion_cycle_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        write(
            temp_dir.path(),
            "a.sch",
            r#"<sch:pattern xmlns:sch="http://purl.oclc.org/dsdl/schematron"><sch:include href="b.sch"/></sch:pattern>"#,
        );
        write(
            temp_dir.path(),
            "b.sch",
            r#"<sch:pattern xmlns:sch="http://purl.oclc.org/dsdl/schematron"><sch:include href="a.sch"/></sch:pattern>"#,
        );
        let main = write(
            temp_dir.path(),
            "main.sch",
            &format!(r#"{}<sch:include href="a.sch"/></sch:schema>"#, SCH_OPEN),
        );

        let document = XmlDocument::read_file(&main).unwrap();
        let result = expand_includes(&document, &DefaultEntityResolver::new());
        assert!(matches!(result, Err(EngineError::IncludeCycle(_))));
    }

    #[test]
    fn test_missing_include_target() {
        let temp_dir = TempDir::new().unwrap();
        let main = write(
            temp_dir.path(),
            "main.sch",
            &format!(r#"{}<sch:include href="missing.sch"/></sch:schema>"#, SCH_OPEN),
        );

        let document = XmlDocument::read_file(&main).unwrap();
        match expand_includes(&document, &DefaultEntityResolver::new()) {
            Err(EngineError::Include { href, .. }) => assert_eq!(href, "missing.sch"),
            other => panic!("Expected include error, got {:?}", other),
        }
    }
}
