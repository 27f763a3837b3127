//! Input Documents
//!
//! Input files are parsed with `roxmltree` so that DTD-declared entities expand. An external
//! DTD subset named in the DOCTYPE is located through the entity resolver and inlined ahead of
//! parsing. The expanded tree is then loaded into `sxd-document` for XPath evaluation.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use sxd_document::Package;
use sxd_document::dom::Document;

use crate::error::EngineError;
use crate::resolver::EntityResolver;
use crate::tree::XmlDocument;

fn doctype_regex() -> &'static Regex {
    static DOCTYPE_REGEX: OnceLock<Regex> = OnceLock::new();
    DOCTYPE_REGEX.get_or_init(|| {
        Regex::new(
            r#"(?s)<!DOCTYPE\s+(?P<root>[^\s\[>]+)\s+(?:SYSTEM\s+(?P<system>"[^"]*"|'[^']*')|PUBLIC\s+(?:"[^"]*"|'[^']*')\s+(?P<public_system>"[^"]*"|'[^']*'))\s*(?:\[(?P<subset>.*?)\]\s*)?>"#,
        )
        .expect("Failed to compile DOCTYPE regex")
    })
}

fn text_declaration_regex() -> &'static Regex {
    static TEXT_DECL_REGEX: OnceLock<Regex> = OnceLock::new();
    TEXT_DECL_REGEX.get_or_init(|| {
        Regex::new(r"^\s*<\?xml[^?]*\?>").expect("Failed to compile text declaration regex")
    })
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix(['"', '\''])
        .and_then(|v| v.strip_suffix(['"', '\'']))
        .unwrap_or(value)
}

/// Replace an external DTD reference with an internal subset holding its declarations
pub fn inline_external_dtd(
    text: &str,
    base: Option<&Path>,
    resolver: &dyn EntityResolver,
) -> Result<String, EngineError> {
    let Some(caps) = doctype_regex().captures(text) else {
        return Ok(text.to_string());
    };
    let Some(system_id) = caps
        .name("system")
        .or_else(|| caps.name("public_system"))
        .map(|m| unquote(m.as_str()).to_string())
    else {
        return Ok(text.to_string());
    };

    let entity = resolver
        .resolve(&system_id, base)
        .map_err(|e| EngineError::InputDocument(format!("Failed to load DTD: {}", e)))?;
    let external = text_declaration_regex().replace(&entity.content, "");

    let inlined = doctype_regex().replace(text, |caps: &Captures<'_>| {
        let internal = caps.name("subset").map_or("", |m| m.as_str());
        format!("<!DOCTYPE {} [\n{}\n{}\n]>", &caps["root"], internal, external)
    });
    Ok(inlined.into_owned())
}

/// A parsed input document ready for validator runs
pub struct InputDocument {
    package: Package,
    location: PathBuf,
}

impl InputDocument {
    /// Parse `text`, read from `location`
    pub fn parse(
        text: &str,
        location: &Path,
        resolver: &dyn EntityResolver,
    ) -> Result<Self, EngineError> {
        let inlined = inline_external_dtd(text, location.parent(), resolver)?;
        let tree = XmlDocument::parse_str(&inlined)
            .map_err(|e| EngineError::InputDocument(e.to_string()))?;
        let normalized = tree
            .to_xml_string(false)
            .map_err(|e| EngineError::InputDocument(e.to_string()))?;
        let package = sxd_document::parser::parse(&normalized)
            .map_err(|e| EngineError::InputDocument(format!("{:?}", e)))?;

        Ok(Self {
            package,
            location: location.to_path_buf(),
        })
    }

    pub fn document(&self) -> Document<'_> {
        self.package.as_document()
    }

    pub fn location(&self) -> &Path {
        &self.location
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::DefaultEntityResolver;
    use tempfile::TempDir;

    #[test]
    fn test_document_without_doctype_is_untouched() {
        let text = "<root><a/></root>";
        let resolver = DefaultEntityResolver::new();
        assert_eq!(inline_external_dtd(text, None, &resolver).unwrap(), text);
    }

    #[test]
    fn test_external_dtd_entities_expand() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("doc.dtd"),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!ENTITY product \"Widget\">",
        )
        .unwrap();
        let path = temp_dir.path().join("doc.xml");
        let text = r#"<?xml version="1.0"?>
<!DOCTYPE catalog SYSTEM "doc.dtd">
<catalog><item>&product;</item></catalog>"#;

        let input = InputDocument::parse(text, &path, &DefaultEntityResolver::new()).unwrap();
        let document = input.document();
        let value = sxd_xpath::evaluate_xpath(&document, "string(/catalog/item)").unwrap();
        assert_eq!(value.string(), "Widget");
        assert_eq!(input.location(), path.as_path());
    }

    #[test]
    fn test_internal_subset_is_kept() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("doc.dtd"), "<!ENTITY b \"external\">").unwrap();
        let text = r#"<!DOCTYPE r PUBLIC "-//X//DTD//EN" "doc.dtd" [<!ENTITY a "internal">]><r>&a;/&b;</r>"#;

        let inlined =
            inline_external_dtd(text, Some(temp_dir.path()), &DefaultEntityResolver::new())
                .unwrap();
        assert!(inlined.contains("internal"));
        assert!(inlined.contains("external"));
        assert!(!inlined.contains("doc.dtd"));
    }

    #[test]
    fn test_missing_dtd_is_an_input_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doc.xml");
        let result = InputDocument::parse(
            r#"<!DOCTYPE r SYSTEM "missing.dtd"><r/>"#,
            &path,
            &DefaultEntityResolver::new(),
        );
        assert!(matches!(result, Err(EngineError::InputDocument(_))));
    }

    #[test]
    fn test_malformed_input() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doc.xml");
        let result = InputDocument::parse("<r><unclosed></r>", &path, &DefaultEntityResolver::new());
        assert!(matches!(result, Err(EngineError::InputDocument(_))));
    }
}
