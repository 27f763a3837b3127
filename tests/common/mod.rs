#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Orders must carry an id on every item; legacy items only produce a warning.
pub const ORDER_RULES: &str = r#"<sch:schema xmlns:sch="http://purl.oclc.org/dsdl/schematron">
  <sch:title>Order rules</sch:title>
  <sch:pattern abstract="true" id="required-attribute">
    <sch:rule context="$element">
      <sch:assert test="$attribute" id="missing-attribute">Required attribute is missing</sch:assert>
    </sch:rule>
  </sch:pattern>
  <sch:pattern is-a="required-attribute" id="item-ids">
    <sch:param name="element" value="item"/>
    <sch:param name="attribute" value="@id"/>
  </sch:pattern>
  <sch:pattern id="legacy">
    <sch:rule context="item">
      <sch:report test="@legacy" role="warning">Legacy item</sch:report>
    </sch:rule>
  </sch:pattern>
</sch:schema>"#;

pub const VALID_ORDER: &str = r#"<order><item id="1"/><item id="2"/></order>"#;

pub const LEGACY_ORDER: &str = r#"<order><item id="1" legacy="yes"/></order>"#;

pub const INVALID_ORDER: &str = r#"<order><item/><item id="2"/><item/></order>"#;

/// A temporary directory holding rule documents and inputs
pub struct TestWorkspace {
    pub temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write `content` to `relative`, creating parent directories
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn order_rules(&self) -> PathBuf {
        self.write("rules/orders.sch", ORDER_RULES)
    }

    /// One valid, one legacy and one invalid order below `in/`
    pub fn order_inputs(&self) -> PathBuf {
        self.write("in/good.xml", VALID_ORDER);
        self.write("in/nested/legacy.xml", LEGACY_ORDER);
        self.write("in/bad.xml", INVALID_ORDER);
        self.path().join("in")
    }
}
