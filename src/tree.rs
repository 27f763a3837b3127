//! Owned XML Tree
//!
//! Rule documents, intermediate stage outputs, validator documents and SVRL reports are all
//! handled as owned, mutable element trees. Parsing goes through `roxmltree` (DTDs allowed),
//! serialization through `quick_xml::Writer`.

use std::path::{Path, PathBuf};

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::TreeError;

/// The namespace bound to the reserved `xml` prefix
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Namespace-aware element or attribute name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub namespace: Option<String>,
    pub prefix: Option<String>,
    pub local: String,
}

impl QualifiedName {
    /// A name in no namespace
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            namespace: None,
            prefix: None,
            local: local.into(),
        }
    }

    /// A name in `namespace`, written with `prefix` when one is given
    pub fn namespaced(namespace: &str, prefix: Option<&str>, local: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            prefix: prefix.map(str::to_string),
            local: local.to_string(),
        }
    }

    /// Check namespace and local part, ignoring the prefix
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.local == local
    }

    fn lexical(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.local),
            None => self.local.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub name: QualifiedName,
    pub value: String,
}

/// Child content of an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: QualifiedName,
    pub attributes: Vec<XmlAttribute>,
    /// Namespace declarations made on this element (`None` prefix is the default namespace)
    pub namespaces: Vec<(Option<String>, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: QualifiedName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Value of the un-namespaced attribute `local`
    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.namespace.is_none() && a.name.local == local)
            .map(|a| a.value.as_str())
    }

    /// Value of the attribute `local` in `namespace`
    pub fn attribute_ns(&self, namespace: &str, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.is(namespace, local))
            .map(|a| a.value.as_str())
    }

    /// Set (or replace) an un-namespaced attribute
    pub fn set_attribute(&mut self, local: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|a| a.name.namespace.is_none() && a.name.local == local)
        {
            Some(existing) => existing.value = value,
            None => self.attributes.push(XmlAttribute {
                name: QualifiedName::local(local),
                value,
            }),
        }
    }

    pub fn with_attribute(mut self, local: &str, value: impl Into<String>) -> Self {
        self.set_attribute(local, value);
        self
    }

    pub fn remove_attribute(&mut self, local: &str) -> Option<String> {
        let index = self
            .attributes
            .iter()
            .position(|a| a.name.namespace.is_none() && a.name.local == local)?;
        Some(self.attributes.remove(index).value)
    }

    pub fn push_element(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.children.push(XmlNode::Text(text.into()));
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut XmlElement> {
        self.children.iter_mut().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.child_elements()
            .filter(move |child| child.name.is(namespace, local))
    }

    pub fn first_child_named(&self, namespace: &str, local: &str) -> Option<&XmlElement> {
        self.child_elements()
            .find(|child| child.name.is(namespace, local))
    }

    /// Concatenated text of all descendant text nodes
    pub fn text_content(&self) -> String {
        let mut text = String::new();
        collect_text(self, &mut text);
        text
    }

    /// Depth-first search for the element carrying `id` (or `xml:id`)
    pub fn find_by_id(&self, id: &str) -> Option<&XmlElement> {
        if self.attribute("id") == Some(id) || self.attribute_ns(XML_NAMESPACE, "id") == Some(id)
        {
            return Some(self);
        }
        self.child_elements().find_map(|child| child.find_by_id(id))
    }
}

fn collect_text(element: &XmlElement, out: &mut String) {
    for child in &element.children {
        match child {
            XmlNode::Text(text) => out.push_str(text),
            XmlNode::Element(inner) => collect_text(inner, out),
            XmlNode::Comment(_) => {}
        }
    }
}

/// A parsed XML document together with the location it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub root: XmlElement,
    pub location: Option<PathBuf>,
}

impl XmlDocument {
    pub fn new(root: XmlElement) -> Self {
        Self {
            root,
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Directory that relative references inside this document resolve against
    pub fn base_directory(&self) -> Option<&Path> {
        self.location.as_deref().and_then(Path::parent)
    }

    /// File name of the document location, or a placeholder for in-memory documents
    pub fn display_name(&self) -> String {
        self.location
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<in-memory>".to_string())
    }

    pub fn parse_str(text: &str) -> Result<Self, TreeError> {
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let document = roxmltree::Document::parse_with_options(text, options)
            .map_err(|e| TreeError::Parse(e.to_string()))?;
        let root = convert_element(document.root_element(), None);
        Ok(Self::new(root))
    }

    pub fn read_file(path: &Path) -> Result<Self, TreeError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TreeError::Io(format!("{}: {}", path.display(), e)))?;
        Ok(Self::parse_str(&text)?.with_location(path))
    }

    pub fn to_xml_string(&self, indent: bool) -> Result<String, TreeError> {
        let mut writer = if indent {
            Writer::new_with_indent(Vec::new(), b' ', 2)
        } else {
            Writer::new(Vec::new())
        };

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| TreeError::Write(e.to_string()))?;

        let mut scopes: Vec<(Option<String>, String)> = Vec::new();
        write_element(&mut writer, &self.root, &mut scopes, indent)?;

        let mut text = String::from_utf8(writer.into_inner())
            .map_err(|e| TreeError::Write(e.to_string()))?;
        text.push('\n');
        Ok(text)
    }

    pub fn write_file(&self, path: &Path, indent: bool) -> Result<(), TreeError> {
        let text = self.to_xml_string(indent)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| TreeError::Io(format!("{}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, text).map_err(|e| TreeError::Io(format!("{}: {}", path.display(), e)))
    }
}

fn convert_element(node: roxmltree::Node<'_, '_>, parent: Option<roxmltree::Node<'_, '_>>) -> XmlElement {
    let tag = node.tag_name();
    let name = QualifiedName {
        namespace: tag.namespace().map(str::to_string),
        prefix: tag
            .namespace()
            .and_then(|ns| node.lookup_prefix(ns))
            .filter(|p| !p.is_empty())
            .map(str::to_string),
        local: tag.name().to_string(),
    };

    let namespaces = node
        .namespaces()
        .filter(|ns| ns.uri() != XML_NAMESPACE)
        .filter(|ns| {
            parent.is_none_or(|p| {
                !p.namespaces()
                    .any(|inherited| inherited.name() == ns.name() && inherited.uri() == ns.uri())
            })
        })
        .map(|ns| (ns.name().map(str::to_string), ns.uri().to_string()))
        .collect();

    let attributes = node
        .attributes()
        .map(|attr| {
            let prefix = match attr.namespace() {
                Some(XML_NAMESPACE) => Some("xml".to_string()),
                Some(ns) => node
                    .lookup_prefix(ns)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string),
                None => None,
            };
            XmlAttribute {
                name: QualifiedName {
                    namespace: attr.namespace().map(str::to_string),
                    prefix,
                    local: attr.name().to_string(),
                },
                value: attr.value().to_string(),
            }
        })
        .collect();

    let children = node
        .children()
        .filter_map(|child| {
            if child.is_element() {
                Some(XmlNode::Element(convert_element(child, Some(node))))
            } else if child.is_text() {
                child.text().map(|t| XmlNode::Text(t.to_string()))
            } else if child.is_comment() {
                child.text().map(|t| XmlNode::Comment(t.to_string()))
            } else {
                None
            }
        })
        .collect();

    XmlElement {
        name,
        attributes,
        namespaces,
        children,
    }
}

fn bound_namespace<'a>(scopes: &'a [(Option<String>, String)], prefix: Option<&str>) -> Option<&'a str> {
    scopes
        .iter()
        .rev()
        .find(|(p, _)| p.as_deref() == prefix)
        .map(|(_, uri)| uri.as_str())
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    element: &XmlElement,
    scopes: &mut Vec<(Option<String>, String)>,
    indent: bool,
) -> Result<(), TreeError> {
    let scope_mark = scopes.len();
    let mut declarations: Vec<(Option<String>, String)> = Vec::new();

    let mut declare = |prefix: Option<String>, uri: String, scopes: &mut Vec<(Option<String>, String)>| {
        if bound_namespace(scopes, prefix.as_deref()) != Some(uri.as_str()) {
            scopes.push((prefix.clone(), uri.clone()));
            declarations.push((prefix, uri));
        }
    };

    for (prefix, uri) in &element.namespaces {
        declare(prefix.clone(), uri.clone(), scopes);
    }

    match (&element.name.namespace, &element.name.prefix) {
        (Some(uri), prefix) => declare(prefix.clone(), uri.clone(), scopes),
        (None, _) => {
            if bound_namespace(scopes, None).is_some_and(|uri| !uri.is_empty()) {
                declare(None, String::new(), scopes);
            }
        }
    }

    let mut generated = 0usize;
    let mut attributes: Vec<(String, String)> = Vec::with_capacity(element.attributes.len());
    for attr in &element.attributes {
        let key = match &attr.name.namespace {
            None => attr.name.local.clone(),
            Some(uri) if uri == XML_NAMESPACE => format!("xml:{}", attr.name.local),
            Some(uri) => {
                let prefix = match &attr.name.prefix {
                    Some(prefix) => prefix.clone(),
                    None => {
                        generated += 1;
                        format!("ns{}", generated)
                    }
                };
                declare(Some(prefix.clone()), uri.clone(), scopes);
                format!("{}:{}", prefix, attr.name.local)
            }
        };
        attributes.push((key, attr.value.clone()));
    }

    let qname = element.name.lexical();
    let mut start = BytesStart::new(qname.as_str());
    for (prefix, uri) in &declarations {
        let key = match prefix {
            Some(prefix) => format!("xmlns:{}", prefix),
            None => "xmlns".to_string(),
        };
        start.push_attribute((key.as_str(), uri.as_str()));
    }
    for (key, value) in &attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    let children: Vec<&XmlNode> = element
        .children
        .iter()
        .filter(|child| !(indent && matches!(child, XmlNode::Text(t) if t.trim().is_empty())))
        .collect();

    if children.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .map_err(|e| TreeError::Write(e.to_string()))?;
    } else {
        writer
            .write_event(Event::Start(start))
            .map_err(|e| TreeError::Write(e.to_string()))?;
        for child in children {
            match child {
                XmlNode::Element(inner) => write_element(writer, inner, scopes, indent)?,
                XmlNode::Text(text) => writer
                    .write_event(Event::Text(BytesText::new(text)))
                    .map_err(|e| TreeError::Write(e.to_string()))?,
                XmlNode::Comment(text) => writer
                    .write_event(Event::Comment(BytesText::from_escaped(text.as_str())))
                    .map_err(|e| TreeError::Write(e.to_string()))?,
            }
        }
        writer
            .write_event(Event::End(BytesEnd::new(qname.as_str())))
            .map_err(|e| TreeError::Write(e.to_string()))?;
    }

    scopes.truncate(scope_mark);
    Ok(())
}
