//! Step 2: abstract pattern and abstract rule expansion
//!
//! `sch:pattern[@is-a]` instances are replaced by a copy of the named abstract pattern with
//! every `$param` reference in attribute values substituted; `sch:extends[@rule]` is replaced
//! by the children of the named abstract rule. Abstract definitions do not appear in the output.

use std::collections::HashMap;

use crate::engine::{StageProgram, TransformContext};
use crate::error::EngineError;
use crate::schema::SCHEMATRON_NS;
use crate::tree::{XmlAttribute, XmlDocument, XmlElement, XmlNode};

/// Stage program for abstract expansion
pub struct AbstractExpandProgram;

impl StageProgram for AbstractExpandProgram {
    fn apply(
        &self,
        input: &XmlDocument,
        _context: &TransformContext<'_>,
    ) -> Result<XmlDocument, EngineError> {
        expand_abstracts(input)
    }
}

fn is_abstract(element: &XmlElement) -> bool {
    element.attribute("abstract") == Some("true")
}

fn is_pattern(node: &XmlNode) -> Option<&XmlElement> {
    match node {
        XmlNode::Element(element) if element.name.is(SCHEMATRON_NS, "pattern") => Some(element),
        _ => None,
    }
}

fn shallow_copy(element: &XmlElement) -> XmlElement {
    XmlElement {
        name: element.name.clone(),
        attributes: element.attributes.clone(),
        namespaces: element.namespaces.clone(),
        children: Vec::new(),
    }
}

/// Expand abstract patterns and abstract rules of an included-expanded schema
pub fn expand_abstracts(document: &XmlDocument) -> Result<XmlDocument, EngineError> {
    let root = &document.root;

    let abstract_patterns: HashMap<&str, &XmlElement> = root
        .children_named(SCHEMATRON_NS, "pattern")
        .filter(|p| is_abstract(p))
        .filter_map(|p| p.attribute("id").map(|id| (id, p)))
        .collect();

    let abstract_rules: HashMap<&str, &XmlElement> = root
        .children_named(SCHEMATRON_NS, "pattern")
        .flat_map(|p| p.children_named(SCHEMATRON_NS, "rule"))
        .filter(|r| is_abstract(r))
        .filter_map(|r| r.attribute("id").map(|id| (id, r)))
        .collect();

    let mut expanded = shallow_copy(root);
    for child in &root.children {
        match is_pattern(child) {
            Some(pattern) if is_abstract(pattern) => {}
            Some(pattern) if pattern.attribute("is-a").is_some() => {
                let instance = instantiate(pattern, &abstract_patterns)?;
                expanded.push_element(expand_rules(&instance, &abstract_rules)?);
            }
            Some(pattern) => expanded.push_element(expand_rules(pattern, &abstract_rules)?),
            None => expanded.children.push(child.clone()),
        }
    }

    Ok(XmlDocument {
        root: expanded,
        location: document.location.clone(),
    })
}

fn instantiate(
    instance: &XmlElement,
    abstract_patterns: &HashMap<&str, &XmlElement>,
) -> Result<XmlElement, EngineError> {
    let is_a = instance.attribute("is-a").unwrap_or_default();
    let template = abstract_patterns
        .get(is_a)
        .ok_or_else(|| EngineError::UnknownAbstractPattern(is_a.to_string()))?;

    let mut parameters = Vec::new();
    for param in instance.children_named(SCHEMATRON_NS, "param") {
        let name = param.attribute("name").ok_or_else(|| {
            EngineError::MalformedInput(format!("<param> without a name in instance of '{}'", is_a))
        })?;
        parameters.push((format!("${}", name), param.attribute("value").unwrap_or("").to_string()));
    }
    parameters.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut pattern = shallow_copy(instance);
    pattern
        .attributes
        .retain(|a| !(a.name.namespace.is_none() && a.name.local == "is-a"));

    for child in &instance.children {
        match child {
            XmlNode::Element(e) if e.name.is(SCHEMATRON_NS, "param") => {}
            other => pattern.children.push(other.clone()),
        }
    }
    for child in &template.children {
        match child {
            XmlNode::Element(e) => pattern.push_element(substitute_element(e, &parameters)),
            other => pattern.children.push(other.clone()),
        }
    }

    log::debug!(
        "Instantiated abstract pattern '{}' as '{}'",
        is_a,
        instance.attribute("id").unwrap_or("(anonymous)")
    );
    Ok(pattern)
}

fn substitute(value: &str, parameters: &[(String, String)]) -> String {
    parameters
        .iter()
        .fold(value.to_string(), |text, (reference, replacement)| {
            text.replace(reference.as_str(), replacement)
        })
}

fn substitute_element(element: &XmlElement, parameters: &[(String, String)]) -> XmlElement {
    XmlElement {
        name: element.name.clone(),
        attributes: element
            .attributes
            .iter()
            .map(|a| XmlAttribute {
                name: a.name.clone(),
                value: substitute(&a.value, parameters),
            })
            .collect(),
        namespaces: element.namespaces.clone(),
        children: element
            .children
            .iter()
            .map(|child| match child {
                XmlNode::Element(inner) => XmlNode::Element(substitute_element(inner, parameters)),
                other => other.clone(),
            })
            .collect(),
    }
}

fn expand_rules(
    pattern: &XmlElement,
    abstract_rules: &HashMap<&str, &XmlElement>,
) -> Result<XmlElement, EngineError> {
    let mut expanded = shallow_copy(pattern);
    for child in &pattern.children {
        match child {
            XmlNode::Element(rule) if rule.name.is(SCHEMATRON_NS, "rule") => {
                if !is_abstract(rule) {
                    let mut chain = Vec::new();
                    expanded.push_element(expand_rule(rule, abstract_rules, &mut chain)?);
                }
            }
            other => expanded.children.push(other.clone()),
        }
    }
    Ok(expanded)
}

fn expand_rule(
    rule: &XmlElement,
    abstract_rules: &HashMap<&str, &XmlElement>,
    chain: &mut Vec<String>,
) -> Result<XmlElement, EngineError> {
    let mut expanded = shallow_copy(rule);
    for child in &rule.children {
        match child {
            XmlNode::Element(extends) if extends.name.is(SCHEMATRON_NS, "extends") => {
                let Some(id) = extends.attribute("rule") else {
                    expanded.children.push(child.clone());
                    continue;
                };
                let target = abstract_rules
                    .get(id)
                    .ok_or_else(|| EngineError::UnknownAbstractRule(id.to_string()))?;
                if chain.iter().any(|seen| seen == id) {
                    return Err(EngineError::MalformedInput(format!(
                        "abstract rule '{}' extends itself",
                        id
                    )));
                }
                chain.push(id.to_string());
                let inherited = expand_rule(target, abstract_rules, chain)?;
                chain.pop();
                expanded.children.extend(inherited.children);
            }
            other => expanded.children.push(other.clone()),
        }
    }
    Ok(expanded)
}
