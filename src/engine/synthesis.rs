//! Step 3: validator synthesis
//!
//! Binds a fully expanded schema (phase selection, namespace bindings, variables and inlined
//! diagnostics) and emits the validator document: a self-contained description of every active
//! pattern that the final compile step turns into an [`ExecutableValidator`].
//!
//! [`ExecutableValidator`]: crate::executable::ExecutableValidator

use std::collections::{HashMap, HashSet};

use crate::engine::{PHASE_PARAMETER, QueryBinding, StageProgram, TransformContext};
use crate::error::EngineError;
use crate::schema::SCHEMATRON_NS;
use crate::tree::{QualifiedName, XmlDocument, XmlElement, XmlNode};

/// Namespace of validator documents
pub const VALIDATOR_NS: &str = "urn:validate-sch:validator";

const VALIDATOR_PREFIX: &str = "v";

/// Phase name that activates every pattern
pub const ALL_PHASES: &str = "#ALL";

/// Phase name that selects the schema's `defaultPhase`
pub const DEFAULT_PHASE: &str = "#DEFAULT";

/// A named XPath binding (`sch:let` or a schema parameter)
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Assert,
    Report,
}

impl CheckKind {
    fn local_name(self) -> &'static str {
        match self {
            CheckKind::Assert => "assert",
            CheckKind::Report => "report",
        }
    }
}

/// A piece of an assertion or diagnostic message
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePart {
    Text(String),
    Name { path: Option<String> },
    ValueOf { select: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundDiagnostic {
    pub id: String,
    pub message: Vec<MessagePart>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundCheck {
    pub kind: CheckKind,
    pub id: Option<String>,
    pub test: String,
    pub role: Option<String>,
    pub flag: Option<String>,
    pub message: Vec<MessagePart>,
    pub diagnostics: Vec<BoundDiagnostic>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundRule {
    pub id: Option<String>,
    pub context: String,
    pub role: Option<String>,
    pub flag: Option<String>,
    pub lets: Vec<Binding>,
    pub checks: Vec<BoundCheck>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundPattern {
    pub id: Option<String>,
    pub name: Option<String>,
    pub lets: Vec<Binding>,
    pub rules: Vec<BoundRule>,
}

/// A schema with its phase resolved and all references bound
#[derive(Debug, Clone, PartialEq)]
pub struct BoundSchema {
    pub title: Option<String>,
    pub schema_version: Option<String>,
    pub phase: String,
    pub query_binding: String,
    pub namespaces: Vec<(String, String)>,
    /// Schema-level lets; callers may override them by name
    pub parameters: Vec<Binding>,
    /// Lets of the active phase
    pub lets: Vec<Binding>,
    pub patterns: Vec<BoundPattern>,
}

/// Stage program for validator synthesis, specialised to one query binding
pub struct SynthesisProgram {
    binding: QueryBinding,
}

impl SynthesisProgram {
    pub fn new(binding: QueryBinding) -> Self {
        Self { binding }
    }
}

impl StageProgram for SynthesisProgram {
    fn apply(
        &self,
        input: &XmlDocument,
        context: &TransformContext<'_>,
    ) -> Result<XmlDocument, EngineError> {
        let phase = context.parameters.get(PHASE_PARAMETER).map(String::as_str);
        let mut schema = bind_schema(input, phase)?;
        schema.query_binding = self.binding.as_str().to_string();
        Ok(to_document(&schema))
    }
}

fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn optional(element: &XmlElement, name: &str) -> Option<String> {
    element.attribute(name).map(str::to_string)
}

fn required(element: &XmlElement, name: &str) -> Result<String, EngineError> {
    element
        .attribute(name)
        .map(str::to_string)
        .ok_or_else(|| {
            EngineError::MalformedInput(format!(
                "<{}> is missing the '{}' attribute",
                element.name.local, name
            ))
        })
}

fn bind_lets(element: &XmlElement) -> Result<Vec<Binding>, EngineError> {
    element
        .children_named(SCHEMATRON_NS, "let")
        .map(|l| {
            Ok(Binding {
                name: required(l, "name")?,
                expression: required(l, "value")?,
            })
        })
        .collect()
}

/// Bind an expanded schema for `phase` (`None` or `#DEFAULT` selects the default phase)
pub fn bind_schema(document: &XmlDocument, phase: Option<&str>) -> Result<BoundSchema, EngineError> {
    let root = &document.root;
    if !root.name.is(SCHEMATRON_NS, "schema") {
        return Err(EngineError::MalformedInput(format!(
            "expected a Schematron <schema> root, found <{}>",
            root.name.local
        )));
    }

    let query_binding = QueryBinding::from_attribute(root.attribute("queryBinding"))?;

    let requested = phase.map(str::trim).filter(|p| !p.is_empty());
    let phase_name = match requested {
        None | Some(DEFAULT_PHASE) => root.attribute("defaultPhase").unwrap_or(ALL_PHASES),
        Some(name) => name,
    };

    let (active, phase_lets) = if phase_name == ALL_PHASES {
        (None, Vec::new())
    } else {
        let phase_element = root
            .children_named(SCHEMATRON_NS, "phase")
            .find(|p| p.attribute("id") == Some(phase_name))
            .ok_or_else(|| EngineError::UnknownPhase(phase_name.to_string()))?;
        let active: HashSet<&str> = phase_element
            .children_named(SCHEMATRON_NS, "active")
            .filter_map(|a| a.attribute("pattern"))
            .collect();
        (Some(active), bind_lets(phase_element)?)
    };

    let diagnostics: HashMap<&str, &XmlElement> = root
        .children_named(SCHEMATRON_NS, "diagnostics")
        .flat_map(|d| d.children_named(SCHEMATRON_NS, "diagnostic"))
        .filter_map(|d| d.attribute("id").map(|id| (id, d)))
        .collect();

    let mut namespaces = Vec::new();
    for ns in root.children_named(SCHEMATRON_NS, "ns") {
        namespaces.push((required(ns, "prefix")?, required(ns, "uri")?));
    }

    let mut patterns = Vec::new();
    for pattern in root.children_named(SCHEMATRON_NS, "pattern") {
        if pattern.attribute("abstract") == Some("true") {
            continue;
        }
        if let Some(active) = &active
            && !pattern.attribute("id").is_some_and(|id| active.contains(id))
        {
            continue;
        }
        patterns.push(bind_pattern(pattern, &diagnostics)?);
    }

    Ok(BoundSchema {
        title: root
            .first_child_named(SCHEMATRON_NS, "title")
            .map(|t| normalize_space(&t.text_content())),
        schema_version: optional(root, "schemaVersion"),
        phase: phase_name.to_string(),
        query_binding: query_binding.as_str().to_string(),
        namespaces,
        parameters: bind_lets(root)?,
        lets: phase_lets,
        patterns,
    })
}

fn bind_pattern(
    pattern: &XmlElement,
    diagnostics: &HashMap<&str, &XmlElement>,
) -> Result<BoundPattern, EngineError> {
    let mut rules = Vec::new();
    for rule in pattern.children_named(SCHEMATRON_NS, "rule") {
        if rule.attribute("abstract") == Some("true") {
            continue;
        }
        let mut checks = Vec::new();
        for check in rule.child_elements() {
            let kind = if check.name.is(SCHEMATRON_NS, "assert") {
                CheckKind::Assert
            } else if check.name.is(SCHEMATRON_NS, "report") {
                CheckKind::Report
            } else {
                continue;
            };
            checks.push(bind_check(kind, check, diagnostics)?);
        }
        rules.push(BoundRule {
            id: optional(rule, "id"),
            context: required(rule, "context")?,
            role: optional(rule, "role"),
            flag: optional(rule, "flag"),
            lets: bind_lets(rule)?,
            checks,
        });
    }

    Ok(BoundPattern {
        id: optional(pattern, "id"),
        name: pattern
            .first_child_named(SCHEMATRON_NS, "title")
            .map(|t| normalize_space(&t.text_content())),
        lets: bind_lets(pattern)?,
        rules,
    })
}

fn bind_check(
    kind: CheckKind,
    check: &XmlElement,
    diagnostics: &HashMap<&str, &XmlElement>,
) -> Result<BoundCheck, EngineError> {
    let mut bound_diagnostics = Vec::new();
    for reference in check.attribute("diagnostics").unwrap_or("").split_whitespace() {
        let diagnostic = diagnostics
            .get(reference)
            .ok_or_else(|| EngineError::UnknownDiagnostic(reference.to_string()))?;
        bound_diagnostics.push(BoundDiagnostic {
            id: reference.to_string(),
            message: message_parts(diagnostic),
        });
    }

    Ok(BoundCheck {
        kind,
        id: optional(check, "id"),
        test: required(check, "test")?,
        role: optional(check, "role"),
        flag: optional(check, "flag"),
        message: message_parts(check),
        diagnostics: bound_diagnostics,
    })
}

fn message_parts(element: &XmlElement) -> Vec<MessagePart> {
    let mut parts = Vec::new();
    collect_message_parts(element, &mut parts);
    parts
}

fn collect_message_parts(element: &XmlElement, parts: &mut Vec<MessagePart>) {
    for child in &element.children {
        match child {
            XmlNode::Text(text) => parts.push(MessagePart::Text(text.clone())),
            XmlNode::Element(inner) if inner.name.is(SCHEMATRON_NS, "name") => {
                parts.push(MessagePart::Name {
                    path: optional(inner, "path"),
                });
            }
            XmlNode::Element(inner) if inner.name.is(SCHEMATRON_NS, "value-of") => {
                if let Some(select) = inner.attribute("select") {
                    parts.push(MessagePart::ValueOf {
                        select: select.to_string(),
                    });
                }
            }
            XmlNode::Element(inner) => collect_message_parts(inner, parts),
            XmlNode::Comment(_) => {}
        }
    }
}

fn v(local: &str) -> QualifiedName {
    QualifiedName::namespaced(VALIDATOR_NS, Some(VALIDATOR_PREFIX), local)
}

fn set_optional(element: &mut XmlElement, name: &str, value: &Option<String>) {
    if let Some(value) = value {
        element.set_attribute(name, value.clone());
    }
}

fn binding_element(local: &str, binding: &Binding) -> XmlElement {
    XmlElement::new(v(local))
        .with_attribute("name", binding.name.clone())
        .with_attribute("select", binding.expression.clone())
}

fn message_elements(parent: &mut XmlElement, parts: &[MessagePart]) {
    for part in parts {
        let element = match part {
            MessagePart::Text(text) => {
                let mut element = XmlElement::new(v("text"));
                element.push_text(text.clone());
                element
            }
            MessagePart::Name { path } => {
                let mut element = XmlElement::new(v("name"));
                set_optional(&mut element, "path", path);
                element
            }
            MessagePart::ValueOf { select } => {
                XmlElement::new(v("value-of")).with_attribute("select", select.clone())
            }
        };
        parent.push_element(element);
    }
}

/// Emit the validator document for a bound schema
pub fn to_document(schema: &BoundSchema) -> XmlDocument {
    let mut root = XmlElement::new(v("validator"));
    root.namespaces
        .push((Some(VALIDATOR_PREFIX.to_string()), VALIDATOR_NS.to_string()));
    root.set_attribute("phase", schema.phase.clone());
    root.set_attribute("queryBinding", schema.query_binding.clone());
    set_optional(&mut root, "title", &schema.title);
    set_optional(&mut root, "schemaVersion", &schema.schema_version);

    for (prefix, uri) in &schema.namespaces {
        root.push_element(
            XmlElement::new(v("ns"))
                .with_attribute("prefix", prefix.clone())
                .with_attribute("uri", uri.clone()),
        );
    }
    for parameter in &schema.parameters {
        root.push_element(binding_element("param", parameter));
    }
    for binding in &schema.lets {
        root.push_element(binding_element("let", binding));
    }

    for pattern in &schema.patterns {
        let mut pattern_element = XmlElement::new(v("pattern"));
        set_optional(&mut pattern_element, "id", &pattern.id);
        set_optional(&mut pattern_element, "name", &pattern.name);
        for binding in &pattern.lets {
            pattern_element.push_element(binding_element("let", binding));
        }

        for rule in &pattern.rules {
            let mut rule_element =
                XmlElement::new(v("rule")).with_attribute("context", rule.context.clone());
            set_optional(&mut rule_element, "id", &rule.id);
            set_optional(&mut rule_element, "role", &rule.role);
            set_optional(&mut rule_element, "flag", &rule.flag);
            for binding in &rule.lets {
                rule_element.push_element(binding_element("let", binding));
            }

            for check in &rule.checks {
                let mut check_element = XmlElement::new(v(check.kind.local_name()))
                    .with_attribute("test", check.test.clone());
                set_optional(&mut check_element, "id", &check.id);
                set_optional(&mut check_element, "role", &check.role);
                set_optional(&mut check_element, "flag", &check.flag);
                message_elements(&mut check_element, &check.message);
                for diagnostic in &check.diagnostics {
                    let mut diagnostic_element =
                        XmlElement::new(v("diagnostic")).with_attribute("id", diagnostic.id.clone());
                    message_elements(&mut diagnostic_element, &diagnostic.message);
                    check_element.push_element(diagnostic_element);
                }
                rule_element.push_element(check_element);
            }
            pattern_element.push_element(rule_element);
        }
        root.push_element(pattern_element);
    }

    XmlDocument::new(root)
}

fn validator_bindings(element: &XmlElement, local: &str) -> Result<Vec<Binding>, EngineError> {
    element
        .children_named(VALIDATOR_NS, local)
        .map(|b| {
            Ok(Binding {
                name: required(b, "name")?,
                expression: required(b, "select")?,
            })
        })
        .collect()
}

fn read_message(element: &XmlElement) -> Vec<MessagePart> {
    element
        .child_elements()
        .filter_map(|part| {
            if part.name.is(VALIDATOR_NS, "text") {
                Some(MessagePart::Text(part.text_content()))
            } else if part.name.is(VALIDATOR_NS, "name") {
                Some(MessagePart::Name {
                    path: optional(part, "path"),
                })
            } else if part.name.is(VALIDATOR_NS, "value-of") {
                optional(part, "select").map(|select| MessagePart::ValueOf { select })
            } else {
                None
            }
        })
        .collect()
}

/// Read a validator document back into a bound schema
pub fn from_document(document: &XmlDocument) -> Result<BoundSchema, EngineError> {
    let root = &document.root;
    if !root.name.is(VALIDATOR_NS, "validator") {
        return Err(EngineError::MalformedInput(format!(
            "expected a validator document, found <{}>",
            root.name.local
        )));
    }

    let mut namespaces = Vec::new();
    for ns in root.children_named(VALIDATOR_NS, "ns") {
        namespaces.push((required(ns, "prefix")?, required(ns, "uri")?));
    }

    let mut patterns = Vec::new();
    for pattern in root.children_named(VALIDATOR_NS, "pattern") {
        let mut rules = Vec::new();
        for rule in pattern.children_named(VALIDATOR_NS, "rule") {
            let mut checks = Vec::new();
            for check in rule.child_elements() {
                let kind = if check.name.is(VALIDATOR_NS, "assert") {
                    CheckKind::Assert
                } else if check.name.is(VALIDATOR_NS, "report") {
                    CheckKind::Report
                } else {
                    continue;
                };
                let diagnostics = check
                    .children_named(VALIDATOR_NS, "diagnostic")
                    .map(|d| {
                        Ok(BoundDiagnostic {
                            id: required(d, "id")?,
                            message: read_message(d),
                        })
                    })
                    .collect::<Result<Vec<_>, EngineError>>()?;
                checks.push(BoundCheck {
                    kind,
                    id: optional(check, "id"),
                    test: required(check, "test")?,
                    role: optional(check, "role"),
                    flag: optional(check, "flag"),
                    message: read_message(check),
                    diagnostics,
                });
            }
            rules.push(BoundRule {
                id: optional(rule, "id"),
                context: required(rule, "context")?,
                role: optional(rule, "role"),
                flag: optional(rule, "flag"),
                lets: validator_bindings(rule, "let")?,
                checks,
            });
        }
        patterns.push(BoundPattern {
            id: optional(pattern, "id"),
            name: optional(pattern, "name"),
            lets: validator_bindings(pattern, "let")?,
            rules,
        });
    }

    Ok(BoundSchema {
        title: optional(root, "title"),
        schema_version: optional(root, "schemaVersion"),
        phase: optional(root, "phase").unwrap_or_else(|| ALL_PHASES.to_string()),
        query_binding: optional(root, "queryBinding").unwrap_or_else(|| "xslt".to_string()),
        namespaces,
        parameters: validator_bindings(root, "param")?,
        lets: validator_bindings(root, "let")?,
        patterns,
    })
}
