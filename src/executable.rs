//! Executable Validator
//!
//! The compiled form of a rule document. An [`ExecutableValidator`] is immutable data and can
//! be shared between threads behind an `Arc`; every [`ExecutableValidator::run`] builds its own
//! evaluation context (compiled XPath objects and variable bindings), so concurrent runs never
//! share mutable state.

use std::collections::{HashMap, HashSet};

use sxd_document::dom;
use sxd_xpath::nodeset::{Node, Nodeset};
use sxd_xpath::{Context, Factory, Value, XPath};

use crate::engine::synthesis::{
    Binding, BoundCheck, BoundRule, BoundSchema, CheckKind, MessagePart,
};
use crate::engine::{CompileOptions, Parameters};
use crate::error::EngineError;
use crate::input::InputDocument;
use crate::svrl::{DiagnosticReference, DiagnosticReport, Finding, FindingKind, ReportEvent, Severity};

/// A compiled rule document, ready to run against input documents
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutableValidator {
    schema: BoundSchema,
    defaults: Parameters,
}

fn compile(factory: &Factory, expression: &str) -> Result<XPath, EngineError> {
    factory
        .build(expression)
        .map_err(|e| EngineError::InvalidExpression {
            expression: expression.to_string(),
            details: e.to_string(),
        })?
        .ok_or_else(|| EngineError::InvalidExpression {
            expression: expression.to_string(),
            details: "empty expression".to_string(),
        })
}

/// Split a pattern on `|` outside predicates, parentheses and string literals
fn split_union(pattern: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (index, c) in pattern.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth = depth.saturating_sub(1),
            (None, '|') if depth == 0 => {
                parts.push(pattern[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(pattern[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Turn an XSLT match pattern into an XPath selecting every matching node
pub fn context_expression(pattern: &str) -> String {
    split_union(pattern)
        .into_iter()
        .map(|part| {
            if part.starts_with('/') {
                part.to_string()
            } else {
                format!("//{}", part)
            }
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

fn rule_expressions(rule: &BoundRule) -> Vec<String> {
    let mut expressions = vec![context_expression(&rule.context)];
    expressions.extend(rule.lets.iter().map(|l| l.expression.clone()));
    for check in &rule.checks {
        expressions.push(check.test.clone());
        let messages = std::iter::once(&check.message)
            .chain(check.diagnostics.iter().map(|d| &d.message));
        for part in messages.flatten() {
            match part {
                MessagePart::ValueOf { select } => expressions.push(select.clone()),
                MessagePart::Name { path: Some(path) } => expressions.push(format!("name({})", path)),
                _ => {}
            }
        }
    }
    expressions
}

impl ExecutableValidator {
    /// Compile a bound schema, checking every XPath expression it contains
    pub fn new(schema: BoundSchema, options: &CompileOptions) -> Result<Self, EngineError> {
        let factory = Factory::new();
        let mut expressions: Vec<String> = schema
            .parameters
            .iter()
            .chain(&schema.lets)
            .map(|b| b.expression.clone())
            .collect();
        for pattern in &schema.patterns {
            expressions.extend(pattern.lets.iter().map(|l| l.expression.clone()));
            for rule in &pattern.rules {
                expressions.extend(rule_expressions(rule));
            }
        }
        for expression in &expressions {
            compile(&factory, expression)?;
        }

        Ok(Self {
            schema,
            defaults: options.parameters.clone(),
        })
    }

    pub fn schema(&self) -> &BoundSchema {
        &self.schema
    }

    pub fn default_parameters(&self) -> &Parameters {
        &self.defaults
    }

    /// Run against one input document. `parameters` override compile-time defaults, which
    /// override the schema's own parameter expressions.
    pub fn run(
        &self,
        input: &InputDocument,
        parameters: &Parameters,
    ) -> Result<DiagnosticReport, EngineError> {
        let document = input.document();
        let root = Node::Root(document.root());
        let mut evaluator = Evaluator::new(&self.schema.namespaces);

        let mut overrides = self.defaults.clone();
        overrides.extend(parameters.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut globals: Vec<(String, Value<'_>)> = Vec::new();
        for parameter in &self.schema.parameters {
            let value = match overrides.remove(&parameter.name) {
                Some(text) => Value::String(text),
                None => evaluator.evaluate(&parameter.expression, root, &globals)?,
            };
            globals.push((parameter.name.clone(), value));
        }
        for (name, text) in overrides {
            globals.push((name, Value::String(text)));
        }
        evaluator.bind(&mut globals, &self.schema.lets, root)?;

        let mut report = DiagnosticReport {
            title: self.schema.title.clone(),
            phase: Some(self.schema.phase.clone()),
            schema_version: self.schema.schema_version.clone(),
            namespaces: self.schema.namespaces.clone(),
            events: Vec::new(),
        };
        let document_uri = input.location().display().to_string();

        for pattern in &self.schema.patterns {
            report.events.push(ReportEvent::ActivePattern {
                id: pattern.id.clone(),
                name: pattern.name.clone(),
                document: Some(document_uri.clone()),
            });

            let mut pattern_scope = globals.clone();
            evaluator.bind(&mut pattern_scope, &pattern.lets, root)?;

            let mut union = Nodeset::new();
            let mut matches: Vec<HashSet<Node<'_>>> = Vec::with_capacity(pattern.rules.len());
            for rule in &pattern.rules {
                let expression = context_expression(&rule.context);
                let nodes = match evaluator.evaluate(&expression, root, &pattern_scope)? {
                    Value::Nodeset(nodes) => nodes.document_order(),
                    _ => {
                        return Err(EngineError::Evaluation {
                            expression,
                            details: "rule context does not select nodes".to_string(),
                        });
                    }
                };
                let mut matched = HashSet::with_capacity(nodes.len());
                for node in nodes {
                    union.add(node);
                    matched.insert(node);
                }
                matches.push(matched);
            }

            // each node fires at most the first rule of the pattern that matches it
            for node in union.document_order() {
                let Some(index) = matches.iter().position(|m| m.contains(&node)) else {
                    continue;
                };
                let rule = &pattern.rules[index];
                report.events.push(ReportEvent::FiredRule {
                    id: rule.id.clone(),
                    context: rule.context.clone(),
                    role: rule.role.clone(),
                    flag: rule.flag.clone(),
                });

                let mut rule_scope = pattern_scope.clone();
                evaluator.bind(&mut rule_scope, &rule.lets, node)?;

                for check in &rule.checks {
                    let holds = evaluator.evaluate(&check.test, node, &rule_scope)?.boolean();
                    let fires = match check.kind {
                        CheckKind::Assert => !holds,
                        CheckKind::Report => holds,
                    };
                    if fires {
                        let finding = evaluator.finding(rule, check, node, &rule_scope)?;
                        report.events.push(ReportEvent::Finding(finding));
                    }
                }
            }
        }

        Ok(report)
    }
}

/// Per-run evaluation state
struct Evaluator<'s> {
    factory: Factory,
    compiled: HashMap<String, XPath>,
    namespaces: &'s [(String, String)],
}

impl<'s> Evaluator<'s> {
    fn new(namespaces: &'s [(String, String)]) -> Self {
        Self {
            factory: Factory::new(),
            compiled: HashMap::new(),
            namespaces,
        }
    }

    fn compiled(&mut self, expression: &str) -> Result<&XPath, EngineError> {
        if !self.compiled.contains_key(expression) {
            let xpath = compile(&self.factory, expression)?;
            self.compiled.insert(expression.to_string(), xpath);
        }
        self.compiled
            .get(expression)
            .ok_or_else(|| EngineError::InvalidExpression {
                expression: expression.to_string(),
                details: "expression cache miss".to_string(),
            })
    }

    fn evaluate<'d>(
        &mut self,
        expression: &str,
        node: Node<'d>,
        bindings: &[(String, Value<'d>)],
    ) -> Result<Value<'d>, EngineError> {
        let mut context = Context::new();
        for (prefix, uri) in self.namespaces {
            context.set_namespace(prefix, uri);
        }
        for (name, value) in bindings {
            context.set_variable(name.as_str(), value.clone());
        }

        self.compiled(expression)?
            .evaluate(&context, node)
            .map_err(|e| EngineError::Evaluation {
                expression: expression.to_string(),
                details: e.to_string(),
            })
    }

    fn bind<'d>(
        &mut self,
        scope: &mut Vec<(String, Value<'d>)>,
        lets: &[Binding],
        node: Node<'d>,
    ) -> Result<(), EngineError> {
        for binding in lets {
            let value = self.evaluate(&binding.expression, node, scope)?;
            scope.push((binding.name.clone(), value));
        }
        Ok(())
    }

    fn render<'d>(
        &mut self,
        parts: &[MessagePart],
        node: Node<'d>,
        scope: &[(String, Value<'d>)],
    ) -> Result<String, EngineError> {
        let mut text = String::new();
        for part in parts {
            match part {
                MessagePart::Text(literal) => text.push_str(literal),
                MessagePart::Name { path: None } => {
                    text.push_str(&self.evaluate("name()", node, scope)?.string());
                }
                MessagePart::Name { path: Some(path) } => {
                    let expression = format!("name({})", path);
                    text.push_str(&self.evaluate(&expression, node, scope)?.string());
                }
                MessagePart::ValueOf { select } => {
                    text.push_str(&self.evaluate(select, node, scope)?.string());
                }
            }
        }
        Ok(text.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    fn finding<'d>(
        &mut self,
        rule: &BoundRule,
        check: &BoundCheck,
        node: Node<'d>,
        scope: &[(String, Value<'d>)],
    ) -> Result<Finding, EngineError> {
        let text = self.render(&check.message, node, scope)?;
        let mut diagnostics = Vec::with_capacity(check.diagnostics.len());
        for diagnostic in &check.diagnostics {
            diagnostics.push(DiagnosticReference {
                id: diagnostic.id.clone(),
                text: self.render(&diagnostic.message, node, scope)?,
            });
        }

        let flag = check.flag.as_deref().or(rule.flag.as_deref());
        let role = check.role.as_deref().or(rule.role.as_deref());

        Ok(Finding {
            kind: match check.kind {
                CheckKind::Assert => FindingKind::FailedAssert,
                CheckKind::Report => FindingKind::SuccessfulReport,
            },
            severity: Severity::from_declaration(flag, role),
            id: check.id.clone(),
            test: check.test.clone(),
            location: location(node),
            role: role.map(str::to_string),
            flag: flag.map(str::to_string),
            text: Some(text).filter(|t| !t.is_empty()),
            diagnostics,
        })
    }
}

fn element_step(element: dom::Element<'_>) -> String {
    let name = element.name();
    let siblings: Vec<dom::Element<'_>> = match element.parent() {
        Some(dom::ParentOfChild::Element(parent)) => parent
            .children()
            .into_iter()
            .filter_map(|c| match c {
                dom::ChildOfElement::Element(e) => Some(e),
                _ => None,
            })
            .collect(),
        Some(dom::ParentOfChild::Root(root)) => root
            .children()
            .into_iter()
            .filter_map(|c| match c {
                dom::ChildOfRoot::Element(e) => Some(e),
                _ => None,
            })
            .collect(),
        None => vec![element],
    };
    let position = siblings
        .iter()
        .filter(|s| s.name() == name)
        .position(|s| *s == element)
        .map_or(1, |p| p + 1);

    format!(
        "/*[local-name()='{}' and namespace-uri()='{}'][{}]",
        name.local_part(),
        name.namespace_uri().unwrap_or(""),
        position
    )
}

fn element_path(element: dom::Element<'_>) -> String {
    let mut steps = Vec::new();
    let mut current = Some(element);
    while let Some(e) = current {
        steps.push(element_step(e));
        current = match e.parent() {
            Some(dom::ParentOfChild::Element(parent)) => Some(parent),
            _ => None,
        };
    }
    steps.reverse();
    steps.concat()
}

/// Location path of `node` in `/*[local-name()='x' and namespace-uri()='...'][n]` form
pub fn location(node: Node<'_>) -> String {
    match node {
        Node::Element(element) => element_path(element),
        Node::Attribute(attribute) => {
            let name = attribute.name();
            format!(
                "{}/@*[local-name()='{}' and namespace-uri()='{}']",
                attribute.parent().map(element_path).unwrap_or_default(),
                name.local_part(),
                name.namespace_uri().unwrap_or("")
            )
        }
        Node::Text(text) => match text.parent() {
            Some(parent) => {
                let position = parent
                    .children()
                    .into_iter()
                    .filter_map(|c| match c {
                        dom::ChildOfElement::Text(t) => Some(t),
                        _ => None,
                    })
                    .position(|t| t == text)
                    .map_or(1, |p| p + 1);
                format!("{}/text()[{}]", element_path(parent), position)
            }
            None => "/text()".to_string(),
        },
        _ => "/".to_string(),
    }
}
