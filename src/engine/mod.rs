//! Transform Engine
//!
//! The compilation pipeline only needs two capabilities from an engine: compiling one of the
//! skeleton stages into a reusable [`CompiledStage`], and compiling a validator document (the
//! output of the last stage) into an [`ExecutableValidator`]. [`NativeEngine`] implements both
//! in-process; the pipeline and the stage cache only ever see the [`TransformEngine`] trait.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::EngineError;
use crate::executable::ExecutableValidator;
use crate::resolver::EntityResolver;
use crate::tree::XmlDocument;

pub mod abstract_expand;
pub mod include;
pub mod synthesis;

/// Named string parameters passed to a transform or a validator run
pub type Parameters = BTreeMap<String, String>;

/// Name of the stage-3 parameter that selects the active phase
pub const PHASE_PARAMETER: &str = "phase";

/// Query language family declared by a rule document's `queryBinding`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryBinding {
    /// `xslt`, `xslt1`, `xpath` (also the default when the attribute is absent)
    XPath1,
    /// `xslt2`, `xslt3`, `xpath2`, `xpath3`, `xpath31`; evaluated with the XPath 1.0 subset
    Extended(String),
}

impl QueryBinding {
    pub fn from_attribute(value: Option<&str>) -> Result<Self, EngineError> {
        let value = value.map(str::trim).unwrap_or("xslt");
        match value.to_ascii_lowercase().as_str() {
            "" | "xslt" | "xslt1" | "xpath" | "xpath1" => Ok(QueryBinding::XPath1),
            "xslt2" | "xslt3" | "xpath2" | "xpath3" | "xpath31" => {
                Ok(QueryBinding::Extended(value.to_string()))
            }
            _ => Err(EngineError::UnsupportedQueryBinding(value.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            QueryBinding::XPath1 => "xslt",
            QueryBinding::Extended(name) => name,
        }
    }
}

/// The skeleton transforms of the compilation chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkeletonStage {
    Include,
    AbstractExpand,
    Synthesis(QueryBinding),
}

impl fmt::Display for SkeletonStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkeletonStage::Include => write!(f, "include"),
            SkeletonStage::AbstractExpand => write!(f, "abstract-expand"),
            SkeletonStage::Synthesis(binding) => write!(f, "synthesis[{}]", binding.as_str()),
        }
    }
}

/// Everything a stage program may consult while transforming one document
pub struct TransformContext<'a> {
    pub parameters: &'a Parameters,
    pub resolver: &'a dyn EntityResolver,
}

/// The executable body of a compiled stage
pub trait StageProgram: Send + Sync {
    fn apply(
        &self,
        input: &XmlDocument,
        context: &TransformContext<'_>,
    ) -> Result<XmlDocument, EngineError>;
}

/// A compiled, immutable stage artifact; cheap to clone and shared between pipelines
#[derive(Clone)]
pub struct CompiledStage {
    stage: SkeletonStage,
    program: Arc<dyn StageProgram>,
}

impl fmt::Debug for CompiledStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledStage")
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl CompiledStage {
    pub fn new(stage: SkeletonStage, program: Arc<dyn StageProgram>) -> Self {
        Self { stage, program }
    }

    pub fn stage(&self) -> &SkeletonStage {
        &self.stage
    }

    /// Whether both handles point at the same compiled artifact
    pub fn same_artifact(&self, other: &CompiledStage) -> bool {
        Arc::ptr_eq(&self.program, &other.program)
    }

    /// A fresh runnable instance of this stage
    pub fn new_transformer(&self, resolver: Arc<dyn EntityResolver>) -> Transformer {
        Transformer {
            stage: self.clone(),
            parameters: Parameters::new(),
            output: OutputProperties::default(),
            resolver,
        }
    }
}

/// Serialization properties applied when a stage result is written out
#[derive(Debug, Clone, PartialEq)]
pub struct OutputProperties {
    pub indent: bool,
}

impl Default for OutputProperties {
    fn default() -> Self {
        Self { indent: true }
    }
}

/// A not-yet-run instance of a compiled stage; customizers adjust it before it runs
pub struct Transformer {
    stage: CompiledStage,
    parameters: Parameters,
    output: OutputProperties,
    resolver: Arc<dyn EntityResolver>,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("stage", &self.stage.stage)
            .field("parameters", &self.parameters)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

impl Transformer {
    pub fn stage(&self) -> &SkeletonStage {
        &self.stage.stage
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(name.into(), value.into());
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn output_properties(&self) -> &OutputProperties {
        &self.output
    }

    pub fn output_properties_mut(&mut self) -> &mut OutputProperties {
        &mut self.output
    }

    pub fn set_resolver(&mut self, resolver: Arc<dyn EntityResolver>) {
        self.resolver = resolver;
    }

    pub fn transform(&self, input: &XmlDocument) -> Result<XmlDocument, EngineError> {
        let context = TransformContext {
            parameters: &self.parameters,
            resolver: self.resolver.as_ref(),
        };
        self.stage.program.apply(input, &context)
    }
}

/// Options for the final validator compilation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileOptions {
    /// Default values for validator parameters; run-time parameters override them
    pub parameters: Parameters,
}

/// Compiles skeleton stages and validator documents
pub trait TransformEngine: Send + Sync {
    fn compile_stage(&self, stage: SkeletonStage) -> Result<CompiledStage, EngineError>;

    fn compile_validator(
        &self,
        document: &XmlDocument,
        options: &CompileOptions,
    ) -> Result<ExecutableValidator, EngineError>;
}

/// In-process implementation of the ISO skeleton stages
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEngine;

impl NativeEngine {
    pub fn new() -> Self {
        Self
    }
}

impl TransformEngine for NativeEngine {
    fn compile_stage(&self, stage: SkeletonStage) -> Result<CompiledStage, EngineError> {
        let program: Arc<dyn StageProgram> = match &stage {
            SkeletonStage::Include => Arc::new(include::IncludeProgram),
            SkeletonStage::AbstractExpand => Arc::new(abstract_expand::AbstractExpandProgram),
            SkeletonStage::Synthesis(binding) => {
                if let QueryBinding::Extended(name) = binding {
                    log::warn!(
                        "Query binding '{}' is evaluated with the XPath 1.0 subset",
                        name
                    );
                }
                Arc::new(synthesis::SynthesisProgram::new(binding.clone()))
            }
        };
        log::debug!("Compiled skeleton stage {}", stage);
        Ok(CompiledStage::new(stage, program))
    }

    fn compile_validator(
        &self,
        document: &XmlDocument,
        options: &CompileOptions,
    ) -> Result<ExecutableValidator, EngineError> {
        let schema = synthesis::from_document(document)?;
        ExecutableValidator::new(schema, options)
    }
}
