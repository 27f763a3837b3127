//! Compilation Pipeline
//!
//! Drives a rule document through the three skeleton stages and the final validator compile:
//!
//! 1. inclusion expansion (fixed stage, taken from the [`StageCache`])
//! 2. abstract pattern expansion (fixed stage, taken from the [`StageCache`])
//! 3. validator synthesis (compiled per document for its query binding)
//! 4. validator compilation
//!
//! A [`TransformerCustomizer`] sees every step right before it runs. Any failing step aborts
//! the compilation with a [`CompilationError`] naming the step; no partial validator escapes.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::StageCache;
use crate::engine::{
    CompileOptions, CompiledStage, OutputProperties, PHASE_PARAMETER, Parameters, QueryBinding,
    SkeletonStage, TransformEngine, Transformer,
};
use crate::error::{CompilationError, EngineError};
use crate::executable::ExecutableValidator;
use crate::resolver::EntityResolver;
use crate::tree::XmlDocument;

/// Suffix of the debug dump written after step 2
pub const EXPANDED_SUFFIX: &str = ".expanded.sch";

/// Suffix of the debug dump written after step 3
pub const VALIDATOR_SUFFIX: &str = ".validator.xml";

/// Identifies the step of the compilation chain that is about to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStep {
    Include,
    AbstractExpand,
    SvrlSynthesis,
    CompileValidator,
}

impl PipelineStep {
    pub fn number(self) -> u8 {
        match self {
            PipelineStep::Include => 1,
            PipelineStep::AbstractExpand => 2,
            PipelineStep::SvrlSynthesis => 3,
            PipelineStep::CompileValidator => 4,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            PipelineStep::Include => "inclusion expansion",
            PipelineStep::AbstractExpand => "abstract pattern expansion",
            PipelineStep::SvrlSynthesis => "validator synthesis",
            PipelineStep::CompileValidator => "validator compilation",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({})", self.number(), self.description())
    }
}

/// Hook invoked right before each step of the pipeline
#[cfg_attr(test, mockall::automock)]
pub trait TransformerCustomizer {
    /// Called before steps 1 to 3 with the transformer about to run
    fn customize(&self, _step: PipelineStep, _transformer: &mut Transformer) {}

    /// Called before step 4 with the options of the final compile
    fn customize_compile(&self, _step: PipelineStep, _options: &mut CompileOptions) {}
}

/// Customizer that changes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCustomizer;

impl TransformerCustomizer for NoopCustomizer {}

/// Applies a phase to step 3 and custom parameters to the final compile
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefaultCustomizer {
    pub phase: Option<String>,
    pub parameters: Parameters,
}

impl DefaultCustomizer {
    pub fn new(phase: Option<String>, parameters: Parameters) -> Self {
        Self { phase, parameters }
    }
}

impl TransformerCustomizer for DefaultCustomizer {
    fn customize(&self, step: PipelineStep, transformer: &mut Transformer) {
        if step == PipelineStep::SvrlSynthesis
            && let Some(phase) = &self.phase
        {
            transformer.set_parameter(PHASE_PARAMETER, phase.clone());
        }
    }

    fn customize_compile(&self, _step: PipelineStep, options: &mut CompileOptions) {
        options
            .parameters
            .extend(self.parameters.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Successful compilation result
#[derive(Debug, Clone)]
pub struct CompiledSchematron {
    pub validator: Arc<ExecutableValidator>,
    /// Output of step 3, kept for inspection
    pub validator_document: XmlDocument,
}

/// Compiles rule documents into executable validators
pub struct CompilationPipeline {
    engine: Arc<dyn TransformEngine>,
    stages: Arc<StageCache>,
    resolver: Arc<dyn EntityResolver>,
    debug_dir: Option<PathBuf>,
}

impl CompilationPipeline {
    pub fn new(
        engine: Arc<dyn TransformEngine>,
        stages: Arc<StageCache>,
        resolver: Arc<dyn EntityResolver>,
    ) -> Self {
        Self {
            engine,
            stages,
            resolver,
            debug_dir: None,
        }
    }

    /// Save the step 2 and step 3 outputs into `dir`
    pub fn with_debug_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dir = dir;
        self
    }

    pub fn engine(&self) -> &Arc<dyn TransformEngine> {
        &self.engine
    }

    pub fn resolver(&self) -> &Arc<dyn EntityResolver> {
        &self.resolver
    }

    pub fn compile(
        &self,
        document: &XmlDocument,
        customizer: &dyn TransformerCustomizer,
    ) -> Result<CompiledSchematron, CompilationError> {
        let name = document.display_name();
        let fail = |stage: PipelineStep| {
            let name = name.clone();
            move |source: EngineError| CompilationError {
                document: name,
                stage,
                source,
            }
        };

        let fixed = self.stages.get_or_compile(self.engine.as_ref(), &name)?;

        let (included, _) = self
            .run_step(PipelineStep::Include, &fixed.include, document, customizer)
            .map_err(fail(PipelineStep::Include))?;
        log::debug!("Finished applying step 1 on {}", name);

        let (expanded, output) = self
            .run_step(PipelineStep::AbstractExpand, &fixed.abstract_expand, &included, customizer)
            .map_err(fail(PipelineStep::AbstractExpand))?;
        log::debug!("Finished applying step 2 on {}", name);
        self.save_intermediate(&name, EXPANDED_SUFFIX, &expanded, &output);

        let binding = QueryBinding::from_attribute(expanded.root.attribute("queryBinding"))
            .map_err(fail(PipelineStep::SvrlSynthesis))?;
        let synthesis = self
            .engine
            .compile_stage(SkeletonStage::Synthesis(binding))
            .map_err(fail(PipelineStep::SvrlSynthesis))?;
        let (validator_document, output) = self
            .run_step(PipelineStep::SvrlSynthesis, &synthesis, &expanded, customizer)
            .map_err(fail(PipelineStep::SvrlSynthesis))?;
        log::debug!("Finished applying step 3 on {}", name);
        self.save_intermediate(&name, VALIDATOR_SUFFIX, &validator_document, &output);

        let mut options = CompileOptions::default();
        customizer.customize_compile(PipelineStep::CompileValidator, &mut options);
        let validator = self
            .engine
            .compile_validator(&validator_document, &options)
            .map_err(fail(PipelineStep::CompileValidator))?;
        log::debug!("Compiled validator for {}", name);

        Ok(CompiledSchematron {
            validator: Arc::new(validator),
            validator_document,
        })
    }

    fn run_step(
        &self,
        step: PipelineStep,
        stage: &CompiledStage,
        input: &XmlDocument,
        customizer: &dyn TransformerCustomizer,
    ) -> Result<(XmlDocument, OutputProperties), EngineError> {
        let mut transformer = stage.new_transformer(Arc::clone(&self.resolver));
        customizer.customize(step, &mut transformer);
        let mut output = transformer.transform(input)?;
        if output.location.is_none() {
            output.location = input.location.clone();
        }
        Ok((output, transformer.output_properties().clone()))
    }

    fn save_intermediate(
        &self,
        name: &str,
        suffix: &str,
        document: &XmlDocument,
        output: &OutputProperties,
    ) {
        let Some(dir) = &self.debug_dir else {
            return;
        };
        let path = dir.join(format!("{}{}", name, suffix));
        match document.write_file(&path, output.indent) {
            Ok(()) => log::info!("Saved intermediate file {}", path.display()),
            Err(e) => log::warn!("Failed to save intermediate file {}: {}", path.display(), e),
        }
    }
}
