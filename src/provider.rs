//! Processing Modes
//!
//! A rule document is turned into an [`ExecutableValidator`] in one of three ways, chosen
//! once per task:
//!
//! - [`ProcessingMode::Direct`]: expand and bind the rule document in-process, without the
//!   stage pipeline
//! - [`ProcessingMode::Compiled`]: run the full compilation pipeline
//! - [`ProcessingMode::Precompiled`]: the file already is a validator document
//!
//! All three produce a [`SchematronResource`] that records the validator (if any) together with
//! every issue found while loading.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::engine::synthesis::bind_schema;
use crate::engine::{CompileOptions, PHASE_PARAMETER, Parameters, abstract_expand, include};
use crate::error::{CompilationError, EngineError, Result, SchematronError};
use crate::executable::ExecutableValidator;
use crate::pipeline::{CompilationPipeline, DefaultCustomizer, PipelineStep};
use crate::schema::{SchemaIssue, check_rule_document, read_rule_document};
use crate::tree::XmlDocument;

/// How a rule document becomes an executable validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessingMode {
    Direct,
    #[default]
    Compiled,
    Precompiled,
}

impl ProcessingMode {
    pub fn id(self) -> &'static str {
        match self {
            ProcessingMode::Direct => "direct",
            ProcessingMode::Compiled => "compiled",
            ProcessingMode::Precompiled => "precompiled",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pure" | "direct" => Ok(ProcessingMode::Direct),
            "schematron" | "compiled" => Ok(ProcessingMode::Compiled),
            "xslt" | "precompiled" => Ok(ProcessingMode::Precompiled),
            other => Err(format!(
                "Invalid processing engine '{}'. Valid values are: pure, schematron, xslt",
                other
            )),
        }
    }
}

/// Phase and parameters applied while loading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    pub phase: Option<String>,
    pub parameters: Parameters,
}

/// A loaded rule document
#[derive(Debug, Clone)]
pub struct SchematronResource {
    source: PathBuf,
    mode: ProcessingMode,
    validator: Option<Arc<ExecutableValidator>>,
    validator_document: Option<XmlDocument>,
    issues: Vec<SchemaIssue>,
}

impl SchematronResource {
    /// A resource that failed to load; `issues` explain why
    pub fn invalid(source: PathBuf, mode: ProcessingMode, issues: Vec<SchemaIssue>) -> Self {
        Self {
            source,
            mode,
            validator: None,
            validator_document: None,
            issues,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    pub fn validator(&self) -> Option<&Arc<ExecutableValidator>> {
        self.validator.as_ref()
    }

    /// Output of the synthesis step (compiled mode only)
    pub fn validator_document(&self) -> Option<&XmlDocument> {
        self.validator_document.as_ref()
    }

    pub fn issues(&self) -> &[SchemaIssue] {
        &self.issues
    }

    pub fn is_valid_schematron(&self) -> bool {
        self.validator.is_some()
    }
}

/// Loads rule documents in any processing mode
pub struct SchematronProvider {
    pipeline: Arc<CompilationPipeline>,
}

impl SchematronProvider {
    pub fn new(pipeline: Arc<CompilationPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<CompilationPipeline> {
        &self.pipeline
    }

    /// Load `path` in `mode`. Only an unreadable file is an `Err`; compilation problems end
    /// up as error-level issues on an invalid resource.
    pub fn load(
        &self,
        path: &Path,
        mode: ProcessingMode,
        options: &LoadOptions,
    ) -> Result<SchematronResource> {
        if mode == ProcessingMode::Precompiled {
            return self.load_precompiled(path, options);
        }

        let document = read_rule_document(path)?;
        let mut issues = check_rule_document(&document);
        if issues.iter().any(SchemaIssue::is_error) {
            return Ok(SchematronResource::invalid(path.to_path_buf(), mode, issues));
        }

        let compiled = match mode {
            ProcessingMode::Direct => self
                .compile_direct(&document, options)
                .map(|validator| (Arc::new(validator), None)),
            _ => {
                let customizer =
                    DefaultCustomizer::new(options.phase.clone(), options.parameters.clone());
                self.pipeline
                    .compile(&document, &customizer)
                    .map(|c| (c.validator, Some(c.validator_document)))
            }
        };

        Ok(match compiled {
            Ok((validator, validator_document)) => SchematronResource {
                source: path.to_path_buf(),
                mode,
                validator: Some(validator),
                validator_document,
                issues,
            },
            Err(e) => {
                issues.push(SchemaIssue::error(e.to_string()));
                SchematronResource::invalid(path.to_path_buf(), mode, issues)
            }
        })
    }

    fn load_precompiled(&self, path: &Path, options: &LoadOptions) -> Result<SchematronResource> {
        let document = XmlDocument::read_file(path).map_err(|e| SchematronError::Read {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;

        let compile_options = CompileOptions {
            parameters: options.parameters.clone(),
        };
        match self.pipeline.engine().compile_validator(&document, &compile_options) {
            Ok(validator) => Ok(SchematronResource {
                source: path.to_path_buf(),
                mode: ProcessingMode::Precompiled,
                validator: Some(Arc::new(validator)),
                validator_document: Some(document),
                issues: Vec::new(),
            }),
            Err(source) => {
                let error = CompilationError {
                    document: document.display_name(),
                    stage: PipelineStep::CompileValidator,
                    source,
                };
                Ok(SchematronResource::invalid(
                    path.to_path_buf(),
                    ProcessingMode::Precompiled,
                    vec![SchemaIssue::error(error.to_string())],
                ))
            }
        }
    }

    /// In-process expansion and binding, bypassing the stage pipeline
    fn compile_direct(
        &self,
        document: &XmlDocument,
        options: &LoadOptions,
    ) -> std::result::Result<ExecutableValidator, CompilationError> {
        let name = document.display_name();
        let fail = |stage: PipelineStep| {
            let name = name.clone();
            move |source: EngineError| CompilationError {
                document: name,
                stage,
                source,
            }
        };

        let included = include::expand_includes(document, self.pipeline.resolver().as_ref())
            .map_err(fail(PipelineStep::Include))?;
        let expanded =
            abstract_expand::expand_abstracts(&included).map_err(fail(PipelineStep::AbstractExpand))?;

        let mut parameters = options.parameters.clone();
        let phase = options
            .phase
            .clone()
            .or_else(|| parameters.remove(PHASE_PARAMETER));
        let schema =
            bind_schema(&expanded, phase.as_deref()).map_err(fail(PipelineStep::SvrlSynthesis))?;

        ExecutableValidator::new(schema, &CompileOptions { parameters })
            .map_err(fail(PipelineStep::CompileValidator))
    }
}
