//! # validate-sch Library
//!
//! Validates XML files against Schematron rule documents and checks that each file produced
//! the expected outcome. Rule documents are compiled by a three-step pipeline (inclusion,
//! abstract expansion, SVRL synthesis) whose document-independent stages are compiled once per
//! process and shared.

pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod executable;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod preprocess;
pub mod provider;
pub mod resolver;
pub mod resources;
pub mod runner;
pub mod schema;
pub mod svrl;
pub mod task;
pub mod tree;

pub use cache::{FixedStages, StageCache, ValidatorCache, ValidatorKey};
pub use cli::{Cli, VerbosityLevel};
pub use config::{Config, ConfigManager};
pub use engine::{NativeEngine, Parameters, TransformEngine};
pub use error::{CompilationError, EngineError, Result, SchematronError};
pub use executable::ExecutableValidator;
pub use input::InputDocument;
pub use output::Output;
pub use pipeline::{
    CompilationPipeline, CompiledSchematron, DefaultCustomizer, NoopCustomizer, PipelineStep,
    TransformerCustomizer,
};
pub use preprocess::{PreprocessOptions, PreprocessTask, preprocess};
pub use provider::{LoadOptions, ProcessingMode, SchematronProvider, SchematronResource};
pub use resolver::{CatalogResolver, DefaultEntityResolver, EntityResolver};
pub use resources::{ResolvedFile, ResourceCollection, ResourceResolver, collection_from_spec};
pub use runner::{BatchResult, FileOutcome, OutcomePolicy, OutcomeStatus, ValidationRunner};
pub use svrl::{DiagnosticReport, Finding, Severity};
pub use task::{TaskSettings, ValidationContext, ValidationTask};
pub use tree::XmlDocument;
