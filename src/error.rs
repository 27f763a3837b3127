use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::pipeline::PipelineStep;

/// Main application error type that encompasses all possible failure modes
#[derive(Error, Debug)]
pub enum SchematronError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read rule document {path}: {details}")]
    Read { path: PathBuf, details: String },

    #[error(transparent)]
    Compilation(#[from] CompilationError),

    #[error("Resource resolution error: {0}")]
    Resolution(String),

    #[error("Exception validating XML '{file}': {details}")]
    Runtime { file: PathBuf, details: String },

    #[error("{message}")]
    ExpectationMismatch { file: PathBuf, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("The provided Schematron file {path} contains {count} error(s)")]
    Schema { path: PathBuf, count: usize },

    #[error("{0}")]
    BuildFailed(String),

    /// An error produced once and handed to several waiters of the validator cache
    #[error(transparent)]
    Shared(Arc<SchematronError>),
}

/// A compilation pipeline step failed; no validator was produced
#[derive(Error, Debug, Clone)]
#[error("Compiling Schematron '{document}' failed in {stage}: {source}")]
pub struct CompilationError {
    pub document: String,
    pub stage: PipelineStep,
    #[source]
    pub source: EngineError,
}

/// Transform engine error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Failed to include '{href}': {details}")]
    Include { href: String, details: String },

    #[error("Inclusion cycle detected at '{0}'")]
    IncludeCycle(String),

    #[error("Abstract pattern '{0}' is not defined")]
    UnknownAbstractPattern(String),

    #[error("Abstract rule '{0}' is not defined")]
    UnknownAbstractRule(String),

    #[error("Phase '{0}' is not defined")]
    UnknownPhase(String),

    #[error("Diagnostic '{0}' is not defined")]
    UnknownDiagnostic(String),

    #[error("Unsupported query binding '{0}'")]
    UnsupportedQueryBinding(String),

    #[error("Invalid XPath expression '{expression}': {details}")]
    InvalidExpression { expression: String, details: String },

    #[error("Evaluation of '{expression}' failed: {details}")]
    Evaluation { expression: String, details: String },

    #[error("Malformed stage input: {0}")]
    MalformedInput(String),

    #[error("Input document error: {0}")]
    InputDocument(String),
}

/// XML read/write error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("XML parsing error: {0}")]
    Parse(String),

    #[error("XML writing error: {0}")]
    Write(String),

    #[error("XML file error: {0}")]
    Io(String),
}

/// Entity resolution error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Unsupported URI scheme in '{0}'")]
    UnsupportedScheme(String),

    #[error("Entity '{system_id}' not found at {path}")]
    NotFound { system_id: String, path: PathBuf },

    #[error("Failed to read entity '{system_id}': {details}")]
    Unreadable { system_id: String, details: String },
}

impl From<TreeError> for EngineError {
    fn from(err: TreeError) -> Self {
        EngineError::MalformedInput(err.to_string())
    }
}

impl From<ResolveError> for SchematronError {
    fn from(err: ResolveError) -> Self {
        SchematronError::Resolution(err.to_string())
    }
}

impl From<Arc<SchematronError>> for SchematronError {
    fn from(err: Arc<SchematronError>) -> Self {
        SchematronError::Shared(err)
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SchematronError>;

impl SchematronError {
    /// Build-level failures are the only errors that abort a batch under fail-on-error
    pub fn is_build_failure(&self) -> bool {
        match self {
            SchematronError::BuildFailed(_) => true,
            SchematronError::Shared(inner) => inner.is_build_failure(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compilation_error_display_names_stage() {
        let error = CompilationError {
            document: "rules.sch".to_string(),
            stage: PipelineStep::AbstractExpand,
            source: EngineError::UnknownAbstractPattern("table".to_string()),
        };
        let message = error.to_string();
        assert!(message.contains("rules.sch"));
        assert!(message.contains("step 2"));
        assert!(message.contains("table"));

        let wrapped: SchematronError = error.into();
        assert!(matches!(
            wrapped,
            SchematronError::Compilation(CompilationError {
                stage: PipelineStep::AbstractExpand,
                ..
            })
        ));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Access denied");
        let error: SchematronError = io_error.into();
        assert!(matches!(error, SchematronError::Io(_)));
        assert!(error.to_string().contains("IO error"));
    }

    #[test]
    fn test_resolve_error_conversion() {
        let error: SchematronError =
            ResolveError::UnsupportedScheme("http://example.com/a.dtd".to_string()).into();
        match error {
            SchematronError::Resolution(message) => assert!(message.contains("http://")),
            other => panic!("Expected Resolution, got {:?}", other),
        }
    }

    #[test]
    fn test_build_failure_detection() {
        assert!(SchematronError::BuildFailed("stop".to_string()).is_build_failure());
        assert!(!SchematronError::Config("bad".to_string()).is_build_failure());

        let shared: SchematronError =
            Arc::new(SchematronError::BuildFailed("stop".to_string())).into();
        assert!(shared.is_build_failure());
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let error = CompilationError {
            document: "rules.sch".to_string(),
            stage: PipelineStep::Include,
            source: EngineError::IncludeCycle("a.sch".to_string()),
        };
        let source = error.source().unwrap();
        assert!(source.to_string().contains("a.sch"));
    }
}
