//! Validation Tasks
//!
//! A [`ValidationTask`] is one rule document checked against one set of inputs. Tasks share a
//! [`ValidationContext`]: the engine, the process-wide stage cache, the loaded-validator cache
//! and the entity resolver.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;

use crate::cache::{StageCache, ValidatorCache, ValidatorKey};
use crate::engine::{NativeEngine, Parameters, TransformEngine};
use crate::error::{Result, SchematronError};
use crate::pipeline::CompilationPipeline;
use crate::provider::{LoadOptions, ProcessingMode, SchematronProvider, SchematronResource};
use crate::resolver::EntityResolver;
use crate::resources::{ResourceCollection, ResourceResolver, collection_from_spec};
use crate::runner::{BatchResult, OutcomePolicy, ValidationRunner};

/// Everything a task needs to know
#[derive(Debug, Clone, Default)]
pub struct TaskSettings {
    pub name: Option<String>,
    pub schematron: Option<PathBuf>,
    /// `None` when the requested engine name was not recognised
    pub mode: Option<ProcessingMode>,
    pub phase: Option<String>,
    pub parameters: Parameters,
    pub inputs: Vec<String>,
    pub svrl_dir: Option<PathBuf>,
    pub policy: OutcomePolicy,
}

impl TaskSettings {
    pub fn label(&self) -> String {
        match (&self.name, &self.schematron) {
            (Some(name), _) => name.clone(),
            (None, Some(path)) => path.display().to_string(),
            (None, None) => "<unnamed>".to_string(),
        }
    }
}

/// Collaborators shared by every task of a process
pub struct ValidationContext {
    provider: SchematronProvider,
    validators: ValidatorCache,
    resolver: Arc<dyn EntityResolver>,
}

impl ValidationContext {
    pub fn new(
        resolver: Arc<dyn EntityResolver>,
        debug_dir: Option<PathBuf>,
        max_validators: u64,
    ) -> Self {
        Self::with_engine(
            Arc::new(NativeEngine::new()),
            Arc::new(StageCache::new()),
            resolver,
            debug_dir,
            max_validators,
        )
    }

    pub fn with_engine(
        engine: Arc<dyn TransformEngine>,
        stages: Arc<StageCache>,
        resolver: Arc<dyn EntityResolver>,
        debug_dir: Option<PathBuf>,
        max_validators: u64,
    ) -> Self {
        let pipeline = CompilationPipeline::new(engine, stages, Arc::clone(&resolver))
            .with_debug_dir(debug_dir);
        Self {
            provider: SchematronProvider::new(Arc::new(pipeline)),
            validators: ValidatorCache::new(max_validators),
            resolver,
        }
    }

    pub fn provider(&self) -> &SchematronProvider {
        &self.provider
    }

    pub fn resolver(&self) -> &Arc<dyn EntityResolver> {
        &self.resolver
    }
}

/// One rule document against one set of inputs
#[derive(Debug, Clone)]
pub struct ValidationTask {
    settings: TaskSettings,
}

impl ValidationTask {
    pub fn new(settings: TaskSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TaskSettings {
        &self.settings
    }

    /// Run the task. Every failure goes through the fail policy: under fail-on-error it is
    /// returned as [`SchematronError::BuildFailed`], otherwise it is logged and the task
    /// returns whatever it managed to validate.
    pub async fn execute(&self, context: &ValidationContext) -> Result<BatchResult> {
        let settings = &self.settings;
        let policy = settings.policy;

        let Some(mode) = self.check_preconditions().await? else {
            return Ok(BatchResult::default());
        };
        // Checked by the preconditions above.
        let Some(schematron) = settings.schematron.as_ref() else {
            return Ok(BatchResult::default());
        };

        let resource = match self.load(context, mode).await {
            Ok(resource) => resource,
            Err(e) if e.is_build_failure() => return Err(e),
            Err(e) => {
                policy.route(&e.to_string())?;
                return Ok(BatchResult::default());
            }
        };

        let mut any_error = false;
        for issue in resource.issues() {
            if issue.is_error() {
                log::error!("Error in Schematron: {}", issue.message);
                any_error = true;
            } else {
                log::warn!("Warning in Schematron: {}", issue.message);
            }
        }
        let validator = match resource.validator() {
            Some(validator) if !any_error => Arc::clone(validator),
            _ => {
                policy.route("The provided Schematron file contains errors. See log for details.")?;
                return Ok(BatchResult::default());
            }
        };
        log::info!(
            "Successfully parsed Schematron file '{}'",
            schematron.display()
        );

        let collections: Vec<Box<dyn ResourceCollection>> = settings
            .inputs
            .iter()
            .map(|spec| collection_from_spec(spec))
            .collect();
        let files = match ResourceResolver::new(policy).resolve_files(&collections).await {
            Ok(files) => files,
            Err(e) if e.is_build_failure() => return Err(e),
            Err(e) => {
                policy.route(&e.to_string())?;
                return Ok(BatchResult::default());
            }
        };

        if let Some(dir) = &settings.svrl_dir {
            log::debug!("Writing SVRL files to directory '{}'", dir.display());
        }
        ValidationRunner::new(
            validator,
            schematron.display().to_string(),
            Arc::clone(context.resolver()),
            policy,
        )
        .with_parameters(settings.parameters.clone())
        .with_svrl_dir(settings.svrl_dir.clone())
        .run(&files)
        .await
    }

    /// The checks made before anything is loaded, in order. `Ok(None)` means a check failed
    /// and the policy let the task continue, so there is nothing left to do.
    async fn check_preconditions(&self) -> Result<Option<ProcessingMode>> {
        let settings = &self.settings;
        let policy = settings.policy;

        let Some(schematron) = &settings.schematron else {
            policy.route("No Schematron file specified!")?;
            return Ok(None);
        };
        if let Ok(metadata) = fs::metadata(schematron).await
            && !metadata.is_file()
        {
            policy.route(&format!(
                "The specified Schematron file {} is not a file!",
                schematron.display()
            ))?;
            return Ok(None);
        }
        let Some(mode) = settings.mode else {
            policy.route(
                "An invalid Schematron processing instance is specified! Only one of the following values is allowed: 'pure', 'schematron', 'xslt'",
            )?;
            return Ok(None);
        };
        if settings.inputs.is_empty() {
            policy.route("No XML resources to be validated specified! Add an input path or pattern.")?;
            return Ok(None);
        }
        if let Some(dir) = &settings.svrl_dir
            && fs::create_dir_all(dir).await.is_err()
        {
            policy.route(&format!(
                "Failed to create the SVRL directory {}",
                dir.display()
            ))?;
            return Ok(None);
        }

        Ok(Some(mode))
    }

    async fn load(
        &self,
        context: &ValidationContext,
        mode: ProcessingMode,
    ) -> Result<Arc<SchematronResource>> {
        let settings = &self.settings;
        let Some(schematron) = settings.schematron.as_ref() else {
            return Err(SchematronError::Config("No Schematron file specified!".to_string()));
        };
        let source = fs::canonicalize(schematron)
            .await
            .unwrap_or_else(|_| schematron.clone());

        let key = ValidatorKey {
            source: source.clone(),
            mode,
            phase: settings.phase.clone(),
            parameters: settings
                .parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let options = LoadOptions {
            phase: settings.phase.clone(),
            parameters: settings.parameters.clone(),
        };

        context
            .validators
            .get_or_load(key, || async {
                log::debug!("Loading {} in {} mode", source.display(), mode);
                context
                    .provider
                    .load(&source, mode, &options)
                    .map(Arc::new)
            })
            .await
    }
}
