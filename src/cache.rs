use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use moka::future::Cache;
use parking_lot::RwLock;

use crate::engine::{CompiledStage, SkeletonStage, TransformEngine};
use crate::error::{CompilationError, Result, SchematronError};
use crate::pipeline::PipelineStep;
use crate::provider::{ProcessingMode, SchematronResource};

/// The two document-independent stages shared by every compilation
#[derive(Debug, Clone)]
pub struct FixedStages {
    pub include: CompiledStage,
    pub abstract_expand: CompiledStage,
}

/// Process-wide holder of the fixed compilation stages
///
/// Construct one per process and hand it (behind an `Arc`) to every pipeline. The stages are
/// compiled on first use under the write lock, so concurrent first callers observe the same
/// artifacts. A failed compilation leaves the slot empty and the next caller retries.
#[derive(Debug, Default)]
pub struct StageCache {
    slot: RwLock<Option<Arc<FixedStages>>>,
    compilations: AtomicUsize,
}

impl StageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached fixed stages, compiling them with `engine` if this is the first use.
    ///
    /// `document` names the rule document that triggered the call, for error reporting.
    pub fn get_or_compile(
        &self,
        engine: &dyn TransformEngine,
        document: &str,
    ) -> std::result::Result<Arc<FixedStages>, CompilationError> {
        if let Some(stages) = self.slot.read().as_ref() {
            return Ok(Arc::clone(stages));
        }

        let mut slot = self.slot.write();

        // Double-checked locking pattern.
        if let Some(stages) = slot.as_ref() {
            return Ok(Arc::clone(stages));
        }

        let compile = |skeleton: SkeletonStage, step: PipelineStep| {
            engine
                .compile_stage(skeleton)
                .map_err(|source| CompilationError {
                    document: document.to_string(),
                    stage: step,
                    source,
                })
        };

        let stages = Arc::new(FixedStages {
            include: compile(SkeletonStage::Include, PipelineStep::Include)?,
            abstract_expand: compile(SkeletonStage::AbstractExpand, PipelineStep::AbstractExpand)?,
        });
        self.compilations.fetch_add(1, Ordering::SeqCst);
        log::debug!("Compiled the fixed skeleton stages");

        *slot = Some(Arc::clone(&stages));
        Ok(stages)
    }

    pub fn get(&self) -> Option<Arc<FixedStages>> {
        self.slot.read().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.read().is_some()
    }

    /// How many times the fixed stages were compiled (at most once after success)
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::SeqCst)
    }
}

/// Identity of a loaded rule document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatorKey {
    pub source: PathBuf,
    pub mode: ProcessingMode,
    pub phase: Option<String>,
    pub parameters: Vec<(String, String)>,
}

/// In-memory cache of loaded rule documents
///
/// Several tasks that share a rule document, mode and phase compile it once. `moka`
/// makes concurrent requests for the same key wait for the single loader.
pub struct ValidatorCache {
    cache: Cache<ValidatorKey, Arc<SchematronResource>>,
}

impl ValidatorCache {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).build();

        Self { cache }
    }

    /// Get a loaded resource from the cache, or load it if missing.
    ///
    /// The `loader` future is only executed if the key is missing.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: ValidatorKey,
        loader: F,
    ) -> Result<Arc<SchematronResource>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Arc<SchematronResource>>>,
    {
        self.cache
            .try_get_with(key, loader())
            .await
            .map_err(SchematronError::from)
    }

    pub async fn get(&self, key: &ValidatorKey) -> Option<Arc<SchematronResource>> {
        self.cache.get(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NativeEngine;
    use crate::error::EngineError;
    use crate::executable::ExecutableValidator;
    use crate::engine::CompileOptions;
    use crate::tree::XmlDocument;
    use std::sync::atomic::AtomicBool;

    struct FailingOnce {
        failed: AtomicBool,
    }

    impl TransformEngine for FailingOnce {
        fn compile_stage(
            &self,
            stage: SkeletonStage,
        ) -> std::result::Result<CompiledStage, EngineError> {
            if stage == SkeletonStage::AbstractExpand && !self.failed.swap(true, Ordering::SeqCst) {
                return Err(EngineError::MalformedInput("skeleton unavailable".to_string()));
            }
            NativeEngine::new().compile_stage(stage)
        }

        fn compile_validator(
            &self,
            document: &XmlDocument,
            options: &CompileOptions,
        ) -> std::result::Result<ExecutableValidator, EngineError> {
            NativeEngine::new().compile_validator(document, options)
        }
    }

    #[test]
    fn test_stage_cache_compiles_once() {
        let cache = StageCache::new();
        let engine = NativeEngine::new();
        assert!(!cache.is_initialized());

        let first = cache.get_or_compile(&engine, "a.sch").unwrap();
        let second = cache.get_or_compile(&engine, "b.sch").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.include.same_artifact(&second.include));
        assert_eq!(cache.compilations(), 1);
        assert!(cache.is_initialized());
    }

    #[test]
    fn test_stage_cache_concurrent_first_use() {
        let cache = Arc::new(StageCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache
                        .get_or_compile(&NativeEngine::new(), "rules.sch")
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<Arc<FixedStages>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(cache.compilations(), 1);
    }

    #[test]
    fn test_stage_cache_failure_is_retried() {
        let cache = StageCache::new();
        let engine = FailingOnce {
            failed: AtomicBool::new(false),
        };

        let error = cache.get_or_compile(&engine, "rules.sch").unwrap_err();
        assert_eq!(error.stage, PipelineStep::AbstractExpand);
        assert!(!cache.is_initialized());

        assert!(cache.get_or_compile(&engine, "rules.sch").is_ok());
        assert_eq!(cache.compilations(), 1);
    }

    #[tokio::test]
    async fn test_validator_cache_loads_once() {
        let cache = ValidatorCache::new(10);
        let key = ValidatorKey {
            source: PathBuf::from("/rules.sch"),
            mode: ProcessingMode::Compiled,
            phase: None,
            parameters: Vec::new(),
        };
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let resource = cache
                .get_or_load(key.clone(), || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(SchematronResource::invalid(
                        PathBuf::from("/rules.sch"),
                        ProcessingMode::Compiled,
                        Vec::new(),
                    )))
                })
                .await
                .unwrap();
            assert!(!resource.is_valid_schematron());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(cache.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_validator_cache_propagates_errors() {
        let cache = ValidatorCache::new(10);
        let key = ValidatorKey {
            source: PathBuf::from("/missing.sch"),
            mode: ProcessingMode::Direct,
            phase: None,
            parameters: Vec::new(),
        };

        let result = cache
            .get_or_load(key.clone(), || async {
                Err(SchematronError::Read {
                    path: PathBuf::from("/missing.sch"),
                    details: "not found".to_string(),
                })
            })
            .await;

        assert!(result.unwrap_err().to_string().contains("missing.sch"));
        assert!(cache.get(&key).await.is_none());
    }
}
