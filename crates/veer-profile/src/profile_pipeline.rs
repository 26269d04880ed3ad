//! Resolve → materialize → publish, as one operation.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::ProfileError;
use crate::profile_resolver::ProfileResolver;
use crate::profile_types::ResolvedConfig;
use crate::runtime_config_cache::RuntimeConfigCache;
use crate::workspace_materializer::{MaterializeReport, WorkspaceMaterializer};

#[derive(Debug, Clone)]
pub struct MaterializedProfile {
    pub resolved: Arc<ResolvedConfig>,
    pub report: MaterializeReport,
}

pub struct ProfilePipeline {
    resolver: ProfileResolver,
    materializer: WorkspaceMaterializer,
    cache: Arc<RuntimeConfigCache>,
    run_lock: Mutex<()>,
}

impl ProfilePipeline {
    pub fn new(
        resolver: ProfileResolver,
        materializer: WorkspaceMaterializer,
        cache: Arc<RuntimeConfigCache>,
    ) -> Self {
        Self {
            resolver,
            materializer,
            cache,
            run_lock: Mutex::new(()),
        }
    }

    pub fn resolver(&self) -> &ProfileResolver {
        &self.resolver
    }

    pub fn materializer(&self) -> &WorkspaceMaterializer {
        &self.materializer
    }

    pub fn cache(&self) -> Arc<RuntimeConfigCache> {
        Arc::clone(&self.cache)
    }

    pub fn cached_config(&self) -> Option<Arc<ResolvedConfig>> {
        self.cache.load()
    }

    /// Resolves the current profile, writes its workspace, then publishes it.
    ///
    /// The cache is only updated once every step has succeeded; concurrent
    /// callers are serialized so the last published config is the last one
    /// written to disk.
    pub async fn resolve_and_materialize(&self) -> Result<MaterializedProfile, ProfileError> {
        let _guard = self.run_lock.lock().await;
        let resolved = self.resolver.resolve(None).await?;
        let report = self.materializer.materialize(&resolved).await?;
        let resolved = Arc::new(resolved);
        self.cache.replace(Arc::clone(&resolved));
        tracing::info!(
            profile = resolved.selector.as_str(),
            config_path = %report.config_path.display(),
            "runtime config resolved"
        );
        Ok(MaterializedProfile { resolved, report })
    }
}
