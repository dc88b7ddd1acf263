//! Wiring of the production components from configuration

use crate::config::{absolute_path, CacheBackend, CacheConfig, NoiseConfig};
use crate::dag::PipelineDAG;
use crate::engine::{H2Launcher, PgEngineConnector, PortPool, RetryPolicy};
use crate::error::Result;
use crate::geometry::GeometryNormalizer;
use crate::orchestrator::JobOrchestrator;
use crate::runner::NoisePipeline;
use crate::sequencer::PipelineSequencer;
use noise_storage::{CachePolicy, InMemoryResultCache, ResultCache, SqliteResultCache};
use std::sync::Arc;
use tracing::info;

/// Result cache selected by `cache.backend`
pub fn build_cache(config: &CacheConfig) -> Result<Arc<dyn ResultCache>> {
    let policy = CachePolicy::with_ttl_days(config.key_prefix.clone(), config.ttl_days);
    let cache: Arc<dyn ResultCache> = match config.backend {
        CacheBackend::Memory => Arc::new(InMemoryResultCache::new(policy)),
        CacheBackend::Sqlite => Arc::new(SqliteResultCache::open(&config.path, policy)?),
    };
    Ok(cache)
}

/// Pipeline backed by H2 engine processes, one port per worker slot
pub fn build_pipeline(config: &NoiseConfig) -> Result<NoisePipeline> {
    let ports = PortPool::new(config.engine.port, config.workers.concurrency);
    let launcher = Arc::new(H2Launcher::new(config.engine.clone(), ports));
    let connector = Arc::new(PgEngineConnector::from_config(&config.engine)?);

    let dag = PipelineDAG::noise_pipeline(config.engine.stage_timeout_ms)?;
    let sequencer = PipelineSequencer::with_default_handlers(
        dag,
        launcher,
        connector,
        RetryPolicy::from_config(&config.engine),
    );

    Ok(NoisePipeline::new(
        GeometryNormalizer::new(config.workers.normalize_threads)?,
        sequencer,
        config.propagation.clone(),
        absolute_path(&config.engine.export_dir)?,
    ))
}

pub fn build_orchestrator(config: &NoiseConfig) -> Result<JobOrchestrator> {
    let cache = build_cache(&config.cache)?;
    let pipeline = build_pipeline(config)?;
    info!(
        "Orchestrator ready: {} workers, {:?} cache, engine ports from {}",
        config.workers.concurrency, config.cache.backend, config.engine.port
    );
    Ok(JobOrchestrator::new(
        cache,
        Arc::new(pipeline),
        config.workers.concurrency,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sqlite_cache_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            backend: CacheBackend::Sqlite,
            path: dir.path().join("cache.sqlite"),
            ..CacheConfig::default()
        };

        let cache = build_cache(&config).unwrap();
        cache.put("k", json!({"geojson": null})).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_some());
        assert!(dir.path().join("cache.sqlite").exists());
    }

    #[test]
    fn test_relative_export_dir_is_resolved() {
        let mut config = NoiseConfig::default();
        config.engine.export_dir = PathBuf::from("results");

        let pipeline = build_pipeline(&config).unwrap();
        let path = pipeline.export_path(Uuid::new_v4());

        assert!(path.is_absolute(), "{}", path.display());
        assert!(path.starts_with(std::env::current_dir().unwrap().join("results")));
    }

    #[test]
    fn test_pipeline_registers_every_stage() {
        let pipeline = build_pipeline(&NoiseConfig::default()).unwrap();
        assert_eq!(pipeline.sequencer().dag().linear_order().len(), 9);
    }
}
