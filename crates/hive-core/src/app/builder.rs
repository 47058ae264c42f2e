//! EngineBuilder - エンジンの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に設定を検証し、不正なら BuildError を返す
//! - 未指定のポートは本番向けデフォルトで埋める
//!   (InMemoryJobStore / SystemClock / UlidGenerator)

use std::sync::Arc;

use super::context::EngineContext;
use super::engine::Engine;
use crate::config::{ConfigError, EngineConfig};
use crate::impls::InMemoryJobStore;
use crate::ports::{Clock, IdGenerator, JobStore, SystemClock, UlidGenerator};

/// EngineBuilder はエンジンを構築
///
/// # 使用例
/// ```
/// use hive_core::app::EngineBuilder;
///
/// let engine = EngineBuilder::new().build().unwrap();
/// assert_eq!(engine.config().lock_ttl_secs, 300);
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    store: Option<Arc<dyn JobStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: EngineConfig,
}

/// BuildError はエンジン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The id generator, unless set explicitly, stamps ids with this clock too.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Engine, BuildError> {
        self.config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))) as Arc<dyn IdGenerator>);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryJobStore::new()) as Arc<dyn JobStore>);

        Ok(Engine::from_context(EngineContext {
            store,
            clock,
            ids,
            config: self.config,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessorConfig;
    use crate::domain::JobSpec;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_build_with_defaults() {
        let engine = EngineBuilder::new().build().unwrap();
        assert_eq!(engine.config(), &EngineConfig::default());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = EngineConfig {
            processor: ProcessorConfig {
                max_workers: 0,
                ..ProcessorConfig::default()
            },
            ..EngineConfig::default()
        };
        let built = EngineBuilder::new().config(config).build();
        assert!(matches!(built, Err(BuildError::Config(ConfigError::Invalid(_)))));
    }

    #[tokio::test]
    async fn test_ids_follow_the_injected_clock() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let engine = EngineBuilder::new()
            .clock(Arc::new(FixedClock::new(at)))
            .build()
            .unwrap();

        let job = engine.create_job(JobSpec::new("g", "first")).await.unwrap();
        assert_eq!(job.created_at, at);
        assert_eq!(
            job.id.as_ulid().timestamp_ms(),
            at.timestamp_millis() as u64
        );
    }

    #[tokio::test]
    async fn test_shared_store_is_visible_to_both_engines() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let a = EngineBuilder::new().store(Arc::clone(&store)).build().unwrap();
        let b = EngineBuilder::new().store(store).build().unwrap();

        let job = a.create_job(JobSpec::new("g", "shared")).await.unwrap();
        assert_eq!(b.get_job(job.id).await.unwrap().title, "shared");
    }
}
