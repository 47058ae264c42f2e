//! Wiring shared by every component of one engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::domain::{EngineError, Job, JobId};
use crate::ports::{Clock, IdGenerator, JobStore};

pub(crate) struct EngineContext {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) config: EngineConfig,
}

impl EngineContext {
    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Read a record and verify it before anyone acts on it.
    pub(crate) async fn load(&self, id: JobId) -> Result<Job, EngineError> {
        let job = self.store.get(id).await?;
        job.check_integrity()?;
        Ok(job)
    }
}
