//! JobGenerator port - 計画（Plan）を生成する外部コラボレータ
//!
//! Typically an LLM turning a requirement document into jobs and dependency
//! hints. The engine only consumes the resulting `Plan`.

use async_trait::async_trait;

use crate::domain::{EngineError, Plan};

#[async_trait]
pub trait JobGenerator: Send + Sync {
    /// Produce a plan from a free-form source (requirements, a design doc, ...).
    /// Failures are reported as `EngineError::Generator`.
    async fn generate(&self, source: &str) -> Result<Plan, EngineError>;
}
