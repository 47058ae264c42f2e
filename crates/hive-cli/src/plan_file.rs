//! JSON plan files
//!
//! ```json
//! {
//!   "group_id": "release",
//!   "jobs": [
//!     { "key": "build", "title": "Build", "priority": 5 },
//!     { "key": "test", "title": "Test", "depends_on": ["build"] }
//!   ],
//!   "edges": [{ "job": "test", "depends_on": "build" }]
//! }
//! ```

use async_trait::async_trait;
use hive_core::EngineError;
use hive_core::domain::Plan;
use hive_core::ports::JobGenerator;

pub fn parse(source: &str) -> Result<Plan, EngineError> {
    serde_json::from_str(source).map_err(|err| EngineError::Generator(format!("bad plan file: {err}")))
}

/// A generator whose "source" is already a JSON plan.
#[derive(Debug, Default)]
pub struct JsonPlanGenerator {
    group: Option<String>,
}

impl JsonPlanGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import under `group` instead of the file's own group id.
    pub fn with_group(mut self, group: Option<String>) -> Self {
        self.group = group;
        self
    }
}

#[async_trait]
impl JobGenerator for JsonPlanGenerator {
    async fn generate(&self, source: &str) -> Result<Plan, EngineError> {
        let mut plan = parse(source)?;
        if let Some(group) = &self.group {
            plan.group_id = group.clone();
        }
        Ok(plan)
    }
}
