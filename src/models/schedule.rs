//! Persisted shape of a scheduled trigger. Evaluating the schedule expression is
//! left to an external scheduler; see [`crate::trigger`].

use crate::error::{BatchillerError, Result};
use crate::models::Parameters;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleTarget {
    Job,
    Pipeline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    pub target_type: ScheduleTarget,
    pub target_name: String,
    pub schedule_expression: String,
    #[serde(default)]
    pub parameters: Parameters,
    pub enabled: bool,
    pub last_execution_time: Option<DateTime<Utc>>,
    pub next_execution_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn new(
        name: impl Into<String>,
        target_type: ScheduleTarget,
        target_name: impl Into<String>,
        schedule_expression: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            target_type,
            target_name: target_name.into(),
            schedule_expression: schedule_expression.into(),
            parameters: Parameters::new(),
            enabled: true,
            last_execution_time: None,
            next_execution_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BatchillerError::configuration("scheduled_task", "name must not be blank"));
        }
        if self.target_name.trim().is_empty() {
            return Err(BatchillerError::configuration(
                &self.name,
                "target name must not be blank",
            ));
        }
        let fields = self.schedule_expression.split_whitespace().count();
        if !(5..=6).contains(&fields) {
            return Err(BatchillerError::configuration(
                &self.name,
                format!(
                    "schedule expression '{}' must have 5 or 6 fields, found {fields}",
                    self.schedule_expression
                ),
            ));
        }
        Ok(())
    }

    /// Stamp a fire time
    pub fn mark_fired(&mut self, at: DateTime<Utc>) {
        self.last_execution_time = Some(at);
        self.updated_at = at;
    }
}
