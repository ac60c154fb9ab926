use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded run of a short-lived task.
///
/// The id is assigned by the store when the record is created and is never
/// reused. A record is mutated exactly once, by the completion update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub execution_id: i64,
    pub task_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
    pub exit_message: Option<String>,
    pub error_message: Option<String>,
    pub external_execution_id: Option<String>,
    pub parent_execution_id: Option<i64>,
    pub arguments: Vec<String>,
}

impl TaskExecution {
    pub fn new(
        execution_id: i64,
        task_name: String,
        start_time: DateTime<Utc>,
        arguments: Vec<String>,
        external_execution_id: Option<String>,
        parent_execution_id: Option<i64>,
    ) -> Self {
        Self {
            execution_id,
            task_name,
            start_time,
            end_time: None,
            exit_code: None,
            exit_message: None,
            error_message: None,
            external_execution_id,
            parent_execution_id,
            arguments,
        }
    }

    /// Apply the completion update. end_time and exit_code are always set
    /// together; re-applying the same values is a no-op on the final state.
    pub fn complete(
        &mut self,
        end_time: DateTime<Utc>,
        exit_code: i64,
        exit_message: Option<String>,
        error_message: Option<String>,
    ) {
        self.end_time = Some(end_time);
        self.exit_code = Some(exit_code);
        self.exit_message = exit_message;
        self.error_message = error_message;
    }

    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }
}
