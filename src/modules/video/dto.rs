use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::infrastructure::queue::state::{JobSnapshot, JobState};

pub const ACCEPTED_STATUS: &str = "Processing";

#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct EnqueueResponse {
    pub job_id: String,
    pub status: String,
    pub work_item_id: Uuid,
}

/// What the worker returns for a finished job.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct ProcessingOutput {
    pub file_name: String,
    pub stored_path: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct StatusResponse {
    pub id: String,
    pub state: JobState,
    /// Percentage rendered as `"<n>%"`.
    pub progress: String,
    #[schema(value_type = Option<ProcessingOutput>)]
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl From<JobSnapshot> for StatusResponse {
    fn from(job: JobSnapshot) -> Self {
        let result = match job.state {
            JobState::Completed => job.result,
            _ => None,
        };
        let error = match job.state {
            JobState::Failed => job.failed_reason,
            _ => None,
        };

        Self {
            id: job.id,
            state: job.state,
            progress: format!("{}%", job.progress),
            result,
            error,
        }
    }
}
