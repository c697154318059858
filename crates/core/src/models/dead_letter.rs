use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 死信条目，日志中每行一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl DeadLetterEntry {
    pub fn new(
        kind: impl Into<String>,
        payload: serde_json::Value,
        error: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            payload,
            error: error.into(),
            failed_at: Utc::now(),
            retry_count: 0,
            max_retries,
        }
    }

    pub fn can_replay(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
