//! Queue, status key and pub/sub plumbing over Redis.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Channel carrying `{run_id, status}` hints for every transition.
pub const RUN_UPDATES_CHANNEL: &str = "run_updates";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Status record stored under `run:{run_id}`. Carries enough state for an
/// external observer to resume monitoring without replaying pub/sub.
#[derive(Debug, Serialize)]
pub struct StatusRecord<'a> {
    pub run_id: &'a str,
    pub status: RunStatus,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'a Value>,
}

#[derive(Debug, Serialize)]
struct StatusHint<'a> {
    run_id: &'a str,
    status: RunStatus,
}

/// Redis-backed job intake and status publication.
pub struct JobQueue {
    client: redis::Client,
    queue_name: String,
    poll_timeout: Duration,
}

impl JobQueue {
    pub fn connect(url: &str, queue_name: &str, poll_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).context("opening redis client")?;
        Ok(Self {
            client,
            queue_name: queue_name.to_string(),
            poll_timeout,
        })
    }

    /// Blocking right-pop with the configured poll timeout. `Ok(None)` means
    /// the poll window elapsed with no job.
    pub async fn pop_job(&self) -> Result<Option<String>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("connecting to redis")?;
        let popped: Option<(String, String)> = conn
            .brpop(&self.queue_name, self.poll_timeout.as_secs_f64())
            .await?;
        Ok(popped.map(|(_queue, payload)| payload))
    }

    /// Writes the status record under `run:{run_id}` and publishes the hint.
    /// The KV write lands first; subscribers treat the channel as a hint, not
    /// the source of truth.
    pub async fn publish_status(
        &self,
        run_id: &str,
        status: RunStatus,
        result: Option<&Value>,
    ) -> Result<()> {
        let record = StatusRecord {
            run_id,
            status,
            updated_at: Utc::now(),
            result,
        };
        let encoded = serde_json::to_string(&record).context("serializing status record")?;

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("connecting to redis")?;
        let _: () = conn
            .hset(format!("run:{run_id}"), "status", encoded)
            .await?;

        let hint =
            serde_json::to_string(&StatusHint { run_id, status }).context("serializing status hint")?;
        let _: () = conn.publish(RUN_UPDATES_CHANNEL, hint).await?;

        debug!(run_id, ?status, "status published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_record_carries_result_payload() {
        let result = serde_json::json!({"success": true, "duration_seconds": 12.5});
        let record = StatusRecord {
            run_id: "run_1",
            status: RunStatus::Completed,
            updated_at: Utc::now(),
            result: Some(&result),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["run_id"], "run_1");
        assert_eq!(value["status"], "completed");
        assert_eq!(value["result"]["success"], true);
        assert!(value["updated_at"].is_string());
    }

    #[test]
    fn running_record_omits_result() {
        let record = StatusRecord {
            run_id: "run_2",
            status: RunStatus::Running,
            updated_at: Utc::now(),
            result: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "running");
        assert!(value.get("result").is_none());
    }
}
