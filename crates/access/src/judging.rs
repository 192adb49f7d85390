//! Judge records: one row per judged submission plus its source code.
//!
//! The row is inserted first and the code written second; if the code
//! cannot be stored the row is deleted again, so every visible record has
//! its code on disk.

use phoenix_core::error::{PhoenixError, PhoenixResult};
use phoenix_core::{Attempt, JudgeRecord, RecordId, ResourceId, UserId, Verdict};
use phoenix_store::{ArtifactStore, Table};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct JudgeLog {
    records: Arc<dyn Table<JudgeRecord>>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl JudgeLog {
    pub fn new(records: Arc<dyn Table<JudgeRecord>>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { records, artifacts }
    }

    /// Stores a verdict for `user` on `problem` together with the judged code.
    pub async fn submit(
        &self,
        problem: ResourceId,
        user: UserId,
        verdict: Verdict,
        language: &str,
        code: &[u8],
    ) -> PhoenixResult<JudgeRecord> {
        let language = language.trim();
        if language.is_empty() {
            return Err(PhoenixError::InvalidInput("language must not be empty".into()));
        }

        let record = JudgeRecord {
            id: RecordId(self.records.next_id().await?),
            problem_id: problem,
            user_id: user,
            verdict,
            language: language.to_string(),
            submitted_at: unix_now(),
        };
        self.records.insert(record.clone()).await?;

        if let Err(e) = self.artifacts.put_code(&record, code).await {
            tracing::warn!(
                record_id = %record.id,
                problem_id = %problem,
                error = %e,
                "code write failed, deleting record"
            );
            if let Err(undo) = self.records.delete(&record.id).await {
                tracing::error!(
                    record_id = %record.id,
                    error = %undo,
                    "compensating delete failed"
                );
            }
            return Err(PhoenixError::StorageFailure(format!(
                "saving code of record {}: {e}",
                record.id
            )));
        }

        tracing::info!(
            record_id = %record.id,
            problem_id = %problem,
            user_id = %user,
            %verdict,
            "judge record stored"
        );
        Ok(record)
    }

    /// `user`'s records on `problem`, oldest first.
    pub async fn history(
        &self,
        problem: ResourceId,
        user: UserId,
    ) -> PhoenixResult<Vec<JudgeRecord>> {
        Ok(self
            .records
            .scan()
            .await?
            .into_iter()
            .filter(|r| r.problem_id == problem && r.user_id == user)
            .collect())
    }

    pub async fn attempt(&self, problem: ResourceId, user: UserId) -> PhoenixResult<Attempt> {
        Ok(Attempt::of(&self.history(problem, user).await?))
    }

    /// `user`'s result on every problem they have a record for.
    pub async fn attempts(&self, user: UserId) -> PhoenixResult<HashMap<ResourceId, Attempt>> {
        let mut attempts = HashMap::new();
        for record in self.records.scan().await? {
            if record.user_id != user {
                continue;
            }
            let entry = attempts.entry(record.problem_id).or_insert(Attempt::Untried);
            *entry = match (*entry, record.verdict) {
                (Attempt::Solved, _) | (_, Verdict::Accepted) => Attempt::Solved,
                _ => Attempt::Unsolved,
            };
        }
        Ok(attempts)
    }

    pub async fn record(&self, id: RecordId) -> PhoenixResult<JudgeRecord> {
        self.records
            .get(&id)
            .await?
            .ok_or_else(|| PhoenixError::NotFound(format!("judge record {id}")))
    }

    pub async fn code(&self, record: &JudgeRecord) -> PhoenixResult<Vec<u8>> {
        self.artifacts.get_code(record).await
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
