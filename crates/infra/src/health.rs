//! Per-pipeline health records, written after every sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::Document;

use crate::store::{Collection, DocumentStore, StoreError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineKind {
    #[serde(rename = "events")]
    Events,
    #[serde(rename = "emailJobs")]
    EmailJobs,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 2] = [PipelineKind::Events, PipelineKind::EmailJobs];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Events => "events",
            PipelineKind::EmailJobs => "emailJobs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineHealth {
    pub id: PipelineKind,
    pub last_run_at: DateTime<Utc>,
    pub scanned_count: usize,
    pub processed_count: usize,
    pub errors_count: usize,
    pub last_error: Option<String>,
    pub duration_ms: u64,
}

impl Document for PipelineHealth {
    const COLLECTION: &'static str = "pipelineHealth";

    fn document_id(&self) -> String {
        self.id.as_str().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct HealthRecorder {
    records: Collection<PipelineHealth>,
}

impl HealthRecorder {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            records: Collection::new(store),
        }
    }

    pub async fn write(&self, health: &PipelineHealth) -> Result<(), StoreError> {
        self.records.put(health).await
    }

    pub async fn get(&self, pipeline: PipelineKind) -> Result<Option<PipelineHealth>, StoreError> {
        self.records.get(pipeline.as_str()).await
    }

    /// Both records, in `PipelineKind::ALL` order, skipping pipelines that never ran.
    pub async fn all(&self) -> Result<Vec<PipelineHealth>, StoreError> {
        let mut out = Vec::with_capacity(PipelineKind::ALL.len());
        for pipeline in PipelineKind::ALL {
            if let Some(health) = self.get(pipeline).await? {
                out.push(health);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;

    #[tokio::test]
    async fn latest_write_wins() {
        let recorder = HealthRecorder::new(Arc::new(InMemoryDocumentStore::new()));
        let mut health = PipelineHealth {
            id: PipelineKind::EmailJobs,
            last_run_at: Utc::now(),
            scanned_count: 3,
            processed_count: 2,
            errors_count: 1,
            last_error: None,
            duration_ms: 12,
        };
        recorder.write(&health).await.unwrap();
        health.scanned_count = 0;
        health.last_error = Some("store unavailable".into());
        recorder.write(&health).await.unwrap();

        let stored = recorder.get(PipelineKind::EmailJobs).await.unwrap().unwrap();
        assert_eq!(stored, health);
        assert_eq!(recorder.all().await.unwrap().len(), 1);
        assert_eq!(
            serde_json::to_value(&stored).unwrap()["id"],
            serde_json::json!("emailJobs")
        );
    }
}
