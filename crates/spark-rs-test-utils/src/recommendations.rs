use async_trait::async_trait;
use parking_lot::Mutex;
use spark_rs_core::{RecommendationSource, SparkCoreError};
use spark_rs_store::SparkCandidate;

/// Recommendation source that records milestones and returns a fixed candidate.
#[derive(Debug, Default)]
pub struct RecordingRecommendations {
    calls: Mutex<Vec<(String, u64)>>,
    fail: bool,
}

impl RecordingRecommendations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source whose lookups always fail.
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<(String, u64)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RecommendationSource for RecordingRecommendations {
    async fn recommend(
        &self,
        user_id: &str,
        milestone: u64,
    ) -> Result<Option<SparkCandidate>, SparkCoreError> {
        self.calls.lock().push((user_id.to_string(), milestone));
        if self.fail {
            return Err(SparkCoreError::Recommendation(
                "lookup unavailable".to_string(),
            ));
        }
        Ok(Some(SparkCandidate {
            content: format!("Recommended after {milestone} favourites."),
            details: "Picked from the reactions you liked most.".to_string(),
            topic: "Culture".to_string(),
        }))
    }
}
