//! Historical feature vectors for training.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;
use vigil_types::{FeatureVector, SeriesKey};

use crate::error::HistoryResult;

/// Storage of scored windows' feature vectors, read by training.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append the vector of a sealed window.
    async fn append(&self, vector: FeatureVector) -> HistoryResult<()>;

    /// The most recent `limit` vectors of `series`, oldest first.
    async fn recent(&self, series: &SeriesKey, limit: usize) -> HistoryResult<Vec<FeatureVector>>;

    /// Number of stored vectors for `series`.
    async fn len(&self, series: &SeriesKey) -> HistoryResult<usize>;
}

/// In-memory history bounded per series.
#[derive(Debug)]
pub struct InMemoryHistory {
    capacity: usize,
    vectors: RwLock<HashMap<SeriesKey, VecDeque<FeatureVector>>>,
}

impl InMemoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            vectors: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn append(&self, vector: FeatureVector) -> HistoryResult<()> {
        let mut vectors = self.vectors.write().await;
        let series = vectors.entry(vector.series.clone()).or_default();
        if series.len() == self.capacity {
            series.pop_front();
        }
        series.push_back(vector);
        Ok(())
    }

    async fn recent(&self, series: &SeriesKey, limit: usize) -> HistoryResult<Vec<FeatureVector>> {
        let vectors = self.vectors.read().await;
        Ok(vectors
            .get(series)
            .map(|v| {
                let skip = v.len().saturating_sub(limit);
                v.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default())
    }

    async fn len(&self, series: &SeriesKey) -> HistoryResult<usize> {
        Ok(self.vectors.read().await.get(series).map_or(0, VecDeque::len))
    }
}
