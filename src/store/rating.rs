use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Accumulated score of one laptop.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rating {
    /// Number of scores received.
    pub count: u32,
    /// Sum of all scores received.
    pub sum: f64,
}

impl Rating {
    /// Mean score, or `0.0` before any score has been recorded.
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / f64::from(self.count)
    }
}

/// Per-laptop running rating totals.
#[derive(Default)]
pub struct RatingStore {
    ratings: Arc<RwLock<HashMap<String, Rating>>>,
}

impl Clone for RatingStore {
    fn clone(&self) -> Self {
        Self {
            ratings: Arc::clone(&self.ratings),
        }
    }
}

impl RatingStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `score` for `laptop_id` and returns the updated totals.
    ///
    /// The increment and the read-back happen under one write lock, so each
    /// caller sees the totals including its own score.
    pub async fn add(&self, laptop_id: &str, score: f64) -> Rating {
        let mut ratings = self.ratings.write().await;
        let rating = ratings.entry(laptop_id.to_string()).or_default();
        rating.count = rating.count.saturating_add(1);
        rating.sum += score;
        *rating
    }

    /// Current totals for `laptop_id`.
    pub async fn get(&self, laptop_id: &str) -> Option<Rating> {
        self.ratings.read().await.get(laptop_id).copied()
    }
}
