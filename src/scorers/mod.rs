pub mod collaborative;
pub mod content;

pub use collaborative::CollaborativeScorer;
pub use content::ContentScorer;

use crate::error::Result;
use crate::models::*;

/// Everything a scorer may train from. Each implementation reads the slice
/// it cares about; inputs are assumed already materialized by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrainingData<'a> {
    pub catalog: &'a [CatalogItem],
    pub ratings: &'a [RatingRecord],
}

impl<'a> TrainingData<'a> {
    pub fn new(catalog: &'a [CatalogItem], ratings: &'a [RatingRecord]) -> Self {
        Self { catalog, ratings }
    }
}

/// Common surface of the two base scorers. The hybrid combiner depends on
/// this trait only, never on the concrete models.
///
/// Training replaces the model snapshot atomically: concurrent `predict`
/// calls keep reading the previous complete snapshot until the swap, and a
/// failed retrain leaves it untouched.
#[async_trait::async_trait]
pub trait Recommender: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_trained(&self) -> bool;

    async fn train(&self, data: TrainingData<'_>) -> Result<TrainingSummary>;

    /// Up to `count` candidates, best first. Unseen users take documented
    /// fallback paths instead of failing.
    async fn predict(&self, user: &UserProfile, count: usize) -> Result<Vec<ScoredItem>>;

    /// Human-readable justification for recommending `item_id` to this user.
    async fn explain(&self, user: &UserProfile, item_id: ItemId) -> Result<String>;
}
