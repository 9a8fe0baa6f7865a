use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ItemId = i64;

/// One catalog entry as supplied by the (external) catalog store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: ItemId,
    pub name: String,
    pub description: String,
    pub categories: Vec<String>,
}

impl CatalogItem {
    pub fn new(id: ItemId, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            categories: Vec::new(),
        }
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    /// Primary category used for diversity accounting; "other" when untagged.
    pub fn primary_category(&self) -> &str {
        self.categories.first().map(String::as_str).unwrap_or("other")
    }
}

/// One explicit rating row. Timestamps may be absent in imported history;
/// duplicate resolution handles both shapes (latest wins, else averaged).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingRecord {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub rating: f32,
    pub timestamp: Option<DateTime<Utc>>,
}

impl RatingRecord {
    pub fn new(user_id: UserId, item_id: ItemId, rating: f32) -> Self {
        Self {
            user_id,
            item_id,
            rating,
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    View,
    Click,
    Favorite,
    Review,
    Rating,
}

impl InteractionType {
    /// Fixed accumulation weight per event kind.
    pub fn weight(self) -> f64 {
        match self {
            InteractionType::View => 0.1,
            InteractionType::Click => 0.3,
            InteractionType::Favorite => 0.5,
            InteractionType::Review => 0.7,
            InteractionType::Rating => 1.0,
        }
    }
}

/// A live interaction event feeding the popularity tracker. `user_id` is
/// nullable because anonymous views and clicks are still counted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub user_id: Option<UserId>,
    pub item_id: ItemId,
    pub interaction_type: InteractionType,
    pub rating: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

impl InteractionEvent {
    pub fn new(item_id: ItemId, interaction_type: InteractionType) -> Self {
        Self {
            user_id: None,
            item_id,
            interaction_type,
            rating: None,
            timestamp: Utc::now(),
        }
    }

    pub fn by_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_rating(mut self, rating: f32) -> Self {
        self.rating = Some(rating);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub preferences: Vec<String>,
}

impl UserProfile {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            preferences: Vec::new(),
        }
    }

    pub fn with_preferences(mut self, preferences: Vec<String>) -> Self {
        self.preferences = preferences;
        self
    }
}

/// Which scoring path produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Content,
    Collaborative,
    Hybrid,
    Popular,
}

/// Transient per-prediction candidate; discarded after the response is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: ItemId,
    pub score: f64,
    pub provenance: Provenance,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub user_id: UserId,
    pub items: Vec<ScoredItem>,
    /// Bandit arm behind this response, for downstream reward attribution.
    /// `None` when the bandit was bypassed (fixed trade-off requests).
    pub arm_index: Option<usize>,
    pub trade_off: f64,
    pub context_key: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// Per-context UCB bookkeeping: one slot per discrete trade-off arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditArmState {
    pub counts: Vec<u64>,
    pub avg_rewards: Vec<f64>,
    pub total_pulls: u64,
}

impl BanditArmState {
    pub fn new(n_arms: usize) -> Self {
        Self {
            counts: vec![0; n_arms],
            avg_rewards: vec![0.0; n_arms],
            total_pulls: 0,
        }
    }

    /// Record one observed reward with an incremental running-average update.
    pub fn record(&mut self, arm_index: usize, reward: f64) {
        self.counts[arm_index] += 1;
        let n = self.counts[arm_index] as f64;
        let old = self.avg_rewards[arm_index];
        self.avg_rewards[arm_index] = old + (reward - old) / n;
        self.total_pulls += 1;
    }
}

/// Incrementally maintained interaction counters for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularityRecord {
    pub item_id: ItemId,
    pub view_count: u64,
    pub click_count: u64,
    pub favorite_count: u64,
    pub review_count: u64,
    pub rating_count: u64,
    pub interaction_count: u64,
    pub total_score: f64,
    pub avg_rating: f64,
    pub popularity_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl PopularityRecord {
    pub fn new(item_id: ItemId, now: DateTime<Utc>) -> Self {
        Self {
            item_id,
            view_count: 0,
            click_count: 0,
            favorite_count: 0,
            review_count: 0,
            rating_count: 0,
            interaction_count: 0,
            total_score: 0.0,
            avg_rating: 0.0,
            popularity_score: 0.0,
            last_updated: now,
        }
    }

    /// Fold one event into the counters and rederive the popularity score.
    pub fn apply(&mut self, event: &InteractionEvent) {
        self.interaction_count += 1;
        self.total_score += event.interaction_type.weight();

        match event.interaction_type {
            InteractionType::View => self.view_count += 1,
            InteractionType::Click => self.click_count += 1,
            InteractionType::Favorite => self.favorite_count += 1,
            InteractionType::Review => self.review_count += 1,
            InteractionType::Rating => {
                if let Some(rating) = event.rating {
                    self.rating_count += 1;
                    let n = self.rating_count as f64;
                    self.avg_rating += (rating as f64 - self.avg_rating) / n;
                }
            }
        }

        // Ratings dominate the derived score; raw volume comes second.
        self.popularity_score =
            self.total_score + 2.0 * self.avg_rating + 0.5 * self.rating_count as f64;
        self.last_updated = event.timestamp;
    }
}

/// Outcome of training one sub-model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingOutcome {
    Trained(TrainingSummary),
    Failed { error: String },
}

impl TrainingOutcome {
    pub fn is_trained(&self) -> bool {
        matches!(self, TrainingOutcome::Trained(_))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub items: usize,
    pub users: usize,
    pub ratings: usize,
}

/// Partial-failure-tolerant training report: the engine is usable as long
/// as at least one scorer came up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub content: TrainingOutcome,
    pub collaborative: TrainingOutcome,
}

impl TrainingReport {
    pub fn trained(&self) -> bool {
        self.content.is_trained() || self.collaborative.is_trained()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub content_trained: bool,
    pub collaborative_trained: bool,
    pub tracked_items: usize,
    pub bandit_contexts: usize,
    pub bandit_total_pulls: u64,
}
