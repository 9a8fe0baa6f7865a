pub mod bandit;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod hybrid;
pub mod models;
pub mod popularity;
pub mod reward;
pub mod scorers;
pub mod store;
pub mod utils;

pub use bandit::{BanditStatistics, ContextualBandit};
pub use config::Config;
pub use context::RecommendationContext;
pub use engine::RecommendationEngine;
pub use error::{EngineError, Result};
pub use hybrid::HybridRecommender;
pub use models::*;
pub use popularity::PopularityTracker;
pub use reward::{RewardBreakdown, RewardCalculator};
pub use scorers::{CollaborativeScorer, ContentScorer, Recommender, TrainingData};
pub use store::{JsonFileStore, MemoryStore, StateStore};

pub async fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
