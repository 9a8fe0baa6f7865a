use crate::bandit::{BanditStatistics, ContextualBandit};
use crate::config::Config;
use crate::context::RecommendationContext;
use crate::error::Result;
use crate::hybrid::HybridRecommender;
use crate::models::*;
use crate::popularity::PopularityTracker;
use crate::reward::{RewardBreakdown, RewardCalculator};
use crate::scorers::{CollaborativeScorer, ContentScorer, Recommender, TrainingData};
use crate::store::{JsonFileStore, StateStore};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// The recommendation engine: one explicitly constructed object owning all
/// components. Callers hold it behind an `Arc` and share it freely; every
/// method takes `&self`.
pub struct RecommendationEngine {
    config: Config,
    content: Arc<ContentScorer>,
    collaborative: Arc<CollaborativeScorer>,
    hybrid: HybridRecommender,
    popularity: Arc<PopularityTracker>,
    bandit: ContextualBandit,
    reward: RewardCalculator,
    catalog: RwLock<HashMap<ItemId, CatalogItem>>,
}

impl RecommendationEngine {
    /// Engine backed by the on-disk JSON store under `config.store.data_dir`.
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(JsonFileStore::new(&config.store.data_dir)?);
        Self::with_store(config, store)
    }

    /// Engine over any state store. Persistent bandit and popularity state
    /// is loaded here, before the engine serves anything.
    pub fn with_store(config: Config, store: Arc<dyn StateStore>) -> Result<Self> {
        let content = Arc::new(ContentScorer::new(config.content.clone()));
        let collaborative = Arc::new(CollaborativeScorer::new(config.collaborative.clone()));
        let popularity = Arc::new(PopularityTracker::new(
            config.popularity.clone(),
            store.clone(),
        )?);
        let hybrid = HybridRecommender::new(
            config.hybrid.clone(),
            content.clone(),
            collaborative.clone(),
            popularity.clone(),
        );
        let bandit = ContextualBandit::new(config.bandit.clone(), store)?;
        let reward = RewardCalculator::new(config.reward.clone());

        Ok(Self {
            config,
            content,
            collaborative,
            hybrid,
            popularity,
            bandit,
            reward,
            catalog: RwLock::new(HashMap::new()),
        })
    }

    /// Retrain both scorers from a fresh data snapshot. Serving continues
    /// on the previous models until each scorer swaps its snapshot in; a
    /// scorer that fails keeps its old model and is reported, not raised.
    #[instrument(skip_all, fields(items = catalog.len(), ratings = ratings.len()))]
    pub async fn train(
        &self,
        catalog: &[CatalogItem],
        ratings: &[RatingRecord],
    ) -> TrainingReport {
        let report = self.hybrid.train(TrainingData::new(catalog, ratings)).await;
        // The catalog snapshot backs reward evaluation and explanations.
        *self.catalog.write() = catalog.iter().map(|item| (item.id, item.clone())).collect();
        info!(
            content = report.content.is_trained(),
            collaborative = report.collaborative.is_trained(),
            "training pass finished"
        );
        report
    }

    /// Serve recommendations with the bandit choosing the diversity
    /// trade-off for this context. The chosen arm rides along in the
    /// response so the eventual reward can be attributed back.
    pub async fn recommend(
        &self,
        user: &UserProfile,
        count: usize,
        context: &RecommendationContext,
    ) -> Result<RecommendationResponse> {
        let arm_index = self.bandit.select_arm(context)?;
        let trade_off = self.bandit.trade_off_value(arm_index);
        let items = self.hybrid.predict(user, count, trade_off).await?;
        Ok(RecommendationResponse {
            user_id: user.user_id,
            items,
            arm_index: Some(arm_index),
            trade_off,
            context_key: Some(context.context_key()),
            generated_at: Utc::now(),
        })
    }

    /// Serve recommendations at a caller-fixed trade-off, bypassing the
    /// bandit. No arm is attached, so this path never feeds learning.
    pub async fn recommend_with_trade_off(
        &self,
        user: &UserProfile,
        count: usize,
        trade_off: f64,
    ) -> Result<RecommendationResponse> {
        let trade_off = trade_off.clamp(0.0, 1.0);
        let items = self.hybrid.predict(user, count, trade_off).await?;
        Ok(RecommendationResponse {
            user_id: user.user_id,
            items,
            arm_index: None,
            trade_off,
            context_key: None,
            generated_at: Utc::now(),
        })
    }

    /// Unknown items degrade to the scorers' stock "no explanation
    /// available" messages, never a hard failure.
    pub async fn explain(&self, user: &UserProfile, item_id: ItemId) -> Result<String> {
        self.hybrid.explain(user, item_id).await
    }

    /// Feed one observed reward back to the bandit for the context it was
    /// served under.
    pub fn record_feedback(
        &self,
        arm_index: usize,
        reward: f64,
        context: &RecommendationContext,
    ) -> Result<()> {
        self.bandit.update_reward(arm_index, reward, context)
    }

    /// Score a served list against the user's subsequent feedback. Ratings
    /// and interaction counts are keyed by item; diversity comes from the
    /// current catalog snapshot, novelty from live popularity.
    pub fn evaluate_list(
        &self,
        recommended: &[ItemId],
        ratings: &HashMap<ItemId, f64>,
        interaction_counts: &HashMap<ItemId, u64>,
    ) -> RewardBreakdown {
        let catalog = self.catalog.read();
        self.reward.evaluate(recommended, &catalog, ratings, interaction_counts, |id| {
            self.popularity.popularity_score(id)
        })
    }

    /// Close the loop on one served response: compute its composite reward
    /// and, if the bandit picked the trade-off, learn from it.
    pub fn observe(
        &self,
        response: &RecommendationResponse,
        ratings: &HashMap<ItemId, f64>,
        interaction_counts: &HashMap<ItemId, u64>,
        context: &RecommendationContext,
    ) -> Result<RewardBreakdown> {
        let recommended: Vec<ItemId> = response.items.iter().map(|i| i.item_id).collect();
        let breakdown = self.evaluate_list(&recommended, ratings, interaction_counts);
        if let Some(arm_index) = response.arm_index {
            self.bandit
                .update_reward(arm_index, breakdown.composite, context)?;
        }
        Ok(breakdown)
    }

    pub fn record_interaction(&self, event: &InteractionEvent) -> Result<PopularityRecord> {
        self.popularity.record_event(event)
    }

    pub fn trending(&self, limit: usize) -> Vec<PopularityRecord> {
        self.popularity.trending(limit)
    }

    pub fn item_popularity(&self, item_id: ItemId) -> f64 {
        self.popularity.popularity_score(item_id)
    }

    pub fn bandit_statistics(&self) -> BanditStatistics {
        self.bandit.statistics()
    }

    pub fn reset_bandit(&self) -> Result<()> {
        self.bandit.reset()
    }

    /// Drop popularity records untouched since `cutoff`.
    pub fn prune_popularity(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.popularity.prune(cutoff)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            content_trained: self.content.is_trained(),
            collaborative_trained: self.collaborative.is_trained(),
            tracked_items: self.popularity.len(),
            bandit_contexts: self.bandit.context_count(),
            bandit_total_pulls: self.bandit.total_pulls(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
