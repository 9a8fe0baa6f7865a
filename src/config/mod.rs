use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub content: ContentConfig,
    pub collaborative: CollaborativeConfig,
    pub hybrid: HybridConfig,
    pub bandit: BanditConfig,
    pub reward: RewardConfig,
    pub popularity: PopularityConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Weight of the category-overlap term in the blended content score.
    pub category_weight: f64,
    /// Weight of the text-similarity term.
    pub text_weight: f64,
    /// Multiplier applied to the category block of the feature vector so
    /// categories outweigh individual text terms.
    pub category_boost: f32,
    /// Vocabulary cap for the text vectorizer.
    pub max_text_features: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborativeConfig {
    /// Requested factorization rank; clamped to the matrix shape and reduced
    /// further for very sparse matrices.
    pub rank: usize,
    pub max_iterations: usize,
    /// Matrices emptier than this fraction get the reduced rank.
    pub sparsity_threshold: f64,
    /// Rank cap applied above the sparsity threshold.
    pub sparse_rank_cap: usize,
    pub min_ratings: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    pub content_weight: f64,
    pub collaborative_weight: f64,
    /// Over-fetch multiplier giving the MMR reranker room to diversify.
    pub candidate_multiplier: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditConfig {
    /// Number of discrete trade-off arms spanning [0, 1].
    pub n_arms: usize,
    /// Exploration constant `c` in the UCB bonus.
    pub exploration: f64,
    /// Trade-off returned for out-of-range arm indices.
    pub default_trade_off: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    pub ndcg_weight: f64,
    pub diversity_weight: f64,
    pub novelty_weight: f64,
    /// Assumed maximum raw novelty, used to normalize into [0, 1].
    pub max_novelty: f64,
    /// Popularity counter value treated as "fully popular".
    pub popularity_scale: f64,
    pub ndcg_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularityConfig {
    /// Items untouched for longer than this fall out of the trending list.
    pub recency_window_hours: i64,
    /// How long a computed trending list stays valid.
    pub trending_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            content: ContentConfig {
                category_weight: 0.7,
                text_weight: 0.3,
                category_boost: 2.0,
                max_text_features: 1000,
            },
            collaborative: CollaborativeConfig {
                rank: 50,
                max_iterations: 200,
                sparsity_threshold: 0.99,
                sparse_rank_cap: 8,
                min_ratings: 10,
                seed: 42,
            },
            hybrid: HybridConfig {
                content_weight: 0.6,
                collaborative_weight: 0.4,
                candidate_multiplier: 3,
            },
            bandit: BanditConfig {
                n_arms: 11,
                exploration: 2.0,
                default_trade_off: 0.5,
            },
            reward: RewardConfig {
                ndcg_weight: 0.5,
                diversity_weight: 0.3,
                novelty_weight: 0.2,
                max_novelty: 3.0,
                popularity_scale: 1000.0,
                ndcg_k: 10,
            },
            popularity: PopularityConfig {
                recency_window_hours: 24,
                trending_ttl_secs: 3600,
            },
            store: StoreConfig {
                data_dir: PathBuf::from("data"),
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("DESTREC"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let config = Config::default();
        let hybrid = config.hybrid.content_weight + config.hybrid.collaborative_weight;
        assert!((hybrid - 1.0).abs() < 1e-9);
        let reward = config.reward.ndcg_weight
            + config.reward.diversity_weight
            + config.reward.novelty_weight;
        assert!((reward - 1.0).abs() < 1e-9);
    }
}
