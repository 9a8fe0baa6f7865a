use crate::config::BanditConfig;
use crate::context::RecommendationContext;
use crate::error::Result;
use crate::models::BanditArmState;
use crate::store::StateStore;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const NAMESPACE: &str = "bandit";

/// Contextual UCB1 bandit selecting the MMR trade-off per situational
/// context.
///
/// One `BanditArmState` per canonical context key, created lazily and
/// persisted write-through on creation and after every reward: convergence
/// is sensitive to lost updates, so durability wins over throughput here.
/// Entry guards serialize updates per context; different contexts update in
/// parallel.
pub struct ContextualBandit {
    arms: Vec<f64>,
    exploration: f64,
    default_trade_off: f64,
    contexts: DashMap<String, BanditArmState>,
    store: Arc<dyn StateStore>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmStatistics {
    pub arm_index: usize,
    pub trade_off: f64,
    pub pulls: u64,
    pub avg_reward: f64,
    pub pull_share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextStatistics {
    pub total_pulls: u64,
    pub best_arm: Option<usize>,
    pub best_trade_off: Option<f64>,
    pub best_avg_reward: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditStatistics {
    pub total_contexts: usize,
    pub total_pulls: u64,
    pub arms: Vec<ArmStatistics>,
    pub contexts: HashMap<String, ContextStatistics>,
}

impl ContextualBandit {
    pub fn new(config: BanditConfig, store: Arc<dyn StateStore>) -> Result<Self> {
        let n_arms = config.n_arms.max(2);
        let arms: Vec<f64> = (0..n_arms)
            .map(|i| i as f64 / (n_arms - 1) as f64)
            .collect();

        let contexts = DashMap::new();
        for (key, bytes) in store.scan(NAMESPACE)? {
            let state: BanditArmState = serde_json::from_slice(&bytes)?;
            // Entries from an older arm grid cannot be mapped onto this one.
            if state.counts.len() == n_arms {
                contexts.insert(key, state);
            } else {
                warn!(context = %key, "discarding bandit state with mismatched arm count");
            }
        }
        if !contexts.is_empty() {
            info!(contexts = contexts.len(), "bandit state loaded");
        }

        Ok(Self {
            arms,
            exploration: config.exploration,
            default_trade_off: config.default_trade_off,
            contexts,
            store,
        })
    }

    pub fn n_arms(&self) -> usize {
        self.arms.len()
    }

    /// Trade-off value behind an arm. Out-of-range indices resolve to the
    /// documented default rather than failing: callers may legitimately
    /// race with a reset.
    pub fn trade_off_value(&self, arm_index: usize) -> f64 {
        self.arms
            .get(arm_index)
            .copied()
            .unwrap_or(self.default_trade_off)
    }

    /// Pick an arm for this context with UCB1.
    ///
    /// A never-seen context starts at the middle arm (deterministic, biased
    /// toward neither extreme); any arm with zero pulls is tried before the
    /// confidence bound applies; UCB ties resolve to the lowest index.
    pub fn select_arm(&self, context: &RecommendationContext) -> Result<usize> {
        let key = context.context_key();

        let entry = self.contexts.entry(key.clone());
        let state = match entry {
            dashmap::mapref::entry::Entry::Occupied(occupied) => occupied.into_ref(),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                info!(context = %key, "new bandit context");
                let state = BanditArmState::new(self.arms.len());
                self.persist(&key, &state)?;
                vacant.insert(state)
            }
        };

        if state.total_pulls == 0 {
            return Ok(self.arms.len() / 2);
        }

        if let Some(unexplored) = state.counts.iter().position(|&count| count == 0) {
            debug!(context = %key, arm = unexplored, "exploring untried arm");
            return Ok(unexplored);
        }

        let total = state.total_pulls as f64;
        let mut best_arm = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (arm, (&count, &avg)) in state
            .counts
            .iter()
            .zip(state.avg_rewards.iter())
            .enumerate()
        {
            let bonus = self.exploration * (2.0 * total.ln() / count as f64).sqrt();
            let score = avg + bonus;
            // Strict comparison keeps ties at the lowest index.
            if score > best_score {
                best_score = score;
                best_arm = arm;
            }
        }
        debug!(context = %key, arm = best_arm, trade_off = self.arms[best_arm], "ucb selection");
        Ok(best_arm)
    }

    /// Fold one observed reward into the arm's running average and commit
    /// the context's state before returning. Out-of-range arm indices are
    /// dropped with a warning, not an error.
    pub fn update_reward(
        &self,
        arm_index: usize,
        reward: f64,
        context: &RecommendationContext,
    ) -> Result<()> {
        if arm_index >= self.arms.len() {
            warn!(arm_index, "reward for out-of-range arm dropped");
            return Ok(());
        }

        let key = context.context_key();
        let mut state = self
            .contexts
            .entry(key.clone())
            .or_insert_with(|| BanditArmState::new(self.arms.len()));
        state.record(arm_index, reward);
        // Write-through while the entry guard is held, so per-context
        // read-modify-write-persist is one atomic step.
        self.persist(&key, state.value())?;
        debug!(
            context = %key,
            arm = arm_index,
            reward,
            avg = state.avg_rewards[arm_index],
            "bandit reward recorded"
        );
        Ok(())
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn total_pulls(&self) -> u64 {
        self.contexts.iter().map(|entry| entry.total_pulls).sum()
    }

    pub fn context_state(&self, context: &RecommendationContext) -> Option<BanditArmState> {
        self.contexts
            .get(&context.context_key())
            .map(|state| state.clone())
    }

    /// Aggregate pull/reward statistics across all contexts plus a
    /// per-context best-arm breakdown.
    pub fn statistics(&self) -> BanditStatistics {
        let n = self.arms.len();
        let mut pulls = vec![0u64; n];
        let mut reward_sums = vec![0.0f64; n];
        let mut contexts = HashMap::new();

        for entry in self.contexts.iter() {
            for arm in 0..n {
                pulls[arm] += entry.counts[arm];
                reward_sums[arm] += entry.avg_rewards[arm] * entry.counts[arm] as f64;
            }

            let best = entry
                .counts
                .iter()
                .zip(entry.avg_rewards.iter())
                .enumerate()
                .filter(|(_, (&count, _))| count > 0)
                .max_by(|a, b| {
                    a.1 .1.partial_cmp(b.1 .1).unwrap_or(std::cmp::Ordering::Equal)
                });
            contexts.insert(
                entry.key().clone(),
                ContextStatistics {
                    total_pulls: entry.total_pulls,
                    best_arm: best.map(|(arm, _)| arm),
                    best_trade_off: best.map(|(arm, _)| self.arms[arm]),
                    best_avg_reward: best.map(|(_, (_, &avg))| avg).unwrap_or(0.0),
                },
            );
        }

        let total_pulls: u64 = pulls.iter().sum();
        let arms = (0..n)
            .map(|arm| ArmStatistics {
                arm_index: arm,
                trade_off: self.arms[arm],
                pulls: pulls[arm],
                avg_reward: if pulls[arm] > 0 {
                    reward_sums[arm] / pulls[arm] as f64
                } else {
                    0.0
                },
                pull_share: if total_pulls > 0 {
                    pulls[arm] as f64 / total_pulls as f64
                } else {
                    0.0
                },
            })
            .collect();

        BanditStatistics {
            total_contexts: self.contexts.len(),
            total_pulls,
            arms,
            contexts,
        }
    }

    /// Drop every context's exploration history, durably.
    pub fn reset(&self) -> Result<()> {
        self.contexts.clear();
        self.store.clear(NAMESPACE)?;
        info!("bandit state reset");
        Ok(())
    }

    fn persist(&self, key: &str, state: &BanditArmState) -> Result<()> {
        self.store.put(NAMESPACE, key, &serde_json::to_vec(state)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn bandit_with(n_arms: usize) -> ContextualBandit {
        let config = BanditConfig {
            n_arms,
            exploration: 2.0,
            default_trade_off: 0.5,
        };
        ContextualBandit::new(config, Arc::new(MemoryStore::new())).unwrap()
    }

    fn context(weather: &str) -> RecommendationContext {
        RecommendationContext {
            weather: weather.to_string(),
            ..RecommendationContext::default()
        }
    }

    #[test]
    fn cold_context_starts_at_middle_arm() {
        let bandit = bandit_with(11);
        let arm = bandit.select_arm(&context("sunny")).unwrap();
        assert_eq!(arm, 5);
        assert!((bandit.trade_off_value(arm) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn unexplored_arms_take_priority() {
        let bandit = bandit_with(5);
        let ctx = context("rain");
        let first = bandit.select_arm(&ctx).unwrap();
        bandit.update_reward(first, 0.9, &ctx).unwrap();
        // Arms 0..n with zero pulls come next, lowest index first.
        assert_eq!(bandit.select_arm(&ctx).unwrap(), 0);
    }

    #[test]
    fn ucb_prefers_higher_average_when_counts_match() {
        let bandit = bandit_with(3);
        let ctx = context("cloudy");
        bandit.update_reward(0, 0.1, &ctx).unwrap();
        bandit.update_reward(1, 0.9, &ctx).unwrap();
        bandit.update_reward(2, 0.2, &ctx).unwrap();
        // Equal exploration bonus everywhere, so the average decides.
        assert_eq!(bandit.select_arm(&ctx).unwrap(), 1);
    }

    #[test]
    fn out_of_range_updates_are_benign() {
        let bandit = bandit_with(5);
        let ctx = context("sunny");
        bandit.update_reward(99, 1.0, &ctx).unwrap();
        assert_eq!(bandit.total_pulls(), 0);
        assert!((bandit.trade_off_value(99) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn one_state_per_new_context_with_consistent_counts() {
        let bandit = bandit_with(5);
        for i in 0..4 {
            let ctx = context(&format!("weather-{}", i));
            let arm = bandit.select_arm(&ctx).unwrap();
            bandit.update_reward(arm, 0.5, &ctx).unwrap();
            bandit.update_reward(arm, 0.7, &ctx).unwrap();
        }
        assert_eq!(bandit.context_count(), 4);
        for i in 0..4 {
            let state = bandit.context_state(&context(&format!("weather-{}", i))).unwrap();
            assert_eq!(state.counts.iter().sum::<u64>(), 2);
            assert_eq!(state.total_pulls, 2);
        }
    }

    #[test]
    fn state_round_trips_through_store() {
        let store = Arc::new(MemoryStore::new());
        let config = BanditConfig {
            n_arms: 7,
            exploration: 2.0,
            default_trade_off: 0.5,
        };

        let populated = ContextualBandit::new(config.clone(), store.clone()).unwrap();
        let busy = context("storm");
        let idle = context("haze");
        populated.update_reward(3, 0.8, &busy).unwrap();
        populated.update_reward(3, 0.4, &busy).unwrap();
        populated.update_reward(6, 0.1, &busy).unwrap();
        // Context created by selection only: zero pulls, still persisted.
        populated.select_arm(&idle).unwrap();

        let reloaded = ContextualBandit::new(config, store).unwrap();
        assert_eq!(reloaded.context_count(), 2);
        assert_eq!(
            reloaded.context_state(&busy).unwrap(),
            populated.context_state(&busy).unwrap()
        );
        assert_eq!(reloaded.context_state(&idle).unwrap().total_pulls, 0);
    }

    #[test]
    fn reset_clears_all_contexts() {
        let store = Arc::new(MemoryStore::new());
        let config = BanditConfig {
            n_arms: 5,
            exploration: 2.0,
            default_trade_off: 0.5,
        };
        let bandit = ContextualBandit::new(config.clone(), store.clone()).unwrap();
        bandit.update_reward(1, 0.9, &context("sunny")).unwrap();
        bandit.reset().unwrap();
        assert_eq!(bandit.context_count(), 0);

        let reloaded = ContextualBandit::new(config, store).unwrap();
        assert_eq!(reloaded.context_count(), 0);
    }
}
