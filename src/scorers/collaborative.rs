use crate::config::CollaborativeConfig;
use crate::error::{EngineError, Result};
use crate::models::*;
use crate::scorers::{Recommender, TrainingData};
use crate::utils::cosine_similarity;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

const NMF_EPS: f32 = 1e-9;

/// Latent-factor collaborative scorer: non-negative factorization of the
/// user-item rating matrix, rank adapted to matrix shape and sparsity.
pub struct CollaborativeScorer {
    config: CollaborativeConfig,
    model: RwLock<Option<Arc<CollaborativeModel>>>,
    trained: AtomicBool,
}

pub struct CollaborativeModel {
    user_ids: Vec<UserId>,
    item_ids: Vec<ItemId>,
    user_index: HashMap<UserId, usize>,
    item_index: HashMap<ItemId, usize>,
    ratings: Array2<f32>,
    user_factors: Array2<f32>,
    item_factors: Array2<f32>,
    /// (item, average rating) sorted descending, for the cold-start path.
    top_rated: Vec<(ItemId, f32)>,
}

/// Collapse duplicate (user, item) pairs before matrix construction.
///
/// Latest timestamp wins; within a fully timestamp-less group the ratings
/// are averaged. A timestamped rating always beats an untimestamped one.
/// First-encounter order of pairs is preserved so resolution is
/// deterministic for identical input streams.
pub fn resolve_duplicates(ratings: &[RatingRecord]) -> Vec<RatingRecord> {
    let mut order: Vec<(UserId, ItemId)> = Vec::new();
    let mut groups: HashMap<(UserId, ItemId), Vec<&RatingRecord>> = HashMap::new();

    for record in ratings {
        let key = (record.user_id, record.item_id);
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(record);
    }

    order
        .into_iter()
        .map(|key| {
            let group = &groups[&key];
            let newest = group
                .iter()
                .filter(|r| r.timestamp.is_some())
                .max_by_key(|r| r.timestamp);
            match newest {
                Some(winner) => (*winner).clone(),
                None => {
                    let sum: f32 = group.iter().map(|r| r.rating).sum();
                    let mut resolved = group[0].clone();
                    resolved.rating = sum / group.len() as f32;
                    resolved
                }
            }
        })
        .collect()
}

/// Multiplicative-update NMF: `v ≈ w · h` with all factors kept ≥ 0.
fn factorize(v: &Array2<f32>, rank: usize, max_iterations: usize, seed: u64) -> (Array2<f32>, Array2<f32>) {
    let (n, m) = v.dim();
    let mut rng = StdRng::seed_from_u64(seed);
    let mean = v.sum() / (n * m) as f32;
    let scale = (mean.max(NMF_EPS) / rank as f32).sqrt();

    let mut w = Array2::from_shape_fn((n, rank), |_| rng.gen::<f32>() * scale + NMF_EPS);
    let mut h = Array2::from_shape_fn((rank, m), |_| rng.gen::<f32>() * scale + NMF_EPS);

    let mut last_error = f32::INFINITY;
    for iteration in 0..max_iterations {
        // H <- H * (WᵀV) / (WᵀWH)
        let wt = w.t();
        let numerator = wt.dot(v);
        let denominator = wt.dot(&w).dot(&h) + NMF_EPS;
        h = &h * &(&numerator / &denominator);

        // W <- W * (VHᵀ) / (WHHᵀ)
        let ht = h.t();
        let numerator = v.dot(&ht);
        let denominator = w.dot(&h).dot(&ht) + NMF_EPS;
        w = &w * &(&numerator / &denominator);

        if iteration % 10 == 9 {
            let residual = v - &w.dot(&h);
            let error = residual.mapv(|x| x * x).sum().sqrt();
            if (last_error - error).abs() < 1e-4 * last_error.max(1.0) {
                debug!(iteration, error, "factorization converged early");
                break;
            }
            last_error = error;
        }
    }

    (w, h)
}

impl CollaborativeModel {
    fn build(ratings: &[RatingRecord], config: &CollaborativeConfig) -> Result<Self> {
        let resolved = resolve_duplicates(ratings);

        let mut user_ids: Vec<UserId> = resolved.iter().map(|r| r.user_id).collect();
        user_ids.sort_unstable();
        user_ids.dedup();
        let mut item_ids: Vec<ItemId> = resolved.iter().map(|r| r.item_id).collect();
        item_ids.sort_unstable();
        item_ids.dedup();

        if user_ids.len() < 2 || item_ids.len() < 2 {
            return Err(EngineError::Consistency(format!(
                "rating matrix degenerate after deduplication: {} users x {} items",
                user_ids.len(),
                item_ids.len()
            )));
        }

        let user_index: HashMap<UserId, usize> =
            user_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let item_index: HashMap<ItemId, usize> =
            item_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut matrix = Array2::<f32>::zeros((user_ids.len(), item_ids.len()));
        for record in &resolved {
            matrix[[user_index[&record.user_id], item_index[&record.item_id]]] = record.rating;
        }

        let cells = (user_ids.len() * item_ids.len()) as f64;
        let sparsity = 1.0 - resolved.len() as f64 / cells;

        // Rank is bounded by the matrix shape; very sparse matrices get a
        // further cap to keep the fit from degenerating.
        let mut rank = config
            .rank
            .min(user_ids.len() - 1)
            .min(item_ids.len() - 1)
            .max(1);
        if sparsity > config.sparsity_threshold {
            rank = rank.min(config.sparse_rank_cap);
        }

        let (user_factors, h) = factorize(&matrix, rank, config.max_iterations, config.seed);
        let item_factors = h.t().to_owned();

        // Per-item rating averages over observed entries only.
        let mut top_rated: Vec<(ItemId, f32)> = item_ids
            .iter()
            .enumerate()
            .filter_map(|(j, &item_id)| {
                let column = matrix.index_axis(Axis(1), j);
                let observed: Vec<f32> = column.iter().copied().filter(|&x| x > 0.0).collect();
                if observed.is_empty() {
                    None
                } else {
                    Some((item_id, observed.iter().sum::<f32>() / observed.len() as f32))
                }
            })
            .collect();
        top_rated.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(Self {
            user_ids,
            item_ids,
            user_index,
            item_index,
            ratings: matrix,
            user_factors,
            item_factors,
            top_rated,
        })
    }

    fn cold_start(&self, count: usize) -> Vec<ScoredItem> {
        self.top_rated
            .iter()
            .take(count)
            .map(|&(item_id, avg)| ScoredItem {
                item_id,
                score: avg as f64,
                provenance: Provenance::Popular,
                explanation: "highly rated overall (new user)".to_string(),
            })
            .collect()
    }

    fn similar_users(&self, user_idx: usize, count: usize) -> Vec<(UserId, f32)> {
        let reference = self.user_factors.row(user_idx);
        let mut similarities: Vec<(UserId, f32)> = self
            .user_ids
            .iter()
            .enumerate()
            .filter(|&(idx, _)| idx != user_idx)
            .map(|(idx, &user_id)| {
                let other = self.user_factors.row(idx);
                (
                    user_id,
                    cosine_similarity(
                        reference.as_slice().expect("row is contiguous"),
                        other.as_slice().expect("row is contiguous"),
                    ),
                )
            })
            .collect();
        similarities
            .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        similarities.truncate(count);
        similarities
    }

    pub fn user_factor_count(&self) -> usize {
        self.user_ids.len()
    }

    pub fn factors_non_negative(&self) -> bool {
        self.user_factors.iter().all(|&x| x >= 0.0)
            && self.item_factors.iter().all(|&x| x >= 0.0)
    }

    pub fn rating_for(&self, user_id: UserId, item_id: ItemId) -> Option<f32> {
        let u = *self.user_index.get(&user_id)?;
        let i = *self.item_index.get(&item_id)?;
        Some(self.ratings[[u, i]])
    }

    pub fn rank(&self) -> usize {
        self.user_factors.ncols()
    }
}

impl CollaborativeScorer {
    pub fn new(config: CollaborativeConfig) -> Self {
        Self {
            config,
            model: RwLock::new(None),
            trained: AtomicBool::new(false),
        }
    }

    pub async fn snapshot(&self) -> Option<Arc<CollaborativeModel>> {
        self.model.read().await.clone()
    }
}

#[async_trait::async_trait]
impl Recommender for CollaborativeScorer {
    fn name(&self) -> &'static str {
        "collaborative"
    }

    fn is_trained(&self) -> bool {
        self.trained.load(Ordering::Acquire)
    }

    async fn train(&self, data: TrainingData<'_>) -> Result<TrainingSummary> {
        if data.ratings.len() < self.config.min_ratings {
            return Err(EngineError::InsufficientData(format!(
                "collaborative training requires at least {} ratings, got {}",
                self.config.min_ratings,
                data.ratings.len()
            )));
        }

        let mut users: Vec<UserId> = data.ratings.iter().map(|r| r.user_id).collect();
        users.sort_unstable();
        users.dedup();
        let mut items: Vec<ItemId> = data.ratings.iter().map(|r| r.item_id).collect();
        items.sort_unstable();
        items.dedup();
        if users.len() < 2 || items.len() < 2 {
            return Err(EngineError::InsufficientData(format!(
                "collaborative training requires at least 2 users and 2 items, got {} users and {} items",
                users.len(),
                items.len()
            )));
        }

        let model = Arc::new(CollaborativeModel::build(data.ratings, &self.config)?);
        let summary = TrainingSummary {
            items: model.item_ids.len(),
            users: model.user_ids.len(),
            ratings: data.ratings.len(),
        };
        *self.model.write().await = Some(model);
        self.trained.store(true, Ordering::Release);

        info!(
            users = summary.users,
            items = summary.items,
            ratings = summary.ratings,
            "collaborative model trained"
        );
        Ok(summary)
    }

    async fn predict(&self, user: &UserProfile, count: usize) -> Result<Vec<ScoredItem>> {
        let model = self.snapshot().await.ok_or_else(|| {
            EngineError::InsufficientData("collaborative model not trained".to_string())
        })?;

        let user_idx = match model.user_index.get(&user.user_id) {
            Some(&idx) => idx,
            None => {
                // Documented fallback, not an error.
                debug!(user_id = user.user_id, "unseen user, cold-start path");
                return Ok(model.cold_start(count));
            }
        };

        let factors = model.user_factors.row(user_idx);
        let mut scored: Vec<ScoredItem> = model
            .item_ids
            .iter()
            .enumerate()
            .filter(|&(item_idx, _)| model.ratings[[user_idx, item_idx]] == 0.0)
            .map(|(item_idx, &item_id)| {
                let predicted = factors.dot(&model.item_factors.row(item_idx));
                ScoredItem {
                    item_id,
                    score: predicted as f64,
                    provenance: Provenance::Collaborative,
                    explanation: "predicted from users with similar taste".to_string(),
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(count);
        Ok(scored)
    }

    async fn explain(&self, user: &UserProfile, item_id: ItemId) -> Result<String> {
        let model = self.snapshot().await.ok_or_else(|| {
            EngineError::InsufficientData("collaborative model not trained".to_string())
        })?;

        let user_idx = match model.user_index.get(&user.user_id) {
            Some(&idx) => idx,
            None => return Ok("no explanation available (user not in training data)".to_string()),
        };
        if !model.item_index.contains_key(&item_id) {
            return Ok("no explanation available (item not in training data)".to_string());
        }

        let neighbors = model.similar_users(user_idx, 5);
        let listing = neighbors
            .iter()
            .map(|(id, sim)| format!("{} ({:.3})", id, sim))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!(
            "recommended because {} users share your taste: {}",
            neighbors.len(),
            listing
        ))
    }
}
