use crate::config::ContentConfig;
use crate::error::{EngineError, Result};
use crate::models::*;
use crate::scorers::{Recommender, TrainingData};
use crate::utils::{cosine_similarity, normalize_vector, tokenize};
use ndarray::Array2;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Content-based scorer: TF-IDF text vectors plus a boosted multi-hot
/// category block, with a precomputed item-item cosine similarity matrix.
pub struct ContentScorer {
    config: ContentConfig,
    model: RwLock<Option<Arc<ContentModel>>>,
    trained: AtomicBool,
}

/// One trained model generation. Vectors are regenerated wholesale on
/// retrain; consumers hold an `Arc` snapshot that stays valid across swaps.
pub struct ContentModel {
    item_ids: Vec<ItemId>,
    index: HashMap<ItemId, usize>,
    categories: Vec<Vec<String>>,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
    text_vectors: Vec<Vec<f32>>,
    similarity: Array2<f32>,
}

impl ContentModel {
    fn build(catalog: &[CatalogItem], config: &ContentConfig) -> Self {
        let documents: Vec<Vec<String>> = catalog
            .iter()
            .map(|item| tokenize(&format!("{} {}", item.name, item.description)))
            .collect();

        // Vocabulary capped by corpus frequency, ties broken alphabetically
        // so retrains on identical catalogs produce identical vectors.
        let mut term_counts: HashMap<&str, usize> = HashMap::new();
        for doc in &documents {
            for token in doc {
                *term_counts.entry(token.as_str()).or_default() += 1;
            }
        }
        let mut terms: Vec<(&str, usize)> = term_counts.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        terms.truncate(config.max_text_features);

        let vocabulary: HashMap<String, usize> = terms
            .iter()
            .enumerate()
            .map(|(i, (term, _))| (term.to_string(), i))
            .collect();

        // Smoothed document frequencies for the IDF term.
        let mut doc_freq = vec![0usize; vocabulary.len()];
        for doc in &documents {
            let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
            for token in unique {
                if let Some(&idx) = vocabulary.get(token) {
                    doc_freq[idx] += 1;
                }
            }
        }
        let n_docs = documents.len() as f32;
        let idf: Vec<f32> = doc_freq
            .iter()
            .map(|&df| ((1.0 + n_docs) / (1.0 + df as f32)).ln() + 1.0)
            .collect();

        let text_vectors: Vec<Vec<f32>> = documents
            .iter()
            .map(|doc| {
                let mut vector = vec![0.0f32; vocabulary.len()];
                for token in doc {
                    if let Some(&idx) = vocabulary.get(token) {
                        vector[idx] += 1.0;
                    }
                }
                for (value, idf) in vector.iter_mut().zip(idf.iter()) {
                    *value *= idf;
                }
                normalize_vector(&mut vector);
                vector
            })
            .collect();

        let categories: Vec<Vec<String>> = catalog
            .iter()
            .map(|item| item.categories.iter().map(|c| c.to_lowercase()).collect())
            .collect();

        // Category vocabulary, sorted for stable one-hot positions.
        let mut category_labels: Vec<String> = categories
            .iter()
            .flatten()
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        category_labels.sort();
        let category_index: HashMap<&str, usize> = category_labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.as_str(), i))
            .collect();

        // Full feature vector = normalized text block + boosted category
        // block, so shared categories dominate pairwise similarity.
        let feature_vectors: Vec<Vec<f32>> = text_vectors
            .iter()
            .zip(categories.iter())
            .map(|(text, cats)| {
                let mut features = text.clone();
                let mut category_block = vec![0.0f32; category_labels.len()];
                for cat in cats {
                    if let Some(&idx) = category_index.get(cat.as_str()) {
                        category_block[idx] = config.category_boost;
                    }
                }
                features.extend(category_block);
                features
            })
            .collect();

        let n = catalog.len();
        let pairs: Vec<f32> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                let feature_vectors = &feature_vectors;
                (0..n).map(move |j| {
                    if i == j {
                        1.0
                    } else {
                        cosine_similarity(&feature_vectors[i], &feature_vectors[j])
                    }
                })
            })
            .collect();
        let similarity =
            Array2::from_shape_vec((n, n), pairs).expect("similarity matrix shape is n*n");

        let item_ids: Vec<ItemId> = catalog.iter().map(|item| item.id).collect();
        let index = item_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        Self {
            item_ids,
            index,
            categories,
            vocabulary,
            idf,
            text_vectors,
            similarity,
        }
    }

    /// Similarity between two items, `None` when either was never scored.
    pub fn similarity_between(&self, a: ItemId, b: ItemId) -> Option<f32> {
        let i = *self.index.get(&a)?;
        let j = *self.index.get(&b)?;
        Some(self.similarity[[i, j]])
    }

    pub fn item_count(&self) -> usize {
        self.item_ids.len()
    }

    /// TF-IDF vector for the user's preference tags treated as a query.
    fn query_vector(&self, preferences: &[String]) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.vocabulary.len()];
        for pref in preferences {
            for token in tokenize(pref) {
                if let Some(&idx) = self.vocabulary.get(&token) {
                    vector[idx] += 1.0;
                }
            }
        }
        for (value, idf) in vector.iter_mut().zip(self.idf.iter()) {
            *value *= idf;
        }
        normalize_vector(&mut vector);
        vector
    }

    fn matched_fraction(&self, preferences: &[String], item_index: usize) -> f64 {
        if preferences.is_empty() {
            return 0.0;
        }
        let prefs: HashSet<String> = preferences.iter().map(|p| p.to_lowercase()).collect();
        let item_cats: HashSet<&String> = self.categories[item_index].iter().collect();
        let matched = prefs.iter().filter(|p| item_cats.contains(p)).count();
        matched as f64 / prefs.len() as f64
    }
}

impl ContentScorer {
    pub fn new(config: ContentConfig) -> Self {
        Self {
            config,
            model: RwLock::new(None),
            trained: AtomicBool::new(false),
        }
    }

    pub async fn snapshot(&self) -> Option<Arc<ContentModel>> {
        self.model.read().await.clone()
    }
}

#[async_trait::async_trait]
impl Recommender for ContentScorer {
    fn name(&self) -> &'static str {
        "content_based"
    }

    fn is_trained(&self) -> bool {
        self.trained.load(Ordering::Acquire)
    }

    async fn train(&self, data: TrainingData<'_>) -> Result<TrainingSummary> {
        if data.catalog.is_empty() {
            return Err(EngineError::InsufficientData(
                "content training requires a non-empty catalog".to_string(),
            ));
        }

        // Built fully off to the side; readers see the old snapshot until
        // the swap below.
        let model = Arc::new(ContentModel::build(data.catalog, &self.config));
        let items = model.item_count();
        *self.model.write().await = Some(model);
        self.trained.store(true, Ordering::Release);

        info!(items, "content model trained");
        Ok(TrainingSummary {
            items,
            ..Default::default()
        })
    }

    async fn predict(&self, user: &UserProfile, count: usize) -> Result<Vec<ScoredItem>> {
        let model = self.snapshot().await.ok_or_else(|| {
            EngineError::InsufficientData("content model not trained".to_string())
        })?;

        // Known limitation: without stated preferences this degrades to the
        // leading catalog entries; the hybrid layer supplements this case
        // with live popularity.
        if user.preferences.is_empty() {
            return Ok(model
                .item_ids
                .iter()
                .take(count)
                .map(|&item_id| ScoredItem {
                    item_id,
                    score: 0.5,
                    provenance: Provenance::Content,
                    explanation: "catalog default (no stated preferences)".to_string(),
                })
                .collect());
        }

        let query = model.query_vector(&user.preferences);
        let mut scored: Vec<ScoredItem> = model
            .item_ids
            .iter()
            .enumerate()
            .map(|(idx, &item_id)| {
                let category_score = model.matched_fraction(&user.preferences, idx);
                let text_score = cosine_similarity(&query, &model.text_vectors[idx]) as f64;
                let score = self.config.category_weight * category_score
                    + self.config.text_weight * text_score;
                ScoredItem {
                    item_id,
                    score,
                    provenance: Provenance::Content,
                    explanation: format!(
                        "matches {:.0}% of your preferences",
                        category_score * 100.0
                    ),
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(count);
        Ok(scored)
    }

    async fn explain(&self, user: &UserProfile, item_id: ItemId) -> Result<String> {
        let model = self.snapshot().await.ok_or_else(|| {
            EngineError::InsufficientData("content model not trained".to_string())
        })?;

        if user.preferences.is_empty() {
            return Ok("recommended from the catalog; user has no stated preferences".to_string());
        }

        match model.index.get(&item_id) {
            Some(&idx) => {
                let fraction = model.matched_fraction(&user.preferences, idx);
                Ok(format!(
                    "item categories match {:.0}% of your {} preference tags",
                    fraction * 100.0,
                    user.preferences.len()
                ))
            }
            // Unknown items degrade to a stock message, never an error.
            None => Ok("no explanation available (item not in content model)".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beach_and_museum_catalog() -> Vec<CatalogItem> {
        vec![
            CatalogItem::new(1, "Sunny Beach", "white sand beach with surf")
                .with_categories(vec!["beach".to_string()]),
            CatalogItem::new(2, "Hidden Cove", "quiet sand beach cove")
                .with_categories(vec!["beach".to_string()]),
            CatalogItem::new(3, "City Museum", "history museum with artifacts")
                .with_categories(vec!["culture".to_string()]),
            CatalogItem::new(4, "Art Gallery", "modern art museum gallery")
                .with_categories(vec!["culture".to_string()]),
        ]
    }

    fn scorer() -> ContentScorer {
        ContentScorer::new(crate::config::Config::default().content)
    }

    #[tokio::test]
    async fn empty_catalog_is_insufficient() {
        let scorer = scorer();
        let err = scorer
            .train(TrainingData::new(&[], &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData(_)));
        assert!(!scorer.is_trained());
    }

    #[tokio::test]
    async fn similarity_matrix_invariants() {
        let catalog = beach_and_museum_catalog();
        let scorer = scorer();
        scorer
            .train(TrainingData::new(&catalog, &[]))
            .await
            .unwrap();
        let model = scorer.snapshot().await.unwrap();

        for item in &catalog {
            assert!((model.similarity_between(item.id, item.id).unwrap() - 1.0).abs() < 1e-6);
        }
        let ab = model.similarity_between(1, 2).unwrap();
        let ba = model.similarity_between(2, 1).unwrap();
        assert!((ab - ba).abs() < 1e-6);
        // Same-category items are closer than cross-category ones.
        assert!(ab > model.similarity_between(1, 3).unwrap());
        assert!(model.similarity_between(1, 99).is_none());
    }

    #[tokio::test]
    async fn preferences_rank_matching_category_first() {
        let scorer = scorer();
        scorer
            .train(TrainingData::new(&beach_and_museum_catalog(), &[]))
            .await
            .unwrap();

        let user = UserProfile::new(10).with_preferences(vec!["beach".to_string()]);
        let items = scorer.predict(&user, 4).await.unwrap();
        assert_eq!(items.len(), 4);
        assert!(items[0].item_id == 1 || items[0].item_id == 2);
        assert!(items[0].score > items[3].score);
    }

    #[tokio::test]
    async fn no_preferences_falls_back_to_leading_items() {
        let scorer = scorer();
        scorer
            .train(TrainingData::new(&beach_and_museum_catalog(), &[]))
            .await
            .unwrap();

        let items = scorer.predict(&UserProfile::new(10), 2).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item_id, 1);
        assert_eq!(items[1].item_id, 2);
    }

    #[tokio::test]
    async fn explain_reports_matched_fraction() {
        let scorer = scorer();
        scorer
            .train(TrainingData::new(&beach_and_museum_catalog(), &[]))
            .await
            .unwrap();

        let user = UserProfile::new(10)
            .with_preferences(vec!["beach".to_string(), "culture".to_string()]);
        let explanation = scorer.explain(&user, 1).await.unwrap();
        assert!(explanation.contains("50%"));

        let missing = scorer.explain(&user, 99).await.unwrap();
        assert!(missing.contains("no explanation available"));
    }
}
