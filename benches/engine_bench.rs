use criterion::{black_box, criterion_group, criterion_main, Criterion};
use destrec::hybrid::mmr_rerank;
use destrec::*;
use std::sync::Arc;

fn candidate_list(n: usize) -> Vec<ScoredItem> {
    (0..n as i64)
        .map(|i| ScoredItem {
            item_id: i,
            score: 1.0 - i as f64 * 0.001,
            provenance: Provenance::Hybrid,
            explanation: String::new(),
        })
        .collect()
}

fn benchmark_mmr(c: &mut Criterion) {
    let candidates = candidate_list(300);

    c.bench_function("mmr_rerank_300_to_20", |b| {
        b.iter(|| {
            black_box(mmr_rerank(candidates.clone(), 20, 0.5, |a, b| {
                if a % 5 == b % 5 {
                    0.9
                } else {
                    0.1
                }
            }));
        });
    });
}

fn benchmark_bandit(c: &mut Criterion) {
    let bandit =
        ContextualBandit::new(Config::default().bandit, Arc::new(MemoryStore::new())).unwrap();
    let context = RecommendationContext::default();
    for arm in 0..11 {
        bandit.update_reward(arm, 0.5, &context).unwrap();
    }

    c.bench_function("bandit_select_arm", |b| {
        b.iter(|| {
            black_box(bandit.select_arm(&context).unwrap());
        });
    });

    c.bench_function("bandit_update_reward", |b| {
        b.iter(|| {
            bandit.update_reward(black_box(5), black_box(0.7), &context).unwrap();
        });
    });
}

fn benchmark_training(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let catalog: Vec<CatalogItem> = (0..200i64)
        .map(|i| {
            CatalogItem::new(i, format!("place {}", i), "sand beach waves sun resort")
                .with_categories(vec![format!("category-{}", i % 5)])
        })
        .collect();
    let ratings: Vec<RatingRecord> = (0..40i64)
        .flat_map(|user| {
            (0..20i64).map(move |item| {
                RatingRecord::new(user, (user * 7 + item * 3) % 200, ((user + item) % 5 + 1) as f32)
            })
        })
        .collect();

    c.bench_function("content_train_200_items", |b| {
        b.to_async(&rt).iter(|| async {
            let scorer = ContentScorer::new(Config::default().content);
            black_box(scorer.train(TrainingData::new(&catalog, &ratings)).await.unwrap());
        });
    });

    c.bench_function("collaborative_train_800_ratings", |b| {
        b.to_async(&rt).iter(|| async {
            let scorer = CollaborativeScorer::new(Config::default().collaborative);
            black_box(scorer.train(TrainingData::new(&catalog, &ratings)).await.unwrap());
        });
    });
}

criterion_group!(benches, benchmark_mmr, benchmark_bandit, benchmark_training);
criterion_main!(benches);
