use crate::config::PopularityConfig;
use crate::error::Result;
use crate::models::*;
use crate::store::StateStore;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

const NAMESPACE: &str = "popularity";

struct TrendingCache {
    items: Vec<PopularityRecord>,
    computed_at: Option<DateTime<Utc>>,
}

/// Incremental popularity and trending tracker.
///
/// Every interaction event updates one item's counters synchronously and is
/// committed write-through before the call returns. Per-item updates are
/// serialized by the map's entry locking; different items update in
/// parallel. The trending list is a read-through cache: invalidated on
/// every write, lazily recomputed, and valid for a bounded TTL.
pub struct PopularityTracker {
    config: PopularityConfig,
    records: DashMap<ItemId, PopularityRecord>,
    trending: Mutex<TrendingCache>,
    store: Arc<dyn StateStore>,
}

impl PopularityTracker {
    pub fn new(config: PopularityConfig, store: Arc<dyn StateStore>) -> Result<Self> {
        let records = DashMap::new();
        for (key, bytes) in store.scan(NAMESPACE)? {
            let record: PopularityRecord = serde_json::from_slice(&bytes)?;
            if let Ok(item_id) = key.parse::<ItemId>() {
                records.insert(item_id, record);
            }
        }
        if !records.is_empty() {
            info!(items = records.len(), "popularity state loaded");
        }

        Ok(Self {
            config,
            records,
            trending: Mutex::new(TrendingCache {
                items: Vec::new(),
                computed_at: None,
            }),
            store,
        })
    }

    /// Fold one event in and commit the updated record before returning.
    pub fn record_event(&self, event: &InteractionEvent) -> Result<PopularityRecord> {
        // The entry guard serializes concurrent updates to the same item,
        // including the write-through below.
        let mut entry = self
            .records
            .entry(event.item_id)
            .or_insert_with(|| PopularityRecord::new(event.item_id, event.timestamp));
        entry.apply(event);
        let record = entry.value().clone();

        self.store.put(
            NAMESPACE,
            &event.item_id.to_string(),
            &serde_json::to_vec(&record)?,
        )?;
        drop(entry);

        self.trending.lock().computed_at = None;
        Ok(record)
    }

    pub fn get(&self, item_id: ItemId) -> Option<PopularityRecord> {
        self.records.get(&item_id).map(|r| r.clone())
    }

    /// Raw popularity counter consumed by novelty scoring; 0 for untracked
    /// items.
    pub fn popularity_score(&self, item_id: ItemId) -> f64 {
        self.records
            .get(&item_id)
            .map(|r| r.popularity_score)
            .unwrap_or(0.0)
    }

    /// Additive boost folded into hybrid scores; scaled down and capped so
    /// popularity never overrides relevance outright.
    pub fn boost_for(&self, item_id: ItemId) -> f64 {
        (self.popularity_score(item_id) / 100.0).min(1.0)
    }

    /// Items with recent activity, most popular first. Served from cache
    /// while it is fresh; recomputed lazily after any write or TTL expiry.
    pub fn trending(&self, limit: usize) -> Vec<PopularityRecord> {
        let now = Utc::now();
        let mut cache = self.trending.lock();

        let fresh = cache.computed_at.is_some_and(|computed| {
            now.signed_duration_since(computed)
                < Duration::seconds(self.config.trending_ttl_secs as i64)
        });
        if !fresh {
            let cutoff = now - Duration::hours(self.config.recency_window_hours);
            let mut items: Vec<PopularityRecord> = self
                .records
                .iter()
                .filter(|r| r.last_updated >= cutoff)
                .map(|r| r.clone())
                .collect();
            items.sort_by(|a, b| {
                b.popularity_score
                    .partial_cmp(&a.popularity_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            cache.items = items;
            cache.computed_at = Some(now);
            debug!(items = cache.items.len(), "trending list recomputed");
        }

        cache.items.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Externally-triggered retention sweep: drops records untouched since
    /// `cutoff` from memory and the store.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let stale: Vec<ItemId> = self
            .records
            .iter()
            .filter(|r| r.last_updated < cutoff)
            .map(|r| r.item_id)
            .collect();

        for item_id in &stale {
            self.records.remove(item_id);
            self.store.delete(NAMESPACE, &item_id.to_string())?;
        }
        if !stale.is_empty() {
            self.trending.lock().computed_at = None;
            info!(removed = stale.len(), "stale popularity records pruned");
        }
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn tracker() -> PopularityTracker {
        PopularityTracker::new(
            crate::config::Config::default().popularity,
            Arc::new(MemoryStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn event_weights_accumulate() {
        let tracker = tracker();
        tracker
            .record_event(&InteractionEvent::new(1, InteractionType::View))
            .unwrap();
        tracker
            .record_event(&InteractionEvent::new(1, InteractionType::Click))
            .unwrap();
        let record = tracker.get(1).unwrap();
        assert_eq!(record.interaction_count, 2);
        assert!((record.total_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn trending_sorted_and_recency_filtered() {
        let tracker = tracker();
        for _ in 0..5 {
            tracker
                .record_event(&InteractionEvent::new(1, InteractionType::Favorite))
                .unwrap();
        }
        tracker
            .record_event(&InteractionEvent::new(2, InteractionType::View))
            .unwrap();
        // Item 3 last touched outside the recency window.
        let mut old_event = InteractionEvent::new(3, InteractionType::Rating).with_rating(5.0);
        old_event.timestamp = Utc::now() - Duration::hours(48);
        tracker.record_event(&old_event).unwrap();

        let trending = tracker.trending(10);
        let ids: Vec<ItemId> = trending.iter().map(|r| r.item_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn state_round_trips_through_store() {
        let store = Arc::new(MemoryStore::new());
        {
            let tracker = PopularityTracker::new(
                crate::config::Config::default().popularity,
                store.clone(),
            )
            .unwrap();
            tracker
                .record_event(&InteractionEvent::new(9, InteractionType::Rating).with_rating(4.0))
                .unwrap();
        }
        let reloaded =
            PopularityTracker::new(crate::config::Config::default().popularity, store).unwrap();
        let record = reloaded.get(9).unwrap();
        assert_eq!(record.rating_count, 1);
        assert!((record.avg_rating - 4.0).abs() < 1e-9);
    }

    #[test]
    fn prune_removes_stale_records() {
        let tracker = tracker();
        let mut old_event = InteractionEvent::new(1, InteractionType::View);
        old_event.timestamp = Utc::now() - Duration::days(40);
        tracker.record_event(&old_event).unwrap();
        tracker
            .record_event(&InteractionEvent::new(2, InteractionType::View))
            .unwrap();

        let removed = tracker.prune(Utc::now() - Duration::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert!(tracker.get(1).is_none());
        assert!(tracker.get(2).is_some());
    }
}
