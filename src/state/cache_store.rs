use std::sync::Arc;

use dashmap::DashMap;

use crate::state::CacheSnapshot;
use crate::types::MarketSegment;

/// One current snapshot per segment.
///
/// Publishing replaces the `Arc` under the shard lock, so a reader holds either the old
/// snapshot or the new one in full. Writers are serialized per segment by the batch scanner.
#[derive(Debug, Default)]
pub struct CacheStore {
    current: DashMap<MarketSegment, Arc<CacheSnapshot>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the first scan of `segment` publishes.
    pub fn get(&self, segment: MarketSegment) -> Option<Arc<CacheSnapshot>> {
        self.current.get(&segment).map(|s| Arc::clone(&s))
    }

    /// The current snapshot, or a fresh empty one if the segment was never scanned.
    pub fn get_or_empty(&self, segment: MarketSegment) -> Arc<CacheSnapshot> {
        self.get(segment)
            .unwrap_or_else(|| Arc::new(CacheSnapshot::empty(segment)))
    }

    pub fn publish(&self, snapshot: CacheSnapshot) -> Arc<CacheSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.current.insert(snapshot.segment, Arc::clone(&snapshot));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::sample_opportunity;

    #[test]
    fn get_is_none_before_first_publish() {
        let store = CacheStore::new();
        assert!(store.get(MarketSegment::Equity).is_none());
        let empty = store.get_or_empty(MarketSegment::Equity);
        assert!(empty.opportunities.is_empty());
        assert!(store.get(MarketSegment::Equity).is_none(), "get_or_empty must not publish");
    }

    #[test]
    fn publish_swaps_without_touching_held_snapshots() {
        let store = CacheStore::new();
        let mut first = CacheSnapshot::empty(MarketSegment::Equity);
        first.opportunities.push(sample_opportunity("A", 100.0, 0.1));
        store.publish(first);

        let held = store.get(MarketSegment::Equity).unwrap();

        let mut second = CacheSnapshot::empty(MarketSegment::Equity);
        second.opportunities.push(sample_opportunity("B", 50.0, 0.2));
        store.publish(second);

        assert_eq!(held.opportunities[0].symbol, "A");
        assert_eq!(store.get(MarketSegment::Equity).unwrap().opportunities[0].symbol, "B");
    }

    #[test]
    fn segments_are_independent() {
        let store = CacheStore::new();
        store.publish(CacheSnapshot::empty(MarketSegment::Index));
        assert!(store.get(MarketSegment::Index).is_some());
        assert!(store.get(MarketSegment::Futures).is_none());
    }
}
