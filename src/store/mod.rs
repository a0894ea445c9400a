// src/store/mod.rs
//! Bounded per-transmitter history cache.
//!
//! Each device key owns one cache slot. The slot holds either the recent
//! sample history (newest first) or a single control code waiting to be
//! picked up by the uploader. Writing one kind replaces the other.

pub mod clock;
pub mod kv;
#[cfg(target_arch = "wasm32")]
pub mod worker_kv;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::sample::Sample;
pub use clock::{Clock, ManualClock, SystemClock};
pub use kv::{KvCache, MemoryKv};
#[cfg(target_arch = "wasm32")]
pub use worker_kv::WorkerKv;

/// Slot lifetime, refreshed on every read and write (24 hours).
pub const HISTORY_TTL_SECS: u64 = 86_400;

/// Default history depth; one sample per 5 minutes gives an hour of backfill.
pub const DEFAULT_MAX_ENTRIES: usize = 12;

/// Upper bound on samples returned by a single read.
pub const MAX_READ_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backing cache rejected or failed the operation.
    Unavailable(String),
    /// Stored value could not be decoded.
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "cache unavailable: {}", e),
            StoreError::Corrupt(e) => write!(f, "corrupt cache entry: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Contents of one device slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Slot {
    Samples { entries: Vec<Sample> },
    ControlCode { code: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Sample stored or folded into the head. Carries the control code that
    /// was pending in the slot, or 0.
    Accepted(i64),
    /// Same reading as the current head; nothing written.
    Duplicate,
}

/// How an incoming sample relates to the current history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeStep {
    Duplicate,
    GeoFixUpdated,
    Prepended,
}

fn merge_into(entries: &mut Vec<Sample>, sample: Sample, max_entries: usize) -> MergeStep {
    let step = match entries.first_mut() {
        Some(head)
            if head.filtered_value == sample.filtered_value
                && head.raw_value == sample.raw_value
                && (head.has_fix() || !sample.has_fix()) =>
        {
            return MergeStep::Duplicate;
        }
        Some(head) if !head.has_fix() && sample.has_fix() => {
            head.geo_location = sample.geo_location;
            head.uploader_battery_level = sample.uploader_battery_level;
            MergeStep::GeoFixUpdated
        }
        _ => {
            entries.insert(0, sample);
            MergeStep::Prepended
        }
    };
    entries.truncate(max_entries);
    step
}

/// Samples returned by [`RecordStore::read_recent`].
///
/// Holds a snapshot taken at read time; iterating annotates each sample with
/// its age relative to that moment and skips unservable readings.
#[derive(Debug, Clone)]
pub struct RecentSamples {
    entries: Vec<Sample>,
    now_ms: i64,
    limit: usize,
}

impl RecentSamples {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            now_ms: 0,
            limit: 0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Sample> + '_ {
        self.entries
            .iter()
            .filter(|s| s.is_servable())
            .take(self.limit)
            .map(move |s| s.freshened(self.now_ms))
    }

    pub fn to_vec(&self) -> Vec<Sample> {
        self.iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

pub struct RecordStore<K, C = SystemClock> {
    kv: K,
    clock: C,
    max_entries: usize,
}

fn storage_key(device_key: &str) -> String {
    format!("{}alldata", device_key)
}

fn decode_slot(raw: &str) -> Result<Slot, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

impl<K: KvCache, C: Clock> RecordStore<K, C> {
    pub fn new(kv: K, clock: C, max_entries: usize) -> Self {
        Self {
            kv,
            clock,
            max_entries,
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    async fn load(&self, key: &str) -> Result<Option<Slot>, StoreError> {
        match self.kv.get(key).await? {
            Some(raw) => decode_slot(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, slot: &Slot) -> Result<(), StoreError> {
        let raw = serde_json::to_string(slot).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.kv.put(key, raw, HISTORY_TTL_SECS).await
    }

    /// Merge a sample into the device history.
    #[tracing::instrument(
        name = "merge_sample",
        skip(self, sample),
        fields(outcome = tracing::field::Empty)
    )]
    pub async fn merge_sample(
        &self,
        device_key: &str,
        sample: Sample,
    ) -> Result<MergeOutcome, StoreError> {
        let key = storage_key(device_key);

        let (mut entries, pending_code) = match self.load(&key).await {
            Ok(Some(Slot::Samples { entries })) => (entries, 0),
            Ok(Some(Slot::ControlCode { code })) => (Vec::new(), code),
            Ok(None) => (Vec::new(), 0),
            Err(StoreError::Corrupt(e)) => {
                warn!(error = %e, "discarding unreadable history");
                (Vec::new(), 0)
            }
            Err(e) => return Err(e),
        };

        let step = merge_into(&mut entries, sample, self.max_entries);
        tracing::Span::current().record("outcome", tracing::field::debug(step));

        if step == MergeStep::Duplicate {
            debug!("duplicate reading, history unchanged");
            return Ok(MergeOutcome::Duplicate);
        }

        debug!(len = entries.len(), "writing history");
        self.save(&key, &Slot::Samples { entries }).await?;

        Ok(MergeOutcome::Accepted(pending_code))
    }

    /// Replace the slot with a control code, discarding any history.
    /// Returns the previously pending code, or 0.
    #[tracing::instrument(name = "write_control_code", skip(self))]
    pub async fn write_control_code(&self, device_key: &str, code: i64) -> Result<i64, StoreError> {
        let key = storage_key(device_key);

        let previous = match self.load(&key).await {
            Ok(Some(Slot::ControlCode { code })) => code,
            Ok(Some(Slot::Samples { entries })) => {
                debug!(discarded = entries.len(), "control code replaces history");
                0
            }
            Ok(None) | Err(StoreError::Corrupt(_)) => 0,
            Err(e) => return Err(e),
        };

        self.save(&key, &Slot::ControlCode { code }).await?;
        Ok(previous)
    }

    /// Most recent servable samples, newest first. Extends the slot's TTL.
    #[tracing::instrument(name = "read_recent", skip(self))]
    pub async fn read_recent(
        &self,
        device_key: &str,
        limit: usize,
    ) -> Result<RecentSamples, StoreError> {
        let key = storage_key(device_key);

        let raw = match self.kv.get(&key).await? {
            Some(raw) => raw,
            None => return Ok(RecentSamples::empty()),
        };
        self.kv.put(&key, raw.clone(), HISTORY_TTL_SECS).await?;

        match decode_slot(&raw)? {
            Slot::Samples { entries } => Ok(RecentSamples {
                entries,
                now_ms: self.clock.now_ms(),
                limit: limit.min(MAX_READ_LIMIT),
            }),
            Slot::ControlCode { .. } => Ok(RecentSamples::empty()),
        }
    }

    /// Newest stored sample, without touching the TTL.
    pub async fn latest_sample(&self, device_key: &str) -> Result<Option<Sample>, StoreError> {
        match self.load(&storage_key(device_key)).await? {
            Some(Slot::Samples { entries }) => Ok(entries.into_iter().next()),
            _ => Ok(None),
        }
    }

    /// `(raw_value, filtered_value)` of the newest stored sample.
    pub async fn peek_latest_raw_filtered(
        &self,
        device_key: &str,
    ) -> Result<Option<(i64, i64)>, StoreError> {
        Ok(self
            .latest_sample(device_key)
            .await?
            .map(|s| (s.raw_value, s.filtered_value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{sample, NO_FIX};

    const START_MS: i64 = 1_700_000_000_000;

    fn store() -> (RecordStore<MemoryKv<ManualClock>, ManualClock>, ManualClock) {
        let clock = ManualClock::new(START_MS);
        let kv = MemoryKv::with_clock(clock.clone());
        (
            RecordStore::new(kv, clock.clone(), DEFAULT_MAX_ENTRIES),
            clock,
        )
    }

    #[test]
    fn test_merge_into_empty_prepends() {
        let mut entries = Vec::new();
        let step = merge_into(&mut entries, sample(150, 148, NO_FIX), 12);
        assert_eq!(step, MergeStep::Prepended);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_merge_into_trims_oldest() {
        let mut entries: Vec<_> = (1..=3).rev().map(|i| sample(i, i, "1,1")).collect();
        merge_into(&mut entries, sample(4, 4, "1,1"), 3);
        let raws: Vec<_> = entries.iter().map(|s| s.raw_value).collect();
        assert_eq!(raws, vec![4, 3, 2]);
    }

    #[test]
    fn test_merge_into_same_values_both_without_fix_is_duplicate() {
        let mut entries = vec![sample(150, 148, NO_FIX)];
        let step = merge_into(&mut entries, sample(150, 148, NO_FIX), 12);
        assert_eq!(step, MergeStep::Duplicate);
    }

    #[test]
    fn test_merge_into_first_fix_updates_head_even_when_values_differ() {
        let mut entries = vec![sample(150, 148, NO_FIX)];
        let step = merge_into(&mut entries, sample(151, 149, "40.0,-73.0"), 12);
        assert_eq!(step, MergeStep::GeoFixUpdated);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].raw_value, 150);
        assert_eq!(entries[0].geo_location, "40.0,-73.0");
    }

    #[test]
    fn test_slot_encoding_is_tagged() {
        let json = serde_json::to_string(&Slot::ControlCode { code: 7 }).unwrap();
        assert_eq!(json, r#"{"kind":"control_code","code":7}"#);
        let json = serde_json::to_string(&Slot::Samples { entries: vec![] }).unwrap();
        assert_eq!(json, r#"{"kind":"samples","entries":[]}"#);
    }

    #[tokio::test]
    async fn test_bounded_history_keeps_newest() {
        let (store, _) = store();
        for i in 1..=20 {
            let outcome = store
                .merge_sample("ABCDE-1", sample(100 + i, 100 + i, "1,1"))
                .await
                .unwrap();
            assert_eq!(outcome, MergeOutcome::Accepted(0));
        }

        let recent = store.read_recent("ABCDE-1", 100).await.unwrap().to_vec();
        assert_eq!(recent.len(), 12);
        let raws: Vec<_> = recent.iter().map(|s| s.raw_value).collect();
        let expected: Vec<_> = (9..=20).rev().map(|i| 100 + i).collect();
        assert_eq!(raws, expected);
    }

    #[tokio::test]
    async fn test_duplicate_leaves_history_unchanged() {
        let (store, _) = store();
        store
            .merge_sample("k", sample(150, 148, "40.0,-73.0"))
            .await
            .unwrap();
        let outcome = store
            .merge_sample("k", sample(150, 148, "40.0,-73.0"))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Duplicate);

        // A different fix on an identical reading is still a duplicate
        let outcome = store
            .merge_sample("k", sample(150, 148, "41.0,-74.0"))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Duplicate);

        assert_eq!(store.read_recent("k", 100).await.unwrap().to_vec().len(), 1);
    }

    #[tokio::test]
    async fn test_geo_fix_upgrades_head_in_place() {
        let (store, _) = store();
        store
            .merge_sample("k", sample(150, 148, NO_FIX))
            .await
            .unwrap();

        let mut update = sample(150, 148, "40.0,-73.0");
        update.uploader_battery_level = 55;
        let outcome = store.merge_sample("k", update).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Accepted(0));

        let recent = store.read_recent("k", 100).await.unwrap().to_vec();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].geo_location, "40.0,-73.0");
        assert_eq!(recent[0].uploader_battery_level, 55);
    }

    #[tokio::test]
    async fn test_zero_raw_value_is_never_read() {
        let (store, _) = store();
        store.merge_sample("k", sample(0, 148, "1,1")).await.unwrap();
        store.merge_sample("k", sample(120, 118, "1,1")).await.unwrap();
        store.merge_sample("k", sample(0, 99, "1,1")).await.unwrap();

        let recent = store.read_recent("k", 100).await.unwrap().to_vec();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].raw_value, 120);

        // Suppressed samples do not count toward the limit
        let recent = store.read_recent("k", 1).await.unwrap().to_vec();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].raw_value, 120);
    }

    #[tokio::test]
    async fn test_freshness_recomputed_per_read() {
        let (store, clock) = store();
        let mut s = sample(150, 148, NO_FIX);
        s.captured_at = START_MS - 60_000;
        store.merge_sample("k", s).await.unwrap();

        let first = store.read_recent("k", 1).await.unwrap().to_vec();
        clock.advance(5_000);
        let second = store.read_recent("k", 1).await.unwrap().to_vec();

        assert_eq!(first[0].relative_time, 60_000);
        assert_eq!(second[0].relative_time - first[0].relative_time, 5_000);
        assert_eq!(first[0].captured_at, second[0].captured_at);
    }

    #[tokio::test]
    async fn test_recent_samples_restartable() {
        let (store, _) = store();
        store.merge_sample("k", sample(150, 148, "1,1")).await.unwrap();
        let recent = store.read_recent("k", 5).await.unwrap();
        assert_eq!(recent.iter().count(), 1);
        assert_eq!(recent.iter().count(), 1);
        assert!(!recent.is_empty());
    }

    #[tokio::test]
    async fn test_read_limit_capped() {
        let (store, _) = store();
        let store = RecordStore::new(store.kv, store.clock, 200);
        for i in 1..=150 {
            store.merge_sample("k", sample(i, i, "1,1")).await.unwrap();
        }
        let recent = store.read_recent("k", 1_000).await.unwrap();
        assert_eq!(recent.iter().count(), MAX_READ_LIMIT);
    }

    #[tokio::test]
    async fn test_control_code_voids_history() {
        let (store, _) = store();
        assert_eq!(store.write_control_code("k", 7).await.unwrap(), 0);
        assert!(store.read_recent("k", 1).await.unwrap().is_empty());

        store.merge_sample("k", sample(150, 148, "1,1")).await.unwrap();
        assert_eq!(store.write_control_code("k", 9).await.unwrap(), 0);
        assert!(store.read_recent("k", 1).await.unwrap().is_empty());
        assert_eq!(store.write_control_code("k", 2).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_merge_delivers_pending_control_code() {
        let (store, _) = store();
        store.write_control_code("k", 2).await.unwrap();
        let outcome = store
            .merge_sample("k", sample(150, 148, NO_FIX))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Accepted(2));

        // Code is consumed by the merge
        let outcome = store
            .merge_sample("k", sample(151, 149, NO_FIX))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Accepted(0));
    }

    #[tokio::test]
    async fn test_history_expires_without_activity() {
        let (store, clock) = store();
        store.merge_sample("k", sample(150, 148, "1,1")).await.unwrap();
        clock.advance(HISTORY_TTL_SECS as i64 * 1000);
        assert!(store.read_recent("k", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_refreshes_ttl() {
        let (store, clock) = store();
        store.merge_sample("k", sample(150, 148, "1,1")).await.unwrap();

        clock.advance(20 * 3600 * 1000);
        assert!(!store.read_recent("k", 1).await.unwrap().is_empty());
        clock.advance(20 * 3600 * 1000);
        assert!(!store.read_recent("k", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_peek_latest_raw_filtered() {
        let (store, _) = store();
        assert_eq!(store.peek_latest_raw_filtered("k").await.unwrap(), None);
        store.merge_sample("k", sample(150, 148, "1,1")).await.unwrap();
        store.merge_sample("k", sample(160, 158, "1,1")).await.unwrap();
        assert_eq!(
            store.peek_latest_raw_filtered("k").await.unwrap(),
            Some((160, 158))
        );
        store.write_control_code("k", 1).await.unwrap();
        assert_eq!(store.peek_latest_raw_filtered("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_slot_is_replaced_on_merge() {
        let (store, _) = store();
        store
            .kv
            .put("kalldata", "not json".to_string(), 60)
            .await
            .unwrap();
        assert!(matches!(
            store.read_recent("k", 1).await,
            Err(StoreError::Corrupt(_))
        ));

        let outcome = store
            .merge_sample("k", sample(150, 148, "1,1"))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Accepted(0));
        assert_eq!(store.read_recent("k", 1).await.unwrap().to_vec().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_cache_fails_merge_without_writing() {
        let clock = ManualClock::new(START_MS);
        let kv = kv::ReadOnlyKv {
            inner: MemoryKv::with_clock(clock.clone()),
        };
        let store = RecordStore::new(kv, clock, DEFAULT_MAX_ENTRIES);

        let err = store
            .merge_sample("k", sample(150, 148, "1,1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(matches!(
            store.write_control_code("k", 2).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.kv.inner.get("kalldata").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let (store, _) = store();
        store
            .merge_sample("ABCDE-111", sample(150, 148, "1,1"))
            .await
            .unwrap();
        assert!(store.read_recent("ABCDE-222", 1).await.unwrap().is_empty());
        assert!(store.read_recent("ABCDE", 1).await.unwrap().is_empty());
    }
}
