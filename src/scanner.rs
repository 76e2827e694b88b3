//! Lazily fetching scanners over a single series and the registry that keeps them unique.

use std::collections::HashSet;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::{TransformError, TransformResult};
use crate::series::{clip, Datapoint, Datapoints, QueryRange, SeriesId, TimeSeries};
use crate::store::MetricStore;

pub const DEFAULT_CHUNK_PERCENTAGE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScannerConfig {
    /// Fraction of the query span pulled per store round-trip.
    pub chunk_percentage: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            chunk_percentage: DEFAULT_CHUNK_PERCENTAGE,
        }
    }
}

pub fn validate_scanner_config(cfg: &ScannerConfig) -> TransformResult<()> {
    if !(cfg.chunk_percentage > 0.0 && cfg.chunk_percentage <= 1.0) {
        return Err(TransformError::invalid(format!(
            "chunk_percentage must be in (0, 1], got {}",
            cfg.chunk_percentage
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScannerKey {
    pub series: SeriesId,
    pub query: QueryRange,
}

/// Live scanners for one query session, keyed by (series, range).
#[derive(Debug, Default)]
pub struct ScannerRegistry {
    live: Mutex<HashSet<ScannerKey>>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self) -> MutexGuard<'_, HashSet<ScannerKey>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check and insert under one lock; a second scanner for the same key is refused.
    pub fn register(&self, key: ScannerKey) -> TransformResult<()> {
        let mut live = self.live();
        if live.contains(&key) {
            return Err(TransformError::invariant(format!(
                "scanner already open for {} [{}, {}]",
                key.series.identifier(),
                key.query.start,
                key.query.end
            )));
        }
        live.insert(key);
        Ok(())
    }

    pub fn release(&self, key: &ScannerKey) -> bool {
        self.live().remove(key)
    }

    pub fn contains(&self, key: &ScannerKey) -> bool {
        self.live().contains(key)
    }

    pub fn contains_series(&self, series: &SeriesId, query: &QueryRange) -> bool {
        self.contains(&ScannerKey {
            series: series.clone(),
            query: query.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Store, registry and fetch settings shared by every scanner of one query.
#[derive(Clone)]
pub struct ScannerSession {
    store: Arc<dyn MetricStore>,
    registry: Arc<ScannerRegistry>,
    config: ScannerConfig,
}

impl ScannerSession {
    pub fn new(store: Arc<dyn MetricStore>, config: ScannerConfig) -> TransformResult<Self> {
        Self::with_registry(store, Arc::new(ScannerRegistry::new()), config)
    }

    pub fn with_registry(
        store: Arc<dyn MetricStore>,
        registry: Arc<ScannerRegistry>,
        config: ScannerConfig,
    ) -> TransformResult<Self> {
        validate_scanner_config(&config)?;
        Ok(Self {
            store,
            registry,
            config,
        })
    }

    pub fn registry(&self) -> &Arc<ScannerRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    pub fn config(&self) -> ScannerConfig {
        self.config
    }

    /// Scanner with nothing resident yet.
    pub fn open(&self, id: SeriesId, query: QueryRange) -> TransformResult<Scanner> {
        let start = query.start;
        self.resume(TimeSeries::empty(id), query, start)
    }

    /// Scanner whose datapoints before `fetched_until` are already resident in `series`.
    pub fn resume(
        &self,
        series: TimeSeries,
        query: QueryRange,
        fetched_until: i64,
    ) -> TransformResult<Scanner> {
        if query.start > query.end {
            return Err(TransformError::invalid(format!(
                "query start {} is after end {}",
                query.start, query.end
            )));
        }

        let fetched_until = fetched_until.clamp(query.start, query.end.saturating_add(1));
        let resident = clip(&series.datapoints, query.start, fetched_until - 1);
        let key = ScannerKey {
            series: series.id.clone(),
            query: query.clone(),
        };
        self.registry.register(key.clone())?;

        let span = query.span() as f64;
        let chunk_ms = ((span * self.config.chunk_percentage).round() as i64).max(1);

        debug!(
            component = "scanner",
            event = "scanner.open",
            series = %series.id.identifier(),
            start = query.start,
            end = query.end,
            fetched_until,
            chunk_ms
        );

        Ok(Scanner {
            id: series.id,
            query,
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            key,
            chunk_ms,
            resident,
            fetched_until,
            cursor: None,
            disposed: false,
            fetch_calls: 0,
        })
    }
}

/// One series bound to one query range, pulling datapoints from the store on demand.
///
/// Everything below `fetched_until` has been pulled exactly once. The cursor is the
/// last timestamp handed out by `next_datapoint` or `datapoints_before`.
pub struct Scanner {
    id: SeriesId,
    query: QueryRange,
    store: Arc<dyn MetricStore>,
    registry: Arc<ScannerRegistry>,
    key: ScannerKey,
    chunk_ms: i64,
    resident: Datapoints,
    fetched_until: i64,
    cursor: Option<i64>,
    disposed: bool,
    fetch_calls: usize,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("id", &self.id)
            .field("query", &self.query)
            .field("fetched_until", &self.fetched_until)
            .field("cursor", &self.cursor)
            .field("disposed", &self.disposed)
            .field("fetch_calls", &self.fetch_calls)
            .finish()
    }
}

impl Scanner {
    pub fn id(&self) -> &SeriesId {
        &self.id
    }

    pub fn query(&self) -> &QueryRange {
        &self.query
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls
    }

    pub fn fetched_until(&self) -> i64 {
        self.fetched_until
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Datapoints pulled so far, consumed or not.
    pub fn resident(&self) -> &Datapoints {
        &self.resident
    }

    pub fn to_series(&self) -> TimeSeries {
        TimeSeries::new(self.id.clone(), self.resident.clone())
    }

    fn fully_fetched(&self) -> bool {
        self.fetched_until > self.query.end
    }

    pub fn is_exhausted(&self) -> bool {
        self.disposed || (self.fully_fetched() && self.next_resident().is_none())
    }

    fn next_resident(&self) -> Option<Datapoint> {
        let lower = self.cursor.map_or(Bound::Unbounded, Bound::Excluded);
        self.resident
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(ts, v)| (*ts, *v))
    }

    /// Pulls `[fetched_until, hi]` from the store.
    fn fetch_to(&mut self, hi: i64) -> TransformResult<()> {
        if self.disposed {
            return Err(TransformError::invariant(format!(
                "fetch on disposed scanner for {}",
                self.id.identifier()
            )));
        }
        let hi = hi.min(self.query.end);
        if hi < self.fetched_until {
            return Ok(());
        }

        let sub = self.query.with_bounds(self.fetched_until, hi);
        let mut reply = self.store.fetch(std::slice::from_ref(&sub)).map_err(|err| {
            warn!(
                component = "scanner",
                event = "scanner.fetch.error",
                series = %self.id.identifier(),
                start = sub.start,
                end = sub.end,
                error = %err
            );
            TransformError::from(err)
        })?;

        if let Some(unexpected) = reply.keys().find(|k| **k != sub) {
            return Err(TransformError::invariant(format!(
                "store answered [{}, {}] for requested [{}, {}]",
                unexpected.start, unexpected.end, sub.start, sub.end
            )));
        }

        let mut received = 0usize;
        for series in reply.remove(&sub).unwrap_or_default() {
            if series.id != self.id {
                continue;
            }
            for (ts, value) in clip(&series.datapoints, sub.start, sub.end) {
                self.resident.insert(ts, value);
                received += 1;
            }
        }

        self.fetched_until = hi + 1;
        self.fetch_calls += 1;

        debug!(
            component = "scanner",
            event = "scanner.fetch",
            series = %self.id.identifier(),
            start = sub.start,
            end = sub.end,
            received,
            fetch_calls = self.fetch_calls
        );
        Ok(())
    }

    fn fetch_next_chunk(&mut self) -> TransformResult<bool> {
        if self.fully_fetched() {
            return Ok(false);
        }
        let hi = self.fetched_until.saturating_add(self.chunk_ms - 1);
        self.fetch_to(hi)?;
        Ok(true)
    }

    /// Next unconsumed datapoint, fetching chunk by chunk until one shows up.
    fn advance_to_available(&mut self) -> TransformResult<Option<Datapoint>> {
        if self.disposed {
            return Ok(None);
        }
        loop {
            if let Some(dp) = self.next_resident() {
                return Ok(Some(dp));
            }
            if !self.fetch_next_chunk()? {
                self.dispose();
                return Ok(None);
            }
        }
    }

    pub fn has_next(&mut self) -> TransformResult<bool> {
        Ok(self.advance_to_available()?.is_some())
    }

    pub fn peek(&mut self) -> TransformResult<Option<Datapoint>> {
        self.advance_to_available()
    }

    fn exhausted_error(&self) -> TransformError {
        TransformError::invariant(format!(
            "scanner for {} [{}, {}] is exhausted",
            self.id.identifier(),
            self.query.start,
            self.query.end
        ))
    }

    pub fn next_datapoint(&mut self) -> TransformResult<Datapoint> {
        if self.disposed {
            return Err(self.exhausted_error());
        }
        let Some(dp) = self.advance_to_available()? else {
            return Err(self.exhausted_error());
        };
        self.cursor = Some(dp.0);
        self.dispose_if_exhausted();
        Ok(dp)
    }

    /// Consumes every datapoint strictly before `ts`, fetching only what is missing.
    pub fn datapoints_before(&mut self, ts: i64) -> TransformResult<Datapoints> {
        if self.disposed {
            return Err(self.exhausted_error());
        }
        self.fetch_to(ts.saturating_sub(1))?;

        let lower = self.cursor.map_or(Bound::Unbounded, Bound::Excluded);
        let taken: Datapoints = self
            .resident
            .range((lower, Bound::Excluded(ts)))
            .map(|(t, v)| (*t, *v))
            .collect();
        if let Some(last) = taken.keys().next_back() {
            self.cursor = Some(*last);
        }
        self.dispose_if_exhausted();
        Ok(taken)
    }

    /// Resident datapoints in `[start, end]` after fetching the missing part. Does not consume.
    pub fn datapoints_in_range(&mut self, start: i64, end: i64) -> TransformResult<Datapoints> {
        if end >= self.fetched_until && !self.fully_fetched() {
            self.fetch_to(end)?;
        }
        Ok(clip(&self.resident, start, end))
    }

    /// Consumes everything left and disposes.
    pub fn drain(&mut self) -> TransformResult<Datapoints> {
        if self.disposed && self.next_resident().is_none() {
            return Ok(Datapoints::new());
        }
        if !self.fully_fetched() {
            self.fetch_to(self.query.end)?;
        }
        let lower = self.cursor.map_or(Bound::Unbounded, Bound::Excluded);
        let rest: Datapoints = self
            .resident
            .range((lower, Bound::Unbounded))
            .map(|(t, v)| (*t, *v))
            .collect();
        if let Some(last) = rest.keys().next_back() {
            self.cursor = Some(*last);
        }
        self.dispose();
        Ok(rest)
    }

    fn dispose_if_exhausted(&mut self) {
        if self.fully_fetched() && self.next_resident().is_none() {
            self.dispose();
        }
    }

    /// Deregisters the scanner. Later fetches are invariant violations.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.registry.release(&self.key);
        debug!(
            component = "scanner",
            event = "scanner.dispose",
            series = %self.id.identifier(),
            fetch_calls = self.fetch_calls
        );
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn series() -> TimeSeries {
        TimeSeries::from_values("s", "m", (0..10).map(|i| (i * 100, i as f64)))
    }

    fn session(store: Arc<InMemoryStore>, pct: f64) -> ScannerSession {
        ScannerSession::new(
            store,
            ScannerConfig {
                chunk_percentage: pct,
            },
        )
        .expect("valid config")
    }

    #[test]
    fn rejects_out_of_range_chunk_percentage() {
        for pct in [0.0, -0.1, 1.5, f64::NAN] {
            let cfg = ScannerConfig {
                chunk_percentage: pct,
            };
            assert!(validate_scanner_config(&cfg).is_err());
        }
    }

    #[test]
    fn streams_in_order_without_refetching() {
        let store = Arc::new(InMemoryStore::new(vec![series()]));
        let s = session(Arc::clone(&store), 0.25);
        let q = QueryRange::for_series(&series().id, 0, 900);
        let mut scanner = s.open(series().id, q.clone()).expect("open");

        let mut seen = Vec::new();
        while scanner.has_next().expect("has_next") {
            seen.push(scanner.next_datapoint().expect("next").0);
        }
        assert_eq!(seen, (0..10).map(|i| i * 100).collect::<Vec<_>>());

        let ranges = store.fetched_ranges();
        for pair in ranges.windows(2) {
            assert_eq!(pair[1].start, pair[0].end + 1);
        }
        assert_eq!(ranges.last().map(|r| r.end), Some(900));
        assert!(scanner.is_disposed());
        assert!(!s.registry().contains_series(&series().id, &q));
    }

    #[test]
    fn next_after_exhaustion_is_invariant_violation() {
        let store = Arc::new(InMemoryStore::new(vec![series()]));
        let s = session(store, 1.0);
        let mut scanner = s
            .open(series().id, QueryRange::for_series(&series().id, 0, 900))
            .expect("open");
        scanner.drain().expect("drain");
        assert!(matches!(
            scanner.next_datapoint(),
            Err(TransformError::InvariantViolation(_))
        ));
        assert!(!scanner.has_next().expect("has_next on disposed"));
    }

    #[test]
    fn duplicate_scanner_is_refused_until_dropped() {
        let store = Arc::new(InMemoryStore::new(vec![series()]));
        let s = session(store, 0.5);
        let q = QueryRange::for_series(&series().id, 0, 900);
        let first = s.open(series().id, q.clone()).expect("first");
        assert!(matches!(
            s.open(series().id, q.clone()),
            Err(TransformError::InvariantViolation(_))
        ));
        drop(first);
        assert!(s.registry().is_empty());
        s.open(series().id, q).expect("reopen after drop");
    }

    #[test]
    fn range_access_fetches_only_missing_portion() {
        let store = Arc::new(InMemoryStore::new(vec![series()]));
        let s = session(Arc::clone(&store), 0.1);
        let q = QueryRange::for_series(&series().id, 0, 900);
        let mut scanner = s.resume(series(), q, 450).expect("resume");

        let low = scanner.datapoints_in_range(100, 300).expect("resident");
        assert_eq!(low.len(), 3);
        assert_eq!(store.fetch_count(), 0);

        let high = scanner.datapoints_in_range(400, 700).expect("fetch");
        assert_eq!(high.keys().copied().collect::<Vec<_>>(), vec![400, 500, 600, 700]);
        assert_eq!(
            store.fetched_ranges().iter().map(|r| (r.start, r.end)).collect::<Vec<_>>(),
            vec![(450, 700)]
        );
    }

    #[test]
    fn datapoints_before_consumes_prefix() {
        let store = Arc::new(InMemoryStore::new(vec![series()]));
        let s = session(store, 0.2);
        let mut scanner = s
            .open(series().id, QueryRange::for_series(&series().id, 0, 900))
            .expect("open");
        let before = scanner.datapoints_before(300).expect("before");
        assert_eq!(before.keys().copied().collect::<Vec<_>>(), vec![0, 100, 200]);
        assert_eq!(scanner.next_datapoint().expect("next").0, 300);
    }

    struct SkewedStore;

    impl MetricStore for SkewedStore {
        fn fetch(
            &self,
            queries: &[QueryRange],
        ) -> Result<crate::store::StoreReply, crate::store::StoreError> {
            Ok(queries
                .iter()
                .map(|q| (q.with_bounds(q.start, q.end + 1), Vec::new()))
                .collect())
        }
    }

    #[test]
    fn unexpected_reply_key_is_invariant_violation() {
        let s = ScannerSession::new(Arc::new(SkewedStore), ScannerConfig::default())
            .expect("session");
        let mut scanner = s
            .open(series().id, QueryRange::for_series(&series().id, 0, 900))
            .expect("open");
        assert!(matches!(
            scanner.has_next(),
            Err(TransformError::InvariantViolation(_))
        ));
    }
}
