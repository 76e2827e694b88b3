//! Backing-store fetch contract.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

use crate::series::{clip, QueryRange, TimeSeries};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store query failed for {scope}:{name} [{start}, {end}]: {message}")]
    Query {
        scope: String,
        name: String,
        start: i64,
        end: i64,
        message: String,
    },
}

pub type StoreReply = HashMap<QueryRange, Vec<TimeSeries>>;

/// Resolves query ranges to the series whose datapoints fall inside them.
///
/// Replies are keyed by the exact range requested. A range with no data may be
/// absent from the reply or map to an empty list.
pub trait MetricStore: Send + Sync {
    fn fetch(&self, queries: &[QueryRange]) -> Result<StoreReply, StoreError>;
}

/// Store over a fixed set of series. Records every range it is asked for.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    series: Vec<TimeSeries>,
    fetched: Mutex<Vec<QueryRange>>,
}

impl InMemoryStore {
    pub fn new(series: Vec<TimeSeries>) -> Self {
        Self {
            series,
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn fetched_ranges(&self) -> Vec<QueryRange> {
        self.fetched
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetched.lock().map(|log| log.len()).unwrap_or_default()
    }
}

impl MetricStore for InMemoryStore {
    fn fetch(&self, queries: &[QueryRange]) -> Result<StoreReply, StoreError> {
        let mut reply = StoreReply::new();
        for query in queries {
            let matched: Vec<TimeSeries> = self
                .series
                .iter()
                .filter(|s| query.matches(&s.id))
                .map(|s| TimeSeries::new(s.id.clone(), clip(&s.datapoints, query.start, query.end)))
                .collect();
            debug!(
                component = "store",
                event = "store.fetch",
                scope = %query.scope,
                name = %query.name,
                start = query.start,
                end = query.end,
                matched = matched.len()
            );
            reply.insert(query.clone(), matched);
        }

        let mut log = self
            .fetched
            .lock()
            .map_err(|_| StoreError::Unavailable("fetch log poisoned".to_string()))?;
        log.extend(queries.iter().cloned());
        Ok(reply)
    }
}
