//! Chunked execution of one transform over a set of scanners.
//!
//! The query range is cut into `chunk_ms` slices. How much input a chunk needs depends on
//! the transform's [`Paging`] policy; either way the chunks together equal the eager result.

use std::thread;

use crate::error::{TransformError, TransformResult};
use crate::observability::log_pager_chunk;
use crate::scanner::Scanner;
use crate::series::{clip, TimeSeries};
use crate::transform::{Paging, QueryContext, Transform};

pub struct Pager {
    scanners: Vec<Scanner>,
    transform: Box<dyn Transform>,
    ctx: QueryContext,
    start: i64,
    end: i64,
    chunk_ms: i64,
    chunks: usize,
    whole_range: Option<Vec<TimeSeries>>,
}

impl std::fmt::Debug for Pager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("function", &self.transform.function())
            .field("scanners", &self.scanners.len())
            .field("start", &self.start)
            .field("end", &self.end)
            .field("chunk_ms", &self.chunk_ms)
            .field("chunks", &self.chunks)
            .finish()
    }
}

impl Pager {
    pub fn new(
        scanners: Vec<Scanner>,
        chunk_ms: i64,
        transform: Box<dyn Transform>,
        ctx: QueryContext,
    ) -> TransformResult<Self> {
        let (Some(start), Some(end)) = (
            scanners.iter().map(|s| s.query().start).min(),
            scanners.iter().map(|s| s.query().end).max(),
        ) else {
            return Err(TransformError::invalid("a pager needs at least one scanner"));
        };

        let span = end - start;
        if chunk_ms <= 0 {
            return Err(TransformError::invalid(format!(
                "chunk size must be positive, got {chunk_ms}"
            )));
        }
        if span > 0 && chunk_ms > span {
            return Err(TransformError::invalid(format!(
                "chunk size {chunk_ms} exceeds the query span {span}"
            )));
        }
        let chunks = if span == 0 {
            1
        } else {
            (span + chunk_ms - 1) / chunk_ms
        };

        Ok(Self {
            scanners,
            transform,
            ctx,
            start,
            end,
            chunk_ms,
            chunks: chunks as usize,
            whole_range: None,
        })
    }

    pub fn number_chunks(&self) -> usize {
        self.chunks
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// Inclusive input bounds of chunk `index`; the last chunk runs to the query end.
    fn chunk_bounds(&self, index: usize) -> (i64, i64) {
        let lo = self.start + index as i64 * self.chunk_ms;
        let hi = if index + 1 == self.chunks {
            self.end
        } else {
            lo + self.chunk_ms - 1
        };
        (lo, hi)
    }

    /// Output bounds of chunk `index`: the outer chunks are open-ended so outputs whose
    /// timestamps move outside the query range still land in exactly one chunk.
    fn output_bounds(&self, index: usize) -> (i64, i64) {
        let (lo, hi) = self.chunk_bounds(index);
        let lo = if index == 0 { i64::MIN } else { lo };
        let hi = if index + 1 == self.chunks { i64::MAX } else { hi };
        (lo, hi)
    }

    /// Slices `[lo, hi]` from every scanner, one scoped thread per scanner.
    fn fetch_slices(&mut self, lo: i64, hi: i64) -> TransformResult<Vec<TimeSeries>> {
        let results: Vec<TransformResult<TimeSeries>> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .scanners
                .iter_mut()
                .map(|scanner| {
                    scope.spawn(move || -> TransformResult<TimeSeries> {
                        let points = scanner.datapoints_in_range(lo, hi)?;
                        Ok(TimeSeries::new(scanner.id().clone(), points))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(TransformError::invariant("scanner fetch thread panicked"))
                    })
                })
                .collect()
        });
        results.into_iter().collect()
    }

    fn whole_range_result(&mut self) -> TransformResult<Vec<TimeSeries>> {
        if let Some(cached) = &self.whole_range {
            return Ok(cached.clone());
        }
        let inputs = self.fetch_slices(self.start, self.end)?;
        let result = self.transform.transform(&self.ctx, &inputs)?;
        self.whole_range = Some(result.clone());
        Ok(result)
    }

    /// Result series restricted to chunk `index`, empty series included.
    pub fn metric_chunk(&mut self, index: usize) -> TransformResult<Vec<TimeSeries>> {
        if index >= self.chunks {
            return Err(TransformError::invariant(format!(
                "chunk {index} requested from a pager with {} chunks",
                self.chunks
            )));
        }
        let (lo, hi) = self.chunk_bounds(index);
        let (out_lo, out_hi) = self.output_bounds(index);
        let paging = self.transform.paging();

        let result = match paging {
            Paging::Pointwise => {
                let inputs = self.fetch_slices(lo, hi)?;
                self.transform.transform(&self.ctx, &inputs)?
            }
            Paging::Lookback(ms) => {
                let from = lo.saturating_sub(ms).max(self.start);
                let inputs = self.fetch_slices(from, hi)?;
                clip_all(self.transform.transform(&self.ctx, &inputs)?, out_lo, out_hi)
            }
            Paging::WholeRange => clip_all(self.whole_range_result()?, out_lo, out_hi),
        };

        log_pager_chunk(
            self.transform.function(),
            index,
            self.chunks,
            lo,
            hi,
            &result,
        );

        if index + 1 == self.chunks {
            for scanner in &mut self.scanners {
                scanner.dispose();
            }
        }
        Ok(result)
    }

    /// Every chunk in order, concatenated per output series position.
    pub fn collect_all(&mut self) -> TransformResult<Vec<TimeSeries>> {
        let mut merged: Vec<TimeSeries> = Vec::new();
        for index in 0..self.chunks {
            for (position, series) in self.metric_chunk(index)?.into_iter().enumerate() {
                match merged.get_mut(position) {
                    Some(existing) => existing.datapoints.extend(series.datapoints),
                    None => merged.push(series),
                }
            }
        }
        Ok(merged)
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        for scanner in &mut self.scanners {
            scanner.dispose();
        }
    }
}

fn clip_all(series: Vec<TimeSeries>, lo: i64, hi: i64) -> Vec<TimeSeries> {
    series
        .into_iter()
        .map(|s| {
            let datapoints = clip(&s.datapoints, lo, hi);
            TimeSeries::new(s.id, datapoints)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::factory::TransformFactory;
    use crate::scanner::{ScannerConfig, ScannerSession};
    use crate::series::{QueryRange, SeriesId};
    use crate::store::InMemoryStore;

    fn session() -> ScannerSession {
        let series = TimeSeries::from_values("s", "m", (0..10).map(|i| (i * 100, i as f64)));
        let store = Arc::new(InMemoryStore::new(vec![series]));
        ScannerSession::new(store, ScannerConfig::default()).expect("session")
    }

    fn scanner(session: &ScannerSession, start: i64, end: i64) -> Scanner {
        let id = SeriesId::new("s", "m");
        let query = QueryRange::for_series(&id, start, end);
        session.open(id, query).expect("open")
    }

    fn identity() -> Box<dyn Transform> {
        TransformFactory::new().create("IDENTITY", &[]).expect("identity")
    }

    #[test]
    fn chunk_count_rounds_up() {
        let session = session();
        let pager = Pager::new(vec![scanner(&session, 0, 900)], 400, identity(), QueryContext::default())
            .expect("pager");
        assert_eq!(pager.number_chunks(), 3);
    }

    #[test]
    fn chunk_size_is_validated() {
        let session = session();
        assert!(Pager::new(vec![scanner(&session, 0, 900)], 0, identity(), QueryContext::default()).is_err());
        let session = self::session();
        assert!(Pager::new(vec![scanner(&session, 0, 900)], 901, identity(), QueryContext::default()).is_err());
        let session = self::session();
        let point = Pager::new(vec![scanner(&session, 500, 500)], 10, identity(), QueryContext::default())
            .expect("single point range");
        assert_eq!(point.number_chunks(), 1);
        assert!(Pager::new(Vec::new(), 10, identity(), QueryContext::default()).is_err());
    }

    #[test]
    fn out_of_range_chunk_is_an_invariant_violation() {
        let session = session();
        let mut pager = Pager::new(vec![scanner(&session, 0, 900)], 300, identity(), QueryContext::default())
            .expect("pager");
        assert!(matches!(
            pager.metric_chunk(3),
            Err(TransformError::InvariantViolation(_))
        ));
    }

    #[test]
    fn pointwise_chunks_partition_the_series() {
        let session = session();
        let mut pager = Pager::new(vec![scanner(&session, 0, 900)], 400, identity(), QueryContext::default())
            .expect("pager");
        let sizes: Vec<usize> = (0..pager.number_chunks())
            .map(|i| pager.metric_chunk(i).expect("chunk")[0].datapoints.len())
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(session.registry().is_empty());
    }

    #[test]
    fn dropping_a_pager_releases_scanners() {
        let session = session();
        let pager = Pager::new(vec![scanner(&session, 0, 900)], 300, identity(), QueryContext::default())
            .expect("pager");
        assert_eq!(session.registry().len(), 1);
        drop(pager);
        assert!(session.registry().is_empty());
    }
}
