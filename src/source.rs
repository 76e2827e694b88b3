//! Ordered timestamp-value sources: one trait, an in-memory adapter and the scanner adapter.
//!
//! Strategies read their input only through [`DatapointSource`], so the same code serves
//! materialized series and live scanners.

use std::ops::Bound;

use crate::error::TransformResult;
use crate::scanner::Scanner;
use crate::series::{clip, Datapoint, Datapoints, SeriesId, TimeSeries};

pub trait DatapointSource {
    fn series_id(&self) -> &SeriesId;

    /// Next unconsumed datapoint, without consuming it.
    fn peek_point(&mut self) -> TransformResult<Option<Datapoint>>;

    fn next_point(&mut self) -> TransformResult<Option<Datapoint>>;

    /// Consumes every datapoint strictly before `ts`.
    fn take_before(&mut self, ts: i64) -> TransformResult<Datapoints>;

    /// Datapoints in `[start, end]`, consumed or not. Does not move the cursor.
    fn points_in_range(&mut self, start: i64, end: i64) -> TransformResult<Datapoints>;

    /// Consumes everything left.
    fn take_rest(&mut self) -> TransformResult<Datapoints>;

    /// Consumes datapoints up to and including `ts`.
    fn take_through(&mut self, ts: i64) -> TransformResult<Datapoints> {
        match ts.checked_add(1) {
            Some(next) => self.take_before(next),
            None => self.take_rest(),
        }
    }
}

/// Source over a borrowed, fully materialized series.
#[derive(Debug)]
pub struct MapSource<'a> {
    id: &'a SeriesId,
    points: &'a Datapoints,
    cursor: Option<i64>,
}

impl<'a> MapSource<'a> {
    pub fn new(series: &'a TimeSeries) -> Self {
        Self {
            id: &series.id,
            points: &series.datapoints,
            cursor: None,
        }
    }

    fn remaining(&self) -> std::collections::btree_map::Range<'a, i64, Option<f64>> {
        let lower = self.cursor.map_or(Bound::Unbounded, Bound::Excluded);
        self.points.range((lower, Bound::Unbounded))
    }
}

impl DatapointSource for MapSource<'_> {
    fn series_id(&self) -> &SeriesId {
        self.id
    }

    fn peek_point(&mut self) -> TransformResult<Option<Datapoint>> {
        Ok(self.remaining().next().map(|(ts, v)| (*ts, *v)))
    }

    fn next_point(&mut self) -> TransformResult<Option<Datapoint>> {
        let next = self.remaining().next().map(|(ts, v)| (*ts, *v));
        if let Some((ts, _)) = next {
            self.cursor = Some(ts);
        }
        Ok(next)
    }

    fn take_before(&mut self, ts: i64) -> TransformResult<Datapoints> {
        let taken: Datapoints = self
            .remaining()
            .take_while(|(t, _)| **t < ts)
            .map(|(t, v)| (*t, *v))
            .collect();
        if let Some(last) = taken.keys().next_back() {
            self.cursor = Some(*last);
        }
        Ok(taken)
    }

    fn points_in_range(&mut self, start: i64, end: i64) -> TransformResult<Datapoints> {
        Ok(clip(self.points, start, end))
    }

    fn take_rest(&mut self) -> TransformResult<Datapoints> {
        let rest: Datapoints = self.remaining().map(|(t, v)| (*t, *v)).collect();
        if let Some(last) = rest.keys().next_back() {
            self.cursor = Some(*last);
        }
        Ok(rest)
    }
}

impl DatapointSource for Scanner {
    fn series_id(&self) -> &SeriesId {
        self.id()
    }

    fn peek_point(&mut self) -> TransformResult<Option<Datapoint>> {
        self.peek()
    }

    fn next_point(&mut self) -> TransformResult<Option<Datapoint>> {
        if !self.has_next()? {
            return Ok(None);
        }
        self.next_datapoint().map(Some)
    }

    fn take_before(&mut self, ts: i64) -> TransformResult<Datapoints> {
        if self.is_disposed() {
            return Ok(Datapoints::new());
        }
        self.datapoints_before(ts)
    }

    fn points_in_range(&mut self, start: i64, end: i64) -> TransformResult<Datapoints> {
        self.datapoints_in_range(start, end)
    }

    fn take_rest(&mut self) -> TransformResult<Datapoints> {
        self.drain()
    }
}

/// Values sharing one timestamp across several sources, in source order.
/// `None` marks a source with no datapoint at that timestamp.
pub type Collated = (i64, Vec<Option<Option<f64>>>);

/// Pops the smallest pending timestamp across `sources` and every value recorded at it.
pub fn next_collated(sources: &mut [&mut dyn DatapointSource]) -> TransformResult<Option<Collated>> {
    let mut min_ts: Option<i64> = None;
    for source in sources.iter_mut() {
        if let Some((ts, _)) = source.peek_point()? {
            min_ts = Some(min_ts.map_or(ts, |m| m.min(ts)));
        }
    }
    let Some(ts) = min_ts else {
        return Ok(None);
    };

    let mut row = Vec::with_capacity(sources.len());
    for source in sources.iter_mut() {
        match source.peek_point()? {
            Some((t, _)) if t == ts => row.push(source.next_point()?.map(|(_, v)| v)),
            _ => row.push(None),
        }
    }
    Ok(Some((ts, row)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(points: &[(i64, Option<f64>)]) -> TimeSeries {
        TimeSeries::new(SeriesId::new("s", "m"), points.iter().copied().collect())
    }

    #[test]
    fn map_source_walks_in_order() {
        let s = series(&[(1, Some(1.0)), (2, None), (5, Some(5.0))]);
        let mut src = MapSource::new(&s);
        assert_eq!(src.peek_point().expect("peek"), Some((1, Some(1.0))));
        assert_eq!(src.next_point().expect("next"), Some((1, Some(1.0))));
        let before = src.take_before(5).expect("before");
        assert_eq!(before.len(), 1);
        assert_eq!(before.get(&2), Some(&None));
        assert_eq!(src.take_rest().expect("rest").len(), 1);
        assert_eq!(src.next_point().expect("end"), None);
        assert_eq!(src.points_in_range(0, 10).expect("range").len(), 3);
    }

    #[test]
    fn collation_marks_missing_sources() {
        let a = series(&[(1, Some(1.0)), (3, Some(3.0))]);
        let b = series(&[(2, Some(20.0)), (3, None)]);
        let mut sa = MapSource::new(&a);
        let mut sb = MapSource::new(&b);
        let mut sources: Vec<&mut dyn DatapointSource> = vec![&mut sa, &mut sb];

        let mut rows = Vec::new();
        while let Some(row) = next_collated(&mut sources).expect("collate") {
            rows.push(row);
        }
        assert_eq!(
            rows,
            vec![
                (1, vec![Some(Some(1.0)), None]),
                (2, vec![None, Some(Some(20.0))]),
                (3, vec![Some(Some(3.0)), Some(None)]),
            ]
        );
    }
}
