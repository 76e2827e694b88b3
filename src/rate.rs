//! Per-interval rate of change, optionally over a linearly interpolated grid.

use crate::duration::{parse_window, ONE_SECOND_MS};
use crate::error::{TransformError, TransformResult};
use crate::factory::{expect_arity, Function};
use crate::series::Datapoints;
use crate::shapes::ValueMapping;
use crate::source::DatapointSource;
use crate::transform::{Paging, QueryContext};

const DEFAULT_INTERVAL_MS: i64 = 60 * ONE_SECOND_MS;

fn parse_flag(raw: &str, what: &str) -> TransformResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(TransformError::invalid(format!(
            "{what} must be true or false, got '{other}'"
        ))),
    }
}

fn interpolate(prev: (i64, f64), next: (i64, f64), ts: i64) -> f64 {
    let slope = (next.1 - prev.1) / (next.0 - prev.0) as f64;
    prev.1 + slope * (ts - prev.0) as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub interval_ms: i64,
    pub skip_negative: bool,
    pub interpolate: bool,
}

impl Default for Rate {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            skip_negative: true,
            interpolate: true,
        }
    }
}

impl Rate {
    /// `[]` for the defaults, or `[interval, skip_negative, interpolate]`.
    pub fn from_constants(constants: &[String]) -> TransformResult<Self> {
        if constants.is_empty() {
            return Ok(Self::default());
        }
        expect_arity(Function::Rate, constants, 3, 3)?;
        Ok(Self {
            interval_ms: parse_window(&constants[0])?,
            skip_negative: parse_flag(&constants[1], "skip-negative flag")?,
            interpolate: parse_flag(&constants[2], "interpolate flag")?,
        })
    }

    /// Adds edge points at the query bounds when the series starts or ends at least
    /// one interval inside them, then fills every interior gap on the interval grid.
    fn fill_grid(&self, points: &[(i64, f64)], start: i64, end: i64) -> Vec<(i64, f64)> {
        let mut edged: Vec<(i64, f64)> = Vec::with_capacity(points.len() + 2);
        let first = points[0];
        let last = points[points.len() - 1];
        if first.0 >= start.saturating_add(self.interval_ms) {
            edged.push((start, interpolate(first, points[1], start)));
        }
        edged.extend_from_slice(points);
        if end >= last.0.saturating_add(self.interval_ms) {
            edged.push((end, interpolate(points[points.len() - 2], last, end)));
        }

        let mut grid = Vec::with_capacity(edged.len());
        let mut prev = edged[0];
        for &current in &edged {
            let mut cursor = prev.0;
            while let Some(next) = cursor
                .checked_add(self.interval_ms)
                .filter(|next| *next < current.0)
            {
                cursor = next;
                grid.push((cursor, interpolate(prev, current, cursor)));
            }
            grid.push(current);
            prev = current;
        }
        grid
    }
}

impl ValueMapping for Rate {
    fn map(&self, ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        let all = source.take_rest()?;
        let points: Vec<(i64, f64)> = all
            .iter()
            .filter_map(|(ts, v)| v.map(|v| (*ts, v)))
            .collect();
        if points.len() < 2 {
            return Ok(all);
        }

        let start = ctx.start.filter(|s| *s > 0).unwrap_or(points[0].0);
        let end = ctx.end.filter(|e| *e > 0).unwrap_or(points[points.len() - 1].0);
        let grid = if self.interpolate {
            self.fill_grid(&points, start, end)
        } else {
            points
        };

        let mut out = Datapoints::new();
        for pair in grid.windows(2) {
            let (prev, current) = (pair[0], pair[1]);
            let rate = self.interval_ms as f64 * (current.1 - prev.1) / (current.0 - prev.0) as f64;
            if self.skip_negative && rate < 0.0 {
                continue;
            }
            out.insert(current.0, Some(rate));
        }
        Ok(out)
    }

    fn paging(&self) -> Paging {
        Paging::WholeRange
    }
}
