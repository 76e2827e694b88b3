//! Percentile with linear interpolation, across series or over fixed windows of one series.

use crate::duration::parse_window;
use crate::error::{TransformError, TransformResult};
use crate::factory::{expect_arity, parse_number, Function};
use crate::series::Datapoints;
use crate::shapes::{split_join_policy, ReducerOrMappingTransform, ValueMapping, ValueReducer};
use crate::source::DatapointSource;
use crate::transform::{Paging, QueryContext, Transform};

/// A percentile in `[0, 100]`.
pub fn parse_percentile(raw: &str) -> TransformResult<f64> {
    let p = parse_number(raw, "percentile")?;
    if !(0.0..=100.0).contains(&p) {
        return Err(TransformError::invalid(format!(
            "percentile must lie in [0, 100], got {p}"
        )));
    }
    Ok(p)
}

/// Rank `p/100 * (n-1)` over the sorted values, interpolated between neighbours.
pub fn percentile_of(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let fraction = rank - lo as f64;
    Some(sorted[lo] + fraction * (sorted[hi] - sorted[lo]))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Percentile {
    pub p: f64,
}

impl ValueReducer for Percentile {
    fn reduce(&self, values: &[Option<f64>]) -> TransformResult<Option<f64>> {
        let present: Vec<f64> = values.iter().flatten().copied().collect();
        Ok(percentile_of(&present, self.p))
    }
}

/// Marks the per-series form without a window.
pub const INDIVIDUAL_TOKEN: &str = "INDIVIDUAL";

/// Replaces each window `[w, w + size)` anchored at the series' first timestamp with
/// its percentile, emitted at the window's last timestamp. Without a window the
/// whole series is one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowedPercentile {
    pub p: f64,
    pub window_ms: Option<i64>,
}

impl ValueMapping for WindowedPercentile {
    fn map(&self, _ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        let mut out = Datapoints::new();
        let Some(window_ms) = self.window_ms else {
            let all = source.take_rest()?;
            if let Some(last) = all.keys().next_back().copied() {
                let present: Vec<f64> = all.values().flatten().copied().collect();
                out.insert(last, percentile_of(&present, self.p));
            }
            return Ok(out);
        };
        let mut anchor: Option<i64> = None;
        while let Some((ts, _)) = source.peek_point()? {
            let first = *anchor.get_or_insert(ts);
            let start = first + ((ts - first) / window_ms) * window_ms;
            let window = source.take_before(start.saturating_add(window_ms))?;
            let Some(last) = window.keys().next_back().copied() else {
                break;
            };
            let present: Vec<f64> = window.values().flatten().copied().collect();
            out.insert(last, percentile_of(&present, self.p));
        }
        Ok(out)
    }

    fn paging(&self) -> Paging {
        Paging::WholeRange
    }
}

/// `[p]` (optionally with `union`) reduces; `[p, window]` and `[p, INDIVIDUAL]` map.
pub fn percentile_transform(constants: &[String]) -> TransformResult<Box<dyn Transform>> {
    let function = Function::Percentile;
    let (join, rest) = split_join_policy(constants);
    expect_arity(function, &rest, 1, 2)?;
    let p = parse_percentile(&rest[0])?;
    let transform: ReducerOrMappingTransform<Percentile, WindowedPercentile> = match rest.get(1) {
        None => ReducerOrMappingTransform::reducing(function, Percentile { p }, join),
        Some(token) if token.eq_ignore_ascii_case(INDIVIDUAL_TOKEN) => {
            ReducerOrMappingTransform::mapping(function, WindowedPercentile { p, window_ms: None })
        }
        Some(window) => ReducerOrMappingTransform::mapping(
            function,
            WindowedPercentile {
                p,
                window_ms: Some(parse_window(window)?),
            },
        ),
    };
    Ok(Box::new(transform))
}
