//! Sample standard deviation, gated by how many values are null.

use crate::error::{TransformError, TransformResult};
use crate::factory::{expect_arity, parse_number, Function};
use crate::reducers::sample_std_dev;
use crate::series::Datapoints;
use crate::shapes::{split_join_policy, ReducerOrMappingTransform, ValueMapping, ValueReducer};
use crate::source::DatapointSource;
use crate::transform::{Paging, QueryContext, Transform};

/// Largest tolerated share of null values, strictly inside `(0, 1)`.
pub fn parse_tolerance(raw: &str) -> TransformResult<f64> {
    let tolerance = parse_number(raw, "deviation tolerance")?;
    if tolerance <= 0.0 || tolerance >= 1.0 {
        return Err(TransformError::invalid(format!(
            "deviation tolerance must lie in (0, 1), got {tolerance}"
        )));
    }
    Ok(tolerance)
}

fn parse_points(raw: &str) -> TransformResult<usize> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(TransformError::invalid(format!(
            "deviation point count must be a positive integer, got '{}'",
            raw.trim()
        ))),
    }
}

fn tolerant_std_dev(values: &[Option<f64>], tolerance: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let null_share = (values.len() - present.len()) as f64 / values.len() as f64;
    if null_share > tolerance {
        return None;
    }
    sample_std_dev(&present)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deviation {
    pub tolerance: f64,
}

impl ValueReducer for Deviation {
    fn reduce(&self, values: &[Option<f64>]) -> TransformResult<Option<f64>> {
        Ok(tolerant_std_dev(values, self.tolerance))
    }
}

/// Deviation of a series' last `points` datapoints, emitted at its last timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingDeviation {
    pub tolerance: f64,
    pub points: usize,
}

impl ValueMapping for TrailingDeviation {
    fn map(&self, _ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        let all = source.take_rest()?;
        let mut out = Datapoints::new();
        let Some(last) = all.keys().next_back().copied() else {
            return Ok(out);
        };
        let tail: Vec<Option<f64>> = all.values().rev().take(self.points).copied().collect();
        out.insert(last, tolerant_std_dev(&tail, self.tolerance));
        Ok(out)
    }

    fn paging(&self) -> Paging {
        Paging::WholeRange
    }
}

/// `[tolerance]` reduces across series; `[tolerance, points]` maps each series.
pub fn deviation_transform(constants: &[String]) -> TransformResult<Box<dyn Transform>> {
    let function = Function::Deviation;
    let (join, rest) = split_join_policy(constants);
    expect_arity(function, &rest, 1, 2)?;
    let tolerance = parse_tolerance(&rest[0])?;
    let transform: ReducerOrMappingTransform<Deviation, TrailingDeviation> = match rest.get(1) {
        None => ReducerOrMappingTransform::reducing(function, Deviation { tolerance }, join),
        Some(points) => ReducerOrMappingTransform::mapping(
            function,
            TrailingDeviation {
                tolerance,
                points: parse_points(points)?,
            },
        ),
    };
    Ok(Box::new(transform))
}
