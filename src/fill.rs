//! Gap filling for existing series, and constant lines when there is no input.

use crate::duration::{parse_duration, parse_timestamp, parse_window};
use crate::error::{TransformError, TransformResult};
use crate::factory::{parse_number, Function};
use crate::series::{Datapoints, SeriesId, TimeSeries, DEFAULT_METRIC_NAME};
use crate::source::DatapointSource;
use crate::transform::{Paging, QueryContext, Transform};

pub const LINE_SCOPE: &str = "scope";

#[derive(Debug, Clone, PartialEq)]
pub enum FillMode {
    /// `[interval, offset, value]`: fills gaps wider than `interval` in each input.
    Gaps {
        interval_ms: i64,
        offset_ms: i64,
        value: f64,
    },
    /// `[start, end, interval, offset, value]`: a constant line, built without input.
    /// Start and end stay raw so relative tokens resolve against the query.
    Line {
        start: String,
        end: String,
        interval_ms: i64,
        offset_ms: i64,
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillTransform {
    pub mode: FillMode,
}

impl FillTransform {
    pub fn from_constants(constants: &[String]) -> TransformResult<Self> {
        let mode = match constants {
            [interval, offset, value] => FillMode::Gaps {
                interval_ms: parse_window(interval)?,
                offset_ms: parse_duration(offset)?,
                value: parse_number(value, "fill value")?,
            },
            [start, end, interval, offset, value] => {
                for raw in [start, end] {
                    if raw.trim().parse::<i64>().is_err() {
                        parse_duration(raw)?;
                    }
                }
                FillMode::Line {
                    start: start.trim().to_string(),
                    end: end.trim().to_string(),
                    interval_ms: parse_window(interval)?,
                    offset_ms: parse_duration(offset)?,
                    value: parse_number(value, "fill value")?,
                }
            }
            _ => {
                return Err(TransformError::invalid(format!(
                    "{} takes [interval, offset, value] or [start, end, interval, offset, value], got {} constants",
                    Function::Fill,
                    constants.len()
                )))
            }
        };
        Ok(Self { mode })
    }
}

/// Walks from the first to the last timestamp, inserting a gap marker one interval after
/// the cursor whenever the next datapoint is further away. Gaps and nulls become `value`
/// at their timestamp shifted by `offset`; remaining nulls are dropped.
pub fn fill_gaps(points: &Datapoints, interval_ms: i64, offset_ms: i64, value: f64) -> Datapoints {
    let timestamps: Vec<i64> = points.keys().copied().collect();
    let Some(&first) = timestamps.first() else {
        return Datapoints::new();
    };

    let mut walked: Vec<(i64, Option<f64>)> = Vec::with_capacity(timestamps.len());
    let mut cursor = first;
    let mut next = 1;
    loop {
        walked.push((cursor, points.get(&cursor).copied().flatten()));
        let Some(&upcoming) = timestamps.get(next) else {
            break;
        };
        if cursor + interval_ms < upcoming {
            cursor += interval_ms;
        } else {
            cursor = upcoming;
            next += 1;
        }
    }

    let mut filled: Datapoints = walked.iter().copied().collect();
    for (ts, v) in &walked {
        if v.is_none() {
            filled.insert(ts + offset_ms, Some(value));
        }
    }
    filled.retain(|_, v| v.is_some());
    filled
}

/// Constant line from `start` to `end` on the interval grid, shifted by `offset`.
pub fn fill_line(start: i64, end: i64, interval_ms: i64, offset_ms: i64, value: f64) -> TransformResult<TimeSeries> {
    if start >= end {
        return Err(TransformError::invalid(format!(
            "fill line start {start} must be before end {end}"
        )));
    }
    let start = start - start.rem_euclid(interval_ms);
    let end = end - end.rem_euclid(interval_ms);

    let mut datapoints = Datapoints::new();
    let mut ts = start;
    while ts < end {
        datapoints.insert(ts + offset_ms, Some(value));
        ts += interval_ms;
    }
    datapoints.insert(end + offset_ms, Some(value));
    Ok(TimeSeries::new(
        SeriesId::new(LINE_SCOPE, DEFAULT_METRIC_NAME),
        datapoints,
    ))
}

fn resolve_bound(raw: &str, ctx: &QueryContext) -> TransformResult<i64> {
    if let Ok(ts) = raw.parse::<i64>() {
        return Ok(ts);
    }
    let relative_to = ctx.relative_to.ok_or_else(|| {
        TransformError::invalid(format!(
            "relative fill bound '{raw}' needs a query reference time"
        ))
    })?;
    parse_timestamp(raw, relative_to)
}

impl Transform for FillTransform {
    fn function(&self) -> Function {
        Function::Fill
    }

    fn apply(
        &self,
        ctx: &QueryContext,
        sources: &mut [&mut dyn DatapointSource],
    ) -> TransformResult<Vec<TimeSeries>> {
        match &self.mode {
            FillMode::Gaps {
                interval_ms,
                offset_ms,
                value,
            } => {
                if sources.is_empty() {
                    return Err(TransformError::invalid(
                        "fill needs input series, or [start, end, interval, offset, value] for a line",
                    ));
                }
                let mut out = Vec::with_capacity(sources.len());
                for source in sources.iter_mut() {
                    let id = source.series_id().clone();
                    let points = source.take_rest()?;
                    out.push(TimeSeries::new(
                        id,
                        fill_gaps(&points, *interval_ms, *offset_ms, *value),
                    ));
                }
                Ok(out)
            }
            FillMode::Line {
                start,
                end,
                interval_ms,
                offset_ms,
                value,
            } => {
                if !sources.is_empty() {
                    return Err(TransformError::invalid(
                        "a fill line is built without input series",
                    ));
                }
                let line = fill_line(
                    resolve_bound(start, ctx)?,
                    resolve_bound(end, ctx)?,
                    *interval_ms,
                    *offset_ms,
                    *value,
                )?;
                Ok(vec![line])
            }
        }
    }

    fn paging(&self) -> Paging {
        Paging::WholeRange
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constants(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn gaps_are_filled_on_the_interval_grid() {
        let points: Datapoints = [(1_000, Some(1.0)), (2_000, None), (6_000, Some(6.0))]
            .into_iter()
            .collect();
        let out = fill_gaps(&points, 2_000, 0, 0.0);
        assert_eq!(
            out,
            [(1_000, Some(1.0)), (2_000, Some(0.0)), (4_000, Some(0.0)), (6_000, Some(6.0))]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn offset_moves_filled_points_only() {
        let points: Datapoints = [(0, Some(1.0)), (10_000, Some(2.0))].into_iter().collect();
        let out = fill_gaps(&points, 3_000, 1_000, 9.0);
        assert_eq!(
            out,
            [
                (0, Some(1.0)),
                (4_000, Some(9.0)),
                (7_000, Some(9.0)),
                (10_000, Some(9.0))
            ]
            .into_iter()
            .collect()
        );
    }

    #[test]
    fn line_snaps_bounds_and_includes_end() {
        let line = fill_line(1_500, 7_200, 2_000, 0, 3.0).expect("line");
        assert_eq!(line.id, SeriesId::new(LINE_SCOPE, DEFAULT_METRIC_NAME));
        let keys: Vec<i64> = line.datapoints.keys().copied().collect();
        assert_eq!(keys, vec![0, 2_000, 4_000, 6_000]);
        assert!(fill_line(5, 5, 1, 0, 0.0).is_err());
    }

    #[test]
    fn relative_line_bounds_resolve_against_query() {
        let fill = FillTransform::from_constants(&constants(&["-4s", "-0s", "1s", "0s", "1"])).expect("build");
        let ctx = QueryContext::default().with_relative_to(10_000);
        let out = fill.transform(&ctx, &[]).expect("line");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].datapoints.len(), 5);
        assert_eq!(out[0].first_timestamp(), Some(6_000));

        assert!(fill.transform(&QueryContext::default(), &[]).is_err());
    }

    #[test]
    fn arity_selects_mode() {
        assert!(FillTransform::from_constants(&constants(&["1m", "0m"])).is_err());
        let gaps = FillTransform::from_constants(&constants(&["1m", "0m", "0"])).expect("gaps");
        assert!(gaps.transform(&QueryContext::default(), &[]).is_err());
    }
}
