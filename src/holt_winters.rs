//! Triple exponential smoothing (Holt-Winters) with one week of bootstrap history.

use tracing::debug;

use crate::duration::ONE_WEEK_MS;
use crate::error::{TransformError, TransformResult};
use crate::factory::{expect_arity, parse_number, Function};
use crate::scanner::ScannerSession;
use crate::series::{Datapoints, QueryRange};
use crate::shapes::ValueMapping;
use crate::source::DatapointSource;
use crate::transform::{Paging, QueryContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoltWintersOutput {
    Forecast,
    Deviation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoltWintersParams {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub season_length: usize,
}

impl HoltWintersParams {
    pub fn from_constants(function: Function, constants: &[String]) -> TransformResult<Self> {
        expect_arity(function, constants, 4, 4)?;
        let coefficient = |raw: &str, what: &str| -> TransformResult<f64> {
            let v = parse_number(raw, what)?;
            if !(0.0..=1.0).contains(&v) {
                return Err(TransformError::invalid(format!("{what} must lie in [0, 1], got {v}")));
            }
            Ok(v)
        };
        let season_length = match constants[3].trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                return Err(TransformError::invalid(format!(
                    "season length must be a positive integer, got '{}'",
                    constants[3].trim()
                )))
            }
        };
        Ok(Self {
            alpha: coefficient(&constants[0], "alpha")?,
            beta: coefficient(&constants[1], "beta")?,
            gamma: coefficient(&constants[2], "gamma")?,
            season_length,
        })
    }
}

/// One forecast and one deviation per input value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoltWintersStep {
    pub forecast: f64,
    pub deviation: f64,
}

/// Runs the smoothing recurrence over `values` in order.
pub fn holt_winters(values: &[f64], params: HoltWintersParams) -> Vec<HoltWintersStep> {
    let HoltWintersParams {
        alpha,
        beta,
        gamma,
        season_length,
    } = params;
    // Entry `i - season_length`, or 0 before the first full season.
    let season_back = |list: &[f64], i: usize| -> f64 {
        i.checked_sub(season_length)
            .and_then(|j| list.get(j).copied())
            .unwrap_or(0.0)
    };

    let mut intercepts: Vec<f64> = Vec::with_capacity(values.len());
    let mut slopes: Vec<f64> = Vec::with_capacity(values.len());
    let mut seasonals: Vec<f64> = Vec::with_capacity(values.len());
    let mut deviations: Vec<f64> = Vec::with_capacity(values.len());
    let mut steps = Vec::with_capacity(values.len());
    let mut next_prediction = 0.0;

    for (i, &value) in values.iter().enumerate() {
        let (last_intercept, last_slope, prediction) = if i == 0 {
            (value, 0.0, value)
        } else {
            let mut last_intercept = intercepts[i - 1];
            if last_intercept == 0.0 {
                last_intercept = value;
            }
            (last_intercept, slopes[i - 1], next_prediction)
        };

        let last_seasonal = season_back(&seasonals, i);
        let next_last_seasonal = season_back(&seasonals, i + 1);
        let last_deviation = season_back(&deviations, i);

        let intercept = alpha * (value - last_seasonal) + (1.0 - alpha) * (last_intercept + last_slope);
        let slope = beta * (intercept - last_intercept) + (1.0 - beta) * last_slope;
        let seasonal = gamma * (value - intercept) + (1.0 - gamma) * last_seasonal;
        next_prediction = intercept + slope + next_last_seasonal;
        let deviation = gamma * (value - prediction).abs() + (1.0 - gamma) * last_deviation;

        intercepts.push(intercept);
        slopes.push(slope);
        seasonals.push(seasonal);
        deviations.push(deviation);
        steps.push(HoltWintersStep {
            forecast: prediction,
            deviation,
        });
    }
    steps
}

/// Rounds up to five decimals. Values already on a step, up to float noise, stay put.
pub fn ceil_5(value: f64) -> f64 {
    let scaled = value * 1e5;
    let nearest = scaled.round();
    if (scaled - nearest).abs() < 1e-6 {
        nearest / 1e5
    } else {
        scaled.ceil() / 1e5
    }
}

/// Forecast or deviation for every timestamp at or after the anchor (the query start,
/// else the series' first timestamp). The week before the anchor is read through a
/// scanner on `session` and fed to the recurrence first.
pub struct HoltWinters {
    pub output: HoltWintersOutput,
    pub params: HoltWintersParams,
    session: ScannerSession,
}

impl HoltWinters {
    pub fn new(output: HoltWintersOutput, params: HoltWintersParams, session: ScannerSession) -> Self {
        Self {
            output,
            params,
            session,
        }
    }

    pub fn from_constants(
        output: HoltWintersOutput,
        constants: &[String],
        session: ScannerSession,
    ) -> TransformResult<Self> {
        let function = match output {
            HoltWintersOutput::Forecast => Function::HwForecast,
            HoltWintersOutput::Deviation => Function::HwDeviation,
        };
        Ok(Self::new(
            output,
            HoltWintersParams::from_constants(function, constants)?,
            session,
        ))
    }
}

impl ValueMapping for HoltWinters {
    fn map(&self, ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        let id = source.series_id().clone();
        let points = source.take_rest()?;
        let Some(anchor) = ctx.start.or_else(|| points.keys().next().copied()) else {
            return Ok(Datapoints::new());
        };

        let query = QueryRange::for_series(&id, anchor.saturating_sub(ONE_WEEK_MS), anchor - 1);
        let mut history = {
            let mut scanner = self.session.open(id.clone(), query)?;
            let drained = scanner.drain();
            scanner.dispose();
            drained?
        };
        debug!(
            component = "holt_winters",
            event = "holt_winters.bootstrap",
            series = %id.identifier(),
            anchor,
            bootstrap_points = history.len()
        );
        history.extend(points);

        let observed: Vec<(i64, f64)> = history
            .into_iter()
            .filter_map(|(ts, v)| v.map(|v| (ts, v)))
            .collect();
        let values: Vec<f64> = observed.iter().map(|(_, v)| *v).collect();
        let steps = holt_winters(&values, self.params);

        Ok(observed
            .iter()
            .zip(steps)
            .filter(|((ts, _), _)| *ts >= anchor)
            .map(|((ts, _), step)| {
                let value = match self.output {
                    HoltWintersOutput::Forecast => step.forecast,
                    HoltWintersOutput::Deviation => step.deviation,
                };
                (*ts, Some(ceil_5(value)))
            })
            .collect())
    }

    fn paging(&self) -> Paging {
        Paging::WholeRange
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::scanner::ScannerConfig;
    use crate::series::TimeSeries;
    use crate::source::MapSource;
    use crate::store::InMemoryStore;

    fn params(season_length: usize) -> HoltWintersParams {
        HoltWintersParams {
            alpha: 0.5,
            beta: 0.5,
            gamma: 0.5,
            season_length,
        }
    }

    #[test]
    fn recurrence_matches_hand_computation() {
        let steps = holt_winters(&[1.0, 3.0, 2.0], params(1));
        let forecasts: Vec<f64> = steps.iter().map(|s| s.forecast).collect();
        let deviations: Vec<f64> = steps.iter().map(|s| s.deviation).collect();
        assert_eq!(forecasts, vec![1.0, 1.0, 2.5]);
        assert_eq!(deviations, vec![0.0, 1.0, 0.75]);
    }

    #[test]
    fn rounding_goes_up_at_fifth_decimal() {
        assert_eq!(ceil_5(1.000_001), 1.000_01);
        assert_eq!(ceil_5(2.5), 2.5);
        assert_eq!(ceil_5(-1.000_019), -1.000_01);
    }

    #[test]
    fn parameters_are_validated() {
        let raw = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(HoltWintersParams::from_constants(Function::HwForecast, &raw(&["0.1", "0.2", "0.3", "4"])).is_ok());
        assert!(HoltWintersParams::from_constants(Function::HwForecast, &raw(&["1.5", "0.2", "0.3", "4"])).is_err());
        assert!(HoltWintersParams::from_constants(Function::HwForecast, &raw(&["0.1", "0.2", "0.3", "0"])).is_err());
        assert!(HoltWintersParams::from_constants(Function::HwForecast, &raw(&["0.1", "0.2", "0.3"])).is_err());
    }

    #[test]
    fn bootstrap_week_is_fetched_before_anchor() {
        let anchor = 2 * ONE_WEEK_MS;
        let history = TimeSeries::from_values("s", "m", [(anchor - 2_000, 5.0), (anchor - 1_000, 5.0)]);
        let store = Arc::new(InMemoryStore::new(vec![history]));
        let session = ScannerSession::new(store.clone(), ScannerConfig::default()).expect("session");
        let hw = HoltWinters::new(HoltWintersOutput::Forecast, params(2), session.clone());

        let series = TimeSeries::from_values("s", "m", [(anchor, 5.0), (anchor + 1_000, 5.0)]);
        let ctx = QueryContext::bounded(anchor, anchor + 1_000);
        let out = hw.map(&ctx, &mut MapSource::new(&series)).expect("map");

        assert_eq!(out, [(anchor, Some(5.0)), (anchor + 1_000, Some(5.0))].into_iter().collect());
        let ranges = store.fetched_ranges();
        assert!(ranges.iter().all(|r| r.start >= anchor - ONE_WEEK_MS && r.end <= anchor - 1));
        assert!(!ranges.is_empty());
        assert!(session.registry().is_empty());
    }
}
