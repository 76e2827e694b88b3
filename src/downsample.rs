//! Fixed-size buckets aligned to whole seconds, minutes, hours or days.

use crate::duration::{parse_duration_token, TimeUnit};
use crate::error::{TransformError, TransformResult};
use crate::factory::{expect_arity, Function};
use crate::reducers::{mean, sample_std_dev};
use crate::series::Datapoints;
use crate::shapes::ValueMapping;
use crate::source::DatapointSource;
use crate::transform::{Paging, QueryContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownsampleAggregator {
    Average,
    Min,
    Max,
    Sum,
    Deviation,
    Count,
    /// Sum with nulls counted as zero.
    ZeroIfMissingSum,
}

impl DownsampleAggregator {
    pub fn parse(raw: &str) -> TransformResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "avg" => Ok(Self::Average),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "sum" => Ok(Self::Sum),
            "dev" => Ok(Self::Deviation),
            "count" => Ok(Self::Count),
            "zimsum" => Ok(Self::ZeroIfMissingSum),
            other => Err(TransformError::invalid(format!(
                "unknown downsample aggregator '{other}'"
            ))),
        }
    }

    fn aggregate(self, values: &[Option<f64>]) -> Option<f64> {
        if self == Self::ZeroIfMissingSum {
            return Some(values.iter().map(|v| v.unwrap_or(0.0)).sum());
        }
        let present: Vec<f64> = values.iter().flatten().copied().collect();
        if present.is_empty() {
            return None;
        }
        match self {
            Self::Average => mean(&present),
            Self::Min => present.iter().copied().reduce(f64::min),
            Self::Max => present.iter().copied().reduce(f64::max),
            Self::Sum => Some(present.iter().sum()),
            Self::Deviation => sample_std_dev(&present),
            Self::Count => Some(present.len() as f64),
            Self::ZeroIfMissingSum => None,
        }
    }
}

/// `"<n><unit>-<aggregator>"`, e.g. `2s-avg` or `1h-max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downsample {
    pub unit: TimeUnit,
    pub size_ms: i64,
    pub aggregator: DownsampleAggregator,
}

impl Downsample {
    pub fn parse(raw: &str) -> TransformResult<Self> {
        let trimmed = raw.trim();
        let (size, aggregator) = trimmed.split_once('-').ok_or_else(|| {
            TransformError::invalid(format!(
                "downsample expression '{trimmed}' must look like <n><unit>-<aggregator>"
            ))
        })?;
        let token = parse_duration_token(size)?;
        if token.unit == TimeUnit::Week {
            return Err(TransformError::invalid(format!(
                "downsample unit must be one of s, m, h, d in '{trimmed}'"
            )));
        }
        if token.amount <= 0 {
            return Err(TransformError::invalid(format!(
                "downsample size must be positive in '{trimmed}'"
            )));
        }
        Ok(Self {
            unit: token.unit,
            size_ms: token.millis(),
            aggregator: DownsampleAggregator::parse(aggregator)?,
        })
    }

    pub fn from_constants(constants: &[String]) -> TransformResult<Self> {
        expect_arity(Function::Downsample, constants, 1, 1)?;
        Self::parse(&constants[0])
    }
}

impl ValueMapping for Downsample {
    /// A bucket opens at its first datapoint snapped to the unit and takes every
    /// datapoint up to and including `start + size`.
    fn map(&self, _ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        let mut out = Datapoints::new();
        while let Some((ts, _)) = source.peek_point()? {
            let start = self.unit.snap(ts);
            let bucket = source.take_through(start.saturating_add(self.size_ms))?;
            if bucket.is_empty() {
                break;
            }
            let values: Vec<Option<f64>> = bucket.into_values().collect();
            out.insert(start, self.aggregator.aggregate(&values));
        }
        Ok(out)
    }

    fn paging(&self) -> Paging {
        Paging::WholeRange
    }
}
