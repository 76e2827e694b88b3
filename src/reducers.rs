//! Arithmetic and statistical strategies for the reducing, mapping and zipping shapes.

use std::fmt;

use crate::error::{TransformError, TransformResult};
use crate::series::Datapoints;
use crate::shapes::{ValueMapping, ValueReducer, ValueZipper};
use crate::source::DatapointSource;
use crate::transform::QueryContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arithmetic {
    Sum,
    Diff,
    Scale,
    Divide,
}

impl fmt::Display for Arithmetic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sum => "sum",
            Self::Diff => "diff",
            Self::Scale => "scale",
            Self::Divide => "divide",
        };
        f.write_str(name)
    }
}

impl Arithmetic {
    fn apply(self, lhs: f64, rhs: f64) -> TransformResult<f64> {
        match self {
            Self::Sum => Ok(lhs + rhs),
            Self::Diff => Ok(lhs - rhs),
            Self::Scale => Ok(lhs * rhs),
            Self::Divide => {
                if rhs == 0.0 {
                    return Err(TransformError::Arithmetic(format!(
                        "division of {lhs} by zero"
                    )));
                }
                Ok(lhs / rhs)
            }
        }
    }
}

impl ValueReducer for Arithmetic {
    /// The first present value is the left operand; null operands after it are skipped.
    fn reduce(&self, values: &[Option<f64>]) -> TransformResult<Option<f64>> {
        let mut iter = values.iter().copied();
        let first = match self {
            Self::Divide => match iter.next().flatten() {
                Some(v) => v,
                None => return Ok(None),
            },
            _ => match iter.by_ref().flatten().next() {
                Some(v) => v,
                None => return Ok(None),
            },
        };
        iter.flatten().try_fold(first, |acc, v| self.apply(acc, v)).map(Some)
    }

    fn min_inputs(&self) -> usize {
        match self {
            Self::Divide => 2,
            _ => 1,
        }
    }
}

impl ValueZipper for Arithmetic {
    fn zip(&self, base: f64, vector: f64) -> TransformResult<f64> {
        self.apply(base, vector)
    }

    fn identity(&self) -> f64 {
        match self {
            Self::Sum | Self::Diff => 0.0,
            Self::Scale | Self::Divide => 1.0,
        }
    }
}

/// `value <op> operand` for every non-null datapoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArithmeticConstant {
    pub op: Arithmetic,
    pub operand: f64,
}

impl ArithmeticConstant {
    pub fn new(op: Arithmetic, operand: f64) -> TransformResult<Self> {
        if op == Arithmetic::Divide && operand == 0.0 {
            return Err(TransformError::Arithmetic(
                "divide constant must be non-zero".to_string(),
            ));
        }
        Ok(Self { op, operand })
    }
}

impl ValueMapping for ArithmeticConstant {
    fn map(&self, _ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        let mut out = Datapoints::new();
        while let Some((ts, value)) = source.next_point()? {
            let mapped = match value {
                Some(v) => Some(self.op.apply(v, self.operand)?),
                None => None,
            };
            out.insert(ts, mapped);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Average,
    Min,
    Max,
    Count,
    /// Sum with nulls counted as zero.
    ZeroIfMissingSum,
    /// First value seen at the timestamp.
    First,
}

impl ValueReducer for Statistic {
    fn reduce(&self, values: &[Option<f64>]) -> TransformResult<Option<f64>> {
        let present = values.iter().flatten().copied();
        let out = match self {
            Self::Average => {
                let (sum, n) = present.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                (n > 0).then(|| sum / n as f64)
            }
            Self::Min => present.reduce(f64::min),
            Self::Max => present.reduce(f64::max),
            Self::Count => Some(present.count() as f64),
            Self::ZeroIfMissingSum => Some(present.sum()),
            Self::First => values.first().copied().flatten(),
        };
        Ok(out)
    }
}

/// Mean of the non-null values, if any.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median of the non-null values, if any.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Bias-corrected sample standard deviation; a single value deviates by zero.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    if n == 1 {
        return Some(0.0);
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Some((ss / (n - 1) as f64).sqrt())
}
