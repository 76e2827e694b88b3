//! Function names and the factory that turns a name plus constants into a ready transform.

use std::fmt;
use std::str::FromStr;

use crate::deviation;
use crate::downsample::Downsample;
use crate::error::{TransformError, TransformResult};
use crate::fill::FillTransform;
use crate::filter::{FilterRule, FilterTransform, LimitTransform, SortTransform};
use crate::group_by::{GroupByTagTransform, GroupByTransform};
use crate::holt_winters::{HoltWinters, HoltWintersOutput};
use crate::mappings::{
    Absolute, Alias, Cull, CullDirection, Derivative, Identity, Integral, Log, PatternFilter, Shift,
};
use crate::moving::Moving;
use crate::percentile;
use crate::rate::Rate;
use crate::reducers::{Arithmetic, ArithmeticConstant, Statistic};
use crate::scanner::{Scanner, ScannerSession};
use crate::series::TimeSeries;
use crate::set_ops::JoinTransform;
use crate::shapes::{
    split_join_policy, JoinPolicy, MappingTransform, ReducerOrMappingTransform, ReducerTransform,
    ZipperTransform,
};
use crate::transform::{QueryContext, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Function {
    Identity,
    Absolute,
    Log,
    Shift,
    Alias,
    Include,
    Exclude,
    CullAbove,
    CullBelow,
    Sum,
    Diff,
    Divide,
    Scale,
    Average,
    Min,
    Max,
    Count,
    Union,
    Join,
    ZeroIfMissingSum,
    Percentile,
    Deviation,
    Above,
    Below,
    Highest,
    Lowest,
    Sort,
    Limit,
    SumV,
    DiffV,
    ScaleV,
    DivideV,
    Downsample,
    Moving,
    Fill,
    Rate,
    Derivative,
    Integral,
    HwForecast,
    HwDeviation,
    GroupBy,
    GroupByTag,
}

impl Function {
    pub const ALL: [Function; 42] = [
        Self::Identity,
        Self::Absolute,
        Self::Log,
        Self::Shift,
        Self::Alias,
        Self::Include,
        Self::Exclude,
        Self::CullAbove,
        Self::CullBelow,
        Self::Sum,
        Self::Diff,
        Self::Divide,
        Self::Scale,
        Self::Average,
        Self::Min,
        Self::Max,
        Self::Count,
        Self::Union,
        Self::Join,
        Self::ZeroIfMissingSum,
        Self::Percentile,
        Self::Deviation,
        Self::Above,
        Self::Below,
        Self::Highest,
        Self::Lowest,
        Self::Sort,
        Self::Limit,
        Self::SumV,
        Self::DiffV,
        Self::ScaleV,
        Self::DivideV,
        Self::Downsample,
        Self::Moving,
        Self::Fill,
        Self::Rate,
        Self::Derivative,
        Self::Integral,
        Self::HwForecast,
        Self::HwDeviation,
        Self::GroupBy,
        Self::GroupByTag,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Identity => "IDENTITY",
            Self::Absolute => "ABSOLUTE",
            Self::Log => "LOG",
            Self::Shift => "SHIFT",
            Self::Alias => "ALIAS",
            Self::Include => "INCLUDE",
            Self::Exclude => "EXCLUDE",
            Self::CullAbove => "CULL_ABOVE",
            Self::CullBelow => "CULL_BELOW",
            Self::Sum => "SUM",
            Self::Diff => "DIFF",
            Self::Divide => "DIVIDE",
            Self::Scale => "SCALE",
            Self::Average => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Count => "COUNT",
            Self::Union => "UNION",
            Self::Join => "JOIN",
            Self::ZeroIfMissingSum => "ZEROIFMISSINGSUM",
            Self::Percentile => "PERCENTILE",
            Self::Deviation => "DEVIATION",
            Self::Above => "ABOVE",
            Self::Below => "BELOW",
            Self::Highest => "HIGHEST",
            Self::Lowest => "LOWEST",
            Self::Sort => "SORT",
            Self::Limit => "LIMIT",
            Self::SumV => "SUM_V",
            Self::DiffV => "DIFF_V",
            Self::ScaleV => "SCALE_V",
            Self::DivideV => "DIVIDE_V",
            Self::Downsample => "DOWNSAMPLE",
            Self::Moving => "MOVING",
            Self::Fill => "FILL",
            Self::Rate => "RATE",
            Self::Derivative => "DERIVATIVE",
            Self::Integral => "INTEGRAL",
            Self::HwForecast => "HW_FORECAST",
            Self::HwDeviation => "HW_DEVIATION",
            Self::GroupBy => "GROUPBY",
            Self::GroupByTag => "GROUPBYTAG",
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Function {
    type Err = TransformError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| TransformError::invalid(format!("unknown function '{trimmed}'")))
    }
}

/// Parses a numeric constant, naming `what` in the error.
pub(crate) fn parse_number(raw: &str, what: &str) -> TransformResult<f64> {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(TransformError::invalid(format!(
            "{what} must be a number, got '{trimmed}'"
        ))),
    }
}

/// Fails unless the constant count lies in `min..=max`.
pub(crate) fn expect_arity(
    function: Function,
    constants: &[String],
    min: usize,
    max: usize,
) -> TransformResult<()> {
    let n = constants.len();
    if n < min || n > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(TransformError::invalid(format!(
            "{function} takes {expected} constants, got {n}"
        )));
    }
    Ok(())
}

/// Builds transforms by name. Holt-Winters needs a [`ScannerSession`] to read its
/// bootstrap week; every other function works without one.
#[derive(Clone, Default)]
pub struct TransformFactory {
    session: Option<ScannerSession>,
}

impl TransformFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: ScannerSession) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn session(&self) -> Option<&ScannerSession> {
        self.session.as_ref()
    }

    pub fn create(&self, name: &str, constants: &[String]) -> TransformResult<Box<dyn Transform>> {
        self.create_function(name.parse()?, constants)
    }

    pub fn create_function(
        &self,
        function: Function,
        constants: &[String],
    ) -> TransformResult<Box<dyn Transform>> {
        use Function as F;

        let transform: Box<dyn Transform> = match function {
            F::Identity => {
                expect_arity(function, constants, 0, 0)?;
                Box::new(MappingTransform::new(function, Identity))
            }
            F::Absolute => {
                expect_arity(function, constants, 0, 0)?;
                Box::new(MappingTransform::new(function, Absolute))
            }
            F::Log => Box::new(MappingTransform::new(function, Log::from_constants(constants)?)),
            F::Shift => Box::new(MappingTransform::new(function, Shift::from_constants(constants)?)),
            F::Alias => Box::new(MappingTransform::new(function, Alias::from_constants(constants)?)),
            F::Include | F::Exclude => {
                Box::new(PatternFilter::from_constants(function, constants)?)
            }
            F::CullAbove | F::CullBelow => {
                let direction = if function == F::CullAbove {
                    CullDirection::Above
                } else {
                    CullDirection::Below
                };
                Box::new(MappingTransform::new(
                    function,
                    Cull::from_constants(direction, constants)?,
                ))
            }
            F::Sum | F::Diff | F::Scale | F::Divide => arithmetic(function, constants)?,
            F::Average | F::Min | F::Max => {
                let (join, rest) = split_join_policy(constants);
                expect_arity(function, &rest, 0, 0)?;
                let statistic = match function {
                    F::Average => Statistic::Average,
                    F::Min => Statistic::Min,
                    _ => Statistic::Max,
                };
                Box::new(ReducerTransform::new(function, statistic, join))
            }
            F::Count | F::Union | F::ZeroIfMissingSum => {
                let (_, rest) = split_join_policy(constants);
                expect_arity(function, &rest, 0, 0)?;
                let statistic = match function {
                    F::Count => Statistic::Count,
                    F::Union => Statistic::First,
                    _ => Statistic::ZeroIfMissingSum,
                };
                Box::new(ReducerTransform::new(function, statistic, JoinPolicy::Union))
            }
            F::Join => {
                expect_arity(function, constants, 0, 0)?;
                Box::new(JoinTransform)
            }
            F::Percentile => percentile::percentile_transform(constants)?,
            F::Deviation => deviation::deviation_transform(constants)?,
            F::Above | F::Below | F::Highest | F::Lowest => {
                let rule = match function {
                    F::Above => FilterRule::Above,
                    F::Below => FilterRule::Below,
                    F::Highest => FilterRule::Highest,
                    _ => FilterRule::Lowest,
                };
                Box::new(FilterTransform::from_constants(function, rule, constants)?)
            }
            F::Sort => Box::new(SortTransform::from_constants(constants)?),
            F::Limit => Box::new(LimitTransform::from_constants(constants)?),
            F::SumV | F::DiffV | F::ScaleV | F::DivideV => {
                let (join, rest) = split_join_policy(constants);
                expect_arity(function, &rest, 0, 0)?;
                let op = match function {
                    F::SumV => Arithmetic::Sum,
                    F::DiffV => Arithmetic::Diff,
                    F::ScaleV => Arithmetic::Scale,
                    _ => Arithmetic::Divide,
                };
                Box::new(ZipperTransform::new(function, op, join))
            }
            F::Downsample => Box::new(MappingTransform::new(
                function,
                Downsample::from_constants(constants)?,
            )),
            F::Moving => Box::new(MappingTransform::new(function, Moving::from_constants(constants)?)),
            F::Fill => Box::new(FillTransform::from_constants(constants)?),
            F::Rate => Box::new(MappingTransform::new(function, Rate::from_constants(constants)?)),
            F::Derivative => {
                expect_arity(function, constants, 0, 0)?;
                Box::new(MappingTransform::new(function, Derivative))
            }
            F::Integral => {
                expect_arity(function, constants, 0, 0)?;
                Box::new(MappingTransform::new(function, Integral))
            }
            F::HwForecast | F::HwDeviation => {
                let session = self.session.clone().ok_or_else(|| {
                    TransformError::unsupported(format!(
                        "{function} needs a scanner session to read its bootstrap week"
                    ))
                })?;
                let output = if function == F::HwForecast {
                    HoltWintersOutput::Forecast
                } else {
                    HoltWintersOutput::Deviation
                };
                Box::new(MappingTransform::new(
                    function,
                    HoltWinters::from_constants(output, constants, session)?,
                ))
            }
            F::GroupBy => Box::new(GroupByTransform::from_constants(self, constants)?),
            F::GroupByTag => Box::new(GroupByTagTransform::from_constants(self, constants)?),
        };
        Ok(transform)
    }
}

/// `SUM`/`DIFF`/`SCALE`/`DIVIDE`: reduce across series, or map with one numeric operand.
fn arithmetic(function: Function, constants: &[String]) -> TransformResult<Box<dyn Transform>> {
    let op = match function {
        Function::Sum => Arithmetic::Sum,
        Function::Diff => Arithmetic::Diff,
        Function::Scale => Arithmetic::Scale,
        _ => Arithmetic::Divide,
    };
    let (join, rest) = split_join_policy(constants);
    expect_arity(function, &rest, 0, 1)?;
    let transform = match rest.first() {
        None => ReducerOrMappingTransform::reducing(function, op, join),
        Some(raw) => {
            let operand = parse_number(raw, &format!("{function} operand"))?;
            ReducerOrMappingTransform::mapping(function, ArithmeticConstant::new(op, operand)?)
        }
    };
    Ok(Box::new(transform))
}

/// Runs a named function over materialized series through a session-less factory.
pub fn transform_series(
    name: &str,
    ctx: &QueryContext,
    series: &[TimeSeries],
    constants: &[String],
) -> TransformResult<Vec<TimeSeries>> {
    TransformFactory::new().create(name, constants)?.transform(ctx, series)
}

/// Runs a named function over scanners opened on `session`; the scanners are disposed on return.
pub fn transform_scanners(
    session: &ScannerSession,
    name: &str,
    ctx: &QueryContext,
    scanners: &mut [Scanner],
    constants: &[String],
) -> TransformResult<Vec<TimeSeries>> {
    let transform = match TransformFactory::with_session(session.clone()).create(name, constants) {
        Ok(t) => t,
        Err(err) => {
            for scanner in scanners.iter_mut() {
                scanner.dispose();
            }
            return Err(err);
        }
    };
    transform.transform_scanner(ctx, scanners)
}
