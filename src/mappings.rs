//! Per-series value mappings and the include/exclude series filters.

use regex::Regex;

use crate::duration::parse_duration;
use crate::error::{TransformError, TransformResult};
use crate::factory::{expect_arity, parse_number, Function};
use crate::percentile::percentile_of;
use crate::series::{Datapoints, SeriesId, TimeSeries};
use crate::shapes::ValueMapping;
use crate::source::DatapointSource;
use crate::transform::{Paging, QueryContext, Transform};

fn map_values(
    source: &mut dyn DatapointSource,
    f: impl Fn(f64) -> Option<f64>,
) -> TransformResult<Datapoints> {
    let mut out = Datapoints::new();
    while let Some((ts, value)) = source.next_point()? {
        out.insert(ts, value.and_then(&f));
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl ValueMapping for Identity {
    fn map(&self, _ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        source.take_rest()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Absolute;

impl ValueMapping for Absolute {
    fn map(&self, _ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        map_values(source, |v| Some(v.abs()))
    }
}

/// Logarithm in `base` (default 10). Non-positive values have no logarithm and map to null.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Log {
    pub base: f64,
}

impl Log {
    pub fn from_constants(constants: &[String]) -> TransformResult<Self> {
        expect_arity(Function::Log, constants, 0, 1)?;
        let base = match constants.first() {
            Some(raw) => parse_number(raw, "log base")?,
            None => 10.0,
        };
        if base <= 0.0 || base == 1.0 {
            return Err(TransformError::invalid(format!(
                "log base must be positive and not 1, got {base}"
            )));
        }
        Ok(Self { base })
    }
}

impl ValueMapping for Log {
    fn map(&self, _ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        map_values(source, |v| (v > 0.0).then(|| v.log(self.base)))
    }
}

/// Moves every timestamp by a signed duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shift {
    pub offset_ms: i64,
}

impl Shift {
    pub fn from_constants(constants: &[String]) -> TransformResult<Self> {
        expect_arity(Function::Shift, constants, 1, 1)?;
        Ok(Self {
            offset_ms: parse_duration(&constants[0])?,
        })
    }
}

impl ValueMapping for Shift {
    fn map(&self, _ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        source
            .take_rest()?
            .into_iter()
            .map(|(ts, v)| {
                ts.checked_add(self.offset_ms)
                    .map(|shifted| (shifted, v))
                    .ok_or_else(|| {
                        TransformError::invalid(format!(
                            "shifting {ts} by {} ms overflows",
                            self.offset_ms
                        ))
                    })
            })
            .collect()
    }
}

/// A literal replacement, or `/pattern/replacement/` applied with regex substitution.
#[derive(Debug, Clone)]
pub enum AliasRule {
    Literal(String),
    Regex { pattern: Regex, replacement: String },
}

impl AliasRule {
    pub fn parse(raw: &str, kind: &str) -> TransformResult<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "literal" => Ok(Self::Literal(raw.to_string())),
            "regex" => {
                let body = raw
                    .strip_prefix('/')
                    .and_then(|r| r.strip_suffix('/'))
                    .ok_or_else(|| {
                        TransformError::invalid(format!("regex alias '{raw}' must look like /pattern/replacement/"))
                    })?;
                let (pattern, replacement) = body.rsplit_once('/').ok_or_else(|| {
                    TransformError::invalid(format!("regex alias '{raw}' has no replacement"))
                })?;
                let pattern = Regex::new(pattern).map_err(|err| {
                    TransformError::invalid(format!("bad alias regex '{pattern}': {err}"))
                })?;
                Ok(Self::Regex {
                    pattern,
                    replacement: replacement.to_string(),
                })
            }
            other => Err(TransformError::invalid(format!(
                "alias type must be literal or regex, got '{other}'"
            ))),
        }
    }

    fn apply(&self, current: &str) -> String {
        match self {
            Self::Literal(alias) => alias.clone(),
            Self::Regex {
                pattern,
                replacement,
            } => pattern.replace_all(current, replacement.as_str()).into_owned(),
        }
    }
}

/// `[metric-alias, type]` or `[metric-alias, type, scope-alias, type]`.
#[derive(Debug, Clone)]
pub struct Alias {
    pub metric: AliasRule,
    pub scope: Option<AliasRule>,
}

impl Alias {
    pub fn from_constants(constants: &[String]) -> TransformResult<Self> {
        match constants {
            [metric, kind] => Ok(Self {
                metric: AliasRule::parse(metric, kind)?,
                scope: None,
            }),
            [metric, metric_kind, scope, scope_kind] => Ok(Self {
                metric: AliasRule::parse(metric, metric_kind)?,
                scope: Some(AliasRule::parse(scope, scope_kind)?),
            }),
            _ => Err(TransformError::invalid(format!(
                "{} takes [alias, type] or [metric-alias, type, scope-alias, type], got {} constants",
                Function::Alias,
                constants.len()
            ))),
        }
    }
}

impl ValueMapping for Alias {
    fn map(&self, _ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        source.take_rest()
    }

    fn rename(&self, id: &SeriesId) -> SeriesId {
        let mut renamed = id.clone();
        renamed.name = self.metric.apply(&id.name);
        if let Some(scope) = &self.scope {
            renamed.scope = scope.apply(&id.scope);
        }
        renamed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullDirection {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CullThreshold {
    Value(f64),
    /// Percentile of the series' own values, in `(0, 100]`.
    Percentile(f64),
}

/// Drops datapoints beyond a fixed value or beyond a percentile of the series. Nulls stay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cull {
    pub direction: CullDirection,
    pub threshold: CullThreshold,
}

impl Cull {
    /// `[limit, "value" | "percentile"]`.
    pub fn from_constants(direction: CullDirection, constants: &[String]) -> TransformResult<Self> {
        let function = match direction {
            CullDirection::Above => Function::CullAbove,
            CullDirection::Below => Function::CullBelow,
        };
        expect_arity(function, constants, 2, 2)?;
        let limit = parse_number(&constants[0], &format!("{function} limit"))?;
        let threshold = match constants[1].trim().to_ascii_lowercase().as_str() {
            "value" => CullThreshold::Value(limit),
            "percentile" => {
                if limit <= 0.0 || limit > 100.0 {
                    return Err(TransformError::invalid(format!(
                        "{function} percentile must lie in (0, 100], got {limit}"
                    )));
                }
                CullThreshold::Percentile(limit)
            }
            other => {
                return Err(TransformError::invalid(format!(
                    "{function} type must be value or percentile, got '{other}'"
                )))
            }
        };
        Ok(Self {
            direction,
            threshold,
        })
    }

    fn keeps(&self, value: f64, pivot: f64) -> bool {
        match self.direction {
            CullDirection::Above => value <= pivot,
            CullDirection::Below => value >= pivot,
        }
    }
}

impl ValueMapping for Cull {
    fn map(&self, _ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        let all = source.take_rest()?;
        let pivot = match self.threshold {
            CullThreshold::Value(v) => v,
            CullThreshold::Percentile(p) => {
                let values: Vec<f64> = all.values().flatten().copied().collect();
                match percentile_of(&values, p) {
                    Some(pivot) => pivot,
                    None => return Ok(all),
                }
            }
        };
        Ok(all
            .into_iter()
            .filter(|(_, v)| v.map_or(true, |v| self.keeps(v, pivot)))
            .collect())
    }

    fn paging(&self) -> Paging {
        match self.threshold {
            CullThreshold::Value(_) => Paging::Pointwise,
            CullThreshold::Percentile(_) => Paging::WholeRange,
        }
    }
}

/// Difference to the previous non-null datapoint, emitted at every non-null datapoint
/// that has one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Derivative;

impl ValueMapping for Derivative {
    fn map(&self, _ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        let mut out = Datapoints::new();
        let mut previous: Option<f64> = None;
        while let Some((ts, value)) = source.next_point()? {
            let Some(v) = value else {
                continue;
            };
            if let Some(p) = previous {
                out.insert(ts, Some(v - p));
            }
            previous = Some(v);
        }
        Ok(out)
    }

    fn paging(&self) -> Paging {
        Paging::WholeRange
    }
}

/// Running sum, nulls counted as zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct Integral;

impl ValueMapping for Integral {
    fn map(&self, _ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        let mut out = Datapoints::new();
        let mut sum = 0.0;
        while let Some((ts, value)) = source.next_point()? {
            sum += value.unwrap_or(0.0);
            out.insert(ts, Some(sum));
        }
        Ok(out)
    }

    fn paging(&self) -> Paging {
        Paging::WholeRange
    }
}

/// `INCLUDE` keeps series whose `scope:name{tags}` matches the regex, `EXCLUDE` drops them.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    function: Function,
    pattern: Regex,
}

impl PatternFilter {
    pub fn from_constants(function: Function, constants: &[String]) -> TransformResult<Self> {
        expect_arity(function, constants, 1, 1)?;
        let pattern = Regex::new(&constants[0]).map_err(|err| {
            TransformError::invalid(format!("bad {function} regex '{}': {err}", constants[0]))
        })?;
        Ok(Self { function, pattern })
    }

    fn keeps(&self, id: &SeriesId) -> bool {
        let matched = self.pattern.is_match(&id.identifier());
        match self.function {
            Function::Exclude => !matched,
            _ => matched,
        }
    }
}

impl Transform for PatternFilter {
    fn function(&self) -> Function {
        self.function
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        sources: &mut [&mut dyn DatapointSource],
    ) -> TransformResult<Vec<TimeSeries>> {
        let mut out = Vec::new();
        for source in sources.iter_mut() {
            if self.keeps(source.series_id()) {
                let id = source.series_id().clone();
                out.push(TimeSeries::new(id, source.take_rest()?));
            }
        }
        Ok(out)
    }

    fn paging(&self) -> Paging {
        Paging::Pointwise
    }
}
