//! Whole-series selection: threshold and top-N filters, sorting and limiting.

use std::cmp::Ordering;

use crate::error::{TransformError, TransformResult};
use crate::factory::{expect_arity, parse_number, Function};
use crate::reducers::{mean, sample_std_dev};
use crate::series::{Datapoints, SeriesId, TimeSeries};
use crate::source::DatapointSource;
use crate::transform::{QueryContext, Transform};

/// Scalar a whole series is ranked or compared by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeriesReducer {
    #[default]
    Average,
    Min,
    Max,
    Recent,
    Maxima,
    Minima,
    Name,
    Deviation,
}

impl SeriesReducer {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "avg" | "average" => Some(Self::Average),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "recent" => Some(Self::Recent),
            "maxima" => Some(Self::Maxima),
            "minima" => Some(Self::Minima),
            "name" => Some(Self::Name),
            "dev" | "deviation" => Some(Self::Deviation),
            _ => None,
        }
    }

    /// Nulls count as zero. An empty series has no score.
    pub fn score(self, id: &SeriesId, points: &Datapoints) -> Option<SeriesScore> {
        if self == Self::Name {
            return Some(SeriesScore::Text(id.name.clone()));
        }
        let values: Vec<f64> = points.values().map(|v| v.unwrap_or(0.0)).collect();
        let number = match self {
            Self::Average => mean(&values),
            Self::Min | Self::Minima => values.iter().copied().reduce(f64::min),
            Self::Max | Self::Maxima => values.iter().copied().reduce(f64::max),
            Self::Recent => values.last().copied(),
            Self::Deviation => sample_std_dev(&values),
            Self::Name => None,
        };
        number.map(SeriesScore::Number)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesScore {
    Number(f64),
    Text(String),
}

impl SeriesScore {
    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
        }
    }
}

/// Unscored series order first.
fn compare_scores(a: &Option<SeriesScore>, b: &Option<SeriesScore>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.compare(b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn drain_all(sources: &mut [&mut dyn DatapointSource]) -> TransformResult<Vec<TimeSeries>> {
    sources
        .iter_mut()
        .map(|source| {
            let id = source.series_id().clone();
            Ok(TimeSeries::new(id, source.take_rest()?))
        })
        .collect()
}

fn parse_count(raw: &str, what: &str) -> TransformResult<usize> {
    raw.trim().parse::<usize>().map_err(|_| {
        TransformError::invalid(format!(
            "{what} must be a non-negative integer, got '{}'",
            raw.trim()
        ))
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterRule {
    Above,
    Below,
    Highest,
    Lowest,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FilterLimit {
    Threshold(f64),
    Count(usize),
}

/// Keeps or drops whole series by a per-series score; kept series are returned unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterTransform {
    function: Function,
    rule: FilterRule,
    limit: FilterLimit,
    reducer: SeriesReducer,
}

impl FilterTransform {
    /// `[limit, reducer?]`, reducer defaulting to `avg`.
    pub fn from_constants(function: Function, rule: FilterRule, constants: &[String]) -> TransformResult<Self> {
        expect_arity(function, constants, 1, 2)?;
        let limit = match rule {
            FilterRule::Above | FilterRule::Below => {
                FilterLimit::Threshold(parse_number(&constants[0], &format!("{function} limit"))?)
            }
            FilterRule::Highest | FilterRule::Lowest => {
                FilterLimit::Count(parse_count(&constants[0], &format!("{function} limit"))?)
            }
        };
        let reducer = match constants.get(1) {
            None => SeriesReducer::default(),
            Some(raw) => SeriesReducer::parse(raw).ok_or_else(|| {
                TransformError::unsupported(format!("unknown {function} reducer '{}'", raw.trim()))
            })?,
        };
        if reducer == SeriesReducer::Name && matches!(limit, FilterLimit::Threshold(_)) {
            return Err(TransformError::invalid(format!(
                "{function} compares numbers and cannot use the name reducer"
            )));
        }
        Ok(Self {
            function,
            rule,
            limit,
            reducer,
        })
    }
}

impl Transform for FilterTransform {
    fn function(&self) -> Function {
        self.function
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        sources: &mut [&mut dyn DatapointSource],
    ) -> TransformResult<Vec<TimeSeries>> {
        let series = drain_all(sources)?;
        let scored: Vec<(Option<SeriesScore>, TimeSeries)> = series
            .into_iter()
            .map(|s| (self.reducer.score(&s.id, &s.datapoints), s))
            .collect();

        let kept = match (self.rule, self.limit) {
            (FilterRule::Above, FilterLimit::Threshold(limit)) => scored
                .into_iter()
                .filter(|(score, _)| matches!(score, Some(SeriesScore::Number(v)) if *v > limit))
                .map(|(_, s)| s)
                .collect(),
            (FilterRule::Below, FilterLimit::Threshold(limit)) => scored
                .into_iter()
                .filter(|(score, _)| matches!(score, Some(SeriesScore::Number(v)) if *v < limit))
                .map(|(_, s)| s)
                .collect(),
            (FilterRule::Highest, FilterLimit::Count(n)) => {
                let mut sorted = scored;
                sorted.sort_by(|a, b| compare_scores(&b.0, &a.0));
                sorted.into_iter().take(n).map(|(_, s)| s).collect()
            }
            (FilterRule::Lowest, FilterLimit::Count(n)) => {
                let mut sorted = scored;
                sorted.sort_by(|a, b| compare_scores(&a.0, &b.0));
                sorted.into_iter().take(n).map(|(_, s)| s).collect()
            }
            (rule, limit) => {
                return Err(TransformError::invariant(format!(
                    "{rule:?} filter built with {limit:?}"
                )))
            }
        };
        Ok(kept)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// `[limit?, type?, order?]`: orders series by a reducer (default `name`), then keeps
/// the first `limit`.
#[derive(Debug, Clone, PartialEq)]
pub struct SortTransform {
    pub limit: Option<usize>,
    pub reducer: SeriesReducer,
    pub order: SortOrder,
}

impl SortTransform {
    pub fn from_constants(constants: &[String]) -> TransformResult<Self> {
        expect_arity(Function::Sort, constants, 0, 3)?;
        let mut sort = Self {
            limit: None,
            reducer: SeriesReducer::Name,
            order: SortOrder::default(),
        };
        for (i, raw) in constants.iter().enumerate() {
            let token = raw.trim();
            if i == 0 && token.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
                sort.limit = Some(parse_count(token, "sort limit")?);
                continue;
            }
            match token.to_ascii_lowercase().as_str() {
                "ascending" => sort.order = SortOrder::Ascending,
                "descending" => sort.order = SortOrder::Descending,
                other => {
                    sort.reducer = SeriesReducer::parse(other).ok_or_else(|| {
                        TransformError::invalid(format!("unknown sort argument '{token}'"))
                    })?;
                }
            }
        }
        Ok(sort)
    }
}

impl Transform for SortTransform {
    fn function(&self) -> Function {
        Function::Sort
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        sources: &mut [&mut dyn DatapointSource],
    ) -> TransformResult<Vec<TimeSeries>> {
        let mut scored: Vec<(Option<SeriesScore>, TimeSeries)> = drain_all(sources)?
            .into_iter()
            .map(|s| (self.reducer.score(&s.id, &s.datapoints), s))
            .collect();
        match self.order {
            SortOrder::Ascending => scored.sort_by(|a, b| compare_scores(&a.0, &b.0)),
            SortOrder::Descending => scored.sort_by(|a, b| compare_scores(&b.0, &a.0)),
        }
        let limit = self.limit.unwrap_or(scored.len());
        Ok(scored.into_iter().take(limit).map(|(_, s)| s).collect())
    }
}

/// First `n` series in input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitTransform {
    pub n: usize,
}

impl LimitTransform {
    pub fn from_constants(constants: &[String]) -> TransformResult<Self> {
        expect_arity(Function::Limit, constants, 1, 1)?;
        Ok(Self {
            n: parse_count(&constants[0], "limit")?,
        })
    }
}

impl Transform for LimitTransform {
    fn function(&self) -> Function {
        Function::Limit
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        sources: &mut [&mut dyn DatapointSource],
    ) -> TransformResult<Vec<TimeSeries>> {
        let n = self.n.min(sources.len());
        drain_all(&mut sources[..n])
    }
}
