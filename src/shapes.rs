//! Reusable transform shapes, each parameterized by a strategy.

use crate::error::{TransformError, TransformResult};
use crate::factory::Function;
use crate::series::{distill_id, Datapoints, SeriesId, TimeSeries};
use crate::source::{next_collated, DatapointSource};
use crate::transform::{Paging, QueryContext, Transform};

/// Per-series strategy for the mapping shape.
pub trait ValueMapping: Send + Sync {
    fn map(&self, ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints>;

    fn paging(&self) -> Paging {
        Paging::Pointwise
    }

    fn rename(&self, id: &SeriesId) -> SeriesId {
        id.clone()
    }
}

/// Combines the values present at one timestamp, in input order.
pub trait ValueReducer: Send + Sync {
    fn reduce(&self, values: &[Option<f64>]) -> TransformResult<Option<f64>>;

    fn min_inputs(&self) -> usize {
        1
    }
}

/// Combines one base value with the vector value at the same timestamp.
pub trait ValueZipper: Send + Sync {
    fn zip(&self, base: f64, vector: f64) -> TransformResult<f64>;

    /// Stands in for a null base value.
    fn identity(&self) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// Only timestamps present in every input.
    #[default]
    Intersection,
    /// Every timestamp present in any input.
    Union,
}

pub const UNION_TOKEN: &str = "union";

pub fn is_union_token(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case(UNION_TOKEN)
}

/// Splits `union` tokens off a constant list.
pub fn split_join_policy(constants: &[String]) -> (JoinPolicy, Vec<String>) {
    let rest: Vec<String> = constants
        .iter()
        .filter(|c| !is_union_token(c))
        .cloned()
        .collect();
    let policy = if rest.len() < constants.len() {
        JoinPolicy::Union
    } else {
        JoinPolicy::Intersection
    };
    (policy, rest)
}

pub fn map_sources<M: ValueMapping + ?Sized>(
    mapping: &M,
    ctx: &QueryContext,
    sources: &mut [&mut dyn DatapointSource],
) -> TransformResult<Vec<TimeSeries>> {
    let mut out = Vec::with_capacity(sources.len());
    for source in sources.iter_mut() {
        let source: &mut dyn DatapointSource = &mut **source;
        let id = mapping.rename(source.series_id());
        let datapoints = mapping.map(ctx, source)?;
        out.push(TimeSeries::new(id, datapoints));
    }
    Ok(out)
}

pub fn reduce_sources<R: ValueReducer + ?Sized>(
    function: Function,
    reducer: &R,
    join: JoinPolicy,
    sources: &mut [&mut dyn DatapointSource],
) -> TransformResult<Vec<TimeSeries>> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }
    if sources.len() < reducer.min_inputs() {
        return Err(TransformError::invalid(format!(
            "{function} needs at least {} series, got {}",
            reducer.min_inputs(),
            sources.len()
        )));
    }
    let ids: Vec<SeriesId> = sources.iter().map(|s| s.series_id().clone()).collect();
    let id = distill_id(&ids, function.name());
    let inputs = sources.len();

    let mut datapoints = Datapoints::new();
    while let Some((ts, row)) = next_collated(sources)? {
        let present: Vec<Option<f64>> = row.into_iter().flatten().collect();
        if join == JoinPolicy::Intersection && present.len() < inputs {
            continue;
        }
        datapoints.insert(ts, reducer.reduce(&present)?);
    }
    Ok(vec![TimeSeries::new(id, datapoints)])
}

pub struct MappingTransform<M> {
    function: Function,
    mapping: M,
}

impl<M: ValueMapping> MappingTransform<M> {
    pub fn new(function: Function, mapping: M) -> Self {
        Self { function, mapping }
    }
}

impl<M: ValueMapping> Transform for MappingTransform<M> {
    fn function(&self) -> Function {
        self.function
    }

    fn apply(
        &self,
        ctx: &QueryContext,
        sources: &mut [&mut dyn DatapointSource],
    ) -> TransformResult<Vec<TimeSeries>> {
        map_sources(&self.mapping, ctx, sources)
    }

    fn paging(&self) -> Paging {
        self.mapping.paging()
    }
}

pub struct ReducerTransform<R> {
    function: Function,
    reducer: R,
    join: JoinPolicy,
}

impl<R: ValueReducer> ReducerTransform<R> {
    pub fn new(function: Function, reducer: R, join: JoinPolicy) -> Self {
        Self {
            function,
            reducer,
            join,
        }
    }
}

impl<R: ValueReducer> Transform for ReducerTransform<R> {
    fn function(&self) -> Function {
        self.function
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        sources: &mut [&mut dyn DatapointSource],
    ) -> TransformResult<Vec<TimeSeries>> {
        reduce_sources(self.function, &self.reducer, self.join, sources)
    }

    fn paging(&self) -> Paging {
        Paging::Pointwise
    }
}

/// The last input is the vector; every other input is zipped against it.
pub struct ZipperTransform<Z> {
    function: Function,
    zipper: Z,
    join: JoinPolicy,
}

impl<Z: ValueZipper> ZipperTransform<Z> {
    pub fn new(function: Function, zipper: Z, join: JoinPolicy) -> Self {
        Self {
            function,
            zipper,
            join,
        }
    }

    fn zip_value(&self, base: Option<f64>, vector: Option<Option<f64>>) -> TransformResult<Option<f64>> {
        match (base, vector.flatten()) {
            (None, None) => Ok(None),
            (Some(b), None) => Ok(Some(b)),
            (b, Some(v)) => self.zipper.zip(b.unwrap_or(self.zipper.identity()), v).map(Some),
        }
    }
}

impl<Z: ValueZipper> Transform for ZipperTransform<Z> {
    fn function(&self) -> Function {
        self.function
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        sources: &mut [&mut dyn DatapointSource],
    ) -> TransformResult<Vec<TimeSeries>> {
        if sources.len() < 2 {
            return Err(TransformError::invalid(format!(
                "{} needs at least one series and a vector",
                self.function
            )));
        }
        let (bases, vector) = sources.split_at_mut(sources.len() - 1);
        let vector_points = vector[0].take_rest()?;
        if vector_points.is_empty() {
            return Err(TransformError::invalid(format!(
                "{} vector {} has no datapoints",
                self.function,
                vector[0].series_id().identifier()
            )));
        }

        let mut out = Vec::with_capacity(bases.len());
        for base in bases.iter_mut() {
            let id = base.series_id().clone();
            let mut datapoints = Datapoints::new();
            match self.join {
                JoinPolicy::Intersection => {
                    while let Some((ts, value)) = base.next_point()? {
                        datapoints.insert(ts, self.zip_value(value, vector_points.get(&ts).copied())?);
                    }
                }
                JoinPolicy::Union => {
                    let base_points = base.take_rest()?;
                    for (ts, value) in &base_points {
                        datapoints.insert(*ts, self.zip_value(*value, vector_points.get(ts).copied())?);
                    }
                    for (ts, value) in &vector_points {
                        datapoints.entry(*ts).or_insert(*value);
                    }
                }
            }
            out.push(TimeSeries::new(id, datapoints));
        }
        Ok(out)
    }
}

/// Reduces across series when no extra constant is given, maps each series otherwise.
pub enum ReduceOrMap<R, M> {
    Reduce { reducer: R, join: JoinPolicy },
    Map(M),
}

pub struct ReducerOrMappingTransform<R, M> {
    function: Function,
    mode: ReduceOrMap<R, M>,
}

impl<R: ValueReducer, M: ValueMapping> ReducerOrMappingTransform<R, M> {
    pub fn new(function: Function, mode: ReduceOrMap<R, M>) -> Self {
        Self { function, mode }
    }

    pub fn reducing(function: Function, reducer: R, join: JoinPolicy) -> Self {
        Self::new(function, ReduceOrMap::Reduce { reducer, join })
    }

    pub fn mapping(function: Function, mapping: M) -> Self {
        Self::new(function, ReduceOrMap::Map(mapping))
    }
}

impl<R: ValueReducer, M: ValueMapping> Transform for ReducerOrMappingTransform<R, M> {
    fn function(&self) -> Function {
        self.function
    }

    fn apply(
        &self,
        ctx: &QueryContext,
        sources: &mut [&mut dyn DatapointSource],
    ) -> TransformResult<Vec<TimeSeries>> {
        match &self.mode {
            ReduceOrMap::Reduce { reducer, join } => {
                reduce_sources(self.function, reducer, *join, sources)
            }
            ReduceOrMap::Map(mapping) => map_sources(mapping, ctx, sources),
        }
    }

    fn paging(&self) -> Paging {
        match &self.mode {
            ReduceOrMap::Reduce { .. } => Paging::Pointwise,
            ReduceOrMap::Map(mapping) => mapping.paging(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plus;

    impl ValueReducer for Plus {
        fn reduce(&self, values: &[Option<f64>]) -> TransformResult<Option<f64>> {
            Ok(Some(values.iter().flatten().sum()))
        }
    }

    struct Times;

    impl ValueZipper for Times {
        fn zip(&self, base: f64, vector: f64) -> TransformResult<f64> {
            Ok(base * vector)
        }

        fn identity(&self) -> f64 {
            1.0
        }
    }

    fn constants(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn union_token_is_case_insensitive_and_stripped() {
        let (policy, rest) = split_join_policy(&constants(&["UNION", "5"]));
        assert_eq!(policy, JoinPolicy::Union);
        assert_eq!(rest, vec!["5".to_string()]);
        let (policy, _) = split_join_policy(&constants(&["5"]));
        assert_eq!(policy, JoinPolicy::Intersection);
    }

    #[test]
    fn reducer_intersection_drops_partial_timestamps() {
        let a = TimeSeries::from_values("s", "m", [(1, 1.0), (2, 2.0)]);
        let b = TimeSeries::from_values("s", "m", [(2, 10.0), (3, 30.0)]);
        let t = ReducerTransform::new(Function::Sum, Plus, JoinPolicy::Intersection);
        let out = t.transform(&QueryContext::default(), &[a, b]).expect("reduce");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].datapoints, [(2, Some(12.0))].into_iter().collect());
        assert_eq!(out[0].id.scope, "s");
    }

    #[test]
    fn zipper_follows_base_timestamps_by_default() {
        let base = TimeSeries::from_values("s", "a", [(1, 2.0), (2, 3.0)]);
        let vector = TimeSeries::from_values("s", "v", [(2, 10.0), (3, 5.0)]);
        let t = ZipperTransform::new(Function::ScaleV, Times, JoinPolicy::Intersection);
        let out = t
            .transform(&QueryContext::default(), &[base.clone(), vector.clone()])
            .expect("zip");
        assert_eq!(out[0].datapoints, [(1, Some(2.0)), (2, Some(30.0))].into_iter().collect());

        let t = ZipperTransform::new(Function::ScaleV, Times, JoinPolicy::Union);
        let out = t
            .transform(&QueryContext::default(), &[base, vector])
            .expect("zip union");
        assert_eq!(
            out[0].datapoints,
            [(1, Some(2.0)), (2, Some(30.0)), (3, Some(5.0))].into_iter().collect()
        );
    }

    #[test]
    fn zipper_requires_vector() {
        let base = TimeSeries::from_values("s", "a", [(1, 2.0)]);
        let t = ZipperTransform::new(Function::ScaleV, Times, JoinPolicy::Intersection);
        assert!(matches!(
            t.transform(&QueryContext::default(), &[base.clone()]),
            Err(TransformError::InvalidArgument(_))
        ));
        let empty = TimeSeries::empty(SeriesId::new("s", "v"));
        assert!(matches!(
            t.transform(&QueryContext::default(), &[base, empty]),
            Err(TransformError::InvalidArgument(_))
        ));
    }
}
