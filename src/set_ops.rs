//! Joining series lists. `UNION`, `COUNT` and `ZEROIFMISSINGSUM` are union-joined
//! reducers over [`Statistic`](crate::reducers::Statistic).

use crate::error::TransformResult;
use crate::factory::Function;
use crate::series::TimeSeries;
use crate::source::DatapointSource;
use crate::transform::{Paging, QueryContext, Transform};

/// Flattens several series lists into one, leaving every series untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinTransform;

impl Transform for JoinTransform {
    fn function(&self) -> Function {
        Function::Join
    }

    fn apply(
        &self,
        _ctx: &QueryContext,
        sources: &mut [&mut dyn DatapointSource],
    ) -> TransformResult<Vec<TimeSeries>> {
        sources
            .iter_mut()
            .map(|source| {
                let id = source.series_id().clone();
                Ok(TimeSeries::new(id, source.take_rest()?))
            })
            .collect()
    }

    fn paging(&self) -> Paging {
        Paging::Pointwise
    }

    fn transform_lists(
        &self,
        ctx: &QueryContext,
        lists: &[Vec<TimeSeries>],
    ) -> TransformResult<Vec<TimeSeries>> {
        let flat: Vec<TimeSeries> = lists.iter().flatten().cloned().collect();
        self.transform(ctx, &flat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::TransformFactory;
    use crate::series::{Datapoints, SeriesId};

    fn run(name: &str, inputs: &[TimeSeries]) -> Datapoints {
        let out = TransformFactory::new()
            .create(name, &[])
            .expect("build")
            .transform(&QueryContext::default(), inputs)
            .expect("transform");
        assert_eq!(out.len(), 1);
        out.into_iter().next().map(|s| s.datapoints).unwrap_or_default()
    }

    fn inputs() -> Vec<TimeSeries> {
        let mut b = TimeSeries::from_values("s", "b", [(2, 20.0)]);
        b.datapoints.insert(3, None);
        vec![TimeSeries::from_values("s", "a", [(1, 1.0), (2, 2.0)]), b]
    }

    #[test]
    fn union_keeps_first_value_per_timestamp() {
        assert_eq!(
            run("UNION", &inputs()),
            [(1, Some(1.0)), (2, Some(2.0)), (3, None)].into_iter().collect()
        );
    }

    #[test]
    fn count_counts_present_values() {
        assert_eq!(
            run("COUNT", &inputs()),
            [(1, Some(1.0)), (2, Some(2.0)), (3, Some(0.0))].into_iter().collect()
        );
    }

    #[test]
    fn zero_if_missing_sum_treats_null_as_zero() {
        assert_eq!(
            run("ZEROIFMISSINGSUM", &inputs()),
            [(1, Some(1.0)), (2, Some(22.0)), (3, Some(0.0))].into_iter().collect()
        );
    }

    #[test]
    fn join_flattens_lists() {
        let lists = vec![
            vec![TimeSeries::empty(SeriesId::new("s", "a"))],
            vec![
                TimeSeries::empty(SeriesId::new("s", "b")),
                TimeSeries::empty(SeriesId::new("s", "c")),
            ],
        ];
        let out = JoinTransform
            .transform_lists(&QueryContext::default(), &lists)
            .expect("join");
        let names: Vec<&str> = out.iter().map(|s| s.id.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
