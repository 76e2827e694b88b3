//! Partition series by a regex over their identifier or by tag values, then run a
//! function on each partition.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::debug;

use crate::error::{TransformError, TransformResult};
use crate::factory::{Function, TransformFactory};
use crate::series::{SeriesId, TimeSeries};
use crate::source::DatapointSource;
use crate::transform::{QueryContext, Transform};

pub const UNCAPTURED_GROUP: &str = "uncaptured-group";

/// Runs `inner` once per partition key, in key order.
fn run_partitions(
    function: Function,
    inner: &dyn Transform,
    ctx: &QueryContext,
    sources: &mut [&mut dyn DatapointSource],
    keys: Vec<String>,
) -> TransformResult<Vec<(String, Vec<TimeSeries>)>> {
    let mut groups: BTreeMap<String, Vec<&mut dyn DatapointSource>> = BTreeMap::new();
    for (source, key) in sources.iter_mut().zip(keys) {
        groups.entry(key).or_default().push(&mut **source);
    }
    debug!(
        component = "group_by",
        event = "group_by.partition",
        function = %function,
        inner = %inner.function(),
        groups = groups.len()
    );

    let mut out = Vec::with_capacity(groups.len());
    for (key, mut members) in groups {
        let results = inner.apply(ctx, &mut members)?;
        out.push((key, results));
    }
    Ok(out)
}

fn split_inner(function: Function, raw: &[String]) -> TransformResult<(Function, Vec<String>)> {
    let Some((name, rest)) = raw.split_first() else {
        return Err(TransformError::invalid(format!("{function} needs a function to apply per group")));
    };
    Ok((name.parse()?, rest.to_vec()))
}

/// `[regex, function, function-constants...]`. The key is the concatenation of every
/// capture group matched in `scope:name{k=v,...}`.
pub struct GroupByTransform {
    pattern: Regex,
    inner: Box<dyn Transform>,
}

impl GroupByTransform {
    pub fn from_constants(factory: &TransformFactory, constants: &[String]) -> TransformResult<Self> {
        let Some((raw_pattern, rest)) = constants.split_first() else {
            return Err(TransformError::invalid("GROUPBY needs a regex and a function"));
        };
        let pattern = Regex::new(raw_pattern).map_err(|err| {
            TransformError::invalid(format!("bad group-by regex '{raw_pattern}': {err}"))
        })?;
        let (function, inner_constants) = split_inner(Function::GroupBy, rest)?;
        Ok(Self {
            pattern,
            inner: factory.create_function(function, &inner_constants)?,
        })
    }

    pub fn key_of(&self, id: &SeriesId) -> String {
        let identifier = id.identifier();
        match self.pattern.captures(&identifier) {
            Some(captures) => captures
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str())
                .collect(),
            None => UNCAPTURED_GROUP.to_string(),
        }
    }
}

impl Transform for GroupByTransform {
    fn function(&self) -> Function {
        Function::GroupBy
    }

    fn apply(
        &self,
        ctx: &QueryContext,
        sources: &mut [&mut dyn DatapointSource],
    ) -> TransformResult<Vec<TimeSeries>> {
        let keys = sources.iter().map(|s| self.key_of(s.series_id())).collect();
        let partitions = run_partitions(Function::GroupBy, self.inner.as_ref(), ctx, sources, keys)?;
        Ok(partitions.into_iter().flat_map(|(_, results)| results).collect())
    }
}

/// Separates tags from the inner function when a tag shares a function's name.
pub const TAG_SEPARATOR: &str = "--";

/// `[tag..., function, function-constants...]` or `[tag..., --, function, ...]`. Without
/// the separator the first constant naming a function ends the tag list. Series are
/// keyed by the values of the listed tags they carry; results take the key as scope
/// and the grouping tags as tags.
pub struct GroupByTagTransform {
    tags: Vec<String>,
    inner: Box<dyn Transform>,
}

impl GroupByTagTransform {
    pub fn from_constants(factory: &TransformFactory, constants: &[String]) -> TransformResult<Self> {
        let (tags, rest) = match constants.iter().position(|c| c.trim() == TAG_SEPARATOR) {
            Some(split) => (&constants[..split], &constants[split + 1..]),
            None => {
                let split = constants
                    .iter()
                    .position(|c| c.parse::<Function>().is_ok())
                    .ok_or_else(|| {
                        TransformError::invalid("GROUPBYTAG needs a function to apply per group")
                    })?;
                constants.split_at(split)
            }
        };
        if tags.is_empty() {
            return Err(TransformError::invalid("GROUPBYTAG needs at least one tag"));
        }
        let tags = tags.iter().map(|t| t.trim().to_string()).collect();
        let (function, inner_constants) = split_inner(Function::GroupByTag, rest)?;
        Ok(Self {
            tags,
            inner: factory.create_function(function, &inner_constants)?,
        })
    }

    fn group_tags(&self, id: &SeriesId) -> BTreeMap<String, String> {
        self.tags
            .iter()
            .filter_map(|t| id.tags.get(t).map(|v| (t.clone(), v.clone())))
            .collect()
    }

    fn key_of(&self, id: &SeriesId) -> String {
        let values: Vec<&str> = self
            .tags
            .iter()
            .filter_map(|t| id.tags.get(t).map(String::as_str))
            .collect();
        if values.is_empty() {
            UNCAPTURED_GROUP.to_string()
        } else {
            values.join(",")
        }
    }
}

impl Transform for GroupByTagTransform {
    fn function(&self) -> Function {
        Function::GroupByTag
    }

    fn apply(
        &self,
        ctx: &QueryContext,
        sources: &mut [&mut dyn DatapointSource],
    ) -> TransformResult<Vec<TimeSeries>> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        let tagged: Vec<BTreeMap<String, String>> =
            sources.iter().map(|s| self.group_tags(s.series_id())).collect();
        if tagged.iter().all(BTreeMap::is_empty) {
            return Err(TransformError::invalid(format!(
                "no series carries any of the tags {:?}",
                self.tags
            )));
        }

        let mut tags_by_key: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let keys: Vec<String> = sources.iter().map(|s| self.key_of(s.series_id())).collect();
        for (key, tags) in keys.iter().zip(tagged) {
            tags_by_key.entry(key.clone()).or_insert(tags);
        }

        let partitions = run_partitions(Function::GroupByTag, self.inner.as_ref(), ctx, sources, keys)?;
        let mut out = Vec::new();
        for (key, results) in partitions {
            let tags = tags_by_key.get(&key).cloned().unwrap_or_default();
            for mut series in results {
                series.id.scope = key.clone();
                series.id.tags = tags.clone();
                out.push(series);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constants(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn one(scope: &str) -> TimeSeries {
        TimeSeries::from_values(scope, "metric1", [(1_000, 1.0)])
    }

    #[test]
    fn regex_captures_form_keys() {
        let group = GroupByTransform::from_constants(
            &TransformFactory::new(),
            &constants(&[r"system\.([A-Z]+)\.na.", "SUM"]),
        )
        .expect("build");
        let inputs = vec![
            one("system.WAS.na1"),
            one("system.WAS.na2"),
            one("system.CHI.na1"),
            one("system.CHI.na2"),
        ];
        let out = group.transform(&QueryContext::default(), &inputs).expect("group");
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|s| s.datapoints.get(&1_000) == Some(&Some(2.0))));
    }

    #[test]
    fn unmatched_series_share_uncaptured_group() {
        let group = GroupByTransform::from_constants(
            &TransformFactory::new(),
            &constants(&[r"system\.([A-Z]+)\.na.", "SUM"]),
        )
        .expect("build");
        assert_eq!(group.key_of(&SeriesId::new("bla1", "metric1")), UNCAPTURED_GROUP);
        let inputs = vec![
            one("system.WAS.na1"),
            one("system.WAS.na2"),
            one("bla1"),
            one("bla2"),
        ];
        let out = group.transform(&QueryContext::default(), &inputs).expect("group");
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|s| s.datapoints.get(&1_000) == Some(&Some(2.0))));
    }

    #[test]
    fn group_by_tag_allows_partial_keys() {
        let tagged = |scope: &str, dc: &str, sp: Option<&str>| {
            let mut s = one(scope);
            s.id = s.id.with_tag("dc", dc).with_tag("host", scope);
            if let Some(sp) = sp {
                s.id = s.id.with_tag("sp", sp);
            }
            s
        };
        let inputs = vec![
            tagged("a", "DCA", Some("SP1")),
            tagged("b", "DCA", Some("SP2")),
            tagged("c", "DCB", None),
            tagged("d", "DCB", None),
        ];
        let group = GroupByTagTransform::from_constants(
            &TransformFactory::new(),
            &constants(&["dc", "sp", "SUM"]),
        )
        .expect("build");
        let out = group.transform(&QueryContext::default(), &inputs).expect("group");
        let mut scopes: Vec<&str> = out.iter().map(|s| s.id.scope.as_str()).collect();
        scopes.sort();
        assert_eq!(scopes, vec!["DCA,SP1", "DCA,SP2", "DCB"]);
        for series in &out {
            assert_eq!(series.id.name, "metric1");
            assert!(series.id.tags.contains_key("dc"));
            assert!(!series.id.tags.contains_key("host"));
            assert_eq!(series.id.tags.contains_key("sp"), series.id.scope.starts_with("DCA"));
        }
    }

    #[test]
    fn group_by_tag_without_any_tagged_series_is_an_error() {
        let group = GroupByTagTransform::from_constants(
            &TransformFactory::new(),
            &constants(&["dc", "SUM"]),
        )
        .expect("build");
        assert!(matches!(
            group.transform(&QueryContext::default(), &[one("a")]),
            Err(TransformError::InvalidArgument(_))
        ));
        assert!(GroupByTagTransform::from_constants(&TransformFactory::new(), &constants(&["SUM"])).is_err());
    }

    #[test]
    fn separator_lets_tags_share_function_names() {
        let tagged = |scope: &str, count: &str| {
            let mut s = one(scope);
            s.id = s.id.with_tag("count", count);
            s
        };
        let inputs = vec![tagged("a", "x"), tagged("b", "x"), tagged("c", "y")];
        let group = GroupByTagTransform::from_constants(
            &TransformFactory::new(),
            &constants(&["count", TAG_SEPARATOR, "SUM"]),
        )
        .expect("build");
        let out = group.transform(&QueryContext::default(), &inputs).expect("group");
        let mut scopes: Vec<&str> = out.iter().map(|s| s.id.scope.as_str()).collect();
        scopes.sort();
        assert_eq!(scopes, vec!["x", "y"]);

        assert!(GroupByTagTransform::from_constants(
            &TransformFactory::new(),
            &constants(&["count", "SUM"])
        )
        .is_err());
        assert!(GroupByTagTransform::from_constants(
            &TransformFactory::new(),
            &constants(&[TAG_SEPARATOR, "SUM"])
        )
        .is_err());
    }
}
