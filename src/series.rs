//! Time series records and the query ranges that address them.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TransformError, TransformResult};

/// Ordered timestamp (ms) to nullable value mapping.
pub type Datapoints = BTreeMap<i64, Option<f64>>;

pub type Datapoint = (i64, Option<f64>);

pub const DEFAULT_METRIC_NAME: &str = "result";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesId {
    pub scope: String,
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl SeriesId {
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
            tags: BTreeMap::new(),
            namespace: None,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// `scope:name{k=v,...}`, the string group-by and include patterns match against.
    pub fn identifier(&self) -> String {
        let mut out = format!("{}:{}", self.scope, self.name);
        if !self.tags.is_empty() {
            let tags: Vec<String> = self
                .tags
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            out.push('{');
            out.push_str(&tags.join(","));
            out.push('}');
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub id: SeriesId,
    #[serde(default)]
    pub datapoints: Datapoints,
}

impl TimeSeries {
    pub fn new(id: SeriesId, datapoints: Datapoints) -> Self {
        Self { id, datapoints }
    }

    pub fn empty(id: SeriesId) -> Self {
        Self::new(id, Datapoints::new())
    }

    pub fn from_values(
        scope: impl Into<String>,
        name: impl Into<String>,
        points: impl IntoIterator<Item = (i64, f64)>,
    ) -> Self {
        Self::new(
            SeriesId::new(scope, name),
            points.into_iter().map(|(ts, v)| (ts, Some(v))).collect(),
        )
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.datapoints.keys().next().copied()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.datapoints.keys().next_back().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryRange {
    pub scope: String,
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub start: i64,
    pub end: i64,
}

impl QueryRange {
    pub fn for_series(id: &SeriesId, start: i64, end: i64) -> Self {
        Self {
            scope: id.scope.clone(),
            name: id.name.clone(),
            tags: id.tags.clone(),
            start,
            end,
        }
    }

    /// Same address, narrower window.
    pub fn with_bounds(&self, start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            ..self.clone()
        }
    }

    /// A series answers this query when scope and name match and it carries every queried tag.
    pub fn matches(&self, id: &SeriesId) -> bool {
        self.scope == id.scope
            && self.name == id.name
            && self
                .tags
                .iter()
                .all(|(k, v)| id.tags.get(k).is_some_and(|tv| tv == v))
    }

    pub fn span(&self) -> i64 {
        self.end - self.start
    }
}

/// Inclusive clip of a datapoint map.
pub fn clip(datapoints: &Datapoints, start: i64, end: i64) -> Datapoints {
    if start > end {
        return Datapoints::new();
    }
    datapoints
        .range(start..=end)
        .map(|(ts, v)| (*ts, *v))
        .collect()
}

/// Identity of a result built from several inputs: fields shared by every input survive,
/// otherwise scope falls back to `default_scope` and name to `result`.
pub fn distill_id<'a>(ids: impl IntoIterator<Item = &'a SeriesId>, default_scope: &str) -> SeriesId {
    let mut iter = ids.into_iter();
    let Some(first) = iter.next() else {
        return SeriesId::new(default_scope, DEFAULT_METRIC_NAME);
    };

    let mut scope = Some(first.scope.clone());
    let mut name = Some(first.name.clone());
    let mut namespace = first.namespace.clone();
    let mut tags = first.tags.clone();

    for id in iter {
        if scope.as_deref() != Some(id.scope.as_str()) {
            scope = None;
        }
        if name.as_deref() != Some(id.name.as_str()) {
            name = None;
        }
        if namespace != id.namespace {
            namespace = None;
        }
        tags.retain(|k, v| id.tags.get(k) == Some(v));
    }

    SeriesId {
        scope: scope.unwrap_or_else(|| default_scope.to_string()),
        name: name.unwrap_or_else(|| DEFAULT_METRIC_NAME.to_string()),
        tags,
        namespace,
    }
}

/// Reads a JSON array of series.
pub fn read_series_file(path: &Path) -> TransformResult<Vec<TimeSeries>> {
    let file = File::open(path).map_err(|err| {
        TransformError::invalid(format!("cannot open {}: {err}", path.display()))
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|err| {
        TransformError::invalid(format!("malformed series file {}: {err}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_renders_sorted_tags() {
        let id = SeriesId::new("system.CHI.SP1.na1", "latency")
            .with_tag("host", "a")
            .with_tag("device", "x");
        assert_eq!(id.identifier(), "system.CHI.SP1.na1:latency{device=x,host=a}");
        assert_eq!(SeriesId::new("s", "m").identifier(), "s:m");
    }

    #[test]
    fn query_matches_on_subset_of_tags() {
        let id = SeriesId::new("s", "m").with_tag("dc", "A").with_tag("sp", "1");
        let q = QueryRange {
            scope: "s".into(),
            name: "m".into(),
            tags: [("dc".to_string(), "A".to_string())].into_iter().collect(),
            start: 0,
            end: 10,
        };
        assert!(q.matches(&id));
        assert!(!q.matches(&SeriesId::new("s", "m")));
    }

    #[test]
    fn distill_keeps_common_fields_only() {
        let a = SeriesId::new("s", "m1").with_tag("dc", "A").with_tag("x", "1");
        let b = SeriesId::new("s", "m2").with_tag("dc", "A").with_tag("x", "2");
        let out = distill_id([&a, &b], "SUM");
        assert_eq!(out.scope, "s");
        assert_eq!(out.name, DEFAULT_METRIC_NAME);
        assert_eq!(out.tags.len(), 1);
        assert_eq!(out.tags.get("dc").map(String::as_str), Some("A"));
    }

    #[test]
    fn clip_is_inclusive_and_handles_inverted_bounds() {
        let dps: Datapoints = [(1, Some(1.0)), (2, None), (3, Some(3.0))].into_iter().collect();
        assert_eq!(clip(&dps, 2, 3).len(), 2);
        assert!(clip(&dps, 3, 2).is_empty());
    }

    #[test]
    fn series_json_keeps_nulls() {
        let mut series = TimeSeries::from_values("s", "m", [(1000, 1.0)]);
        series.datapoints.insert(2000, None);
        let text = serde_json::to_string(&series).expect("serialize");
        let back: TimeSeries = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, series);
        assert_eq!(back.datapoints.get(&2000), Some(&None));
    }
}
