//! Metric transform engine.
//!
//! Named functions over lists of time series: arithmetic reducers, windowed statistics,
//! filters, grouping, forecasting and fills. Every function runs the same way over
//! in-memory series or over lazily fetched store scanners, and the [`Pager`] runs one
//! function chunk by chunk across a query range.

mod deviation;
mod downsample;
mod duration;
mod error;
mod factory;
mod fill;
mod filter;
mod group_by;
mod holt_winters;
mod mappings;
mod moving;
mod observability;
mod pager;
mod percentile;
mod rate;
mod reducers;
mod scanner;
mod series;
mod set_ops;
mod shapes;
mod source;
mod store;
mod transform;

pub use deviation::{deviation_transform, parse_tolerance, Deviation, TrailingDeviation};
pub use downsample::{Downsample, DownsampleAggregator};
pub use duration::{
    parse_duration, parse_duration_token, parse_timestamp, parse_window, DurationToken, TimeUnit,
    ONE_SECOND_MS, ONE_WEEK_MS,
};
pub use error::{TransformError, TransformResult};
pub use factory::{transform_scanners, transform_series, Function, TransformFactory};
pub use fill::{fill_gaps, fill_line, FillMode, FillTransform, LINE_SCOPE};
pub use filter::{
    FilterRule, FilterTransform, LimitTransform, SeriesReducer, SeriesScore, SortOrder,
    SortTransform,
};
pub use group_by::{GroupByTagTransform, GroupByTransform, TAG_SEPARATOR, UNCAPTURED_GROUP};
pub use holt_winters::{
    ceil_5, holt_winters, HoltWinters, HoltWintersOutput, HoltWintersParams, HoltWintersStep,
};
pub use mappings::{
    Absolute, Alias, AliasRule, Cull, CullDirection, CullThreshold, Derivative, Identity,
    Integral, Log, PatternFilter, Shift,
};
pub use moving::{Moving, MovingKind};
pub use observability::{
    format_timestamp, init_logging, log_app_start, log_pager_chunk, log_series_loaded,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError, LOG_FORMAT_VAR,
    LOG_LEVEL_VAR, LOG_TARGET_VAR,
};
pub use pager::Pager;
pub use percentile::{
    parse_percentile, percentile_of, percentile_transform, Percentile, WindowedPercentile,
    INDIVIDUAL_TOKEN,
};
pub use rate::Rate;
pub use reducers::{mean, median, sample_std_dev, Arithmetic, ArithmeticConstant, Statistic};
pub use scanner::{
    validate_scanner_config, Scanner, ScannerConfig, ScannerKey, ScannerRegistry,
    ScannerSession, DEFAULT_CHUNK_PERCENTAGE,
};
pub use series::{
    clip, distill_id, read_series_file, Datapoint, Datapoints, QueryRange, SeriesId, TimeSeries,
    DEFAULT_METRIC_NAME,
};
pub use set_ops::JoinTransform;
pub use shapes::{
    is_union_token, map_sources, reduce_sources, split_join_policy, JoinPolicy, MappingTransform,
    ReduceOrMap, ReducerOrMappingTransform, ReducerTransform, ValueMapping, ValueReducer,
    ValueZipper, ZipperTransform, UNION_TOKEN,
};
pub use source::{next_collated, Collated, DatapointSource, MapSource};
pub use store::{InMemoryStore, MetricStore, StoreError, StoreReply};
pub use transform::{Paging, QueryContext, Transform};
