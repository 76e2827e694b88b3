//! The transform contract shared by every shape and strategy.

use std::time::Instant;

use tracing::info;

use crate::error::{TransformError, TransformResult};
use crate::factory::Function;
use crate::scanner::Scanner;
use crate::series::TimeSeries;
use crate::source::{DatapointSource, MapSource};

/// Bounds of the query a transform runs for. Rate reads `start`/`end`, line fill
/// resolves relative timestamps against `relative_to`, Holt-Winters anchors on `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryContext {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub relative_to: Option<i64>,
}

impl QueryContext {
    pub fn bounded(start: i64, end: i64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            relative_to: Some(end),
        }
    }

    pub fn with_relative_to(mut self, relative_to: i64) -> Self {
        self.relative_to = Some(relative_to);
        self
    }
}

/// How a pager may split a transform over chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paging {
    /// Each output timestamp depends only on inputs at that timestamp.
    Pointwise,
    /// Output at `t` depends on inputs in `(t - ms, t]`.
    Lookback(i64),
    /// Needs the whole range; run once and clip per chunk.
    WholeRange,
}

pub trait Transform: Send + Sync {
    fn function(&self) -> Function;

    /// The single implementation both entry points share.
    fn apply(
        &self,
        ctx: &QueryContext,
        sources: &mut [&mut dyn DatapointSource],
    ) -> TransformResult<Vec<TimeSeries>>;

    fn paging(&self) -> Paging {
        Paging::WholeRange
    }

    /// Eager entry point over materialized series.
    fn transform(&self, ctx: &QueryContext, series: &[TimeSeries]) -> TransformResult<Vec<TimeSeries>> {
        let started = Instant::now();
        log_start(self.function(), "eager", series.len());
        let mut maps: Vec<MapSource<'_>> = series.iter().map(MapSource::new).collect();
        let mut sources: Vec<&mut dyn DatapointSource> = maps
            .iter_mut()
            .map(|m| m as &mut dyn DatapointSource)
            .collect();
        let out = self.apply(ctx, &mut sources)?;
        log_finish(self.function(), "eager", &out, started);
        Ok(out)
    }

    /// Lazy entry point; scanners are disposed before returning.
    fn transform_scanner(
        &self,
        ctx: &QueryContext,
        scanners: &mut [Scanner],
    ) -> TransformResult<Vec<TimeSeries>> {
        let started = Instant::now();
        log_start(self.function(), "scanner", scanners.len());
        let result = {
            let mut sources: Vec<&mut dyn DatapointSource> = scanners
                .iter_mut()
                .map(|s| s as &mut dyn DatapointSource)
                .collect();
            self.apply(ctx, &mut sources)
        };
        for scanner in scanners.iter_mut() {
            scanner.dispose();
        }
        let out = result?;
        log_finish(self.function(), "scanner", &out, started);
        Ok(out)
    }

    /// Entry point over several independent series lists.
    fn transform_lists(
        &self,
        _ctx: &QueryContext,
        _lists: &[Vec<TimeSeries>],
    ) -> TransformResult<Vec<TimeSeries>> {
        Err(TransformError::unsupported(format!(
            "{} does not accept a list of series lists",
            self.function()
        )))
    }
}

fn log_start(function: Function, mode: &str, inputs: usize) {
    info!(
        component = "transform",
        event = "transform.start",
        function = %function,
        mode,
        inputs
    );
}

fn log_finish(function: Function, mode: &str, out: &[TimeSeries], started: Instant) {
    info!(
        component = "transform",
        event = "transform.finish",
        function = %function,
        mode,
        outputs = out.len(),
        datapoints = out.iter().map(|s| s.datapoints.len()).sum::<usize>(),
        elapsed_us = started.elapsed().as_micros() as u64
    );
}
