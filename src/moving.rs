//! Trailing-window average or median.

use std::collections::VecDeque;

use crate::duration::parse_window;
use crate::error::{TransformError, TransformResult};
use crate::factory::{expect_arity, Function};
use crate::reducers::{mean, median};
use crate::series::Datapoints;
use crate::shapes::ValueMapping;
use crate::source::DatapointSource;
use crate::transform::{Paging, QueryContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MovingKind {
    #[default]
    Average,
    Median,
}

impl MovingKind {
    pub fn parse(raw: &str) -> TransformResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "avg" => Ok(Self::Average),
            "median" => Ok(Self::Median),
            other => Err(TransformError::unsupported(format!(
                "moving aggregate '{other}' is not one of avg, median"
            ))),
        }
    }
}

/// Value at `t` aggregates the non-null datapoints in `(t - window, t]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moving {
    pub window_ms: i64,
    pub kind: MovingKind,
}

impl Moving {
    pub fn from_constants(constants: &[String]) -> TransformResult<Self> {
        expect_arity(Function::Moving, constants, 1, 2)?;
        let kind = match constants.get(1) {
            Some(raw) => MovingKind::parse(raw)?,
            None => MovingKind::default(),
        };
        Ok(Self {
            window_ms: parse_window(&constants[0])?,
            kind,
        })
    }
}

impl ValueMapping for Moving {
    fn map(&self, _ctx: &QueryContext, source: &mut dyn DatapointSource) -> TransformResult<Datapoints> {
        let mut window: VecDeque<(i64, f64)> = VecDeque::new();
        let mut out = Datapoints::new();
        while let Some((ts, value)) = source.next_point()? {
            if let Some(v) = value {
                window.push_back((ts, v));
            }
            while window.front().is_some_and(|(t, _)| *t <= ts - self.window_ms) {
                window.pop_front();
            }
            let values: Vec<f64> = window.iter().map(|(_, v)| *v).collect();
            let aggregate = match self.kind {
                MovingKind::Average => mean(&values),
                MovingKind::Median => median(&values),
            };
            out.insert(ts, aggregate);
        }
        Ok(out)
    }

    fn paging(&self) -> Paging {
        Paging::Lookback(self.window_ms)
    }
}
