use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use metric_transform::{
    format_timestamp, init_logging, log_app_start, log_series_loaded, logging_config_from_env,
    parse_timestamp, parse_window, read_series_file, InMemoryStore, Pager, QueryContext,
    QueryRange, ScannerConfig, ScannerSession, TimeSeries, TransformFactory,
};
use serde_json::json;

/// Apply one transform function to a JSON file of series and print the result.
#[derive(Debug, Parser)]
#[command(name = "transform_series", version)]
struct Args {
    /// JSON array of series to read.
    path: PathBuf,

    /// Function name, e.g. SUM, MOVING, DOWNSAMPLE.
    function: String,

    /// Constants passed to the function in order.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    constants: Vec<String>,

    /// Query start as absolute millis or a duration relative to the end.
    #[arg(long, allow_hyphen_values = true)]
    start: Option<String>,

    /// Query end as absolute millis or a duration relative to now.
    #[arg(long, allow_hyphen_values = true)]
    end: Option<String>,

    /// Run paged with chunks of this duration.
    #[arg(long)]
    chunk: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg, &args.function);

    let series = read_series_file(&args.path)?;
    log_series_loaded(&args.path, &series);

    let now = Utc::now().timestamp_millis();
    let end = match &args.end {
        Some(raw) => parse_timestamp(raw, now)?,
        None => series
            .iter()
            .filter_map(TimeSeries::last_timestamp)
            .max()
            .unwrap_or(now),
    };
    let start = match &args.start {
        Some(raw) => parse_timestamp(raw, end)?,
        None => series
            .iter()
            .filter_map(TimeSeries::first_timestamp)
            .min()
            .unwrap_or(end),
    };
    if start > end {
        return Err(format!(
            "start {} is after end {}",
            format_timestamp(start),
            format_timestamp(end)
        )
        .into());
    }
    let ctx = QueryContext::bounded(start, end);

    let store = Arc::new(InMemoryStore::new(series.clone()));
    let session = ScannerSession::new(store, ScannerConfig::default())?;
    let factory = TransformFactory::with_session(session.clone());
    let transform = factory.create(&args.function, &args.constants)?;
    let function = transform.function();

    let (result, chunks) = match &args.chunk {
        Some(raw) => {
            let chunk_ms = parse_window(raw)?;
            let mut scanners = Vec::with_capacity(series.len());
            for s in &series {
                let query = QueryRange::for_series(&s.id, start, end);
                scanners.push(session.open(s.id.clone(), query)?);
            }
            let mut pager = Pager::new(scanners, chunk_ms, transform, ctx)?;
            let chunks = pager.number_chunks();
            (pager.collect_all()?, chunks)
        }
        None => (transform.transform(&ctx, &series)?, 1),
    };

    let output = json!({
        "function": function.to_string(),
        "constants": args.constants,
        "start": format_timestamp(start),
        "end": format_timestamp(end),
        "chunks": chunks,
        "series": result,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
