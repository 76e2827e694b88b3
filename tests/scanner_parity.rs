use std::sync::Arc;

use metric_transform::{
    InMemoryStore, QueryContext, QueryRange, Scanner, ScannerConfig, ScannerSession, SeriesId,
    TimeSeries, TransformError, TransformFactory,
};

const START: i64 = 0;
const END: i64 = 60_000;

fn assert_close(left: Option<f64>, right: Option<f64>, context: &str) {
    match (left, right) {
        (None, None) => {}
        (Some(a), Some(b)) => {
            let tolerance = 1e-9 * a.abs().max(b.abs()).max(1.0);
            assert!((a - b).abs() <= tolerance, "{context}: {a} != {b}");
        }
        _ => panic!("{context}: {left:?} != {right:?}"),
    }
}

fn assert_same_series(name: &str, eager: &[TimeSeries], lazy: &[TimeSeries]) {
    let mut eager: Vec<&TimeSeries> = eager.iter().collect();
    let mut lazy: Vec<&TimeSeries> = lazy.iter().collect();
    eager.sort_by_key(|s| s.id.identifier());
    lazy.sort_by_key(|s| s.id.identifier());

    assert_eq!(eager.len(), lazy.len(), "{name}: output series count");
    for (e, l) in eager.iter().zip(&lazy) {
        assert_eq!(e.id, l.id, "{name}: series ids");
        let e_keys: Vec<i64> = e.datapoints.keys().copied().collect();
        let l_keys: Vec<i64> = l.datapoints.keys().copied().collect();
        assert_eq!(e_keys, l_keys, "{name}: timestamps of {}", e.id.identifier());
        for (ts, value) in &e.datapoints {
            assert_close(*value, l.datapoints[ts], &format!("{name} at {ts}"));
        }
    }
}

fn inputs() -> Vec<TimeSeries> {
    let mut a = TimeSeries::from_values(
        "system.WAS.na1",
        "latency",
        (0..=60).map(|i| (i * 1_000, ((i * 7) % 13) as f64 + 1.0)),
    );
    for i in (5..=60).step_by(11) {
        a.datapoints.insert(i * 1_000, None);
    }
    a.id = a.id.with_tag("dc", "WAS");

    let mut b = TimeSeries::from_values(
        "system.WAS.na2",
        "latency",
        (0..=30).map(|i| (i * 2_000, i as f64 * 0.5 + 1.0)),
    );
    b.id = b.id.with_tag("dc", "WAS");

    let mut c = TimeSeries::from_values(
        "system.CHI.na1",
        "latency",
        (0..=20).map(|i| (i * 3_000, 40.0 - i as f64)),
    );
    c.id = c.id.with_tag("dc", "CHI");
    vec![a, b, c]
}

fn session_with(series: &[TimeSeries], chunk_percentage: f64) -> ScannerSession {
    let store = Arc::new(InMemoryStore::new(series.to_vec()));
    ScannerSession::new(store, ScannerConfig { chunk_percentage }).expect("scanner config should be valid")
}

fn open_all(session: &ScannerSession, series: &[TimeSeries]) -> Vec<Scanner> {
    series
        .iter()
        .map(|s| {
            let query = QueryRange::for_series(&s.id, START, END);
            session.open(s.id.clone(), query).expect("scanner should open")
        })
        .collect()
}

fn check_parity(name: &str, constants: &[&str]) {
    let constants: Vec<String> = constants.iter().map(|c| c.to_string()).collect();
    let series = inputs();
    let ctx = QueryContext::bounded(START, END);

    for chunk_percentage in [0.05, 0.3, 1.0] {
        let session = session_with(&series, chunk_percentage);
        let factory = TransformFactory::with_session(session.clone());

        let eager = factory
            .create(name, &constants)
            .expect("transform should build")
            .transform(&ctx, &series)
            .expect("eager transform should succeed");

        let mut scanners = open_all(&session, &series);
        let lazy = factory
            .create(name, &constants)
            .expect("transform should build")
            .transform_scanner(&ctx, &mut scanners)
            .expect("scanner transform should succeed");

        assert_same_series(&format!("{name} {constants:?}"), &eager, &lazy);
        assert!(scanners.iter().all(Scanner::is_disposed), "{name}: scanners disposed");
        assert!(session.registry().is_empty(), "{name}: registry drained");
    }
}

#[test]
fn value_mappings_match() {
    check_parity("IDENTITY", &[]);
    check_parity("ABSOLUTE", &[]);
    check_parity("LOG", &["2"]);
    check_parity("SHIFT", &["-5s"]);
    check_parity("ALIAS", &["renamed", "literal"]);
    check_parity("SCALE", &["2.5"]);
    check_parity("CULL_ABOVE", &["10", "value"]);
    check_parity("CULL_BELOW", &["50", "percentile"]);
    check_parity("DERIVATIVE", &[]);
    check_parity("INTEGRAL", &[]);
}

#[test]
fn reducers_match_under_both_join_policies() {
    for name in ["SUM", "DIFF", "DIVIDE", "AVERAGE", "MIN", "MAX"] {
        check_parity(name, &[]);
        check_parity(name, &["union"]);
    }
    check_parity("COUNT", &[]);
    check_parity("UNION", &[]);
    check_parity("ZEROIFMISSINGSUM", &[]);
    check_parity("JOIN", &[]);
}

#[test]
fn zippers_match() {
    for name in ["SUM_V", "DIFF_V", "SCALE_V", "DIVIDE_V"] {
        check_parity(name, &[]);
        check_parity(name, &["UNION"]);
    }
}

#[test]
fn windowed_statistics_match() {
    check_parity("PERCENTILE", &["90"]);
    check_parity("PERCENTILE", &["50", "10s"]);
    check_parity("PERCENTILE", &["50", "INDIVIDUAL"]);
    check_parity("DEVIATION", &["0.5"]);
    check_parity("DEVIATION", &["0.5", "4"]);
    check_parity("DOWNSAMPLE", &["10s-avg"]);
    check_parity("DOWNSAMPLE", &["1m-zimsum"]);
    check_parity("MOVING", &["5s"]);
    check_parity("MOVING", &["7s", "median"]);
    check_parity("RATE", &[]);
    check_parity("RATE", &["2s", "false", "true"]);
    check_parity("FILL", &["2s", "0s", "0"]);
    check_parity("HW_FORECAST", &["0.3", "0.1", "0.2", "4"]);
    check_parity("HW_DEVIATION", &["0.3", "0.1", "0.2", "4"]);
}

#[test]
fn filters_and_groupings_match() {
    check_parity("ABOVE", &["5"]);
    check_parity("BELOW", &["20", "max"]);
    check_parity("HIGHEST", &["1", "recent"]);
    check_parity("LOWEST", &["2", "min"]);
    check_parity("SORT", &["2", "average", "descending"]);
    check_parity("LIMIT", &["2"]);
    check_parity("INCLUDE", &["WAS"]);
    check_parity("EXCLUDE", &["na2"]);
    check_parity("GROUPBY", &[r"system\.([A-Z]+)\.", "SUM"]);
    check_parity("GROUPBYTAG", &["dc", "AVERAGE"]);
}

#[test]
fn failed_transforms_still_dispose_scanners() {
    let series = vec![
        TimeSeries::from_values("s", "a", [(1_000, 4.0), (2_000, 6.0)]),
        TimeSeries::from_values("s", "b", [(1_000, 2.0), (2_000, 0.0)]),
    ];
    let session = session_with(&series, 0.5);
    let mut scanners = open_all(&session, &series);

    let err = TransformFactory::with_session(session.clone())
        .create("DIVIDE", &[])
        .expect("divide should build")
        .transform_scanner(&QueryContext::bounded(START, END), &mut scanners)
        .expect_err("division by zero should fail");

    assert!(matches!(err, TransformError::Arithmetic(_)));
    assert!(scanners.iter().all(Scanner::is_disposed));
    assert!(session.registry().is_empty());
}

#[test]
fn duplicate_scanners_are_rejected_until_released() {
    let series = inputs();
    let session = session_with(&series, 0.1);
    let id: SeriesId = series[0].id.clone();
    let query = QueryRange::for_series(&id, START, END);

    let mut first = session.open(id.clone(), query.clone()).expect("first scanner opens");
    assert!(session.open(id.clone(), query.clone()).is_err());
    assert!(session.registry().contains_series(&id, &query));

    first.dispose();
    assert!(!session.registry().contains_series(&id, &query));
    session.open(id, query).expect("released key can be reused");
}
