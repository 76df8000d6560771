use sf_conformance::{
    CaseStatus, HarnessConfig, HarnessError, SuiteOptions, enforce_gate, run_case_by_id,
    run_smoke, run_suite, run_suite_with_options,
};

#[test]
fn smoke_report_is_stable() {
    let cfg = HarnessConfig::default_paths();
    let report = run_smoke(&cfg);
    assert_eq!(report.suite, "smoke");
    assert!(report.fixture_count >= 1);
    assert!(cfg.case_fixture_root().join("su_named_stream.json").exists());
}

#[test]
fn every_fixture_case_passes() {
    let cfg = HarnessConfig::default_paths();
    let report = run_suite(&cfg).expect("suite should run");
    let failures: Vec<_> = report
        .results
        .iter()
        .filter(|result| result.status == CaseStatus::Fail)
        .map(|result| format!("{}: {:?}", result.case_id, result.mismatch))
        .collect();
    assert!(failures.is_empty(), "{failures:#?}");
    assert!(report.is_green());
    enforce_gate(&report).expect("gate");
}

#[test]
fn results_are_sorted_by_case_id() {
    let report = run_suite(&HarnessConfig::default_paths()).expect("suite should run");
    let ids: Vec<_> = report.results.iter().map(|r| r.case_id.as_str()).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
}

#[test]
fn single_case_can_be_selected() {
    let cfg = HarnessConfig::default_paths();
    let result = run_case_by_id(&cfg, "su-003-multi-stream-wildcard").expect("case");
    assert_eq!(result.status, CaseStatus::Pass);
    assert_eq!(result.evaluations, 0);

    let options = SuiteOptions {
        case_filter: Some("no-such-case".to_owned()),
    };
    let err = run_suite_with_options(&cfg, &options).expect_err("unknown case");
    assert!(matches!(err, HarnessError::CaseNotFound(id) if id == "no-such-case"));
}

#[test]
fn empty_fixture_root_is_not_green() {
    let mut cfg = HarnessConfig::default_paths();
    cfg.fixture_root = cfg.fixture_root.join("does-not-exist");
    let report = run_suite(&cfg).expect("empty suite");
    assert_eq!(report.fixture_count, 0);
    assert!(!report.is_green());
    assert!(matches!(
        enforce_gate(&report),
        Err(HarnessError::GateFailed { fixture_count: 0, .. })
    ));
}
