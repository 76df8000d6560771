#![forbid(unsafe_code)]

use std::path::PathBuf;

use sf_conformance::{CaseStatus, HarnessConfig, SuiteOptions, enforce_gate, run_suite_with_options};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut fixture_root: Option<PathBuf> = None;
    let mut case_filter: Option<String> = None;
    let mut json = false;
    let mut require_green = false;
    let mut skip_unfolded = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fixtures" => {
                let value = args
                    .next()
                    .ok_or("--fixtures requires a directory containing cases/")?;
                fixture_root = Some(PathBuf::from(value));
            }
            "--case" => {
                let value = args
                    .next()
                    .ok_or("--case requires a value (e.g. su-001-named-stream)")?;
                case_filter = Some(value);
            }
            "--json" => {
                json = true;
            }
            "--require-green" => {
                require_green = true;
            }
            "--folded-only" => {
                skip_unfolded = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    let mut config = HarnessConfig::default_paths();
    if let Some(root) = fixture_root {
        config.fixture_root = root;
    }
    config.check_unfolded = !skip_unfolded;
    let options = SuiteOptions { case_filter };

    let report = run_suite_with_options(&config, &options)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for result in &report.results {
            match (&result.status, &result.mismatch) {
                (CaseStatus::Pass, _) => println!(
                    "PASS {} evaluations={} records={}",
                    result.case_id, result.evaluations, result.instrumentation_records
                ),
                (CaseStatus::Fail, mismatch) => println!(
                    "FAIL {} `{}`: {}",
                    result.case_id,
                    result.expression,
                    mismatch.as_deref().unwrap_or("no detail")
                ),
            }
        }
        println!(
            "suite={} fixtures={} passed={} failed={} green={}",
            report.suite,
            report.fixture_count,
            report.passed,
            report.failed,
            report.is_green()
        );
    }

    if require_green {
        enforce_gate(&report)?;
    }
    Ok(())
}

fn print_help() {
    println!(
        "sf-conformance-cli [--fixtures DIR] [--case ID] [--json] [--require-green] [--folded-only]"
    );
    println!("  --fixtures DIR    fixture root holding a cases/ directory");
    println!("  --case ID         run only the case with this id");
    println!("  --json            print the full report as JSON");
    println!("  --require-green   exit non-zero unless every case passes");
    println!("  --folded-only     skip the second run with constant folding disabled");
}
