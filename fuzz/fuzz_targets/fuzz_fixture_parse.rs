#![no_main]
use libfuzzer_sys::fuzz_target;
use sf_conformance::{ExpressionFixture, HarnessConfig, run_fixture};

fuzz_target!(|data: &[u8]| {
    if data.len() > 16_384 {
        return;
    }
    let Ok(fixture) = serde_json::from_slice::<ExpressionFixture>(data) else {
        return;
    };
    // Any well-formed fixture runs to a report; only malformed tuples error.
    let mut config = HarnessConfig::default_paths();
    config.check_unfolded = false;
    let _ = run_fixture(&config, &fixture);
});
