#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sf_config::{ConfigError, ExpressionSettings, PlugInRegistry, PlugInSingleRowFunction};
use sf_expr::{
    CompiledExpression, ExprCompiler, ExprError, ExprEvaluator, ExprForge, ExprNode,
    ExprValidationContext, FunctionLibrary, StreamTypeServiceImpl, ValidatedNode, parse_expr,
};
use sf_runtime::{ExprEvaluatorContext, InstrumentationLedger};
use sf_types::{EventBean, EventType, StreamTuple, TypeError, Value, ValueType};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
    /// Also run every case with constant folding switched off.
    pub check_unfolded: bool,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
            check_unfolded: true,
        }
    }

    #[must_use]
    pub fn case_fixture_root(&self) -> PathBuf {
        self.fixture_root.join("cases")
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub suite: &'static str,
    pub fixture_count: usize,
}

#[must_use]
pub fn run_smoke(config: &HarnessConfig) -> HarnessReport {
    let fixture_count = list_fixture_files(&config.case_fixture_root())
        .map(|files| files.len())
        .unwrap_or(0);
    HarnessReport {
        suite: "smoke",
        fixture_count,
    }
}

#[derive(Debug, Clone, Default)]
pub struct SuiteOptions {
    pub case_filter: Option<String>,
}

/// One stream in scope: its name plus a record event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureStream {
    pub name: String,
    pub event_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, ValueType>,
}

/// What an evaluation must return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureExpected {
    Value(Value),
    /// The underlying payload of the event in this slot.
    UnderlyingOf(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureEvaluation {
    /// One entry per stream; `null` marks an absent event.
    pub events: Vec<Option<BTreeMap<String, Value>>>,
    #[serde(default = "default_is_new_data")]
    pub is_new_data: bool,
    pub expected: FixtureExpected,
}

fn default_is_new_data() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionFixture {
    pub case_id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub streams: Vec<FixtureStream>,
    #[serde(default)]
    pub plugins: Vec<PlugInSingleRowFunction>,
    pub expression: String,
    #[serde(default)]
    pub expected_type: Option<ValueType>,
    /// Validation must fail with a message containing this text.
    #[serde(default)]
    pub expected_validation_error: Option<String>,
    #[serde(default)]
    pub evaluations: Vec<FixtureEvaluation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub expression: String,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
    pub evaluations: usize,
    pub instrumentation_records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParityReport {
    pub suite: String,
    pub case_filter: Option<String>,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl ParityReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("fixture format error: {0}")]
    FixtureFormat(String),
    #[error("no fixture case with id '{0}'")]
    CaseNotFound(String),
    #[error("parity gate failed: {failed} of {fixture_count} cases failed")]
    GateFailed { failed: usize, fixture_count: usize },
}

pub fn run_suite(config: &HarnessConfig) -> Result<ParityReport, HarnessError> {
    run_suite_with_options(config, &SuiteOptions::default())
}

pub fn run_suite_with_options(
    config: &HarnessConfig,
    options: &SuiteOptions,
) -> Result<ParityReport, HarnessError> {
    let fixtures = load_fixtures(config, options.case_filter.as_deref())?;
    if let Some(case_id) = &options.case_filter
        && fixtures.is_empty()
    {
        return Err(HarnessError::CaseNotFound(case_id.clone()));
    }
    build_report(config, options.case_filter.clone(), &fixtures)
}

pub fn run_case_by_id(config: &HarnessConfig, case_id: &str) -> Result<CaseResult, HarnessError> {
    let options = SuiteOptions {
        case_filter: Some(case_id.to_owned()),
    };
    let mut report = run_suite_with_options(config, &options)?;
    report
        .results
        .pop()
        .ok_or_else(|| HarnessError::CaseNotFound(case_id.to_owned()))
}

/// Fails unless every case passed and at least one ran.
pub fn enforce_gate(report: &ParityReport) -> Result<(), HarnessError> {
    if report.is_green() {
        Ok(())
    } else {
        Err(HarnessError::GateFailed {
            failed: report.failed,
            fixture_count: report.fixture_count,
        })
    }
}

/// Runs a fixture that is already in memory.
pub fn run_fixture(config: &HarnessConfig, fixture: &ExpressionFixture) -> Result<CaseResult, HarnessError> {
    let event_types = fixture
        .streams
        .iter()
        .map(|stream| {
            Arc::new(EventType::record(
                stream.event_type.clone(),
                stream.properties.clone(),
            ))
        })
        .collect::<Vec<_>>();
    let mut streams = StreamTypeServiceImpl::new();
    for (stream, event_type) in fixture.streams.iter().zip(&event_types) {
        streams.add_stream(stream.name.clone(), Arc::clone(event_type));
    }
    let mut plugins = PlugInRegistry::new();
    for plugin in &fixture.plugins {
        plugins.add_single_row_function(plugin.clone())?;
    }
    let functions = FunctionLibrary::with_builtins();

    let mut tuples = Vec::with_capacity(fixture.evaluations.len());
    for evaluation in &fixture.evaluations {
        tuples.push(build_tuple(fixture, &event_types, evaluation)?);
    }

    let mut settings_to_check = vec![ExpressionSettings::default()];
    if config.check_unfolded {
        settings_to_check.push(ExpressionSettings::default().with_fold_constants(false));
    }

    let mut instrumentation_records = 0;
    let mut mismatch = None;
    for settings in settings_to_check {
        let ctx = ExprValidationContext::new(&streams)
            .with_plugins(&plugins, &functions)
            .with_settings(settings);
        match check_case(fixture, &ctx, &tuples) {
            Ok(records) => instrumentation_records += records,
            Err(message) => {
                mismatch = Some(if settings.fold_constants {
                    message
                } else {
                    format!("without constant folding: {message}")
                });
                break;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
        case_id = %fixture.case_id,
        passed = mismatch.is_none(),
        "conformance case finished"
    );

    Ok(CaseResult {
        case_id: fixture.case_id.clone(),
        expression: fixture.expression.clone(),
        status: if mismatch.is_none() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        },
        mismatch,
        evaluations: fixture.evaluations.len(),
        instrumentation_records,
    })
}

struct CheckedTuple {
    events: StreamTuple,
    is_new_data: bool,
    expected: Value,
}

fn build_tuple(
    fixture: &ExpressionFixture,
    event_types: &[Arc<EventType>],
    evaluation: &FixtureEvaluation,
) -> Result<CheckedTuple, HarnessError> {
    if evaluation.events.len() > event_types.len() {
        return Err(HarnessError::FixtureFormat(format!(
            "{}: evaluation supplies {} events for {} streams",
            fixture.case_id,
            evaluation.events.len(),
            event_types.len()
        )));
    }
    let mut events = StreamTuple::absent(event_types.len());
    for (slot, (fields, event_type)) in evaluation.events.iter().zip(event_types).enumerate() {
        if let Some(fields) = fields {
            let event = EventBean::record(Arc::clone(event_type), fields.clone())?;
            events.set(slot, Some(Arc::new(event)));
        }
    }
    let expected = match &evaluation.expected {
        FixtureExpected::Value(value) => value.clone(),
        FixtureExpected::UnderlyingOf(slot) => events
            .get(*slot)
            .map_or(Value::Null, |event| event.underlying().clone()),
    };
    Ok(CheckedTuple {
        events,
        is_new_data: evaluation.is_new_data,
        expected,
    })
}

/// Returns the number of instrumentation records seen, or the first mismatch.
fn check_case(
    fixture: &ExpressionFixture,
    ctx: &ExprValidationContext<'_>,
    tuples: &[CheckedTuple],
) -> Result<usize, String> {
    let parsed = parse_expr(&fixture.expression).map_err(|err| err.to_string())?;
    let validated = match (parsed.validate(ctx), &fixture.expected_validation_error) {
        (Err(err), Some(expected)) if err.message().contains(expected.as_str()) => return Ok(0),
        (Err(err), Some(expected)) => {
            return Err(format!(
                "validation failed with '{}', expected a message containing '{expected}'",
                err.message()
            ));
        }
        (Err(err), None) => return Err(format!("validation failed: {}", err.message())),
        (Ok(_), Some(expected)) => {
            return Err(format!(
                "validation succeeded, expected a failure containing '{expected}'"
            ));
        }
        (Ok(validated), None) => validated,
    };

    if let Some(expected_type) = &fixture.expected_type
        && validated.value_type() != *expected_type
    {
        return Err(format!(
            "value type {} but expected {expected_type}",
            validated.value_type()
        ));
    }

    let plain = compile(&*validated, ctx.settings().with_instrumented(false))?;
    let instrumented = compile(&*validated, ctx.settings().with_instrumented(true))?;

    let mut records = 0;
    for (position, tuple) in tuples.iter().enumerate() {
        let eval_ctx = ExprEvaluatorContext::new(fixture.case_id.clone(), 0);
        let interpreted = validated.evaluate(&tuple.events, tuple.is_new_data, &eval_ctx);
        let compiled = plain.evaluate(&tuple.events, tuple.is_new_data, &eval_ctx);

        let ledger = Arc::new(InstrumentationLedger::new());
        let traced_ctx = ExprEvaluatorContext::new(fixture.case_id.clone(), 0)
            .with_instrumentation(ledger.clone());
        let traced = instrumented.evaluate(&tuple.events, tuple.is_new_data, &traced_ctx);
        records += ledger.len();

        for (path, actual) in [
            ("interpreted", &interpreted),
            ("compiled", &compiled),
            ("instrumented", &traced),
        ] {
            if !actual.semantic_eq(&tuple.expected) {
                return Err(format!(
                    "evaluation {position}: {path} returned {actual:?}, expected {:?}",
                    tuple.expected
                ));
            }
        }
        if ledger.is_empty() {
            return Err(format!(
                "evaluation {position}: instrumented path recorded nothing"
            ));
        }
    }
    Ok(records)
}

fn compile(node: &dyn ValidatedNode, settings: ExpressionSettings) -> Result<CompiledExpression, String> {
    ExprCompiler::new(settings)
        .compile(node)
        .map_err(|err| ExprError::from(err).to_string())
}

fn build_report(
    config: &HarnessConfig,
    case_filter: Option<String>,
    fixtures: &[ExpressionFixture],
) -> Result<ParityReport, HarnessError> {
    let mut results = Vec::with_capacity(fixtures.len());
    for fixture in fixtures {
        results.push(run_fixture(config, fixture)?);
    }

    let failed = results
        .iter()
        .filter(|result| matches!(result.status, CaseStatus::Fail))
        .count();
    let passed = results.len().saturating_sub(failed);

    Ok(ParityReport {
        suite: "expressions".to_owned(),
        case_filter,
        fixture_count: results.len(),
        passed,
        failed,
        results,
    })
}

fn load_fixtures(
    config: &HarnessConfig,
    case_filter: Option<&str>,
) -> Result<Vec<ExpressionFixture>, HarnessError> {
    let fixture_files = list_fixture_files(&config.case_fixture_root())?;
    let mut fixtures = Vec::with_capacity(fixture_files.len());

    for fixture_path in fixture_files {
        let fixture = load_fixture(&fixture_path)?;
        if case_filter.is_none_or(|case_id| fixture.case_id == case_id) {
            fixtures.push(fixture);
        }
    }
    fixtures.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(fixtures)
}

fn load_fixture(path: &Path) -> Result<ExpressionFixture, HarnessError> {
    let body = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&body)?)
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use sf_types::{Value, ValueType};

    use super::{
        CaseStatus, ExpressionFixture, FixtureEvaluation, FixtureExpected, FixtureStream,
        HarnessConfig, run_fixture,
    };

    fn fixture(expression: &str, expected: Value) -> ExpressionFixture {
        ExpressionFixture {
            case_id: "inline".to_owned(),
            description: None,
            streams: vec![FixtureStream {
                name: "s".to_owned(),
                event_type: "Tick".to_owned(),
                properties: BTreeMap::from([("px".to_owned(), ValueType::Float64)]),
            }],
            plugins: Vec::new(),
            expression: expression.to_owned(),
            expected_type: None,
            expected_validation_error: None,
            evaluations: vec![FixtureEvaluation {
                events: vec![Some(BTreeMap::from([(
                    "px".to_owned(),
                    Value::Float64(2.5),
                )]))],
                is_new_data: true,
                expected: FixtureExpected::Value(expected),
            }],
        }
    }

    #[test]
    fn matching_case_passes() {
        let result = run_fixture(&HarnessConfig::default_paths(), &fixture("px * 2", Value::Float64(5.0)))
            .expect("run");
        assert_eq!(result.status, CaseStatus::Pass, "{:?}", result.mismatch);
        assert!(result.instrumentation_records > 0);
    }

    #[test]
    fn wrong_expectation_is_reported() {
        let result = run_fixture(&HarnessConfig::default_paths(), &fixture("px * 2", Value::Float64(4.0)))
            .expect("run");
        assert_eq!(result.status, CaseStatus::Fail);
        let mismatch = result.mismatch.expect("mismatch");
        assert!(mismatch.contains("interpreted returned"), "{mismatch}");
    }

    #[test]
    fn fixture_json_shape() {
        let json = r#"{
            "case_id": "json",
            "streams": [{"name": "s", "event_type": "Tick", "properties": {"px": {"kind": "float64"}}}],
            "expression": "s",
            "evaluations": [
                {"events": [null], "expected": {"value": {"kind": "null"}}},
                {"events": [{"px": {"kind": "float64", "value": 1.0}}], "expected": {"underlying_of": 0}}
            ]
        }"#;
        let fixture: ExpressionFixture = serde_json::from_str(json).expect("fixture");
        assert_eq!(fixture.evaluations.len(), 2);
        assert!(fixture.evaluations[0].is_new_data);
        let result = run_fixture(&HarnessConfig::default_paths(), &fixture).expect("run");
        assert_eq!(result.status, CaseStatus::Pass, "{:?}", result.mismatch);
    }
}
