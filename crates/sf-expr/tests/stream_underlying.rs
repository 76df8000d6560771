//! Stream selectors bound against a stream set and evaluated on both paths.

use std::sync::Arc;

use sf_config::ExpressionSettings;
use sf_expr::{
    ExprCompiler, ExprEvaluator, ExprNode, ExprNodeOrigin, ExprStreamUnderlyingNode,
    ExprValidationContext, IllegalStateError, StreamTypeServiceImpl, ValidatedNode,
    ValidatedStreamUnderlyingNode, deep_equals, parse_expr, to_expression_string, validated_subtree,
};
use sf_runtime::ExprEvaluatorContext;
use sf_types::{EventBean, EventType, StreamTuple, Value, ValueType};

fn type_x() -> Arc<EventType> {
    Arc::new(EventType::record("TypeX", [("id", ValueType::Int64)]))
}

fn type_y() -> Arc<EventType> {
    Arc::new(EventType::record("TypeY", [("label", ValueType::Utf8)]))
}

fn event_x(id: i64) -> EventBean {
    EventBean::record(type_x(), [("id", Value::Int64(id))]).expect("TypeX event")
}

fn event_y(label: &str) -> EventBean {
    EventBean::record(type_y(), [("label", Value::from(label))]).expect("TypeY event")
}

fn two_streams() -> StreamTypeServiceImpl {
    StreamTypeServiceImpl::new()
        .with_stream("a", type_x())
        .with_stream("b", type_y())
}

fn bound(node: &dyn ValidatedNode) -> &ValidatedStreamUnderlyingNode {
    node.as_any()
        .downcast_ref::<ValidatedStreamUnderlyingNode>()
        .expect("stream underlying node")
}

/// Evaluates interpreted and compiled, asserts they agree and returns the value.
fn evaluate_both(node: &dyn ValidatedNode, events: &StreamTuple) -> Value {
    let ctx = ExprEvaluatorContext::default();
    let interpreted = node.evaluate(events, true, &ctx);
    for instrumented in [false, true] {
        let compiled = ExprCompiler::new(ExpressionSettings::default().with_instrumented(instrumented))
            .compile(node)
            .expect("compile");
        assert_eq!(compiled.evaluate(events, true, &ctx), interpreted);
    }
    interpreted
}

#[test]
fn named_selector_binds_to_its_stream() {
    let streams = two_streams();
    let ctx = ExprValidationContext::new(&streams);
    let validated = ExprStreamUnderlyingNode::named("b")
        .validate(&ctx)
        .expect("valid");

    let node = bound(&*validated);
    assert_eq!(node.stream_id(), 1);
    assert_eq!(node.event_type().name(), "TypeY");
    assert_eq!(
        validated.evaluation_type(),
        Ok(ValueType::Record("TypeY".to_owned()))
    );

    let b = event_y("hello");
    let expected = b.underlying().clone();
    let events = StreamTuple::from(vec![Some(event_x(1)), Some(b)]);
    assert_eq!(evaluate_both(&*validated, &events), expected);
}

#[test]
fn wildcard_binds_to_the_only_stream() {
    let streams = StreamTypeServiceImpl::new().with_stream("s", type_x());
    let ctx = ExprValidationContext::new(&streams);
    let validated = ExprStreamUnderlyingNode::wildcard()
        .validate(&ctx)
        .expect("valid");
    assert_eq!(bound(&*validated).stream_id(), 0);

    let s = event_x(7);
    let expected = s.underlying().clone();
    assert_eq!(evaluate_both(&*validated, &StreamTuple::single(s)), expected);
    assert_eq!(evaluate_both(&*validated, &StreamTuple::absent(1)), Value::Null);
}

#[test]
fn unqualified_wildcard_is_rejected_with_several_streams() {
    let streams = two_streams();
    let ctx = ExprValidationContext::new(&streams);
    let err = ExprStreamUnderlyingNode::wildcard()
        .validate(&ctx)
        .expect_err("ambiguous wildcard");
    assert_eq!(
        err.message(),
        "Wildcard must be stream wildcard if specifying multiple streams, use the 'streamname.*' syntax instead"
    );

    let qualified = ExprStreamUnderlyingNode::stream_wildcard("a")
        .validate(&ctx)
        .expect("qualified wildcard");
    assert_eq!(bound(&*qualified).stream_id(), 0);
}

#[test]
fn unknown_stream_name_is_named_in_the_error() {
    let streams = StreamTypeServiceImpl::new().with_stream("a", type_x());
    let ctx = ExprValidationContext::new(&streams);
    let err = ExprStreamUnderlyingNode::named("z")
        .validate(&ctx)
        .expect_err("unknown stream");
    assert!(err.message().contains("'z'"), "{}", err.message());
}

#[test]
fn wildcard_without_streams_is_rejected() {
    let streams = StreamTypeServiceImpl::new();
    let ctx = ExprValidationContext::new(&streams);
    let err = ExprStreamUnderlyingNode::wildcard()
        .validate(&ctx)
        .expect_err("no streams");
    assert_eq!(
        err.message(),
        "Wildcard used but no stream is available to select from"
    );
}

#[test]
fn binding_queries_fail_before_validation() {
    let node = ExprStreamUnderlyingNode::named("a");
    let not_validated = IllegalStateError::NotValidated {
        kind: "Stream underlying",
    };
    assert_eq!(node.evaluation_type(), Err(not_validated));
    assert_eq!(node.stream_id(), Err(not_validated));
    assert!(node.event_type().is_err());
    assert_eq!(
        not_validated.to_string(),
        "Stream underlying node has not been validated"
    );
}

#[test]
fn validation_leaves_the_syntax_node_untouched() {
    let streams = two_streams();
    let ctx = ExprValidationContext::new(&streams);
    let node = ExprStreamUnderlyingNode::stream_wildcard("b");
    let first = node.validate(&ctx).expect("valid");
    let second = node.validate(&ctx).expect("valid");
    assert!(node.evaluation_type().is_err());
    assert_eq!(bound(&*first), bound(&*second));
}

#[test]
fn slot_past_the_end_reads_as_absent() {
    let streams = two_streams();
    let ctx = ExprValidationContext::new(&streams);
    let validated = ExprStreamUnderlyingNode::named("b")
        .validate(&ctx)
        .expect("valid");
    assert_eq!(
        evaluate_both(&*validated, &StreamTuple::single(event_x(1))),
        Value::Null
    );
}

#[test]
fn bare_stream_name_in_text_selects_the_payload() {
    let streams = two_streams();
    let ctx = ExprValidationContext::new(&streams);
    let validated = parse_expr("a")
        .expect("parse")
        .validate(&ctx)
        .expect("valid");
    assert_eq!(bound(&*validated).stream_id(), 0);
    assert!(!bound(&*validated).is_wildcard());
}

#[test]
fn origin_prefixes_validation_messages() {
    let streams = two_streams();
    let ctx = ExprValidationContext::new(&streams);
    let node = ExprStreamUnderlyingNode::stream_wildcard("c");
    let err = validated_subtree(ExprNodeOrigin::Select, &node, &ctx).expect_err("unknown");
    assert_eq!(
        err.message(),
        "Failed to validate select-clause expression 'c.*': Stream by name 'c' could not be found among all streams"
    );
}

#[test]
fn wildcards_compare_equal_regardless_of_stream_name() {
    let star = ExprStreamUnderlyingNode::wildcard();
    let a_star = ExprStreamUnderlyingNode::stream_wildcard("a");
    let a = ExprStreamUnderlyingNode::named("a");
    let b = ExprStreamUnderlyingNode::named("b");
    assert!(star.equals_node(&a_star, false));
    assert!(!a_star.equals_node(&a, false));
    assert!(a.equals_node(&ExprStreamUnderlyingNode::named("a"), false));
    assert!(!a.equals_node(&b, false));
}

#[test]
fn payload_is_returned_as_stored() {
    let prices = Arc::new(EventType::new(
        "Price",
        ValueType::Float64,
        std::collections::BTreeMap::new(),
    ));
    let streams = StreamTypeServiceImpl::new().with_stream("p", prices.clone());
    let ctx = ExprValidationContext::new(&streams);
    let validated = parse_expr("p.*")
        .expect("parse")
        .validate(&ctx)
        .expect("valid");
    assert_eq!(validated.evaluation_type(), Ok(ValueType::Float64));

    let event = EventBean::new(prices, Value::Int64(3)).expect("int payload widens");
    assert_eq!(
        evaluate_both(&*validated, &StreamTuple::single(event)),
        Value::Int64(3)
    );
}

#[test]
fn bare_stream_name_reads_back_equal() {
    let named = ExprStreamUnderlyingNode::named("b");
    let reparsed = parse_expr(&to_expression_string(&named)).expect("parse");
    assert_eq!(reparsed.kind(), "Identifier");
    assert!(deep_equals(&named, &*reparsed, false));
    assert!(deep_equals(&*reparsed, &named, false));

    let streams = two_streams();
    let ctx = ExprValidationContext::new(&streams);
    let validated = parse_expr("b").expect("parse").validate(&ctx).expect("valid");
    assert_eq!(bound(&*validated).stream_id(), 1);
    let text = to_expression_string(validated.as_node());
    assert_eq!(text, "b");
    let reparsed = parse_expr(&text).expect("parse");
    assert!(deep_equals(validated.as_node(), &*reparsed, false));
    assert!(deep_equals(&*reparsed, validated.as_node(), false));
}
