#![forbid(unsafe_code)]

//! Streamforge: the expression layer of a complex-event-processing engine.
//!
//! ```
//! use std::sync::Arc;
//!
//! use streamforge::{
//!     EventBean, EventType, ExprEvaluator, ExprEvaluatorContext, ExprValidationContext,
//!     StreamTuple, StreamTypeServiceImpl, Value, ValueType, compile_str,
//! };
//!
//! let ticks = Arc::new(EventType::record("Tick", [("px", ValueType::Float64)]));
//! let streams = StreamTypeServiceImpl::new().with_stream("t", ticks.clone());
//! let ctx = ExprValidationContext::new(&streams);
//! let (validated, compiled) = compile_str("t.px * 2 > 10", &ctx)?;
//!
//! let events = StreamTuple::single(EventBean::record(ticks, [("px", Value::Float64(6.0))])?);
//! let eval_ctx = ExprEvaluatorContext::default();
//! assert_eq!(validated.evaluate(&events, true, &eval_ctx), Value::Bool(true));
//! assert_eq!(compiled.evaluate(&events, true, &eval_ctx), Value::Bool(true));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use sf_config::{
    CompilerConfiguration, ConfigError, ExpressionSettings, PlugInDateTimeMethod, PlugInRegistry,
    PlugInSingleRowFunction,
};
pub use sf_expr::{
    Abs, Coalesce, CodegenError, CompiledExpression, ConstructionError, ExprCompiler,
    ExprConstantNode, ExprError, ExprEvaluator, ExprForge, ExprIdentNode, ExprLogicalNode,
    ExprMathNode, ExprNode, ExprNodeOrigin, ExprNotNode, ExprPlugInSingleRowNode, ExprPrecedence,
    ExprRelationalOpNode, ExprStreamUnderlyingNode, ExprValidationContext, ExprValidationError,
    ForgeConstantType, FunctionLibrary, IllegalStateError, LogicalOp, SingleRowFunction,
    StreamBinding, StreamSelector, StreamTypeService, StreamTypeServiceImpl, ValidatedNode,
    compile_str, deep_equals, parse_expr, to_expression_string, validated_subtree,
};
pub use sf_runtime::{
    ExprEvaluatorContext, InstrumentationLedger, InstrumentationPhase, InstrumentationRecord,
    InstrumentationSink,
};
#[cfg(feature = "tracing")]
pub use sf_runtime::TracingSink;
pub use sf_types::{
    ArithmeticOp, EventBean, EventType, Record, RelationalOp, StreamTuple, TypeError, Value,
    ValueType,
};

/// Node implementations and the code generation model, for callers that
/// build trees by hand or inspect generated methods.
pub mod expr {
    pub use sf_expr::codegen;
    pub use sf_expr::nodes;
}
