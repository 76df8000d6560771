#![forbid(unsafe_code)]

//! Expression nodes for streamforge.
//!
//! An expression starts life as a tree of unvalidated nodes, either built
//! directly or read with [`parse_expr`]. [`ExprNode::validate`] binds it
//! against the streams in scope and returns a [`ValidatedNode`] that can be
//! evaluated in place ([`ExprEvaluator`]) or compiled ([`ExprCompiler`]).
//! Both paths produce the same value for the same events.

pub mod codegen;
mod error;
mod functions;
mod node;
pub mod nodes;
mod parse;
mod validate;

pub use codegen::{CompiledExpression, ExprCompiler, evaluate_codegen};
pub use error::{
    CodegenError, ConstructionError, ExprError, ExprValidationError, IllegalStateError,
};
pub use functions::{Abs, Coalesce, FunctionLibrary, SingleRowFunction};
pub use node::{
    ExprEvaluator, ExprForge, ExprNode, ExprNodeOrigin, ExprPrecedence, ForgeConstantType,
    ValidatedNode, deep_equals, render_operand, to_expression_string, to_expression_string_list,
    validated_subtree,
};
pub use nodes::constant::{ExprConstantNode, ValidatedConstantNode};
pub use nodes::ident::{ExprIdentNode, ValidatedIdentNode};
pub use nodes::logical::{
    ExprLogicalNode, ExprNotNode, LogicalOp, ValidatedLogicalNode, ValidatedNotNode,
};
pub use nodes::math::{ExprMathNode, ValidatedMathNode};
pub use nodes::plugin::{ExprPlugInSingleRowNode, ValidatedPlugInSingleRowNode};
pub use nodes::relational::{ExprRelationalOpNode, ValidatedRelationalOpNode};
pub use nodes::stream_underlying::{
    ExprStreamUnderlyingNode, StreamBinding, StreamSelector, ValidatedStreamUnderlyingNode,
};
pub use parse::parse_expr;
pub use validate::{ExprValidationContext, StreamTypeService, StreamTypeServiceImpl};

/// Parses, validates and compiles `text` in one step.
pub fn compile_str(
    text: &str,
    ctx: &ExprValidationContext<'_>,
) -> Result<(Box<dyn ValidatedNode>, CompiledExpression), ExprError> {
    let parsed = parse_expr(text)?;
    let validated = parsed.validate(ctx)?;
    let compiled = ExprCompiler::new(ctx.settings()).compile(&*validated)?;
    Ok((validated, compiled))
}
