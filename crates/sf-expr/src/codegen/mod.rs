//! Code generation for validated expression trees.
//!
//! Forges emit an explicit intermediate form (methods made of statements
//! over expressions) into caller-supplied scopes. [`ExprCompiler`] then
//! materializes the methods into closures.

mod compile;
mod instrument;
mod model;
mod scope;

pub use compile::{CompiledExpression, ExprCompiler};
pub use instrument::{InstrumentationBuilder, evaluate_codegen};
pub use model::{
    CodegenBlock, CodegenExpression, CodegenMethod, CodegenStatement, CodegenSymbol, FunctionId,
    LocalType, MethodId,
};
pub use scope::{CodegenClassScope, CodegenMethodScope, ExprForgeCodegenSymbol, render_listing};
