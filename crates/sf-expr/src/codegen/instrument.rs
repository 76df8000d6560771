use sf_runtime::InstrumentationPhase;
use sf_types::ValueType;

use super::model::{CodegenExpression, LocalType};
use super::scope::{CodegenClassScope, CodegenMethodScope, ExprForgeCodegenSymbol};
use crate::node::{ValidatedNode, to_expression_string};

/// Emits `node`, wrapped with instrumentation when the class scope asks for
/// it. Forges call this for their children instead of calling the child's
/// uninstrumented generator directly.
pub fn evaluate_codegen(
    node: &dyn ValidatedNode,
    requested_type: &ValueType,
    method_scope: &mut CodegenMethodScope,
    symbols: &mut ExprForgeCodegenSymbol,
    class_scope: &mut CodegenClassScope,
) -> CodegenExpression {
    if class_scope.is_instrumented() {
        InstrumentationBuilder::new(node).build(requested_type, method_scope, symbols, class_scope)
    } else {
        node.evaluate_codegen_uninstrumented(requested_type, method_scope, symbols, class_scope)
    }
}

/// Wraps a forge's generated code in a method that reports begin and end
/// (with the result) to the evaluation context's instrumentation sink.
#[derive(Debug)]
pub struct InstrumentationBuilder<'n> {
    node: &'n dyn ValidatedNode,
    node_kind: &'static str,
    expression_text: String,
}

impl<'n> InstrumentationBuilder<'n> {
    #[must_use]
    pub fn new(node: &'n dyn ValidatedNode) -> Self {
        Self {
            node,
            node_kind: node.instrumentation_name(),
            expression_text: to_expression_string(node.as_node()),
        }
    }

    pub fn build(
        self,
        requested_type: &ValueType,
        method_scope: &mut CodegenMethodScope,
        symbols: &mut ExprForgeCodegenSymbol,
        class_scope: &mut CodegenClassScope,
    ) -> CodegenExpression {
        let value_type = self.node.value_type();
        let method = method_scope.make_child(value_type.clone(), "InstrumentationBuilder");
        symbols.get_add_expr_eval_ctx(method);
        let inner = self.node.evaluate_codegen_uninstrumented(
            requested_type,
            method_scope,
            symbols,
            class_scope,
        );
        method_scope
            .block_mut(method)
            .instrument(
                InstrumentationPhase::Begin,
                self.node_kind,
                &self.expression_text,
                None,
            )
            .declare_var("result", LocalType::Value(value_type), inner)
            .instrument(
                InstrumentationPhase::End,
                self.node_kind,
                &self.expression_text,
                Some(CodegenExpression::local("result")),
            )
            .method_return(CodegenExpression::local("result"));
        CodegenExpression::LocalMethod(method)
    }
}
