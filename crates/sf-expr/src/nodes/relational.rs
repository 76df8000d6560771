use std::any::Any;
use std::fmt;

use sf_runtime::ExprEvaluatorContext;
use sf_types::{RelationalOp, StreamTuple, Value, ValueType};

use crate::codegen::{
    CodegenClassScope, CodegenExpression, CodegenMethodScope, ExprForgeCodegenSymbol,
    evaluate_codegen,
};
use crate::error::ExprValidationError;
use crate::node::{
    ExprEvaluator, ExprForge, ExprNode, ExprPrecedence, ForgeConstantType, ValidatedNode,
    render_operand,
};
use crate::nodes::{syntax, validated_syntax};
use crate::validate::ExprValidationContext;

fn precedence_of(op: RelationalOp) -> ExprPrecedence {
    if op.is_equality() {
        ExprPrecedence::Equals
    } else {
        ExprPrecedence::Relational
    }
}

/// Comparison `left op right`, producing a bool or null.
#[derive(Debug)]
pub struct ExprRelationalOpNode {
    op: RelationalOp,
    left: Box<dyn ExprNode>,
    right: Box<dyn ExprNode>,
}

impl ExprRelationalOpNode {
    #[must_use]
    pub fn new(op: RelationalOp, left: Box<dyn ExprNode>, right: Box<dyn ExprNode>) -> Self {
        Self { op, left, right }
    }

    #[must_use]
    pub fn op(&self) -> RelationalOp {
        self.op
    }
}

#[derive(Debug)]
pub struct ValidatedRelationalOpNode {
    op: RelationalOp,
    left: Box<dyn ValidatedNode>,
    right: Box<dyn ValidatedNode>,
}

impl ValidatedRelationalOpNode {
    #[must_use]
    pub fn op(&self) -> RelationalOp {
        self.op
    }
}

fn op_of(node: &dyn ExprNode) -> Option<RelationalOp> {
    let any = node.as_any();
    any.downcast_ref::<ExprRelationalOpNode>()
        .map(ExprRelationalOpNode::op)
        .or_else(|| {
            any.downcast_ref::<ValidatedRelationalOpNode>()
                .map(ValidatedRelationalOpNode::op)
        })
}

fn validate_relational(
    op: RelationalOp,
    left: &dyn ExprNode,
    right: &dyn ExprNode,
    ctx: &ExprValidationContext<'_>,
) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
    let left = left.validate(ctx)?;
    let right = right.validate(ctx)?;
    op.check_operands(&left.value_type(), &right.value_type())?;
    Ok(Box::new(ValidatedRelationalOpNode { op, left, right }))
}

macro_rules! relational_syntax {
    ($as_node:ident) => {
        fn kind(&self) -> &'static str {
            "Relational"
        }

        fn validate(
            &self,
            ctx: &ExprValidationContext<'_>,
        ) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
            validate_relational(self.op, $as_node(&*self.left), $as_node(&*self.right), ctx)
        }

        fn is_constant_result(&self) -> bool {
            false
        }

        fn precedence(&self) -> ExprPrecedence {
            precedence_of(self.op)
        }

        fn to_precedence_free_text(&self, writer: &mut dyn fmt::Write) -> fmt::Result {
            let precedence = precedence_of(self.op);
            render_operand($as_node(&*self.left), writer, precedence, false)?;
            write!(writer, " {} ", self.op.symbol())?;
            render_operand($as_node(&*self.right), writer, precedence, true)
        }

        fn equals_node(&self, other: &dyn ExprNode, _ignore_stream_prefix: bool) -> bool {
            op_of(other) == Some(self.op)
        }

        fn child_nodes(&self) -> Vec<&dyn ExprNode> {
            vec![$as_node(&*self.left), $as_node(&*self.right)]
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    };
}

impl ExprNode for ExprRelationalOpNode {
    relational_syntax!(syntax);
}

impl ExprNode for ValidatedRelationalOpNode {
    relational_syntax!(validated_syntax);

    fn validated(&self) -> Option<&dyn ValidatedNode> {
        Some(self)
    }
}

impl ExprForge for ValidatedRelationalOpNode {
    fn value_type(&self) -> ValueType {
        ValueType::Bool
    }

    fn forge_constant_type(&self) -> ForgeConstantType {
        ForgeConstantType::NonConstant
    }

    fn instrumentation_name(&self) -> &'static str {
        if self.op.is_equality() {
            "ExprEquals"
        } else {
            "ExprRelOp"
        }
    }

    fn evaluate_codegen_uninstrumented(
        &self,
        _requested_type: &ValueType,
        method_scope: &mut CodegenMethodScope,
        symbols: &mut ExprForgeCodegenSymbol,
        class_scope: &mut CodegenClassScope,
    ) -> CodegenExpression {
        let left = evaluate_codegen(
            &*self.left,
            &self.left.value_type(),
            method_scope,
            symbols,
            class_scope,
        );
        let right = evaluate_codegen(
            &*self.right,
            &self.right.value_type(),
            method_scope,
            symbols,
            class_scope,
        );
        CodegenExpression::Relational {
            op: self.op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

impl ExprEvaluator for ValidatedRelationalOpNode {
    fn evaluate(
        &self,
        events: &StreamTuple,
        is_new_data: bool,
        ctx: &ExprEvaluatorContext,
    ) -> Value {
        let left = self.left.evaluate(events, is_new_data, ctx);
        let right = self.right.evaluate(events, is_new_data, ctx);
        self.op.apply(&left, &right)
    }
}

#[cfg(test)]
mod tests {
    use sf_types::{RelationalOp, Value};

    use super::ExprRelationalOpNode;
    use crate::node::{ExprNode, to_expression_string};
    use crate::nodes::constant::ExprConstantNode;

    fn lit(value: Value) -> Box<dyn ExprNode> {
        Box::new(ExprConstantNode::new(value).expect("literal"))
    }

    #[test]
    fn comparisons_never_chain_without_parentheses() {
        let inner = ExprRelationalOpNode::new(
            RelationalOp::Eq,
            lit(Value::Int64(1)),
            lit(Value::Int64(2)),
        );
        let outer = ExprRelationalOpNode::new(RelationalOp::Eq, Box::new(inner), lit(Value::Bool(false)));
        assert_eq!(to_expression_string(&outer), "(1 = 2) = false");
    }

    #[test]
    fn operator_is_part_of_node_equality() {
        let lt = ExprRelationalOpNode::new(RelationalOp::Lt, lit(Value::Int64(1)), lit(Value::Int64(2)));
        let le = ExprRelationalOpNode::new(RelationalOp::Le, lit(Value::Int64(1)), lit(Value::Int64(2)));
        assert!(!lt.equals_node(&le, false));
        assert!(lt.equals_node(&lt, false));
    }
}
