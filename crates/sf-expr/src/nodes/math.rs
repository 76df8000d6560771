use std::any::Any;
use std::fmt;

use sf_runtime::ExprEvaluatorContext;
use sf_types::{ArithmeticOp, StreamTuple, Value, ValueType};

use crate::codegen::{
    CodegenClassScope, CodegenExpression, CodegenMethodScope, ExprForgeCodegenSymbol,
    evaluate_codegen,
};
use crate::error::ExprValidationError;
use crate::node::{
    ExprEvaluator, ExprForge, ExprNode, ExprPrecedence, ForgeConstantType, ValidatedNode,
    evaluate_constant, render_operand,
};
use crate::nodes::constant::ValidatedConstantNode;
use crate::nodes::{syntax, validated_syntax};
use crate::validate::ExprValidationContext;

fn precedence_of(op: ArithmeticOp) -> ExprPrecedence {
    if op.is_multiplicative() {
        ExprPrecedence::Multiply
    } else {
        ExprPrecedence::Additive
    }
}

/// Binary arithmetic `left op right`.
#[derive(Debug)]
pub struct ExprMathNode {
    op: ArithmeticOp,
    left: Box<dyn ExprNode>,
    right: Box<dyn ExprNode>,
}

impl ExprMathNode {
    #[must_use]
    pub fn new(op: ArithmeticOp, left: Box<dyn ExprNode>, right: Box<dyn ExprNode>) -> Self {
        Self { op, left, right }
    }

    #[must_use]
    pub fn op(&self) -> ArithmeticOp {
        self.op
    }
}

#[derive(Debug)]
pub struct ValidatedMathNode {
    op: ArithmeticOp,
    left: Box<dyn ValidatedNode>,
    right: Box<dyn ValidatedNode>,
    value_type: ValueType,
}

impl ValidatedMathNode {
    #[must_use]
    pub fn op(&self) -> ArithmeticOp {
        self.op
    }
}

fn op_of(node: &dyn ExprNode) -> Option<ArithmeticOp> {
    let any = node.as_any();
    any.downcast_ref::<ExprMathNode>()
        .map(ExprMathNode::op)
        .or_else(|| any.downcast_ref::<ValidatedMathNode>().map(ValidatedMathNode::op))
}

fn validate_math(
    op: ArithmeticOp,
    left: &dyn ExprNode,
    right: &dyn ExprNode,
    ctx: &ExprValidationContext<'_>,
) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
    let left = left.validate(ctx)?;
    let right = right.validate(ctx)?;
    let value_type = op.result_type(&left.value_type(), &right.value_type())?;
    let fold = ctx.settings().fold_constants && left.is_constant_result() && right.is_constant_result();
    let node = ValidatedMathNode {
        op,
        left,
        right,
        value_type,
    };
    if fold {
        let value = evaluate_constant(&node);
        // Infinity and NaN have no literal form, so the operation stays.
        if !matches!(value, Value::Float64(v) if !v.is_finite()) {
            return Ok(Box::new(ValidatedConstantNode::folded(value, node.value_type)));
        }
    }
    Ok(Box::new(node))
}

macro_rules! math_syntax {
    ($left:ident, $right:ident, $as_node:ident) => {
        fn kind(&self) -> &'static str {
            "Arithmetic"
        }

        fn validate(
            &self,
            ctx: &ExprValidationContext<'_>,
        ) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
            validate_math(self.op, $as_node(&*self.$left), $as_node(&*self.$right), ctx)
        }

        fn is_constant_result(&self) -> bool {
            false
        }

        fn precedence(&self) -> ExprPrecedence {
            precedence_of(self.op)
        }

        fn to_precedence_free_text(&self, writer: &mut dyn fmt::Write) -> fmt::Result {
            let precedence = precedence_of(self.op);
            render_operand($as_node(&*self.$left), writer, precedence, false)?;
            write!(writer, " {} ", self.op.symbol())?;
            render_operand($as_node(&*self.$right), writer, precedence, true)
        }

        fn equals_node(&self, other: &dyn ExprNode, _ignore_stream_prefix: bool) -> bool {
            op_of(other) == Some(self.op)
        }

        fn child_nodes(&self) -> Vec<&dyn ExprNode> {
            vec![$as_node(&*self.$left), $as_node(&*self.$right)]
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    };
}

impl ExprNode for ExprMathNode {
    math_syntax!(left, right, syntax);
}

impl ExprNode for ValidatedMathNode {
    math_syntax!(left, right, validated_syntax);

    fn validated(&self) -> Option<&dyn ValidatedNode> {
        Some(self)
    }
}

impl ExprForge for ValidatedMathNode {
    fn value_type(&self) -> ValueType {
        self.value_type.clone()
    }

    fn forge_constant_type(&self) -> ForgeConstantType {
        ForgeConstantType::NonConstant
    }

    fn instrumentation_name(&self) -> &'static str {
        "ExprMath"
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
        CodegenExpression::cast(
            self.value_type.clone(),
            CodegenExpression::Arithmetic {
                op: self.op,
                left: Box::new(left),
                right: Box::new(right),
            },
        )
    }
}

impl ExprEvaluator for ValidatedMathNode {
    fn evaluate(
        &self,
        events: &StreamTuple,
        is_new_data: bool,
        ctx: &ExprEvaluatorContext,
    ) -> Value {
        let left = self.left.evaluate(events, is_new_data, ctx);
        let right = self.right.evaluate(events, is_new_data, ctx);
        self.op.apply(&left, &right).coerce(&self.value_type)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sf_config::ExpressionSettings;
    use sf_types::{ArithmeticOp, EventType, Value, ValueType};

    use super::{ExprMathNode, ValidatedMathNode};
    use crate::node::{ExprNode, deep_equals, to_expression_string};
    use crate::nodes::constant::{ExprConstantNode, ValidatedConstantNode};
    use crate::parse::parse_expr;
    use crate::nodes::ident::ExprIdentNode;
    use crate::validate::{ExprValidationContext, StreamTypeServiceImpl};

    fn int(value: i64) -> Box<dyn ExprNode> {
        Box::new(ExprConstantNode::new(Value::Int64(value)).expect("literal"))
    }

    fn ident(name: &str) -> Box<dyn ExprNode> {
        Box::new(ExprIdentNode::new(None, name).expect("ident"))
    }

    fn streams() -> StreamTypeServiceImpl {
        StreamTypeServiceImpl::new().with_stream(
            "s",
            Arc::new(EventType::record(
                "T",
                [("a", ValueType::Int64), ("t", ValueType::Utf8)],
            )),
        )
    }

    #[test]
    fn renders_with_minimal_parentheses() {
        let sum = ExprMathNode::new(ArithmeticOp::Add, ident("a"), int(1));
        let product = ExprMathNode::new(ArithmeticOp::Mul, Box::new(sum), int(2));
        assert_eq!(to_expression_string(&product), "(a + 1) * 2");

        let nested = ExprMathNode::new(
            ArithmeticOp::Sub,
            ident("a"),
            Box::new(ExprMathNode::new(ArithmeticOp::Sub, int(1), int(2))),
        );
        assert_eq!(to_expression_string(&nested), "a - (1 - 2)");
    }

    #[test]
    fn constant_operands_fold_when_enabled() {
        let streams = streams();
        let node = ExprMathNode::new(ArithmeticOp::Add, int(1), int(2));

        let folded = node
            .validate(&ExprValidationContext::new(&streams))
            .expect("valid");
        let constant = folded
            .as_any()
            .downcast_ref::<ValidatedConstantNode>()
            .expect("folded");
        assert_eq!(constant.value(), &Value::Int64(3));

        let settings = ExpressionSettings::default().with_fold_constants(false);
        let kept = node
            .validate(&ExprValidationContext::new(&streams).with_settings(settings))
            .expect("valid");
        assert!(kept.as_any().downcast_ref::<ValidatedMathNode>().is_some());
    }

    #[test]
    fn overflowing_float_is_not_folded() {
        let streams = streams();
        let float = |v: f64| -> Box<dyn ExprNode> {
            Box::new(ExprConstantNode::new(Value::Float64(v)).expect("literal"))
        };
        let node = ExprMathNode::new(ArithmeticOp::Mul, float(1e308), float(10.0));
        let validated = node
            .validate(&ExprValidationContext::new(&streams))
            .expect("valid");
        assert!(validated.as_any().downcast_ref::<ValidatedMathNode>().is_some());

        let text = to_expression_string(validated.as_node());
        let reparsed = parse_expr(&text).expect("parse");
        assert!(deep_equals(&node, &*reparsed, false));
    }

    #[test]
    fn text_operand_is_rejected() {
        let streams = streams();
        let err = ExprMathNode::new(ArithmeticOp::Add, ident("t"), int(1))
            .validate(&ExprValidationContext::new(&streams))
            .expect_err("text");
        assert_eq!(
            err.message(),
            "implicit conversion from utf8 to int64 is not allowed for arithmetic"
        );
    }
}
