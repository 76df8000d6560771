use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use sf_runtime::ExprEvaluatorContext;
use sf_types::{StreamTuple, TypeError, Value, ValueType, logical_and, logical_not, logical_or};

use crate::codegen::{
    CodegenClassScope, CodegenExpression, CodegenMethodScope, ExprForgeCodegenSymbol,
    evaluate_codegen,
};
use crate::error::{ConstructionError, ExprValidationError};
use crate::node::{
    ExprEvaluator, ExprForge, ExprNode, ExprPrecedence, ForgeConstantType, ValidatedNode,
    render_operand,
};
use crate::nodes::{syntax, validated_syntax};
use crate::validate::ExprValidationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
        }
    }

    fn precedence(self) -> ExprPrecedence {
        match self {
            Self::And => ExprPrecedence::And,
            Self::Or => ExprPrecedence::Or,
        }
    }
}

/// Three-valued conjunction; stops at the first false operand.
pub(crate) fn fold_and(values: impl IntoIterator<Item = Value>) -> Value {
    let mut acc = Value::Bool(true);
    for value in values {
        acc = logical_and(&acc, &value);
        if acc == Value::Bool(false) {
            break;
        }
    }
    acc
}

/// Three-valued disjunction; stops at the first true operand.
pub(crate) fn fold_or(values: impl IntoIterator<Item = Value>) -> Value {
    let mut acc = Value::Bool(false);
    for value in values {
        acc = logical_or(&acc, &value);
        if acc == Value::Bool(true) {
            break;
        }
    }
    acc
}

fn require_boolean(context: &'static str, node: &dyn ValidatedNode) -> Result<(), ExprValidationError> {
    match node.value_type() {
        ValueType::Bool | ValueType::Null | ValueType::Any => Ok(()),
        found => Err(TypeError::NonBooleanOperand { context, found }.into()),
    }
}

/// `a and b and ...` or `a or b or ...` over two or more operands.
#[derive(Debug)]
pub struct ExprLogicalNode {
    op: LogicalOp,
    children: Vec<Box<dyn ExprNode>>,
}

impl ExprLogicalNode {
    pub fn new(op: LogicalOp, children: Vec<Box<dyn ExprNode>>) -> Result<Self, ConstructionError> {
        if children.len() < 2 {
            return Err(ConstructionError::TooFewOperands {
                kind: op.keyword(),
                expected: 2,
                found: children.len(),
            });
        }
        Ok(Self { op, children })
    }

    #[must_use]
    pub fn op(&self) -> LogicalOp {
        self.op
    }
}

#[derive(Debug)]
pub struct ValidatedLogicalNode {
    op: LogicalOp,
    children: Vec<Box<dyn ValidatedNode>>,
}

impl ValidatedLogicalNode {
    #[must_use]
    pub fn op(&self) -> LogicalOp {
        self.op
    }
}

fn logical_op_of(node: &dyn ExprNode) -> Option<LogicalOp> {
    let any = node.as_any();
    any.downcast_ref::<ExprLogicalNode>()
        .map(ExprLogicalNode::op)
        .or_else(|| any.downcast_ref::<ValidatedLogicalNode>().map(ValidatedLogicalNode::op))
}

fn validate_logical<'n>(
    op: LogicalOp,
    children: impl Iterator<Item = &'n dyn ExprNode>,
    ctx: &ExprValidationContext<'_>,
) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
    let children = children
        .map(|child| {
            let validated = child.validate(ctx)?;
            require_boolean(op.keyword(), &*validated)?;
            Ok(validated)
        })
        .collect::<Result<Vec<_>, ExprValidationError>>()?;
    Ok(Box::new(ValidatedLogicalNode { op, children }))
}

macro_rules! logical_syntax {
    ($as_node:ident) => {
        fn kind(&self) -> &'static str {
            match self.op {
                LogicalOp::And => "And",
                LogicalOp::Or => "Or",
            }
        }

        fn validate(
            &self,
            ctx: &ExprValidationContext<'_>,
        ) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
            validate_logical(self.op, self.children.iter().map(|child| $as_node(&**child)), ctx)
        }

        fn is_constant_result(&self) -> bool {
            false
        }

        fn precedence(&self) -> ExprPrecedence {
            self.op.precedence()
        }

        fn to_precedence_free_text(&self, writer: &mut dyn fmt::Write) -> fmt::Result {
            // Same-operator groups stay parenthesized; the parser only
            // flattens bare chains.
            let precedence = self.op.precedence();
            for (position, child) in self.children.iter().enumerate() {
                if position > 0 {
                    write!(writer, " {} ", self.op.keyword())?;
                }
                render_operand($as_node(&**child), writer, precedence, true)?;
            }
            Ok(())
        }

        fn equals_node(&self, other: &dyn ExprNode, _ignore_stream_prefix: bool) -> bool {
            logical_op_of(other) == Some(self.op)
        }

        fn child_nodes(&self) -> Vec<&dyn ExprNode> {
            self.children.iter().map(|child| $as_node(&**child)).collect()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    };
}

impl ExprNode for ExprLogicalNode {
    logical_syntax!(syntax);
}

impl ExprNode for ValidatedLogicalNode {
    logical_syntax!(validated_syntax);

    fn validated(&self) -> Option<&dyn ValidatedNode> {
        Some(self)
    }
}

impl ExprForge for ValidatedLogicalNode {
    fn value_type(&self) -> ValueType {
        ValueType::Bool
    }

    fn forge_constant_type(&self) -> ForgeConstantType {
        ForgeConstantType::NonConstant
    }

    fn instrumentation_name(&self) -> &'static str {
        match self.op {
            LogicalOp::And => "ExprAnd",
            LogicalOp::Or => "ExprOr",
        }
    }

    fn evaluate_codegen_uninstrumented(
        &self,
        _requested_type: &ValueType,
        method_scope: &mut CodegenMethodScope,
        symbols: &mut ExprForgeCodegenSymbol,
        class_scope: &mut CodegenClassScope,
    ) -> CodegenExpression {
        let operands = self
            .children
            .iter()
            .map(|child| {
                evaluate_codegen(&**child, &ValueType::Bool, method_scope, symbols, class_scope)
            })
            .collect();
        match self.op {
            LogicalOp::And => CodegenExpression::And(operands),
            LogicalOp::Or => CodegenExpression::Or(operands),
        }
    }
}

impl ExprEvaluator for ValidatedLogicalNode {
    fn evaluate(
        &self,
        events: &StreamTuple,
        is_new_data: bool,
        ctx: &ExprEvaluatorContext,
    ) -> Value {
        let values = self
            .children
            .iter()
            .map(|child| child.evaluate(events, is_new_data, ctx));
        match self.op {
            LogicalOp::And => fold_and(values),
            LogicalOp::Or => fold_or(values),
        }
    }
}

/// `not x`
#[derive(Debug)]
pub struct ExprNotNode {
    child: Box<dyn ExprNode>,
}

impl ExprNotNode {
    #[must_use]
    pub fn new(child: Box<dyn ExprNode>) -> Self {
        Self { child }
    }
}

#[derive(Debug)]
pub struct ValidatedNotNode {
    child: Box<dyn ValidatedNode>,
}

fn is_not_node(node: &dyn ExprNode) -> bool {
    let any = node.as_any();
    any.is::<ExprNotNode>() || any.is::<ValidatedNotNode>()
}

fn validate_not(
    child: &dyn ExprNode,
    ctx: &ExprValidationContext<'_>,
) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
    let child = child.validate(ctx)?;
    require_boolean("not", &*child)?;
    Ok(Box::new(ValidatedNotNode { child }))
}

macro_rules! not_syntax {
    ($as_node:ident) => {
        fn kind(&self) -> &'static str {
            "Not"
        }

        fn validate(
            &self,
            ctx: &ExprValidationContext<'_>,
        ) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
            validate_not($as_node(&*self.child), ctx)
        }

        fn is_constant_result(&self) -> bool {
            false
        }

        fn precedence(&self) -> ExprPrecedence {
            ExprPrecedence::Negated
        }

        fn to_precedence_free_text(&self, writer: &mut dyn fmt::Write) -> fmt::Result {
            writer.write_str("not ")?;
            render_operand($as_node(&*self.child), writer, ExprPrecedence::Negated, false)
        }

        fn equals_node(&self, other: &dyn ExprNode, _ignore_stream_prefix: bool) -> bool {
            is_not_node(other)
        }

        fn child_nodes(&self) -> Vec<&dyn ExprNode> {
            vec![$as_node(&*self.child)]
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    };
}

impl ExprNode for ExprNotNode {
    not_syntax!(syntax);
}

impl ExprNode for ValidatedNotNode {
    not_syntax!(validated_syntax);

    fn validated(&self) -> Option<&dyn ValidatedNode> {
        Some(self)
    }
}

impl ExprForge for ValidatedNotNode {
    fn value_type(&self) -> ValueType {
        ValueType::Bool
    }

    fn forge_constant_type(&self) -> ForgeConstantType {
        ForgeConstantType::NonConstant
    }

    fn instrumentation_name(&self) -> &'static str {
        "ExprNot"
    }

    fn evaluate_codegen_uninstrumented(
        &self,
        _requested_type: &ValueType,
        method_scope: &mut CodegenMethodScope,
        symbols: &mut ExprForgeCodegenSymbol,
        class_scope: &mut CodegenClassScope,
    ) -> CodegenExpression {
        let inner = evaluate_codegen(
            &*self.child,
            &ValueType::Bool,
            method_scope,
            symbols,
            class_scope,
        );
        CodegenExpression::Not(Box::new(inner))
    }
}

impl ExprEvaluator for ValidatedNotNode {
    fn evaluate(
        &self,
        events: &StreamTuple,
        is_new_data: bool,
        ctx: &ExprEvaluatorContext,
    ) -> Value {
        logical_not(&self.child.evaluate(events, is_new_data, ctx))
    }
}

#[cfg(test)]
mod tests {
    use sf_types::Value;

    use super::{ExprLogicalNode, ExprNotNode, LogicalOp, fold_and, fold_or};
    use crate::error::ConstructionError;
    use crate::node::{ExprNode, to_expression_string};
    use crate::nodes::constant::ExprConstantNode;

    fn lit(value: bool) -> Box<dyn ExprNode> {
        Box::new(ExprConstantNode::new(Value::Bool(value)).expect("literal"))
    }

    #[test]
    fn folds_are_three_valued() {
        assert_eq!(fold_and([Value::Bool(true), Value::Null]), Value::Null);
        assert_eq!(
            fold_and([Value::Null, Value::Bool(false)]),
            Value::Bool(false)
        );
        assert_eq!(fold_or([Value::Null, Value::Bool(true)]), Value::Bool(true));
        assert_eq!(fold_or([Value::Bool(false), Value::Null]), Value::Null);
    }

    #[test]
    fn needs_two_operands() {
        assert_eq!(
            ExprLogicalNode::new(LogicalOp::And, vec![lit(true)]).map(|_| ()),
            Err(ConstructionError::TooFewOperands {
                kind: "and",
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn renders_nested_groups() {
        let or = ExprLogicalNode::new(LogicalOp::Or, vec![lit(true), lit(false)]).expect("or");
        let and = ExprLogicalNode::new(LogicalOp::And, vec![Box::new(or), lit(true)]).expect("and");
        let not = ExprNotNode::new(Box::new(and));
        assert_eq!(to_expression_string(&not), "not ((true or false) and true)");
    }
}
