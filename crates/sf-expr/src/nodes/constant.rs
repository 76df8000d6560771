use std::any::Any;
use std::fmt;

use sf_runtime::ExprEvaluatorContext;
use sf_types::{StreamTuple, Value, ValueType};

use crate::codegen::{CodegenClassScope, CodegenExpression, CodegenMethodScope, ExprForgeCodegenSymbol};
use crate::error::{ConstructionError, ExprValidationError};
use crate::node::{
    ExprEvaluator, ExprForge, ExprNode, ExprPrecedence, ForgeConstantType, ValidatedNode,
};
use crate::validate::ExprValidationContext;

#[derive(Debug, Clone, PartialEq)]
pub struct ExprConstantNode {
    value: Value,
}

impl ExprConstantNode {
    /// Records and non-finite floats have no literal form and are rejected.
    pub fn new(value: Value) -> Result<Self, ConstructionError> {
        match &value {
            Value::Record(record) => Err(ConstructionError::UnsupportedLiteral {
                found: format!("record<{}>", record.type_name()),
            }),
            Value::Float64(v) if !v.is_finite() => Err(ConstructionError::UnsupportedLiteral {
                found: format!("non-finite float {v}"),
            }),
            _ => Ok(Self { value }),
        }
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    fn declared_type(&self) -> ValueType {
        self.value.value_type()
    }
}

/// A constant with its declared type. Folded operations keep the type of the
/// operation even when the folded value is null.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConstantNode {
    value: Value,
    value_type: ValueType,
}

impl ValidatedConstantNode {
    pub(crate) fn folded(value: Value, value_type: ValueType) -> Self {
        Self { value, value_type }
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    fn declared_type(&self) -> ValueType {
        self.value_type.clone()
    }
}

fn constant_of(node: &dyn ExprNode) -> Option<&Value> {
    let any = node.as_any();
    any.downcast_ref::<ExprConstantNode>()
        .map(ExprConstantNode::value)
        .or_else(|| {
            any.downcast_ref::<ValidatedConstantNode>()
                .map(ValidatedConstantNode::value)
        })
}

macro_rules! constant_syntax {
    () => {
        fn kind(&self) -> &'static str {
            "Constant"
        }

        fn validate(
            &self,
            _ctx: &ExprValidationContext<'_>,
        ) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
            Ok(Box::new(ValidatedConstantNode {
                value: self.value.clone(),
                value_type: self.declared_type(),
            }))
        }

        fn is_constant_result(&self) -> bool {
            true
        }

        fn precedence(&self) -> ExprPrecedence {
            ExprPrecedence::Unary
        }

        fn to_precedence_free_text(&self, writer: &mut dyn fmt::Write) -> fmt::Result {
            writer.write_str(&self.value.to_literal())
        }

        fn equals_node(&self, other: &dyn ExprNode, _ignore_stream_prefix: bool) -> bool {
            constant_of(other).is_some_and(|other| {
                self.value.value_type() == other.value_type() && self.value.semantic_eq(other)
            })
        }

        fn child_nodes(&self) -> Vec<&dyn ExprNode> {
            Vec::new()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    };
}

impl ExprNode for ExprConstantNode {
    constant_syntax!();
}

impl ExprNode for ValidatedConstantNode {
    constant_syntax!();

    fn validated(&self) -> Option<&dyn ValidatedNode> {
        Some(self)
    }
}

impl ExprForge for ValidatedConstantNode {
    fn value_type(&self) -> ValueType {
        self.value_type.clone()
    }

    fn forge_constant_type(&self) -> ForgeConstantType {
        ForgeConstantType::CompileTimeConstant
    }

    fn instrumentation_name(&self) -> &'static str {
        "ExprConst"
    }

    fn evaluate_codegen_uninstrumented(
        &self,
        _requested_type: &ValueType,
        _method_scope: &mut CodegenMethodScope,
        _symbols: &mut ExprForgeCodegenSymbol,
        _class_scope: &mut CodegenClassScope,
    ) -> CodegenExpression {
        CodegenExpression::Constant(self.value.clone())
    }
}

impl ExprEvaluator for ValidatedConstantNode {
    fn evaluate(
        &self,
        _events: &StreamTuple,
        _is_new_data: bool,
        _ctx: &ExprEvaluatorContext,
    ) -> Value {
        self.value.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use sf_types::{Record, Value};

    use super::ExprConstantNode;
    use crate::error::ConstructionError;
    use crate::node::ExprNode;

    #[test]
    fn integer_and_float_constants_differ() {
        let int = ExprConstantNode::new(Value::Int64(1)).expect("int");
        let float = ExprConstantNode::new(Value::Float64(1.0)).expect("float");
        assert!(!int.equals_node(&float, false));
        assert!(int.equals_node(&ExprConstantNode::new(Value::Int64(1)).expect("int"), false));
    }

    #[test]
    fn records_are_not_literals() {
        let record = Value::from(Record::new("T", BTreeMap::new()));
        assert!(matches!(
            ExprConstantNode::new(record),
            Err(ConstructionError::UnsupportedLiteral { .. })
        ));
    }

    #[test]
    fn non_finite_floats_are_not_literals() {
        for value in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            assert!(matches!(
                ExprConstantNode::new(Value::Float64(value)),
                Err(ConstructionError::UnsupportedLiteral { .. })
            ));
        }
    }
}
