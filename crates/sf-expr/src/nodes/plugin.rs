use std::any::Any;
use std::fmt;
use std::sync::Arc;

use sf_runtime::ExprEvaluatorContext;
use sf_types::{StreamTuple, Value, ValueType};

use crate::codegen::{
    CodegenClassScope, CodegenExpression, CodegenMethodScope, ExprForgeCodegenSymbol,
    evaluate_codegen,
};
use crate::error::{ConstructionError, ExprValidationError};
use crate::functions::SingleRowFunction;
use crate::node::{
    ExprEvaluator, ExprForge, ExprNode, ExprPrecedence, ForgeConstantType, ValidatedNode,
    to_expression_string_list,
};
use crate::nodes::{syntax, validated_syntax, write_identifier};
use crate::validate::ExprValidationContext;

/// Call of a plug-in single-row function, `name(arg, ...)`.
#[derive(Debug)]
pub struct ExprPlugInSingleRowNode {
    function_name: String,
    children: Vec<Box<dyn ExprNode>>,
}

impl ExprPlugInSingleRowNode {
    pub fn new(function_name: &str, children: Vec<Box<dyn ExprNode>>) -> Result<Self, ConstructionError> {
        if function_name.is_empty() {
            return Err(ConstructionError::EmptyName {
                kind: "Single-row function",
            });
        }
        Ok(Self {
            function_name: function_name.to_owned(),
            children,
        })
    }

    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.function_name
    }
}

#[derive(Debug)]
pub struct ValidatedPlugInSingleRowNode {
    function_name: String,
    implementation: String,
    function: Arc<dyn SingleRowFunction>,
    children: Vec<Box<dyn ValidatedNode>>,
    value_type: ValueType,
}

impl ValidatedPlugInSingleRowNode {
    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Implementation reference the function name resolved to.
    #[must_use]
    pub fn implementation(&self) -> &str {
        &self.implementation
    }
}

fn function_name_of(node: &dyn ExprNode) -> Option<&str> {
    let any = node.as_any();
    any.downcast_ref::<ExprPlugInSingleRowNode>()
        .map(ExprPlugInSingleRowNode::function_name)
        .or_else(|| {
            any.downcast_ref::<ValidatedPlugInSingleRowNode>()
                .map(ValidatedPlugInSingleRowNode::function_name)
        })
}

fn validate_call<'n>(
    function_name: &str,
    children: impl Iterator<Item = &'n dyn ExprNode>,
    ctx: &ExprValidationContext<'_>,
) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
    let descriptor = ctx
        .plugins()
        .and_then(|plugins| plugins.single_row_function(function_name))
        .ok_or_else(|| {
            ExprValidationError::new(format!("Unknown single-row function '{function_name}'"))
        })?;
    let implementation = descriptor.function_class_name();
    let function = ctx
        .functions()
        .and_then(|functions| functions.resolve(implementation))
        .cloned()
        .ok_or_else(|| {
            ExprValidationError::new(format!(
                "Could not resolve implementation '{implementation}' of single-row function '{function_name}'"
            ))
        })?;

    let children = children
        .map(|child| child.validate(ctx))
        .collect::<Result<Vec<_>, _>>()?;
    let parameter_types: Vec<ValueType> = children.iter().map(|child| child.value_type()).collect();
    let value_type = function.return_type(&parameter_types).map_err(|reason| {
        ExprValidationError::new(format!(
            "Failed to validate single-row function '{function_name}': {reason}"
        ))
    })?;

    Ok(Box::new(ValidatedPlugInSingleRowNode {
        function_name: function_name.to_owned(),
        implementation: implementation.to_owned(),
        function,
        children,
        value_type,
    }))
}

macro_rules! plugin_syntax {
    ($as_node:ident) => {
        fn kind(&self) -> &'static str {
            "Single-row function"
        }

        fn validate(
            &self,
            ctx: &ExprValidationContext<'_>,
        ) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
            validate_call(
                &self.function_name,
                self.children.iter().map(|child| $as_node(&**child)),
                ctx,
            )
        }

        fn is_constant_result(&self) -> bool {
            false
        }

        fn precedence(&self) -> ExprPrecedence {
            ExprPrecedence::Unary
        }

        fn to_precedence_free_text(&self, writer: &mut dyn fmt::Write) -> fmt::Result {
            write_identifier(writer, &self.function_name)?;
            writer.write_char('(')?;
            writer.write_str(&to_expression_string_list(
                self.children.iter().map(|child| $as_node(&**child)),
            ))?;
            writer.write_char(')')
        }

        fn equals_node(&self, other: &dyn ExprNode, _ignore_stream_prefix: bool) -> bool {
            function_name_of(other) == Some(self.function_name.as_str())
        }

        fn child_nodes(&self) -> Vec<&dyn ExprNode> {
            self.children.iter().map(|child| $as_node(&**child)).collect()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    };
}

impl ExprNode for ExprPlugInSingleRowNode {
    plugin_syntax!(syntax);
}

impl ExprNode for ValidatedPlugInSingleRowNode {
    plugin_syntax!(validated_syntax);

    fn validated(&self) -> Option<&dyn ValidatedNode> {
        Some(self)
    }
}

impl ExprForge for ValidatedPlugInSingleRowNode {
    fn value_type(&self) -> ValueType {
        self.value_type.clone()
    }

    fn forge_constant_type(&self) -> ForgeConstantType {
        ForgeConstantType::NonConstant
    }

    fn instrumentation_name(&self) -> &'static str {
        "ExprPlugInSingleRow"
    }

    fn evaluate_codegen_uninstrumented(
        &self,
        _requested_type: &ValueType,
        method_scope: &mut CodegenMethodScope,
        symbols: &mut ExprForgeCodegenSymbol,
        class_scope: &mut CodegenClassScope,
    ) -> CodegenExpression {
        let function = class_scope.add_function(&self.function);
        let args = self
            .children
            .iter()
            .map(|child| {
                evaluate_codegen(
                    &**child,
                    &child.value_type(),
                    method_scope,
                    symbols,
                    class_scope,
                )
            })
            .collect();
        CodegenExpression::cast(
            self.value_type.clone(),
            CodegenExpression::StaticCall { function, args },
        )
    }
}

impl ExprEvaluator for ValidatedPlugInSingleRowNode {
    fn evaluate(
        &self,
        events: &StreamTuple,
        is_new_data: bool,
        ctx: &ExprEvaluatorContext,
    ) -> Value {
        let args: Vec<Value> = self
            .children
            .iter()
            .map(|child| child.evaluate(events, is_new_data, ctx))
            .collect();
        self.function.invoke(&args).coerce(&self.value_type)
    }
}
