//! Property access `p` or `s.p`. A bare name that matches no property but
//! names a stream validates to the stream's underlying payload.

use std::any::Any;
use std::fmt;

use sf_runtime::ExprEvaluatorContext;
use sf_types::{StreamTuple, Value, ValueType};

use crate::codegen::{
    CodegenClassScope, CodegenExpression, CodegenMethodScope, ExprForgeCodegenSymbol, LocalType,
};
use crate::error::{ConstructionError, ExprValidationError};
use crate::node::{
    ExprEvaluator, ExprForge, ExprNode, ExprPrecedence, ForgeConstantType, ValidatedNode,
};
use crate::nodes::stream_underlying::{StreamSelector, selector_of, validate_selector};
use crate::nodes::write_identifier;
use crate::validate::ExprValidationContext;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExprIdentNode {
    stream_name: Option<String>,
    property: String,
}

impl ExprIdentNode {
    pub fn new(stream_name: Option<&str>, property: &str) -> Result<Self, ConstructionError> {
        if property.is_empty() || stream_name.is_some_and(str::is_empty) {
            return Err(ConstructionError::EmptyName { kind: "Identifier" });
        }
        Ok(Self {
            stream_name: stream_name.map(str::to_owned),
            property: property.to_owned(),
        })
    }

    #[must_use]
    pub fn stream_name(&self) -> Option<&str> {
        self.stream_name.as_deref()
    }

    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedIdentNode {
    stream_name: Option<String>,
    property: String,
    stream_num: usize,
    value_type: ValueType,
}

impl ValidatedIdentNode {
    #[must_use]
    pub fn stream_name(&self) -> Option<&str> {
        self.stream_name.as_deref()
    }

    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    #[must_use]
    pub fn stream_id(&self) -> usize {
        self.stream_num
    }
}

fn ident_of(node: &dyn ExprNode) -> Option<(Option<&str>, &str)> {
    let any = node.as_any();
    if let Some(ident) = any.downcast_ref::<ExprIdentNode>() {
        return Some((ident.stream_name(), ident.property()));
    }
    any.downcast_ref::<ValidatedIdentNode>()
        .map(|ident| (ident.stream_name(), ident.property()))
}

pub(crate) fn unqualified_name_of(node: &dyn ExprNode) -> Option<&str> {
    match ident_of(node)? {
        (None, property) => Some(property),
        (Some(_), _) => None,
    }
}

fn validate_ident(
    stream_name: Option<&str>,
    property: &str,
    ctx: &ExprValidationContext<'_>,
) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
    let streams = ctx.stream_types();
    let event_types = streams.event_types();

    let (stream_num, value_type) = match stream_name {
        Some(stream) => {
            let stream_num = streams.stream_num_for_stream_name(stream).ok_or_else(|| {
                ExprValidationError::new(format!(
                    "Failed to resolve property '{stream}.{property}' to a stream or nested property in a stream"
                ))
            })?;
            let value_type = event_types
                .get(stream_num)
                .and_then(|event_type| event_type.property_type(property))
                .ok_or_else(|| {
                    ExprValidationError::new(format!(
                        "Property named '{property}' is not valid in stream '{stream}'"
                    ))
                })?;
            (stream_num, value_type.clone())
        }
        None => {
            let mut found = event_types
                .iter()
                .enumerate()
                .filter_map(|(num, event_type)| {
                    event_type.property_type(property).map(|ty| (num, ty))
                });
            match (found.next(), found.next()) {
                (Some((num, ty)), None) => (num, ty.clone()),
                (Some(_), Some(_)) => {
                    return Err(ExprValidationError::new(format!(
                        "Property named '{property}' is ambiguous as is valid for more than one stream"
                    )));
                }
                (None, _) => {
                    if streams.stream_num_for_stream_name(property).is_some() {
                        let selector = StreamSelector::new(Some(property.to_owned()), false)
                            .map_err(|err| ExprValidationError::new(err.to_string()))?;
                        return validate_selector(&selector, ctx);
                    }
                    return Err(ExprValidationError::new(format!(
                        "Property named '{property}' is not valid in any stream"
                    )));
                }
            }
        }
    };

    Ok(Box::new(ValidatedIdentNode {
        stream_name: stream_name.map(str::to_owned),
        property: property.to_owned(),
        stream_num,
        value_type,
    }))
}

macro_rules! ident_syntax {
    () => {
        fn kind(&self) -> &'static str {
            "Identifier"
        }

        fn validate(
            &self,
            ctx: &ExprValidationContext<'_>,
        ) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
            validate_ident(self.stream_name.as_deref(), &self.property, ctx)
        }

        fn is_constant_result(&self) -> bool {
            false
        }

        fn precedence(&self) -> ExprPrecedence {
            ExprPrecedence::Unary
        }

        fn to_precedence_free_text(&self, writer: &mut dyn fmt::Write) -> fmt::Result {
            if let Some(stream) = &self.stream_name {
                write_identifier(writer, stream)?;
                writer.write_char('.')?;
            }
            write_identifier(writer, &self.property)
        }

        fn equals_node(&self, other: &dyn ExprNode, ignore_stream_prefix: bool) -> bool {
            let same_ident = ident_of(other).is_some_and(|(stream_name, property)| {
                property == self.property
                    && (ignore_stream_prefix || stream_name == self.stream_name.as_deref())
            });
            same_ident
                || (self.stream_name.is_none()
                    && selector_of(other).and_then(StreamSelector::bare_name)
                        == Some(self.property.as_str()))
        }

        fn child_nodes(&self) -> Vec<&dyn ExprNode> {
            Vec::new()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    };
}

impl ExprNode for ExprIdentNode {
    ident_syntax!();
}

impl ExprNode for ValidatedIdentNode {
    ident_syntax!();

    fn validated(&self) -> Option<&dyn ValidatedNode> {
        Some(self)
    }
}

impl ExprForge for ValidatedIdentNode {
    fn value_type(&self) -> ValueType {
        self.value_type.clone()
    }

    fn forge_constant_type(&self) -> ForgeConstantType {
        ForgeConstantType::NonConstant
    }

    fn instrumentation_name(&self) -> &'static str {
        "ExprIdent"
    }

    fn evaluate_codegen_uninstrumented(
        &self,
        _requested_type: &ValueType,
        method_scope: &mut CodegenMethodScope,
        symbols: &mut ExprForgeCodegenSymbol,
        _class_scope: &mut CodegenClassScope,
    ) -> CodegenExpression {
        let method = method_scope.make_child(self.value_type.clone(), "ValidatedIdentNode");
        let eps = symbols.get_add_eps(method);
        method_scope
            .block_mut(method)
            .declare_var(
                "event",
                LocalType::Event,
                CodegenExpression::array_at_index(eps, self.stream_num),
            )
            .if_ref_null_return_null("event")
            .method_return(CodegenExpression::cast(
                self.value_type.clone(),
                CodegenExpression::property(CodegenExpression::local("event"), &self.property),
            ));
        CodegenExpression::LocalMethod(method)
    }
}

impl ExprEvaluator for ValidatedIdentNode {
    fn evaluate(
        &self,
        events: &StreamTuple,
        _is_new_data: bool,
        _ctx: &ExprEvaluatorContext,
    ) -> Value {
        events.get(self.stream_num).map_or(Value::Null, |event| {
            event.get(&self.property).coerce(&self.value_type)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sf_types::{EventType, ValueType};

    use super::{ExprIdentNode, ValidatedIdentNode};
    use crate::node::{ExprNode, to_expression_string};
    use crate::nodes::stream_underlying::{ExprStreamUnderlyingNode, ValidatedStreamUnderlyingNode};
    use crate::validate::{ExprValidationContext, StreamTypeServiceImpl};

    fn streams() -> StreamTypeServiceImpl {
        StreamTypeServiceImpl::new()
            .with_stream(
                "o",
                Arc::new(EventType::record(
                    "Order",
                    [("qty", ValueType::Int64), ("id", ValueType::Utf8)],
                )),
            )
            .with_stream(
                "p",
                Arc::new(EventType::record(
                    "Payment",
                    [("amount", ValueType::Float64), ("id", ValueType::Utf8)],
                )),
            )
    }

    #[test]
    fn unqualified_property_binds_to_its_only_stream() {
        let streams = streams();
        let ctx = ExprValidationContext::new(&streams);
        let node = ExprIdentNode::new(None, "amount").expect("ident");
        let validated = node.validate(&ctx).expect("valid");
        let ident = validated
            .as_any()
            .downcast_ref::<ValidatedIdentNode>()
            .expect("ident");
        assert_eq!(ident.stream_id(), 1);
        assert_eq!(validated.evaluation_type(), Ok(ValueType::Float64));
    }

    #[test]
    fn shared_property_name_is_ambiguous() {
        let streams = streams();
        let ctx = ExprValidationContext::new(&streams);
        let err = ExprIdentNode::new(None, "id")
            .expect("ident")
            .validate(&ctx)
            .expect_err("ambiguous");
        assert_eq!(
            err.message(),
            "Property named 'id' is ambiguous as is valid for more than one stream"
        );
    }

    #[test]
    fn qualified_property_must_exist_in_that_stream() {
        let streams = streams();
        let ctx = ExprValidationContext::new(&streams);
        let err = ExprIdentNode::new(Some("o"), "amount")
            .expect("ident")
            .validate(&ctx)
            .expect_err("wrong stream");
        assert_eq!(err.message(), "Property named 'amount' is not valid in stream 'o'");
    }

    #[test]
    fn bare_stream_name_becomes_stream_underlying() {
        let streams = streams();
        let ctx = ExprValidationContext::new(&streams);
        let validated = ExprIdentNode::new(None, "p")
            .expect("ident")
            .validate(&ctx)
            .expect("valid");
        let node = validated
            .as_any()
            .downcast_ref::<ValidatedStreamUnderlyingNode>()
            .expect("rewritten");
        assert_eq!(node.stream_id(), 1);
        assert!(!node.is_wildcard());
        assert_eq!(to_expression_string(validated.as_node()), "p");
    }

    #[test]
    fn bare_name_equals_the_named_stream_selector() {
        let bare = ExprIdentNode::new(None, "p").expect("ident");
        let qualified = ExprIdentNode::new(Some("o"), "p").expect("ident");
        let named = ExprStreamUnderlyingNode::named("p");
        assert!(bare.equals_node(&named, false));
        assert!(named.equals_node(&bare, false));
        assert!(!qualified.equals_node(&named, false));
        assert!(!named.equals_node(&qualified, false));
        assert!(!bare.equals_node(&ExprStreamUnderlyingNode::stream_wildcard("p"), false));
        assert!(!bare.equals_node(&ExprStreamUnderlyingNode::named("o"), false));
    }

    #[test]
    fn stream_prefix_can_be_ignored_in_comparison() {
        let qualified = ExprIdentNode::new(Some("o"), "qty").expect("ident");
        let bare = ExprIdentNode::new(None, "qty").expect("ident");
        assert!(!qualified.equals_node(&bare, false));
        assert!(qualified.equals_node(&bare, true));
    }
}
