//! Selects the underlying payload of one stream's event: `*` when a single
//! stream is in scope, `s.*` for a named stream, or a bare stream name.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use sf_runtime::ExprEvaluatorContext;
use sf_types::{EventType, StreamTuple, Value, ValueType};

use crate::codegen::{
    CodegenClassScope, CodegenExpression, CodegenMethodScope, ExprForgeCodegenSymbol, LocalType,
};
use crate::error::{ConstructionError, ExprValidationError, IllegalStateError};
use crate::node::{
    ExprEvaluator, ExprForge, ExprNode, ExprPrecedence, ForgeConstantType, ValidatedNode,
};
use crate::nodes::ident::unqualified_name_of;
use crate::nodes::write_identifier;
use crate::validate::ExprValidationContext;

const KIND: &str = "Stream underlying";

/// Syntax shared by both states of the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamSelector {
    stream_name: Option<String>,
    wildcard: bool,
}

impl StreamSelector {
    pub fn new(stream_name: Option<String>, wildcard: bool) -> Result<Self, ConstructionError> {
        if stream_name.is_none() && !wildcard {
            return Err(ConstructionError::StreamNameRequired);
        }
        Ok(Self {
            stream_name,
            wildcard,
        })
    }

    #[must_use]
    pub fn stream_name(&self) -> Option<&str> {
        self.stream_name.as_deref()
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// Two selectors match when both are wildcards, or when neither is and
    /// the stream names agree. A named wildcard therefore equals `*`.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        if self.wildcard != other.wildcard {
            return false;
        }
        self.wildcard || self.stream_name == other.stream_name
    }

    /// Name of a non-wildcard selector. Its text is the bare name, which
    /// also reads as an unqualified identifier.
    #[must_use]
    pub fn bare_name(&self) -> Option<&str> {
        if self.wildcard {
            None
        } else {
            self.stream_name()
        }
    }

    fn render(&self, writer: &mut dyn fmt::Write) -> fmt::Result {
        match (&self.stream_name, self.wildcard) {
            (Some(name), true) => {
                write_identifier(writer, name)?;
                writer.write_str(".*")
            }
            (Some(name), false) => write_identifier(writer, name),
            (None, _) => writer.write_char('*'),
        }
    }

    fn resolve(&self, ctx: &ExprValidationContext<'_>) -> Result<StreamBinding, ExprValidationError> {
        let streams = ctx.stream_types();
        let stream_num = match &self.stream_name {
            Some(name) => streams.stream_num_for_stream_name(name).ok_or_else(|| {
                ExprValidationError::new(format!(
                    "Stream by name '{name}' could not be found among all streams"
                ))
            })?,
            None => {
                if streams.stream_count() > 1 {
                    return Err(ExprValidationError::new(
                        "Wildcard must be stream wildcard if specifying multiple streams, use the 'streamname.*' syntax instead",
                    ));
                }
                0
            }
        };
        let event_type = streams.event_types().get(stream_num).cloned().ok_or_else(|| {
            ExprValidationError::new("Wildcard used but no stream is available to select from")
        })?;
        Ok(StreamBinding {
            stream_num,
            event_type,
        })
    }
}

/// Resolved stream position and the type of events found there.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamBinding {
    stream_num: usize,
    event_type: Arc<EventType>,
}

/// Unvalidated stream selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprStreamUnderlyingNode {
    selector: StreamSelector,
}

impl ExprStreamUnderlyingNode {
    pub fn new(stream_name: Option<&str>, wildcard: bool) -> Result<Self, ConstructionError> {
        Ok(Self {
            selector: StreamSelector::new(stream_name.map(str::to_owned), wildcard)?,
        })
    }

    /// `*`
    #[must_use]
    pub fn wildcard() -> Self {
        Self {
            selector: StreamSelector {
                stream_name: None,
                wildcard: true,
            },
        }
    }

    /// `s.*`
    #[must_use]
    pub fn stream_wildcard(stream_name: &str) -> Self {
        Self {
            selector: StreamSelector {
                stream_name: Some(stream_name.to_owned()),
                wildcard: true,
            },
        }
    }

    /// `s`
    #[must_use]
    pub fn named(stream_name: &str) -> Self {
        Self {
            selector: StreamSelector {
                stream_name: Some(stream_name.to_owned()),
                wildcard: false,
            },
        }
    }

    #[must_use]
    pub fn selector(&self) -> &StreamSelector {
        &self.selector
    }

    #[must_use]
    pub fn stream_name(&self) -> Option<&str> {
        self.selector.stream_name()
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.selector.is_wildcard()
    }

    /// Stream number is known only after validation.
    pub fn stream_id(&self) -> Result<usize, IllegalStateError> {
        Err(IllegalStateError::NotValidated { kind: KIND })
    }

    pub fn event_type(&self) -> Result<&Arc<EventType>, IllegalStateError> {
        Err(IllegalStateError::NotValidated { kind: KIND })
    }
}

/// Stream selector bound to a stream number and event type.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedStreamUnderlyingNode {
    selector: StreamSelector,
    binding: StreamBinding,
}

impl ValidatedStreamUnderlyingNode {
    #[must_use]
    pub fn selector(&self) -> &StreamSelector {
        &self.selector
    }

    #[must_use]
    pub fn stream_name(&self) -> Option<&str> {
        self.selector.stream_name()
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.selector.is_wildcard()
    }

    #[must_use]
    pub fn stream_id(&self) -> usize {
        self.binding.stream_num
    }

    #[must_use]
    pub fn event_type(&self) -> &Arc<EventType> {
        &self.binding.event_type
    }
}

pub(crate) fn selector_of(node: &dyn ExprNode) -> Option<&StreamSelector> {
    let any = node.as_any();
    any.downcast_ref::<ExprStreamUnderlyingNode>()
        .map(ExprStreamUnderlyingNode::selector)
        .or_else(|| {
            any.downcast_ref::<ValidatedStreamUnderlyingNode>()
                .map(ValidatedStreamUnderlyingNode::selector)
        })
}

pub(crate) fn validate_selector(
    selector: &StreamSelector,
    ctx: &ExprValidationContext<'_>,
) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
    let binding = selector.resolve(ctx)?;
    #[cfg(feature = "tracing")]
    tracing::debug!(
        stream_name = ?selector.stream_name(),
        wildcard = selector.is_wildcard(),
        stream_num = binding.stream_num,
        event_type = binding.event_type.name(),
        "bound stream selector"
    );
    Ok(Box::new(ValidatedStreamUnderlyingNode {
        selector: selector.clone(),
        binding,
    }))
}

macro_rules! stream_underlying_syntax {
    () => {
        fn kind(&self) -> &'static str {
            KIND
        }

        fn validate(
            &self,
            ctx: &ExprValidationContext<'_>,
        ) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
            validate_selector(&self.selector, ctx)
        }

        fn is_constant_result(&self) -> bool {
            false
        }

        fn precedence(&self) -> ExprPrecedence {
            ExprPrecedence::Unary
        }

        fn to_precedence_free_text(&self, writer: &mut dyn fmt::Write) -> fmt::Result {
            self.selector.render(writer)
        }

        fn equals_node(&self, other: &dyn ExprNode, _ignore_stream_prefix: bool) -> bool {
            selector_of(other).is_some_and(|other| self.selector.matches(other))
                || self
                    .selector
                    .bare_name()
                    .is_some_and(|name| unqualified_name_of(other) == Some(name))
        }

        fn child_nodes(&self) -> Vec<&dyn ExprNode> {
            Vec::new()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    };
}

impl ExprNode for ExprStreamUnderlyingNode {
    stream_underlying_syntax!();
}

impl ExprNode for ValidatedStreamUnderlyingNode {
    stream_underlying_syntax!();

    fn validated(&self) -> Option<&dyn ValidatedNode> {
        Some(self)
    }
}

impl ExprForge for ValidatedStreamUnderlyingNode {
    fn value_type(&self) -> ValueType {
        self.binding.event_type.underlying_type().clone()
    }

    fn forge_constant_type(&self) -> ForgeConstantType {
        ForgeConstantType::NonConstant
    }

    fn instrumentation_name(&self) -> &'static str {
        "ExprStreamUnd"
    }

    fn evaluate_codegen_uninstrumented(
        &self,
        _requested_type: &ValueType,
        method_scope: &mut CodegenMethodScope,
        symbols: &mut ExprForgeCodegenSymbol,
        _class_scope: &mut CodegenClassScope,
    ) -> CodegenExpression {
        let method = method_scope.make_child(self.value_type(), "ValidatedStreamUnderlyingNode");
        let eps = symbols.get_add_eps(method);
        method_scope
            .block_mut(method)
            .declare_var(
                "event",
                LocalType::Event,
                CodegenExpression::array_at_index(eps, self.binding.stream_num),
            )
            .if_ref_null_return_null("event")
            .method_return(CodegenExpression::underlying(CodegenExpression::local(
                "event",
            )));
        CodegenExpression::LocalMethod(method)
    }
}

impl ExprEvaluator for ValidatedStreamUnderlyingNode {
    fn evaluate(
        &self,
        events: &StreamTuple,
        _is_new_data: bool,
        _ctx: &ExprEvaluatorContext,
    ) -> Value {
        // The payload is returned as stored, never converted.
        events
            .get(self.binding.stream_num)
            .map_or(Value::Null, |event| event.underlying().clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sf_types::{EventType, ValueType};

    use super::{ExprStreamUnderlyingNode, StreamSelector};
    use crate::error::{ConstructionError, IllegalStateError};
    use crate::node::{ExprNode, to_expression_string};
    use crate::validate::{ExprValidationContext, StreamTypeServiceImpl};

    fn streams() -> StreamTypeServiceImpl {
        let ty = Arc::new(EventType::record("T", [("x", ValueType::Int64)]));
        StreamTypeServiceImpl::new()
            .with_stream("a", ty.clone())
            .with_stream("b", ty)
    }

    #[test]
    fn construction_requires_name_or_wildcard() {
        assert_eq!(
            ExprStreamUnderlyingNode::new(None, false),
            Err(ConstructionError::StreamNameRequired)
        );
        assert!(StreamSelector::new(None, true).is_ok());
    }

    #[test]
    fn renders_each_selector_form() {
        assert_eq!(to_expression_string(&ExprStreamUnderlyingNode::wildcard()), "*");
        assert_eq!(
            to_expression_string(&ExprStreamUnderlyingNode::stream_wildcard("s")),
            "s.*"
        );
        assert_eq!(to_expression_string(&ExprStreamUnderlyingNode::named("s")), "s");
    }

    #[test]
    fn wildcards_compare_equal_regardless_of_name() {
        let unnamed = ExprStreamUnderlyingNode::wildcard();
        let named = ExprStreamUnderlyingNode::stream_wildcard("s");
        let bare = ExprStreamUnderlyingNode::named("s");
        assert!(unnamed.equals_node(&named, false));
        assert!(!named.equals_node(&bare, false));
        assert!(bare.equals_node(&ExprStreamUnderlyingNode::named("s"), false));
        assert!(!bare.equals_node(&ExprStreamUnderlyingNode::named("t"), false));
    }

    #[test]
    fn binding_queries_fail_before_validation() {
        let node = ExprStreamUnderlyingNode::stream_wildcard("b");
        assert_eq!(
            node.stream_id().expect_err("unvalidated"),
            IllegalStateError::NotValidated {
                kind: "Stream underlying"
            }
        );
        assert_eq!(
            node.evaluation_type()
                .expect_err("unvalidated")
                .to_string(),
            "Stream underlying node has not been validated"
        );
    }

    #[test]
    fn validated_node_equals_its_source() {
        let streams = streams();
        let ctx = ExprValidationContext::new(&streams);
        let node = ExprStreamUnderlyingNode::stream_wildcard("b");
        let validated = node.validate(&ctx).expect("valid");
        assert!(validated.equals_node(&node, false));
        assert!(node.equals_node(validated.as_node(), false));
        assert_eq!(
            validated.evaluation_type().expect("validated"),
            ValueType::Record("T".to_owned())
        );
    }
}
