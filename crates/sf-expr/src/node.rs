use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use sf_runtime::ExprEvaluatorContext;
use sf_types::{StreamTuple, Value, ValueType};

use crate::codegen::{CodegenClassScope, CodegenExpression, CodegenMethodScope, ExprForgeCodegenSymbol};
use crate::error::{ExprValidationError, IllegalStateError};
use crate::validate::ExprValidationContext;

/// Binding strength used when rendering. A child whose level is below its
/// parent's is parenthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprPrecedence {
    Unary,
    Multiply,
    Additive,
    Relational,
    Equals,
    Negated,
    And,
    Or,
    Minimum,
}

impl ExprPrecedence {
    #[must_use]
    pub fn level(self) -> i32 {
        match self {
            Self::Unary => 11,
            Self::Multiply => 10,
            Self::Additive => 9,
            Self::Relational => 7,
            Self::Equals => 6,
            Self::Negated => 5,
            Self::And => 3,
            Self::Or => 2,
            Self::Minimum => i32::MIN,
        }
    }

    /// Left-associative levels render `a op b op c` without parentheses on
    /// the left; comparisons never chain.
    #[must_use]
    pub fn is_left_associative(self) -> bool {
        matches!(self, Self::Multiply | Self::Additive | Self::And | Self::Or)
    }
}

/// Whether a forge's value is known without looking at any event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForgeConstantType {
    NonConstant,
    CompileTimeConstant,
}

/// Clause an expression appears in, used to prefix validation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprNodeOrigin {
    Select,
    Filter,
    Where,
    Having,
    GroupBy,
    OrderBy,
    ContextCondition,
}

impl ExprNodeOrigin {
    #[must_use]
    pub fn clause_name(self) -> &'static str {
        match self {
            Self::Select => "select-clause",
            Self::Filter => "filter",
            Self::Where => "where-clause",
            Self::Having => "having-clause",
            Self::GroupBy => "group-by-clause",
            Self::OrderBy => "order-by-clause",
            Self::ContextCondition => "context condition",
        }
    }
}

/// Syntactic view of an expression node, available in both the unvalidated
/// and the validated state.
///
/// Validation never mutates a node. It returns a new node carrying the
/// resolved bindings, which may be of a different kind (an identifier naming
/// a stream becomes a stream-underlying node, a constant operation folds to a
/// constant). Queries that need a binding fail with [`IllegalStateError`] on
/// unvalidated nodes.
pub trait ExprNode: fmt::Debug + Send + Sync + Any {
    /// Human readable kind label, used in error messages.
    fn kind(&self) -> &'static str;

    fn validate(
        &self,
        ctx: &ExprValidationContext<'_>,
    ) -> Result<Box<dyn ValidatedNode>, ExprValidationError>;

    /// The validated view of this node, if it has one.
    fn validated(&self) -> Option<&dyn ValidatedNode> {
        None
    }

    fn evaluation_type(&self) -> Result<ValueType, IllegalStateError> {
        self.validated()
            .map(|node| node.value_type())
            .ok_or(IllegalStateError::NotValidated { kind: self.kind() })
    }

    fn is_constant_result(&self) -> bool;

    fn precedence(&self) -> ExprPrecedence;

    /// Writes this node with children rendered through [`render_operand`].
    fn to_precedence_free_text(&self, writer: &mut dyn fmt::Write) -> fmt::Result;

    /// Shallow comparison of this node against `other`: kind and own
    /// attributes only, never children.
    fn equals_node(&self, other: &dyn ExprNode, ignore_stream_prefix: bool) -> bool;

    fn child_nodes(&self) -> Vec<&dyn ExprNode>;

    fn as_any(&self) -> &dyn Any;
}

/// Compile-time side of a validated node.
pub trait ExprForge: Send + Sync {
    fn value_type(&self) -> ValueType;

    fn forge_constant_type(&self) -> ForgeConstantType;

    /// Node label carried by instrumentation records.
    fn instrumentation_name(&self) -> &'static str;

    /// Emits the node's logic into `method_scope`. Children must be emitted
    /// through [`crate::codegen::evaluate_codegen`] so that instrumentation
    /// wraps every node.
    fn evaluate_codegen_uninstrumented(
        &self,
        requested_type: &ValueType,
        method_scope: &mut CodegenMethodScope,
        symbols: &mut ExprForgeCodegenSymbol,
        class_scope: &mut CodegenClassScope,
    ) -> CodegenExpression;
}

/// Interpreted evaluation. Never fails: an absent input produces
/// `Value::Null`.
pub trait ExprEvaluator: Send + Sync {
    fn evaluate(
        &self,
        events: &StreamTuple,
        is_new_data: bool,
        ctx: &ExprEvaluatorContext,
    ) -> Value;
}

/// A node that carries its bindings and can be both evaluated and compiled.
pub trait ValidatedNode: ExprNode + ExprForge + ExprEvaluator {
    fn as_node(&self) -> &dyn ExprNode;
    fn as_forge(&self) -> &dyn ExprForge;
    fn as_evaluator(&self) -> &dyn ExprEvaluator;
}

impl<T: ExprNode + ExprForge + ExprEvaluator> ValidatedNode for T {
    fn as_node(&self) -> &dyn ExprNode {
        self
    }

    fn as_forge(&self) -> &dyn ExprForge {
        self
    }

    fn as_evaluator(&self) -> &dyn ExprEvaluator {
        self
    }
}

/// Renders `child` as an operand of a node at `parent` precedence.
pub fn render_operand(
    child: &dyn ExprNode,
    writer: &mut dyn fmt::Write,
    parent: ExprPrecedence,
    right_side: bool,
) -> fmt::Result {
    let child_level = child.precedence().level();
    let parent_level = parent.level();
    let wrap = child_level < parent_level
        || (child_level == parent_level && (right_side || !parent.is_left_associative()));
    if wrap {
        writer.write_char('(')?;
        child.to_precedence_free_text(writer)?;
        writer.write_char(')')
    } else {
        child.to_precedence_free_text(writer)
    }
}

/// Canonical text of the tree rooted at `node`.
#[must_use]
pub fn to_expression_string(node: &dyn ExprNode) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = render_operand(node, &mut out, ExprPrecedence::Minimum, false);
    out
}

/// Canonical texts of `nodes` joined with `", "`.
#[must_use]
pub fn to_expression_string_list<'a>(nodes: impl IntoIterator<Item = &'a dyn ExprNode>) -> String {
    nodes
        .into_iter()
        .map(to_expression_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Structural equality over whole trees.
#[must_use]
pub fn deep_equals(left: &dyn ExprNode, right: &dyn ExprNode, ignore_stream_prefix: bool) -> bool {
    if !left.equals_node(right, ignore_stream_prefix) {
        return false;
    }
    let left_children = left.child_nodes();
    let right_children = right.child_nodes();
    left_children.len() == right_children.len()
        && left_children
            .iter()
            .zip(&right_children)
            .all(|(l, r)| deep_equals(*l, *r, ignore_stream_prefix))
}

/// Validates the tree rooted at `node`, prefixing failures with the clause
/// it appears in.
pub fn validated_subtree(
    origin: ExprNodeOrigin,
    node: &dyn ExprNode,
    ctx: &ExprValidationContext<'_>,
) -> Result<Box<dyn ValidatedNode>, ExprValidationError> {
    let validated = node
        .validate(ctx)
        .map_err(|err| err.with_origin(origin, &to_expression_string(node)))?;
    #[cfg(feature = "tracing")]
    tracing::debug!(
        origin = origin.clause_name(),
        expression = %to_expression_string(validated.as_node()),
        value_type = %validated.value_type(),
        "validated expression"
    );
    Ok(validated)
}

/// Evaluates once against no events; used to fold constant subtrees.
pub(crate) fn evaluate_constant(node: &dyn ValidatedNode) -> Value {
    node.evaluate(
        &StreamTuple::default(),
        true,
        &ExprEvaluatorContext::default(),
    )
}
