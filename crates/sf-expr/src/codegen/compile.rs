use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use sf_config::ExpressionSettings;
use sf_runtime::{ExprEvaluatorContext, InstrumentationPhase, InstrumentationRecord};
use sf_types::{EventBean, StreamTuple, Value, ValueType, logical_not};

use super::instrument::evaluate_codegen;
use super::model::{CodegenExpression, CodegenStatement, CodegenSymbol, LocalType, MethodId};
use super::scope::{CodegenClassScope, CodegenMethodScope, ExprForgeCodegenSymbol, render_listing};
use crate::error::CodegenError;
use crate::node::{ExprEvaluator, ValidatedNode, to_expression_string};

/// Inputs of one compiled evaluation.
struct Frame<'a> {
    events: &'a StreamTuple,
    is_new_data: bool,
    ctx: &'a ExprEvaluatorContext,
}

/// Per-invocation storage for a method's locals.
#[derive(Debug, Clone)]
enum Local {
    Unset,
    Value(Value),
    Event(Option<Arc<EventBean>>),
}

impl Local {
    fn is_null(&self) -> bool {
        matches!(
            self,
            Self::Unset | Self::Value(Value::Null) | Self::Event(None)
        )
    }
}

type ValueFn = Arc<dyn Fn(&Frame<'_>, &[Local]) -> Value + Send + Sync>;
type EventFn = Arc<dyn Fn(&Frame<'_>, &[Local]) -> Option<Arc<EventBean>> + Send + Sync>;
type MethodFn = Arc<dyn Fn(&Frame<'_>) -> Value + Send + Sync>;

fn value_fn(f: impl Fn(&Frame<'_>, &[Local]) -> Value + Send + Sync + 'static) -> ValueFn {
    Arc::new(f)
}

fn event_fn(
    f: impl Fn(&Frame<'_>, &[Local]) -> Option<Arc<EventBean>> + Send + Sync + 'static,
) -> EventFn {
    Arc::new(f)
}

fn method_fn(f: impl Fn(&Frame<'_>) -> Value + Send + Sync + 'static) -> MethodFn {
    Arc::new(f)
}

enum Step {
    AssignValue(usize, ValueFn),
    AssignEvent(usize, EventFn),
    ReturnNullIfNull(usize),
    Return(ValueFn),
    Instrument {
        phase: InstrumentationPhase,
        node_kind: &'static str,
        expression_text: Arc<str>,
        result: Option<ValueFn>,
    },
}

fn run_steps(steps: &[Step], slot_count: usize, frame: &Frame<'_>) -> Value {
    let mut locals = vec![Local::Unset; slot_count];
    for step in steps {
        match step {
            Step::AssignValue(slot, init) => {
                let value = init(frame, &locals);
                locals[*slot] = Local::Value(value);
            }
            Step::AssignEvent(slot, init) => {
                let event = init(frame, &locals);
                locals[*slot] = Local::Event(event);
            }
            Step::ReturnNullIfNull(slot) => {
                if locals[*slot].is_null() {
                    return Value::Null;
                }
            }
            Step::Return(result) => return result(frame, &locals),
            Step::Instrument {
                phase,
                node_kind,
                expression_text,
                result,
            } => {
                if let Some(sink) = frame.ctx.instrumentation() {
                    sink.record(InstrumentationRecord {
                        phase: *phase,
                        node_kind: (*node_kind).to_owned(),
                        expression_text: expression_text.to_string(),
                        result: result.as_ref().map(|result| result(frame, &locals)),
                    });
                }
            }
        }
    }
    Value::Null
}

type Locals = BTreeMap<String, (usize, LocalType)>;

/// Turns generated methods into closures, one closure per method.
struct Materializer<'s> {
    methods: &'s CodegenMethodScope,
    class_scope: &'s CodegenClassScope,
    compiled: HashMap<MethodId, MethodFn>,
}

impl<'s> Materializer<'s> {
    fn new(methods: &'s CodegenMethodScope, class_scope: &'s CodegenClassScope) -> Self {
        Self {
            methods,
            class_scope,
            compiled: HashMap::new(),
        }
    }

    fn method(&mut self, id: MethodId) -> Result<MethodFn, CodegenError> {
        if let Some(done) = self.compiled.get(&id) {
            return Ok(Arc::clone(done));
        }
        let methods = self.methods;
        let method = methods
            .method(id)
            .ok_or(CodegenError::UnknownMethod(id.index()))?;

        let mut locals = Locals::new();
        let mut steps = Vec::with_capacity(method.block().statements().len());
        let mut returns = false;
        for statement in method.block().statements() {
            match statement {
                CodegenStatement::DeclareVar {
                    name,
                    local_type,
                    init,
                } => {
                    if locals.contains_key(name) {
                        return Err(CodegenError::DuplicateLocal {
                            method: id.index(),
                            name: name.clone(),
                        });
                    }
                    let slot = locals.len();
                    steps.push(match local_type {
                        LocalType::Event => Step::AssignEvent(slot, self.event(id, init, &locals)?),
                        LocalType::Value(_) => {
                            Step::AssignValue(slot, self.value(id, init, &locals)?)
                        }
                    });
                    locals.insert(name.clone(), (slot, local_type.clone()));
                }
                CodegenStatement::IfRefNullReturnNull(name) => {
                    let (slot, _) = lookup(id, &locals, name)?;
                    steps.push(Step::ReturnNullIfNull(slot));
                }
                CodegenStatement::Return(expression) => {
                    steps.push(Step::Return(self.value(id, expression, &locals)?));
                    returns = true;
                }
                CodegenStatement::Instrument {
                    phase,
                    node_kind,
                    expression_text,
                    result,
                } => {
                    let result = result
                        .as_ref()
                        .map(|result| self.value(id, result, &locals))
                        .transpose()?;
                    steps.push(Step::Instrument {
                        phase: *phase,
                        node_kind: *node_kind,
                        expression_text: Arc::from(expression_text.as_str()),
                        result,
                    });
                }
            }
        }
        if !returns {
            return Err(CodegenError::MissingReturn { method: id.index() });
        }

        let slot_count = locals.len();
        let steps: Arc<[Step]> = steps.into();
        let compiled = method_fn(move |frame| run_steps(&steps, slot_count, frame));
        self.compiled.insert(id, Arc::clone(&compiled));
        Ok(compiled)
    }

    fn event(
        &mut self,
        method: MethodId,
        expression: &CodegenExpression,
        locals: &Locals,
    ) -> Result<EventFn, CodegenError> {
        match expression {
            CodegenExpression::ArrayAtIndex { array, index } => {
                if **array != CodegenExpression::Symbol(CodegenSymbol::EventsPerStream) {
                    return Err(mismatch(method, array, "the events-per-stream array"));
                }
                let index = *index;
                Ok(event_fn(move |frame, _| {
                    frame.events.get_shared(index).cloned()
                }))
            }
            CodegenExpression::Local(name) => match lookup(method, locals, name)? {
                (slot, LocalType::Event) => Ok(event_fn(move |_, locals| match &locals[slot] {
                    Local::Event(event) => event.clone(),
                    _ => None,
                })),
                (_, LocalType::Value(_)) => Err(mismatch(method, expression, "an event")),
            },
            _ => Err(mismatch(method, expression, "an event")),
        }
    }

    fn value(
        &mut self,
        method: MethodId,
        expression: &CodegenExpression,
        locals: &Locals,
    ) -> Result<ValueFn, CodegenError> {
        let compiled = match expression {
            CodegenExpression::Constant(value) => {
                let value = value.clone();
                value_fn(move |_, _| value.clone())
            }
            CodegenExpression::Local(name) => match lookup(method, locals, name)? {
                (slot, LocalType::Value(_)) => value_fn(move |_, locals| match &locals[slot] {
                    Local::Value(value) => value.clone(),
                    _ => Value::Null,
                }),
                (_, LocalType::Event) => return Err(mismatch(method, expression, "a value")),
            },
            CodegenExpression::Symbol(CodegenSymbol::IsNewData) => {
                value_fn(|frame, _| Value::Bool(frame.is_new_data))
            }
            CodegenExpression::Symbol(_) | CodegenExpression::ArrayAtIndex { .. } => {
                return Err(mismatch(method, expression, "a value"));
            }
            CodegenExpression::Underlying(event) => {
                let event = self.event(method, event, locals)?;
                value_fn(move |frame, locals| {
                    event(frame, locals).map_or(Value::Null, |event| event.underlying().clone())
                })
            }
            CodegenExpression::Property { event, property } => {
                let event = self.event(method, event, locals)?;
                let property = property.clone();
                value_fn(move |frame, locals| {
                    event(frame, locals).map_or(Value::Null, |event| event.get(&property))
                })
            }
            CodegenExpression::Cast { target, expression } => {
                let inner = self.value(method, expression, locals)?;
                let target = target.clone();
                value_fn(move |frame, locals| inner(frame, locals).coerce(&target))
            }
            CodegenExpression::LocalMethod(child) => {
                let child = self.method(*child)?;
                value_fn(move |frame, _| child(frame))
            }
            CodegenExpression::Arithmetic { op, left, right } => {
                let op = *op;
                let left = self.value(method, left, locals)?;
                let right = self.value(method, right, locals)?;
                value_fn(move |frame, locals| op.apply(&left(frame, locals), &right(frame, locals)))
            }
            CodegenExpression::Relational { op, left, right } => {
                let op = *op;
                let left = self.value(method, left, locals)?;
                let right = self.value(method, right, locals)?;
                value_fn(move |frame, locals| op.apply(&left(frame, locals), &right(frame, locals)))
            }
            CodegenExpression::And(items) => {
                let items = self.values(method, items, locals)?;
                value_fn(move |frame, locals| {
                    crate::nodes::logical::fold_and(items.iter().map(|item| item(frame, locals)))
                })
            }
            CodegenExpression::Or(items) => {
                let items = self.values(method, items, locals)?;
                value_fn(move |frame, locals| {
                    crate::nodes::logical::fold_or(items.iter().map(|item| item(frame, locals)))
                })
            }
            CodegenExpression::Not(inner) => {
                let inner = self.value(method, inner, locals)?;
                value_fn(move |frame, locals| logical_not(&inner(frame, locals)))
            }
            CodegenExpression::StaticCall { function, args } => {
                let target = self
                    .class_scope
                    .function(*function)
                    .cloned()
                    .ok_or(CodegenError::UnknownFunction(function.index()))?;
                let args = self.values(method, args, locals)?;
                value_fn(move |frame, locals| {
                    let values: Vec<Value> = args.iter().map(|arg| arg(frame, locals)).collect();
                    target.invoke(&values)
                })
            }
        };
        Ok(compiled)
    }

    fn values(
        &mut self,
        method: MethodId,
        expressions: &[CodegenExpression],
        locals: &Locals,
    ) -> Result<Vec<ValueFn>, CodegenError> {
        expressions
            .iter()
            .map(|expression| self.value(method, expression, locals))
            .collect()
    }
}

fn lookup(method: MethodId, locals: &Locals, name: &str) -> Result<(usize, LocalType), CodegenError> {
    locals
        .get(name)
        .cloned()
        .ok_or_else(|| CodegenError::UndeclaredLocal {
            method: method.index(),
            name: name.to_owned(),
        })
}

fn mismatch(method: MethodId, expression: &CodegenExpression, expected: &'static str) -> CodegenError {
    CodegenError::OperandMismatch {
        method: method.index(),
        expression: expression.to_string(),
        expected,
    }
}

/// Evaluator produced by [`ExprCompiler`]. Cheap to clone and safe to share
/// between threads; every call keeps its scratch state on its own stack.
#[derive(Clone)]
pub struct CompiledExpression {
    root: MethodFn,
    value_type: ValueType,
    expression_text: Arc<str>,
    listing: Arc<str>,
    instrumented: bool,
}

impl CompiledExpression {
    #[must_use]
    pub fn evaluate(
        &self,
        events: &StreamTuple,
        is_new_data: bool,
        ctx: &ExprEvaluatorContext,
    ) -> Value {
        (self.root)(&Frame {
            events,
            is_new_data,
            ctx,
        })
    }

    #[must_use]
    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    #[must_use]
    pub fn expression_text(&self) -> &str {
        &self.expression_text
    }

    /// Text of the generated methods, one block per method.
    #[must_use]
    pub fn listing(&self) -> &str {
        &self.listing
    }

    #[must_use]
    pub fn is_instrumented(&self) -> bool {
        self.instrumented
    }
}

impl ExprEvaluator for CompiledExpression {
    fn evaluate(
        &self,
        events: &StreamTuple,
        is_new_data: bool,
        ctx: &ExprEvaluatorContext,
    ) -> Value {
        Self::evaluate(self, events, is_new_data, ctx)
    }
}

impl fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("expression_text", &self.expression_text)
            .field("value_type", &self.value_type)
            .field("instrumented", &self.instrumented)
            .finish_non_exhaustive()
    }
}

/// Generates code for validated trees and materializes it into evaluators.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprCompiler {
    settings: ExpressionSettings,
}

impl ExprCompiler {
    #[must_use]
    pub fn new(settings: ExpressionSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> ExpressionSettings {
        self.settings
    }

    pub fn compile(&self, node: &dyn ValidatedNode) -> Result<CompiledExpression, CodegenError> {
        let value_type = node.value_type();
        let mut method_scope = CodegenMethodScope::new();
        let mut symbols = ExprForgeCodegenSymbol::new();
        let mut class_scope = CodegenClassScope::new(self.settings.instrumented);

        let root = method_scope.make_child(value_type.clone(), "ExprCompiler");
        let body = evaluate_codegen(
            node,
            &value_type,
            &mut method_scope,
            &mut symbols,
            &mut class_scope,
        );
        method_scope.block_mut(root).method_return(body);

        let listing = render_listing(&method_scope, &symbols);
        let compiled_root = Materializer::new(&method_scope, &class_scope).method(root)?;
        let expression_text = to_expression_string(node.as_node());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            expression = %expression_text,
            methods = method_scope.len(),
            instrumented = self.settings.instrumented,
            "compiled expression"
        );

        Ok(CompiledExpression {
            root: compiled_root,
            value_type,
            expression_text: Arc::from(expression_text),
            listing: Arc::from(listing),
            instrumented: self.settings.instrumented,
        })
    }
}
