use std::fmt::{self, Write as _};

use sf_runtime::InstrumentationPhase;
use sf_types::{ArithmeticOp, RelationalOp, Value, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub(crate) usize);

impl MethodId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub(crate) usize);

impl FunctionId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Parameters every generated method can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CodegenSymbol {
    EventsPerStream,
    IsNewData,
    ExprEvalContext,
}

impl CodegenSymbol {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::EventsPerStream => "eps",
            Self::IsNewData => "isNewData",
            Self::ExprEvalContext => "exprEvalCtx",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocalType {
    /// A possibly absent event handle.
    Event,
    Value(ValueType),
}

impl fmt::Display for LocalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event => f.write_str("event"),
            Self::Value(ty) => write!(f, "{ty}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodegenExpression {
    Constant(Value),
    /// Read of a local declared earlier in the same method.
    Local(String),
    Symbol(CodegenSymbol),
    ArrayAtIndex {
        array: Box<CodegenExpression>,
        index: usize,
    },
    Underlying(Box<CodegenExpression>),
    Property {
        event: Box<CodegenExpression>,
        property: String,
    },
    Cast {
        target: ValueType,
        expression: Box<CodegenExpression>,
    },
    LocalMethod(MethodId),
    Arithmetic {
        op: ArithmeticOp,
        left: Box<CodegenExpression>,
        right: Box<CodegenExpression>,
    },
    Relational {
        op: RelationalOp,
        left: Box<CodegenExpression>,
        right: Box<CodegenExpression>,
    },
    And(Vec<CodegenExpression>),
    Or(Vec<CodegenExpression>),
    Not(Box<CodegenExpression>),
    StaticCall {
        function: FunctionId,
        args: Vec<CodegenExpression>,
    },
}

impl CodegenExpression {
    #[must_use]
    pub fn local(name: &str) -> Self {
        Self::Local(name.to_owned())
    }

    #[must_use]
    pub fn array_at_index(array: Self, index: usize) -> Self {
        Self::ArrayAtIndex {
            array: Box::new(array),
            index,
        }
    }

    #[must_use]
    pub fn underlying(event: Self) -> Self {
        Self::Underlying(Box::new(event))
    }

    #[must_use]
    pub fn property(event: Self, property: &str) -> Self {
        Self::Property {
            event: Box::new(event),
            property: property.to_owned(),
        }
    }

    #[must_use]
    pub fn cast(target: ValueType, expression: Self) -> Self {
        Self::Cast {
            target,
            expression: Box::new(expression),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[CodegenExpression], separator: &str) -> fmt::Result {
    for (position, item) in items.iter().enumerate() {
        if position > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for CodegenExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(value) => f.write_str(&value.to_literal()),
            Self::Local(name) => f.write_str(name),
            Self::Symbol(symbol) => f.write_str(symbol.name()),
            Self::ArrayAtIndex { array, index } => write!(f, "{array}[{index}]"),
            Self::Underlying(event) => write!(f, "{event}.underlying()"),
            Self::Property { event, property } => write!(f, "{event}.get(\"{property}\")"),
            Self::Cast { target, expression } => write!(f, "(({target}) {expression})"),
            Self::LocalMethod(method) => write!(f, "{method}(..)"),
            Self::Arithmetic { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::Relational { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::And(items) => {
                f.write_char('(')?;
                write_joined(f, items, " && ")?;
                f.write_char(')')
            }
            Self::Or(items) => {
                f.write_char('(')?;
                write_joined(f, items, " || ")?;
                f.write_char(')')
            }
            Self::Not(inner) => write!(f, "!{inner}"),
            Self::StaticCall { function, args } => {
                write!(f, "f{}.invoke(", function.0)?;
                write_joined(f, args, ", ")?;
                f.write_char(')')
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodegenStatement {
    DeclareVar {
        name: String,
        local_type: LocalType,
        init: CodegenExpression,
    },
    IfRefNullReturnNull(String),
    Return(CodegenExpression),
    Instrument {
        phase: InstrumentationPhase,
        node_kind: &'static str,
        expression_text: String,
        result: Option<CodegenExpression>,
    },
}

impl fmt::Display for CodegenStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeclareVar {
                name,
                local_type,
                init,
            } => write!(f, "{local_type} {name} = {init};"),
            Self::IfRefNullReturnNull(name) => write!(f, "if ({name} == null) return null;"),
            Self::Return(expression) => write!(f, "return {expression};"),
            Self::Instrument {
                phase: InstrumentationPhase::Begin,
                node_kind,
                expression_text,
                ..
            } => write!(
                f,
                "exprEvalCtx.instrumentation().begin(\"{node_kind}\", {expression_text:?});"
            ),
            Self::Instrument {
                phase: InstrumentationPhase::End,
                node_kind,
                result,
                ..
            } => match result {
                Some(result) => write!(
                    f,
                    "exprEvalCtx.instrumentation().end(\"{node_kind}\", {result});"
                ),
                None => write!(f, "exprEvalCtx.instrumentation().end(\"{node_kind}\");"),
            },
        }
    }
}

/// Ordered statements of one generated method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodegenBlock {
    statements: Vec<CodegenStatement>,
}

impl CodegenBlock {
    pub fn declare_var(
        &mut self,
        name: &str,
        local_type: LocalType,
        init: CodegenExpression,
    ) -> &mut Self {
        self.statements.push(CodegenStatement::DeclareVar {
            name: name.to_owned(),
            local_type,
            init,
        });
        self
    }

    pub fn if_ref_null_return_null(&mut self, name: &str) -> &mut Self {
        self.statements
            .push(CodegenStatement::IfRefNullReturnNull(name.to_owned()));
        self
    }

    pub fn method_return(&mut self, expression: CodegenExpression) -> &mut Self {
        self.statements.push(CodegenStatement::Return(expression));
        self
    }

    pub fn instrument(
        &mut self,
        phase: InstrumentationPhase,
        node_kind: &'static str,
        expression_text: &str,
        result: Option<CodegenExpression>,
    ) -> &mut Self {
        self.statements.push(CodegenStatement::Instrument {
            phase,
            node_kind,
            expression_text: expression_text.to_owned(),
            result,
        });
        self
    }

    #[must_use]
    pub fn statements(&self) -> &[CodegenStatement] {
        &self.statements
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodegenMethod {
    id: MethodId,
    return_type: ValueType,
    owner: &'static str,
    block: CodegenBlock,
}

impl CodegenMethod {
    #[must_use]
    pub fn id(&self) -> MethodId {
        self.id
    }

    #[must_use]
    pub fn return_type(&self) -> &ValueType {
        &self.return_type
    }

    /// Name of the forge that asked for the method.
    #[must_use]
    pub fn owner(&self) -> &'static str {
        self.owner
    }

    #[must_use]
    pub fn block(&self) -> &CodegenBlock {
        &self.block
    }

    pub(crate) fn new(id: MethodId, return_type: ValueType, owner: &'static str) -> Self {
        Self {
            id,
            return_type,
            owner,
            block: CodegenBlock::default(),
        }
    }

    pub(crate) fn block_mut(&mut self) -> &mut CodegenBlock {
        &mut self.block
    }
}
