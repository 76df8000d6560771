use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::sync::Arc;

use sf_types::ValueType;

use super::model::{CodegenBlock, CodegenExpression, CodegenMethod, CodegenSymbol, FunctionId, MethodId};
use crate::functions::SingleRowFunction;

/// Arena of the methods generated for one compilation.
#[derive(Debug, Clone, Default)]
pub struct CodegenMethodScope {
    methods: Vec<CodegenMethod>,
}

impl CodegenMethodScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new, empty method returning `return_type`.
    pub fn make_child(&mut self, return_type: ValueType, owner: &'static str) -> MethodId {
        let id = MethodId(self.methods.len());
        self.methods.push(CodegenMethod::new(id, return_type, owner));
        id
    }

    /// Block of a method created by this scope.
    pub fn block_mut(&mut self, method: MethodId) -> &mut CodegenBlock {
        self.methods[method.0].block_mut()
    }

    #[must_use]
    pub fn method(&self, method: MethodId) -> Option<&CodegenMethod> {
        self.methods.get(method.0)
    }

    #[must_use]
    pub fn methods(&self) -> &[CodegenMethod] {
        &self.methods
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Tracks which parameters each generated method reads.
#[derive(Debug, Clone, Default)]
pub struct ExprForgeCodegenSymbol {
    used: BTreeMap<MethodId, BTreeSet<CodegenSymbol>>,
}

impl ExprForgeCodegenSymbol {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get_add(&mut self, method: MethodId, symbol: CodegenSymbol) -> CodegenExpression {
        self.used.entry(method).or_default().insert(symbol);
        CodegenExpression::Symbol(symbol)
    }

    pub fn get_add_eps(&mut self, method: MethodId) -> CodegenExpression {
        self.get_add(method, CodegenSymbol::EventsPerStream)
    }

    pub fn get_add_is_new_data(&mut self, method: MethodId) -> CodegenExpression {
        self.get_add(method, CodegenSymbol::IsNewData)
    }

    pub fn get_add_expr_eval_ctx(&mut self, method: MethodId) -> CodegenExpression {
        self.get_add(method, CodegenSymbol::ExprEvalContext)
    }

    #[must_use]
    pub fn symbols_for(&self, method: MethodId) -> Vec<CodegenSymbol> {
        self.used
            .get(&method)
            .map(|symbols| symbols.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// State shared by every method of one compilation.
#[derive(Debug, Clone, Default)]
pub struct CodegenClassScope {
    instrumented: bool,
    functions: Vec<Arc<dyn SingleRowFunction>>,
}

impl CodegenClassScope {
    #[must_use]
    pub fn new(instrumented: bool) -> Self {
        Self {
            instrumented,
            functions: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_instrumented(&self) -> bool {
        self.instrumented
    }

    /// Registers a function handle, reusing the slot of an identical handle.
    pub fn add_function(&mut self, function: &Arc<dyn SingleRowFunction>) -> FunctionId {
        if let Some(position) = self
            .functions
            .iter()
            .position(|existing| Arc::ptr_eq(existing, function))
        {
            return FunctionId(position);
        }
        self.functions.push(Arc::clone(function));
        FunctionId(self.functions.len() - 1)
    }

    #[must_use]
    pub fn function(&self, function: FunctionId) -> Option<&Arc<dyn SingleRowFunction>> {
        self.functions.get(function.0)
    }
}

/// Human readable listing of the generated methods.
#[must_use]
pub fn render_listing(methods: &CodegenMethodScope, symbols: &ExprForgeCodegenSymbol) -> String {
    let mut out = String::new();
    for method in methods.methods() {
        // Writing into a String cannot fail.
        let _ = write_method(&mut out, method, symbols);
    }
    out
}

fn write_method(
    out: &mut String,
    method: &CodegenMethod,
    symbols: &ExprForgeCodegenSymbol,
) -> fmt::Result {
    let params = symbols
        .symbols_for(method.id())
        .into_iter()
        .map(CodegenSymbol::name)
        .collect::<Vec<_>>()
        .join(", ");
    writeln!(
        out,
        "{} {}({params}) {{ // {}",
        method.return_type(),
        method.id(),
        method.owner()
    )?;
    for statement in method.block().statements() {
        writeln!(out, "    {statement}")?;
    }
    writeln!(out, "}}")
}
