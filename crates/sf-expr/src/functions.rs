use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use sf_types::{Value, ValueType, numeric_promotion};

/// Implementation behind a plug-in single-row function. Looked up through
/// the function's implementation reference at validation time.
pub trait SingleRowFunction: fmt::Debug + Send + Sync {
    /// Result type for the given parameter types, or a reason the call is
    /// not valid.
    fn return_type(&self, parameter_types: &[ValueType]) -> Result<ValueType, String>;

    /// Must be pure: the interpreted and compiled paths may call it a
    /// different number of times.
    fn invoke(&self, args: &[Value]) -> Value;
}

/// Implementations keyed by implementation reference.
#[derive(Debug, Clone, Default)]
pub struct FunctionLibrary {
    functions: BTreeMap<String, Arc<dyn SingleRowFunction>>,
}

impl FunctionLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Library pre-populated with `streamforge.Abs` and `streamforge.Coalesce`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut library = Self::new();
        library.insert("streamforge.Abs", Arc::new(Abs));
        library.insert("streamforge.Coalesce", Arc::new(Coalesce));
        library
    }

    /// Returns the implementation previously bound to the reference, if any.
    pub fn insert(
        &mut self,
        implementation: impl Into<String>,
        function: Arc<dyn SingleRowFunction>,
    ) -> Option<Arc<dyn SingleRowFunction>> {
        self.functions.insert(implementation.into(), function)
    }

    #[must_use]
    pub fn resolve(&self, implementation: &str) -> Option<&Arc<dyn SingleRowFunction>> {
        self.functions.get(implementation)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// `abs(x)` for one numeric argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct Abs;

impl SingleRowFunction for Abs {
    fn return_type(&self, parameter_types: &[ValueType]) -> Result<ValueType, String> {
        match parameter_types {
            [ty] if ty.is_numeric() || matches!(ty, ValueType::Null | ValueType::Any) => {
                Ok(ty.clone())
            }
            [ty] => Err(format!("abs requires a numeric parameter but received {ty}")),
            _ => Err(format!(
                "abs takes one parameter but received {}",
                parameter_types.len()
            )),
        }
    }

    fn invoke(&self, args: &[Value]) -> Value {
        match args {
            [Value::Int64(v)] => v.checked_abs().map_or(Value::Null, Value::Int64),
            [Value::Float64(v)] => Value::Float64(v.abs()),
            _ => Value::Null,
        }
    }
}

/// First non-null argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct Coalesce;

impl SingleRowFunction for Coalesce {
    fn return_type(&self, parameter_types: &[ValueType]) -> Result<ValueType, String> {
        let Some((first, rest)) = parameter_types.split_first() else {
            return Err("coalesce requires at least one parameter".to_owned());
        };
        rest.iter().try_fold(first.clone(), |acc, ty| {
            if acc == *ty || *ty == ValueType::Null {
                Ok(acc)
            } else if acc == ValueType::Null {
                Ok(ty.clone())
            } else if acc.is_numeric() && ty.is_numeric() {
                numeric_promotion(&acc, ty).map_err(|err| err.to_string())
            } else {
                Err(format!("coalesce parameters {acc} and {ty} have no common type"))
            }
        })
    }

    fn invoke(&self, args: &[Value]) -> Value {
        args.iter()
            .find(|value| !value.is_null())
            .cloned()
            .unwrap_or(Value::Null)
    }
}
