#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{kind} name must not be empty")]
    EmptyName { kind: &'static str },
    #[error("{kind} '{name}' requires a non-empty implementation reference")]
    EmptyImplementation { kind: &'static str, name: String },
    #[error(
        "{kind} '{name}' is already registered with implementation '{existing}', cannot re-register with '{requested}'"
    )]
    Conflict {
        kind: &'static str,
        name: String,
        existing: String,
        requested: String,
    },
}

/// Configuration information for plugging in a custom date-time method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlugInDateTimeMethod {
    name: String,
    forge_class_name: String,
}

impl PlugInDateTimeMethod {
    pub fn new(name: impl Into<String>, forge_class_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            forge_class_name: forge_class_name.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference to the forge factory implementing the method.
    #[must_use]
    pub fn forge_class_name(&self) -> &str {
        &self.forge_class_name
    }
}

/// Configuration information for plugging in a single-row function callable
/// from expressions as `name(args...)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlugInSingleRowFunction {
    name: String,
    function_class_name: String,
}

impl PlugInSingleRowFunction {
    pub fn new(name: impl Into<String>, function_class_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            function_class_name: function_class_name.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn function_class_name(&self) -> &str {
        &self.function_class_name
    }
}

trait PlugInDescriptor: Clone + PartialEq {
    const KIND: &'static str;

    fn descriptor_name(&self) -> &str;
    fn implementation(&self) -> &str;
}

impl PlugInDescriptor for PlugInDateTimeMethod {
    const KIND: &'static str = "date-time method";

    fn descriptor_name(&self) -> &str {
        &self.name
    }

    fn implementation(&self) -> &str {
        &self.forge_class_name
    }
}

impl PlugInDescriptor for PlugInSingleRowFunction {
    const KIND: &'static str = "single-row function";

    fn descriptor_name(&self) -> &str {
        &self.name
    }

    fn implementation(&self) -> &str {
        &self.function_class_name
    }
}

/// Returns `Ok(false)` when a structurally equal descriptor is already present.
fn register<D: PlugInDescriptor>(entries: &mut Vec<D>, descriptor: D) -> Result<bool, ConfigError> {
    if descriptor.descriptor_name().is_empty() {
        return Err(ConfigError::EmptyName { kind: D::KIND });
    }
    if descriptor.implementation().is_empty() {
        return Err(ConfigError::EmptyImplementation {
            kind: D::KIND,
            name: descriptor.descriptor_name().to_owned(),
        });
    }
    match entries
        .iter()
        .find(|existing| existing.descriptor_name() == descriptor.descriptor_name())
    {
        Some(existing) if *existing == descriptor => Ok(false),
        Some(existing) => Err(ConfigError::Conflict {
            kind: D::KIND,
            name: descriptor.descriptor_name().to_owned(),
            existing: existing.implementation().to_owned(),
            requested: descriptor.implementation().to_owned(),
        }),
        None => {
            entries.push(descriptor);
            Ok(true)
        }
    }
}

/// Plug-in extensions known to one compilation session. Owned by the caller
/// and handed to the compiler; there is no process-wide registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlugInRegistry {
    date_time_methods: Vec<PlugInDateTimeMethod>,
    single_row_functions: Vec<PlugInSingleRowFunction>,
}

impl PlugInRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_date_time_method(
        &mut self,
        method: PlugInDateTimeMethod,
    ) -> Result<bool, ConfigError> {
        register(&mut self.date_time_methods, method)
    }

    pub fn add_single_row_function(
        &mut self,
        function: PlugInSingleRowFunction,
    ) -> Result<bool, ConfigError> {
        register(&mut self.single_row_functions, function)
    }

    #[must_use]
    pub fn date_time_method(&self, name: &str) -> Option<&PlugInDateTimeMethod> {
        self.date_time_methods
            .iter()
            .find(|method| method.name() == name)
    }

    #[must_use]
    pub fn single_row_function(&self, name: &str) -> Option<&PlugInSingleRowFunction> {
        self.single_row_functions
            .iter()
            .find(|function| function.name() == name)
    }

    #[must_use]
    pub fn date_time_methods(&self) -> &[PlugInDateTimeMethod] {
        &self.date_time_methods
    }

    #[must_use]
    pub fn single_row_functions(&self) -> &[PlugInSingleRowFunction] {
        &self.single_row_functions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionSettings {
    /// Wrap generated code with instrumentation calls.
    pub instrumented: bool,
    /// Replace operators over constant operands with their folded value.
    pub fold_constants: bool,
}

impl Default for ExpressionSettings {
    fn default() -> Self {
        Self {
            instrumented: false,
            fold_constants: true,
        }
    }
}

impl ExpressionSettings {
    #[must_use]
    pub fn with_instrumented(mut self, instrumented: bool) -> Self {
        self.instrumented = instrumented;
        self
    }

    #[must_use]
    pub fn with_fold_constants(mut self, fold_constants: bool) -> Self {
        self.fold_constants = fold_constants;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerConfiguration {
    pub settings: ExpressionSettings,
    pub plugins: PlugInRegistry,
}

impl CompilerConfiguration {
    #[must_use]
    pub fn new(settings: ExpressionSettings, plugins: PlugInRegistry) -> Self {
        Self { settings, plugins }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{
        ConfigError, ExpressionSettings, PlugInDateTimeMethod, PlugInRegistry,
        PlugInSingleRowFunction,
    };

    #[test]
    fn descriptors_compare_and_hash_structurally() {
        let a = PlugInDateTimeMethod::new("roundHalf", "forge.RoundHalf");
        let b = PlugInDateTimeMethod::new("roundHalf", "forge.RoundHalf");
        let c = PlugInDateTimeMethod::new("roundHalf", "forge.Other");

        assert_eq!(a, b);
        assert_ne!(a, c);
        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a));
    }

    #[test]
    fn registry_deduplicates_equal_descriptors() {
        let mut registry = PlugInRegistry::new();
        let method = PlugInDateTimeMethod::new("roundHalf", "forge.RoundHalf");
        assert_eq!(registry.add_date_time_method(method.clone()), Ok(true));
        assert_eq!(registry.add_date_time_method(method), Ok(false));
        assert_eq!(registry.date_time_methods().len(), 1);
        assert_eq!(
            registry
                .date_time_method("roundHalf")
                .map(PlugInDateTimeMethod::forge_class_name),
            Some("forge.RoundHalf")
        );
    }

    #[test]
    fn registry_rejects_conflicting_implementation() {
        let mut registry = PlugInRegistry::new();
        registry
            .add_single_row_function(PlugInSingleRowFunction::new("clamp", "fn.Clamp"))
            .expect("first registration");
        let err = registry
            .add_single_row_function(PlugInSingleRowFunction::new("clamp", "fn.Other"))
            .expect_err("conflict");
        assert_eq!(
            err.to_string(),
            "single-row function 'clamp' is already registered with implementation 'fn.Clamp', cannot re-register with 'fn.Other'"
        );
    }

    #[test]
    fn registry_rejects_empty_fields() {
        let mut registry = PlugInRegistry::new();
        assert_eq!(
            registry.add_single_row_function(PlugInSingleRowFunction::new("", "fn.X")),
            Err(ConfigError::EmptyName {
                kind: "single-row function"
            })
        );
        assert!(matches!(
            registry.add_date_time_method(PlugInDateTimeMethod::new("x", "")),
            Err(ConfigError::EmptyImplementation { .. })
        ));
    }

    #[test]
    fn settings_default_to_uninstrumented_folding() {
        let settings = ExpressionSettings::default();
        assert!(!settings.instrumented);
        assert!(settings.fold_constants);
        assert!(settings.with_instrumented(true).instrumented);
    }

    #[test]
    fn descriptor_round_trips_through_json() {
        let function = PlugInSingleRowFunction::new("clamp", "fn.Clamp");
        let json = serde_json::to_string(&function).expect("json");
        let back: PlugInSingleRowFunction = serde_json::from_str(&json).expect("back");
        assert_eq!(back, function);
    }
}
