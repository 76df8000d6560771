use std::sync::Arc;

use sf_config::{ExpressionSettings, PlugInRegistry};
use sf_types::EventType;

use crate::functions::FunctionLibrary;

/// The streams visible to an expression: stream `i` is named
/// `stream_names()[i]` and carries events of `event_types()[i]`.
pub trait StreamTypeService: Send + Sync {
    fn stream_names(&self) -> &[String];

    fn event_types(&self) -> &[Arc<EventType>];

    fn stream_num_for_stream_name(&self, stream_name: &str) -> Option<usize> {
        self.stream_names()
            .iter()
            .position(|name| name == stream_name)
    }

    fn stream_count(&self) -> usize {
        self.stream_names().len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamTypeServiceImpl {
    stream_names: Vec<String>,
    event_types: Vec<Arc<EventType>>,
}

impl StreamTypeServiceImpl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stream; it receives the next stream number.
    #[must_use]
    pub fn with_stream(mut self, stream_name: impl Into<String>, event_type: Arc<EventType>) -> Self {
        self.add_stream(stream_name, event_type);
        self
    }

    pub fn add_stream(&mut self, stream_name: impl Into<String>, event_type: Arc<EventType>) -> usize {
        self.stream_names.push(stream_name.into());
        self.event_types.push(event_type);
        self.stream_names.len() - 1
    }
}

impl StreamTypeService for StreamTypeServiceImpl {
    fn stream_names(&self) -> &[String] {
        &self.stream_names
    }

    fn event_types(&self) -> &[Arc<EventType>] {
        &self.event_types
    }
}

/// Everything node validation may consult. Plug-ins are supplied by the
/// caller; an absent registry means no plug-in resolves.
#[derive(Clone, Copy)]
pub struct ExprValidationContext<'a> {
    stream_types: &'a dyn StreamTypeService,
    plugins: Option<&'a PlugInRegistry>,
    functions: Option<&'a FunctionLibrary>,
    settings: ExpressionSettings,
    statement_name: &'a str,
}

impl<'a> ExprValidationContext<'a> {
    #[must_use]
    pub fn new(stream_types: &'a dyn StreamTypeService) -> Self {
        Self {
            stream_types,
            plugins: None,
            functions: None,
            settings: ExpressionSettings::default(),
            statement_name: "",
        }
    }

    #[must_use]
    pub fn with_plugins(mut self, plugins: &'a PlugInRegistry, functions: &'a FunctionLibrary) -> Self {
        self.plugins = Some(plugins);
        self.functions = Some(functions);
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ExpressionSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_statement_name(mut self, statement_name: &'a str) -> Self {
        self.statement_name = statement_name;
        self
    }

    #[must_use]
    pub fn stream_types(&self) -> &'a dyn StreamTypeService {
        self.stream_types
    }

    #[must_use]
    pub fn plugins(&self) -> Option<&'a PlugInRegistry> {
        self.plugins
    }

    #[must_use]
    pub fn functions(&self) -> Option<&'a FunctionLibrary> {
        self.functions
    }

    #[must_use]
    pub fn settings(&self) -> ExpressionSettings {
        self.settings
    }

    #[must_use]
    pub fn statement_name(&self) -> &'a str {
        self.statement_name
    }
}

impl std::fmt::Debug for ExprValidationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExprValidationContext")
            .field("stream_names", &self.stream_types.stream_names())
            .field("settings", &self.settings)
            .field("statement_name", &self.statement_name)
            .finish_non_exhaustive()
    }
}
