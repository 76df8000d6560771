#![forbid(unsafe_code)]

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sf_types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentationPhase {
    /// Emitted before the wrapped expression runs (`qExpression`).
    Begin,
    /// Emitted with the result after the wrapped expression ran (`aExpression`).
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentationRecord {
    pub phase: InstrumentationPhase,
    pub node_kind: String,
    pub expression_text: String,
    pub result: Option<Value>,
}

/// Receives instrumentation records from compiled expressions built with
/// instrumentation enabled. Implementations must tolerate concurrent calls.
pub trait InstrumentationSink: fmt::Debug + Send + Sync {
    fn record(&self, record: InstrumentationRecord);
}

/// Sink that keeps every record in memory, in arrival order.
#[derive(Debug, Default)]
pub struct InstrumentationLedger {
    records: Mutex<Vec<InstrumentationRecord>>,
}

impl InstrumentationLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn records(&self) -> Vec<InstrumentationRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InstrumentationSink for InstrumentationLedger {
    fn record(&self, record: InstrumentationRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

/// Forwards instrumentation records as `trace` events.
#[cfg(feature = "tracing")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[cfg(feature = "tracing")]
impl InstrumentationSink for TracingSink {
    fn record(&self, record: InstrumentationRecord) {
        tracing::trace!(
            phase = ?record.phase,
            node_kind = %record.node_kind,
            expression = %record.expression_text,
            result = ?record.result,
            "expression instrumentation"
        );
    }
}

/// Per-call evaluation context. Opaque to expressions except for the
/// instrumentation sink, which only instrumented compiled code touches.
#[derive(Clone, Default)]
pub struct ExprEvaluatorContext {
    statement_name: String,
    agent_instance_id: u32,
    instrumentation: Option<Arc<dyn InstrumentationSink>>,
}

impl ExprEvaluatorContext {
    pub fn new(statement_name: impl Into<String>, agent_instance_id: u32) -> Self {
        Self {
            statement_name: statement_name.into(),
            agent_instance_id,
            instrumentation: None,
        }
    }

    #[must_use]
    pub fn with_instrumentation(mut self, sink: Arc<dyn InstrumentationSink>) -> Self {
        self.instrumentation = Some(sink);
        self
    }

    #[must_use]
    pub fn statement_name(&self) -> &str {
        &self.statement_name
    }

    #[must_use]
    pub fn agent_instance_id(&self) -> u32 {
        self.agent_instance_id
    }

    #[must_use]
    pub fn instrumentation(&self) -> Option<&dyn InstrumentationSink> {
        self.instrumentation.as_deref()
    }
}

impl fmt::Debug for ExprEvaluatorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExprEvaluatorContext")
            .field("statement_name", &self.statement_name)
            .field("agent_instance_id", &self.agent_instance_id)
            .field("instrumented", &self.instrumentation.is_some())
            .finish()
    }
}
