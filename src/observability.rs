//! Observability module for correlation and tracing

use serde::{Deserialize, Serialize};
use tracing::Span;
use uuid::Uuid;

/// Correlation ID for tracking one orchestrator operation across CLI calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Span for a top-level operation, tagged with a fresh correlation id
///
/// Every event logged while the returned span is entered (including the
/// per-command events from the node facade) carries `correlation_id`.
pub fn operation_span(operation: &'static str) -> (Span, CorrelationId) {
    let id = CorrelationId::new();
    let span = tracing::info_span!("operation", op = operation, correlation_id = %id);
    (span, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = CorrelationId::new();
        let b = CorrelationId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
        assert_eq!(CorrelationId::from("x").to_string(), "x");
    }
}
