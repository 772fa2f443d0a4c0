//! Structured completion logging for node operations

use std::fmt::Display;
use std::time::Instant;

use crate::errors::Result;

/// Logs one line when an operation finishes, with its elapsed time and outcome
///
/// ```ignore
/// let log = OperationLog::start("funded wallet")
///     .field("address", &address)
///     .field("quantity", &quantity);
/// let result = transfer().await;
/// log.finish(&result);
/// ```
#[derive(Debug)]
pub struct OperationLog {
    message: &'static str,
    fields: Vec<(&'static str, String)>,
    start: Instant,
}

impl OperationLog {
    pub fn start(message: &'static str) -> Self {
        Self {
            message,
            fields: Vec::new(),
            start: Instant::now(),
        }
    }

    pub fn field(mut self, key: &'static str, value: impl Display) -> Self {
        self.fields.push((key, value.to_string()));
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn rendered_fields(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Emit `info` on success, `warn` with the error otherwise
    pub fn finish<T>(self, result: &Result<T>) {
        let elapsed_ms = self.elapsed_ms();
        let fields = self.rendered_fields();
        match result {
            Ok(_) => tracing::info!(
                elapsed_ms = %elapsed_ms,
                fields = %fields,
                "{}",
                self.message
            ),
            Err(e) => tracing::warn!(
                elapsed_ms = %elapsed_ms,
                fields = %fields,
                error = %e,
                category = e.category(),
                "{}",
                self.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ToolkitError;

    #[test]
    fn test_fields_render_in_order() {
        let log = OperationLog::start("funded wallet")
            .field("address", "addr_test1")
            .field("quantity", 5);
        assert_eq!(log.rendered_fields(), "address=addr_test1 quantity=5");

        log.finish::<()>(&Err(ToolkitError::validation("nope")));
    }
}
