//! Tracing utilities for pipeline translation and materialization.
//!
//! Enable the `tracing` feature to emit events via the `tracing` crate.
//! These macros no-op when the feature is disabled, avoiding `#[cfg]`
//! boilerplate at every call site.

/// Emit a debug-level tracing event for a pipeline operation.
///
/// ```ignore
/// trace_op!("apply", query.source().driver(), query.shape().name());
/// ```
#[macro_export]
macro_rules! trace_op {
    ($op:literal, $driver:expr, $shape:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(op = $op, driver = %$driver, shape = %$shape, "dynquery.op");
    };
}

/// Emit a debug-level tracing event when a drain operator finishes.
///
/// ```ignore
/// trace_drain!("to_vec", "memory", rows.len());
/// ```
#[macro_export]
macro_rules! trace_drain {
    ($method:literal, $driver:literal, $count:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(method = $method, driver = $driver, rows = $count, "dynquery.drain");
    };
}
