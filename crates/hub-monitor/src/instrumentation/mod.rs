//! Storage operation instrumentation.
//!
//! - `operation` - per-call timing, counters, spans and error capture
//! - `proxy` - `Instrumented<S>`, a wrapper that applies `operation` to every method

pub mod operation;
pub mod proxy;

pub use operation::{
    OperationInstrumentation, OperationKind, OperationMetrics, DEFAULT_SLOW_OPERATION_THRESHOLD,
};
pub use proxy::{Instrumentable, Instrumented, OperationTable, OperationTag};
