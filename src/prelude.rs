//! Re-exports of the scoped logging macros used across the gateway.

pub use slog_scope::{debug, error, info, trace, warn};
