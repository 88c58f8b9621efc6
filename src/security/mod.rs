//! Input hardening: sanitizers and per-tool rate limiting

mod rate_limit;
mod sanitize;

pub use rate_limit::RateLimiter;
pub use sanitize::{sanitize_console_command, sanitize_memory_path, sanitize_string};
