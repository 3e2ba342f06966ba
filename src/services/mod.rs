//! Services shared by every call path.
//!
//! This module contains the stateless building blocks the transcoder leans on:
//! the redaction pipeline and its rule tables, the upstream error sanitizer,
//! and the usage side channel.

pub mod redaction;
pub mod rules;
pub mod sanitizer;
pub mod usage;

// Re-export commonly used types
pub use redaction::{FragmentMode, RedactionPipeline, ThinkingFilterMode};
pub use sanitizer::{sanitize, SanitizedError};
pub use usage::{LoggingUsageSink, UsageEvent, UsageSink};
