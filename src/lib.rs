//! LLM Relay - a dialect-transcoding gateway for LLM APIs
//!
//! The relay accepts chat-completion and message-block requests, forwards
//! them to a single configured upstream in whatever dialect it speaks, and
//! streams the answer back in the caller's dialect with:
//!
//! - **Redaction**: leaked prompt spans removed and persona phrases swapped
//! - **Thinking filter**: reasoning channels redacted, blocked or pattern-stripped
//! - **Error sanitization**: upstream error bodies never reach the caller
//! - **Usage accounting**: one usage event per call, plus prometheus counters
//!
//! # Architecture
//!
//! - [`core`]: config, errors, logging context, metrics
//! - [`services`]: redaction pipeline, error sanitizer, usage sink
//! - [`transformer`]: dialect wire types, request adaptation, transcoders
//! - [`api`]: HTTP handlers and the upstream client
//!
//! # Configuration
//!
//! Optional environment variables:
//! - `HOST`: Server bind address (default: 0.0.0.0)
//! - `PORT`: Server port (default: 18000)
//! - `UPSTREAM_BASE_URL`, `UPSTREAM_API_KEY`: upstream coordinates
//! - `UPSTREAM_DIALECT`: `chat_completions` (default), `messages` or `responses`
//! - `UPSTREAM_MODEL`: model forwarded in place of the caller's
//! - `THINKING_FILTER_MODE`: `keyword_block` (default), `redact` or `pattern_remove`
//! - `VERIFY_SSL`: Verify SSL certificates for upstream (default: true)

pub mod api;
pub mod core;
pub mod services;
pub mod transformer;

pub use api::{build_router, AppState, UpstreamClient};
pub use crate::core::{AppConfig, AppError, Result};
pub use services::{LoggingUsageSink, RedactionPipeline, ThinkingFilterMode, UsageEvent, UsageSink};
pub use transformer::{Dialect, TranscodeContext};
