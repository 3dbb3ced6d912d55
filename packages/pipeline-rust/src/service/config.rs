use std::time::Duration;

/// Pipeline-wide configuration shared by every composed chain.
///
/// Per-request capabilities (retry, timing threshold, cache policy) take
/// precedence; these values fill in where a request declares nothing.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Slow-request threshold for requests that declare none.
    pub default_timing_warning: Option<Duration>,
    /// Global switch for the query cache-read stage.
    pub cache_read_enabled: bool,
    /// Message placed in the result when an unknown error is translated.
    pub generic_error_message: String,
    /// Upper bound on each fire-and-forget subscriber task. `None` lets them
    /// run to completion.
    pub forget_subscriber_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_timing_warning: None,
            cache_read_enabled: true,
            generic_error_message: "An unexpected error occurred".to_string(),
            forget_subscriber_timeout: Some(Duration::from_secs(30)),
        }
    }
}
