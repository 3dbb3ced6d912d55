use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-call context threaded through every pipeline stage.
///
/// Carries the caller identity used for permission checks and cache
/// partitioning, plus the cooperative cancellation signal observed by retry
/// delays and concurrent fan-outs.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation identifier for this dispatch.
    pub call_id: Uuid,
    /// Authenticated user, if any.
    pub user_id: Option<String>,
    /// Preferred language of the caller (e.g. `"en-GB"`).
    pub language: Option<String>,
    /// Cancellation signal shared by all work spawned for this call.
    pub cancellation: CancellationToken,
}

impl RequestContext {
    /// Anonymous context with a fresh call id and its own cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            call_id: Uuid::new_v4(),
            user_id: None,
            language: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Sets the calling user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the caller's preferred language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Replaces the cancellation token, e.g. with a child of a server-wide one.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Whether the call's cancellation token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
