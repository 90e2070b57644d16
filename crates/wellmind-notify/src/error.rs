/// Errors that can occur within the notification subsystem.
///
/// A denied eligibility decision is *not* an error; it is a normal
/// [`crate::eligibility::Decision::Deny`]. This enum covers genuine
/// failures: misconfiguration, gateway transport problems, and
/// malformed gateway responses.
///
/// # Examples
///
/// ```rust
/// use wellmind_notify::error::NotifyError;
///
/// let err = NotifyError::UnknownTemplate("daily_horoscope".to_string());
/// assert!(err.to_string().contains("daily_horoscope"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The template id is not present in the built-in catalog.
    /// Caller's fault; never retried.
    #[error("Notify: unknown template '{0}'")]
    UnknownTemplate(String),

    /// An HTTP request to the push gateway failed. Transient; retried
    /// only by the next scheduled tick.
    #[error("Notify: gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a non-success status.
    #[error("Notify: gateway error: status={status}, body={body}")]
    GatewayStatus { status: u16, body: String },

    /// The gateway response did not contain one ticket per message.
    #[error("Notify: gateway returned {got} tickets for {expected} messages")]
    TicketMismatch { expected: usize, got: usize },

    /// JSON serialization or deserialization failed.
    #[error("Notify: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic notification error for cases not covered by other variants.
    #[error("Notify: {0}")]
    Other(String),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
