use thiserror::Error;

/// Unified result type for the shadowcard crate.
pub type Result<T> = std::result::Result<T, CardError>;

/// Errors surfaced by the card host.
///
/// The taxonomy matters at the public boundary: `Validation` is fatal at
/// construction and returned to the caller; `Operation` and `Markup` are
/// recovered locally and surfaced through the `error` event; `Destroyed`
/// marks the expected race of calling into a card after teardown and is
/// silently ignored at the API surface.
#[derive(Debug, Error)]
pub enum CardError {
    #[error("invalid option `{field}`: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("operation failed: {0}")]
    Operation(String),
    #[error("markup error: {0}")]
    Markup(String),
    #[error("card is destroyed")]
    Destroyed,
}

impl CardError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn operation(reason: impl Into<String>) -> Self {
        Self::Operation(reason.into())
    }
}
