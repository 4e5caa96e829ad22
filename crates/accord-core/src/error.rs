use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgreementError {
    /// Missing or unmatched access token.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// The second party has already attached a signature.
    #[error("Agreement already signed.")]
    AlreadySigned,

    #[error("{0}")]
    Validation(String),

    /// Token delivery failed after the record was persisted.
    #[error("failed to deliver access token: {0:#}")]
    Notification(anyhow::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AgreementError {
    pub fn invalid_token() -> Self {
        Self::Forbidden("Invalid access token.".to_string())
    }

    pub fn missing_token() -> Self {
        Self::Forbidden("Access token is required.".to_string())
    }

    pub fn not_found() -> Self {
        Self::NotFound("Not found.".to_string())
    }
}
