use thiserror::Error;

pub type RelayResult<T> = Result<T, RelayError>;

/// Reasons an inbound event is rejected. A rejected event never mutates either store.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("`{field}` must be a non-empty identifier")]
    InvalidIdentifier { field: &'static str },

    #[error("`{field}` must not be empty")]
    EmptyPayload { field: &'static str },

    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl RelayError {
    /// Stable tag carried by the outbound `error` event.
    pub fn kind(&self) -> &'static str {
        use RelayError::*;
        match self {
            InvalidIdentifier { .. } => "invalidIdentifier",
            EmptyPayload { .. } => "emptyPayload",
            Malformed(_) => "malformed",
        }
    }
}

pub(crate) fn require_id(field: &'static str, value: &str) -> RelayResult<()> {
    if value.is_empty() {
        return Err(RelayError::InvalidIdentifier { field });
    }
    Ok(())
}
