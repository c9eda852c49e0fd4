//! Coordinator error types

use thiserror::Error;

use crate::response::error_codes;

#[derive(Error, Debug, Clone)]
pub enum CoordinatorError {
    #[error("Missing or invalid token")]
    Unauthorized,

    #[error("Invalid credentials")]
    AuthFailed,

    #[error("Unknown bank: {0}")]
    UnknownBank(String),

    /// Transport or registry failure before the transfer could even begin.
    /// Never cached: the client may retry freshly.
    #[error("Bank unavailable: {0}")]
    BankUnavailable(String),

    /// Same txid is currently being executed; the client must retry later
    /// with the same txid.
    #[error("Transfer already in flight")]
    DuplicateInFlight,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Stable numeric code for the API envelope
    pub fn code(&self) -> i32 {
        match self {
            CoordinatorError::Unauthorized => error_codes::UNAUTHORIZED,
            CoordinatorError::AuthFailed => error_codes::AUTH_FAILED,
            CoordinatorError::UnknownBank(_) => error_codes::UNKNOWN_BANK,
            CoordinatorError::BankUnavailable(_) => error_codes::SERVICE_UNAVAILABLE,
            CoordinatorError::DuplicateInFlight => error_codes::DUPLICATE_IN_FLIGHT,
            CoordinatorError::InvalidAmount => error_codes::INVALID_PARAMETER,
            CoordinatorError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// HTTP status for the API envelope
    pub fn http_status(&self) -> u16 {
        match self {
            CoordinatorError::Unauthorized => 401,
            CoordinatorError::AuthFailed => 401,
            CoordinatorError::UnknownBank(_) => 404,
            CoordinatorError::BankUnavailable(_) => 503,
            CoordinatorError::DuplicateInFlight => 409,
            CoordinatorError::InvalidAmount => 400,
            CoordinatorError::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_status() {
        assert_eq!(CoordinatorError::Unauthorized.http_status(), 401);
        assert_eq!(CoordinatorError::DuplicateInFlight.http_status(), 409);
        assert_eq!(
            CoordinatorError::UnknownBank("x".into()).code(),
            error_codes::UNKNOWN_BANK
        );
        assert_eq!(
            CoordinatorError::BankUnavailable("down".into()).code(),
            error_codes::SERVICE_UNAVAILABLE
        );
    }
}
