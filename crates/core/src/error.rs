//! Error taxonomy for exchange collaborators.
//!
//! Every transport (REST client, websocket feed, paper exchange) maps its
//! failures into [`ExchangeError`] so the engine can decide between
//! "skip this leg", "stop trading" and "log and continue" without looking at
//! vendor payloads.

use thiserror::Error;

/// Exchange error code for an order rejected because the account cannot cover it.
pub const INSUFFICIENT_BALANCE_CODE: i64 = -2010;

/// Errors surfaced by an exchange collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    /// The exchange refused the order for a reason other than balance.
    #[error("order rejected ({code}): {message}")]
    Rejected { code: i64, message: String },

    /// The account could not cover the order.
    #[error("insufficient balance: {message}")]
    InsufficientBalance { message: String },

    /// Request weight exhausted. Continuing risks an IP ban.
    #[error("rate limit exceeded (HTTP {status_code})")]
    RateLimited { status_code: u16 },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timeout: {0}")]
    Timeout(String),

    /// Any other non-success HTTP response.
    #[error("API error: {status_code} - {message}")]
    Api { status_code: u16, message: String },

    /// Payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ExchangeError {
    pub fn rejected(code: i64, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }

    pub fn insufficient_balance(message: impl Into<String>) -> Self {
        Self::InsufficientBalance {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Classifies a failed HTTP response.
    ///
    /// `code` is the exchange-specific error code from the response body, if any.
    /// 429 and 418 (IP ban) are both treated as rate limiting.
    pub fn from_response(status_code: u16, code: Option<i64>, message: impl Into<String>) -> Self {
        let message = message.into();
        match (status_code, code) {
            (429 | 418, _) => Self::RateLimited { status_code },
            (_, Some(INSUFFICIENT_BALANCE_CODE)) => Self::InsufficientBalance { message },
            (400..=499, Some(code)) => Self::Rejected { code, message },
            _ => Self::Api {
                status_code,
                message,
            },
        }
    }

    /// Returns true if the same request may succeed when retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    /// Returns true if the process must stop trading.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Returns true if the account could not cover the order.
    #[must_use]
    pub const fn is_insufficient_balance(&self) -> bool {
        matches!(self, Self::InsufficientBalance { .. })
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Classification Tests ====================

    #[test]
    fn test_429_is_rate_limited() {
        let err = ExchangeError::from_response(429, None, "Too many requests");
        assert_eq!(err, ExchangeError::RateLimited { status_code: 429 });
        assert!(err.is_fatal());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_418_is_rate_limited() {
        let err = ExchangeError::from_response(418, Some(-1003), "banned");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_insufficient_balance_code() {
        let err = ExchangeError::from_response(
            400,
            Some(INSUFFICIENT_BALANCE_CODE),
            "Account has insufficient balance for requested action.",
        );
        assert!(err.is_insufficient_balance());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_other_client_error_is_rejected() {
        let err = ExchangeError::from_response(400, Some(-1013), "Filter failure: LOT_SIZE");
        assert_eq!(err, ExchangeError::rejected(-1013, "Filter failure: LOT_SIZE"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_server_error_is_transient() {
        let err = ExchangeError::from_response(503, None, "unavailable");
        assert!(matches!(err, ExchangeError::Api { status_code: 503, .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_network_and_timeout_are_transient() {
        assert!(ExchangeError::network("reset").is_transient());
        assert!(ExchangeError::timeout("10s").is_transient());
        assert!(!ExchangeError::decode("bad").is_transient());
    }

    // ==================== Display Tests ====================

    #[test]
    fn test_display() {
        assert_eq!(
            ExchangeError::RateLimited { status_code: 429 }.to_string(),
            "rate limit exceeded (HTTP 429)"
        );
        assert_eq!(
            ExchangeError::insufficient_balance("ETH").to_string(),
            "insufficient balance: ETH"
        );
    }

    #[test]
    fn test_from_serde_error() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: ExchangeError = parse.unwrap_err().into();
        assert!(matches!(err, ExchangeError::Decode(_)));
    }
}
