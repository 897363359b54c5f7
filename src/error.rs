use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use alloy_primitives::{hex::FromHexError as HEX_ERROR, ruint::ParseError as UINT_ERROR, Address};
use alloy_sol_types::Error as ABI_ERROR;
use bigdecimal::ParseBigDecimalError as BIG_DECIMAL_ERROR;
use reqwest::Error as REQWEST_ERROR;
use serde::Serialize;
use serde_json::Error as JSON_ERROR;
use sqlx::error::Error as SQL_ERROR;
use std::{
    env::VarError,
    fmt,
    io::{self, Error as IO_ERROR},
    num::{ParseFloatError, ParseIntError},
    str::{FromStr, ParseBoolError as PARSE_BOOL_ERROR},
};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::subscriber::SetGlobalDefaultError as TRACING_GLOBAL_DEFAULT_ERROR;
use url::ParseError as URL_ERROR;

use crate::types::ProtocolId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] IO_ERROR),

    #[error("{0}")]
    URL(#[from] URL_ERROR),

    #[error("{0}")]
    INT(#[from] ParseIntError),

    #[error("{0}")]
    FLOAT(#[from] ParseFloatError),

    #[error("{0}")]
    SQL(#[from] SQL_ERROR),

    #[error("{0}")]
    VAR(#[from] VarError),

    #[error("{0}")]
    TokioJoinError(#[from] JoinError),

    #[error("{0}")]
    BigDecimalError(#[from] BIG_DECIMAL_ERROR),

    #[error("{0}")]
    JsonError(#[from] JSON_ERROR),

    #[error("{0}")]
    ReqwestError(#[from] REQWEST_ERROR),

    #[error("{0}")]
    ParseBoolError(#[from] PARSE_BOOL_ERROR),

    #[error("{0}")]
    HexError(#[from] HEX_ERROR),

    #[error("{0}")]
    UintParseError(#[from] UINT_ERROR),

    #[error("ABI error: {0}")]
    AbiError(#[from] ABI_ERROR),

    #[error("Tracing error: {0}")]
    SetGlobalDefaultError(#[from] TRACING_GLOBAL_DEFAULT_ERROR),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        user_message: String,
    },

    #[error("Wallet not connected: {0}")]
    WalletNotConnected(String),

    #[error("Protocol not supported: {0}")]
    UnsupportedProtocol(String),

    #[error("{protocol} does not support asset {asset}")]
    UnsupportedAsset { protocol: ProtocolId, asset: Address },

    #[error("{0}")]
    Chain(#[from] ChainError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Task error: {0}")]
    TaskError(String),
}

impl Error {
    pub fn invalid_input(message: impl Into<String>, user_message: impl Into<String>) -> Self {
        Error::InvalidInput {
            message: message.into(),
            user_message: user_message.into(),
        }
    }

    /// Maps any failure onto the fixed error taxonomy used for logging,
    /// user feedback and the retry decision.
    pub fn classify(&self) -> DeFiError {
        match self {
            Error::Chain(e) => DeFiError::new(e.kind, e.message.to_owned()),
            Error::InvalidInput {
                message,
                user_message,
            } => DeFiError {
                kind: ErrorKind::InvalidInput,
                message: message.to_owned(),
                user_message: user_message.to_owned(),
                recoverable: true,
                retryable: false,
            },
            Error::UnsupportedAsset { .. } | Error::UnsupportedProtocol(_) => DeFiError {
                kind: ErrorKind::InvalidInput,
                message: self.to_string(),
                user_message: String::from("Invalid token selected."),
                recoverable: true,
                retryable: false,
            },
            Error::WalletNotConnected(message) => {
                DeFiError::new(ErrorKind::WalletNotConnected, message.to_owned())
            },
            Error::ReqwestError(_) => DeFiError::new(ErrorKind::NetworkError, self.to_string()),
            Error::NotFound(message) => DeFiError {
                kind: ErrorKind::NotFound,
                message: message.to_owned(),
                user_message: String::from("The requested record does not exist."),
                recoverable: true,
                retryable: false,
            },
            _ => DeFiError::new(ErrorKind::Unknown, self.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct ChainError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ChainError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ChainError {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UserRejected,
    InsufficientFunds,
    InsufficientAllowance,
    ContractReverted,
    NetworkError,
    UnsupportedChain,
    WalletNotConnected,
    InvalidInput,
    NotFound,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UserRejected => "user_rejected",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::InsufficientAllowance => "insufficient_allowance",
            ErrorKind::ContractReverted => "contract_reverted",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::UnsupportedChain => "unsupported_chain",
            ErrorKind::WalletNotConnected => "wallet_not_connected",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unknown => "unknown",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::UserRejected => "Transaction cancelled. You can try again when ready.",
            ErrorKind::InsufficientFunds => "You don't have enough tokens for this transaction.",
            ErrorKind::InsufficientAllowance => "Please approve the token spending first.",
            ErrorKind::ContractReverted => {
                "Transaction failed. Please check your inputs and try again."
            },
            ErrorKind::NetworkError => "Network error. Please check your connection and try again.",
            ErrorKind::UnsupportedChain => "Please switch to Ethereum mainnet to continue.",
            ErrorKind::WalletNotConnected => "Please connect your wallet to continue.",
            ErrorKind::InvalidInput => "Please check your inputs and try again.",
            ErrorKind::NotFound => "The requested record does not exist.",
            ErrorKind::Unknown => "Something went wrong. Please try again.",
        }
    }

    /// `(recoverable, retryable)`
    pub fn flags(&self) -> (bool, bool) {
        match self {
            ErrorKind::UserRejected => (true, false),
            ErrorKind::InsufficientFunds => (true, false),
            ErrorKind::InsufficientAllowance => (true, true),
            ErrorKind::ContractReverted => (true, true),
            ErrorKind::NetworkError => (true, true),
            ErrorKind::UnsupportedChain => (true, false),
            ErrorKind::WalletNotConnected => (true, false),
            ErrorKind::InvalidInput => (true, false),
            ErrorKind::NotFound => (true, false),
            ErrorKind::Unknown => (true, true),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidInput | ErrorKind::UnsupportedChain => StatusCode::BAD_REQUEST,
            ErrorKind::WalletNotConnected => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::UserRejected => StatusCode::CONFLICT,
            ErrorKind::InsufficientFunds
            | ErrorKind::InsufficientAllowance
            | ErrorKind::ContractReverted => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NetworkError => StatusCode::BAD_GATEWAY,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<ErrorKind, Self::Err> {
        match value {
            "user_rejected" => Ok(ErrorKind::UserRejected),
            "insufficient_funds" => Ok(ErrorKind::InsufficientFunds),
            "insufficient_allowance" => Ok(ErrorKind::InsufficientAllowance),
            "contract_reverted" => Ok(ErrorKind::ContractReverted),
            "network_error" => Ok(ErrorKind::NetworkError),
            "unsupported_chain" => Ok(ErrorKind::UnsupportedChain),
            "wallet_not_connected" => Ok(ErrorKind::WalletNotConnected),
            "invalid_input" => Ok(ErrorKind::InvalidInput),
            "not_found" => Ok(ErrorKind::NotFound),
            "unknown" => Ok(ErrorKind::Unknown),
            _ => Err(io::Error::other("Error kind not supported")),
        }
    }
}

/// Classified failure: a machine-readable kind, the technical message for
/// logs, and the short message shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeFiError {
    pub kind: ErrorKind,
    pub message: String,
    pub user_message: String,
    pub recoverable: bool,
    pub retryable: bool,
}

impl DeFiError {
    pub fn new(kind: ErrorKind, message: String) -> Self {
        let (recoverable, retryable) = kind.flags();
        DeFiError {
            kind,
            message,
            user_message: kind.user_message().to_owned(),
            recoverable,
            retryable,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    kind: ErrorKind,
    message: &'a str,
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        self.classify().kind.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        let classified = self.classify();
        HttpResponse::build(classified.kind.status_code()).json(ErrorBody {
            kind: classified.kind,
            message: &classified.user_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_error_keeps_its_kind() {
        let error = Error::from(ChainError::new(ErrorKind::InsufficientFunds, "transfer amount exceeds balance"));
        let classified = error.classify();

        assert_eq!(classified.kind, ErrorKind::InsufficientFunds);
        assert!(classified.recoverable);
        assert!(!classified.retryable);
        assert_eq!(classified.message, "transfer amount exceeds balance");
    }

    #[test]
    fn test_invalid_input_is_not_retryable() {
        let error = Error::invalid_input("amount must be greater than 0", "Please enter a valid amount greater than 0.");
        let classified = error.classify();

        assert_eq!(classified.kind, ErrorKind::InvalidInput);
        assert!(!classified.retryable);
        assert_eq!(classified.user_message, "Please enter a valid amount greater than 0.");
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_network_errors_are_retryable() {
        let classified = DeFiError::new(ErrorKind::NetworkError, String::from("timeout"));
        assert!(classified.retryable);
        assert_eq!(classified.kind.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_error_kind_round_trip() {
        for kind in [
            ErrorKind::UserRejected,
            ErrorKind::InsufficientAllowance,
            ErrorKind::UnsupportedChain,
            ErrorKind::Unknown,
        ] {
            assert_eq!(ErrorKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }
}
