//! Wire-level error taxonomy.
//!
//! Every fallible operation in the core returns `Result<T, KmsError>`. Handlers
//! are the only place a `KmsError` is ever turned into bytes; nothing below the
//! handler layer knows about HTTP status codes or JSON field casing.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KmsError {
    #[error("{0}")]
    MissingParameter(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Serialization(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    InvalidMarker(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Disabled(String),

    #[error("{0}")]
    InvalidCiphertext(String),

    #[error("{0}")]
    InvalidSignature(String),

    #[error("{0}")]
    InvalidKeyUsage(String),

    #[error("{0}")]
    InvalidImportToken(String),

    #[error("{0}")]
    ExpiredImportToken(String),

    #[error("{0}")]
    IncorrectKeyMaterial(String),

    #[error("{0}")]
    AccessDenied(String),

    #[error("{0}")]
    NotAuthorized(String),

    #[error("{0}")]
    IncompleteSignature(String),

    #[error("{0}")]
    UnsupportedOperation(String),

    #[error("{0}")]
    Internal(String),
}

/// Body shape for the non-`Message`-cased exceptions.
#[derive(Serialize)]
struct LowerBody<'a> {
    #[serde(rename = "__type")]
    kind: &'a str,
    message: &'a str,
}

/// Body shape for `AccessDeniedException` / `UnsupportedOperationException`.
#[derive(Serialize)]
struct UpperBody<'a> {
    #[serde(rename = "__type")]
    kind: &'a str,
    #[serde(rename = "Message")]
    message: &'a str,
}

impl KmsError {
    /// The stable AWS-style exception name.
    pub fn kind(&self) -> &'static str {
        use KmsError::*;
        match self {
            MissingParameter(_) => "MissingParameterException",
            Validation(_) => "ValidationException",
            Serialization(_) => "SerializationException",
            NotFound(_) => "NotFoundException",
            AlreadyExists(_) => "AlreadyExistsException",
            InvalidMarker(_) => "InvalidMarkerException",
            InvalidState(_) => "KMSInvalidStateException",
            Disabled(_) => "DisabledException",
            InvalidCiphertext(_) => "InvalidCiphertextException",
            InvalidSignature(_) => "KMSInvalidSignatureException",
            InvalidKeyUsage(_) => "InvalidKeyUsageException",
            InvalidImportToken(_) => "InvalidImportTokenException",
            ExpiredImportToken(_) => "ExpiredImportTokenException",
            IncorrectKeyMaterial(_) => "IncorrectKeyMaterialException",
            AccessDenied(_) => "AccessDeniedException",
            NotAuthorized(_) => "NotAuthorizedException",
            IncompleteSignature(_) => "IncompleteSignature",
            UnsupportedOperation(_) => "UnsupportedOperationException",
            Internal(_) => "InternalFailureException",
        }
    }

    /// The HTTP status this exception is reported under.
    pub fn status(&self) -> u16 {
        match self {
            KmsError::Internal(_) => 500,
            _ => 400,
        }
    }

    /// True for exceptions that use the capitalized `Message` field.
    fn uses_upper_message(&self) -> bool {
        matches!(self, KmsError::AccessDenied(_) | KmsError::UnsupportedOperation(_))
    }

    /// Render the `{"__type": ..., "message"|"Message": ...}` wire body.
    pub fn to_json(&self) -> serde_json::Value {
        let message = self.to_string();
        if self.uses_upper_message() {
            serde_json::to_value(UpperBody { kind: self.kind(), message: &message })
        } else {
            serde_json::to_value(LowerBody { kind: self.kind(), message: &message })
        }
        .expect("exception body is always representable as JSON")
    }
}

pub type KmsResult<T> = Result<T, KmsError>;

impl IntoResponse for KmsError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}
