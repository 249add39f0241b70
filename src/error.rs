use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// The stable error taxonomy shared by the control plane and data plane.
///
/// Every variant carries its own HTTP status and message, matching the
/// `(string, status)` pairs in the control API's error table.
#[derive(Debug, thiserror::Error)]
pub enum MiniHyperProxyError {
    #[error("Error unmarshalling request")]
    RequestUnmarshall,

    #[error("Error unmarshalling body")]
    BodyUnmarshall,

    #[error("Invalid body structure")]
    InvalidBody,

    #[error("Required field is empty")]
    EmptyField,

    #[error("Can't parse given URL")]
    UrlParsing,

    #[error("Server with provided name already exists")]
    ServerNameAlreadyExists,

    #[error("Server with provided hostname and port already exists")]
    ServerHostnamePortTaken,

    #[error("Server not Found")]
    NoServerFound,

    #[error("Wrong server Type")]
    WrongServerType,
}

impl MiniHyperProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RequestUnmarshall
            | Self::BodyUnmarshall
            | Self::InvalidBody
            | Self::EmptyField => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UrlParsing
            | Self::ServerNameAlreadyExists
            | Self::ServerHostnamePortTaken
            | Self::NoServerFound
            | Self::WrongServerType => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    #[serde(rename = "Error")]
    error: String,
}

impl IntoResponse for MiniHyperProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorEnvelope {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, MiniHyperProxyError>;
