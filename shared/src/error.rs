use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub const PRODUCT_NOT_FOUND: &str = "PRODUCT_NOT_FOUND";
pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";

/// Errors surfaced by the HTTP handlers. Every variant renders a JSON body
/// carrying at least `message`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    NotFound {
        message: String,
        code: &'static str,
        product_id: String,
    },

    #[error("{message}: {cause:#}")]
    Upstream {
        message: String,
        cause: anyhow::Error,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    message: &'a str,
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDetail<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail<'a> {
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    product_id: Option<&'a str>,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn product_not_found(product_id: impl Into<String>) -> Self {
        Self::NotFound {
            message: "Product not found".to_string(),
            code: PRODUCT_NOT_FOUND,
            product_id: product_id.into(),
        }
    }

    pub fn upstream(message: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self::Upstream {
            message: message.into(),
            cause: cause.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            Self::Validation(message) => ErrorBody {
                message,
                status_code: status.as_u16(),
                error: None,
            },
            Self::NotFound {
                message,
                code,
                product_id,
            } => ErrorBody {
                message,
                status_code: status.as_u16(),
                error: Some(ErrorDetail {
                    code,
                    product_id: Some(product_id.as_str()),
                }),
            },
            Self::Upstream { message, cause } => {
                error!("{}: {:#}", message, cause);
                ErrorBody {
                    message,
                    status_code: status.as_u16(),
                    error: Some(ErrorDetail {
                        code: INTERNAL_SERVER_ERROR,
                        product_id: None,
                    }),
                }
            }
        };

        (status, Json(body)).into_response()
    }
}
