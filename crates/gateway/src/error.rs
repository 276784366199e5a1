//! API error type and its HTTP mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use atelier_protocol::error_codes;

/// An error surfaced to an HTTP client with a stable message code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error_codes::NOT_FOUND, message)
    }

    pub fn busy() -> Self {
        let mut err = Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::BUSY,
            "account switch in progress, retry shortly",
        );
        err.retry_after_secs = Some(2);
        err
    }

    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::UPSTREAM_UNAVAILABLE,
            message,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error_codes::INTERNAL, message)
    }

    /// A raw upstream error relayed with its original status when sensible.
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        let status = status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        Self::new(status, error_codes::UPSTREAM_UNAVAILABLE, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": { "code": self.code, "message": self.message }
        }));
        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

impl From<atelier_translate::Error> for ApiError {
    fn from(e: atelier_translate::Error) -> Self {
        match e {
            atelier_translate::Error::InvalidInput(msg) => Self::invalid(msg),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<atelier_pool::Error> for ApiError {
    fn from(e: atelier_pool::Error) -> Self {
        use atelier_pool::Error as Pool;
        match &e {
            Pool::AuthExpired(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                error_codes::AUTH_EXPIRED,
                e.to_string(),
            ),
            Pool::RegionBlocked(_) => Self::new(
                StatusCode::BAD_GATEWAY,
                error_codes::REGION_BLOCKED,
                e.to_string(),
            ),
            Pool::Unreachable { .. } => Self::new(
                StatusCode::BAD_GATEWAY,
                error_codes::UNREACHABLE,
                e.to_string(),
            ),
            Pool::NoUsableAccount => Self::upstream_unavailable(e.to_string()),
            _ => Self::internal(e.to_string()),
        }
    }
}

impl From<atelier_rotation::Error> for ApiError {
    fn from(e: atelier_rotation::Error) -> Self {
        match e {
            atelier_rotation::Error::UnknownAccount(i) => {
                Self::not_found(format!("account {i} is not available"))
            },
            atelier_rotation::Error::Pool(pool) => pool.into(),
        }
    }
}

impl From<atelier_registry::Error> for ApiError {
    fn from(e: atelier_registry::Error) -> Self {
        Self::upstream_unavailable(e.to_string())
    }
}

impl From<atelier_accounts::Error> for ApiError {
    fn from(e: atelier_accounts::Error) -> Self {
        match e {
            atelier_accounts::Error::NotFound(i) => Self::not_found(format!("account {i} not found")),
            atelier_accounts::Error::Malformed(msg) => Self::invalid(msg),
            other => Self::internal(other.to_string()),
        }
    }
}
