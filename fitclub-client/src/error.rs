use fitclub_shared::errors::AppError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no authenticated session")]
    NotAuthenticated,

    #[error("{code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("http error: {0}")]
    Http(reqwest::Error),

    /// The service answered 2xx with a body that is not the expected envelope.
    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// The referenced record is gone. Idempotent mutations treat this as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Self::Transient(e.to_string())
        } else {
            Self::Http(e)
        }
    }
}

/// Errors from a service running in the same process.
impl From<AppError> for ClientError {
    fn from(e: AppError) -> Self {
        let code = e.code();
        Self::Api {
            status: code.status_code().as_u16(),
            code: code.code().to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitclub_shared::errors::ErrorCode;

    #[test]
    fn app_error_keeps_code_and_status() {
        let err = ClientError::from(AppError::new(ErrorCode::TenantNotFound, "tenant not found"));
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "E5002: tenant not found");
    }

    #[test]
    fn server_errors_are_retryable() {
        let err = ClientError::Api { status: 503, code: "E0001".into(), message: "down".into() };
        assert!(err.is_retryable());
        assert!(ClientError::Transient("timeout".into()).is_retryable());
        assert!(!ClientError::NotAuthenticated.is_retryable());
    }
}
