pub mod health;
pub mod notifications;
pub mod push_tokens;
pub mod stream;

use fitclub_shared::errors::{AppError, ErrorCode};
use validator::ValidationErrors;

/// Reject a request body, listing the offending fields in `details`.
pub(crate) fn invalid_body(errors: ValidationErrors) -> AppError {
    let mut fields: Vec<&str> = errors.field_errors().keys().copied().collect();
    fields.sort_unstable();
    AppError::with_details(
        ErrorCode::ValidationError,
        errors.to_string(),
        serde_json::json!({ "fields": fields }),
    )
}
