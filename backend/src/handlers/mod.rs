//! HTTP request handlers

pub mod delivery_order;
pub mod health;
pub mod invoice;
pub mod payment;
pub mod reference;
pub mod reporting;
pub mod tracking;

pub use delivery_order::*;
pub use health::*;
pub use invoice::*;
pub use payment::*;
pub use reference::*;
pub use reporting::*;
pub use tracking::*;

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{AppError, AppResult};

/// Decode a JSON body that may be left out; an empty body means defaults
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> AppResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| AppError::ValidationError(format!("Invalid request body: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::delivery_order::CancelDeliveryOrderInput;

    #[test]
    fn test_missing_body_uses_defaults() {
        let input: CancelDeliveryOrderInput = optional_json(&Bytes::new()).unwrap();
        assert!(input.reason.is_none());
        let input: CancelDeliveryOrderInput = optional_json(&Bytes::from_static(b"  \n")).unwrap();
        assert!(input.reason.is_none());
    }

    #[test]
    fn test_body_is_decoded() {
        let body = Bytes::from_static(br#"{"reason":"customer request"}"#);
        let input: CancelDeliveryOrderInput = optional_json(&body).unwrap();
        assert_eq!(input.reason.as_deref(), Some("customer request"));
    }

    #[test]
    fn test_malformed_body_rejected() {
        let body = Bytes::from_static(br#"{"reason": "#);
        let err = optional_json::<CancelDeliveryOrderInput>(&body).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert_eq!(
            axum::response::IntoResponse::into_response(err).status(),
            axum::http::StatusCode::BAD_REQUEST
        );
    }
}
